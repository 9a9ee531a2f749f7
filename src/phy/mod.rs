//! PHY - Physical layer abstraction
//!
//! The PHY layer is an abstraction over the various hardware that `profidp` supports for
//! PROFIBUS communication.  You will need to enable the corresponding crate features for your PHY
//! implementation.  Here is a list:
//!
//! - `phy-serial`: Platform-independent PHY implementation for serial port devices
//! - `phy-dummy`: Emulated-slave PHY implementation for testing without hardware
//!
//! A PROFIBUS line is half-duplex.  PHY implementations must never initiate a
//! transmission while a reception is in progress; the trait contract makes
//! this an API misuse (see the panic notes below).  Bytes are sent in 11 bit
//! UART frames: 1 start bit, 8 data bits, even parity, 1 stop bit.  Bytes
//! that arrive with parity or stop bit errors are dropped by the hardware
//! driver; the telegram reassembler upstream detects the damage through its
//! checksum and length validation and counts the fault.

#[cfg(feature = "phy-serial")]
mod serial;
#[cfg(feature = "phy-serial")]
pub use serial::SerialPortPhy;

#[cfg(feature = "phy-dummy")]
pub mod dummy;
#[cfg(feature = "phy-dummy")]
pub use dummy::DummySlavePhy;

/// Errors reported by PHY implementations
#[derive(Debug)]
pub enum PhyError {
    /// The underlying device could not be opened or accessed.
    #[cfg(feature = "std")]
    Io(std::io::Error),
    /// A byte was damaged on the line (parity or stop bit error).
    Framing,
}

impl core::fmt::Display for PhyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            #[cfg(feature = "std")]
            PhyError::Io(e) => write!(f, "serial device error: {e}"),
            PhyError::Framing => write!(f, "framing error on the line"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PhyError {}

#[cfg(feature = "std")]
impl From<std::io::Error> for PhyError {
    fn from(value: std::io::Error) -> Self {
        PhyError::Io(value)
    }
}

/// Line access as the FDL station needs it
///
/// All methods are polled and must never block: the FDL station calls them
/// from its cooperative loop and derives every protocol timeout from the
/// timestamps it passes in.  An implementation only needs to provide the
/// three raw-byte primitives; the telegram-level conveniences are built on
/// top of them.
pub trait ProfibusPhy {
    /// Report whether a previously staged transmission is still going out.
    ///
    /// Implementations should use this call to push remaining transmit data
    /// towards the hardware.  Once this returns `false`, the line has fallen
    /// back to reception.
    ///
    /// While this returns `true`, the line is busy: calling any of the other
    /// trait methods during that time is a contract violation.
    fn poll_transmission(&mut self, now: crate::time::Instant) -> bool;

    /// Stage raw bytes for transmission.
    ///
    /// The closure `f` fills the transmit buffer handed to it and returns
    /// how many of its bytes to send, along with an arbitrary result that is
    /// passed through to the caller.  A length of zero leaves the line
    /// untouched.  This call only starts the transmission; completion is
    /// tracked through [`poll_transmission()`][`ProfibusPhy::poll_transmission`].
    ///
    /// # Panics
    /// May panic when a transmission is already in progress.
    fn transmit_data<F, R>(&mut self, now: crate::time::Instant, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> (usize, R);

    /// Look at the received bytes and consume some of them.
    ///
    /// The closure `f` is given everything received so far (possibly an
    /// empty slice) and returns how many leading bytes are consumed, plus a
    /// result that is passed through.  Bytes that are not consumed stay
    /// available for the next call.
    ///
    /// # Panics
    /// May panic when a transmission is in progress.
    fn receive_data<F, R>(&mut self, now: crate::time::Instant, f: F) -> R
    where
        F: FnOnce(&[u8]) -> (usize, R);

    /// Stage a single telegram for transmission.
    ///
    /// The closure `f` gets a [`TelegramTx`][`crate::fdl::TelegramTx`] over
    /// the transmit buffer.  It either encodes one telegram through it and
    /// returns the resulting [`TelegramTxResponse`][`crate::fdl::TelegramTxResponse`],
    /// or declines by returning `None`, in which case nothing is sent.
    ///
    /// # Panics
    /// May panic when a transmission is already in progress.
    fn transmit_telegram<F>(
        &mut self,
        now: crate::time::Instant,
        f: F,
    ) -> Option<crate::fdl::TelegramTxResponse>
    where
        F: FnOnce(crate::fdl::TelegramTx) -> Option<crate::fdl::TelegramTxResponse>,
    {
        self.transmit_data(now, |buffer| {
            match f(crate::fdl::TelegramTx::new(buffer)) {
                None => (0, None),
                Some(response) => {
                    let length = response.bytes_sent();
                    if log::log_enabled!(log::Level::Trace) {
                        match crate::fdl::Telegram::deserialize(&buffer[..length]) {
                            Some(Ok((telegram, _))) => log::trace!("PHY TX {telegram:?}"),
                            // The encoder should make this impossible.
                            _ => log::trace!("PHY TX undecodable: {:02X?}", &buffer[..length]),
                        }
                    }
                    (length, Some(response))
                }
            }
        })
    }

    /// Try to take one complete telegram out of the receive path.
    ///
    /// When the received bytes form a full, valid telegram, `f` is called
    /// with it and the telegram's bytes are consumed.  An incomplete frame
    /// consumes nothing and returns `None`; garbage flushes the buffer so
    /// reception can resynchronize.
    ///
    /// # Panics
    /// May panic when a transmission is in progress.
    fn receive_telegram<F, R>(&mut self, now: crate::time::Instant, f: F) -> Option<R>
    where
        F: FnOnce(crate::fdl::Telegram) -> R,
    {
        self.receive_data(now, |buffer| match crate::fdl::Telegram::deserialize(buffer) {
            None => (0, None),
            Some(Err(e)) => {
                log::trace!("PHY RX flushing {} undecodable bytes: {e}", buffer.len());
                (buffer.len(), None)
            }
            Some(Ok((telegram, length))) => {
                log::trace!("PHY RX {telegram:?}");
                (length, Some(f(telegram)))
            }
        })
    }

    /// Number of bytes waiting in the receive path, without consuming any.
    ///
    /// # Panics
    /// May panic when a transmission is in progress.
    fn poll_pending_received_bytes(&mut self, now: crate::time::Instant) -> usize {
        self.receive_data(now, |buffer| (0, buffer.len()))
    }

    /// Drop all bytes currently waiting in the receive path.
    ///
    /// Returns how many bytes were dropped.
    ///
    /// # Panics
    /// May panic when a transmission is in progress.
    fn discard_pending(&mut self, now: crate::time::Instant) -> usize {
        self.receive_data(now, |buffer| (buffer.len(), buffer.len()))
    }
}
