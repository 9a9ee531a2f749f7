use serialport::SerialPort;
use std::borrow::Cow;
use std::io::{self, Read, Write};

/// Direction the half-duplex line is currently used in.
#[derive(Debug, Clone, Copy)]
enum LineState {
    /// Collecting received bytes.
    Receiving,
    /// A frame of `length` bytes is going out, `submitted` of which have
    /// already been handed to the port.
    Transmitting { length: usize, submitted: usize },
}

/// Platform-independent PHY implementation for serial port devices
///
/// Available with the `phy-serial` feature.
///
/// This PHY implementation is mainly meant for use with USB-RS485 converters, for applications
/// running within a general purpose operating system.  The port is configured for the PROFIBUS
/// UART frame: 8 data bits, even parity, one stop bit.  The RS-485 driver direction is managed by
/// the converter hardware.
///
/// # Error handling
/// I/O errors of the device never panic and never abort the poll loop.  A failed write loses the
/// frame that was going out; a failed read yields no bytes.  Both are recorded and can be
/// inspected through [`io_fault_count()`][`SerialPortPhy::io_fault_count`] and
/// [`last_fault()`][`SerialPortPhy::last_fault`], so the application can decide when a device
/// counts as gone.  The FDL retry machinery recovers from the occasional lost frame on its own.
///
/// # Timing considerations
/// Between USB, the converter device, and the OS, large delays are introduced into the
/// communication path.  The PROFIBUS timing parameters need to be adjusted to account for this:
///
/// - Particularly FT232-based devices come with a 16ms latency by default, unless explicitly
///   configured for low-latency.  On Linux, `profidp` requests low-latency mode automatically.
/// - The T<sub>SL</sub> (slot time) PROFIBUS timing parameter of the bus needs to be much longer
///   than usual.  Values of several milliseconds have experimentally proven themselves.
/// - At least one or two retries should be permitted to cope with the non-realtime nature of the
///   general purpose operating system.  This can be facilitated by setting `max_retry_limit` to 2
///   or 3.
///
/// If you are struggling to get any communication working, try starting with a very high
/// T<sub>SL</sub> (slot time) value (e.g. 20ms = 10000 bits at 500kBaud).
pub struct SerialPortPhy {
    port: Box<dyn SerialPort>,
    state: LineState,
    /// Frame staged for transmission
    tx_frame: [u8; 256],
    /// Received bytes that were not consumed yet
    rx_queue: Vec<u8>,
    /// Time of the most recent reception, for diagnostics
    last_rx: Option<crate::time::Instant>,
    /// Number of I/O errors observed on the device
    faults: u32,
    /// The most recent I/O error
    last_fault: Option<crate::phy::PhyError>,
}

impl SerialPortPhy {
    /// Open the serial port at `serial_port` for PROFIBUS communication.
    ///
    /// # Panics
    /// Panics when the device cannot be opened or configured.  Use
    /// [`try_new()`][`SerialPortPhy::try_new`] for fallible construction.
    pub fn new<'a, P: Into<Cow<'a, str>>>(serial_port: P, baudrate: crate::Baudrate) -> Self {
        match Self::new_inner(serial_port.into(), baudrate) {
            Ok(phy) => phy,
            Err(e) => panic!("cannot open serial port: {e}"),
        }
    }

    /// Open the serial port at `serial_port`, reporting errors as [`PhyError`][`crate::phy::PhyError`].
    pub fn try_new<'a, P: Into<Cow<'a, str>>>(
        serial_port: P,
        baudrate: crate::Baudrate,
    ) -> Result<Self, crate::phy::PhyError> {
        Self::new_inner(serial_port.into(), baudrate)
    }

    fn new_inner(
        serial_port: Cow<'_, str>,
        baudrate: crate::Baudrate,
    ) -> Result<Self, crate::phy::PhyError> {
        #[allow(unused_mut)]
        let mut port = serialport::new(serial_port, u32::try_from(baudrate.to_rate()).unwrap())
            .data_bits(serialport::DataBits::Eight)
            .flow_control(serialport::FlowControl::None)
            .parity(serialport::Parity::Even)
            .stop_bits(serialport::StopBits::One)
            .open_native()
            .map_err(io::Error::from)?;

        let configured = port.baud_rate().map_err(io::Error::from)?;
        assert_eq!(
            u64::from(configured),
            baudrate.to_rate(),
            "baudrate not configured correctly"
        );

        #[cfg(target_os = "linux")]
        serialport_low_latency::enable_low_latency(&mut port)?;

        Ok(Self {
            port: Box::new(port),
            state: LineState::Receiving,
            tx_frame: [0u8; 256],
            rx_queue: Vec::with_capacity(512),
            last_rx: None,
            faults: 0,
            last_fault: None,
        })
    }

    /// Number of I/O errors seen on the device since it was opened.
    pub fn io_fault_count(&self) -> u32 {
        self.faults
    }

    /// The most recent I/O error, if any.
    pub fn last_fault(&self) -> Option<&crate::phy::PhyError> {
        self.last_fault.as_ref()
    }

    fn record_fault(&mut self, error: io::Error) {
        log::error!("Serial port fault: {error}");
        self.faults += 1;
        self.last_fault = Some(error.into());
    }

    /// Hand the not yet submitted part of the staged frame to the port.
    ///
    /// Returns `false` once the frame left the output queue completely, or
    /// when it had to be abandoned after a device error.
    fn push_tx(&mut self) -> bool {
        let LineState::Transmitting { length, submitted } = self.state else {
            return false;
        };

        if submitted < length {
            match self.port.write(&self.tx_frame[submitted..length]) {
                Ok(written) => {
                    self.state = LineState::Transmitting {
                        length,
                        submitted: submitted + written,
                    };
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => (),
                Err(e) => {
                    self.record_fault(e);
                    self.state = LineState::Receiving;
                    return false;
                }
            }
            return true;
        }

        // Fully submitted, wait for the OS output queue to drain.
        match self.port.bytes_to_write() {
            Ok(0) => {
                self.state = LineState::Receiving;
                false
            }
            Ok(_) => true,
            Err(e) => {
                self.record_fault(io::Error::from(e));
                self.state = LineState::Receiving;
                false
            }
        }
    }

    /// Move everything the port has received into the queue.
    fn pull_rx(&mut self, now: crate::time::Instant) {
        let waiting = match self.port.bytes_to_read() {
            Ok(n) => usize::try_from(n).unwrap(),
            Err(e) => {
                self.record_fault(io::Error::from(e));
                return;
            }
        };
        if waiting == 0 {
            return;
        }

        let mut chunk = [0u8; 256];
        let mut remaining = waiting;
        while remaining > 0 {
            match self.port.read(&mut chunk[..remaining.min(chunk.len())]) {
                Ok(0) => break,
                Ok(n) => {
                    self.rx_queue.extend_from_slice(&chunk[..n]);
                    self.last_rx = Some(now);
                    remaining -= n.min(remaining);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.record_fault(e);
                    break;
                }
            }
        }
    }
}

impl crate::phy::ProfibusPhy for SerialPortPhy {
    fn poll_transmission(&mut self, _now: crate::time::Instant) -> bool {
        self.push_tx()
    }

    fn transmit_data<F, R>(&mut self, now: crate::time::Instant, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> (usize, R),
    {
        assert!(
            matches!(self.state, LineState::Receiving),
            "transmit_data() while a transmission is ongoing!"
        );

        // A clean message cycle never transmits over unread data.  If bytes are left here,
        // something on the bus misbehaved; flush them so the reply window starts clean.
        if !self.rx_queue.is_empty() {
            log::warn!(
                "Flushing {} unread bytes before transmission: {:02X?}",
                self.rx_queue.len(),
                self.rx_queue
            );
            if let Some(last_rx) = self.last_rx {
                log::warn!(
                    "The last of them arrived {}us ago",
                    (now - last_rx).total_micros()
                );
            }
            self.rx_queue.clear();
        }

        let (length, result) = f(&mut self.tx_frame[..]);
        if length == 0 {
            return result;
        }

        match self.port.write(&self.tx_frame[..length]) {
            Ok(submitted) => self.state = LineState::Transmitting { length, submitted },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.state = LineState::Transmitting {
                    length,
                    submitted: 0,
                }
            }
            Err(e) => {
                // The frame is lost.  The FDL slot timeout and retry handling recover from this.
                self.record_fault(e);
            }
        }
        result
    }

    fn receive_data<F, R>(&mut self, now: crate::time::Instant, f: F) -> R
    where
        F: FnOnce(&[u8]) -> (usize, R),
    {
        assert!(
            matches!(self.state, LineState::Receiving),
            "receive_data() while a transmission is ongoing!"
        );

        self.pull_rx(now);

        let (consumed, result) = f(&self.rx_queue);
        assert!(consumed <= self.rx_queue.len());
        self.rx_queue.drain(..consumed);
        result
    }
}
