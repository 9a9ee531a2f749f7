//! FDL - Fieldbus Data Link
mod parameters;
mod station;
mod telegram;

#[cfg(all(test, feature = "phy-dummy"))]
mod tests;

pub use parameters::{Parameters, ParametersBuilder};
pub use station::{ConnectivityState, FdlStation};
pub use telegram::{
    DataTelegram, DataTelegramHeader, DecodeEvent, Decoder, FrameCountBit, FunctionCode,
    RequestType, ResponseState, ResponseStatus, ShortConfirmation, Telegram, TelegramTx,
    TelegramTxResponse, TokenTelegram,
};

/// Errors of the fieldbus data link layer
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FdlError {
    /// A byte that is not a valid start delimiter was received while idle.
    InvalidStartDelimiter(u8),
    /// The LE field of an SD2 telegram is outside 4..=249.
    InvalidLengthField(u8),
    /// LE and LEr of an SD2 telegram disagree.
    LengthFieldMismatch,
    /// The repeated start delimiter of an SD2 telegram is missing.
    InvalidRepeatedDelimiter,
    /// The frame checksum does not match its content.
    ChecksumMismatch,
    /// The end delimiter is not 0x16.
    InvalidEndDelimiter,
    /// The FC byte encodes a reserved function.
    InvalidFunctionCode(u8),
    /// An address extension bit was set but no SAP byte followed.
    SapMissing,
    /// A partial frame stalled for longer than Tqui + Tsl.
    PartialFrameTimeout,
    /// No matching response arrived within the slot time.
    SlotTimeout,
    /// The request was repeated the maximum number of times without success.
    RetriesExhausted,
    /// The responder signalled that it is out of resources.
    NoResources,
    /// The responder answered with a negative acknowledgment.
    NegativeResponse(ResponseStatus),
}

impl core::fmt::Display for FdlError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FdlError::InvalidStartDelimiter(b) => write!(f, "invalid start delimiter 0x{b:02X}"),
            FdlError::InvalidLengthField(le) => write!(f, "invalid LE field {le}"),
            FdlError::LengthFieldMismatch => write!(f, "LE and LEr mismatch"),
            FdlError::InvalidRepeatedDelimiter => write!(f, "repeated SD2 delimiter mismatch"),
            FdlError::ChecksumMismatch => write!(f, "FCS mismatch"),
            FdlError::InvalidEndDelimiter => write!(f, "invalid end delimiter"),
            FdlError::InvalidFunctionCode(b) => write!(f, "reserved function code 0x{b:02X}"),
            FdlError::SapMissing => write!(f, "address extension without SAP byte"),
            FdlError::PartialFrameTimeout => write!(f, "partial frame timed out"),
            FdlError::SlotTimeout => write!(f, "no response within slot time"),
            FdlError::RetriesExhausted => write!(f, "request retries exhausted"),
            FdlError::NoResources => write!(f, "responder out of resources"),
            FdlError::NegativeResponse(status) => {
                write!(f, "negative acknowledgment ({status:?})")
            }
        }
    }
}

/// The interface for application layer components.
///
/// Only one application layer component is permitted per FDL station.  The
/// station calls [`transmit_telegram()`][`FdlApplication::transmit_telegram`]
/// whenever the line is free for a new message cycle.  The outcome of the
/// cycle is reported through exactly one of the other three callbacks.
pub trait FdlApplication {
    type Events: Default;

    /// Possibly transmit a telegram.
    ///
    /// The FDL station knows whether a reply is expected from the telegram
    /// that is encoded.  If a reply is received, `receive_reply()` is called
    /// to handle it.  Repetitions after a slot timeout are performed by the
    /// station itself with the originally encoded bytes.
    ///
    /// Returning `None` means the application has nothing to send right now.
    fn transmit_telegram(
        &mut self,
        now: crate::time::Instant,
        p: &Parameters,
        tx: TelegramTx,
    ) -> (Option<TelegramTxResponse>, Self::Events);

    /// Receive the reply for the telegram that was last transmitted.
    fn receive_reply(
        &mut self,
        now: crate::time::Instant,
        p: &Parameters,
        addr: u8,
        telegram: Telegram,
    ) -> Self::Events;

    /// The peer at `addr` did not answer within Tsl, all repetitions failed.
    fn handle_timeout(&mut self, now: crate::time::Instant, p: &Parameters, addr: u8)
        -> Self::Events;

    /// The message cycle failed with an error that is not retried.
    fn handle_fdl_error(
        &mut self,
        now: crate::time::Instant,
        p: &Parameters,
        addr: u8,
        error: FdlError,
    ) -> Self::Events;
}

// A sort of placeholder when no application is used.
impl FdlApplication for () {
    type Events = ();

    fn transmit_telegram(
        &mut self,
        _now: crate::time::Instant,
        _p: &Parameters,
        _tx: TelegramTx,
    ) -> (Option<TelegramTxResponse>, ()) {
        (None, ())
    }

    fn receive_reply(
        &mut self,
        _now: crate::time::Instant,
        _p: &Parameters,
        _addr: u8,
        _telegram: Telegram,
    ) {
    }

    fn handle_timeout(&mut self, _now: crate::time::Instant, _p: &Parameters, _addr: u8) {}

    fn handle_fdl_error(
        &mut self,
        _now: crate::time::Instant,
        _p: &Parameters,
        _addr: u8,
        _error: FdlError,
    ) {
    }
}
