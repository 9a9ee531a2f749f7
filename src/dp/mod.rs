//! DP - Decentralized Peripherals application layer
mod diagnosis;
mod master;
mod signals;
mod slave;
mod slave_set;

pub use diagnosis::{
    ChannelDataType, ChannelDiagnostics, ChannelError, DiagnosticFlags, ExtDiagBlock,
    ExtDiagBlockIter, ExtendedDiagnostics, SlaveDiagnostics,
};
pub use master::{ControlCommand, DpEvents, DpMaster, DpMasterState, OperatingState};
pub use signals::{Signal, SignalValue};
pub use slave::{Slave, SlaveDesc, SlaveState};
pub use slave_set::{SlaveHandle, SlaveSet, SlaveStorage};

/// Errors of the DP application layer
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DpError {
    /// The probed station identified itself as something other than a slave.
    NotASlave(crate::fdl::ResponseState),
    /// The slave reports that it does not exist (address conflict).
    StationNonExistent,
    /// The slave rejected the parameterization telegram.
    PrmRejected,
    /// The slave rejected the configuration telegram.
    CfgRejected,
    /// The slave diagnostics signal a configuration fault.
    ConfigurationFault,
    /// The slave diagnostics signal a parameterization fault.
    ParameterFault,
    /// The slave stopped cyclic data exchange on its own.
    WatchdogExpired,
    /// A response telegram did not fit the running service.
    UnexpectedResponse,
    /// A diagnostics block was too short to parse.
    InvalidDiagnostics,
    /// The slave did not answer at all.
    Timeout,
    /// The message cycle failed on the FDL layer.
    Fdl(crate::fdl::FdlError),
    /// A signal description points outside its process image.
    SignalOutOfBounds,
    /// A signal was packed with a value of the wrong variant.
    SignalTypeMismatch,
}

impl core::fmt::Display for DpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DpError::NotASlave(state) => write!(f, "station is not a slave (type {state:?})"),
            DpError::StationNonExistent => write!(f, "slave reports station non existent"),
            DpError::PrmRejected => write!(f, "slave rejected parameterization"),
            DpError::CfgRejected => write!(f, "slave rejected configuration"),
            DpError::ConfigurationFault => write!(f, "slave signals a configuration fault"),
            DpError::ParameterFault => write!(f, "slave signals a parameterization fault"),
            DpError::WatchdogExpired => write!(f, "slave left data exchange (watchdog)"),
            DpError::UnexpectedResponse => write!(f, "unexpected response telegram"),
            DpError::InvalidDiagnostics => write!(f, "malformed diagnostics block"),
            DpError::Timeout => write!(f, "slave did not respond"),
            DpError::Fdl(e) => write!(f, "fieldbus error: {e}"),
            DpError::SignalOutOfBounds => write!(f, "signal outside the process image"),
            DpError::SignalTypeMismatch => write!(f, "signal value variant mismatch"),
        }
    }
}

impl From<crate::fdl::FdlError> for DpError {
    fn from(value: crate::fdl::FdlError) -> Self {
        DpError::Fdl(value)
    }
}
