//! Validated stack configuration
//!
//! This module models the recognized configuration options of the stack and
//! validates them against each other and against the device descriptions.
//! How the values get here (a config file, a UI, hardcoded constants) is the
//! application's business; the stack only consumes the validated model.

/// Errors detected while validating a configuration
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ConfigError {
    /// Only master class 1 is supported.
    InvalidMasterClass(u8),
    /// A station address is outside 0..=125.
    InvalidAddress(u8),
    /// The configured numeric baudrate is no PROFIBUS baudrate.
    InvalidBaudrate(u64),
    /// The slave's device description does not support the bus baudrate.
    UnsupportedBaudrate(crate::Baudrate),
    /// The selected PHY variant is not available in this build.
    UnsupportedPhy(PhyVariant),
    /// The watchdog timeout cannot be represented in watchdog factors.
    InvalidWatchdog(u32),
    /// A process image size is outside 0..=244.
    InvalidIoSize(usize),
    /// The configured process image sizes disagree with the module selection.
    SizeMismatch {
        configured: usize,
        derived: usize,
        output: bool,
    },
    /// Sync mode was requested but the device does not support it.
    SyncNotSupported,
    /// Freeze mode was requested but the device does not support it.
    FreezeNotSupported,
    /// The device requires a watchdog but none was configured.
    WatchdogRequired,
    /// A module name does not exist in the device description.
    UnknownModule(String),
    /// Modules were configured for a non-modular station.
    NotModular,
    /// More modules than the station supports.
    TooManyModules { configured: usize, supported: usize },
    /// The parameterization block exceeds the device's limit.
    PrmTooLong { length: usize, supported: usize },
    /// A process image implied by the configuration exceeds the device's limit.
    IoTooLarge { length: usize, supported: usize },
    /// Configuration identifier bytes could not be interpreted.
    MalformedConfigBytes,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::InvalidMasterClass(c) => {
                write!(f, "master class {c} is not supported (only class 1)")
            }
            ConfigError::InvalidAddress(a) => write!(f, "invalid station address {a}"),
            ConfigError::InvalidBaudrate(b) => write!(f, "{b} is no PROFIBUS baudrate"),
            ConfigError::UnsupportedBaudrate(b) => {
                write!(f, "device does not support {:?}", b)
            }
            ConfigError::UnsupportedPhy(v) => write!(f, "PHY variant {v:?} is not available"),
            ConfigError::InvalidWatchdog(ms) => write!(f, "watchdog timeout {ms}ms out of range"),
            ConfigError::InvalidIoSize(s) => write!(f, "process image size {s} out of range"),
            ConfigError::SizeMismatch {
                configured,
                derived,
                output,
            } => write!(
                f,
                "configured {} size {configured} does not match the module selection ({derived})",
                if *output { "output" } else { "input" },
            ),
            ConfigError::SyncNotSupported => write!(f, "device does not support sync mode"),
            ConfigError::FreezeNotSupported => write!(f, "device does not support freeze mode"),
            ConfigError::WatchdogRequired => write!(f, "device requires a watchdog"),
            ConfigError::UnknownModule(name) => write!(f, "unknown module \"{name}\""),
            ConfigError::NotModular => write!(f, "station is not modular"),
            ConfigError::TooManyModules {
                configured,
                supported,
            } => write!(f, "{configured} modules configured, device supports {supported}"),
            ConfigError::PrmTooLong { length, supported } => write!(
                f,
                "parameterization block of {length} bytes exceeds device limit {supported}"
            ),
            ConfigError::IoTooLarge { length, supported } => write!(
                f,
                "process image of {length} bytes exceeds device limit {supported}"
            ),
            ConfigError::MalformedConfigBytes => {
                write!(f, "configuration identifier bytes are malformed")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Selectable physical layer drivers
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PhyVariant {
    /// A serial port device (USB-RS485 converter or UART)
    Serial,
    /// Loopback dummy for testing
    Dummy,
    /// Emulated slave for testing without hardware
    DummySlave,
    /// FPGA PHY offload (separate project, not available here)
    Fpga,
}

/// Configuration of one slave
#[derive(Debug, Clone)]
pub struct SlaveConfig {
    /// Station address of the slave
    pub addr: u8,
    /// Device description, parsed externally
    pub gsd: crate::gsd::GenericStationDescription,
    /// Request sync mode during parameterization
    pub sync_mode: bool,
    /// Request freeze mode during parameterization
    pub freeze_mode: bool,
    /// Group ident mask
    pub group_mask: u8,
    /// Watchdog timeout in milliseconds (0 disables the watchdog)
    pub watchdog_ms: u32,
    /// Names of the plugged modules, in slot order
    pub modules: Vec<String>,
    /// Expected input process image size
    pub input_size: usize,
    /// Expected output process image size
    pub output_size: usize,
    /// Read diagnostics every n data exchange rounds (0 = only on demand)
    pub diag_period: u16,
    /// Display name
    pub name: Option<String>,
}

impl SlaveConfig {
    pub fn new(addr: u8, gsd: crate::gsd::GenericStationDescription) -> Self {
        Self {
            addr,
            gsd,
            sync_mode: false,
            freeze_mode: false,
            group_mask: 1,
            watchdog_ms: 5000,
            modules: Vec::new(),
            input_size: 0,
            output_size: 0,
            diag_period: 0,
            name: None,
        }
    }

    /// Validate this slave's options and derive its communication blocks.
    pub fn resolve(&self, baudrate: crate::Baudrate) -> Result<ResolvedSlave, ConfigError> {
        if self.addr > crate::consts::MAX_STATION_ADDRESS {
            return Err(ConfigError::InvalidAddress(self.addr));
        }
        if self.input_size > 244 {
            return Err(ConfigError::InvalidIoSize(self.input_size));
        }
        if self.output_size > 244 {
            return Err(ConfigError::InvalidIoSize(self.output_size));
        }
        if self.watchdog_ms != 0 && self.watchdog_ms > 255 * 255 * 10 {
            return Err(ConfigError::InvalidWatchdog(self.watchdog_ms));
        }
        if self.watchdog_ms == 0 && self.gsd.watchdog_required {
            return Err(ConfigError::WatchdogRequired);
        }
        if self.sync_mode && !self.gsd.sync_mode_supported {
            return Err(ConfigError::SyncNotSupported);
        }
        if self.freeze_mode && !self.gsd.freeze_mode_supported {
            return Err(ConfigError::FreezeNotSupported);
        }
        if !self.gsd.supports_baudrate(baudrate) {
            return Err(ConfigError::UnsupportedBaudrate(baudrate));
        }

        let selection = self.gsd.select_modules(&self.modules)?;
        if selection.input_length != self.input_size {
            return Err(ConfigError::SizeMismatch {
                configured: self.input_size,
                derived: selection.input_length,
                output: false,
            });
        }
        if selection.output_length != self.output_size {
            return Err(ConfigError::SizeMismatch {
                configured: self.output_size,
                derived: selection.output_length,
                output: true,
            });
        }

        Ok(ResolvedSlave {
            addr: self.addr,
            ident_number: self.gsd.ident_number,
            sync_mode: self.sync_mode,
            freeze_mode: self.freeze_mode,
            group_mask: self.group_mask,
            watchdog_ms: self.watchdog_ms,
            max_tsdr: self.gsd.max_tsdr.for_baudrate(baudrate),
            fail_safe: self.gsd.fail_safe,
            diag_period: self.diag_period,
            user_prm_data: selection.user_prm_data,
            config: selection.config,
            input_size: selection.input_length,
            output_size: selection.output_length,
            name: self.name.clone(),
        })
    }
}

/// A validated slave configuration with derived communication blocks
///
/// The blocks are owned here; [`slave_desc()`][`ResolvedSlave::slave_desc`]
/// lends them out to the DP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSlave {
    pub addr: u8,
    pub ident_number: u16,
    pub sync_mode: bool,
    pub freeze_mode: bool,
    pub group_mask: u8,
    pub watchdog_ms: u32,
    pub max_tsdr: u16,
    pub fail_safe: bool,
    pub diag_period: u16,
    pub user_prm_data: Vec<u8>,
    pub config: Vec<u8>,
    pub input_size: usize,
    pub output_size: usize,
    pub name: Option<String>,
}

impl ResolvedSlave {
    /// Build the slave descriptor borrowing this resolved configuration.
    pub fn slave_desc(&self) -> crate::dp::SlaveDesc<'_> {
        crate::dp::SlaveDesc {
            ident_number: self.ident_number,
            sync_mode: self.sync_mode,
            freeze_mode: self.freeze_mode,
            groups: self.group_mask,
            watchdog: (self.watchdog_ms != 0)
                .then(|| crate::time::Duration::from_millis(u64::from(self.watchdog_ms))),
            max_tsdr: self.max_tsdr,
            fail_safe: self.fail_safe,
            diag_period: self.diag_period,
            name: self.name.as_deref(),
            user_prm_data: Some(&self.user_prm_data),
            config: Some(&self.config),
            ..Default::default()
        }
    }
}

/// Top-level stack configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging verbosity: 0 = normal, 1 = debug, 2 = trace
    pub debug: u8,
    /// Physical layer driver to use
    pub phy: PhyVariant,
    /// Device path for the serial PHY
    pub dev: String,
    /// Bus baudrate in bit/s
    pub baud: u64,
    /// DP master class (only 1 is supported)
    pub master_class: u8,
    /// Station address of the master
    pub master_addr: u8,
    /// Configured slaves
    pub slaves: Vec<SlaveConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: 0,
            phy: PhyVariant::Serial,
            dev: "/dev/ttyS0".to_owned(),
            baud: 19200,
            master_class: 1,
            master_addr: 2,
            slaves: Vec::new(),
        }
    }
}

impl Config {
    /// The log level filter corresponding to the `debug` option.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.debug {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// The configured baudrate.
    pub fn baudrate(&self) -> Result<crate::Baudrate, ConfigError> {
        crate::Baudrate::from_rate(self.baud).ok_or(ConfigError::InvalidBaudrate(self.baud))
    }

    /// Validate the whole configuration and resolve all slaves.
    pub fn resolve(&self) -> Result<Vec<ResolvedSlave>, ConfigError> {
        if self.master_class != 1 {
            return Err(ConfigError::InvalidMasterClass(self.master_class));
        }
        if self.master_addr > crate::consts::MAX_STATION_ADDRESS {
            return Err(ConfigError::InvalidAddress(self.master_addr));
        }
        match self.phy {
            PhyVariant::Serial | PhyVariant::DummySlave => (),
            // The loopback dummy and the FPGA offload are not part of this build.
            variant => return Err(ConfigError::UnsupportedPhy(variant)),
        }
        let baudrate = self.baudrate()?;

        self.slaves.iter().map(|s| s.resolve(baudrate)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_gsd() -> crate::gsd::GenericStationDescription {
        crate::gsd::GenericStationDescription {
            ident_number: 0xB757,
            sync_mode_supported: false,
            freeze_mode_supported: false,
            modular_station: true,
            max_modules: 4,
            supported_speeds: crate::gsd::SupportedSpeeds::B19200
                | crate::gsd::SupportedSpeeds::B500000,
            available_modules: vec![
                crate::gsd::Module {
                    name: "8 DI".to_owned(),
                    config: vec![0x17],
                    module_prm_data: vec![],
                },
                crate::gsd::Module {
                    name: "8 DO".to_owned(),
                    config: vec![0x27],
                    module_prm_data: vec![],
                },
            ],
            ..Default::default()
        }
    }

    fn example_config() -> Config {
        let mut slave = SlaveConfig::new(8, example_gsd());
        slave.modules = vec!["8 DI".to_owned(), "8 DO".to_owned()];
        slave.input_size = 8;
        slave.output_size = 8;
        Config {
            slaves: vec![slave],
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_resolves() {
        let config = example_config();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].config, vec![0x17, 0x27]);
        assert_eq!(resolved[0].max_tsdr, 60);

        let desc = resolved[0].slave_desc();
        assert_eq!(desc.ident_number, 0xB757);
        assert_eq!(
            desc.watchdog,
            Some(crate::time::Duration::from_millis(5000))
        );
        assert_eq!(desc.config, Some(&[0x17, 0x27][..]));
    }

    #[test]
    fn log_level_mapping() {
        let mut config = example_config();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
        config.debug = 1;
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
        config.debug = 2;
        assert_eq!(config.log_level(), log::LevelFilter::Trace);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut config = example_config();
        config.master_class = 2;
        assert_eq!(config.resolve(), Err(ConfigError::InvalidMasterClass(2)));

        let mut config = example_config();
        config.master_addr = 126;
        assert_eq!(config.resolve(), Err(ConfigError::InvalidAddress(126)));

        let mut config = example_config();
        config.baud = 115200;
        assert_eq!(config.resolve(), Err(ConfigError::InvalidBaudrate(115200)));

        let mut config = example_config();
        config.baud = 9600;
        assert_eq!(
            config.resolve(),
            Err(ConfigError::UnsupportedBaudrate(crate::Baudrate::B9600))
        );

        let mut config = example_config();
        config.slaves[0].sync_mode = true;
        assert_eq!(config.resolve(), Err(ConfigError::SyncNotSupported));

        let mut config = example_config();
        config.slaves[0].input_size = 4;
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::SizeMismatch { output: false, .. })
        ));

        let mut config = example_config();
        config.slaves[0].watchdog_ms = 10_000_000;
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidWatchdog(_))
        ));

        let mut config = example_config();
        config.phy = PhyVariant::Fpga;
        assert_eq!(
            config.resolve(),
            Err(ConfigError::UnsupportedPhy(PhyVariant::Fpga))
        );
    }
}
