//! Output contract of the device description (GSD) parser
//!
//! The GSD tokenizer/interpreter itself is an external component; this module
//! only defines the data the DP core consumes from it and the operations
//! deriving per-slave blocks from that data: looking up timing limits for a
//! baudrate, selecting plugged modules, building the configuration byte
//! block, and computing the expected process image sizes from it.
//!
//! All checks here fail loudly with a [`ConfigError`][`crate::conf::ConfigError`]
//! instead of coercing questionable input.  Tolerating vendor quirks in GSD
//! files is the parser's business, not ours.

use crate::conf::ConfigError;

bitflags::bitflags! {
    /// Baudrates a slave declares support for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SupportedSpeeds: u16 {
        const B9600 = 1 << 1;
        const B19200 = 1 << 2;
        const B31250 = 1 << 3;
        const B45450 = 1 << 4;
        const B93750 = 1 << 5;
        const B187500 = 1 << 6;
        const B500000 = 1 << 7;
        const B1500000 = 1 << 8;
        const B3000000 = 1 << 9;
        const B6000000 = 1 << 10;
        const B12000000 = 1 << 11;
    }
}

impl Default for SupportedSpeeds {
    fn default() -> Self {
        SupportedSpeeds::empty()
    }
}

impl SupportedSpeeds {
    fn bit_for(baudrate: crate::Baudrate) -> Self {
        match baudrate {
            crate::Baudrate::B9600 => SupportedSpeeds::B9600,
            crate::Baudrate::B19200 => SupportedSpeeds::B19200,
            crate::Baudrate::B31250 => SupportedSpeeds::B31250,
            crate::Baudrate::B45450 => SupportedSpeeds::B45450,
            crate::Baudrate::B93750 => SupportedSpeeds::B93750,
            crate::Baudrate::B187500 => SupportedSpeeds::B187500,
            crate::Baudrate::B500000 => SupportedSpeeds::B500000,
            crate::Baudrate::B1500000 => SupportedSpeeds::B1500000,
            crate::Baudrate::B3000000 => SupportedSpeeds::B3000000,
            crate::Baudrate::B6000000 => SupportedSpeeds::B6000000,
            crate::Baudrate::B12000000 => SupportedSpeeds::B12000000,
        }
    }

    /// Whether the given baudrate is among the supported ones.
    pub fn supports(self, baudrate: crate::Baudrate) -> bool {
        self.contains(Self::bit_for(baudrate))
    }
}

/// Maximum response times (in bits) per baudrate
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MaxTsdr {
    /// Maximum response time (in bits) at 9.6 kbit/s
    pub b9600: u16,
    /// Maximum response time (in bits) at 19.2 kbit/s
    pub b19200: u16,
    /// Maximum response time (in bits) at 31.25 kbit/s
    pub b31250: u16,
    /// Maximum response time (in bits) at 45.45 kbit/s
    pub b45450: u16,
    /// Maximum response time (in bits) at 93.75 kbit/s
    pub b93750: u16,
    /// Maximum response time (in bits) at 187.5 kbit/s
    pub b187500: u16,
    /// Maximum response time (in bits) at 500 kbit/s
    pub b500000: u16,
    /// Maximum response time (in bits) at 1.5 Mbit/s
    pub b1500000: u16,
    /// Maximum response time (in bits) at 3 Mbit/s
    pub b3000000: u16,
    /// Maximum response time (in bits) at 6 Mbit/s
    pub b6000000: u16,
    /// Maximum response time (in bits) at 12 Mbit/s
    pub b12000000: u16,
}

impl Default for MaxTsdr {
    fn default() -> Self {
        Self {
            b9600: 60,
            b19200: 60,
            b31250: 60,
            b45450: 60,
            b93750: 60,
            b187500: 60,
            b500000: 100,
            b1500000: 150,
            b3000000: 250,
            b6000000: 450,
            b12000000: 800,
        }
    }
}

impl MaxTsdr {
    /// Maximum response time (in bits) at the given baudrate.
    pub fn for_baudrate(&self, baudrate: crate::Baudrate) -> u16 {
        match baudrate {
            crate::Baudrate::B9600 => self.b9600,
            crate::Baudrate::B19200 => self.b19200,
            crate::Baudrate::B31250 => self.b31250,
            crate::Baudrate::B45450 => self.b45450,
            crate::Baudrate::B93750 => self.b93750,
            crate::Baudrate::B187500 => self.b187500,
            crate::Baudrate::B500000 => self.b500000,
            crate::Baudrate::B1500000 => self.b1500000,
            crate::Baudrate::B3000000 => self.b3000000,
            crate::Baudrate::B6000000 => self.b6000000,
            crate::Baudrate::B12000000 => self.b12000000,
        }
    }
}

/// One pluggable module of a modular station
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Module {
    pub name: String,
    /// Configuration identifier bytes of this module
    pub config: Vec<u8>,
    /// Constant parameterization bytes this module appends to User_Prm_Data
    pub module_prm_data: Vec<u8>,
}

/// The subset of a device description the DP core consumes
///
/// This is the output contract of the external GSD parser.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct GenericStationDescription {
    pub gsd_revision: u8,
    pub vendor: String,
    pub model: String,
    pub revision: String,
    pub ident_number: u16,

    pub sync_mode_supported: bool,
    pub freeze_mode_supported: bool,
    pub fail_safe: bool,
    /// The device insists on being run with an armed watchdog.
    pub watchdog_required: bool,

    pub max_user_prm_data_length: u8,
    /// Station-global default User_Prm_Data bytes
    pub default_user_prm_data: Vec<u8>,

    pub modular_station: bool,
    pub max_modules: u8,
    pub max_input_length: u8,
    pub max_output_length: u8,

    pub supported_speeds: SupportedSpeeds,
    pub max_tsdr: MaxTsdr,

    pub available_modules: Vec<Module>,
}

/// Result of plugging a list of modules into a station
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ModuleSelection {
    /// Concatenated configuration bytes for Chk_Cfg
    pub config: Vec<u8>,
    /// User_Prm_Data bytes (station defaults plus module constants)
    pub user_prm_data: Vec<u8>,
    /// Input process image size implied by the configuration bytes
    pub input_length: usize,
    /// Output process image size implied by the configuration bytes
    pub output_length: usize,
}

impl GenericStationDescription {
    /// Whether the slave supports the given baudrate.
    pub fn supports_baudrate(&self, baudrate: crate::Baudrate) -> bool {
        self.supported_speeds.supports(baudrate)
    }

    /// Find an available module by its exact name.
    pub fn find_module(&self, name: &str) -> Option<&Module> {
        self.available_modules.iter().find(|m| m.name == name)
    }

    /// Plug the named modules into the station.
    ///
    /// Builds the Chk_Cfg block and the User_Prm_Data block and computes the
    /// process image sizes implied by the configuration identifiers.
    pub fn select_modules<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<ModuleSelection, ConfigError> {
        if !self.modular_station && !names.is_empty() {
            return Err(ConfigError::NotModular);
        }
        if self.max_modules != 0 && names.len() > usize::from(self.max_modules) {
            return Err(ConfigError::TooManyModules {
                configured: names.len(),
                supported: usize::from(self.max_modules),
            });
        }

        let mut selection = ModuleSelection {
            user_prm_data: self.default_user_prm_data.clone(),
            ..Default::default()
        };

        for name in names {
            let name = name.as_ref();
            let module = self
                .find_module(name)
                .ok_or_else(|| ConfigError::UnknownModule(name.to_owned()))?;
            selection.config.extend_from_slice(&module.config);
            selection
                .user_prm_data
                .extend_from_slice(&module.module_prm_data);
        }

        if self.max_user_prm_data_length != 0
            && selection.user_prm_data.len() > usize::from(self.max_user_prm_data_length)
        {
            return Err(ConfigError::PrmTooLong {
                length: selection.user_prm_data.len(),
                supported: usize::from(self.max_user_prm_data_length),
            });
        }

        let (input_length, output_length) = io_lengths(&selection.config)?;
        selection.input_length = input_length;
        selection.output_length = output_length;

        if self.max_input_length != 0 && input_length > usize::from(self.max_input_length) {
            return Err(ConfigError::IoTooLarge {
                length: input_length,
                supported: usize::from(self.max_input_length),
            });
        }
        if self.max_output_length != 0 && output_length > usize::from(self.max_output_length) {
            return Err(ConfigError::IoTooLarge {
                length: output_length,
                supported: usize::from(self.max_output_length),
            });
        }

        Ok(selection)
    }
}

/// Interpret configuration identifier bytes and compute the I/O sizes.
///
/// Supports the standard format (direction and length encoded in one
/// identifier byte) and the special format (kind in the upper two bits,
/// separate length bytes following).
pub fn io_lengths(config: &[u8]) -> Result<(usize, usize), ConfigError> {
    let mut inputs = 0usize;
    let mut outputs = 0usize;

    let mut cursor = 0usize;
    while cursor < config.len() {
        let id = config[cursor];
        cursor += 1;

        if id & 0x30 != 0 {
            // Standard format identifier
            let mut length = usize::from(id & 0x0F) + 1;
            if id & 0x40 != 0 {
                // Word structure
                length *= 2;
            }
            if id & 0x10 != 0 {
                inputs += length;
            }
            if id & 0x20 != 0 {
                outputs += length;
            }
        } else {
            // Special format identifier
            let length_byte_count = match id & 0xC0 {
                // Free place
                0x00 => 0,
                // One length byte for inputs
                0x40 => 1,
                // One length byte for outputs
                0x80 => 1,
                // One length byte for outputs, one for inputs
                0xC0 => 2,
                _ => unreachable!(),
            };
            let vendor_data = usize::from(id & 0x0F);

            let mut lengths = [0usize; 2];
            for slot in lengths.iter_mut().take(length_byte_count) {
                let len = *config
                    .get(cursor)
                    .ok_or(ConfigError::MalformedConfigBytes)?;
                cursor += 1;
                let mut length = usize::from(len & 0x3F) + 1;
                if len & 0x40 != 0 {
                    length *= 2;
                }
                *slot = length;
            }
            cursor = cursor
                .checked_add(vendor_data)
                .filter(|c| *c <= config.len())
                .ok_or(ConfigError::MalformedConfigBytes)?;

            match id & 0xC0 {
                0x40 => inputs += lengths[0],
                0x80 => outputs += lengths[0],
                0xC0 => {
                    outputs += lengths[0];
                    inputs += lengths[1];
                }
                _ => (),
            }
        }
    }

    Ok((inputs, outputs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_gsd() -> GenericStationDescription {
        GenericStationDescription {
            gsd_revision: 2,
            vendor: "ACME Automation".to_owned(),
            model: "Remote I/O 16".to_owned(),
            ident_number: 0xB757,
            sync_mode_supported: true,
            freeze_mode_supported: false,
            max_user_prm_data_length: 16,
            default_user_prm_data: vec![0x00, 0x00, 0x00],
            modular_station: true,
            max_modules: 4,
            max_input_length: 32,
            max_output_length: 32,
            supported_speeds: SupportedSpeeds::B9600
                | SupportedSpeeds::B19200
                | SupportedSpeeds::B93750
                | SupportedSpeeds::B187500
                | SupportedSpeeds::B500000,
            available_modules: vec![
                Module {
                    name: "8 DI".to_owned(),
                    config: vec![0x17],
                    module_prm_data: vec![],
                },
                Module {
                    name: "8 DO".to_owned(),
                    config: vec![0x27],
                    module_prm_data: vec![0x01],
                },
                Module {
                    name: "AI 2x16bit".to_owned(),
                    config: vec![0x51],
                    module_prm_data: vec![],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn baudrate_support_lookup() {
        let gsd = example_gsd();
        assert!(gsd.supports_baudrate(crate::Baudrate::B19200));
        assert!(!gsd.supports_baudrate(crate::Baudrate::B12000000));
        assert_eq!(gsd.max_tsdr.for_baudrate(crate::Baudrate::B500000), 100);
    }

    #[test]
    fn module_selection_builds_cfg_and_prm() {
        let gsd = example_gsd();
        let selection = gsd.select_modules(&["8 DI", "8 DO", "AI 2x16bit"]).unwrap();
        assert_eq!(selection.config, vec![0x17, 0x27, 0x51]);
        assert_eq!(selection.user_prm_data, vec![0x00, 0x00, 0x00, 0x01]);
        // 8 DI = 8 input bytes, AI 2x16bit = 2 input words.
        assert_eq!(selection.input_length, 12);
        assert_eq!(selection.output_length, 8);
    }

    #[test]
    fn module_selection_rejects_bad_input() {
        let gsd = example_gsd();
        assert_eq!(
            gsd.select_modules(&["No Such Module"]),
            Err(ConfigError::UnknownModule("No Such Module".to_owned()))
        );
        assert!(matches!(
            gsd.select_modules(&["8 DI"; 5]),
            Err(ConfigError::TooManyModules { .. })
        ));

        let mut compact = example_gsd();
        compact.modular_station = false;
        assert_eq!(
            compact.select_modules(&["8 DI"]),
            Err(ConfigError::NotModular)
        );
    }

    #[test]
    fn io_lengths_standard_format() {
        // 4 input bytes, 2 output words, 1 byte in/out.
        let (i, o) = io_lengths(&[0x13, 0x61, 0x30]).unwrap();
        assert_eq!(i, 5);
        assert_eq!(o, 5);
    }

    #[test]
    fn io_lengths_special_format() {
        // Free place, 4 input bytes, 2 output words and 3 input bytes.
        let (i, o) = io_lengths(&[0x00, 0x40, 0x03, 0xC0, 0x41, 0x02]).unwrap();
        assert_eq!(i, 4 + 3);
        assert_eq!(o, 4);

        // Truncated length byte.
        assert_eq!(
            io_lengths(&[0x40]),
            Err(ConfigError::MalformedConfigBytes)
        );
    }
}
