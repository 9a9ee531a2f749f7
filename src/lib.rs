//! # `profidp` - A PROFIBUS-DP class 1 master stack
//!
//! _profidp_ is structured according to the layered model of PROFIBUS:
//!
//! - The [`phy`] module abstracts physical interfaces for RS-485 communication.
//! - The [`fdl`] module implements the _Fieldbus Data Link_ layer: telegram framing and the
//!   request/response engine with its slot timing and retry rules.
//! - The [`dp`] module implements the PROFIBUS-DP (Decentralized Peripherals) application layer.
//!   This is where slaves are brought up and cyclic data exchange is facilitated.
//!
//! Two support modules feed the layers at configuration time: [`gsd`] holds the output contract
//! of the (external) device description parser and [`conf`] the validated stack configuration.
//!
//! # Example
//! To successfully communicate with a slave, you need to initialize and parameterize all
//! layers.  Here is an example:
//!
//! ```no_run
//! use profidp::{Baudrate, fdl, dp, phy};
//!
//! // Initialize the DP master:
//! // =========================
//! let mut dp_master = dp::DpMaster::new(Vec::new());
//! // or without allocation:
//! // let storage: [dp::SlaveStorage; 4] = Default::default();
//! // let mut dp_master = dp::DpMaster::new(&mut storage[..]);
//!
//! // Let's add a slave:
//! // ==================
//! let remoteio_address = 8;
//! let remoteio_desc = dp::SlaveDesc {
//!     // ...
//!     // parameterization and configuration blocks, best derived from the GSD
//!     // ...
//!     ..Default::default()
//! };
//! let mut buffer_inputs = [0u8; 8];
//! let mut buffer_outputs = [0u8; 4];
//!
//! let remoteio_handle = dp_master.add(dp::Slave::new(
//!     remoteio_address, remoteio_desc, &mut buffer_inputs, &mut buffer_outputs
//! ));
//!
//! // Set up the FDL station and parameterize it:
//! // ===========================================
//! let master_address = 2;
//! let mut fdl = fdl::FdlStation::new(
//!     fdl::ParametersBuilder::new(master_address, Baudrate::B19200)
//!         .slot_bits(300)
//!         .build_verified(&dp_master)
//! );
//!
//! // Initialize the PHY layer:
//! // =========================
//! // With the `phy-serial` feature and real hardware:
//! //     let mut phy = phy::SerialPortPhy::new("/dev/ttyS0", fdl.parameters().baudrate);
//! let mut phy = phy::DummySlavePhy::new(fdl.parameters().baudrate, remoteio_address);
//!
//! // Now let's go live:
//! // ==================
//! fdl.set_online();
//! dp_master.enter_operate();
//!
//! // Main Application Cycle
//! // ======================
//! loop {
//!     let now = profidp::time::Instant::now();
//!     let events = fdl.poll(now, &mut phy, &mut dp_master);
//!
//!     // Do something whenever the DP cycle (for all slaves) completes:
//!     if events.cycle_completed {
//!         let remoteio = dp_master.get_mut(remoteio_handle);
//!         println!("Inputs: {:?}", remoteio.pi_i());
//!
//!         // Set some output bits
//!         let pi_q = remoteio.pi_q_mut();
//!         pi_q[0] = 0x80;
//!     }
//! }
//! ```
#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod consts;
#[cfg(feature = "std")]
pub mod conf;
pub mod dp;
pub mod fdl;
#[cfg(feature = "std")]
pub mod gsd;
pub mod phy;
pub mod time;

#[cfg(all(test, feature = "std"))]
pub mod test_utils;

/// Baudrate for fieldbus communication
///
/// PROFIBUS DP networks can run at any of the available baudrates given that all stations
/// support the selected speed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Baudrate {
    /// 9.6 kbit/s
    B9600,
    /// 19.2 kbit/s
    B19200,
    /// 31.25 kbit/s
    B31250,
    /// 45.45 kbit/s
    B45450,
    /// 93.75 kbit/s
    B93750,
    /// 187.5 kbit/s
    B187500,
    /// 500 kbit/s
    B500000,
    /// 1.5 Mbit/s
    B1500000,
    /// 3 Mbit/s
    B3000000,
    /// 6 Mbit/s
    B6000000,
    /// 12 Mbit/s
    B12000000,
}

impl Baudrate {
    /// Convert baudrate into its numeric value in bit/s.
    pub fn to_rate(self) -> u64 {
        match self {
            Baudrate::B9600 => 9600,
            Baudrate::B19200 => 19200,
            Baudrate::B31250 => 31250,
            Baudrate::B45450 => 45450,
            Baudrate::B93750 => 93750,
            Baudrate::B187500 => 187500,
            Baudrate::B500000 => 500000,
            Baudrate::B1500000 => 1500000,
            Baudrate::B3000000 => 3000000,
            Baudrate::B6000000 => 6000000,
            Baudrate::B12000000 => 12000000,
        }
    }

    /// Look up the baudrate matching a numeric bit/s value.
    pub fn from_rate(rate: u64) -> Option<Self> {
        match rate {
            9600 => Some(Baudrate::B9600),
            19200 => Some(Baudrate::B19200),
            31250 => Some(Baudrate::B31250),
            45450 => Some(Baudrate::B45450),
            93750 => Some(Baudrate::B93750),
            187500 => Some(Baudrate::B187500),
            500000 => Some(Baudrate::B500000),
            1500000 => Some(Baudrate::B1500000),
            3000000 => Some(Baudrate::B3000000),
            6000000 => Some(Baudrate::B6000000),
            12000000 => Some(Baudrate::B12000000),
            _ => None,
        }
    }

    /// At this baudrate, return how long a given number of bits take to transmit.
    pub fn bits_to_time(self, bits: u32) -> crate::time::Duration {
        crate::time::Duration::from_micros(u64::from(bits) * 1000000 / self.to_rate())
    }

    /// At this baudrate, return how many bits could be transmitted in the given time.
    pub fn time_to_bits(self, time: crate::time::Duration) -> u64 {
        time.total_micros() * self.to_rate() / 1000000
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn baudrate_time_conversions() {
        let all_bauds = &[
            crate::Baudrate::B9600,
            crate::Baudrate::B19200,
            crate::Baudrate::B31250,
            crate::Baudrate::B45450,
            crate::Baudrate::B93750,
            crate::Baudrate::B187500,
            crate::Baudrate::B500000,
            crate::Baudrate::B1500000,
            crate::Baudrate::B3000000,
            crate::Baudrate::B6000000,
            crate::Baudrate::B12000000,
        ];
        let test_values = &[0, 1, 10, 100, 2000, 65536, u32::MAX];

        for baud in all_bauds.iter().copied() {
            for bits in test_values.iter().copied() {
                let time = baud.bits_to_time(bits);
                let micros = time.total_micros();
                let bits2 = baud.time_to_bits(time);

                let max_difference = match baud {
                    crate::Baudrate::B9600 => 1,
                    crate::Baudrate::B19200 => 1,
                    crate::Baudrate::B31250 => 1,
                    crate::Baudrate::B45450 => 1,
                    crate::Baudrate::B93750 => 1,
                    crate::Baudrate::B187500 => 1,
                    crate::Baudrate::B500000 => 1,
                    crate::Baudrate::B1500000 => 1,
                    crate::Baudrate::B3000000 => 2,
                    crate::Baudrate::B6000000 => 4,
                    crate::Baudrate::B12000000 => 10,
                };
                assert!(
                    u64::from(bits) - bits2 <= max_difference,
                    "{bits} (={micros}us) was converted to {bits2} (at {baud:?})"
                );
            }
        }

        for baud in all_bauds.iter().copied() {
            assert_eq!(crate::Baudrate::from_rate(baud.to_rate()), Some(baud));
        }
        assert_eq!(crate::Baudrate::from_rate(115200), None);
    }
}
