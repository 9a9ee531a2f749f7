/// FDL station parameters
///
/// These parameters configure the timing behavior of the FDL station.
///
/// You should use the [`ParametersBuilder`] to build the parameters struct.
/// Check its documentation for detailed explanations of the individual
/// parameters.
///
/// # Example
/// ```
/// use profidp::fdl;
/// # let dp_master = profidp::dp::DpMaster::new(Vec::new());
///
/// let master_address = 2;
/// let param = fdl::ParametersBuilder::new(master_address, profidp::Baudrate::B19200)
///     .slot_bits(300)
///     .build_verified(&dp_master);
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct Parameters {
    /// Station address for this master
    pub address: u8,
    /// Baudrate
    pub baudrate: crate::Baudrate,
    /// T<sub>SL</sub>: Slot time in bits
    pub slot_bits: u16,
    /// min T<sub>SDR</sub>: Minimum delay before anyone is allowed to respond to a telegram
    pub min_tsdr_bits: u8,
    /// max T<sub>SDR</sub>: Time after which a responder is declared silent
    pub max_tsdr_bits: u16,
    /// T<sub>QUI</sub>: Quiet time after a transmission before the line is considered settled
    pub quiet_bits: u8,
    /// T<sub>SET</sub>: Line setup time
    pub setup_bits: u8,
    /// Maximum number of request repetitions when no answer was received
    pub max_retry_limit: u8,
    /// Back-off before repeating a request that was answered with "no resources", in bits
    pub no_resource_backoff_bits: u16,
    /// Watchdog timeout for slaves monitoring this master
    pub watchdog_factors: Option<(u8, u8)>,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            address: 1,
            baudrate: crate::Baudrate::B19200,
            // Tied to the baudrate - will usually be adjusted by the ParametersBuilder.
            slot_bits: 100,
            // Defaults to 1 byte time (= 11 bits)
            min_tsdr_bits: 11,
            // Conservative default, valid for all baudrates up to 187.5 kbit/s.
            max_tsdr_bits: 60,
            quiet_bits: 0,
            setup_bits: 1,
            // Retry limit defaults to 1, meaning that a telegram will be retried once.  This is a
            // sane default as retries should not be necessary at all on a bus that is set up
            // correctly.
            max_retry_limit: 1,
            no_resource_backoff_bits: 100,
            // No watchdog by default.
            watchdog_factors: None,
        }
    }
}

#[inline]
fn min_slot_bits(baudrate: crate::Baudrate) -> u16 {
    match baudrate {
        crate::Baudrate::B9600
        | crate::Baudrate::B19200
        | crate::Baudrate::B31250
        | crate::Baudrate::B45450
        | crate::Baudrate::B93750
        | crate::Baudrate::B187500 => 100,
        crate::Baudrate::B500000 => 200,
        crate::Baudrate::B1500000 => 300,
        crate::Baudrate::B3000000 => 400,
        crate::Baudrate::B6000000 => 600,
        crate::Baudrate::B12000000 => 1000,
    }
}

#[inline]
fn watchdog_factors(dur: crate::time::Duration) -> Option<Result<(u8, u8), ()>> {
    Some(dur)
        .filter(|dur| *dur != crate::time::Duration::ZERO)
        .map(|dur| {
            let timeout_10ms: u32 = (dur.total_millis() / 10).try_into().or(Err(()))?;

            for f1 in 1..256 {
                let f2 = (timeout_10ms + f1 - 1) / f1;

                if f2 < 256 {
                    return Ok((u8::try_from(f1).unwrap(), u8::try_from(f2).unwrap()));
                }
            }

            // Timeout is still too big
            Err(())
        })
}

/// Builder for the parameters of an FDL station
pub struct ParametersBuilder(Parameters);

impl ParametersBuilder {
    /// Start building parameters for an FDL station with the given `address`.
    ///
    /// - `address` must be a valid PROFIBUS address (<= 125).
    /// - `baudrate` is the baudrate that is used for this PROFIBUS network.
    #[inline]
    pub fn new(address: u8, baudrate: crate::Baudrate) -> Self {
        assert!(address <= crate::consts::MAX_STATION_ADDRESS);
        Self(Parameters {
            address,
            baudrate,
            slot_bits: min_slot_bits(baudrate),
            ..Default::default()
        })
    }

    /// Configure non-standard T<sub>SL</sub> (slot time in bits)
    ///
    /// The slot time must be larger than the maximum T<sub>SDR</sub> of all slaves.
    /// `build_verified()` will check that this is the case.
    ///
    /// The slot time must be greater than the default slot time:
    ///
    /// | Baudrate | Minimum Slot Time (in Bits) |
    /// | ---: | ---: |
    /// | <=187500 | 100 |
    /// | 500000 | 200 |
    /// | 1500000 | 300 |
    /// | 3000000 | 400 |
    /// | 6000000 | 600 |
    /// | 12000000 | 1000 |
    #[inline]
    pub fn slot_bits(&mut self, slot_bits: u16) -> &mut Self {
        assert!(slot_bits >= min_slot_bits(self.0.baudrate));
        self.0.slot_bits = slot_bits;
        self
    }

    /// Set the maximum number of retries when communication with a slave fails.
    ///
    /// After this amount of retries, the request is failed and the slave will need to be
    /// reinitialized once it appears again.
    ///
    /// On a bus that is electrically sound, no retries should ever be necessary.  When you have to
    /// increase the retry count to keep your bus working, it is recommended to check for
    /// electrical and/or noise problems.
    ///
    /// Default value is 1, meaning a telegram is repeated once when no response was received.
    #[inline]
    pub fn max_retry_limit(&mut self, max_retry_limit: u8) -> &mut Self {
        assert!(max_retry_limit >= 1 && max_retry_limit <= 15);
        self.0.max_retry_limit = max_retry_limit;
        self
    }

    /// Set the minimum response time that slaves should adhere to.
    ///
    /// This value can be increased when slaves responding after 11 bits is too fast for the
    /// bus to settle.
    #[inline]
    pub fn min_tsdr(&mut self, min_tsdr_bits: u8) -> &mut Self {
        assert!(min_tsdr_bits >= 11);
        self.0.min_tsdr_bits = min_tsdr_bits;
        self
    }

    /// Set the maximum station delay of responders on this bus.
    ///
    /// This is the largest `max_tsdr` value (in bits) of all configured slaves, usually taken
    /// from their device descriptions.
    #[inline]
    pub fn max_tsdr(&mut self, max_tsdr_bits: u16) -> &mut Self {
        assert!(max_tsdr_bits >= 11);
        self.0.max_tsdr_bits = max_tsdr_bits;
        self
    }

    /// Set the quiet time (T<sub>QUI</sub>) of this bus, in bits.
    ///
    /// Only relevant for line drivers with long turnaround times (e.g. optical links).
    #[inline]
    pub fn quiet_bits(&mut self, quiet_bits: u8) -> &mut Self {
        self.0.quiet_bits = quiet_bits;
        self
    }

    /// Set the watchdog timeout that slaves should use to fail-safe after losing
    /// communication.
    ///
    /// The timeout is rounded up to the nearest representable factor pair.
    #[inline]
    pub fn watchdog_timeout(&mut self, wdg: crate::time::Duration) -> &mut Self {
        assert!(wdg >= crate::time::Duration::from_millis(10));
        assert!(wdg <= crate::time::Duration::from_secs(650));
        self.0.watchdog_factors = watchdog_factors(wdg).transpose().unwrap();
        self
    }

    /// Build the parameters struct.
    #[inline]
    pub fn build(&self) -> Parameters {
        self.0.clone()
    }

    /// Build the parameters struct and verify it against the given DP master.
    ///
    /// This ensures that the selected T<sub>SL</sub> is greater than the max T<sub>SDR</sub> of
    /// all slaves currently tracked by the DP master.
    #[inline]
    pub fn build_verified(&self, dp_master: &crate::dp::DpMaster) -> Parameters {
        for (_, slave) in dp_master.iter() {
            assert!(
                slave.desc().max_tsdr + 15 <= self.0.slot_bits,
                "max Tsdr of slave #{} too large for slot time",
                slave.address(),
            );
        }
        self.0.clone()
    }
}

impl Parameters {
    pub fn bits_to_time(&self, bits: u32) -> crate::time::Duration {
        self.baudrate.bits_to_time(bits)
    }

    /// T<sub>SL</sub> (slot time) converted to duration
    pub fn slot_time(&self) -> crate::time::Duration {
        self.bits_to_time(u32::from(self.slot_bits))
    }

    /// min T<sub>SDR</sub> (minimum time before responding) converted to duration
    pub fn min_tsdr_time(&self) -> crate::time::Duration {
        self.bits_to_time(u32::from(self.min_tsdr_bits))
    }

    /// max T<sub>SDR</sub> (time after which a responder counts as silent) converted to duration
    pub fn max_tsdr_time(&self) -> crate::time::Duration {
        self.bits_to_time(u32::from(self.max_tsdr_bits))
    }

    /// T<sub>SYN</sub>: 33 bit times of line idle required before a new transmission
    pub fn synchronization_time(&self) -> crate::time::Duration {
        self.bits_to_time(33)
    }

    /// T<sub>QUI</sub> (quiet time) converted to duration
    pub fn quiet_time(&self) -> crate::time::Duration {
        self.bits_to_time(u32::from(self.quiet_bits))
    }

    /// Timeout after which a partially received telegram is dropped.
    ///
    /// Calculated as T<sub>QUI</sub> + T<sub>SL</sub>.
    pub fn partial_frame_timeout(&self) -> crate::time::Duration {
        self.quiet_time() + self.slot_time()
    }

    /// Back-off before repeating a request that was rejected with "no resources".
    pub fn no_resource_backoff(&self) -> crate::time::Duration {
        self.bits_to_time(u32::from(self.no_resource_backoff_bits))
    }

    /// Watchdog timeout communicated to the slaves
    pub fn watchdog_timeout(&self) -> Option<crate::time::Duration> {
        self.watchdog_factors
            .map(|(f1, f2)| crate::time::Duration::from_millis(u64::from(f1) * u64::from(f2) * 10))
    }

    pub(crate) fn debug_assert_consistency(&self) {
        debug_assert!(self.address <= crate::consts::MAX_STATION_ADDRESS);
        debug_assert!(self.slot_bits >= min_slot_bits(self.baudrate));
        debug_assert!(self.max_retry_limit >= 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_factor_derivation() {
        for millis in [10, 100, 1000, 5000, 650_000] {
            let factors =
                watchdog_factors(crate::time::Duration::from_millis(millis)).unwrap().unwrap();
            let wdg = u64::from(factors.0) * u64::from(factors.1) * 10;
            assert!(
                wdg >= millis && wdg <= millis + millis / 10 + 20,
                "bad factors {factors:?} for {millis}ms"
            );
        }

        // Zero disables the watchdog entirely.
        assert!(watchdog_factors(crate::time::Duration::ZERO).is_none());

        // Out of range timeouts must not derive silently.
        assert!(watchdog_factors(crate::time::Duration::from_secs(10_000))
            .unwrap()
            .is_err());
    }

    #[test]
    fn derived_times_at_19200() {
        let p = ParametersBuilder::new(2, crate::Baudrate::B19200).build();
        // One bit at 19200 baud is ~52us.
        assert_eq!(p.synchronization_time().total_micros(), 1718);
        assert_eq!(p.slot_time().total_micros(), 5208);
        assert_eq!(p.partial_frame_timeout(), p.slot_time() + p.quiet_time());
    }

    #[test]
    #[should_panic]
    fn slot_time_below_minimum_is_rejected() {
        ParametersBuilder::new(2, crate::Baudrate::B1500000).slot_bits(200);
    }
}
