//! The per-slave bring-up and data exchange machinery

/// Immutable configuration of one DP slave
///
/// The parameterization and configuration blocks are usually derived from the
/// slave's device description, see the [`gsd`][`crate::gsd`] module.
#[derive(Debug, PartialEq, Eq)]
pub struct SlaveDesc<'a> {
    /// Ident number from the device description
    pub ident_number: u16,

    /// Request sync-mode operation during parameterization
    pub sync_mode: bool,
    /// Request freeze-mode operation during parameterization
    pub freeze_mode: bool,
    /// Group ident mask for Global_Control addressing
    pub groups: u8,
    /// Watchdog timeout the slave applies to master polls (`None` disables it)
    pub watchdog: Option<crate::time::Duration>,
    /// Largest response delay of this slave, in bits
    pub max_tsdr: u16,
    /// The slave supports fail-safe operation
    pub fail_safe: bool,

    /// Read diagnostics every this many successful data exchange rounds.
    ///
    /// Zero means diagnostics are only read when the slave asks for it with
    /// the high priority response status.
    pub diag_period: u16,

    /// Cooldown before a faulted slave is reinitialized
    pub fault_cooldown: crate::time::Duration,

    /// Display name for log messages
    pub name: Option<&'a str>,

    /// User parameterization bytes (Set_Prm), at most 237 bytes
    pub user_prm_data: Option<&'a [u8]>,
    /// Configuration bytes (Chk_Cfg), at most 244 bytes
    pub config: Option<&'a [u8]>,

    /// Typed views into the input process image
    pub input_signals: &'a [crate::dp::Signal],
    /// Typed views into the output process image
    pub output_signals: &'a [crate::dp::Signal],
}

impl Default for SlaveDesc<'_> {
    fn default() -> Self {
        Self {
            ident_number: 0,
            sync_mode: false,
            freeze_mode: false,
            groups: 0,
            watchdog: None,
            max_tsdr: 60,
            fail_safe: false,
            diag_period: 0,
            fault_cooldown: crate::time::Duration::from_secs(1),
            name: None,
            user_prm_data: None,
            config: None,
            input_signals: &[],
            output_signals: &[],
        }
    }
}

impl<'a> SlaveDesc<'a> {
    /// Calculate the watchdog factors for the configured watchdog timeout.
    ///
    /// Returns `None` when no watchdog was configured or the timeout is zero.  Returns
    /// `Some(Err(()))` when the given watchdog timeout is outside the supported range.
    ///
    /// The watchdog timeout will be rounded up to the nearest possible value.
    fn watchdog_factors(&self) -> Option<Result<(u8, u8), ()>> {
        self.watchdog
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
}

/// Lifecycle state of one slave, as seen by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SlaveState {
    /// Not initialized yet, no communication attempted.
    #[default]
    Offline,
    /// Probing the station with an FDL status request.
    Init,
    /// Reading the initial diagnostics.
    WaitDiag,
    /// Sending the parameterization block.
    WaitPrm,
    /// Sending the configuration block.
    WaitCfg,
    /// Reading diagnostics again to confirm the configuration was accepted.
    WaitDiag2,
    /// Cyclic data exchange.
    DataExchange,
    /// Reading diagnostics between data exchange rounds.
    DiagExchange,
    /// Communication failed, waiting for the cooldown before reinitializing.
    Fault,
}

impl SlaveState {
    /// Whether the slave is between its first probe and readiness.
    #[inline]
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            SlaveState::Init
                | SlaveState::WaitDiag
                | SlaveState::WaitPrm
                | SlaveState::WaitCfg
                | SlaveState::WaitDiag2
        )
    }

    /// Whether the slave is exchanging cyclic data.
    #[inline]
    pub fn is_connected(self) -> bool {
        matches!(self, SlaveState::DataExchange | SlaveState::DiagExchange)
    }
}

/// One DP slave and its runtime state
pub struct Slave<'a> {
    /// Station address of this slave
    address: u8,
    /// Immutable configuration
    desc: SlaveDesc<'a>,

    /// Current lifecycle state
    state: SlaveState,
    /// FCB/FCV tracking for this slave
    fcb: crate::fdl::FrameCountBit,
    /// Process image of inputs
    pi_i: &'a mut [u8],
    /// Process image of outputs
    pi_q: &'a mut [u8],

    /// Latest standard diagnostics received from the slave
    diag: Option<crate::dp::SlaveDiagnostics>,
    /// Latest extended diagnostics (only collected when a buffer is attached)
    ext_diag: crate::dp::ExtendedDiagnostics<'a>,

    /// Successful data exchange rounds since the last diagnostics cycle
    rounds_since_diag: u16,
    /// The slave flagged pending diagnostics in a data exchange response
    high_prio_diag: bool,
    /// Consecutive hard faults without a successful recovery
    faults_in_a_row: u8,
    /// Time of entering the `Fault` state
    fault_since: Option<crate::time::Instant>,
    /// Reason for the most recent fault
    last_fault: Option<crate::dp::DpError>,
    /// Fault debouncing tripped, the slave is permanently disabled
    halted: bool,
}

impl<'a> Slave<'a> {
    pub fn new(
        address: u8,
        desc: SlaveDesc<'a>,
        pi_i: &'a mut [u8],
        pi_q: &'a mut [u8],
    ) -> Self {
        assert!(address <= crate::consts::MAX_STATION_ADDRESS);
        assert!(desc.user_prm_data.map(|p| p.len() <= 237).unwrap_or(true));
        assert!(desc.config.map(|c| c.len() <= 244).unwrap_or(true));
        assert!(pi_i.len() <= 244 && pi_q.len() <= 244);

        Self {
            address,
            desc,
            state: SlaveState::Offline,
            fcb: Default::default(),
            pi_i,
            pi_q,
            diag: None,
            ext_diag: Default::default(),
            rounds_since_diag: 0,
            high_prio_diag: false,
            faults_in_a_row: 0,
            fault_since: None,
            last_fault: None,
            halted: false,
        }
    }

    /// Attach a buffer for collecting extended diagnostics.
    ///
    /// Without a buffer, extended diagnostics bytes are ignored.
    pub fn with_ext_diag_buffer(mut self, buffer: &'a mut [u8]) -> Self {
        self.ext_diag = crate::dp::ExtendedDiagnostics::from_buffer(buffer);
        self
    }

    /// Address of this slave.
    #[inline(always)]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The immutable configuration of this slave.
    #[inline(always)]
    pub fn desc(&self) -> &SlaveDesc<'a> {
        &self.desc
    }

    /// Current lifecycle state.
    #[inline(always)]
    pub fn state(&self) -> SlaveState {
        self.state
    }

    /// Whether this slave is currently being brought up.
    #[inline(always)]
    pub fn is_connecting(&self) -> bool {
        self.state.is_connecting()
    }

    /// Whether this slave is exchanging cyclic data with us.
    #[inline(always)]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Whether the fault debouncer has permanently disabled this slave.
    #[inline(always)]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Number of consecutive hard faults.
    #[inline(always)]
    pub fn faults_in_a_row(&self) -> u8 {
        self.faults_in_a_row
    }

    /// Reason for the most recent fault, if any.
    #[inline]
    pub fn last_fault(&self) -> Option<&crate::dp::DpError> {
        self.last_fault.as_ref()
    }

    /// Access to the full process image of inputs.
    ///
    /// Input bytes are replaced atomically when a data exchange response
    /// arrives; a reader never observes a partially updated image.
    #[inline(always)]
    pub fn pi_i(&self) -> &[u8] {
        &self.pi_i
    }

    /// Access to the full process image of outputs.
    #[inline(always)]
    pub fn pi_q(&self) -> &[u8] {
        &self.pi_q
    }

    /// Mutable access to the full process image of outputs.
    ///
    /// The output bytes are copied into the request telegram when the next
    /// data exchange is built, so writes here never tear an ongoing cycle.
    #[inline(always)]
    pub fn pi_q_mut(&mut self) -> &mut [u8] {
        &mut self.pi_q
    }

    /// Access to the process images of inputs (immutable) and outputs (mutable).
    pub fn pi_both(&mut self) -> (&[u8], &mut [u8]) {
        (&self.pi_i, &mut self.pi_q)
    }

    /// Read one input signal using the descriptor's signal map.
    pub fn read_input(
        &self,
        signal: crate::dp::Signal,
    ) -> Result<crate::dp::SignalValue, crate::dp::DpError> {
        signal.unpack(&self.pi_i)
    }

    /// Write one output signal using the descriptor's signal map.
    pub fn write_output(
        &mut self,
        signal: crate::dp::Signal,
        value: crate::dp::SignalValue,
    ) -> Result<(), crate::dp::DpError> {
        signal.pack(value, &mut self.pi_q)
    }

    /// Get the last diagnostics information received from this slave.
    #[inline]
    pub fn last_diagnostics(&self) -> Option<&crate::dp::SlaveDiagnostics> {
        self.diag.as_ref()
    }

    /// Access the latest extended diagnostics of this slave.
    #[inline]
    pub fn extended_diagnostics(&self) -> &crate::dp::ExtendedDiagnostics<'a> {
        &self.ext_diag
    }

    /// Whether the slave confirmed its watchdog to be armed.
    #[inline]
    pub fn watchdog_acknowledged(&self) -> bool {
        self.diag
            .as_ref()
            .map(|d| {
                d.flags
                    .contains(crate::dp::DiagnosticFlags::WATCHDOG_ON)
            })
            .unwrap_or(false)
    }

    fn display_name(&self) -> &str {
        self.desc.name.unwrap_or("")
    }

    fn enter_state(&mut self, state: SlaveState) {
        log::debug!(
            "Slave #{} {}: {:?} => {:?}",
            self.address,
            self.display_name(),
            self.state,
            state
        );
        self.state = state;
    }

    fn enter_fault(&mut self, now: crate::time::Instant, error: crate::dp::DpError) {
        log::warn!(
            "Slave #{} {} faulted: {}",
            self.address,
            self.display_name(),
            error
        );
        self.last_fault = Some(error);
        self.fault_since = Some(now);
        self.faults_in_a_row = self.faults_in_a_row.saturating_add(1);
        self.high_prio_diag = false;
        self.enter_state(SlaveState::Fault);
    }

    /// Permanently disable this slave (fault debouncing tripped).
    pub(crate) fn halt(&mut self) {
        log::error!(
            "Slave #{} {}: giving up after {} consecutive faults",
            self.address,
            self.display_name(),
            self.faults_in_a_row
        );
        self.halted = true;
    }

    /// Reset all runtime state, e.g. for master shutdown.
    pub(crate) fn reset_to_offline(&mut self) {
        self.enter_state(SlaveState::Offline);
        self.fcb.reset();
        self.diag = None;
        self.rounds_since_diag = 0;
        self.high_prio_diag = false;
        self.faults_in_a_row = 0;
        self.fault_since = None;
        self.halted = false;
    }
}

impl<'a> Slave<'a> {
    pub(crate) fn transmit_telegram<'b>(
        &mut self,
        now: crate::time::Instant,
        dp: &crate::dp::DpMasterState,
        p: &crate::fdl::Parameters,
        tx: crate::fdl::TelegramTx<'b>,
    ) -> Result<crate::fdl::TelegramTxResponse, crate::fdl::TelegramTx<'b>> {
        // We never expect to be called in the `Stop` operating state.
        debug_assert!(dp.operating_state.is_operate() || dp.operating_state.is_clear());

        if self.halted {
            return Err(tx);
        }

        match self.state {
            SlaveState::Offline => {
                self.enter_state(SlaveState::Init);
            }
            SlaveState::Fault => {
                let since = *self.fault_since.get_or_insert(now);
                if now - since < self.desc.fault_cooldown {
                    return Err(tx);
                }
                log::info!(
                    "Slave #{} {}: reinitializing after fault cooldown",
                    self.address,
                    self.display_name()
                );
                self.fcb.reset();
                self.enter_state(SlaveState::Init);
            }
            SlaveState::DataExchange => {
                if self.high_prio_diag
                    || (self.desc.diag_period > 0
                        && self.rounds_since_diag >= self.desc.diag_period)
                {
                    self.enter_state(SlaveState::DiagExchange);
                }
            }
            _ => (),
        }

        match self.state {
            SlaveState::Init => Ok(tx.send_fdl_status_request(self.address, p.address)),
            SlaveState::WaitDiag | SlaveState::WaitDiag2 | SlaveState::DiagExchange => {
                Ok(self.send_diagnostics_request(p, tx))
            }
            SlaveState::WaitPrm => {
                if let Some(user_parameters) = self.desc.user_prm_data {
                    // Send parameters
                    Ok(tx.send_data_telegram(
                        crate::fdl::DataTelegramHeader {
                            da: self.address,
                            sa: p.address,
                            dsap: Some(crate::consts::SAP_SET_PRM),
                            ssap: Some(crate::consts::SAP_MASTER_MS0),
                            fc: crate::fdl::FunctionCode::new_srd_low(self.fcb),
                        },
                        7 + user_parameters.len(),
                        |buf| {
                            // Construct Station Status Byte
                            buf[0] |= 0x80; // Lock_Req
                            if self.desc.sync_mode {
                                buf[0] |= 0x20; // Sync_Req
                            }
                            if self.desc.freeze_mode {
                                buf[0] |= 0x10; // Freeze_Req
                            }
                            if let Some((f1, f2)) =
                                self.desc.watchdog_factors().transpose().unwrap()
                            {
                                buf[0] |= 0x08; // WD_On
                                buf[1] = f1;
                                buf[2] = f2;
                            }
                            // Minimum T_sdr
                            buf[3] = 11;
                            // Ident
                            buf[4..6].copy_from_slice(&self.desc.ident_number.to_be_bytes());
                            // Groups
                            buf[6] = self.desc.groups;
                            // User Prm Data
                            buf[7..].copy_from_slice(user_parameters);
                        },
                    ))
                } else {
                    // When no parameterization block is known yet, we need to wait before we can
                    // continue with the bring-up.
                    Err(tx)
                }
            }
            SlaveState::WaitCfg => {
                if let Some(config) = self.desc.config {
                    Ok(tx.send_data_telegram(
                        crate::fdl::DataTelegramHeader {
                            da: self.address,
                            sa: p.address,
                            dsap: Some(crate::consts::SAP_CHK_CFG),
                            ssap: Some(crate::consts::SAP_MASTER_MS0),
                            fc: crate::fdl::FunctionCode::new_srd_low(self.fcb),
                        },
                        config.len(),
                        |buf| {
                            buf.copy_from_slice(config);
                        },
                    ))
                } else {
                    Err(tx)
                }
            }
            SlaveState::DataExchange => Ok(tx.send_data_telegram(
                crate::fdl::DataTelegramHeader {
                    da: self.address,
                    sa: p.address,
                    dsap: None,
                    ssap: None,
                    fc: crate::fdl::FunctionCode::new_srd_high(self.fcb),
                },
                self.pi_q.len(),
                |buf| {
                    // Only write the output process image in `Operate` state.  In `Clear`
                    // state, we leave the outputs all zeros.
                    if dp.operating_state.is_operate() {
                        buf.copy_from_slice(&self.pi_q);
                    }
                },
            )),
            SlaveState::Offline | SlaveState::Fault => unreachable!(),
        }
    }

    pub(crate) fn receive_reply(
        &mut self,
        now: crate::time::Instant,
        _dp: &crate::dp::DpMasterState,
        _p: &crate::fdl::Parameters,
        telegram: crate::fdl::Telegram,
    ) {
        match self.state {
            SlaveState::Offline | SlaveState::Fault => {
                log::warn!("Unexpected reply for inactive slave #{}", self.address);
            }
            SlaveState::Init => {
                let crate::fdl::Telegram::Data(t) = &telegram else {
                    log::warn!("Unexpected FDL status reply from #{}: {telegram:?}", self.address);
                    return;
                };
                match t.is_response() {
                    Some((crate::fdl::ResponseState::Slave, _)) => {
                        log::debug!("Slave #{} is responding.", self.address);
                        self.fcb.reset();
                        self.enter_state(SlaveState::WaitDiag);
                    }
                    Some((state, _)) => {
                        self.enter_fault(now, crate::dp::DpError::NotASlave(state));
                    }
                    None => {
                        log::warn!("Non-response FDL status reply from #{}: {t:?}", self.address);
                    }
                }
            }
            SlaveState::WaitDiag => {
                let Some(flags) = self.handle_diagnostics_response(&telegram).map(|d| d.flags)
                else {
                    return;
                };
                if flags.contains(crate::dp::DiagnosticFlags::STATION_NON_EXISTENT) {
                    self.enter_fault(now, crate::dp::DpError::StationNonExistent);
                } else {
                    self.enter_state(SlaveState::WaitPrm);
                }
            }
            SlaveState::WaitPrm => {
                if is_short_ack(&telegram) {
                    log::debug!("Sent parameters to #{}.", self.address);
                    self.fcb.cycle();
                    self.enter_state(SlaveState::WaitCfg);
                } else {
                    log::warn!("Set_Prm reply from #{} is no ack: {telegram:?}", self.address);
                    self.enter_fault(now, crate::dp::DpError::PrmRejected);
                }
            }
            SlaveState::WaitCfg => {
                if is_short_ack(&telegram) {
                    log::debug!("Sent configuration to #{}.", self.address);
                    self.fcb.cycle();
                    self.enter_state(SlaveState::WaitDiag2);
                } else {
                    log::warn!("Chk_Cfg reply from #{} is no ack: {telegram:?}", self.address);
                    self.enter_fault(now, crate::dp::DpError::CfgRejected);
                }
            }
            SlaveState::WaitDiag2 => {
                let address = self.address;
                let Some(flags) = self.handle_diagnostics_response(&telegram).map(|d| d.flags)
                else {
                    return;
                };
                if flags.contains(crate::dp::DiagnosticFlags::CONFIGURATION_FAULT) {
                    self.enter_fault(now, crate::dp::DpError::ConfigurationFault);
                } else if flags.contains(crate::dp::DiagnosticFlags::PARAMETER_FAULT) {
                    self.enter_fault(now, crate::dp::DpError::ParameterFault);
                } else if flags.contains(crate::dp::DiagnosticFlags::PARAMETER_REQUIRED) {
                    log::warn!("Slave #{address} wants parameters after completing setup, retrying");
                    self.enter_state(SlaveState::WaitPrm);
                } else if !flags.contains(crate::dp::DiagnosticFlags::STATION_NOT_READY) {
                    log::info!("Slave #{address} becomes ready for data exchange.");
                    self.rounds_since_diag = 0;
                    self.faults_in_a_row = 0;
                    self.enter_state(SlaveState::DataExchange);
                } else {
                    // Not ready yet, request diagnostics again on the next cycle.
                    log::debug!("Slave #{address} is not ready yet.");
                }
            }
            SlaveState::DataExchange => match &telegram {
                crate::fdl::Telegram::Data(t) => {
                    let Some((_, status)) = t.is_response() else {
                        log::warn!("Non-response data exchange reply from #{}", self.address);
                        return;
                    };
                    if !status.is_data() && status != crate::fdl::ResponseStatus::Ok {
                        log::warn!(
                            "Unexpected data exchange status from #{}: {status:?}",
                            self.address
                        );
                        return;
                    }
                    if t.pdu.len() == self.pi_i.len() {
                        self.pi_i.copy_from_slice(t.pdu);
                    } else {
                        log::warn!(
                            "Data exchange response with unexpected length {} from #{} (expected {})",
                            t.pdu.len(),
                            self.address,
                            self.pi_i.len()
                        );
                    }
                    self.fcb.cycle();
                    self.rounds_since_diag = self.rounds_since_diag.saturating_add(1);
                    self.faults_in_a_row = 0;
                    if status.is_high_priority() {
                        log::debug!("Slave #{} has pending diagnostics.", self.address);
                        self.high_prio_diag = true;
                    }
                }
                crate::fdl::Telegram::ShortConfirmation(_) => {
                    // Slaves without input data may acknowledge with an SC.
                    self.fcb.cycle();
                    self.rounds_since_diag = self.rounds_since_diag.saturating_add(1);
                    self.faults_in_a_row = 0;
                }
                t => {
                    log::warn!("Unexpected data exchange reply from #{}: {t:?}", self.address);
                }
            },
            SlaveState::DiagExchange => {
                if self.handle_diagnostics_response(&telegram).is_some() {
                    self.high_prio_diag = false;
                    self.rounds_since_diag = 0;
                    let flags = self.diag.as_ref().unwrap().flags;
                    if flags.contains(crate::dp::DiagnosticFlags::CONFIGURATION_FAULT) {
                        self.enter_fault(now, crate::dp::DpError::ConfigurationFault);
                    } else if flags.needs_parameterization() {
                        log::warn!(
                            "Slave #{} requests reparameterization during operation",
                            self.address
                        );
                        self.enter_state(SlaveState::WaitPrm);
                    } else {
                        self.enter_state(SlaveState::DataExchange);
                    }
                }
            }
        }
    }

    /// The peer did not answer within the slot time, all repetitions failed.
    pub(crate) fn handle_timeout(&mut self, now: crate::time::Instant) {
        self.enter_fault(now, crate::dp::DpError::Timeout);
    }

    /// The FDL layer failed the message cycle with a non-retried error.
    pub(crate) fn handle_fdl_error(
        &mut self,
        now: crate::time::Instant,
        error: crate::fdl::FdlError,
    ) {
        match (self.state, error) {
            (SlaveState::DataExchange, crate::fdl::FdlError::NoResources) => {
                // The slave left data exchange on its own, most likely because its watchdog
                // expired.  Reinitialize starting from the diagnosis.
                log::warn!(
                    "Slave #{} dropped out of data exchange (watchdog expired?)",
                    self.address
                );
                self.last_fault = Some(crate::dp::DpError::WatchdogExpired);
                self.fcb.reset();
                self.high_prio_diag = false;
                self.enter_state(SlaveState::WaitDiag);
            }
            (_, error) => {
                self.enter_fault(now, crate::dp::DpError::Fdl(error));
            }
        }
    }

    fn send_diagnostics_request<'b>(
        &mut self,
        p: &crate::fdl::Parameters,
        tx: crate::fdl::TelegramTx<'b>,
    ) -> crate::fdl::TelegramTxResponse {
        tx.send_data_telegram(
            crate::fdl::DataTelegramHeader {
                da: self.address,
                sa: p.address,
                dsap: Some(crate::consts::SAP_SLAVE_DIAGNOSIS),
                ssap: Some(crate::consts::SAP_MASTER_MS0),
                fc: crate::fdl::FunctionCode::new_srd_low(self.fcb),
            },
            0,
            |_buf| (),
        )
    }

    fn handle_diagnostics_response(
        &mut self,
        telegram: &crate::fdl::Telegram,
    ) -> Option<&crate::dp::SlaveDiagnostics> {
        let crate::fdl::Telegram::Data(t) = telegram else {
            log::warn!("Unexpected diagnostics reply from #{}: {telegram:?}", self.address);
            return None;
        };
        if t.h.dsap != Some(crate::consts::SAP_MASTER_MS0) {
            log::warn!("Diagnostics response by #{} to wrong SAP: {t:?}", self.address);
            return None;
        }
        if t.h.ssap != Some(crate::consts::SAP_SLAVE_DIAGNOSIS) {
            log::warn!("Diagnostics response by #{} from wrong SAP: {t:?}", self.address);
            return None;
        }

        let diag = match crate::dp::SlaveDiagnostics::parse(t.pdu) {
            Ok(diag) => diag,
            Err(e) => {
                log::warn!("Bad diagnostics response by #{}: {e}", self.address);
                return None;
            }
        };

        if diag.ident_number != self.desc.ident_number {
            log::warn!(
                "Slave #{} reports ident 0x{:04X}, expected 0x{:04X}",
                self.address,
                diag.ident_number,
                self.desc.ident_number
            );
        }

        self.ext_diag.fill(&t.pdu[6..]);

        log::debug!("Slave diagnostics (#{}): {:?}", self.address, diag);

        self.fcb.cycle();

        self.diag = Some(diag);
        self.diag.as_ref()
    }
}

/// Whether the telegram is a positive acknowledgment without data.
fn is_short_ack(telegram: &crate::fdl::Telegram) -> bool {
    match telegram {
        crate::fdl::Telegram::ShortConfirmation(_) => true,
        crate::fdl::Telegram::Data(t) => {
            matches!(
                t.is_response(),
                Some((_, crate::fdl::ResponseStatus::Ok))
            ) && t.pdu.is_empty()
        }
        _ => false,
    }
}
