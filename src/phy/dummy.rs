//! Emulated-slave PHY implementation
//!
//! [`DummySlavePhy`] pretends to be a serial line with a single DP slave
//! attached to it.  Telegrams transmitted by the master are answered the way
//! a real slave would answer them, after a configurable response delay.  This
//! makes it possible to exercise the complete master stack, from telegram
//! encoding to the cyclic data exchange state machine, without any hardware.
//!
//! The emulated slave mirrors Data_Exchange output bytes bit-inverted as its
//! input data.  It also implements a slave-side watchdog: when the master
//! stops polling for longer than the parameterized watchdog timeout, the
//! slave falls back into its "wait for parameterization" state and answers
//! further Data_Exchange requests with "no resources", exactly like a real
//! device that fail-safed.
//!
//! Timing violations of the master (transmitting into the synchronization
//! pause or while the slave is still answering) panic immediately, so tests
//! catch them at the exact poll where they happen.

use crate::phy::ProfibusPhy;

/// Lifecycle of the emulated slave
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum EmulatedState {
    /// Power-on state, waiting for parameterization.
    WaitPrm,
    /// Parameterized, waiting for the configuration telegram.
    WaitCfg,
    /// Configured, cyclic data exchange is possible.
    DataExchange,
}

/// PHY implementation emulating a bus with one DP slave
#[derive(Debug)]
pub struct DummySlavePhy {
    baudrate: crate::Baudrate,
    /// Station address of the emulated slave
    address: u8,
    ident_number: u16,
    input_size: usize,
    output_size: usize,

    state: EmulatedState,
    /// Watchdog timeout received via Set_Prm
    watchdog: Option<crate::time::Duration>,
    /// Time of the last data exchange poll, for watchdog supervision
    last_data_exchange: Option<crate::time::Instant>,

    /// Do not answer any request (simulates a disconnected device).
    silent: bool,
    /// Answer the next Data_Exchange with the high priority status bit.
    diag_pending: bool,
    /// Corrupt one byte of the next response (simulates line noise).
    corrupt_next: bool,

    /// Response delay of the slave in bit times (its Tsdr)
    response_delay_bits: u32,

    /// End of the master transmission currently on the wire
    tx_end: crate::time::Instant,
    /// End of the most recent line activity (TX or slave response)
    line_idle_since: crate::time::Instant,
    /// A response currently appearing on the line
    pending: Option<PendingResponse>,
    /// Received bytes available to the master
    rx: Vec<u8>,
}

/// A slave response while it is being "transmitted" on the emulated line.
///
/// Bytes become visible to the master one by one, 11 bit times apart,
/// starting at `start`.
#[derive(Debug)]
struct PendingResponse {
    start: crate::time::Instant,
    data: Vec<u8>,
    cursor: usize,
}

impl DummySlavePhy {
    pub fn new(baudrate: crate::Baudrate, address: u8) -> Self {
        Self {
            baudrate,
            address,
            ident_number: 0xDEAD,
            input_size: 0,
            output_size: 0,
            state: EmulatedState::WaitPrm,
            watchdog: None,
            last_data_exchange: None,
            silent: false,
            diag_pending: false,
            corrupt_next: false,
            response_delay_bits: 11,
            tx_end: crate::time::Instant::ZERO,
            line_idle_since: crate::time::Instant::ZERO,
            pending: None,
            rx: Vec::new(),
        }
    }

    /// Set the ident number the emulated slave reports in its diagnostics.
    pub fn set_ident_number(&mut self, ident_number: u16) {
        self.ident_number = ident_number;
    }

    /// Set the process data sizes of the emulated slave.
    pub fn set_io_sizes(&mut self, input_size: usize, output_size: usize) {
        assert!(input_size <= 244 && output_size <= 244);
        self.input_size = input_size;
        self.output_size = output_size;
    }

    /// Set the slave's station delay (its Tsdr) in bit times.
    pub fn set_response_delay_bits(&mut self, bits: u32) {
        assert!(bits >= 11);
        self.response_delay_bits = bits;
    }

    /// Make the slave stop (or resume) answering requests.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Raise the diagnostics-pending flag of the slave.
    ///
    /// The next Data_Exchange response will carry the high priority status,
    /// asking the master to read diagnostics.
    pub fn set_diag_pending(&mut self) {
        self.diag_pending = true;
    }

    /// Corrupt one byte of the next response.
    pub fn corrupt_next_response(&mut self) {
        self.corrupt_next = true;
    }

    /// Whether the emulated slave currently considers itself in data exchange.
    pub fn is_in_data_exchange(&self) -> bool {
        self.state == EmulatedState::DataExchange
    }

    fn bit_time(&self, bits: u32) -> crate::time::Duration {
        self.baudrate.bits_to_time(bits)
    }

    /// Check the slave-side watchdog before acting on a request.
    fn supervise_watchdog(&mut self, now: crate::time::Instant) {
        if self.state != EmulatedState::DataExchange {
            return;
        }
        if let (Some(watchdog), Some(last)) = (self.watchdog, self.last_data_exchange) {
            if now - last > watchdog {
                log::debug!("Emulated slave #{}: watchdog expired", self.address);
                self.state = EmulatedState::WaitPrm;
                self.last_data_exchange = None;
            }
        }
    }

    /// Build the six byte standard diagnostics block.
    fn diag_block(&self) -> [u8; 6] {
        let mut b0 = 0x00u8;
        let mut b1 = 0x04u8; // permanent "always one" bit
        match self.state {
            EmulatedState::WaitPrm => b1 |= 0x01,   // Prm_Req
            EmulatedState::WaitCfg => b0 |= 0x02,   // Station_Not_Ready
            EmulatedState::DataExchange => (),
        }
        if self.watchdog.is_some() {
            b1 |= 0x08; // Wd_On
        }
        let ident = self.ident_number.to_be_bytes();
        [b0, b1, 0x00, 0x02, ident[0], ident[1]]
    }

    /// Compute the slave's answer for one master telegram, if any.
    fn answer(
        &mut self,
        now: crate::time::Instant,
        telegram: &crate::fdl::Telegram,
    ) -> Option<Vec<u8>> {
        use crate::fdl::{
            DataTelegram, DataTelegramHeader, FunctionCode, RequestType, ResponseState,
            ResponseStatus, ShortConfirmation, Telegram,
        };

        let t = match telegram {
            Telegram::Data(t) => t,
            _ => return None,
        };
        if t.h.da != self.address {
            return None;
        }
        let req = match t.h.fc {
            FunctionCode::Request { req, .. } => req,
            FunctionCode::Response { .. } => {
                log::warn!("Emulated slave #{} received a response?", self.address);
                return None;
            }
        };
        if !req.expects_reply() {
            return None;
        }

        self.supervise_watchdog(now);

        let mut buffer = [0u8; 256];
        let response_header = |fc: FunctionCode| DataTelegramHeader {
            da: t.h.sa,
            sa: self.address,
            dsap: t.h.ssap,
            ssap: t.h.dsap,
            fc,
        };

        let length = if req == RequestType::FdlStatus {
            let header = DataTelegramHeader {
                dsap: None,
                ssap: None,
                ..response_header(FunctionCode::Response {
                    state: ResponseState::Slave,
                    status: ResponseStatus::Ok,
                })
            };
            DataTelegram { h: header, pdu: &[] }.serialize(&mut buffer)
        } else {
            match t.h.dsap {
                Some(crate::consts::SAP_SLAVE_DIAGNOSIS) => {
                    let mut pdu = [0u8; 9];
                    pdu[..6].copy_from_slice(&self.diag_block());
                    let mut pdu_length = 6;
                    if self.diag_pending {
                        // Ext_Diag with one device-related block.
                        pdu[0] |= 0x08;
                        pdu[6..9].copy_from_slice(&[0x03, 0xAA, 0xBB]);
                        pdu_length = 9;
                    }
                    self.diag_pending = false;
                    DataTelegram {
                        h: response_header(FunctionCode::Response {
                            state: ResponseState::Slave,
                            status: ResponseStatus::DataLow,
                        }),
                        pdu: &pdu[..pdu_length],
                    }
                    .serialize(&mut buffer)
                }
                Some(crate::consts::SAP_SET_PRM) => {
                    if t.pdu.len() < 7 {
                        log::warn!("Emulated slave #{}: short Set_Prm block", self.address);
                        return None;
                    }
                    let ident = u16::from_be_bytes([t.pdu[4], t.pdu[5]]);
                    if ident != self.ident_number {
                        log::warn!(
                            "Emulated slave #{}: parameterized with foreign ident 0x{ident:04X}",
                            self.address
                        );
                    }
                    self.watchdog = if t.pdu[0] & 0x08 != 0 {
                        let millis = u64::from(t.pdu[1]) * u64::from(t.pdu[2]) * 10;
                        Some(crate::time::Duration::from_millis(millis))
                    } else {
                        None
                    };
                    self.state = EmulatedState::WaitCfg;
                    ShortConfirmation.serialize(&mut buffer)
                }
                Some(crate::consts::SAP_CHK_CFG) => {
                    if self.state == EmulatedState::WaitPrm {
                        log::warn!(
                            "Emulated slave #{}: Chk_Cfg without parameterization",
                            self.address
                        );
                        return None;
                    }
                    self.state = EmulatedState::DataExchange;
                    self.last_data_exchange = Some(now);
                    ShortConfirmation.serialize(&mut buffer)
                }
                None => {
                    // Data_Exchange on the default SAP.
                    if self.state != EmulatedState::DataExchange {
                        DataTelegram {
                            h: DataTelegramHeader {
                                dsap: None,
                                ssap: None,
                                ..response_header(FunctionCode::Response {
                                    state: ResponseState::Slave,
                                    status: ResponseStatus::NoResources,
                                })
                            },
                            pdu: &[],
                        }
                        .serialize(&mut buffer)
                    } else {
                        if t.pdu.len() != self.output_size {
                            log::warn!(
                                "Emulated slave #{}: data exchange with {} output bytes (expected {})",
                                self.address,
                                t.pdu.len(),
                                self.output_size
                            );
                        }
                        self.last_data_exchange = Some(now);
                        let mut inputs = [0u8; 244];
                        let inputs = &mut inputs[..self.input_size];
                        for (i, b) in inputs.iter_mut().enumerate() {
                            *b = if t.pdu.is_empty() { 0xFF } else { !t.pdu[i % t.pdu.len()] };
                        }
                        let status = if self.diag_pending {
                            ResponseStatus::DataHigh
                        } else {
                            ResponseStatus::DataLow
                        };
                        DataTelegram {
                            h: DataTelegramHeader {
                                dsap: None,
                                ssap: None,
                                ..response_header(FunctionCode::Response {
                                    state: ResponseState::Slave,
                                    status,
                                })
                            },
                            pdu: inputs,
                        }
                        .serialize(&mut buffer)
                    }
                }
                Some(sap) => {
                    log::debug!("Emulated slave #{}: unsupported DSAP {sap}", self.address);
                    return None;
                }
            }
        };

        let mut response = buffer[..length].to_vec();
        if self.corrupt_next {
            self.corrupt_next = false;
            if let Some(byte) = response.last_mut() {
                *byte ^= 0x01;
            }
        }
        Some(response)
    }
}

impl ProfibusPhy for DummySlavePhy {
    fn poll_transmission(&mut self, now: crate::time::Instant) -> bool {
        now < self.tx_end
    }

    fn transmit_data<F, R>(&mut self, now: crate::time::Instant, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> (usize, R),
    {
        if now < self.tx_end {
            panic!("transmit_data() while already transmitting!");
        }
        if self.pending.is_some() {
            panic!("master transmitted while the slave response was still on the wire!");
        }
        if now < self.line_idle_since + self.bit_time(33) {
            panic!(
                "master transmitted without honoring the synchronization pause ({}us since last activity)",
                (now - self.line_idle_since).total_micros()
            );
        }

        let mut buffer = [0u8; 256];
        let (length, res) = f(&mut buffer);
        if length == 0 {
            return res;
        }

        self.tx_end = now + self.bit_time(11 * u32::try_from(length).unwrap());
        self.line_idle_since = self.tx_end;

        match crate::fdl::Telegram::deserialize(&buffer[..length]) {
            Some(Ok((telegram, _))) => {
                if !self.silent {
                    if let Some(response) = self.answer(self.tx_end, &telegram) {
                        let start = self.tx_end + self.bit_time(self.response_delay_bits);
                        self.line_idle_since =
                            start + self.bit_time(11 * u32::try_from(response.len()).unwrap());
                        self.pending = Some(PendingResponse {
                            start,
                            data: response,
                            cursor: 0,
                        });
                    }
                }
            }
            other => {
                log::warn!("Master transmitted an undecodable frame: {other:?}");
            }
        }

        res
    }

    fn receive_data<F, R>(&mut self, now: crate::time::Instant, f: F) -> R
    where
        F: FnOnce(&[u8]) -> (usize, R),
    {
        if now < self.tx_end {
            panic!("receive_data() while transmitting!");
        }

        // Response bytes become visible one by one as line time passes.
        if let Some(pending) = self.pending.as_mut() {
            if now >= pending.start {
                let elapsed_bits = self.baudrate.time_to_bits(now - pending.start);
                let available = usize::try_from(elapsed_bits / 11)
                    .unwrap()
                    .min(pending.data.len());
                if available > pending.cursor {
                    self.rx
                        .extend_from_slice(&pending.data[pending.cursor..available]);
                    pending.cursor = available;
                }
                if pending.cursor == pending.data.len() {
                    self.pending = None;
                }
            }
        }

        let (drop, res) = f(&self.rx);
        assert!(drop <= self.rx.len());
        self.rx.drain(..drop);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_past_tsyn(phy: &DummySlavePhy, now: crate::time::Instant) -> crate::time::Instant {
        now.max(phy.line_idle_since + phy.bit_time(34))
    }

    #[test]
    fn answers_fdl_status_request() {
        let mut phy = DummySlavePhy::new(crate::Baudrate::B19200, 8);
        let mut now = crate::time::Instant::from_micros(50_000);

        phy.transmit_data(now, |buffer| {
            let length = crate::fdl::Telegram::from(crate::fdl::DataTelegram::fdl_status(8, 2))
                .serialize(buffer);
            (length, ())
        });

        now += crate::time::Duration::from_millis(50);
        let telegram = phy
            .receive_telegram(now, |t| match t {
                crate::fdl::Telegram::Data(t) => t.h,
                t => panic!("unexpected response {t:?}"),
            })
            .expect("no response from emulated slave");
        assert_eq!(telegram.da, 2);
        assert_eq!(telegram.sa, 8);
        assert_eq!(
            telegram.fc,
            crate::fdl::FunctionCode::Response {
                state: crate::fdl::ResponseState::Slave,
                status: crate::fdl::ResponseStatus::Ok,
            }
        );
    }

    #[test]
    #[should_panic(expected = "synchronization pause")]
    fn rejects_transmission_into_tsyn() {
        let mut phy = DummySlavePhy::new(crate::Baudrate::B19200, 8);
        let now = crate::time::Instant::from_micros(50_000);

        phy.transmit_data(now, |buffer| {
            let length = crate::fdl::Telegram::from(crate::fdl::DataTelegram::fdl_status(8, 2))
                .serialize(buffer);
            (length, ())
        });

        // Wait for the response, then immediately transmit again: the
        // synchronization pause is violated.
        let now = advance_past_tsyn(&phy, now) - crate::time::Duration::from_micros(500);
        let _ = phy.pending.take();
        phy.transmit_data(now, |buffer| {
            let length = crate::fdl::Telegram::from(crate::fdl::DataTelegram::fdl_status(8, 2))
                .serialize(buffer);
            (length, ())
        });
    }

    #[test]
    fn data_exchange_requires_configuration() {
        let mut phy = DummySlavePhy::new(crate::Baudrate::B19200, 8);
        phy.set_io_sizes(2, 2);
        let now = crate::time::Instant::from_micros(50_000);

        phy.transmit_data(now, |buffer| {
            let telegram = crate::fdl::DataTelegram {
                h: crate::fdl::DataTelegramHeader {
                    da: 8,
                    sa: 2,
                    dsap: None,
                    ssap: None,
                    fc: crate::fdl::FunctionCode::new_srd_high(Default::default()),
                },
                pdu: &[0x12, 0x34],
            };
            (crate::fdl::Telegram::from(telegram).serialize(buffer), ())
        });

        let now = now + crate::time::Duration::from_millis(50);
        let status = phy
            .receive_telegram(now, |t| match t {
                crate::fdl::Telegram::Data(t) => t.is_response().unwrap().1,
                t => panic!("unexpected response {t:?}"),
            })
            .unwrap();
        assert_eq!(status, crate::fdl::ResponseStatus::NoResources);
    }
}
