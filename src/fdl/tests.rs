use crate::fdl::{
    DataTelegramHeader, FdlApplication, FdlError, FdlStation, FrameCountBit, FunctionCode,
    Parameters, ParametersBuilder, Telegram, TelegramTx, TelegramTxResponse,
};
use crate::phy::DummySlavePhy;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Events {
    delivered: bool,
    timeout: bool,
    failed: bool,
}

/// Minimal FDL application sending a fixed number of requests to one peer.
struct Requester {
    target: u8,
    service: Service,
    fcb: FrameCountBit,
    to_send: u32,
    replies: u32,
    timeouts: u32,
    errors: u32,
    last_error: Option<FdlError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Diagnosis,
    DataExchange,
}

impl Requester {
    fn new(target: u8, service: Service, to_send: u32) -> Self {
        Self {
            target,
            service,
            fcb: Default::default(),
            to_send,
            replies: 0,
            timeouts: 0,
            errors: 0,
            last_error: None,
        }
    }
}

impl FdlApplication for Requester {
    type Events = Events;

    fn transmit_telegram(
        &mut self,
        _now: crate::time::Instant,
        p: &Parameters,
        tx: TelegramTx,
    ) -> (Option<TelegramTxResponse>, Events) {
        if self.to_send == 0 {
            return (None, Events::default());
        }
        self.to_send -= 1;
        let res = match self.service {
            Service::Diagnosis => tx.send_data_telegram(
                DataTelegramHeader {
                    da: self.target,
                    sa: p.address,
                    dsap: Some(crate::consts::SAP_SLAVE_DIAGNOSIS),
                    ssap: Some(crate::consts::SAP_MASTER_MS0),
                    fc: FunctionCode::new_srd_low(self.fcb),
                },
                0,
                |_buf| (),
            ),
            Service::DataExchange => tx.send_data_telegram(
                DataTelegramHeader {
                    da: self.target,
                    sa: p.address,
                    dsap: None,
                    ssap: None,
                    fc: FunctionCode::new_srd_high(self.fcb),
                },
                2,
                |buf| buf.copy_from_slice(&[0x55, 0xAA]),
            ),
        };
        (Some(res), Events::default())
    }

    fn receive_reply(
        &mut self,
        _now: crate::time::Instant,
        _p: &Parameters,
        addr: u8,
        telegram: Telegram,
    ) -> Events {
        assert_eq!(addr, self.target);
        match telegram {
            Telegram::Data(t) => assert!(t.is_response().is_some()),
            Telegram::ShortConfirmation(_) => (),
            t => panic!("unexpected reply {t:?}"),
        }
        self.fcb.cycle();
        self.replies += 1;
        Events {
            delivered: true,
            ..Default::default()
        }
    }

    fn handle_timeout(&mut self, _now: crate::time::Instant, _p: &Parameters, addr: u8) -> Events {
        assert_eq!(addr, self.target);
        self.timeouts += 1;
        Events {
            timeout: true,
            ..Default::default()
        }
    }

    fn handle_fdl_error(
        &mut self,
        _now: crate::time::Instant,
        _p: &Parameters,
        addr: u8,
        error: FdlError,
    ) -> Events {
        assert_eq!(addr, self.target);
        self.errors += 1;
        self.last_error = Some(error);
        Events {
            failed: true,
            ..Default::default()
        }
    }
}

fn run_until<F>(
    fdl: &mut FdlStation,
    phy: &mut DummySlavePhy,
    app: &mut Requester,
    mut condition: F,
) -> crate::time::Instant
where
    F: FnMut(&Requester) -> bool,
{
    let mut now = crate::time::Instant::ZERO;
    while now.total_millis() < 2000 {
        crate::test_utils::set_log_timestamp(now);
        fdl.poll(now, phy, app);
        if condition(app) {
            return now;
        }
        now += crate::time::Duration::from_micros(100);
    }
    panic!("test condition never became true within simulated time");
}

#[rstest::rstest]
fn diagnosis_request_reply_cycles(
    #[values(crate::Baudrate::B19200, crate::Baudrate::B500000)] baud: crate::Baudrate,
) {
    crate::test_utils::prepare_test_logger();

    let mut phy = DummySlavePhy::new(baud, 8);
    let mut fdl = FdlStation::new(ParametersBuilder::new(2, baud).build());
    let mut app = Requester::new(8, Service::Diagnosis, 3);

    fdl.set_online();
    run_until(&mut fdl, &mut phy, &mut app, |app| app.replies == 3);

    assert_eq!(app.timeouts, 0);
    assert_eq!(app.errors, 0);
    assert_eq!(fdl.framing_fault_count(), 0);
    // Two successful cycles toggle the frame count bit into valid alternation.
    assert!(app.fcb.fcv());
}

#[test]
fn silent_peer_times_out_after_retries() {
    crate::test_utils::prepare_test_logger();
    let baud = crate::Baudrate::B19200;

    let mut phy = DummySlavePhy::new(baud, 8);
    phy.set_silent(true);
    let mut fdl = FdlStation::new(ParametersBuilder::new(2, baud).build());
    let mut app = Requester::new(8, Service::Diagnosis, 1);

    fdl.set_online();
    let elapsed = run_until(&mut fdl, &mut phy, &mut app, |app| app.timeouts == 1);

    assert_eq!(app.replies, 0);
    // One repetition must have happened: the total wait covers two slot times.
    assert!(elapsed - crate::time::Instant::ZERO >= fdl.parameters().slot_time() * 2);
    assert!(!fdl.is_cycle_pending());
}

#[test]
fn corrupted_response_is_repeated_and_recovered() {
    crate::test_utils::prepare_test_logger();
    let baud = crate::Baudrate::B19200;

    let mut phy = DummySlavePhy::new(baud, 8);
    phy.corrupt_next_response();
    let mut fdl = FdlStation::new(ParametersBuilder::new(2, baud).build());
    let mut app = Requester::new(8, Service::Diagnosis, 1);

    fdl.set_online();
    run_until(&mut fdl, &mut phy, &mut app, |app| app.replies == 1);

    // The first response was damaged and dropped, the repetition went through.
    assert!(fdl.framing_fault_count() >= 1);
    assert_eq!(app.timeouts, 0);
    assert_eq!(app.errors, 0);
}

#[test]
fn no_resources_is_surfaced_after_backoff() {
    crate::test_utils::prepare_test_logger();
    let baud = crate::Baudrate::B19200;

    // The emulated slave answers data exchange with "no resources" until it
    // has been parameterized and configured.
    let mut phy = DummySlavePhy::new(baud, 8);
    phy.set_io_sizes(2, 2);
    let mut fdl = FdlStation::new(ParametersBuilder::new(2, baud).build());
    let mut app = Requester::new(8, Service::DataExchange, 1);

    fdl.set_online();
    run_until(&mut fdl, &mut phy, &mut app, |app| app.errors == 1);

    assert_eq!(app.replies, 0);
    assert_eq!(app.last_error, Some(FdlError::NoResources));
}

#[test]
fn offline_station_stays_quiet() {
    crate::test_utils::prepare_test_logger();
    let baud = crate::Baudrate::B19200;

    let mut phy = DummySlavePhy::new(baud, 8);
    let mut fdl = FdlStation::new(ParametersBuilder::new(2, baud).build());
    let mut app = Requester::new(8, Service::Diagnosis, 1);

    // Never set online: the app must not be asked to transmit.
    let mut now = crate::time::Instant::ZERO;
    while now.total_millis() < 50 {
        fdl.poll(now, &mut phy, &mut app);
        now += crate::time::Duration::from_micros(100);
    }
    assert_eq!(app.to_send, 1);
    assert!(fdl.connectivity_state().is_offline());
}
