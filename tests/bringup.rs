//! End-to-end scenarios against the emulated slave:
//! bring-up to data exchange, watchdog recovery, high priority diagnostics,
//! periodic diagnostics, and fault debouncing.

use profidp::phy::DummySlavePhy;
use profidp::{dp, fdl, Baudrate};

const SLAVE_ADDRESS: u8 = 8;
const IDENT: u16 = 0xB757;
const BAUDRATE: Baudrate = Baudrate::B19200;

fn prepare_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn make_phy() -> DummySlavePhy {
    let mut phy = DummySlavePhy::new(BAUDRATE, SLAVE_ADDRESS);
    phy.set_ident_number(IDENT);
    phy.set_io_sizes(4, 4);
    phy
}

fn make_desc() -> dp::SlaveDesc<'static> {
    dp::SlaveDesc {
        ident_number: IDENT,
        watchdog: Some(profidp::time::Duration::from_millis(200)),
        // 4 input bytes, 4 output bytes
        config: Some(&[0x13, 0x23]),
        user_prm_data: Some(&[]),
        fault_cooldown: profidp::time::Duration::from_millis(100),
        ..Default::default()
    }
}

struct TestBench<'a> {
    phy: DummySlavePhy,
    fdl: fdl::FdlStation,
    dp: dp::DpMaster<'a>,
    handle: dp::SlaveHandle,
    now: profidp::time::Instant,
}

impl<'a> TestBench<'a> {
    fn new(
        phy: DummySlavePhy,
        desc: dp::SlaveDesc<'a>,
        pi_i: &'a mut [u8],
        pi_q: &'a mut [u8],
    ) -> Self {
        Self::with_slave(phy, dp::Slave::new(SLAVE_ADDRESS, desc, pi_i, pi_q))
    }

    fn with_slave(phy: DummySlavePhy, slave: dp::Slave<'a>) -> Self {
        let mut dp_master = dp::DpMaster::new(Vec::new());
        let handle = dp_master.add(slave);

        let mut fdl = fdl::FdlStation::new(
            fdl::ParametersBuilder::new(2, BAUDRATE).build_verified(&dp_master),
        );

        fdl.set_online();
        dp_master.enter_operate();

        Self {
            phy,
            fdl,
            dp: dp_master,
            handle,
            now: profidp::time::Instant::ZERO,
        }
    }

    /// Poll the stack until `condition` holds, counting slave state advances.
    ///
    /// Panics when the condition stays false for two seconds of bus time.
    fn run_until<F>(&mut self, mut condition: F) -> u32
    where
        F: FnMut(&dp::DpMaster) -> bool,
    {
        let deadline = self.now + profidp::time::Duration::from_secs(2);
        let mut advances = 0;
        loop {
            let events = self.fdl.poll(self.now, &mut self.phy, &mut self.dp);
            if events.slave_advanced.is_some() {
                advances += 1;
            }
            if condition(&self.dp) {
                return advances;
            }
            assert!(self.now < deadline, "condition never became true");
            self.now += profidp::time::Duration::from_micros(100);
        }
    }

    fn slave(&self) -> &dp::Slave<'a> {
        self.dp.get(self.handle)
    }
}

#[test]
fn bring_up_reaches_data_exchange() {
    prepare_logger();
    let mut pi_i = [0u8; 4];
    let mut pi_q = [0u8; 4];
    let mut bench = TestBench::new(make_phy(), make_desc(), &mut pi_i, &mut pi_q);

    let handle = bench.handle;
    let advances = bench.run_until(|dp| dp.get(handle).is_connected());

    assert!(
        advances <= 20,
        "bring-up took {advances} state advances, expected at most 20"
    );
    assert!(bench.dp.is_connected());
    assert!(!bench.dp.is_connecting());
    assert_eq!(bench.slave().state(), dp::SlaveState::DataExchange);
    // The slave confirmed its armed watchdog through diagnostics.
    assert!(bench.slave().watchdog_acknowledged());
    assert_eq!(bench.fdl.framing_fault_count(), 0);
}

#[test]
fn data_exchange_carries_process_images() {
    prepare_logger();
    let mut pi_i = [0u8; 4];
    let mut pi_q = [0u8; 4];
    let mut bench = TestBench::new(make_phy(), make_desc(), &mut pi_i, &mut pi_q);

    let handle = bench.handle;
    bench.run_until(|dp| dp.get(handle).is_connected());

    bench
        .dp
        .get_mut(handle)
        .pi_q_mut()
        .copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);

    // The emulated slave mirrors outputs bit-inverted as inputs.
    bench.run_until(|dp| dp.get(handle).pi_i() == &[0xFE, 0xFD, 0xFC, 0xFB]);
}

#[test]
fn watchdog_expiry_reinitializes_from_diagnosis() {
    prepare_logger();
    let mut pi_i = [0u8; 4];
    let mut pi_q = [0u8; 4];
    let mut bench = TestBench::new(make_phy(), make_desc(), &mut pi_i, &mut pi_q);

    let handle = bench.handle;
    bench.run_until(|dp| dp.get(handle).is_connected());

    // The master disappears for longer than the 200ms watchdog timeout.  The
    // emulated slave fail-safes and answers the next data exchange with "no
    // resources".
    bench.now += profidp::time::Duration::from_millis(500);

    bench.run_until(|dp| !dp.get(handle).is_connected());
    assert_eq!(
        bench.slave().last_fault(),
        Some(&dp::DpError::WatchdogExpired)
    );
    assert_eq!(bench.slave().state(), dp::SlaveState::WaitDiag);

    // Reinitialization must complete within a handful of service cycles.
    let advances = bench.run_until(|dp| dp.get(handle).is_connected());
    assert!(
        advances <= 10,
        "watchdog recovery took {advances} state advances, expected at most 10"
    );
    assert!(bench.phy.is_in_data_exchange());
}

#[test]
fn high_priority_response_triggers_diagnosis() {
    prepare_logger();
    let mut pi_i = [0u8; 4];
    let mut pi_q = [0u8; 4];
    let mut ext_diag = [0u8; 32];
    let slave = dp::Slave::new(SLAVE_ADDRESS, make_desc(), &mut pi_i, &mut pi_q)
        .with_ext_diag_buffer(&mut ext_diag);
    let mut bench = TestBench::with_slave(make_phy(), slave);

    let handle = bench.handle;
    bench.run_until(|dp| dp.get(handle).is_connected());

    bench.phy.set_diag_pending();

    // The high priority status in the next data exchange response makes the
    // master read diagnostics before resuming cyclic exchange.
    bench.run_until(|dp| dp.get(handle).state() == dp::SlaveState::DiagExchange);
    bench.run_until(|dp| dp.get(handle).state() == dp::SlaveState::DataExchange);

    // The extended diagnostics block announced with the high priority flag
    // was collected along the way.
    let blocks: Vec<_> = bench
        .slave()
        .extended_diagnostics()
        .iter_diag_blocks()
        .collect();
    assert_eq!(blocks, vec![dp::ExtDiagBlock::Device(&[0xAA, 0xBB])]);
}

#[test]
fn periodic_diagnosis_rounds() {
    prepare_logger();
    let mut pi_i = [0u8; 4];
    let mut pi_q = [0u8; 4];
    let desc = dp::SlaveDesc {
        diag_period: 3,
        ..make_desc()
    };
    let mut bench = TestBench::new(make_phy(), desc, &mut pi_i, &mut pi_q);

    let handle = bench.handle;
    bench.run_until(|dp| dp.get(handle).is_connected());

    // Every third data exchange round is followed by a diagnosis cycle.
    for _ in 0..2 {
        bench.run_until(|dp| dp.get(handle).state() == dp::SlaveState::DiagExchange);
        bench.run_until(|dp| dp.get(handle).state() == dp::SlaveState::DataExchange);
    }
}

#[test]
fn fault_debouncing_halts_dead_slave() {
    prepare_logger();
    let mut pi_i = [0u8; 4];
    let mut pi_q = [0u8; 4];
    let mut bench = TestBench::new(make_phy(), make_desc(), &mut pi_i, &mut pi_q);
    bench.dp.set_fault_limit(Some(2));

    let handle = bench.handle;
    bench.run_until(|dp| dp.get(handle).is_connected());

    // The slave disappears for good.
    bench.phy.set_silent(true);

    let deadline = bench.now + profidp::time::Duration::from_secs(5);
    let mut fatal_seen = false;
    while bench.now < deadline {
        let events = bench.fdl.poll(bench.now, &mut bench.phy, &mut bench.dp);
        if events.fatal_fault == Some(handle) {
            fatal_seen = true;
            break;
        }
        bench.now += profidp::time::Duration::from_micros(100);
    }

    assert!(fatal_seen, "fault debouncer never tripped");
    assert!(bench.slave().is_halted());
    assert!(bench.slave().faults_in_a_row() >= 2);
}

#[test]
fn shutdown_takes_slaves_offline() {
    prepare_logger();
    let mut pi_i = [0u8; 4];
    let mut pi_q = [0u8; 4];
    let mut bench = TestBench::new(make_phy(), make_desc(), &mut pi_i, &mut pi_q);

    let handle = bench.handle;
    bench.run_until(|dp| dp.get(handle).is_connected());

    bench.dp.shutdown();
    bench.fdl.set_offline();

    assert_eq!(bench.slave().state(), dp::SlaveState::Offline);

    // Once the in-flight cycle has drained, the bus stays quiet.
    let deadline = bench.now + profidp::time::Duration::from_millis(200);
    while bench.now < deadline {
        bench.fdl.poll(bench.now, &mut bench.phy, &mut bench.dp);
        bench.now += profidp::time::Duration::from_micros(100);
    }
    assert!(bench.fdl.connectivity_state().is_offline());
}
