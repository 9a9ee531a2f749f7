use crate::dp::Slave;

/// Operating state of the DP master
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum OperatingState {
    /// The DP master is online but not performing any cyclic data exchange.
    Stop,
    /// Slaves are initialized and cyclic data exchange is performed, but all
    /// outputs are kept at zero.
    Clear,
    /// Regular operation.  Slaves are initialized and cyclic data exchange is
    /// performed with full I/O.
    Operate,
}

impl OperatingState {
    #[inline(always)]
    pub fn is_stop(self) -> bool {
        self == OperatingState::Stop
    }

    #[inline(always)]
    pub fn is_clear(self) -> bool {
        self == OperatingState::Clear
    }

    #[inline(always)]
    pub fn is_operate(self) -> bool {
        self == OperatingState::Operate
    }
}

bitflags::bitflags! {
    /// Control_Command bits of the Global_Control telegram
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ControlCommand: u8 {
        /// Clear_Data: outputs of the addressed slaves are cleared
        const CLEAR_DATA =  0b00000010;
        /// Unfreeze: input freezing is cancelled
        const UNFREEZE =    0b00000100;
        /// Freeze: inputs are read and frozen
        const FREEZE =      0b00001000;
        /// Unsync: output syncing is cancelled
        const UNSYNC =      0b00010000;
        /// Sync: outputs are latched until the next sync
        const SYNC =        0b00100000;
    }
}

/// Events reported from one poll of the DP master
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DpEvents {
    /// The scheduler completed a full round over all slaves.
    pub cycle_completed: bool,
    /// This slave's lifecycle state advanced during the poll.
    pub slave_advanced: Option<crate::dp::SlaveHandle>,
    /// A slave exceeded the configured fault limit and was taken out of service.
    pub fatal_fault: Option<crate::dp::SlaveHandle>,
}

/// Shared state of the DP master, visible to the slave state machines
pub struct DpMasterState {
    /// Operating state of the master
    pub operating_state: OperatingState,

    /// Last time we sent a "Global Control" telegram to advertise our operating state
    pub last_global_control: Option<crate::time::Instant>,
}

/// The DP master
///
/// Implements the class 1 master side of DP-V0: bring-up and cyclic data
/// exchange for all registered slaves.  The master is driven by an
/// [`FdlStation`][`crate::fdl::FdlStation`] which calls into the
/// [`FdlApplication`][`crate::fdl::FdlApplication`] implementation here.
///
/// The master holds all slaves that we interact with.  To get access, use the
/// [`SlaveHandle`][`crate::dp::SlaveHandle`] that you get when calling
/// [`.add()`][`DpMaster::add`].
pub struct DpMaster<'a> {
    slaves: crate::dp::SlaveSet<'a>,
    state: DpMasterState,

    /// Round-robin position of the scheduler (storage slot index)
    cursor: usize,
    /// Queued Global_Control command, sent before the next slave service
    pending_control: Option<(ControlCommand, u8)>,
    /// Consecutive-fault limit after which a slave is taken out of service
    fault_limit: Option<u8>,
}

impl<'a> DpMaster<'a> {
    pub fn new<S>(storage: S) -> Self
    where
        S: Into<managed::ManagedSlice<'a, crate::dp::SlaveStorage<'a>>>,
    {
        let storage = storage.into();
        if storage.len() > 124 {
            log::warn!(
                "DP master was provided with storage for more than 124 slaves, this is wasted memory!"
            );
        }
        Self {
            slaves: crate::dp::SlaveSet::new(storage),
            state: DpMasterState {
                operating_state: OperatingState::Stop,
                last_global_control: None,
            },
            cursor: 0,
            pending_control: None,
            fault_limit: None,
        }
    }

    /// Add a slave to the set, and return its handle.
    ///
    /// # Panics
    /// This function panics if the storage is fixed-size (not a `Vec`) and is full.
    pub fn add(&mut self, slave: Slave<'a>) -> crate::dp::SlaveHandle {
        self.slaves.add(slave)
    }

    /// Get a slave by its handle.
    ///
    /// # Panics
    /// This function may panic if the handle does not belong to this master.
    pub fn get(&self, handle: crate::dp::SlaveHandle) -> &Slave<'a> {
        self.slaves.get(handle)
    }

    /// Get a slave by its handle, as mutable.
    ///
    /// # Panics
    /// This function may panic if the handle does not belong to this master.
    pub fn get_mut(&mut self, handle: crate::dp::SlaveHandle) -> &mut Slave<'a> {
        self.slaves.get_mut(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (crate::dp::SlaveHandle, &Slave<'a>)> {
        self.slaves.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (crate::dp::SlaveHandle, &mut Slave<'a>)> {
        self.slaves.iter_mut()
    }

    #[inline(always)]
    pub fn operating_state(&self) -> OperatingState {
        self.state.operating_state
    }

    /// Whether any slave is currently being brought up.
    pub fn is_connecting(&self) -> bool {
        self.iter().any(|(_, s)| s.is_connecting())
    }

    /// Whether all slaves are exchanging cyclic data.
    ///
    /// Returns `false` when no slaves are registered.
    pub fn is_connected(&self) -> bool {
        let mut any = false;
        for (_, slave) in self.iter() {
            if !slave.is_connected() {
                return false;
            }
            any = true;
        }
        any
    }

    /// Opt into fault debouncing: a slave with `limit` consecutive hard
    /// faults is taken out of service and reported via
    /// [`DpEvents::fatal_fault`].
    pub fn set_fault_limit(&mut self, limit: Option<u8>) {
        self.fault_limit = limit;
    }

    #[inline]
    pub fn enter_state(&mut self, state: OperatingState) {
        log::info!("DP master entering state \"{:?}\"", state);
        self.state.operating_state = state;
        // Ensure we will send a new global control telegram ASAP:
        self.state.last_global_control = None;

        if state == OperatingState::Stop {
            for (_, slave) in self.slaves.iter_mut() {
                slave.reset_to_offline();
            }
        }
    }

    /// Enter the [`Stop`][`OperatingState::Stop`] operating state.
    ///
    /// This is equivalent to calling `.enter_state(OperatingState::Stop)`.
    #[inline]
    pub fn enter_stop(&mut self) {
        self.enter_state(OperatingState::Stop)
    }

    /// Enter the [`Clear`][`OperatingState::Clear`] operating state.
    ///
    /// This is equivalent to calling `.enter_state(OperatingState::Clear)`.
    #[inline]
    pub fn enter_clear(&mut self) {
        self.enter_state(OperatingState::Clear)
    }

    /// Enter the [`Operate`][`OperatingState::Operate`] operating state.
    ///
    /// This is equivalent to calling `.enter_state(OperatingState::Operate)`.
    #[inline]
    pub fn enter_operate(&mut self) {
        self.enter_state(OperatingState::Operate)
    }

    /// Stop all communication.
    ///
    /// All slaves fall back to the `Offline` lifecycle state.  The in-flight
    /// message cycle, if any, is still completed by the FDL station before
    /// the bus goes quiet; afterwards the slaves' watchdogs will put them
    /// into their fail-safe state.
    pub fn shutdown(&mut self) {
        log::info!("DP master shutting down");
        self.enter_stop();
    }

    /// Queue a Global_Control command for the given slave groups.
    ///
    /// `groups` of zero addresses all slaves.  The command is broadcast
    /// before the next slave service.
    pub fn global_control(&mut self, command: ControlCommand, groups: u8) {
        if let Some((previous, _)) = self.pending_control.replace((command, groups)) {
            log::warn!("Replacing still queued Global_Control command {previous:?}");
        }
    }

    /// Put the addressed groups into sync mode.
    pub fn sync(&mut self, groups: u8) {
        self.global_control(ControlCommand::SYNC, groups);
    }

    /// Cancel sync mode for the addressed groups.
    pub fn sync_cancel(&mut self, groups: u8) {
        self.global_control(ControlCommand::UNSYNC, groups);
    }

    /// Put the addressed groups into freeze mode.
    pub fn freeze(&mut self, groups: u8) {
        self.global_control(ControlCommand::FREEZE, groups);
    }

    /// Cancel freeze mode for the addressed groups.
    pub fn freeze_cancel(&mut self, groups: u8) {
        self.global_control(ControlCommand::UNFREEZE, groups);
    }

    /// Check the fault debouncer for the slave that just faulted.
    fn debounce_fault(&mut self, handle: crate::dp::SlaveHandle) -> Option<crate::dp::SlaveHandle> {
        let limit = self.fault_limit?;
        let slave = self.slaves.get_mut(handle);
        if !slave.is_halted() && slave.faults_in_a_row() >= limit {
            slave.halt();
            Some(handle)
        } else {
            None
        }
    }

    /// Find the slave a reply from `addr` belongs to.
    fn slave_by_address(
        &mut self,
        addr: u8,
    ) -> Option<(crate::dp::SlaveHandle, &mut Slave<'a>)> {
        self.slaves.iter_mut().find(|(_, s)| s.address() == addr)
    }

    /// Encode the Global_Control telegram for the current operating state.
    fn send_global_control(
        &mut self,
        now: crate::time::Instant,
        tx: crate::fdl::TelegramTx,
        sa: u8,
        command: ControlCommand,
        groups: u8,
    ) -> crate::fdl::TelegramTxResponse {
        self.state.last_global_control = Some(now);
        log::trace!(
            "DP master sending global control {:?} for groups 0x{:02X}",
            command,
            groups
        );
        tx.send_data_telegram(
            crate::fdl::DataTelegramHeader {
                da: crate::consts::BROADCAST_ADDRESS,
                sa,
                dsap: Some(crate::consts::SAP_GLOBAL_CONTROL),
                ssap: Some(crate::consts::SAP_MASTER_MS0),
                fc: crate::fdl::FunctionCode::new_sdn_low(),
            },
            2,
            |buf| {
                buf[0] = command.bits();
                buf[1] = groups;
            },
        )
    }
}

impl<'a> crate::fdl::FdlApplication for DpMaster<'a> {
    type Events = DpEvents;

    fn transmit_telegram(
        &mut self,
        now: crate::time::Instant,
        p: &crate::fdl::Parameters,
        tx: crate::fdl::TelegramTx,
    ) -> (Option<crate::fdl::TelegramTxResponse>, DpEvents) {
        let mut events = DpEvents::default();

        // In STOP state, never send anything.
        if self.state.operating_state.is_stop() {
            return (None, events);
        }

        // An explicitly queued Global_Control command goes out first.
        if let Some((command, groups)) = self.pending_control.take() {
            let res = self.send_global_control(now, tx, p.address, command, groups);
            return (Some(res), events);
        }

        // Check whether it is time for another periodic global control telegram advertising our
        // operating state.  The interval of 50 Tsl keeps the advertisement well inside every
        // reasonable slave watchdog period.
        if self
            .state
            .last_global_control
            .map(|t| now - t >= p.slot_time() * 50)
            .unwrap_or(true)
        {
            let command = match self.state.operating_state {
                OperatingState::Clear => ControlCommand::CLEAR_DATA,
                OperatingState::Operate => ControlCommand::empty(),
                OperatingState::Stop => unreachable!(),
            };
            let res = self.send_global_control(now, tx, p.address, command, 0);
            return (Some(res), events);
        }

        // Round-robin over the slave arena: each slave may issue at most one request, the first
        // one that has something to send wins this cycle.
        let capacity = self.slaves.capacity();
        let last_occupied = self.slaves.iter().map(|(h, _)| h.index()).max();
        let mut tx = tx;
        for step in 0..capacity {
            let index = (self.cursor + step) % capacity;
            let Some((handle, slave)) = self.slaves.get_slot_mut(index) else {
                continue;
            };
            let state_before = slave.state();
            match slave.transmit_telegram(now, &self.state, p, tx) {
                Ok(res) => {
                    if slave.state() != state_before {
                        events.slave_advanced = Some(handle);
                    }
                    self.cursor = (index + 1) % capacity;
                    if Some(index) == last_occupied {
                        // The scheduler wrapped around, every slave had its turn.
                        events.cycle_completed = true;
                        self.cursor = 0;
                    }
                    return (Some(res), events);
                }
                Err(returned_tx) => {
                    tx = returned_tx;
                }
            }
        }

        (None, events)
    }

    fn receive_reply(
        &mut self,
        now: crate::time::Instant,
        p: &crate::fdl::Parameters,
        addr: u8,
        telegram: crate::fdl::Telegram,
    ) -> DpEvents {
        let mut events = DpEvents::default();
        let state = &self.state;
        let Some((handle, slave)) = self.slaves.iter_mut().find(|(_, s)| s.address() == addr)
        else {
            log::warn!("Received reply for unknown slave #{addr}!");
            return events;
        };
        let state_before = slave.state();
        slave.receive_reply(now, state, p, telegram);
        if slave.state() != state_before {
            events.slave_advanced = Some(handle);
        }
        events
    }

    fn handle_timeout(
        &mut self,
        now: crate::time::Instant,
        _p: &crate::fdl::Parameters,
        addr: u8,
    ) -> DpEvents {
        let mut events = DpEvents::default();
        let Some((handle, slave)) = self.slave_by_address(addr) else {
            log::warn!("Timeout for unknown slave #{addr}!");
            return events;
        };
        let state_before = slave.state();
        slave.handle_timeout(now);
        if slave.state() != state_before {
            events.slave_advanced = Some(handle);
        }
        events.fatal_fault = self.debounce_fault(handle);
        events
    }

    fn handle_fdl_error(
        &mut self,
        now: crate::time::Instant,
        _p: &crate::fdl::Parameters,
        addr: u8,
        error: crate::fdl::FdlError,
    ) -> DpEvents {
        let mut events = DpEvents::default();
        let Some((handle, slave)) = self.slave_by_address(addr) else {
            log::warn!("FDL error for unknown slave #{addr}: {error}");
            return events;
        };
        let state_before = slave.state();
        slave.handle_fdl_error(now, error);
        if slave.state() != state_before {
            events.slave_advanced = Some(handle);
        }
        if slave.state() == crate::dp::SlaveState::Fault {
            events.fatal_fault = self.debounce_fault(handle);
        }
        events
    }
}
