//! Implementation of the FDL request/response engine of a class 1 master.

#![deny(unused_must_use)]
use crate::fdl::FdlApplication;
use crate::phy::ProfibusPhy;

/// Operating state of the FDL station
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum ConnectivityState {
    /// The station is not participating in bus communication in any way.
    Offline,
    /// The station performs message cycles on behalf of its application.
    Online,
}

impl ConnectivityState {
    #[inline(always)]
    pub fn is_offline(self) -> bool {
        self == ConnectivityState::Offline
    }

    #[inline(always)]
    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }
}

/// Stored copy of the request currently on the wire.
///
/// Slot-timeout repetitions must reuse the exact bytes of the original
/// request so the frame count bit stays unchanged.
struct RequestStore {
    buffer: [u8; 255],
    length: usize,
}

impl RequestStore {
    fn new() -> Self {
        Self {
            buffer: [0u8; 255],
            length: 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
    /// No message cycle is active.
    Idle,
    /// A request was sent, we are waiting for the matching response.
    AwaitingReply { addr: u8, retry: u8 },
    /// The slot time expired, the stored request is repeated next.
    RepeatRequest { addr: u8, retry: u8 },
    /// The responder reported "no resources", repeat after a back-off.
    Backoff {
        addr: u8,
        retry: u8,
        until: crate::time::Instant,
    },
}

pub struct FdlStation {
    /// Parameters for the connected bus and this station
    p: crate::fdl::Parameters,

    /// Connectivity status of this station
    connectivity_state: ConnectivityState,

    /// State of the message cycle engine
    state: State,

    /// Shutdown was requested while a message cycle was still in flight.
    going_offline: bool,

    /// Streaming reassembler for received bytes
    decoder: crate::fdl::Decoder,

    /// Copy of the last transmitted request for repetitions
    request: RequestStore,

    /// Timestamp of the last time we found the bus to be active (= someone transmitting)
    last_bus_activity: Option<crate::time::Instant>,

    /// Amount of bytes pending in the receive buffer.
    ///
    /// This known value is compared to the latest one reported by the PHY to find out whether new
    /// data was received since the last poll.
    pending_bytes: usize,
}

impl FdlStation {
    /// Construct a new FDL station with the given parameters.
    pub fn new(param: crate::fdl::Parameters) -> Self {
        param.debug_assert_consistency();

        Self {
            connectivity_state: ConnectivityState::Offline,
            state: State::Idle,
            going_offline: false,
            decoder: crate::fdl::Decoder::new(),
            request: RequestStore::new(),
            last_bus_activity: None,
            pending_bytes: 0,
            p: param,
        }
    }

    /// Return a reference to the parameters configured for this FDL station.
    #[inline(always)]
    pub fn parameters(&self) -> &crate::fdl::Parameters {
        &self.p
    }

    #[inline(always)]
    pub fn connectivity_state(&self) -> ConnectivityState {
        self.connectivity_state
    }

    /// Number of framing faults seen by the receive path.
    #[inline]
    pub fn framing_fault_count(&self) -> u32 {
        self.decoder.fault_count()
    }

    /// Whether a message cycle is currently in flight.
    #[inline]
    pub fn is_cycle_pending(&self) -> bool {
        self.state != State::Idle
    }

    /// Enter the [`Online`][`ConnectivityState::Online`] connectivity state.
    #[inline]
    pub fn set_online(&mut self) {
        log::info!("FDL station #{} going online", self.p.address);
        self.going_offline = false;
        self.connectivity_state = ConnectivityState::Online;
    }

    /// Enter the [`Offline`][`ConnectivityState::Offline`] connectivity state.
    ///
    /// When a message cycle is still in flight, the station stays online
    /// until that cycle has completed (honoring the slot time) and only then
    /// stops communicating.
    #[inline]
    pub fn set_offline(&mut self) {
        if self.state == State::Idle {
            log::info!("FDL station #{} going offline", self.p.address);
            self.connectivity_state = ConnectivityState::Offline;
            self.going_offline = false;
            self.decoder.reset();
        } else {
            log::info!(
                "FDL station #{} going offline after the current message cycle",
                self.p.address
            );
            self.going_offline = true;
        }
    }
}

#[must_use = "\"poll done\" marker must lead to exit of poll function!"]
struct PollDone();

#[must_use = "\"poll result\" must lead to exit of poll function!"]
struct PollResult<E> {
    events: E,
}

impl PollDone {
    pub fn waiting_for_transmission() -> Self {
        PollDone()
    }

    pub fn waiting_for_bus() -> Self {
        PollDone()
    }

    pub fn waiting_for_delay() -> Self {
        PollDone()
    }

    pub fn offline() -> Self {
        PollDone()
    }

    pub fn with_events<E>(self, events: E) -> PollResult<E> {
        PollResult { events }
    }
}

impl<E: Default> From<PollDone> for PollResult<E> {
    fn from(_value: PollDone) -> Self {
        PollResult {
            events: Default::default(),
        }
    }
}

macro_rules! return_if_done {
    ($expr:expr) => {
        match $expr {
            Some(e) => return e.into(),
            None => (),
        }
    };
}

impl FdlStation {
    /// Mark the bus as active at the current point in time.
    ///
    /// Sets the current time as last_bus_activity unless we have already deduced that bus activity
    /// will continue until some point in the future.
    fn mark_bus_activity(&mut self, now: crate::time::Instant) {
        let last = self.last_bus_activity.get_or_insert(now);
        *last = (*last).max(now);
    }

    /// Check whether a transmission is currently ongoing.
    ///
    /// There are two scenarios where an ongoing transmission is detected:
    ///
    /// 1. If the PHY reports that it is still transmitting.
    /// 2. If we believe that we must still be sending data from timing calculations.
    fn check_for_ongoing_transmission(
        &mut self,
        now: crate::time::Instant,
        phy: &mut impl ProfibusPhy,
    ) -> Option<PollDone> {
        if phy.poll_transmission(now) || self.last_bus_activity.map(|l| now <= l).unwrap_or(false) {
            self.mark_bus_activity(now);
            Some(PollDone::waiting_for_transmission())
        } else {
            None
        }
    }

    /// Wait for 33 bit times of line idle since the last bus activity.
    ///
    /// This synchronization pause is required before every transmission.
    fn wait_synchronization_pause(&mut self, now: crate::time::Instant) -> Option<PollDone> {
        if now <= (*self.last_bus_activity.get_or_insert(now) + self.p.synchronization_time()) {
            Some(PollDone::waiting_for_delay())
        } else {
            None
        }
    }

    /// Check whether the time to respond has passed without a full response.
    ///
    /// After partial receival this waits a full slot time from the last
    /// activity again.  That is conservative, but it keeps us robust against
    /// the large inter-character delays seen on non-realtime systems where
    /// PROFIBUS communication happens over USB converters.
    fn check_slot_expired(&mut self, now: crate::time::Instant) -> bool {
        let last_bus_activity = *self.last_bus_activity.get_or_insert(now);
        now > (last_bus_activity + self.p.slot_time())
    }

    /// Marks transmission starting `now` and continuing for `bytes` length.
    fn mark_tx(&mut self, now: crate::time::Instant, bytes: usize) -> PollDone {
        self.last_bus_activity = Some(
            now + self
                .p
                .baudrate
                .bits_to_time(11 * u32::try_from(bytes).unwrap()),
        );
        PollDone::waiting_for_transmission()
    }

    fn check_for_bus_activity(&mut self, now: crate::time::Instant, phy: &mut impl ProfibusPhy) {
        let pending_bytes = phy.poll_pending_received_bytes(now);
        if pending_bytes > self.pending_bytes {
            self.mark_bus_activity(now);
            self.pending_bytes = pending_bytes;
        }
    }

    /// Drop received bytes that do not belong to the upcoming message cycle.
    fn discard_stale_bytes(&mut self, now: crate::time::Instant, phy: &mut impl ProfibusPhy) {
        if self.pending_bytes != 0 {
            let dropped = phy.discard_pending(now);
            log::trace!("Dropping {dropped} stale bytes ahead of the next transmission");
            self.pending_bytes = 0;
            self.decoder.reset();
        }
    }

    /// Transmit the bytes in the request store (again).
    #[must_use = "poll done marker"]
    fn transmit_stored(&mut self, now: crate::time::Instant, phy: &mut impl ProfibusPhy) -> PollDone {
        let length = self.request.length;
        debug_assert!(length > 0);
        let stored = &self.request.buffer[..length];
        phy.transmit_data(now, |buffer| {
            buffer[..length].copy_from_slice(stored);
            (length, ())
        });
        self.pending_bytes = 0;
        self.mark_tx(now, length)
    }
}

impl FdlStation {
    /// Completion of a message cycle, either successfully or with an error.
    fn cycle_done(&mut self) {
        self.state = State::Idle;
        if self.going_offline {
            self.going_offline = false;
            self.connectivity_state = ConnectivityState::Offline;
            self.decoder.reset();
            log::info!("FDL station #{} now offline", self.p.address);
        }
    }

    /// Let the application start a new message cycle.
    #[must_use = "poll done marker"]
    fn handle_idle<APP: FdlApplication>(
        &mut self,
        now: crate::time::Instant,
        phy: &mut impl ProfibusPhy,
        app: &mut APP,
    ) -> PollResult<APP::Events> {
        return_if_done!(self.wait_synchronization_pause(now));

        // Residual bytes from a foreign or aborted transfer must not be matched against the next
        // request.
        self.discard_stale_bytes(now, phy);

        // Let the application encode its request into the repetition store.
        let (response, events) = {
            let tx = crate::fdl::TelegramTx::new(&mut self.request.buffer);
            app.transmit_telegram(now, &self.p, tx)
        };

        match response {
            None => PollDone::waiting_for_bus().with_events(events),
            Some(tx_res) => {
                self.request.length = tx_res.bytes_sent();
                let done = self.transmit_stored(now, phy);
                match tx_res.expects_reply() {
                    Some(addr) => {
                        self.state = State::AwaitingReply { addr, retry: 0 };
                    }
                    None => {
                        // SDN completes with the transmission itself.
                        self.cycle_done();
                    }
                }
                done.with_events(events)
            }
        }
    }

    /// Outcome of scanning the receive path for the expected response.
    fn handle_awaiting_reply<APP: FdlApplication>(
        &mut self,
        now: crate::time::Instant,
        phy: &mut impl ProfibusPhy,
        app: &mut APP,
        addr: u8,
        retry: u8,
    ) -> PollResult<APP::Events> {
        enum Outcome<E> {
            Pending,
            Delivered(E),
            NoResources,
            Negative(crate::fdl::FdlError, E),
        }

        let decoder = &mut self.decoder;
        let p = &self.p;
        let outcome = phy.receive_data(now, |buffer| {
            let mut consumed = 0;
            for &byte in buffer {
                consumed += 1;
                match decoder.feed(now, byte) {
                    crate::fdl::DecodeEvent::NeedMore => (),
                    crate::fdl::DecodeEvent::Fault(e) => {
                        log::trace!("Dropped receive byte 0x{byte:02X}: {e}");
                    }
                    crate::fdl::DecodeEvent::Telegram(telegram, _) => {
                        match Self::classify_reply(p, addr, &telegram) {
                            ReplyClass::Ignore => (),
                            ReplyClass::Reply => {
                                let events = app.receive_reply(now, p, addr, telegram);
                                return (consumed, Outcome::Delivered(events));
                            }
                            ReplyClass::NoResources => {
                                return (consumed, Outcome::NoResources);
                            }
                            ReplyClass::Negative(e) => {
                                let events = app.handle_fdl_error(now, p, addr, e);
                                return (consumed, Outcome::Negative(e, events));
                            }
                        }
                    }
                }
            }
            (consumed, Outcome::Pending)
        });

        match outcome {
            Outcome::Delivered(events) => {
                self.pending_bytes = 0;
                self.cycle_done();
                // Waiting for synchronization pause now
                PollDone::waiting_for_delay().with_events(events)
            }
            Outcome::Negative(error, events) => {
                log::debug!("Request to #{addr} failed without retry: {error}");
                self.pending_bytes = 0;
                self.cycle_done();
                PollDone::waiting_for_delay().with_events(events)
            }
            Outcome::NoResources => {
                self.pending_bytes = 0;
                if retry >= self.p.max_retry_limit {
                    log::warn!("Request to #{addr} kept failing with \"no resources\"");
                    self.cycle_done();
                    let events =
                        app.handle_fdl_error(now, &self.p, addr, crate::fdl::FdlError::NoResources);
                    PollDone::waiting_for_delay().with_events(events)
                } else {
                    log::debug!("Station #{addr} is out of resources, trying again shortly");
                    self.state = State::Backoff {
                        addr,
                        retry: retry + 1,
                        until: now + self.p.no_resource_backoff(),
                    };
                    PollDone::waiting_for_delay().into()
                }
            }
            Outcome::Pending => {
                if self.check_slot_expired(now) {
                    if retry >= self.p.max_retry_limit {
                        log::warn!(
                            "Station #{addr} did not respond within {} retries",
                            self.p.max_retry_limit
                        );
                        self.cycle_done();
                        let events = app.handle_timeout(now, &self.p, addr);
                        PollDone::waiting_for_bus().with_events(events)
                    } else {
                        log::debug!("Slot time expired for #{addr}, repeating the request");
                        self.decoder.reset();
                        self.state = State::RepeatRequest {
                            addr,
                            retry: retry + 1,
                        };
                        PollDone::waiting_for_delay().into()
                    }
                } else {
                    // Still waiting for the response, nothing to do here.
                    PollDone::waiting_for_bus().into()
                }
            }
        }
    }

    fn classify_reply<'t>(
        p: &crate::fdl::Parameters,
        addr: u8,
        telegram: &crate::fdl::Telegram<'t>,
    ) -> ReplyClass {
        match telegram {
            crate::fdl::Telegram::Token(t) => {
                log::warn!("Received token telegram {t:?} while waiting for a response");
                ReplyClass::Ignore
            }
            crate::fdl::Telegram::ShortConfirmation(_) => ReplyClass::Reply,
            crate::fdl::Telegram::Data(t) => {
                let Some((_, status)) = t.is_response() else {
                    log::warn!("Received non-response telegram: {t:?}");
                    return ReplyClass::Ignore;
                };
                if t.h.da != p.address {
                    log::warn!("Received telegram with unexpected destination: {t:?}");
                    return ReplyClass::Ignore;
                }
                if t.h.sa != addr {
                    log::warn!("Received telegram from unexpected station: {t:?}");
                    return ReplyClass::Ignore;
                }
                match status {
                    crate::fdl::ResponseStatus::NoResources => ReplyClass::NoResources,
                    crate::fdl::ResponseStatus::UserError
                    | crate::fdl::ResponseStatus::SapNotEnabled
                    | crate::fdl::ResponseStatus::NoDataReady => {
                        ReplyClass::Negative(crate::fdl::FdlError::NegativeResponse(status))
                    }
                    crate::fdl::ResponseStatus::Ok
                    | crate::fdl::ResponseStatus::DataLow
                    | crate::fdl::ResponseStatus::DataHigh
                    | crate::fdl::ResponseStatus::NotReceivedDataLow
                    | crate::fdl::ResponseStatus::NotReceivedDataHigh => ReplyClass::Reply,
                }
            }
        }
    }

    pub fn poll<PHY: ProfibusPhy, APP: FdlApplication>(
        &mut self,
        now: crate::time::Instant,
        phy: &mut PHY,
        app: &mut APP,
    ) -> APP::Events {
        let result = self.poll_inner(now, phy, app);
        if !phy.poll_transmission(now) {
            self.pending_bytes = phy.poll_pending_received_bytes(now);
        }
        result.events
    }

    fn poll_inner<PHY: ProfibusPhy, APP: FdlApplication>(
        &mut self,
        now: crate::time::Instant,
        phy: &mut PHY,
        app: &mut APP,
    ) -> PollResult<APP::Events> {
        if self.connectivity_state == ConnectivityState::Offline {
            // When we are offline, don't do anything at all.
            return PollDone::offline().into();
        }

        // When a transmission is ongoing, we cannot do anything else in the meantime.
        return_if_done!(self.check_for_ongoing_transmission(now, phy));

        self.check_for_bus_activity(now, phy);

        // A frame that stalled mid-reception is dropped so the decoder regains synchronization.
        if self.decoder.check_timeout(now, self.p.partial_frame_timeout()) {
            log::warn!("Partial telegram timed out, dropping it");
        }

        match self.state {
            State::Idle => self.handle_idle(now, phy, app),
            State::AwaitingReply { addr, retry } => {
                self.handle_awaiting_reply(now, phy, app, addr, retry)
            }
            State::RepeatRequest { addr, retry } => {
                return_if_done!(self.wait_synchronization_pause(now));
                self.discard_stale_bytes(now, phy);
                let done = self.transmit_stored(now, phy);
                self.state = State::AwaitingReply { addr, retry };
                done.into()
            }
            State::Backoff { addr, retry, until } => {
                if now < until {
                    PollDone::waiting_for_delay().into()
                } else {
                    return_if_done!(self.wait_synchronization_pause(now));
                    self.discard_stale_bytes(now, phy);
                    let done = self.transmit_stored(now, phy);
                    self.state = State::AwaitingReply { addr, retry };
                    done.into()
                }
            }
        }
    }

    /// Drive the poll loop with the OS clock until an event is produced.
    ///
    /// This is the blocking variant of [`poll()`][`FdlStation::poll`].  It
    /// polls the station, sleeping briefly between polls, until the
    /// application reports an event or `timeout` has elapsed.  The returned
    /// events are default-valued in the timeout case.
    #[cfg(feature = "std")]
    pub fn tick_blocking<PHY: ProfibusPhy, APP: FdlApplication>(
        &mut self,
        phy: &mut PHY,
        app: &mut APP,
        timeout: crate::time::Duration,
    ) -> APP::Events
    where
        APP::Events: PartialEq,
    {
        let deadline = crate::time::Instant::now() + timeout;
        loop {
            let now = crate::time::Instant::now();
            let events = self.poll(now, phy, app);
            if events != APP::Events::default() {
                return events;
            }
            if now >= deadline {
                return APP::Events::default();
            }
            std::thread::sleep(std::time::Duration::from_micros(500));
        }
    }
}

enum ReplyClass {
    /// Not the response we are waiting for, keep listening.
    Ignore,
    /// The response completing the current message cycle.
    Reply,
    /// The responder has no resources, the request may be repeated.
    NoResources,
    /// A negative acknowledgment that is not retried.
    Negative(crate::fdl::FdlError),
}

#[cfg(test)]
mod tests {
    /// Ensure the `FdlStation` struct size doesn't completely get out of control.
    #[test]
    fn fdl_station_size() {
        let size = std::mem::size_of::<crate::fdl::FdlStation>();
        println!("FDL station struct is {size} bytes large.");
        assert!(size <= 640);
    }
}
