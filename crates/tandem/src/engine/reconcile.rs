use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::scheduler::{PeriodicScheduler, TaskHandle, TaskKind};
use super::state::{
    ActionId, ClientId, Inbound, Outbound, PlayerAction, Roster, Snapshot, StateId, StateUpdate,
};
use super::stats::SyncStats;
use crate::clock::{Clock, ClockOffsetTracker};
use crate::config::SessionConfig;
use crate::net::Transport;

/// Owns the local speculative branch and decides, for every authoritative
/// broadcast, whether it confirms that branch or replaces it.
///
/// Every prediction tick produces a new state with a fresh [`StateId`] and
/// sends it out as a candidate. A broadcast carrying one of our own
/// outstanding ids is a confirmation. Anything else supersedes the local
/// branch: the snapshot is adopted, all outstanding ids are dropped and one
/// catch-up tick brings the snapshot forward to the estimated remote present.
///
/// The engine does no I/O scheduling of its own. Its owner forwards inbound
/// messages and calls [`run_due`](Self::run_due) whenever
/// [`next_deadline`](Self::next_deadline) passes.
pub struct ReconciliationEngine<S, A, F, T, C> {
    state: S,
    state_id: Option<StateId>,
    unverified: HashSet<StateId>,
    pending: Vec<PlayerAction<A>>,
    roster: Roster,
    offset: ClockOffsetTracker,
    scheduler: PeriodicScheduler,
    probe_task: Option<TaskHandle>,
    prediction_task: Option<TaskHandle>,
    probe_interval: Duration,
    prediction_interval: Duration,
    connected: bool,
    update: F,
    transport: T,
    clock: C,
    ticks: u64,
    confirmations: u64,
    supersessions: u64,
    send_failures: u64,
}

impl<S, A, F, T, C> ReconciliationEngine<S, A, F, T, C>
where
    F: FnMut(&S, &[PlayerAction<A>], &Roster, f32) -> S,
    T: Transport<S>,
    C: Clock,
{
    pub fn new(config: &SessionConfig, initial_state: S, update: F, transport: T, clock: C) -> Self {
        Self {
            state: initial_state,
            state_id: None,
            unverified: HashSet::new(),
            pending: Vec::new(),
            roster: Roster::new(),
            offset: ClockOffsetTracker::new(config.offset_window),
            scheduler: PeriodicScheduler::new(),
            probe_task: None,
            prediction_task: None,
            probe_interval: config.probe_interval(),
            prediction_interval: config.prediction_interval(),
            connected: false,
            update,
            transport,
            clock,
            ticks: 0,
            confirmations: 0,
            supersessions: 0,
            send_failures: 0,
        }
    }

    /// Starts the probe schedule on its own, for links that only come up
    /// once the remote side answers.
    pub fn start_probing(&mut self, now: Instant) {
        if self.probe_task.is_none() {
            self.probe_task =
                Some(self.scheduler.schedule(TaskKind::Probe, self.probe_interval, now));
        }
    }

    /// Starts probing and prediction. Calling it again while running is a no-op.
    pub fn on_connected(&mut self, now: Instant) {
        self.connected = true;
        self.start_probing(now);
        if self.prediction_task.is_none() {
            log::info!(
                "Prediction started ({} ms ticks, offset {:.1} ms)",
                self.prediction_interval.as_millis(),
                self.offset.offset_ms()
            );
            self.prediction_task = Some(self.scheduler.schedule(
                TaskKind::Prediction,
                self.prediction_interval,
                now,
            ));
        }
    }

    /// Pauses prediction. Probes keep running so the link can be detected again.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        if let Some(handle) = self.prediction_task.take() {
            self.scheduler.cancel(handle);
            log::warn!(
                "Prediction paused with {} unverified updates",
                self.unverified.len()
            );
        }
    }

    /// Cancels every scheduled task.
    pub fn stop(&mut self) {
        self.connected = false;
        self.scheduler.clear();
        self.probe_task = None;
        self.prediction_task = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Runs every task due at `now`. Returns how many fired.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(handle) = self.scheduler.pop_due(now) {
            match handle.kind() {
                TaskKind::Probe => self.send_probe(),
                TaskKind::Prediction => {
                    self.prediction_tick(self.prediction_interval.as_secs_f32())
                }
            }
            fired += 1;
        }
        fired
    }

    pub fn add_player_action(&mut self, action: PlayerAction<A>) {
        self.pending.push(action);
    }

    pub fn handle_message(&mut self, message: Inbound<S, A>, now: Instant) {
        match message {
            Inbound::Pong {
                server_time,
                sent_time,
            } => self.handle_pong(server_time, sent_time),
            Inbound::StateUpdate(snapshot) => self.handle_snapshot(snapshot, now),
            Inbound::PlayerAction(action) => self.pending.push(action),
            Inbound::ClientJoined(client_id) => self.handle_joined(client_id),
            Inbound::ClientLeft(client_id) => self.handle_left(client_id),
        }
    }

    /// Advances the local state by `dt` seconds and sends the result out as
    /// an unverified candidate. Pending actions are consumed either way; the
    /// id is only tracked once the send went out.
    pub fn prediction_tick(&mut self, dt: f32) {
        let next = (self.update)(&self.state, &self.pending, &self.roster, dt);

        let id = StateId::generate();
        let based_on_id = self.state_id.replace(id);
        let handled_action_ids: Vec<ActionId> =
            self.pending.drain(..).map(|action| action.id).collect();
        self.state = next;
        self.ticks += 1;

        log::trace!(
            "Tick {} -> {} (dt {:.4}s, {} actions)",
            self.ticks,
            id,
            dt,
            handled_action_ids.len()
        );

        let server_time_estimate = self.estimated_remote_time_now();
        let result = self.transport.send(Outbound::StateUpdate(StateUpdate {
            state: &self.state,
            id,
            based_on_id,
            handled_action_ids,
            server_time_estimate,
        }));
        match result {
            Ok(()) => {
                self.unverified.insert(id);
            }
            Err(e) => {
                self.send_failures += 1;
                log::warn!("Failed to send state update {}: {}", id, e);
            }
        }
    }

    fn send_probe(&mut self) {
        let sent_time = self.clock.now_ms();
        if let Err(e) = self.transport.send(Outbound::Ping { sent_time }) {
            self.send_failures += 1;
            log::debug!("Failed to send ping: {}", e);
        }
    }

    fn handle_pong(&mut self, server_time: f64, sent_time: f64) {
        let received = self.clock.now_ms();
        if self
            .offset
            .record_round_trip(sent_time, received, server_time)
        {
            log::trace!(
                "Pong RTT {:.1} ms, offset {:.1} ms",
                received - sent_time,
                self.offset.offset_ms()
            );
        }
    }

    fn handle_snapshot(&mut self, snapshot: Snapshot<S>, now: Instant) {
        if self.unverified.remove(&snapshot.id) {
            self.confirmations += 1;
            log::trace!(
                "Confirmed {} ({} still unverified)",
                snapshot.id,
                self.unverified.len()
            );
            return;
        }

        self.supersede(snapshot, now);
    }

    fn supersede(&mut self, snapshot: Snapshot<S>, now: Instant) {
        if let Some(handle) = self.prediction_task.take() {
            self.scheduler.cancel(handle);
        }

        let discarded = self.unverified.len();
        self.unverified.clear();
        self.state = snapshot.state;
        self.state_id = Some(snapshot.id);
        self.supersessions += 1;

        if !self.connected {
            log::debug!(
                "Adopted snapshot {} while paused, discarded {} unverified",
                snapshot.id,
                discarded
            );
            return;
        }

        let behind_ms = self.estimated_remote_time_now() - snapshot.server_time_estimate;
        let catch_up_ms = if behind_ms.is_finite() {
            behind_ms.max(0.0)
        } else {
            0.0
        };
        log::debug!(
            "Superseded by {}, discarded {} unverified, catching up {:.1} ms",
            snapshot.id,
            discarded,
            catch_up_ms
        );

        self.prediction_tick((catch_up_ms / 1000.0) as f32);
        self.prediction_task = Some(self.scheduler.schedule(
            TaskKind::Prediction,
            self.prediction_interval,
            now,
        ));
    }

    fn handle_joined(&mut self, client_id: ClientId) {
        if self.roster.insert(client_id) {
            log::info!("Client {} joined ({} in roster)", client_id, self.roster.len());
        }
    }

    fn handle_left(&mut self, client_id: ClientId) {
        if self.roster.remove(&client_id) {
            log::info!("Client {} left ({} in roster)", client_id, self.roster.len());
        }
    }

    pub fn estimated_remote_time_now(&self) -> f64 {
        self.offset.estimated_remote_time(self.clock.now_ms())
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_id(&self) -> Option<StateId> {
        self.state_id
    }

    pub fn unverified_ids(&self) -> &HashSet<StateId> {
        &self.unverified
    }

    pub fn pending_actions(&self) -> &[PlayerAction<A>] {
        &self.pending
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn offset(&self) -> &ClockOffsetTracker {
        &self.offset
    }

    pub fn is_predicting(&self) -> bool {
        self.prediction_task.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            offset_ms: self.offset.offset_ms(),
            srtt_ms: self.offset.srtt_ms().unwrap_or(0.0),
            rtt_variance_ms: self.offset.rtt_var_ms(),
            offset_samples: self.offset.sample_count(),
            unverified_updates: self.unverified.len(),
            pending_actions: self.pending.len(),
            roster_size: self.roster.len(),
            ticks: self.ticks,
            confirmations: self.confirmations,
            supersessions: self.supersessions,
            send_failures: self.send_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::net::TransportError;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Ping {
            sent_time: f64,
        },
        Update {
            state: i64,
            id: StateId,
            based_on_id: Option<StateId>,
            handled_action_ids: Vec<ActionId>,
            server_time_estimate: f64,
        },
    }

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: Vec<Sent>,
        fail: bool,
    }

    impl RecordingTransport {
        fn updates(&self) -> Vec<&Sent> {
            self.sent
                .iter()
                .filter(|sent| matches!(sent, Sent::Update { .. }))
                .collect()
        }

        fn pings(&self) -> usize {
            self.sent
                .iter()
                .filter(|sent| matches!(sent, Sent::Ping { .. }))
                .count()
        }
    }

    impl Transport<i64> for RecordingTransport {
        fn send(&mut self, message: Outbound<'_, i64>) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Io(std::io::Error::other("link down")));
            }
            self.sent.push(match message {
                Outbound::Ping { sent_time } => Sent::Ping { sent_time },
                Outbound::StateUpdate(update) => Sent::Update {
                    state: *update.state,
                    id: update.id,
                    based_on_id: update.based_on_id,
                    handled_action_ids: update.handled_action_ids,
                    server_time_estimate: update.server_time_estimate,
                },
            });
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        state: i64,
        actions: Vec<ActionId>,
        roster: Vec<ClientId>,
        dt: f32,
    }

    type Calls = Rc<RefCell<Vec<Call>>>;
    type Callback = Box<dyn FnMut(&i64, &[PlayerAction<i64>], &Roster, f32) -> i64>;
    type TestEngine = ReconciliationEngine<i64, i64, Callback, RecordingTransport, ManualClock>;

    const MS: Duration = Duration::from_millis(1);

    /// Each tick adds one plus the sum of action payloads.
    fn engine(clock: &ManualClock) -> (TestEngine, Calls) {
        let calls: Calls = Rc::default();
        let recorder = Rc::clone(&calls);
        let callback: Callback = Box::new(
            move |state: &i64, actions: &[PlayerAction<i64>], roster: &Roster, dt: f32| {
                recorder.borrow_mut().push(Call {
                    state: *state,
                    actions: actions.iter().map(|action| action.id).collect(),
                    roster: roster.iter().copied().collect(),
                    dt,
                });
                state + 1 + actions.iter().map(|action| action.payload).sum::<i64>()
            },
        );

        let config = SessionConfig::default();
        let engine = ReconciliationEngine::new(
            &config,
            0,
            callback,
            RecordingTransport::default(),
            clock.clone(),
        );
        (engine, calls)
    }

    fn snapshot(state: i64, id: StateId, server_time_estimate: f64) -> Inbound<i64, i64> {
        Inbound::StateUpdate(Snapshot {
            state,
            id,
            server_time_estimate,
        })
    }

    #[test]
    fn test_tick_records_unverified_and_sends() {
        let clock = ManualClock::new(10_000.0);
        let (mut engine, calls) = engine(&clock);

        engine.prediction_tick(0.05);

        let id = engine.state_id().unwrap();
        assert_eq!(*engine.state(), 1);
        assert!(engine.unverified_ids().contains(&id));
        assert_eq!(calls.borrow().len(), 1);

        let updates = engine.transport().updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0],
            &Sent::Update {
                state: 1,
                id,
                based_on_id: None,
                handled_action_ids: Vec::new(),
                server_time_estimate: 10_000.0,
            }
        );
    }

    #[test]
    fn test_ticks_chain_based_on_ids() {
        let clock = ManualClock::new(0.0);
        let (mut engine, _calls) = engine(&clock);

        engine.prediction_tick(0.05);
        let first = engine.state_id();
        engine.prediction_tick(0.05);

        match engine.transport().updates()[1] {
            Sent::Update { based_on_id, .. } => assert_eq!(*based_on_id, first),
            other => panic!("Expected update, got {:?}", other),
        }
        assert_eq!(engine.unverified_ids().len(), 2);
    }

    #[test]
    fn test_action_consumed_by_exactly_one_tick() {
        let clock = ManualClock::new(0.0);
        let (mut engine, calls) = engine(&clock);

        engine.add_player_action(PlayerAction::new(ActionId(7), 10));
        engine.prediction_tick(0.05);

        assert!(engine.pending_actions().is_empty());
        assert_eq!(calls.borrow()[0].actions, vec![ActionId(7)]);
        assert_eq!(*engine.state(), 11);

        match engine.transport().updates()[0] {
            Sent::Update {
                handled_action_ids, ..
            } => assert_eq!(handled_action_ids, &vec![ActionId(7)]),
            other => panic!("Expected update, got {:?}", other),
        }

        engine.prediction_tick(0.05);
        assert!(calls.borrow()[1].actions.is_empty());
    }

    #[test]
    fn test_confirmation_removes_only_that_id() {
        let clock = ManualClock::new(0.0);
        let (mut engine, calls) = engine(&clock);
        let now = Instant::now();

        engine.prediction_tick(0.05);
        let first = engine.state_id().unwrap();
        engine.prediction_tick(0.05);
        let second = engine.state_id().unwrap();

        engine.handle_message(snapshot(1, first, 0.0), now);

        assert_eq!(engine.unverified_ids().len(), 1);
        assert!(engine.unverified_ids().contains(&second));
        assert_eq!(*engine.state(), 2);
        assert_eq!(engine.state_id(), Some(second));
        assert_eq!(calls.borrow().len(), 2);
        assert_eq!(engine.stats().confirmations, 1);
    }

    #[test]
    fn test_supersession_adopts_snapshot_and_catches_up_once() {
        let clock = ManualClock::new(50_000.0);
        let (mut engine, calls) = engine(&clock);
        let now = Instant::now();
        engine.on_connected(now);

        engine.prediction_tick(0.05);
        engine.prediction_tick(0.05);
        assert_eq!(engine.unverified_ids().len(), 2);

        let foreign = StateId(0xf00d);
        engine.handle_message(snapshot(100, foreign, 49_800.0), now);

        // One catch-up tick ran from the snapshot, covering 200 ms.
        assert_eq!(calls.borrow().len(), 3);
        let catch_up = calls.borrow()[2].clone();
        assert_eq!(catch_up.state, 100);
        assert!((catch_up.dt - 0.2).abs() < 1e-6);

        assert_eq!(*engine.state(), 101);
        assert_eq!(engine.unverified_ids().len(), 1);
        assert!(!engine.unverified_ids().contains(&foreign));

        match engine.transport().updates().last().unwrap() {
            Sent::Update { based_on_id, .. } => assert_eq!(*based_on_id, Some(foreign)),
            other => panic!("Expected update, got {:?}", other),
        }
        assert_eq!(engine.stats().supersessions, 1);
    }

    #[test]
    fn test_supersession_clears_unrelated_unverified_ids() {
        let clock = ManualClock::new(0.0);
        let (mut engine, _calls) = engine(&clock);
        let now = Instant::now();

        for _ in 0..5 {
            engine.prediction_tick(0.05);
        }
        engine.handle_message(snapshot(-1, StateId(1), 0.0), now);

        // Not connected: the snapshot is adopted without a catch-up tick.
        assert!(engine.unverified_ids().is_empty());
        assert_eq!(*engine.state(), -1);
        assert_eq!(engine.state_id(), Some(StateId(1)));
    }

    #[test]
    fn test_supersession_restarts_prediction_schedule() {
        let clock = ManualClock::new(0.0);
        let (mut engine, calls) = engine(&clock);
        let start = Instant::now();
        engine.on_connected(start);

        engine.run_due(start + 50 * MS);
        assert_eq!(calls.borrow().len(), 1);

        // Supersession at 80 ms pushes the next periodic tick to 130 ms.
        engine.handle_message(snapshot(10, StateId(2), 0.0), start + 80 * MS);
        assert_eq!(calls.borrow().len(), 2);

        engine.run_due(start + 100 * MS);
        assert_eq!(calls.borrow().len(), 2);

        engine.run_due(start + 130 * MS);
        assert_eq!(calls.borrow().len(), 3);
        assert_eq!(calls.borrow()[2].state, 11);
        assert!((calls.borrow()[2].dt - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_catch_up_clamped_when_snapshot_is_ahead() {
        let clock = ManualClock::new(1_000.0);
        let (mut engine, calls) = engine(&clock);
        let now = Instant::now();
        engine.on_connected(now);

        engine.handle_message(snapshot(3, StateId(9), 5_000.0), now);
        assert_eq!(calls.borrow()[0].dt, 0.0);
    }

    #[test]
    fn test_catch_up_uses_clock_offset() {
        let clock = ManualClock::new(1_000.0);
        let (mut engine, calls) = engine(&clock);
        let now = Instant::now();
        engine.on_connected(now);

        // Remote clock runs 10 s ahead; 20 ms each way.
        clock.set(1_040.0);
        engine.handle_message(
            Inbound::Pong {
                server_time: 11_020.0,
                sent_time: 1_000.0,
            },
            now,
        );
        assert!((engine.offset().offset_ms() - 10_000.0).abs() < 1e-9);

        engine.handle_message(snapshot(0, StateId(4), 10_940.0), now);
        assert!((calls.borrow()[0].dt - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_roster_and_remote_actions_feed_next_tick() {
        let clock = ManualClock::new(0.0);
        let (mut engine, calls) = engine(&clock);
        let now = Instant::now();

        engine.handle_message(Inbound::ClientJoined(ClientId(3)), now);
        engine.handle_message(Inbound::ClientJoined(ClientId(1)), now);
        engine.handle_message(Inbound::ClientLeft(ClientId(3)), now);
        engine.handle_message(
            Inbound::PlayerAction(PlayerAction::new(ActionId(5), 2)),
            now,
        );

        assert!(engine.unverified_ids().is_empty());
        assert_eq!(*engine.state(), 0);

        engine.prediction_tick(0.05);
        let call = calls.borrow()[0].clone();
        assert_eq!(call.roster, vec![ClientId(1)]);
        assert_eq!(call.actions, vec![ActionId(5)]);
    }

    #[test]
    fn test_schedules_drive_probes_and_ticks() {
        let clock = ManualClock::new(0.0);
        let (mut engine, calls) = engine(&clock);
        let start = Instant::now();

        assert_eq!(engine.next_deadline(), None);
        engine.on_connected(start);
        assert_eq!(engine.next_deadline(), Some(start + 10 * MS));

        let mut now = start;
        for _ in 0..10 {
            now += 10 * MS;
            engine.run_due(now);
        }

        assert_eq!(engine.transport().pings(), 10);
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn test_disconnect_pauses_prediction_only() {
        let clock = ManualClock::new(0.0);
        let (mut engine, calls) = engine(&clock);
        let start = Instant::now();
        engine.on_connected(start);
        engine.on_disconnected();
        assert!(!engine.is_predicting());

        engine.run_due(start + 100 * MS);
        assert!(calls.borrow().is_empty());
        assert_eq!(engine.transport().pings(), 1);

        engine.on_connected(start + 100 * MS);
        engine.run_due(start + 150 * MS);
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_failed_send_advances_state_without_tracking_id() {
        let clock = ManualClock::new(0.0);
        let (mut engine, _calls) = engine(&clock);
        engine.transport_mut().fail = true;

        engine.add_player_action(PlayerAction::new(ActionId(1), 10));
        for _ in 0..100 {
            engine.prediction_tick(0.05);
        }

        assert!(engine.unverified_ids().is_empty());
        assert!(engine.pending_actions().is_empty());
        assert!(engine.transport().updates().is_empty());
        assert_eq!(engine.stats().send_failures, 100);
        assert_eq!(engine.stats().ticks, 100);
        assert_eq!(*engine.state(), 110);

        engine.transport_mut().fail = false;
        engine.prediction_tick(0.05);
        assert_eq!(engine.unverified_ids().len(), 1);
    }
}
