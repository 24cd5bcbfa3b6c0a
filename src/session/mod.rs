//! Synchronization session owned by the multiplayer client
//!
//! Ties the lock registry, the acquisition policy, spectator mode and the
//! interpolation engine to one local player. The network side talks to it
//! through a [`SessionInbox`]; outgoing requests are queued on an unbounded
//! channel that the transport drains.

pub mod events;
pub mod inbox;
pub mod notice;

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::constants::spectate::MESSAGE_DURATION_MS;
use crate::lock::policy::{LockAcquisitionPolicy, LockPlan};
use crate::lock::registry::LockRegistry;
use crate::lock::spectate::SpectatingCoordinator;
use crate::lock::types::{Lock, LockKey, LockType, PlayerId};
use crate::metrics::SyncMetrics;
use crate::net::protocol::ClientMessage;
use crate::position::buffer::PositionSnapshotBuffer;
use crate::position::interpolation::{InterpolationEngine, TickSummary};
use crate::position::snapshot::PositionSnapshot;
use crate::util::unix_millis;
use crate::vessel::{VesselId, World};

pub use events::{EventBus, Subscription, SyncEvent};
pub use inbox::SessionInbox;
pub use notice::{ScreenMessageSink, TracingScreenSink};

/// Fires once every `period` seconds of simulated tick time
#[derive(Debug, Clone, Copy)]
struct Cadence {
    period: f64,
    elapsed: f64,
}

impl Cadence {
    /// Due on the first tick
    fn new(period: Duration) -> Self {
        let period = period.as_secs_f64();
        Self { period, elapsed: period }
    }

    fn due(&mut self, dt: f64) -> bool {
        // Tolerate float drift from summing many small dt values
        if self.elapsed + 1e-9 >= self.period {
            self.elapsed = dt;
            true
        } else {
            self.elapsed += dt;
            false
        }
    }

    fn fire_next(&mut self) {
        self.elapsed = self.period;
    }
}

pub struct SyncSession {
    player: PlayerId,
    registry: Arc<LockRegistry>,
    buffer: Arc<PositionSnapshotBuffer>,
    policy: LockAcquisitionPolicy,
    spectating: SpectatingCoordinator,
    engine: InterpolationEngine,
    events: Arc<EventBus>,
    /// The session's own view of lock events (control grant reaction)
    own_events: Subscription,
    outbound_tx: Sender<ClientMessage>,
    outbound_rx: Receiver<ClientMessage>,
    metrics: Arc<SyncMetrics>,
    notices: Box<dyn ScreenMessageSink>,
    lock_refresh: Cadence,
    position_send: Cadence,
    spectate_notice: Cadence,
    closed: bool,
}

impl SyncSession {
    pub fn new(config: &SyncConfig) -> Self {
        let player = config.player_id;
        let events = EventBus::new();
        let own_events = events.subscribe();
        let (outbound_tx, outbound_rx) = unbounded();

        info!("Sync session started for player {}", player);

        Self {
            player,
            registry: Arc::new(LockRegistry::new()),
            buffer: Arc::new(PositionSnapshotBuffer::new(config.snapshot_queue_capacity)),
            policy: LockAcquisitionPolicy::new(player),
            spectating: SpectatingCoordinator::new(player),
            engine: InterpolationEngine::new(config.interpolation_enabled),
            events,
            own_events,
            outbound_tx,
            outbound_rx,
            metrics: Arc::new(SyncMetrics::new()),
            notices: Box::new(TracingScreenSink::default()),
            lock_refresh: Cadence::new(config.lock_refresh_interval()),
            position_send: Cadence::new(config.position_send_interval()),
            spectate_notice: Cadence::new(config.spectate_message_interval()),
            closed: false,
        }
    }

    /// Replace the default log-backed notice sink
    pub fn with_notice_sink(mut self, sink: Box<dyn ScreenMessageSink>) -> Self {
        self.notices = sink;
        self
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// Producer handle for the transport
    pub fn inbox(&self) -> SessionInbox {
        SessionInbox {
            player: self.player,
            registry: self.registry.clone(),
            buffer: self.buffer.clone(),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Outgoing messages, drained by the transport
    pub fn outbound(&self) -> Receiver<ClientMessage> {
        self.outbound_rx.clone()
    }

    pub fn drain_outbound(&self) -> Vec<ClientMessage> {
        self.outbound_rx.try_iter().collect()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &LockRegistry {
        &self.registry
    }

    pub fn buffer(&self) -> &PositionSnapshotBuffer {
        &self.buffer
    }

    pub fn engine(&self) -> &InterpolationEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn is_spectating(&self) -> bool {
        self.spectating.is_spectating()
    }

    /// One fixed simulation tick
    pub fn tick(&mut self, world: &mut World, dt: f64) -> TickSummary {
        let started = Instant::now();

        self.react_to_lock_events(world);

        if self.lock_refresh.due(dt) {
            self.send(ClientMessage::LockListRequest);
        }

        let plan = self
            .policy
            .evaluate(&self.registry, world, self.spectating.is_spectating());
        self.execute(plan);

        let summary = self
            .engine
            .tick(world, &self.buffer, dt, self.spectating.spectated_vessel());
        self.metrics
            .record_interpolation(&summary, self.engine.tracked_count());

        if self.position_send.due(dt) {
            self.send_positions(world);
        }

        if let Some(vessel) = self.spectating.spectated_vessel() {
            if self.spectate_notice.due(dt) {
                self.post_spectate_notice(vessel);
            }
        }

        self.refresh_lock_gauge();
        self.metrics.record_tick_time(started.elapsed());
        summary
    }

    /// Enter observer mode for `vessel`
    pub fn start_spectating(&mut self, vessel: VesselId, world: &mut World) {
        let Some(plan) = self.spectating.start(vessel, &self.registry, world) else {
            return;
        };
        info!("Spectating vessel {}", vessel);
        self.execute(plan);
        self.spectate_notice.fire_next();
        self.events.publish(SyncEvent::SpectateStarted { vessel });
    }

    pub fn stop_spectating(&mut self, world: &mut World) {
        let Some(plan) = self.spectating.stop(world) else {
            return;
        };
        info!("Stopped spectating");
        self.execute(plan);
        self.notices.clear();
        self.events.publish(SyncEvent::SpectateStopped);
    }

    /// Host hook: `vessel` left the game. Releases our locks on it and
    /// drops its snapshots.
    pub fn on_vessel_removed(&mut self, vessel: VesselId, world: &mut World) {
        if self.spectating.spectated_vessel() == Some(vessel) {
            self.stop_spectating(world);
        }
        for key in [
            LockKey::Control(vessel),
            LockKey::Update(vessel),
            LockKey::UnloadedUpdate(vessel),
        ] {
            if self.registry.owned_by(&key, self.player) {
                self.release(key);
            }
        }
        self.engine.forget(vessel, &self.buffer);
        self.events.publish(SyncEvent::VesselRemoved(vessel));
    }

    /// Release every lock we own. Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let released = self.registry.release_all_owned_by(self.player);
        for lock in &released {
            self.send(ClientMessage::LockRelease { lock: lock.clone() });
            self.events.publish(SyncEvent::LockReleased(lock.clone()));
        }
        self.notices.clear();
        info!("Sync session closed, released {} locks", released.len());
    }

    fn react_to_lock_events(&mut self, world: &mut World) {
        for event in self.own_events.drain() {
            let SyncEvent::LockAcquired(lock) = event else {
                continue;
            };
            if lock.owner != self.player {
                continue;
            }
            match lock.key {
                LockKey::Control(vessel) if world.active_vessel == Some(vessel) => {
                    // Taking the controls ends observer mode before any takeover
                    if self.spectating.is_spectating() {
                        self.stop_spectating(world);
                    }
                    // Take the vessel back from whoever was updating it
                    let plan = self.policy.reacquire_controlled(vessel);
                    self.metrics
                        .forced_takeovers
                        .fetch_add(plan.acquire.len() as u64, Ordering::Relaxed);
                    self.execute(plan);
                }
                LockKey::Update(vessel) | LockKey::UnloadedUpdate(vessel) => {
                    // We simulate it now; remote samples are irrelevant
                    self.engine.forget(vessel, &self.buffer);
                }
                _ => {}
            }
        }
    }

    fn execute(&mut self, plan: LockPlan) {
        for request in plan.acquire {
            SyncMetrics::incr(&self.metrics.lock_requests);
            self.send(ClientMessage::LockAcquire {
                lock: Lock::new(request.key, self.player),
                force: request.force,
            });
        }
        for key in plan.release {
            self.release(key);
        }
    }

    /// Drop locally right away so the policy does not ask again, then tell
    /// the arbiter
    fn release(&mut self, key: LockKey) {
        if self.registry.release(&key, self.player) {
            debug!("Releasing {}", key);
        }
        SyncMetrics::incr(&self.metrics.lock_releases);
        let lock = Lock::new(key, self.player);
        self.events.publish(SyncEvent::LockReleased(lock.clone()));
        self.send(ClientMessage::LockRelease { lock });
    }

    fn send_positions(&mut self, world: &World) {
        let spectated = self.spectating.spectated_vessel();
        let now = unix_millis();
        let mut updated = self.registry.vessels_owned_by(self.player, LockType::Update);
        updated.extend(self.registry.vessels_owned_by(self.player, LockType::UnloadedUpdate));
        updated.sort_unstable();
        updated.dedup();

        for id in updated {
            if Some(id) == spectated {
                continue;
            }
            if let Some(vessel) = world.vessel(id) {
                let snapshot = PositionSnapshot::capture(vessel, world.universal_time, now);
                SyncMetrics::incr(&self.metrics.snapshots_sent);
                self.send(ClientMessage::Position(snapshot));
            }
        }
    }

    fn post_spectate_notice(&mut self, vessel: VesselId) {
        let text = match self.registry.control_owner(vessel) {
            Some(owner) => format!("Spectating {}.", owner),
            None => "Spectating.".to_string(),
        };
        self.notices
            .post(&text, Duration::from_millis(MESSAGE_DURATION_MS));
    }

    fn refresh_lock_gauge(&self) {
        let held = LockType::ALL
            .iter()
            .map(|t| self.registry.all_owned_by(self.player, *t).len())
            .sum::<usize>();
        self.metrics
            .locks_held
            .store(held as u64, Ordering::Relaxed);
    }

    fn send(&self, message: ClientMessage) {
        if self.outbound_tx.send(message).is_err() {
            warn!("Outbound queue closed, message dropped");
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::lock::SPECTATE_INPUT_LOCK;
    use crate::net::protocol::encode;
    use crate::net::relay::LockRelay;
    use crate::orbit::{CelestialBody, OrbitalElements};
    use crate::vessel::Vessel;
    use parking_lot::Mutex;
    use uuid::Uuid;

    const DT: f64 = 0.02;

    struct Peer {
        session: SyncSession,
        world: World,
        link: Receiver<Vec<u8>>,
    }

    fn kerbin_world() -> World {
        World::new(vec![
            CelestialBody::new(0, "Kerbin", 3.5316e12, 600_000.0).with_atmosphere(70_000.0)
        ])
    }

    fn orbiter(id: VesselId) -> Vessel {
        let orbit = OrbitalElements {
            eccentricity: 0.001,
            semi_major_axis: 700_000.0,
            reference_body: 0,
            ..Default::default()
        };
        let mut v = Vessel::new(id, "Orbiter", orbit);
        v.altitude = 100_000.0;
        v.latitude = 20.0;
        v
    }

    fn peer(relay: &LockRelay, vessels: &[VesselId]) -> Peer {
        peer_with(relay, vessels, SyncSession::new(&SyncConfig::default()))
    }

    fn peer_with(relay: &LockRelay, vessels: &[VesselId], session: SyncSession) -> Peer {
        let link = relay.connect(session.player());
        let mut world = kerbin_world();
        for id in vessels {
            world.add_vessel(orbiter(*id));
        }
        Peer { session, world, link }
    }

    /// Deliver everything each peer queued, then everything the relay sent
    fn pump(relay: &LockRelay, peers: &mut [&mut Peer]) {
        for p in peers.iter() {
            for msg in p.session.drain_outbound() {
                relay.submit(p.session.player(), &encode(&msg).unwrap()).unwrap();
            }
        }
        for p in peers.iter() {
            let inbox = p.session.inbox();
            for frame in p.link.try_iter() {
                inbox.handle_frame(&frame).unwrap();
            }
        }
    }

    fn step(relay: &LockRelay, peers: &mut [&mut Peer]) {
        for p in peers.iter_mut() {
            p.world.advance_time(DT);
            p.session.tick(&mut p.world, DT);
        }
        pump(relay, peers);
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<String>>>);

    impl ScreenMessageSink for RecordingSink {
        fn post(&mut self, text: &str, _duration: Duration) {
            self.0.lock().push(text.to_string());
        }
        fn clear(&mut self) {
            self.0.lock().push("<clear>".to_string());
        }
    }

    #[test]
    fn test_contended_update_lock_single_winner() {
        let relay = LockRelay::new();
        let v = Uuid::new_v4();
        let mut a = peer(&relay, &[v]);
        let mut b = peer(&relay, &[v]);

        for _ in 0..3 {
            step(&relay, &mut [&mut a, &mut b]);
        }

        let owner = relay.registry().owner(&LockKey::Update(v));
        assert_eq!(owner, Some(a.session.player()));
        assert_eq!(a.session.registry().owner(&LockKey::Update(v)), owner);
        assert_eq!(b.session.registry().owner(&LockKey::Update(v)), owner);
        assert!(b.session.metrics().lock_denials.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_control_grant_forces_update_back() {
        let relay = LockRelay::new();
        let v = Uuid::new_v4();
        let mut a = peer(&relay, &[v]);
        let mut b = peer(&relay, &[v]);

        // A picks the vessel up as a nearby loaded vessel
        step(&relay, &mut [&mut a]);
        pump(&relay, &mut [&mut a, &mut b]);
        assert_eq!(relay.registry().owner(&LockKey::Update(v)), Some(a.session.player()));

        // B switches to it: control first, then the forced update takeover
        b.world.active_vessel = Some(v);
        for _ in 0..3 {
            step(&relay, &mut [&mut a, &mut b]);
        }

        let bp = b.session.player();
        assert_eq!(relay.registry().control_owner(v), Some(bp));
        assert_eq!(relay.registry().owner(&LockKey::Update(v)), Some(bp));
        assert_eq!(relay.registry().owner(&LockKey::UnloadedUpdate(v)), Some(bp));
        assert_eq!(a.session.registry().owner(&LockKey::Update(v)), Some(bp));
    }

    #[test]
    fn test_crew_locked_with_control() {
        let relay = LockRelay::new();
        let v = Uuid::new_v4();
        let mut a = peer(&relay, &[v]);
        a.world.vessel_mut(v).unwrap().crew = vec!["Jebediah".to_string()];
        a.world.active_vessel = Some(v);

        step(&relay, &mut [&mut a]);

        let me = a.session.player();
        assert_eq!(relay.registry().owner(&LockKey::Kerbal("Jebediah".to_string())), Some(me));
        assert_eq!(relay.registry().control_owner(v), Some(me));
    }

    #[test]
    fn test_spectating_releases_updates_and_posts_notice() {
        let relay = LockRelay::new();
        let (v, w) = (Uuid::new_v4(), Uuid::new_v4());
        let mut a = peer(&relay, &[v]);
        a.world.active_vessel = Some(v);
        for _ in 0..3 {
            step(&relay, &mut [&mut a]);
        }

        let sink = RecordingSink::default();
        let session = SyncSession::new(&SyncConfig::default()).with_notice_sink(Box::new(sink.clone()));
        let mut b = peer_with(&relay, &[v, w], session);
        b.world.active_vessel = Some(v);
        step(&relay, &mut [&mut a, &mut b]);
        step(&relay, &mut [&mut a, &mut b]);
        let bp = b.session.player();
        assert_eq!(relay.registry().owner(&LockKey::Update(w)), Some(bp));

        b.session.start_spectating(v, &mut b.world);
        step(&relay, &mut [&mut a, &mut b]);
        step(&relay, &mut [&mut a, &mut b]);

        assert!(b.session.is_spectating());
        assert!(b.world.has_input_lock(SPECTATE_INPUT_LOCK));
        assert!(!b.world.can_eva);
        assert!(b.session.registry().all_owned_by(bp, LockType::Update).is_empty());
        assert!(relay.registry().all_owned_by(bp, LockType::Update).is_empty());
        assert_eq!(relay.registry().owner(&LockKey::Spectator(bp)), Some(bp));
        let expected = format!("Spectating {}.", a.session.player());
        assert!(sink.0.lock().contains(&expected));

        b.session.stop_spectating(&mut b.world);
        pump(&relay, &mut [&mut a, &mut b]);
        assert!(b.world.can_eva);
        assert!(relay.registry().spectator_lock_of(bp).is_none());
        assert_eq!(sink.0.lock().last().map(String::as_str), Some("<clear>"));
    }

    #[test]
    fn test_spectator_granted_control_stops_spectating_before_takeover() {
        let relay = LockRelay::new();
        let v = Uuid::new_v4();
        let mut a = peer(&relay, &[v]);
        a.world.active_vessel = Some(v);
        for _ in 0..3 {
            step(&relay, &mut [&mut a]);
        }

        let mut b = peer(&relay, &[v]);
        b.world.active_vessel = Some(v);
        step(&relay, &mut [&mut a, &mut b]);
        b.session.start_spectating(v, &mut b.world);
        step(&relay, &mut [&mut a, &mut b]);
        assert!(b.session.is_spectating());

        // The pilot leaves, the spectator picks up the free control lock
        relay.disconnect(a.session.player());
        pump(&relay, &mut [&mut b]);

        let bp = b.session.player();
        for _ in 0..4 {
            b.world.advance_time(DT);
            b.session.tick(&mut b.world, DT);
            let sent = b.session.drain_outbound();
            if b.session.is_spectating() {
                assert!(!sent.iter().any(|msg| matches!(
                    msg,
                    ClientMessage::LockAcquire {
                        lock: Lock { key: LockKey::Update(_) | LockKey::UnloadedUpdate(_), .. },
                        force: true,
                    }
                )));
                assert!(b.session.registry().all_owned_by(bp, LockType::Update).is_empty());
            }
            for msg in sent {
                relay.submit(bp, &encode(&msg).unwrap()).unwrap();
            }
            let inbox = b.session.inbox();
            for frame in b.link.try_iter() {
                inbox.handle_frame(&frame).unwrap();
            }
        }

        assert!(!b.session.is_spectating());
        assert!(b.world.can_eva);
        assert!(!b.world.has_input_lock(SPECTATE_INPUT_LOCK));
        assert_eq!(relay.registry().control_owner(v), Some(bp));
        assert_eq!(relay.registry().owner(&LockKey::Update(v)), Some(bp));
        assert!(relay.registry().spectator_lock_of(bp).is_none());
    }

    #[test]
    fn test_positions_flow_to_remote_peer() {
        let relay = LockRelay::new();
        let v = Uuid::new_v4();
        let mut a = peer(&relay, &[v]);
        a.world.active_vessel = Some(v);
        let mut b = peer(&relay, &[v]);
        b.world.vessel_mut(v).unwrap().latitude = -45.0;

        for _ in 0..40 {
            a.world.propagate_vessel(v);
            step(&relay, &mut [&mut a, &mut b]);
        }

        let sent = a.session.metrics().snapshots_sent.load(Ordering::Relaxed);
        assert!(sent >= 5);
        let state = b.session.engine().state(v).unwrap();
        assert!(state.target.is_some());
        assert!(b.session.metrics().segments_completed.load(Ordering::Relaxed) >= 1);
        // B's copy converged onto A's orbit
        let (pa, pb) = (a.world.vessel(v).unwrap().position, b.world.vessel(v).unwrap().position);
        assert!(pa.distance_to(pb) < 50_000.0);
    }

    #[test]
    fn test_vessel_removed_releases_locks() {
        let relay = LockRelay::new();
        let v = Uuid::new_v4();
        let mut a = peer(&relay, &[v]);
        a.world.active_vessel = Some(v);
        for _ in 0..3 {
            step(&relay, &mut [&mut a]);
        }
        let sub = a.session.subscribe();

        a.session.on_vessel_removed(v, &mut a.world);
        a.world.remove_vessel(v);
        pump(&relay, &mut [&mut a]);

        assert!(relay.registry().control_owner(v).is_none());
        assert!(!relay.registry().exists(&LockKey::Update(v)));
        assert!(sub.drain().contains(&SyncEvent::VesselRemoved(v)));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let relay = LockRelay::new();
        let v = Uuid::new_v4();
        let mut a = peer(&relay, &[v]);
        a.world.active_vessel = Some(v);
        for _ in 0..3 {
            step(&relay, &mut [&mut a]);
        }
        assert!(!relay.registry().is_empty());

        let player = a.session.player();
        let outbound = a.session.outbound();
        drop(a);
        for msg in outbound.try_iter() {
            relay.handle(player, msg);
        }

        assert!(relay.registry().all_owned_by(player, LockType::Control).is_empty());
        assert!(relay.registry().is_empty());
    }

    #[test]
    fn test_lock_refresh_requested_on_cadence() {
        let config = SyncConfig {
            lock_refresh_interval_ms: 100,
            ..Default::default()
        };
        let mut session = SyncSession::new(&config);
        let mut world = kerbin_world();

        let mut requests = 0;
        for _ in 0..11 {
            session.tick(&mut world, DT);
            requests += session
                .drain_outbound()
                .iter()
                .filter(|m| matches!(m, ClientMessage::LockListRequest))
                .count();
        }
        // Ticks 1, 6 and 11 (every 0.1 s at 50 Hz)
        assert_eq!(requests, 3);
    }
}
