use crossbeam_channel::Receiver;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use vessel_sync::config::SyncConfig;
use vessel_sync::net::protocol::encode;
use vessel_sync::net::relay::LockRelay;
use vessel_sync::orbit::{CelestialBody, OrbitalElements};
use vessel_sync::session::SyncSession;
use vessel_sync::vessel::{Vessel, VesselId, World};

/// One simulated client attached to the relay
struct Peer {
    name: &'static str,
    session: SyncSession,
    world: World,
    link: Receiver<Vec<u8>>,
}

impl Peer {
    fn new(name: &'static str, config: &SyncConfig, relay: &LockRelay, vessel: VesselId) -> Self {
        let session = SyncSession::new(config);
        let link = relay.connect(session.player());
        let mut world = World::new(vec![CelestialBody::new(0, "Kerbin", 3.5316e12, 600_000.0)
            .with_rotation(21_549.425, 0.0)
            .with_atmosphere(70_000.0)]);

        let orbit = OrbitalElements {
            semi_major_axis: 700_000.0,
            eccentricity: 0.01,
            inclination: 0.1,
            reference_body: 0,
            ..Default::default()
        };
        world.add_vessel(Vessel::new(vessel, "Demo Orbiter", orbit));
        world.propagate_vessel(vessel);

        Self {
            name,
            session,
            world,
            link,
        }
    }

    /// Ship queued requests to the relay
    fn flush(&self, relay: &LockRelay) {
        for message in self.session.drain_outbound() {
            match encode(&message) {
                Ok(frame) => {
                    if let Err(e) = relay.submit(self.session.player(), &frame) {
                        warn!("[{}] Relay rejected frame: {}", self.name, e);
                    }
                }
                Err(e) => error!("[{}] Failed to encode {:?}: {}", self.name, message, e),
            }
        }
    }

    /// Apply whatever the relay sent back
    fn receive(&self) {
        let inbox = self.session.inbox();
        for frame in self.link.try_iter() {
            if let Err(e) = inbox.handle_frame(&frame) {
                warn!("[{}] Dropped malformed frame: {}", self.name, e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Vessel Sync demo v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = SyncConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: {} Hz, send every {} ms, queue {}, interpolation={}",
        config.tick_rate_hz,
        config.position_send_interval_ms,
        config.snapshot_queue_capacity,
        config.interpolation_enabled
    );

    let packet_loss: f64 = std::env::var("DEMO_PACKET_LOSS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);
    let duration_secs: u64 = std::env::var("DEMO_DURATION_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let relay = LockRelay::new().with_position_loss(packet_loss);
    let vessel = Uuid::new_v4();

    // A flies the vessel, B watches it from the same region
    let mut pilot = Peer::new(
        "pilot",
        &SyncConfig {
            player_id: Uuid::new_v4(),
            ..config.clone()
        },
        &relay,
        vessel,
    );
    pilot.world.active_vessel = Some(vessel);
    let mut observer = Peer::new(
        "observer",
        &SyncConfig {
            player_id: Uuid::new_v4(),
            ..config.clone()
        },
        &relay,
        vessel,
    );

    #[cfg(feature = "metrics_server")]
    {
        let metrics = observer.session.metrics().clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = vessel_sync::metrics::start_metrics_server(metrics, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let dt = config.tick_dt();
    let total_ticks = duration_secs * u64::from(config.tick_rate_hz);
    let mut interval = tokio::time::interval(config.tick_duration());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Running {} ticks ({} s) with {:.0}% position loss",
        total_ticks,
        duration_secs,
        packet_loss * 100.0
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };
    tokio::pin!(shutdown);

    let mut tick: u64 = 0;
    while tick < total_ticks {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
        }
        tick += 1;

        for peer in [&mut pilot, &mut observer] {
            peer.world.advance_time(dt);
            if peer.world.active_vessel == Some(vessel) {
                peer.world.propagate_vessel(vessel);
            }
            peer.session.tick(&mut peer.world, dt);
        }

        pilot.flush(&relay);
        observer.flush(&relay);
        pilot.receive();
        observer.receive();

        if tick % u64::from(config.tick_rate_hz) == 0 {
            if let (Some(real), Some(seen)) =
                (pilot.world.vessel(vessel), observer.world.vessel(vessel))
            {
                info!(
                    "t={:.1}s pilot alt={:.0} m, observer alt={:.0} m, drift={:.1} m",
                    pilot.world.universal_time,
                    real.altitude,
                    seen.altitude,
                    real.position.distance_to(seen.position)
                );
            }
        }
    }

    // Cleanup: release locks and let the relay see the releases
    pilot.session.shutdown();
    observer.session.shutdown();
    pilot.flush(&relay);
    observer.flush(&relay);

    let m = observer.session.metrics();
    info!(
        "Observer: {} snapshots accepted, {} rejected, {} segments completed, {} starved ticks",
        m.snapshots_accepted.load(Ordering::Relaxed),
        m.snapshots_rejected.load(Ordering::Relaxed),
        m.segments_completed.load(Ordering::Relaxed),
        m.starved_ticks.load(Ordering::Relaxed)
    );
    let m = pilot.session.metrics();
    info!(
        "Pilot: {} snapshots sent, {} lock requests, {} forced takeovers",
        m.snapshots_sent.load(Ordering::Relaxed),
        m.lock_requests.load(Ordering::Relaxed),
        m.forced_takeovers.load(Ordering::Relaxed)
    );
    info!("Relay holds {} locks after shutdown", relay.registry().len());

    Ok(())
}
