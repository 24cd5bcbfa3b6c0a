//! Snapshot interpolation
//!
//! Every tick each tracked vessel moves a fraction of the way from its
//! `source` (the pose rendered when the current segment began) towards its
//! `target` (the next received snapshot). Orbits are blended as state
//! vectors evaluated at the interpolated time, never as raw elements.
//!
//! Tick order per vessel: dequeue a new target when the segment is done,
//! advance progress, apply. The dequeue tick is the first tick of the new
//! segment.

use hashbrown::HashMap;
use rustc_hash::FxHashSet;
use tracing::{debug, error, info, warn};

use crate::constants::interpolation::BODY_SWITCH_PROGRESS;
use crate::orbit::body::wrap_longitude;
use crate::orbit::{CelestialBody, Orbit, OrbitError, OrbitalElements};
use crate::position::buffer::PositionSnapshotBuffer;
use crate::position::snapshot::PositionSnapshot;
use crate::util::quat::Quat;
use crate::util::vec3::{lerp, Vec3};
use crate::vessel::{PersistedState, Situation, Vessel, VesselId, World};

/// Progress this close to 1 counts as a finished segment
const PROGRESS_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingPhase {
    /// No target yet, or a single target and nothing to move towards
    AwaitingFirstTarget,
    Interpolating,
}

/// Per-vessel interpolation segment
#[derive(Debug, Clone)]
pub struct InterpolationState {
    /// Live pose captured when the segment started
    pub source: Option<PositionSnapshot>,
    pub target: Option<PositionSnapshot>,
    /// Fraction of the segment elapsed, in [0, 1]
    pub progress: f64,
    /// Reference body used for the last apply
    pub body_index: i32,
}

impl Default for InterpolationState {
    fn default() -> Self {
        Self {
            source: None,
            target: None,
            // A fresh state is "finished" so the first tick dequeues
            progress: 1.0,
            body_index: -1,
        }
    }
}

impl InterpolationState {
    pub fn phase(&self) -> TrackingPhase {
        if self.source.is_some() && self.target.is_some() {
            TrackingPhase::Interpolating
        } else {
            TrackingPhase::AwaitingFirstTarget
        }
    }

    #[inline]
    pub fn is_segment_finished(&self) -> bool {
        self.progress >= 1.0
    }

    /// Reference body for the current progress: hard switch at the midpoint
    pub fn selected_body(&self) -> Option<i32> {
        let (source, target) = (self.source.as_ref()?, self.target.as_ref()?);
        Some(if self.progress < BODY_SWITCH_PROGRESS {
            source.body_index
        } else {
            target.body_index
        })
    }

    fn advance(&mut self, dt: f64) -> bool {
        let (Some(source), Some(target)) = (self.source.as_ref(), self.target.as_ref()) else {
            return false;
        };
        let duration = target.game_time - source.game_time;
        let progress = if duration > 0.0 {
            (self.progress + dt / duration).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.progress = if progress >= 1.0 - PROGRESS_EPSILON { 1.0 } else { progress };
        self.is_segment_finished()
    }
}

/// Why a vessel stopped being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    MissingVessel,
    Destroyed,
    UnknownBody(i32),
}

/// Failure while writing an interpolated pose. The vessel keeps its last
/// valid pose either way.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplyError {
    /// Bad input data or numerics; expected occasionally
    #[error("Recoverable anomaly: {0}")]
    Anomaly(String),
    /// Broken engine invariant
    #[error("Logic defect: {0}")]
    Defect(String),
}

impl From<OrbitError> for ApplyError {
    fn from(e: OrbitError) -> Self {
        ApplyError::Anomaly(e.to_string())
    }
}

/// Result of one vessel's tick
#[derive(Debug, Clone, PartialEq)]
pub enum VesselOutcome {
    /// Pose written; `finished` is set on the tick the segment completed
    Applied { finished: bool },
    /// First target stored, nothing to move towards yet
    Awaiting,
    /// Segment done and the queue is empty; last pose kept
    Starved,
    /// Direct mode with no new snapshot
    Held,
    Removed(RemovalReason),
    /// Apply failed and the last pose was kept. `finished` still reports a
    /// segment that completed on this tick.
    Skipped { error: ApplyError, finished: bool },
}

/// Aggregate of one engine tick
#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    pub applied: usize,
    pub finished: usize,
    pub awaiting: usize,
    pub starved: usize,
    pub held: usize,
    pub anomalies: usize,
    pub defects: usize,
    pub removed: Vec<(VesselId, RemovalReason)>,
}

impl TickSummary {
    fn record(&mut self, id: VesselId, outcome: &VesselOutcome) {
        match outcome {
            VesselOutcome::Applied { finished } => {
                self.applied += 1;
                if *finished {
                    self.finished += 1;
                }
            }
            VesselOutcome::Awaiting => self.awaiting += 1,
            VesselOutcome::Starved => self.starved += 1,
            VesselOutcome::Held => self.held += 1,
            VesselOutcome::Removed(reason) => self.removed.push((id, *reason)),
            VesselOutcome::Skipped { error, finished } => {
                match error {
                    ApplyError::Anomaly(_) => self.anomalies += 1,
                    ApplyError::Defect(_) => self.defects += 1,
                }
                if *finished {
                    self.finished += 1;
                }
            }
        }
    }
}

/// Blended values for one apply
struct Blend {
    ut: f64,
    progress: f64,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    height_from_terrain: f64,
    terrain_normal: Vec3,
    velocity: Vec3,
    rotation: Quat,
    position: Vec3,
    orbit: OrbitalElements,
}

#[derive(Debug)]
pub struct InterpolationEngine {
    states: HashMap<VesselId, InterpolationState>,
    enabled: bool,
}

impl Default for InterpolationEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InterpolationEngine {
    /// `enabled = false` selects direct apply: newest snapshot, no blending
    pub fn new(enabled: bool) -> Self {
        Self {
            states: HashMap::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn state(&self, vessel: VesselId) -> Option<&InterpolationState> {
        self.states.get(&vessel)
    }

    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }

    /// Stop tracking a vessel and drop its queued snapshots
    pub fn forget(&mut self, vessel: VesselId, buffer: &PositionSnapshotBuffer) {
        self.states.remove(&vessel);
        buffer.remove(vessel);
    }

    /// Advance every vessel that has a queue or a segment in flight.
    /// One vessel's failure never stops the others.
    pub fn tick(
        &mut self,
        world: &mut World,
        buffer: &PositionSnapshotBuffer,
        dt: f64,
        spectated: Option<VesselId>,
    ) -> TickSummary {
        let mut ids: FxHashSet<VesselId> = buffer.vessel_ids().into_iter().collect();
        ids.extend(self.states.keys().copied());

        let mut summary = TickSummary::default();
        for id in ids {
            let outcome = self.tick_vessel(id, world, buffer, dt, spectated);
            summary.record(id, &outcome);
        }
        summary
    }

    pub fn tick_vessel(
        &mut self,
        id: VesselId,
        world: &mut World,
        buffer: &PositionSnapshotBuffer,
        dt: f64,
        spectated: Option<VesselId>,
    ) -> VesselOutcome {
        match world.vessel(id) {
            None => return self.remove(id, buffer, RemovalReason::MissingVessel),
            Some(v) if v.dead => return self.remove(id, buffer, RemovalReason::Destroyed),
            Some(_) => {}
        }

        if !self.enabled {
            return self.tick_direct(id, world, buffer, spectated);
        }

        let state = self.states.entry(id).or_default();
        if state.is_segment_finished() {
            let Some(next) = buffer.dequeue(id) else {
                warn!("Snapshot queue empty for vessel {}, holding last state", id);
                return VesselOutcome::Starved;
            };

            let Some(previous) = state.target.replace(next) else {
                debug!("First snapshot for vessel {} at {}", id, next.game_time);
                return VesselOutcome::Awaiting;
            };

            if let Some(vessel) = world.vessel_mut(id) {
                // The frame just rendered becomes the new origin
                state.source = Some(PositionSnapshot::capture(vessel, previous.game_time, 0));
                persist_target(vessel, &next);
            }
            state.progress = 0.0;
        }

        let finished = state.advance(dt);
        let Some(body_index) = state.selected_body() else {
            return log_skipped(id, ApplyError::Defect("segment without source or target".into()), finished);
        };
        let Some(body) = world.body(body_index).cloned() else {
            return self.remove(id, buffer, RemovalReason::UnknownBody(body_index));
        };
        state.body_index = body_index;

        let (Some(source), Some(target)) = (state.source, state.target) else {
            return log_skipped(id, ApplyError::Defect("segment without source or target".into()), finished);
        };
        match apply(world, id, &body, &source, &target, state.progress, spectated) {
            Ok(()) => VesselOutcome::Applied { finished },
            Err(e) => log_skipped(id, e, finished),
        }
    }

    /// Direct mode: jump to the newest snapshot
    fn tick_direct(
        &mut self,
        id: VesselId,
        world: &mut World,
        buffer: &PositionSnapshotBuffer,
        spectated: Option<VesselId>,
    ) -> VesselOutcome {
        let Some(latest) = buffer.dequeue_latest(id) else {
            return VesselOutcome::Held;
        };
        let Some(body) = world.body(latest.body_index).cloned() else {
            return self.remove(id, buffer, RemovalReason::UnknownBody(latest.body_index));
        };

        let state = self.states.entry(id).or_default();
        state.source = Some(latest);
        state.target = Some(latest);
        state.progress = 1.0;
        state.body_index = latest.body_index;

        if let Some(vessel) = world.vessel_mut(id) {
            persist_target(vessel, &latest);
        }
        match apply(world, id, &body, &latest, &latest, 1.0, spectated) {
            Ok(()) => VesselOutcome::Applied { finished: true },
            Err(e) => log_skipped(id, e, true),
        }
    }

    fn remove(&mut self, id: VesselId, buffer: &PositionSnapshotBuffer, reason: RemovalReason) -> VesselOutcome {
        info!("Dropping vessel {} from interpolation: {:?}", id, reason);
        self.forget(id, buffer);
        VesselOutcome::Removed(reason)
    }
}

fn log_skipped(id: VesselId, error: ApplyError, finished: bool) -> VesselOutcome {
    match &error {
        ApplyError::Anomaly(msg) => warn!("Skipped apply for vessel {}: {}", id, msg),
        ApplyError::Defect(msg) => error!("Interpolation defect for vessel {}: {}", id, msg),
    }
    VesselOutcome::Skipped { error, finished }
}

/// Overwrite the save record with the authoritative target
fn persist_target(vessel: &mut Vessel, target: &PositionSnapshot) {
    vessel.persisted = PersistedState {
        latitude: target.latitude(),
        longitude: target.longitude(),
        altitude: target.altitude(),
        height_from_terrain: target.height_from_terrain as f64,
        terrain_normal: target.terrain_normal,
        surface_rotation: target.rotation(),
        orbit: target.orbit,
    };
}

fn lerp_longitude(a: f64, b: f64, t: f64) -> f64 {
    wrap_longitude(a + wrap_longitude(b - a) * t)
}

fn blend(
    body: &CelestialBody,
    source: &PositionSnapshot,
    target: &PositionSnapshot,
    progress: f64,
) -> Result<Blend, ApplyError> {
    if !(0.0..=1.0).contains(&progress) {
        return Err(ApplyError::Defect(format!("progress {} outside [0, 1]", progress)));
    }
    let ut = lerp(source.game_time, target.game_time, progress);

    let mu = body.gravitational_parameter;
    let (p0, v0) = Orbit::new(source.orbit, mu)?.state_at(ut)?;
    let (p1, v1) = Orbit::new(target.orbit, mu)?.state_at(ut)?;
    let position = p0.lerp(p1, progress);
    let orbit_velocity = v0.lerp(v1, progress);
    let orbit = Orbit::from_state_vectors(position, orbit_velocity, mu, ut, body.index)?.elements;

    Ok(Blend {
        ut,
        progress,
        latitude: lerp(source.latitude(), target.latitude(), progress),
        longitude: lerp_longitude(source.longitude(), target.longitude(), progress),
        altitude: lerp(source.altitude(), target.altitude(), progress),
        height_from_terrain: lerp(
            source.height_from_terrain as f64,
            target.height_from_terrain as f64,
            progress,
        ),
        terrain_normal: source.terrain_normal.lerp(target.terrain_normal, progress).normalize(),
        velocity: source.velocity.lerp(target.velocity, progress),
        rotation: source.rotation().slerp(target.rotation(), progress),
        position,
        orbit,
    })
}

/// Write the blended pose onto a copy of the vessel and commit it only if
/// the result is finite
fn apply(
    world: &mut World,
    id: VesselId,
    body: &CelestialBody,
    source: &PositionSnapshot,
    target: &PositionSnapshot,
    progress: f64,
    spectated: Option<VesselId>,
) -> Result<(), ApplyError> {
    let b = blend(body, source, target, progress)?;

    let vessel = world
        .vessel_mut(id)
        .ok_or_else(|| ApplyError::Defect(format!("vessel {} vanished mid-tick", id)))?;
    let mut next = vessel.clone();

    if next.is_eva {
        apply_eva(&mut next, body, target, &b);
    } else if next.loaded {
        apply_loaded(&mut next, body, &b, spectated == Some(id));
    } else {
        apply_unloaded(&mut next, body, target, &b)?;
    }

    if !next.is_pose_finite() {
        return Err(ApplyError::Anomaly(format!(
            "non-finite pose at progress {:.3}",
            b.progress
        )));
    }
    *vessel = next;
    Ok(())
}

fn apply_loaded(v: &mut Vessel, body: &CelestialBody, b: &Blend, spectated: bool) {
    v.orbit = b.orbit;
    v.velocity = b.velocity;
    v.terrain_normal = b.terrain_normal;
    v.altitude = b.altitude;
    v.height_from_terrain = b.height_from_terrain;
    v.refresh_situation(body);

    if v.landed_or_splashed() {
        v.latitude = b.latitude;
        v.longitude = b.longitude;
        v.set_surface_position(body, b.ut);
    } else {
        v.position = b.position;
        v.reference_transform = b.position;
        v.update_pos_vel(body, b.ut);
    }

    v.set_rotation(body, b.ut, b.rotation);
    v.resume_part_velocity();
    if spectated {
        v.recalculate_physics_stats();
    }
}

fn apply_unloaded(
    v: &mut Vessel,
    body: &CelestialBody,
    target: &PositionSnapshot,
    b: &Blend,
) -> Result<(), ApplyError> {
    // Blending lat/lon on unloaded vessels jitters on the map view
    v.latitude = target.latitude();
    v.longitude = target.longitude();
    v.altitude = target.altitude();
    v.height_from_terrain = target.height_from_terrain as f64;
    v.terrain_normal = target.terrain_normal;

    v.orbit = b.orbit;
    v.velocity = b.velocity;
    v.update_from_orbit(body, b.ut)?;
    v.refresh_situation(body);
    if v.landed_or_splashed() {
        v.set_surface_position(body, b.ut);
    }
    v.set_rotation(body, b.ut, b.rotation);
    Ok(())
}

fn apply_eva(v: &mut Vessel, body: &CelestialBody, target: &PositionSnapshot, b: &Blend) {
    v.latitude = target.latitude();
    v.longitude = target.longitude();
    v.altitude = target.altitude();
    v.height_from_terrain = target.height_from_terrain as f64;
    v.velocity = target.velocity;

    v.orbit = b.orbit;
    v.position = b.position;
    v.reference_transform = b.position;
    v.set_rotation(body, b.ut, b.rotation);

    v.refresh_situation(body);
    if v.situation < Situation::Flying {
        v.set_surface_position(body, b.ut);
    }
}
