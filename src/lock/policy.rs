//! Per-tick lock acquisition policy for the local player
//!
//! Each peer derives its candidates from what it can see locally and fires
//! non-blocking requests; the registry resolves races first-come-first-served.
//! A lost race is simply retried on a later tick while the candidate persists.
//! `force` is only produced by [`LockAcquisitionPolicy::reacquire_controlled`].

use smallvec::SmallVec;

use crate::lock::registry::LockRegistry;
use crate::lock::types::{LockKey, LockRequest, LockType, PlayerId};
use crate::vessel::{Vessel, VesselId, World};

/// Requests to send and locks to drop this tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockPlan {
    pub acquire: SmallVec<[LockRequest; 8]>,
    pub release: SmallVec<[LockKey; 8]>,
}

impl LockPlan {
    pub fn is_empty(&self) -> bool {
        self.acquire.is_empty() && self.release.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LockAcquisitionPolicy {
    player: PlayerId,
}

impl LockAcquisitionPolicy {
    pub fn new(player: PlayerId) -> Self {
        Self { player }
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// Compute this tick's acquire/release plan
    pub fn evaluate(&self, registry: &LockRegistry, world: &World, spectating: bool) -> LockPlan {
        let mut plan = LockPlan::default();

        plan.acquire.extend(self.control_candidates(registry, world));

        for id in self.update_candidates(registry, world, spectating) {
            plan.acquire.push(LockRequest::new(LockKey::Update(id)));
        }
        for id in self.unloaded_update_candidates(registry, world, spectating) {
            plan.acquire.push(LockRequest::new(LockKey::UnloadedUpdate(id)));
        }

        plan.release.extend(self.release_candidates(registry, world, spectating));
        plan
    }

    /// Control lock for the active vessel plus its crew, when nobody controls it
    pub fn control_candidates(&self, registry: &LockRegistry, world: &World) -> Vec<LockRequest> {
        let Some(active) = world.active() else {
            return Vec::new();
        };
        if active.dead || registry.exists(&LockKey::Control(active.id)) {
            return Vec::new();
        }

        let mut requests = vec![LockRequest::new(LockKey::Control(active.id))];
        requests.extend(
            active
                .crew
                .iter()
                .map(|name| LockKey::Kerbal(name.clone()))
                .filter(|key| !registry.exists(key))
                .map(LockRequest::new),
        );
        requests
    }

    /// Active vessel plus nearby loaded vessels nobody updates yet
    pub fn update_candidates(&self, registry: &LockRegistry, world: &World, spectating: bool) -> Vec<VesselId> {
        if spectating {
            return Vec::new();
        }

        let active_id = world.active_vessel;
        let mut candidates = Vec::new();

        if let Some(active) = world.active() {
            if !active.dead && !registry.exists(&LockKey::Update(active.id)) {
                candidates.push(active.id);
            }
        }

        candidates.extend(
            world
                .loaded_vessels()
                .filter(|v| Some(v.id) != active_id)
                .filter(|v| !v.dead && !world.is_in_safety_bubble(v))
                .filter(|v| !registry.exists(&LockKey::Update(v.id)))
                .map(|v| v.id),
        );
        candidates
    }

    /// Unloaded vessels in flight that nobody propagates
    pub fn unloaded_update_candidates(
        &self,
        registry: &LockRegistry,
        world: &World,
        spectating: bool,
    ) -> Vec<VesselId> {
        if spectating {
            return Vec::new();
        }

        let active_id = world.active_vessel;
        world
            .vessels()
            .filter(|v| !v.loaded && !v.dead && Some(v.id) != active_id)
            // Landed vessels need no propagation while unloaded
            .filter(|v| !v.landed_or_splashed())
            .filter(|v| !world.is_in_safety_bubble(v))
            .filter(|v| {
                !registry.exists(&LockKey::UnloadedUpdate(v.id)) && !registry.exists(&LockKey::Update(v.id))
            })
            .map(|v| v.id)
            .collect()
    }

    /// Locks the local player should stop holding
    pub fn release_candidates(&self, registry: &LockRegistry, world: &World, spectating: bool) -> Vec<LockKey> {
        if spectating {
            // An observer never simulates anything
            return registry
                .all_owned_by(self.player, LockType::Update)
                .into_iter()
                .chain(registry.all_owned_by(self.player, LockType::UnloadedUpdate))
                .map(|lock| lock.key)
                .collect();
        }

        let active_id = world.active_vessel;
        let should_release = |v: &Vessel| !v.loaded || v.dead || world.is_in_safety_bubble(v);

        registry
            .vessels_owned_by(self.player, LockType::Update)
            .into_iter()
            .filter(|id| Some(*id) != active_id)
            .filter(|id| world.vessel(*id).is_some_and(should_release))
            .map(LockKey::Update)
            .collect()
    }

    /// Forced Update + UnloadedUpdate requests after gaining control of `vessel`.
    /// Takes the vessel back from a stale or disconnected updater.
    pub fn reacquire_controlled(&self, vessel: VesselId) -> LockPlan {
        let mut plan = LockPlan::default();
        plan.acquire.push(LockRequest::forced(LockKey::Update(vessel)));
        plan.acquire.push(LockRequest::forced(LockKey::UnloadedUpdate(vessel)));
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orbit::{CelestialBody, OrbitalElements};
    use crate::vessel::{SafetyBubble, Situation};
    use uuid::Uuid;

    struct Fixture {
        world: World,
        registry: LockRegistry,
        me: PlayerId,
        other: PlayerId,
    }

    fn vessel(loaded: bool) -> Vessel {
        let orbit = OrbitalElements {
            semi_major_axis: 700_000.0,
            reference_body: 1,
            ..Default::default()
        };
        let mut v = Vessel::new(Uuid::new_v4(), "V", orbit);
        v.loaded = loaded;
        v.altitude = 100_000.0;
        v.latitude = 10.0;
        v.longitude = 10.0;
        v
    }

    fn fixture() -> Fixture {
        let mut world = World::new(vec![
            CelestialBody::new(0, "Sun", 1.1723e18, 261_600_000.0),
            CelestialBody::new(1, "Kerbin", 3.5316e12, 600_000.0),
        ]);
        world.safety_bubbles.push(SafetyBubble::new(1, 0.0, 0.0, 100.0));
        Fixture {
            world,
            registry: LockRegistry::new(),
            me: Uuid::new_v4(),
            other: Uuid::new_v4(),
        }
    }

    fn add(f: &mut Fixture, v: Vessel) -> VesselId {
        let id = v.id;
        f.world.add_vessel(v);
        id
    }

    #[test]
    fn test_candidate_sets_active_nearby_far_landed() {
        let mut f = fixture();
        let a = add(&mut f, vessel(true));
        let b = add(&mut f, vessel(true));
        let locked_by_other = add(&mut f, vessel(true));
        let mut landed = vessel(false);
        landed.situation = Situation::Landed;
        let c = add(&mut f, landed);

        f.world.active_vessel = Some(a);
        f.registry.acquire(LockKey::Update(a), f.me, false).unwrap();
        f.registry.acquire(LockKey::Update(locked_by_other), f.other, false).unwrap();

        let policy = LockAcquisitionPolicy::new(f.me);
        let update = policy.update_candidates(&f.registry, &f.world, false);
        assert!(update.contains(&b));
        assert!(!update.contains(&a));
        assert!(!update.contains(&locked_by_other));

        let unloaded = policy.unloaded_update_candidates(&f.registry, &f.world, false);
        assert!(!unloaded.contains(&c));
    }

    #[test]
    fn test_unloaded_flying_vessel_is_candidate() {
        let mut f = fixture();
        let far = add(&mut f, vessel(false));
        let policy = LockAcquisitionPolicy::new(f.me);

        assert_eq!(policy.unloaded_update_candidates(&f.registry, &f.world, false), vec![far]);

        f.registry.acquire(LockKey::Update(far), f.other, false).unwrap();
        assert!(policy.unloaded_update_candidates(&f.registry, &f.world, false).is_empty());
    }

    #[test]
    fn test_safety_bubble_excluded() {
        let mut f = fixture();
        let mut pad = vessel(true);
        pad.latitude = 0.0;
        pad.longitude = 0.0;
        pad.altitude = 10.0;
        let pad = add(&mut f, pad);

        let policy = LockAcquisitionPolicy::new(f.me);
        assert!(!policy.update_candidates(&f.registry, &f.world, false).contains(&pad));
    }

    #[test]
    fn test_dead_vessels_excluded() {
        let mut f = fixture();
        let mut wreck = vessel(true);
        wreck.dead = true;
        add(&mut f, wreck);

        let policy = LockAcquisitionPolicy::new(f.me);
        assert!(policy.update_candidates(&f.registry, &f.world, false).is_empty());
    }

    #[test]
    fn test_control_candidates_include_crew() {
        let mut f = fixture();
        let mut v = vessel(true);
        v.crew = vec!["Jebediah".to_string(), "Bill".to_string()];
        let id = add(&mut f, v);
        f.world.active_vessel = Some(id);
        f.registry.acquire(LockKey::Kerbal("Bill".to_string()), f.other, false).unwrap();

        let policy = LockAcquisitionPolicy::new(f.me);
        let requests = policy.control_candidates(&f.registry, &f.world);
        assert_eq!(
            requests,
            vec![
                LockRequest::new(LockKey::Control(id)),
                LockRequest::new(LockKey::Kerbal("Jebediah".to_string())),
            ]
        );

        f.registry.acquire(LockKey::Control(id), f.other, false).unwrap();
        assert!(policy.control_candidates(&f.registry, &f.world).is_empty());
    }

    #[test]
    fn test_spectating_empties_update_sets_and_releases_everything() {
        let mut f = fixture();
        let a = add(&mut f, vessel(true));
        let b = add(&mut f, vessel(false));
        add(&mut f, vessel(true));
        f.world.active_vessel = Some(a);
        f.registry.acquire(LockKey::Update(a), f.me, false).unwrap();
        f.registry.acquire(LockKey::UnloadedUpdate(b), f.me, false).unwrap();

        let policy = LockAcquisitionPolicy::new(f.me);
        let plan = policy.evaluate(&f.registry, &f.world, true);

        assert!(plan
            .acquire
            .iter()
            .all(|r| !matches!(r.key, LockKey::Update(_) | LockKey::UnloadedUpdate(_))));
        assert_eq!(plan.release.len(), 2);
        assert!(plan.release.contains(&LockKey::Update(a)));
        assert!(plan.release.contains(&LockKey::UnloadedUpdate(b)));
    }

    #[test]
    fn test_release_when_vessel_unloads_or_dies() {
        let mut f = fixture();
        let active = add(&mut f, vessel(true));
        let unloaded = add(&mut f, vessel(false));
        let mut dead = vessel(true);
        dead.dead = true;
        let dead = add(&mut f, dead);
        let still_near = add(&mut f, vessel(true));
        f.world.active_vessel = Some(active);

        for id in [active, unloaded, dead, still_near] {
            f.registry.acquire(LockKey::Update(id), f.me, false).unwrap();
        }

        let policy = LockAcquisitionPolicy::new(f.me);
        let mut release = policy.release_candidates(&f.registry, &f.world, false);
        release.sort_by_key(|k| k.vessel_id());
        let mut expected = vec![LockKey::Update(unloaded), LockKey::Update(dead)];
        expected.sort_by_key(|k| k.vessel_id());
        assert_eq!(release, expected);
    }

    #[test]
    fn test_no_force_in_ordinary_plan() {
        let mut f = fixture();
        let a = add(&mut f, vessel(true));
        add(&mut f, vessel(true));
        add(&mut f, vessel(false));
        f.world.active_vessel = Some(a);

        let plan = LockAcquisitionPolicy::new(f.me).evaluate(&f.registry, &f.world, false);
        assert!(!plan.acquire.is_empty());
        assert!(plan.acquire.iter().all(|r| !r.force));
    }

    #[test]
    fn test_reacquire_controlled_is_forced() {
        let v = Uuid::new_v4();
        let plan = LockAcquisitionPolicy::new(Uuid::new_v4()).reacquire_controlled(v);
        assert_eq!(plan.acquire.len(), 2);
        assert!(plan.acquire.iter().all(|r| r.force));
    }
}
