//! In-process lock arbiter and position fan-out
//!
//! Stands in for the multiplayer server: peers submit encoded
//! [`ClientMessage`] frames and receive encoded [`ServerMessage`] frames on
//! their own unbounded channel. Lock requests are resolved against the
//! relay's registry in arrival order.

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::lock::registry::{AcquireOutcome, LockError, LockRegistry};
use crate::lock::types::{Lock, LockKey, PlayerId};
use crate::net::protocol::{decode, encode, ClientMessage, DecodeError, ServerMessage};

#[derive(Debug, Default)]
pub struct LockRelay {
    registry: LockRegistry,
    peers: Mutex<HashMap<PlayerId, Sender<Vec<u8>>>>,
    /// Probability of dropping a relayed position message
    position_loss: f64,
}

impl LockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop relayed positions with probability `rate` to mimic a lossy link
    pub fn with_position_loss(mut self, rate: f64) -> Self {
        self.position_loss = rate.clamp(0.0, 1.0);
        self
    }

    pub fn registry(&self) -> &LockRegistry {
        &self.registry
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Register a peer and return its inbound frame stream
    pub fn connect(&self, player: PlayerId) -> Receiver<Vec<u8>> {
        let (tx, rx) = unbounded();
        self.peers.lock().insert(player, tx);
        info!("Peer {} connected to relay", player);
        rx
    }

    /// Remove a peer, releasing and announcing every lock it held
    pub fn disconnect(&self, player: PlayerId) -> Vec<Lock> {
        self.peers.lock().remove(&player);
        let released = self.registry.release_all_owned_by(player);
        for lock in &released {
            self.broadcast(&ServerMessage::LockReleased { lock: lock.clone() });
        }
        info!("Peer {} disconnected, released {} locks", player, released.len());
        released
    }

    /// Decode and handle one frame from `from`
    pub fn submit(&self, from: PlayerId, frame: &[u8]) -> Result<(), DecodeError> {
        let message: ClientMessage = decode(frame)?;
        self.handle(from, message);
        Ok(())
    }

    pub fn handle(&self, from: PlayerId, message: ClientMessage) {
        match message {
            ClientMessage::LockAcquire { lock, force } => self.handle_acquire(from, lock, force),
            ClientMessage::LockRelease { lock } => {
                // Only the owner can release; the claimed owner is ignored
                if self.registry.release(&lock.key, from) {
                    debug!("Relay released {} for {}", lock.key, from);
                    self.broadcast(&ServerMessage::LockReleased {
                        lock: Lock::new(lock.key, from),
                    });
                }
            }
            ClientMessage::LockListRequest => {
                self.send_to(
                    from,
                    &ServerMessage::LockList {
                        locks: self.registry.snapshot(),
                    },
                );
            }
            ClientMessage::Position(snapshot) => {
                let vessel = snapshot.vessel_id;
                let is_updater = self.registry.owned_by(&LockKey::Update(vessel), from)
                    || self.registry.owned_by(&LockKey::UnloadedUpdate(vessel), from);
                if !is_updater {
                    debug!("Dropping position for {} from non-updater {}", vessel, from);
                    return;
                }
                if self.position_loss > 0.0 && rand::thread_rng().gen_bool(self.position_loss) {
                    return;
                }
                self.broadcast_except(&ServerMessage::Position(snapshot), from);
            }
        }
    }

    fn handle_acquire(&self, from: PlayerId, lock: Lock, force: bool) {
        match self.registry.acquire(lock.key.clone(), from, force) {
            Ok(AcquireOutcome::AlreadyHeld) => {
                // Re-announce so a peer that missed the grant converges
                self.send_to(
                    from,
                    &ServerMessage::LockAcquired {
                        lock: Lock::new(lock.key, from),
                        force,
                    },
                );
            }
            Ok(outcome) => {
                if let AcquireOutcome::TakenOver { previous } = outcome {
                    info!("{} took {} over from {}", from, lock.key, previous);
                }
                self.broadcast(&ServerMessage::LockAcquired {
                    lock: Lock::new(lock.key, from),
                    force,
                });
            }
            Err(LockError::Conflict { key, owner }) => {
                debug!("Denied {} to {}, held by {}", key, from, owner);
                self.send_to(
                    from,
                    &ServerMessage::LockDenied {
                        lock: Lock::new(key, from),
                        owner,
                    },
                );
            }
        }
    }

    fn send_to(&self, player: PlayerId, message: &ServerMessage) {
        let Some(frame) = encode_frame(message) else {
            return;
        };
        if let Some(tx) = self.peers.lock().get(&player) {
            if tx.send(frame).is_err() {
                warn!("Send {} to {}: peer channel closed", message.kind(), player);
            }
        }
    }

    fn broadcast(&self, message: &ServerMessage) {
        self.fan_out(message, None);
    }

    fn broadcast_except(&self, message: &ServerMessage, except: PlayerId) {
        self.fan_out(message, Some(except));
    }

    fn fan_out(&self, message: &ServerMessage, except: Option<PlayerId>) {
        let Some(frame) = encode_frame(message) else {
            return;
        };
        for (player, tx) in self.peers.lock().iter() {
            if Some(*player) == except {
                continue;
            }
            if tx.send(frame.clone()).is_err() {
                warn!("Broadcast {} to {}: peer channel closed", message.kind(), player);
            }
        }
    }
}

fn encode_frame(message: &ServerMessage) -> Option<Vec<u8>> {
    match encode(message) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Failed to encode {}: {}", message.kind(), e);
            None
        }
    }
}
