//! Per-vessel snapshot queues
//!
//! Network receipt enqueues, the simulation tick dequeues; neither side
//! waits on the other. The outer table is only write-locked when a vessel
//! is seen for the first time or forgotten, every other access takes the
//! read lock plus that vessel's own mutex.

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;

use crate::constants::interpolation::QUEUE_CAPACITY;
use crate::position::snapshot::PositionSnapshot;
use crate::vessel::VesselId;

/// Successful enqueue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue was full; the oldest queued sample (at `evicted` game time) was dropped
    QueuedEvicting { evicted: f64 },
}

/// Snapshot rejected by the buffer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BufferError {
    #[error("Snapshot for {vessel} at {game_time} is not newer than {watermark}")]
    Stale {
        vessel: VesselId,
        game_time: f64,
        watermark: f64,
    },
    #[error("Snapshot for {vessel} has non-finite game time {game_time}")]
    InvalidTime { vessel: VesselId, game_time: f64 },
    #[error("Snapshot for {vessel} at {game_time} already queued")]
    Duplicate { vessel: VesselId, game_time: f64 },
    #[error("Queue for {vessel} is full and {game_time} predates every queued sample")]
    QueueFull { vessel: VesselId, game_time: f64 },
}

#[derive(Debug, Default)]
struct VesselQueue {
    /// Sorted by game time, oldest first
    snapshots: VecDeque<PositionSnapshot>,
    /// Game time of the newest snapshot handed to the consumer
    watermark: Option<f64>,
}

impl VesselQueue {
    fn insert(&mut self, snapshot: PositionSnapshot, capacity: usize) -> Result<EnqueueOutcome, BufferError> {
        let vessel = snapshot.vessel_id;
        let game_time = snapshot.game_time;

        // Ordering and the watermark both rely on comparable times
        if !game_time.is_finite() {
            return Err(BufferError::InvalidTime { vessel, game_time });
        }

        if let Some(watermark) = self.watermark {
            if game_time <= watermark {
                return Err(BufferError::Stale {
                    vessel,
                    game_time,
                    watermark,
                });
            }
        }

        // Snapshots almost always arrive in order, so search from the back
        let index = self
            .snapshots
            .iter()
            .rposition(|s| s.game_time <= game_time)
            .map_or(0, |i| i + 1);
        if index > 0 && self.snapshots[index - 1].game_time == game_time {
            return Err(BufferError::Duplicate { vessel, game_time });
        }

        let mut outcome = EnqueueOutcome::Queued;
        if self.snapshots.len() >= capacity {
            if index == 0 {
                return Err(BufferError::QueueFull { vessel, game_time });
            }
            if let Some(oldest) = self.snapshots.pop_front() {
                outcome = EnqueueOutcome::QueuedEvicting {
                    evicted: oldest.game_time,
                };
            }
            self.snapshots.insert(index - 1, snapshot);
        } else {
            self.snapshots.insert(index, snapshot);
        }
        Ok(outcome)
    }

    fn pop(&mut self) -> Option<PositionSnapshot> {
        let next = self.snapshots.pop_front()?;
        self.watermark = Some(next.game_time);
        Some(next)
    }

    fn pop_latest(&mut self) -> Option<PositionSnapshot> {
        let latest = self.snapshots.pop_back()?;
        self.snapshots.clear();
        self.watermark = Some(latest.game_time);
        Some(latest)
    }
}

#[derive(Debug)]
pub struct PositionSnapshotBuffer {
    queues: RwLock<HashMap<VesselId, Mutex<VesselQueue>>>,
    capacity: usize,
}

impl Default for PositionSnapshotBuffer {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}

impl PositionSnapshotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a snapshot in game-time order (non-blocking for the consumer).
    ///
    /// Rejects anything not newer than the last snapshot dequeued for the
    /// vessel, and exact game-time duplicates of a queued one.
    pub fn enqueue(&self, snapshot: PositionSnapshot) -> Result<EnqueueOutcome, BufferError> {
        let id = snapshot.vessel_id;
        {
            let queues = self.queues.read();
            if let Some(queue) = queues.get(&id) {
                return queue.lock().insert(snapshot, self.capacity);
            }
        }

        let mut queues = self.queues.write();
        queues
            .entry(id)
            .or_insert_with(|| Mutex::new(VesselQueue::default()))
            .get_mut()
            .insert(snapshot, self.capacity)
    }

    /// Oldest queued snapshot for `vessel`
    pub fn dequeue(&self, vessel: VesselId) -> Option<PositionSnapshot> {
        self.queues.read().get(&vessel)?.lock().pop()
    }

    /// Newest queued snapshot for `vessel`, discarding everything older
    pub fn dequeue_latest(&self, vessel: VesselId) -> Option<PositionSnapshot> {
        self.queues.read().get(&vessel)?.lock().pop_latest()
    }

    /// Number of queued snapshots for `vessel`
    pub fn len(&self, vessel: VesselId) -> usize {
        self.queues
            .read()
            .get(&vessel)
            .map_or(0, |q| q.lock().snapshots.len())
    }

    /// Snapshots queued across all vessels
    pub fn total_len(&self) -> usize {
        self.queues.read().values().map(|q| q.lock().snapshots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Game time of the newest snapshot handed out for `vessel`
    pub fn watermark(&self, vessel: VesselId) -> Option<f64> {
        self.queues.read().get(&vessel).and_then(|q| q.lock().watermark)
    }

    /// Forget a vessel entirely, returning how many snapshots were dropped
    pub fn remove(&self, vessel: VesselId) -> usize {
        self.queues
            .write()
            .remove(&vessel)
            .map_or(0, |q| q.into_inner().snapshots.len())
    }

    /// Vessels with a queue (possibly empty)
    pub fn vessel_ids(&self) -> Vec<VesselId> {
        self.queues.read().keys().copied().collect()
    }

    pub fn clear(&self) {
        self.queues.write().clear();
    }
}
