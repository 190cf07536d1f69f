use crate::entities::item::{DecayState, ItemId};
use crate::world::state::World;

pub const DECAY_INTERVAL_MS: u64 = 1_000;
pub const DECAY_BUCKETS: usize = 4;

/// Timed-expiry wheel. Items with a running duration sit in one of a small
/// ring of buckets; one bucket is visited per interval, so an item is charged
/// a full rotation's worth of time per visit. Expiry may land late by up to
/// one rotation but never early.
pub struct DecayScheduler {
    buckets: Vec<Vec<ItemId>>,
    last_bucket: usize,
    /// Items that started decaying since the last sweep; `cleanup` files
    /// them into buckets.
    to_decay: Vec<ItemId>,
    next_check_at: u64,
}

impl Default for DecayScheduler {
    fn default() -> Self {
        Self {
            buckets: vec![Vec::new(); DECAY_BUCKETS],
            last_bucket: 0,
            to_decay: Vec::new(),
            next_check_at: DECAY_INTERVAL_MS,
        }
    }
}

impl DecayScheduler {
    pub(crate) fn check_due(&mut self, now_ms: u64) -> bool {
        if now_ms >= self.next_check_at {
            self.next_check_at += DECAY_INTERVAL_MS;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub(crate) fn bucket_len(&self, bucket: usize) -> usize {
        self.buckets[bucket].len()
    }
}

impl World {
    /// Puts an item's expiry timer in motion. A zero remaining duration
    /// expires on the spot; anything else is staged for bucket enrolment at
    /// the next sweep.
    pub fn start_decay(&mut self, id: ItemId) {
        let Some(item) = self.item(id) else {
            return;
        };
        if item.decay_state == DecayState::Pending {
            return;
        }
        let Some(item_type) = self.item_types.get(item.type_id) else {
            return;
        };
        if item_type.expire_time_ms.is_none() {
            return;
        }
        if item.duration_ms == 0 {
            self.decay_item(id);
            return;
        }
        if let Some(item) = self.item_mut(id) {
            item.decay_state = DecayState::Pending;
        }
        self.decay.to_decay.push(id);
    }

    /// Freezes an item's timer. The bucket entry is left behind; the next
    /// visit sees the cleared state and drops it.
    pub fn stop_decay(&mut self, id: ItemId) {
        if let Some(item) = self.item_mut(id) {
            if item.decay_state == DecayState::Pending {
                item.decay_state = DecayState::None;
            }
        }
    }

    /// Files newly started timers into the wheel. Durations shorter than a
    /// full rotation go into the bucket that comes up closest to the due
    /// time; everything else into the bucket just visited, which is the
    /// farthest away.
    pub(crate) fn enroll_decay_pending(&mut self) {
        let staged = std::mem::take(&mut self.decay.to_decay);
        let rotation = DECAY_INTERVAL_MS as u32 * DECAY_BUCKETS as u32;
        for id in staged {
            let Some(item) = self.item(id) else {
                continue;
            };
            if item.decay_state != DecayState::Pending {
                continue;
            }
            let duration = item.duration_ms;
            let bucket = if duration >= rotation {
                self.decay.last_bucket
            } else {
                let offset = 1 + (duration as u64 / DECAY_INTERVAL_MS) as usize;
                (self.decay.last_bucket + offset) % DECAY_BUCKETS
            };
            self.decay.buckets[bucket].push(id);
        }
    }

    /// One interval step: visits the next bucket and charges every resident
    /// a full rotation of elapsed time.
    pub(crate) fn check_decay(&mut self) {
        let bucket = (self.decay.last_bucket + 1) % DECAY_BUCKETS;
        self.decay.last_bucket = bucket;
        let residents = std::mem::take(&mut self.decay.buckets[bucket]);
        let rotation = DECAY_INTERVAL_MS as u32 * DECAY_BUCKETS as u32;
        for id in residents {
            let Some(item) = self.item(id) else {
                continue;
            };
            if item.decay_state != DecayState::Pending {
                continue;
            }
            let charge = rotation.min(item.duration_ms);
            let remaining = item.duration_ms - charge;
            if let Some(item) = self.item_mut(id) {
                item.duration_ms = remaining;
            }
            if remaining == 0 {
                self.decay_item(id);
            } else if remaining < rotation {
                let offset = ((u64::from(remaining) + DECAY_INTERVAL_MS / 2)
                    / DECAY_INTERVAL_MS) as usize;
                let new_bucket = (bucket + offset) % DECAY_BUCKETS;
                if new_bucket == bucket {
                    self.decay_item(id);
                } else {
                    self.decay.buckets[new_bucket].push(id);
                }
            } else {
                self.decay.buckets[bucket].push(id);
            }
        }
    }

    /// Expires an item: transforms it into its decay target, or removes it
    /// outright when the chain ends. A target with its own expiry starts a
    /// fresh timer, so decay chains run link by link.
    pub(crate) fn decay_item(&mut self, id: ItemId) {
        let Some(item) = self.item(id) else {
            return;
        };
        let target = self
            .item_types
            .get(item.type_id)
            .and_then(|item_type| item_type.decay_target);
        if let Some(item) = self.item_mut(id) {
            item.decay_state = DecayState::Done;
        }
        match target {
            Some(target_type) => match self.transform_item(id, target_type, None) {
                Ok(next) => self.start_decay(next),
                Err(err) => self.log_invariant(&format!("decay transform of {:?}: {}", id, err)),
            },
            None => {
                let count = self.item(id).map(|item| item.count).unwrap_or(1);
                if let Err(err) = self.remove_item(id, u32::from(count)) {
                    self.log_invariant(&format!("decay removal of {:?}: {}", id, err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::position::Position;
    use crate::world::state::testkit;

    #[test]
    fn expiry_is_never_early() {
        let mut world = testkit::world();
        let pos = Position::new(10, 10, 7);
        testkit::add_tile(&mut world, pos);
        // 10 second torch that burns down to a different item type.
        let torch = testkit::drop_on_tile(&mut world, pos, testkit::TORCH, 1);
        world.start_decay(torch);
        world.cleanup();
        for t in 1..=9 {
            world.tick(t * 1_000);
            let item = world.item(torch).expect("torch still burning");
            assert_eq!(item.type_id, testkit::TORCH, "transformed early at {}s", t);
        }
        world.tick(10_000);
        let item = world.item(torch).expect("burnt torch");
        assert_eq!(item.type_id, testkit::BURNT_TORCH);
    }

    #[test]
    fn chain_end_removes_the_item() {
        let mut world = testkit::world();
        let pos = Position::new(10, 10, 7);
        testkit::add_tile(&mut world, pos);
        // 4 second parcel with no decay target.
        let parcel = testkit::drop_on_tile(&mut world, pos, testkit::PARCEL, 1);
        world.start_decay(parcel);
        world.cleanup();
        world.tick(3_000);
        assert!(world.item(parcel).is_some());
        world.tick(4_000);
        assert!(world.item(parcel).is_none());
        let tile = world.map.tile(pos).expect("tile");
        assert!(!tile.contains_item(parcel));
    }

    #[test]
    fn short_timers_round_up_to_a_bucket_visit() {
        let mut world = testkit::world();
        let pos = Position::new(10, 10, 7);
        testkit::add_tile(&mut world, pos);
        let parcel = testkit::drop_on_tile(&mut world, pos, testkit::PARCEL, 1);
        world.item_mut(parcel).expect("parcel").duration_ms = 1_500;
        world.start_decay(parcel);
        world.cleanup();
        world.tick(1_000);
        assert!(world.item(parcel).is_some());
        // Fires at the first visit past the due time, within one rotation.
        world.tick(2_000);
        assert!(world.item(parcel).is_none());
    }

    #[test]
    fn stop_decay_freezes_the_timer() {
        let mut world = testkit::world();
        let pos = Position::new(10, 10, 7);
        testkit::add_tile(&mut world, pos);
        let torch = testkit::drop_on_tile(&mut world, pos, testkit::TORCH, 1);
        world.start_decay(torch);
        world.cleanup();
        world.tick(2_000);
        world.stop_decay(torch);
        world.tick(60_000);
        let item = world.item(torch).expect("torch");
        assert_eq!(item.type_id, testkit::TORCH);
        // The wheel dropped the stopped entry instead of carrying it.
        let occupied: usize = (0..DECAY_BUCKETS)
            .map(|bucket| world.decay.bucket_len(bucket))
            .sum();
        assert_eq!(occupied, 0);
    }

    #[test]
    fn released_items_fall_out_of_the_wheel() {
        let mut world = testkit::world();
        let pos = Position::new(10, 10, 7);
        testkit::add_tile(&mut world, pos);
        let torch = testkit::drop_on_tile(&mut world, pos, testkit::TORCH, 1);
        world.start_decay(torch);
        world.cleanup();
        let count = world.item(torch).map(|item| item.count).unwrap_or(1);
        world
            .remove_item(torch, u32::from(count))
            .expect("remove torch");
        world.cleanup();
        world.tick(60_000);
        assert!(world.item(torch).is_none());
    }
}
