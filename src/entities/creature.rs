use crate::entities::equipment::Equipment;
use crate::entities::item::ItemId;
use crate::world::position::{Direction, Position};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CreatureId(pub u32);

static NEXT_CREATURE_ID: AtomicU32 = AtomicU32::new(1);

impl CreatureId {
    pub fn next() -> Self {
        let id = NEXT_CREATURE_ID.fetch_add(1, Ordering::Relaxed);
        CreatureId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatureKind {
    Player,
    Npc,
    Monster,
}

/// Movement throw range used when another creature pushes this one.
pub const DEFAULT_THROW_RANGE: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creature {
    pub id: CreatureId,
    pub name: String,
    pub kind: CreatureKind,
    pub direction: Direction,
    /// The tile currently holding this creature; `None` while unplaced or
    /// after removal.
    pub parent: Option<Position>,
    pub equipment: Equipment,
    /// Weight capacity in hundredths of an ounce; `None` means unlimited
    /// (non-player creatures do not track encumbrance).
    pub capacity: Option<u32>,
    pub carried_weight: u32,
    pub movement_blocked: bool,
    pub pushable: bool,
    pub throw_range: u16,
    pub summons: Vec<CreatureId>,
    pub master: Option<CreatureId>,
    pub walk_queue: VecDeque<Direction>,
    pub next_step_at_ms: u64,
    /// Client-visible open-container table; maps a small container id to the
    /// backing item (used by holder-space position decoding).
    pub open_containers: HashMap<u8, ItemId>,
    pub in_check_list: bool,
    pub check_active: bool,
    pub removed: bool,
}

impl Creature {
    pub fn new(name: impl Into<String>, kind: CreatureKind) -> Self {
        Self {
            id: CreatureId::next(),
            name: name.into(),
            kind,
            direction: Direction::South,
            parent: None,
            equipment: Equipment::default(),
            capacity: if kind == CreatureKind::Player {
                Some(40_000)
            } else {
                None
            },
            carried_weight: 0,
            movement_blocked: false,
            pushable: kind != CreatureKind::Player,
            throw_range: DEFAULT_THROW_RANGE,
            summons: Vec::new(),
            master: None,
            walk_queue: VecDeque::new(),
            next_step_at_ms: 0,
            open_containers: HashMap::new(),
            in_check_list: false,
            check_active: false,
            removed: false,
        }
    }

    pub fn is_player(&self) -> bool {
        self.kind == CreatureKind::Player
    }

    pub fn is_placed(&self) -> bool {
        self.parent.is_some() && !self.removed
    }

    pub fn free_capacity(&self) -> u32 {
        match self.capacity {
            Some(capacity) => capacity.saturating_sub(self.carried_weight),
            None => u32::MAX,
        }
    }

    pub fn open_container(&mut self, container_id: u8, item: ItemId) {
        self.open_containers.insert(container_id, item);
    }

    pub fn close_container(&mut self, container_id: u8) -> Option<ItemId> {
        self.open_containers.remove(&container_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn players_track_capacity() {
        let player = Creature::new("Alice", CreatureKind::Player);
        assert!(player.capacity.is_some());
        assert!(player.free_capacity() > 0);
        assert!(!player.pushable);
    }

    #[test]
    fn monsters_have_unlimited_capacity() {
        let monster = Creature::new("rat", CreatureKind::Monster);
        assert_eq!(monster.capacity, None);
        assert_eq!(monster.free_capacity(), u32::MAX);
        assert!(monster.pushable);
    }

    #[test]
    fn open_container_table_round_trips() {
        let mut player = Creature::new("Bob", CreatureKind::Player);
        let backpack = ItemId::next();
        player.open_container(2, backpack);
        assert_eq!(player.open_containers.get(&2), Some(&backpack));
        assert_eq!(player.close_container(2), Some(backpack));
        assert_eq!(player.close_container(2), None);
    }
}
