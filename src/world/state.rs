use crate::entities::creature::{Creature, CreatureId};
use crate::entities::item::{Item, ItemAttribute, ItemId, ItemTypeId};
use crate::telemetry::logging;
use crate::world::decay::DecayScheduler;
use crate::world::holder::{HolderRef, Thing, MAX_HOLDER_DEPTH};
use crate::world::hooks::GameHooks;
use crate::world::item_types::{ItemType, ItemTypeIndex};
use crate::world::map::Map;
use crate::world::position::{Direction, Position};
use std::collections::HashMap;

/// A mutation that already happened, queued for the presentation layer to
/// drain each tick. Stale ids inside an event are possible by the time it is
/// consumed; consumers look them up and skip what no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    ThingAdded {
        holder: HolderRef,
        thing: Thing,
        index: usize,
    },
    ThingRemoved {
        holder: HolderRef,
        thing: Thing,
        index: usize,
    },
    ThingUpdated {
        holder: HolderRef,
        item: ItemId,
        index: usize,
    },
    CreatureMoved {
        creature: CreatureId,
        from: Position,
        to: Position,
        teleported: bool,
    },
    CreatureTurned {
        creature: CreatureId,
        direction: Direction,
    },
    WalkCancelled {
        creature: CreatureId,
    },
}

/// Deferred continuation of a player action. The actor is re-resolved when
/// the task runs; a stale id silently cancels the continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    PushCreature {
        actor: CreatureId,
        target: CreatureId,
    },
    MoveRequest {
        actor: CreatureId,
        from: Position,
        type_id: ItemTypeId,
        from_index: u8,
        to: Position,
        count: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub due_ms: u64,
    pub task: Task,
}

/// The whole game state. Items and creatures live in id-keyed stores; holders
/// reference their children by id only, so removing an entry from the store
/// is the single point of destruction.
pub struct World {
    pub map: Map,
    pub item_types: ItemTypeIndex,
    pub(crate) items: HashMap<ItemId, Item>,
    pub(crate) creatures: HashMap<CreatureId, Creature>,
    pub(crate) creature_names: HashMap<String, CreatureId>,
    pub(crate) unique_items: HashMap<u16, ItemId>,
    /// Creatures participating in the periodic think pass.
    pub(crate) check_list: Vec<CreatureId>,
    pub(crate) pending_item_release: Vec<ItemId>,
    pub(crate) pending_creature_release: Vec<CreatureId>,
    pub(crate) pending_events: Vec<WorldEvent>,
    pub(crate) decay: DecayScheduler,
    pub(crate) tasks: Vec<ScheduledTask>,
    pub(crate) hooks: Option<Box<dyn GameHooks>>,
    /// Item currently locked in trade escrow, if any. Transfers into its
    /// subtree are refused while the lock holds.
    pub(crate) escrow_item: Option<ItemId>,
    pub(crate) now_ms: u64,
}

impl World {
    pub fn new(item_types: ItemTypeIndex) -> Self {
        Self {
            map: Map::default(),
            item_types,
            items: HashMap::new(),
            creatures: HashMap::new(),
            creature_names: HashMap::new(),
            unique_items: HashMap::new(),
            check_list: Vec::new(),
            pending_item_release: Vec::new(),
            pending_creature_release: Vec::new(),
            pending_events: Vec::new(),
            decay: DecayScheduler::default(),
            tasks: Vec::new(),
            hooks: None,
            escrow_item: None,
            now_ms: 0,
        }
    }

    pub fn set_escrow(&mut self, item: ItemId) {
        self.escrow_item = Some(item);
    }

    pub fn clear_escrow(&mut self) {
        self.escrow_item = None;
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    // -- stores -------------------------------------------------------------

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id).filter(|item| !item.removed)
    }

    pub(crate) fn item_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(&id).filter(|item| !item.removed)
    }

    pub fn creature(&self, id: CreatureId) -> Option<&Creature> {
        self.creatures.get(&id).filter(|creature| !creature.removed)
    }

    pub(crate) fn creature_mut(&mut self, id: CreatureId) -> Option<&mut Creature> {
        self.creatures
            .get_mut(&id)
            .filter(|creature| !creature.removed)
    }

    pub fn creature_by_name(&self, name: &str) -> Option<&Creature> {
        self.creature_names
            .get(&name.to_lowercase())
            .and_then(|id| self.creature(*id))
    }

    pub fn item_type(&self, id: ItemTypeId) -> Option<&ItemType> {
        self.item_types.get(id)
    }

    pub fn type_of(&self, item: ItemId) -> Option<&ItemType> {
        self.item(item)
            .and_then(|item| self.item_types.get(item.type_id))
    }

    pub fn unique_item(&self, unique_id: u16) -> Option<ItemId> {
        self.unique_items.get(&unique_id).copied()
    }

    // -- item lifecycle -----------------------------------------------------

    /// Creates an item in the store, initially detached from any holder.
    pub fn create_item(&mut self, type_id: ItemTypeId, count: u16) -> Result<ItemId, String> {
        let item_type = self
            .item_types
            .get(type_id)
            .ok_or_else(|| format!("unknown item type {}", type_id.0))?;
        let count = if item_type.stackable {
            count.clamp(1, crate::world::item_types::STACK_LIMIT)
        } else {
            count.max(1)
        };
        let mut item = Item::new(type_id, count);
        if let Some(duration) = item_type.expire_time_ms {
            item.duration_ms = duration;
        }
        let id = item.id;
        self.items.insert(id, item);
        Ok(id)
    }

    /// Clones an item under a fresh id with `count` units, used for stack
    /// splits. Unique ids never survive a clone; container contents are not
    /// duplicated.
    pub(crate) fn clone_item(&mut self, source: ItemId, count: u16) -> Option<ItemId> {
        let source = self.item(source)?;
        let mut item = Item::new(source.type_id, count);
        item.attributes = source
            .attributes
            .iter()
            .filter(|attr| !matches!(attr, ItemAttribute::UniqueId(_)))
            .cloned()
            .collect();
        item.duration_ms = source.duration_ms;
        let id = item.id;
        self.items.insert(id, item);
        Some(id)
    }

    pub fn set_unique_id(&mut self, item: ItemId, unique_id: u16) -> Result<(), String> {
        if let Some(existing) = self.unique_items.get(&unique_id) {
            return Err(format!(
                "unique id {} already taken by {:?}",
                unique_id, existing
            ));
        }
        let Some(item) = self.item_mut(item) else {
            return Err(format!("unique id {} targets a missing item", unique_id));
        };
        if item.unique_id().is_some() {
            return Err(format!("item {:?} already has a unique id", item.id));
        }
        item.attributes.push(ItemAttribute::UniqueId(unique_id));
        let id = item.id;
        self.unique_items.insert(unique_id, id);
        Ok(())
    }

    /// Marks an item dead. The store entry survives until the next `cleanup`
    /// so in-flight continuations holding the id fail lookups instead of
    /// touching freed state.
    pub(crate) fn release_item(&mut self, id: ItemId) {
        if let Some(item) = self.items.get_mut(&id) {
            if !item.removed {
                item.removed = true;
                self.pending_item_release.push(id);
            }
        }
    }

    pub(crate) fn release_creature(&mut self, id: CreatureId) {
        if let Some(creature) = self.creatures.get_mut(&id) {
            if !creature.removed {
                creature.removed = true;
                self.pending_creature_release.push(id);
            }
        }
    }

    /// Sweeps released entries out of the stores and moves newly expiring
    /// items into the decay wheel. Runs at the end of every tick.
    pub fn cleanup(&mut self) {
        self.enroll_decay_pending();
        let items = std::mem::take(&mut self.pending_item_release);
        for id in items {
            self.destroy_item_tree(id, 0);
        }
        let creatures = std::mem::take(&mut self.pending_creature_release);
        for id in creatures {
            if let Some(creature) = self.creatures.remove(&id) {
                self.creature_names.remove(&creature.name.to_lowercase());
                self.check_list.retain(|entry| *entry != id);
            }
        }
    }

    fn destroy_item_tree(&mut self, id: ItemId, depth: usize) {
        if depth > MAX_HOLDER_DEPTH {
            self.log_invariant(&format!("destroy of {:?} exceeded container depth", id));
            return;
        }
        let Some(item) = self.items.remove(&id) else {
            return;
        };
        if let Some(unique_id) = item.unique_id() {
            self.unique_items.remove(&unique_id);
        }
        for child in item.contents {
            self.destroy_item_tree(child, depth + 1);
        }
    }

    /// Total weight of an item including container contents, in hundredths
    /// of an ounce.
    pub fn item_weight(&self, id: ItemId) -> u32 {
        self.item_weight_at_depth(id, 0)
    }

    fn item_weight_at_depth(&self, id: ItemId, depth: usize) -> u32 {
        if depth > MAX_HOLDER_DEPTH {
            return 0;
        }
        let Some(item) = self.item(id) else {
            return 0;
        };
        let Some(item_type) = self.item_types.get(item.type_id) else {
            return 0;
        };
        let own = if item_type.stackable {
            item_type.weight.saturating_mul(u32::from(item.count.max(1)))
        } else {
            item_type.weight
        };
        item.contents
            .iter()
            .map(|child| self.item_weight_at_depth(*child, depth + 1))
            .fold(own, |acc, weight| acc.saturating_add(weight))
    }

    // -- creatures ----------------------------------------------------------

    /// Registers a creature in the store without placing it on the map.
    pub fn insert_creature(&mut self, creature: Creature) -> CreatureId {
        let id = creature.id;
        self.creature_names
            .insert(creature.name.to_lowercase(), id);
        self.creatures.insert(id, creature);
        id
    }

    // -- events and hooks ---------------------------------------------------

    pub(crate) fn push_event(&mut self, event: WorldEvent) {
        self.pending_events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn GameHooks>) {
        self.hooks = Some(hooks);
    }

    /// Runs a closure with the hooks temporarily taken out of the world, so
    /// hook implementations may call back into world operations.
    pub(crate) fn with_hooks(&mut self, call: impl FnOnce(&mut World, &mut dyn GameHooks)) {
        if let Some(mut hooks) = self.hooks.take() {
            call(self, hooks.as_mut());
            self.hooks = Some(hooks);
        }
    }

    /// Like `with_hooks`, but returns the hook's verdict; `None` when no
    /// hooks are installed.
    pub(crate) fn ask_hooks<T>(
        &mut self,
        call: impl FnOnce(&mut World, &mut dyn GameHooks) -> T,
    ) -> Option<T> {
        let mut hooks = self.hooks.take()?;
        let verdict = call(self, hooks.as_mut());
        self.hooks = Some(hooks);
        Some(verdict)
    }

    pub(crate) fn log_invariant(&self, message: &str) {
        logging::log_error(message);
    }

    // -- scheduling ---------------------------------------------------------

    pub fn schedule_task(&mut self, delay_ms: u64, task: Task) {
        self.tasks.push(ScheduledTask {
            due_ms: self.now_ms + delay_ms,
            task,
        });
    }

    fn run_due_tasks(&mut self) {
        let mut due = Vec::new();
        let now = self.now_ms;
        self.tasks.retain(|entry| {
            if entry.due_ms <= now {
                due.push(entry.task.clone());
                false
            } else {
                true
            }
        });
        for task in due {
            match task {
                Task::PushCreature { actor, target } => {
                    if self.creature(actor).is_none() {
                        continue;
                    }
                    let _ = self.push_creature(actor, target);
                }
                Task::MoveRequest {
                    actor,
                    from,
                    type_id,
                    from_index,
                    to,
                    count,
                } => {
                    if self.creature(actor).is_none() {
                        continue;
                    }
                    let _ = self.player_move_thing(actor, from, type_id, from_index, to, count);
                }
            }
        }
    }

    /// Advances the clock to `now_ms`: runs due continuations, steps the
    /// decay wheel for each elapsed interval, walks queued creatures, and
    /// sweeps released entries.
    pub fn tick(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
        self.run_due_tasks();
        while self.decay.check_due(self.now_ms) {
            self.check_decay();
        }
        self.walk_creatures();
        self.check_creatures();
        self.cleanup();
    }

    pub fn advance(&mut self, delta_ms: u64) {
        let target = self.now_ms + delta_ms;
        self.tick(target);
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use crate::entities::creature::{Creature, CreatureKind};
    use crate::world::holder::{Holder, TileHolder, INDEX_ANY};
    use crate::world::item_types::parse_item_catalog;
    use crate::world::map::Tile;

    pub const GRASS: ItemTypeId = ItemTypeId(101);
    pub const APPLE: ItemTypeId = ItemTypeId(102);
    pub const SWORD: ItemTypeId = ItemTypeId(103);
    pub const GOLD: ItemTypeId = ItemTypeId(104);
    pub const PLATINUM: ItemTypeId = ItemTypeId(105);
    pub const BACKPACK: ItemTypeId = ItemTypeId(106);
    pub const POUCH: ItemTypeId = ItemTypeId(107);
    pub const BOULDER: ItemTypeId = ItemTypeId(108);
    pub const TORCH: ItemTypeId = ItemTypeId(109);
    pub const BURNT_TORCH: ItemTypeId = ItemTypeId(110);
    pub const PARCEL: ItemTypeId = ItemTypeId(111);

    const CATALOG: &str = r#"
items:
  - id: 101
    name: grass
    ground: true
    moveable: false
  - id: 102
    name: apple
    pickupable: true
    weight: 100
  - id: 103
    name: sword
    kind: weapon
    pickupable: true
    weight: 3500
  - id: 104
    name: gold coin
    stackable: true
    pickupable: true
    weight: 10
    worth: 1
  - id: 105
    name: platinum coin
    stackable: true
    pickupable: true
    weight: 10
    worth: 100
  - id: 106
    name: backpack
    pickupable: true
    weight: 1800
    container_capacity: 20
  - id: 107
    name: pouch
    pickupable: true
    weight: 300
    container_capacity: 2
  - id: 108
    name: boulder
    block_solid: true
    height: true
    weight: 100000
  - id: 109
    name: torch
    pickupable: true
    weight: 500
    expire_time_secs: 10
    expire_target: 110
  - id: 110
    name: burnt torch
    pickupable: true
    weight: 500
  - id: 111
    name: parcel
    pickupable: true
    weight: 1000
    container_capacity: 10
    expire_time_secs: 4
"#;

    pub fn world() -> World {
        let index = parse_item_catalog(CATALOG).expect("test catalog");
        World::new(index)
    }

    pub fn add_tile(world: &mut World, position: Position) {
        world.map.insert_tile(position, Tile::default());
        let ground = world.create_item(GRASS, 1).expect("ground item");
        TileHolder(position).add_thing(world, INDEX_ANY, Thing::Item(ground));
    }

    pub fn make_item(world: &mut World, type_id: ItemTypeId, count: u16) -> ItemId {
        world.create_item(type_id, count).expect("test item")
    }

    pub fn drop_on_tile(world: &mut World, position: Position, type_id: ItemTypeId, count: u16) -> ItemId {
        let item = make_item(world, type_id, count);
        TileHolder(position).add_thing(world, INDEX_ANY, Thing::Item(item));
        item
    }

    pub fn monster(world: &mut World) -> CreatureId {
        world.insert_creature(Creature::new("rat", CreatureKind::Monster))
    }

    pub fn spawn_monster(world: &mut World, position: Position) -> CreatureId {
        let id = monster(world);
        TileHolder(position).add_thing(world, INDEX_ANY, Thing::Creature(id));
        id
    }

    pub fn spawn_player(world: &mut World, position: Position) -> CreatureId {
        let name = format!("player{}", world.creatures.len() + 1);
        let id = world.insert_creature(Creature::new(name, CreatureKind::Player));
        TileHolder(position).add_thing(world, INDEX_ANY, Thing::Creature(id));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::state::testkit;

    #[test]
    fn released_items_survive_until_cleanup() {
        let mut world = testkit::world();
        let apple = testkit::make_item(&mut world, testkit::APPLE, 1);
        world.release_item(apple);
        // Dead to lookups immediately, gone from the store after the sweep.
        assert!(world.item(apple).is_none());
        assert!(world.items.contains_key(&apple));
        world.cleanup();
        assert!(!world.items.contains_key(&apple));
    }

    #[test]
    fn destroying_a_container_destroys_its_contents() {
        let mut world = testkit::world();
        let backpack = testkit::make_item(&mut world, testkit::BACKPACK, 1);
        let gold = testkit::make_item(&mut world, testkit::GOLD, 50);
        world
            .item_mut(backpack)
            .expect("backpack")
            .contents
            .push(gold);
        world.release_item(backpack);
        world.cleanup();
        assert!(!world.items.contains_key(&backpack));
        assert!(!world.items.contains_key(&gold));
    }

    #[test]
    fn container_weight_includes_contents() {
        let mut world = testkit::world();
        let backpack = testkit::make_item(&mut world, testkit::BACKPACK, 1);
        let gold = testkit::make_item(&mut world, testkit::GOLD, 50);
        world
            .item_mut(backpack)
            .expect("backpack")
            .contents
            .push(gold);
        // 1800 for the backpack, 50 coins at 10 each.
        assert_eq!(world.item_weight(backpack), 2300);
    }

    #[test]
    fn unique_ids_are_exclusive() {
        let mut world = testkit::world();
        let first = testkit::make_item(&mut world, testkit::SWORD, 1);
        let second = testkit::make_item(&mut world, testkit::SWORD, 1);
        world.set_unique_id(first, 9001).expect("first unique id");
        assert!(world.set_unique_id(second, 9001).is_err());
        assert_eq!(world.unique_item(9001), Some(first));
        world.release_item(first);
        world.cleanup();
        assert_eq!(world.unique_item(9001), None);
    }

    #[test]
    fn clone_drops_unique_id() {
        let mut world = testkit::world();
        let original = testkit::make_item(&mut world, testkit::GOLD, 60);
        world.set_unique_id(original, 500).expect("unique id");
        let copy = world.clone_item(original, 25).expect("clone");
        let copy = world.item(copy).expect("cloned item");
        assert_eq!(copy.count, 25);
        assert_eq!(copy.unique_id(), None);
    }

    #[test]
    fn stale_task_actor_cancels_continuation() {
        let mut world = testkit::world();
        let pos = Position::new(10, 10, 7);
        testkit::add_tile(&mut world, pos);
        let actor = testkit::spawn_player(&mut world, pos);
        let target = testkit::spawn_monster(&mut world, pos);
        world.schedule_task(
            500,
            Task::PushCreature { actor, target },
        );
        world.release_creature(actor);
        world.cleanup();
        // The due task resolves its actor, finds nothing, and drops out.
        world.tick(1_000);
        assert!(world.tasks.is_empty());
    }

    #[test]
    fn tasks_run_only_once_due() {
        let mut world = testkit::world();
        let pos = Position::new(10, 10, 7);
        testkit::add_tile(&mut world, pos);
        testkit::add_tile(&mut world, Position::new(10, 11, 7));
        let actor = testkit::spawn_player(&mut world, pos);
        let target = testkit::spawn_monster(&mut world, pos);
        world.schedule_task(2_000, Task::PushCreature { actor, target });
        world.tick(1_000);
        assert_eq!(world.tasks.len(), 1);
        world.tick(2_000);
        assert!(world.tasks.is_empty());
    }
}
