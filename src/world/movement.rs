use crate::entities::creature::CreatureId;
use crate::world::holder::{
    post_add_notification, post_remove_notification, Holder, HolderRef, Thing, TileHolder,
    FLAG_IGNOREBLOCKCREATURE, FLAG_IGNOREBLOCKITEM, FLAG_NOLIMIT, INDEX_ANY,
};
use crate::world::outcome::Outcome;
use crate::world::position::{Direction, Position, PositionDelta};
use crate::world::state::{World, WorldEvent};

/// Milliseconds between two queued walk steps.
pub const WALK_STEP_MS: u64 = 400;

/// Items with height stack into a climbable pile at this count.
const ELEVATION_PILE: usize = 3;

/// Surface/underground boundary floors: no implicit ascent from the first
/// underground floor, no implicit descent off the surface floor.
const FLOOR_UNDERGROUND_TOP: u8 = 8;
const FLOOR_SURFACE: u8 = 7;

const NEIGHBOUR_OFFSETS: [PositionDelta; 8] = [
    PositionDelta { dx: 0, dy: -1, dz: 0 },
    PositionDelta { dx: 1, dy: 0, dz: 0 },
    PositionDelta { dx: 0, dy: 1, dz: 0 },
    PositionDelta { dx: -1, dy: 0, dz: 0 },
    PositionDelta { dx: 1, dy: -1, dz: 0 },
    PositionDelta { dx: -1, dy: -1, dz: 0 },
    PositionDelta { dx: 1, dy: 1, dz: 0 },
    PositionDelta { dx: -1, dy: 1, dz: 0 },
];

impl World {
    /// Items on a tile whose type carries walkable height.
    fn tile_height_count(&self, position: Position) -> usize {
        let Some(tile) = self.map.tile(position) else {
            return 0;
        };
        tile.items()
            .filter_map(|id| self.type_of(id))
            .filter(|item_type| item_type.has_height)
            .count()
    }

    fn tile_has_ground(&self, position: Position) -> bool {
        self.map
            .tile(position)
            .map(|tile| tile.ground.is_some())
            .unwrap_or(false)
    }

    /// First position at or around `position` that accepts the creature.
    pub fn closest_free_tile(&self, creature: CreatureId, position: Position) -> Option<Position> {
        let candidates = std::iter::once(position).chain(
            NEIGHBOUR_OFFSETS
                .iter()
                .filter_map(move |delta| position.offset(*delta)),
        );
        for candidate in candidates {
            if !self.map.has_tile(candidate) {
                continue;
            }
            let outcome = TileHolder(candidate).query_add(
                self,
                INDEX_ANY,
                Thing::Creature(creature),
                1,
                0,
                None,
            );
            if outcome.is_ok() {
                return Some(candidate);
            }
        }
        None
    }

    /// Puts a registered creature onto the map. Without `forced`, an occupied
    /// target spills over to the closest free neighbour; with it, the exact
    /// position is used regardless of blockers.
    pub fn place_creature(
        &mut self,
        creature: CreatureId,
        position: Position,
        forced: bool,
    ) -> Result<Position, String> {
        let Some(existing) = self.creature(creature) else {
            return Err(format!("creature {:?} is not registered", creature));
        };
        if existing.is_placed() {
            return Err(format!("creature {:?} is already placed", creature));
        }
        let landing = if forced {
            if !self.map.has_tile(position) {
                return Err(format!("no tile at {}", position));
            }
            position
        } else {
            self.closest_free_tile(creature, position)
                .ok_or_else(|| format!("no free tile around {}", position))?
        };
        TileHolder(landing).add_thing(self, INDEX_ANY, Thing::Creature(creature));
        let index = TileHolder(landing)
            .thing_index(self, Thing::Creature(creature))
            .unwrap_or(0);
        post_add_notification(self, HolderRef::Tile(landing), Thing::Creature(creature), None, index);
        if let Some(creature) = self.creature_mut(creature) {
            if !creature.in_check_list {
                creature.in_check_list = true;
                creature.check_active = true;
            }
        }
        if !self.check_list.contains(&creature) {
            self.check_list.push(creature);
        }
        self.with_hooks(|world, hooks| hooks.on_creature_appear(world, creature));
        Ok(landing)
    }

    /// Takes a creature off the map and releases it, summons first.
    pub fn remove_creature(&mut self, creature: CreatureId) -> Result<(), String> {
        let Some(existing) = self.creature(creature) else {
            return Err(format!("creature {:?} is not registered", creature));
        };
        let Some(position) = existing.parent else {
            return Err(format!("creature {:?} is not placed", creature));
        };
        let summons = existing.summons.clone();
        let master = existing.master;
        for summon in summons {
            if self.creature(summon).map(|s| s.is_placed()).unwrap_or(false) {
                let _ = self.remove_creature(summon);
            }
        }
        if let Some(master) = master.and_then(|id| self.creature_mut(id)) {
            master.summons.retain(|id| *id != creature);
        }
        let index = TileHolder(position)
            .thing_index(self, Thing::Creature(creature))
            .unwrap_or(0);
        TileHolder(position).remove_thing(self, Thing::Creature(creature), 1);
        post_remove_notification(
            self,
            HolderRef::Tile(position),
            Thing::Creature(creature),
            None,
            index,
        );
        self.with_hooks(|world, hooks| hooks.on_creature_disappear(world, creature));
        self.release_creature(creature);
        Ok(())
    }

    /// One step in a direction, with implicit floor changes for straight
    /// moves: walking off a pile of stacked items climbs a floor when the
    /// way up is clear, and walking into a void drops onto a pile one floor
    /// below. Diagonal steps never change floors.
    pub fn move_creature_step(&mut self, creature: CreatureId, direction: Direction) -> Outcome {
        let Some(existing) = self.creature(creature) else {
            return Outcome::NotPossible;
        };
        if existing.movement_blocked {
            return Outcome::NotPossible;
        }
        let Some(current) = existing.parent else {
            return Outcome::NotPossible;
        };
        let Some(mut dest) = current.step(direction) else {
            return Outcome::NotPossible;
        };
        let mut flags = 0;
        if !direction.is_diagonal() {
            if current.z != FLOOR_UNDERGROUND_TOP
                && self.tile_height_count(current) >= ELEVATION_PILE
            {
                let above_current = Position::new(current.x, current.y, current.z - 1);
                let above_dest = Position::new(dest.x, dest.y, dest.z - 1);
                if !self.tile_has_ground(above_current) && self.tile_has_ground(above_dest) {
                    flags |= FLAG_IGNOREBLOCKITEM | FLAG_IGNOREBLOCKCREATURE;
                    dest = above_dest;
                }
            } else if current.z != FLOOR_SURFACE && !self.tile_has_ground(dest) {
                let below_dest = Position::new(dest.x, dest.y, dest.z + 1);
                if self.tile_height_count(below_dest) >= ELEVATION_PILE {
                    flags |= FLAG_IGNOREBLOCKITEM | FLAG_IGNOREBLOCKCREATURE;
                    dest = below_dest;
                }
            }
        }
        if !self.map.has_tile(dest) {
            return Outcome::NotPossible;
        }
        let outcome = TileHolder(dest).query_add(
            self,
            INDEX_ANY,
            Thing::Creature(creature),
            1,
            flags,
            None,
        );
        if !outcome.is_ok() {
            return outcome;
        }
        let veto = self
            .ask_hooks(|world, hooks| hooks.before_creature_move(world, creature, current, dest))
            .unwrap_or(Outcome::Ok);
        if !veto.is_ok() {
            return veto;
        }
        if let Some(creature) = self.creature_mut(creature) {
            creature.direction = direction;
        }
        self.relocate_creature(creature, dest, false);
        Outcome::Ok
    }

    /// Commits a creature move into `dest`, then follows tile redirects
    /// (stairs, teleporters) until the creature comes to rest. Fixes up the
    /// facing when a floor change displaced the creature along one axis.
    fn relocate_creature(&mut self, creature: CreatureId, dest: Position, teleported: bool) {
        let Some(origin) = self.creature(creature).and_then(|c| c.parent) else {
            return;
        };
        self.shift_creature(creature, origin, dest, teleported);
        let mut at = dest;
        for _ in 0..crate::world::holder::MAX_HOLDER_DEPTH {
            let redirect = self.map.tile(at).and_then(|tile| tile.redirect);
            match redirect {
                Some(target) if self.map.has_tile(target) && target != at => {
                    self.shift_creature(creature, at, target, true);
                    at = target;
                }
                _ => break,
            }
        }
        if at.z != origin.z {
            let moved_x = at.x != origin.x;
            let moved_y = at.y != origin.y;
            let facing = if moved_x && !moved_y {
                Some(if at.x < origin.x {
                    Direction::West
                } else {
                    Direction::East
                })
            } else if moved_y && !moved_x {
                Some(if at.y < origin.y {
                    Direction::North
                } else {
                    Direction::South
                })
            } else {
                None
            };
            if let Some(facing) = facing {
                let changed = self
                    .creature(creature)
                    .map(|c| c.direction != facing)
                    .unwrap_or(false);
                if changed {
                    if let Some(creature_mut) = self.creature_mut(creature) {
                        creature_mut.direction = facing;
                    }
                    self.push_event(WorldEvent::CreatureTurned {
                        creature,
                        direction: facing,
                    });
                }
            }
        }
    }

    fn shift_creature(&mut self, creature: CreatureId, from: Position, to: Position, teleported: bool) {
        let index = TileHolder(from)
            .thing_index(self, Thing::Creature(creature))
            .unwrap_or(0);
        TileHolder(from).remove_thing(self, Thing::Creature(creature), 1);
        TileHolder(to).add_thing(self, INDEX_ANY, Thing::Creature(creature));
        post_remove_notification(
            self,
            HolderRef::Tile(from),
            Thing::Creature(creature),
            Some(HolderRef::Tile(to)),
            index,
        );
        let landed = TileHolder(to)
            .thing_index(self, Thing::Creature(creature))
            .unwrap_or(0);
        post_add_notification(
            self,
            HolderRef::Tile(to),
            Thing::Creature(creature),
            Some(HolderRef::Tile(from)),
            landed,
        );
        self.push_event(WorldEvent::CreatureMoved {
            creature,
            from,
            to,
            teleported,
        });
        self.with_hooks(|world, hooks| hooks.on_creature_move(world, creature, from, to));
    }

    /// Moves a creature to an exact position, ignoring blockers and skipping
    /// redirects.
    pub fn teleport_creature(&mut self, creature: CreatureId, to: Position) -> Outcome {
        let Some(from) = self.creature(creature).and_then(|c| c.parent) else {
            return Outcome::NotPossible;
        };
        if !self.map.has_tile(to) {
            return Outcome::NotPossible;
        }
        let outcome = TileHolder(to).query_add(
            self,
            INDEX_ANY,
            Thing::Creature(creature),
            1,
            FLAG_NOLIMIT,
            None,
        );
        if !outcome.is_ok() {
            return outcome;
        }
        self.shift_creature(creature, from, to, true);
        Outcome::Ok
    }

    /// One creature shoving another: the target is stepped away from the
    /// actor, provided it is adjacent and willing to be moved.
    pub fn push_creature(&mut self, actor: CreatureId, target: CreatureId) -> Outcome {
        let Some(actor_pos) = self.creature(actor).and_then(|c| c.parent) else {
            return Outcome::NotPossible;
        };
        let Some(pushed) = self.creature(target) else {
            return Outcome::NotPossible;
        };
        let Some(target_pos) = pushed.parent else {
            return Outcome::NotPossible;
        };
        if !pushed.pushable {
            return Outcome::NotMoveable;
        }
        if !actor_pos.in_range_z(target_pos, 1, 1, 0) {
            return Outcome::TooFarAway;
        }
        let direction = if actor_pos == target_pos {
            // Sharing a tile: shove toward any free neighbour.
            match self
                .closest_free_tile(target, target_pos)
                .filter(|landing| *landing != target_pos)
            {
                Some(landing) => target_pos.direction_to(landing),
                None => return Outcome::NotEnoughRoom,
            }
        } else {
            actor_pos.direction_to(target_pos)
        };
        self.move_creature_step(target, direction)
    }

    // -- auto walk ----------------------------------------------------------

    pub fn start_auto_walk(&mut self, creature: CreatureId, path: Vec<Direction>) {
        let now = self.now_ms;
        if let Some(creature) = self.creature_mut(creature) {
            creature.walk_queue = path.into();
            creature.next_step_at_ms = now;
        }
    }

    pub fn stop_auto_walk(&mut self, creature: CreatureId) {
        let had_steps = self
            .creature(creature)
            .map(|c| !c.walk_queue.is_empty())
            .unwrap_or(false);
        if let Some(creature_mut) = self.creature_mut(creature) {
            creature_mut.walk_queue.clear();
        }
        if had_steps {
            self.push_event(WorldEvent::WalkCancelled { creature });
        }
    }

    /// Advances every queued walk whose step delay has elapsed. A blocked
    /// step cancels the rest of that creature's path.
    pub(crate) fn walk_creatures(&mut self) {
        let now = self.now_ms;
        let due: Vec<CreatureId> = self
            .creatures
            .values()
            .filter(|creature| {
                !creature.removed
                    && creature.is_placed()
                    && !creature.walk_queue.is_empty()
                    && creature.next_step_at_ms <= now
            })
            .map(|creature| creature.id)
            .collect();
        for id in due {
            while let Some(direction) = self
                .creature_mut(id)
                .and_then(|creature| creature.walk_queue.pop_front())
            {
                let outcome = self.move_creature_step(id, direction);
                if !outcome.is_ok() {
                    // The blocked step was already popped, so the cancellation
                    // cannot depend on the queue still holding steps.
                    if let Some(creature) = self.creature_mut(id) {
                        creature.walk_queue.clear();
                    }
                    self.push_event(WorldEvent::WalkCancelled { creature: id });
                    break;
                }
                let next = self.now_ms + WALK_STEP_MS;
                let mut more = false;
                if let Some(creature) = self.creature_mut(id) {
                    creature.next_step_at_ms = next;
                    more = !creature.walk_queue.is_empty();
                }
                if more {
                    // One step per pass; the rest waits for the delay.
                    break;
                }
            }
        }
    }

    /// The periodic think pass. Creatures alternate between an active and a
    /// resting slot, so each one thinks every other pass.
    pub(crate) fn check_creatures(&mut self) {
        let list = self.check_list.clone();
        for id in list {
            let Some(creature) = self.creature(id) else {
                continue;
            };
            if !creature.in_check_list || !creature.is_placed() {
                continue;
            }
            let active = creature.check_active;
            if let Some(creature_mut) = self.creature_mut(id) {
                creature_mut.check_active = !active;
            }
            if active {
                self.with_hooks(|world, hooks| hooks.on_creature_think(world, id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::creature::{Creature, CreatureKind};
    use crate::world::state::testkit;

    fn pile_up(world: &mut World, position: Position, count: usize) {
        for _ in 0..count {
            testkit::drop_on_tile(world, position, testkit::BOULDER, 1);
        }
    }

    #[test]
    fn walking_off_a_pile_climbs_a_floor() {
        let mut world = testkit::world();
        let base = Position::new(10, 10, 7);
        let upper = Position::new(11, 10, 6);
        testkit::add_tile(&mut world, base);
        testkit::add_tile(&mut world, upper);
        pile_up(&mut world, base, 3);
        let player = testkit::spawn_player(&mut world, base);

        let outcome = world.move_creature_step(player, Direction::East);
        assert_eq!(outcome, Outcome::Ok);
        let creature = world.creature(player).expect("player");
        assert_eq!(creature.parent, Some(upper));
        assert_eq!(creature.direction, Direction::East);
    }

    #[test]
    fn walking_into_a_void_drops_onto_a_pile() {
        let mut world = testkit::world();
        let base = Position::new(10, 10, 6);
        let lower = Position::new(11, 10, 7);
        testkit::add_tile(&mut world, base);
        testkit::add_tile(&mut world, lower);
        pile_up(&mut world, lower, 3);
        let player = testkit::spawn_player(&mut world, base);

        let outcome = world.move_creature_step(player, Direction::East);
        assert_eq!(outcome, Outcome::Ok);
        assert_eq!(world.creature(player).expect("player").parent, Some(lower));
    }

    #[test]
    fn diagonal_steps_never_change_floors() {
        let mut world = testkit::world();
        let base = Position::new(10, 10, 7);
        let upper = Position::new(11, 9, 6);
        testkit::add_tile(&mut world, base);
        testkit::add_tile(&mut world, upper);
        pile_up(&mut world, base, 3);
        let player = testkit::spawn_player(&mut world, base);

        // No tile at (11,9,7), and the floor above is out of diagonal reach.
        let outcome = world.move_creature_step(player, Direction::Northeast);
        assert_eq!(outcome, Outcome::NotPossible);
        assert_eq!(world.creature(player).expect("player").parent, Some(base));
    }

    #[test]
    fn redirect_tiles_forward_the_creature() {
        let mut world = testkit::world();
        let start = Position::new(10, 10, 7);
        let stairs = Position::new(11, 10, 7);
        let landing = Position::new(20, 20, 6);
        testkit::add_tile(&mut world, start);
        testkit::add_tile(&mut world, stairs);
        testkit::add_tile(&mut world, landing);
        world.map.tile_mut(stairs).expect("stairs").redirect = Some(landing);
        let player = testkit::spawn_player(&mut world, start);

        let outcome = world.move_creature_step(player, Direction::East);
        assert_eq!(outcome, Outcome::Ok);
        assert_eq!(world.creature(player).expect("player").parent, Some(landing));
        assert!(!world.map.tile(stairs).expect("stairs").contains_creature(player));
    }

    #[test]
    fn blocked_destination_refuses_the_step() {
        let mut world = testkit::world();
        let a = Position::new(10, 10, 7);
        let b = Position::new(11, 10, 7);
        testkit::add_tile(&mut world, a);
        testkit::add_tile(&mut world, b);
        testkit::drop_on_tile(&mut world, b, testkit::BOULDER, 1);
        let player = testkit::spawn_player(&mut world, a);

        let outcome = world.move_creature_step(player, Direction::East);
        assert_eq!(outcome, Outcome::NotEnoughRoom);
        assert_eq!(world.creature(player).expect("player").parent, Some(a));
    }

    #[test]
    fn place_creature_spills_to_a_free_neighbour() {
        let mut world = testkit::world();
        let center = Position::new(10, 10, 7);
        let east = Position::new(11, 10, 7);
        testkit::add_tile(&mut world, center);
        testkit::add_tile(&mut world, east);
        testkit::spawn_monster(&mut world, center);

        let id = world.insert_creature(Creature::new("Cara", CreatureKind::Player));
        let landing = world.place_creature(id, center, false).expect("place");
        assert_eq!(landing, east);
        assert!(world.check_list.contains(&id));
    }

    #[test]
    fn remove_creature_takes_summons_along() {
        let mut world = testkit::world();
        let a = Position::new(10, 10, 7);
        testkit::add_tile(&mut world, a);
        let master = testkit::spawn_monster(&mut world, a);
        let summon = testkit::spawn_monster(&mut world, a);
        world.creature_mut(master).expect("master").summons.push(summon);
        world.creature_mut(summon).expect("summon").master = Some(master);

        world.remove_creature(master).expect("remove");
        assert!(world.creature(master).is_none());
        assert!(world.creature(summon).is_none());
        let tile = world.map.tile(a).expect("tile");
        assert!(tile.creatures.is_empty());
    }

    #[test]
    fn pushing_shoves_the_target_away() {
        let mut world = testkit::world();
        let a = Position::new(10, 10, 7);
        let b = Position::new(11, 10, 7);
        let c = Position::new(12, 10, 7);
        testkit::add_tile(&mut world, a);
        testkit::add_tile(&mut world, b);
        testkit::add_tile(&mut world, c);
        let player = testkit::spawn_player(&mut world, a);
        let rat = testkit::spawn_monster(&mut world, b);

        assert_eq!(world.push_creature(player, rat), Outcome::Ok);
        assert_eq!(world.creature(rat).expect("rat").parent, Some(c));
    }

    #[test]
    fn players_cannot_be_pushed() {
        let mut world = testkit::world();
        let a = Position::new(10, 10, 7);
        let b = Position::new(11, 10, 7);
        testkit::add_tile(&mut world, a);
        testkit::add_tile(&mut world, b);
        let pusher = testkit::spawn_player(&mut world, a);
        let target = testkit::spawn_player(&mut world, b);
        assert_eq!(world.push_creature(pusher, target), Outcome::NotMoveable);
    }

    #[test]
    fn auto_walk_paces_steps_and_cancels_when_blocked() {
        let mut world = testkit::world();
        let a = Position::new(10, 10, 7);
        let b = Position::new(11, 10, 7);
        testkit::add_tile(&mut world, a);
        testkit::add_tile(&mut world, b);
        // Two queued steps, but only one walkable tile east.
        let player = testkit::spawn_player(&mut world, a);
        world.start_auto_walk(player, vec![Direction::East, Direction::East]);
        world.take_events();

        world.tick(100);
        assert_eq!(world.creature(player).expect("player").parent, Some(b));
        // Second step is still waiting out the delay.
        assert_eq!(
            world.creature(player).expect("player").walk_queue.len(),
            1
        );
        world.tick(100 + WALK_STEP_MS);
        let creature = world.creature(player).expect("player");
        assert_eq!(creature.parent, Some(b));
        assert!(creature.walk_queue.is_empty());
        let events = world.take_events();
        assert!(events
            .iter()
            .any(|event| matches!(event, WorldEvent::WalkCancelled { creature } if *creature == player)));
    }

    #[test]
    fn teleport_ignores_blockers() {
        let mut world = testkit::world();
        let a = Position::new(10, 10, 7);
        let b = Position::new(30, 30, 5);
        testkit::add_tile(&mut world, a);
        testkit::add_tile(&mut world, b);
        testkit::drop_on_tile(&mut world, b, testkit::BOULDER, 1);
        let player = testkit::spawn_player(&mut world, a);
        assert_eq!(world.teleport_creature(player, b), Outcome::Ok);
        assert_eq!(world.creature(player).expect("player").parent, Some(b));
        let events = world.take_events();
        assert!(events.iter().any(|event| matches!(
            event,
            WorldEvent::CreatureMoved { teleported: true, .. }
        )));
    }
}
