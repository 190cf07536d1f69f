use crate::entities::creature::CreatureId;
use crate::entities::item::{DecayState, ItemId, ItemTypeId};
use crate::world::holder::{
    holder_chain_contains_item, post_add_notification, post_remove_notification, Holder,
    HolderRef, Thing, FLAG_IGNORENOTMOVEABLE, FLAG_NOLIMIT, INDEX_ANY,
};
use crate::world::item_types::STACK_LIMIT;
use crate::world::outcome::Outcome;
use crate::world::position::Position;
use crate::world::state::{World, WorldEvent};
use std::collections::HashSet;

/// Wire marker for "the thing being moved is a creature, not an item".
const CREATURE_MARKER: u16 = 99;

/// Horizontal throw reach for tile-to-tile item moves.
const THROW_RANGE_X: u16 = 7;
const THROW_RANGE_Y: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveResult {
    pub outcome: Outcome,
    /// Units that actually changed holders.
    pub moved: u32,
    /// The item now standing at the destination for the moved units; for a
    /// merge this is the destination stack, otherwise the moved item itself.
    pub moved_item: Option<ItemId>,
}

impl MoveResult {
    fn fail(outcome: Outcome) -> Self {
        Self {
            outcome,
            moved: 0,
            moved_item: None,
        }
    }
}

impl World {
    /// Moves `count` units of an item into another holder. The operation is
    /// query-first: every validation runs before the first mutation, so a
    /// refusal leaves the world untouched.
    pub fn move_item(
        &mut self,
        actor: Option<CreatureId>,
        item: ItemId,
        count: u32,
        to: HolderRef,
        to_index: i32,
        flags: u32,
    ) -> MoveResult {
        let Some(from) = self.item(item).and_then(|item| item.parent) else {
            return MoveResult::fail(Outcome::NotPossible);
        };
        let (to, to_index, mut colliding) =
            crate::world::holder::resolve_destination(self, to, to_index, Thing::Item(item), flags);

        // Moving a thing onto itself is a successful no-op.
        if colliding == Some(item) {
            return MoveResult {
                outcome: Outcome::Ok,
                moved: count,
                moved_item: Some(item),
            };
        }

        if let Some(escrow) = self.escrow_item {
            if item == escrow || holder_chain_contains_item(self, to, escrow) {
                return MoveResult::fail(Outcome::NotEnoughRoom);
            }
        }

        let mut outcome = to.query_add(self, to_index, Thing::Item(item), count, flags, actor);
        if outcome.is_ok() || outcome == Outcome::NeedsExchange {
            let veto = self
                .ask_hooks(|world, hooks| hooks.before_item_move(world, actor, item, from, to))
                .unwrap_or(Outcome::Ok);
            if !veto.is_ok() {
                return MoveResult::fail(veto);
            }
        }
        if outcome == Outcome::NeedsExchange {
            // Single-level exchange: the occupant swaps back into the source
            // holder, then the add query is asked once more. The occupant's
            // removal and the room it needs are both validated before
            // anything mutates.
            let Some(occupant) = colliding else {
                return MoveResult::fail(Outcome::NotEnoughRoom);
            };
            let occupant_count = self
                .item(occupant)
                .map(|item| u32::from(item.count))
                .unwrap_or(1);
            let swap_back =
                from.query_add(self, INDEX_ANY, Thing::Item(occupant), occupant_count, 0, actor);
            if !swap_back.is_ok() {
                return MoveResult::fail(swap_back);
            }
            let removable =
                to.query_remove(self, Thing::Item(occupant), occupant_count, 0, actor);
            if !removable.is_ok() {
                return MoveResult::fail(removable);
            }
            let (room, max_back) =
                from.query_max_count(self, INDEX_ANY, Thing::Item(occupant), occupant_count, 0);
            if !room.is_ok() || max_back < occupant_count {
                return MoveResult::fail(Outcome::NotEnoughRoom);
            }
            let occupant_index = to
                .thing_index(self, Thing::Item(occupant))
                .unwrap_or(0);
            to.remove_thing(self, Thing::Item(occupant), occupant_count);
            from.add_thing(self, INDEX_ANY, Thing::Item(occupant));
            post_remove_notification(self, to, Thing::Item(occupant), Some(from), occupant_index);
            let landed = from.thing_index(self, Thing::Item(occupant)).unwrap_or(0);
            post_add_notification(self, from, Thing::Item(occupant), Some(to), landed);
            colliding = None;
            outcome = to.query_add(self, to_index, Thing::Item(item), count, flags, actor);
        }
        if !outcome.is_ok() {
            return MoveResult::fail(outcome);
        }

        let (max_outcome, max_count) =
            to.query_max_count(self, to_index, Thing::Item(item), count, flags);
        if !max_outcome.is_ok() {
            return MoveResult::fail(max_outcome);
        }
        let stackable = self
            .type_of(item)
            .map(|item_type| item_type.stackable)
            .unwrap_or(false);
        let moving = if stackable { count.min(max_count) } else { count };

        let removable = from.query_remove(self, Thing::Item(item), moving, flags, actor);
        if !removable.is_ok() {
            return MoveResult::fail(removable);
        }

        // Commit. From here on every step is unconditional.
        let from_index = from.thing_index(self, Thing::Item(item)).unwrap_or(0);
        from.remove_thing(self, Thing::Item(item), moving);
        let fully_detached = self
            .item(item)
            .map(|item| item.parent.is_none())
            .unwrap_or(true);

        let mut moved_item = None;
        if stackable {
            let mut merged = 0u32;
            if let Some(dest_stack) = colliding {
                let mergeable = self
                    .item(dest_stack)
                    .zip(self.item(item))
                    .map(|(existing, moving)| existing.equals_for_merge(moving))
                    .unwrap_or(false);
                if mergeable {
                    let dest_count = self.item(dest_stack).map(|item| item.count).unwrap_or(0);
                    merged = u32::from(STACK_LIMIT.saturating_sub(dest_count)).min(moving);
                    if merged > 0 {
                        let type_id = self
                            .item(dest_stack)
                            .map(|item| item.type_id)
                            .unwrap_or(ItemTypeId(0));
                        to.update_thing(self, dest_stack, type_id, dest_count + merged as u16);
                        let index = to.thing_index(self, Thing::Item(dest_stack)).unwrap_or(0);
                        self.push_event(WorldEvent::ThingUpdated {
                            holder: to,
                            item: dest_stack,
                            index,
                        });
                        moved_item = Some(dest_stack);
                    }
                }
            }
            let remainder = moving - merged;
            if remainder > 0 {
                let placed = if fully_detached {
                    if let Some(item) = self.item_mut(item) {
                        item.count = remainder as u16;
                    }
                    item
                } else {
                    match self.clone_item(item, remainder as u16) {
                        Some(clone) => clone,
                        None => return MoveResult::fail(Outcome::NotPossible),
                    }
                };
                to.add_thing(self, to_index, Thing::Item(placed));
                let index = to.thing_index(self, Thing::Item(placed)).unwrap_or(0);
                post_add_notification(self, to, Thing::Item(placed), Some(from), index);
                moved_item = Some(placed);
            } else if fully_detached {
                // Everything merged away; the source stack ceases to exist.
                self.release_item(item);
            }
        } else {
            to.add_thing(self, to_index, Thing::Item(item));
            let index = to.thing_index(self, Thing::Item(item)).unwrap_or(0);
            post_add_notification(self, to, Thing::Item(item), Some(from), index);
            moved_item = Some(item);
        }
        post_remove_notification(self, from, Thing::Item(item), Some(to), from_index);

        // Whatever now stands at the destination keeps (or picks up) its
        // expiry timer; items already enrolled stay in their bucket.
        if let Some(moved) = moved_item {
            self.start_decay(moved);
        }

        self.with_hooks(|world, hooks| {
            hooks.on_item_moved(world, actor, moved_item.unwrap_or(item), from, to)
        });

        MoveResult {
            outcome: Outcome::Ok,
            moved: moving,
            moved_item,
        }
    }

    /// Places a detached item into a holder, merging into existing stacks
    /// where possible. Returns the outcome and the number of units that did
    /// not fit; those units stay on the original, still-detached item.
    pub fn add_item(
        &mut self,
        to: HolderRef,
        item: ItemId,
        index: i32,
        flags: u32,
    ) -> (Outcome, u32) {
        let Some(existing) = self.item(item) else {
            return (Outcome::NotPossible, 0);
        };
        if existing.parent.is_some() {
            self.log_invariant(&format!("add_item on already-held {:?}", item));
            return (Outcome::NotPossible, 0);
        }
        let count = u32::from(existing.count.max(1));
        let (to, to_index, colliding) =
            crate::world::holder::resolve_destination(self, to, index, Thing::Item(item), flags);

        let outcome = to.query_add(self, to_index, Thing::Item(item), count, flags, None);
        if !outcome.is_ok() {
            return (outcome, count);
        }
        let (max_outcome, max_count) =
            to.query_max_count(self, to_index, Thing::Item(item), count, flags);
        if !max_outcome.is_ok() {
            return (max_outcome, count);
        }
        let stackable = self
            .type_of(item)
            .map(|item_type| item_type.stackable)
            .unwrap_or(false);
        let placeable = if stackable { count.min(max_count) } else { count };

        let mut merged = 0u32;
        if stackable {
            if let Some(dest_stack) = colliding {
                let mergeable = self
                    .item(dest_stack)
                    .zip(self.item(item))
                    .map(|(existing, moving)| existing.equals_for_merge(moving))
                    .unwrap_or(false);
                if mergeable {
                    let dest_count = self.item(dest_stack).map(|item| item.count).unwrap_or(0);
                    merged = u32::from(STACK_LIMIT.saturating_sub(dest_count)).min(placeable);
                    if merged > 0 {
                        let type_id = self
                            .item(dest_stack)
                            .map(|item| item.type_id)
                            .unwrap_or(ItemTypeId(0));
                        to.update_thing(self, dest_stack, type_id, dest_count + merged as u16);
                        let dest_index =
                            to.thing_index(self, Thing::Item(dest_stack)).unwrap_or(0);
                        self.push_event(WorldEvent::ThingUpdated {
                            holder: to,
                            item: dest_stack,
                            index: dest_index,
                        });
                    }
                }
            }
        }
        let place = placeable - merged;
        let leftover = count - placeable;
        if place > 0 {
            if leftover > 0 {
                let Some(split) = self.clone_item(item, place as u16) else {
                    return (Outcome::NotPossible, count - merged);
                };
                if let Some(item) = self.item_mut(item) {
                    item.count = leftover as u16;
                }
                to.add_thing(self, to_index, Thing::Item(split));
                let at = to.thing_index(self, Thing::Item(split)).unwrap_or(0);
                post_add_notification(self, to, Thing::Item(split), None, at);
                self.start_decay(split);
            } else {
                if let Some(existing) = self.item_mut(item) {
                    existing.count = place as u16;
                }
                to.add_thing(self, to_index, Thing::Item(item));
                let at = to.thing_index(self, Thing::Item(item)).unwrap_or(0);
                post_add_notification(self, to, Thing::Item(item), None, at);
                self.start_decay(item);
            }
        } else if leftover > 0 {
            if let Some(existing) = self.item_mut(item) {
                existing.count = leftover as u16;
            }
        } else {
            // Fully merged into an existing stack.
            self.release_item(item);
        }
        (Outcome::Ok, leftover)
    }

    /// Removes `count` units of an item from its holder, releasing the item
    /// when nothing remains.
    pub fn remove_item(&mut self, item: ItemId, count: u32) -> Result<(), String> {
        let Some(holder) = self.item(item).and_then(|item| item.parent) else {
            return Err(format!("item {:?} is not held by anything", item));
        };
        let outcome =
            holder.query_remove(self, Thing::Item(item), count, FLAG_IGNORENOTMOVEABLE, None);
        if !outcome.is_ok() {
            return Err(format!("cannot remove {:?}: {}", item, outcome));
        }
        let index = holder.thing_index(self, Thing::Item(item)).unwrap_or(0);
        holder.remove_thing(self, Thing::Item(item), count);
        let detached = self
            .item(item)
            .map(|item| item.parent.is_none())
            .unwrap_or(true);
        if detached {
            self.release_item(item);
        } else {
            let at = holder.thing_index(self, Thing::Item(item)).unwrap_or(index);
            self.push_event(WorldEvent::ThingUpdated {
                holder,
                item,
                index: at,
            });
        }
        post_remove_notification(self, holder, Thing::Item(item), None, index);
        Ok(())
    }

    /// Changes an item's type and count in place. A change that alters the
    /// item's structural class (container, ground, always-on-top) swaps in a
    /// fresh item instead; the returned id is the survivor either way. A
    /// count of zero on a stackable or charge-bearing item removes it
    /// outright, and the returned id is then dead.
    pub fn transform_item(
        &mut self,
        item: ItemId,
        new_type: ItemTypeId,
        new_count: Option<u16>,
    ) -> Result<ItemId, String> {
        let Some(existing) = self.item(item) else {
            return Err(format!("transform of missing item {:?}", item));
        };
        let Some(holder) = existing.parent else {
            return Err(format!("transform of detached item {:?}", item));
        };
        let old_type_id = existing.type_id;
        let old_count = existing.count;
        let Some(old_type) = self.item_types.get(old_type_id) else {
            return Err(format!("item {:?} has unknown type {}", item, old_type_id.0));
        };
        let Some(target) = self.item_types.get(new_type) else {
            return Err(format!("transform into unknown type {}", new_type.0));
        };
        let count = new_count.unwrap_or(if target.stackable { old_count } else { 1 });
        if count == 0 && (old_type.stackable || old_type.has_charges) {
            self.remove_item(item, u32::from(old_count.max(1)))?;
            return Ok(item);
        }
        if old_type_id == new_type && old_count == count {
            return Ok(item);
        }
        let structural = old_type.is_container() != target.is_container()
            || old_type.is_ground != target.is_ground
            || old_type.always_on_top != target.always_on_top;
        let type_changed = old_type_id != new_type;
        if structural {
            let replacement = self.create_item(new_type, count)?;
            let index = holder.thing_index(self, Thing::Item(item)).unwrap_or(0);
            holder.replace_thing(self, index, replacement);
            self.release_item(item);
            self.push_event(WorldEvent::ThingUpdated {
                holder,
                item: replacement,
                index,
            });
            self.start_decay(replacement);
            Ok(replacement)
        } else {
            let expire = target.expire_time_ms;
            holder.update_thing(self, item, new_type, count);
            if type_changed {
                if let Some(item) = self.item_mut(item) {
                    item.duration_ms = expire.unwrap_or(0);
                    item.decay_state = DecayState::None;
                }
            }
            let index = holder.thing_index(self, Thing::Item(item)).unwrap_or(0);
            self.push_event(WorldEvent::ThingUpdated {
                holder,
                item,
                index,
            });
            if type_changed {
                self.start_decay(item);
            }
            Ok(item)
        }
    }

    /// Creates an item and hands it to a creature, preferring worn storage
    /// and falling back to the ground at its feet.
    pub fn player_add_item(
        &mut self,
        creature: CreatureId,
        type_id: ItemTypeId,
        count: u16,
    ) -> Result<ItemId, String> {
        let item = self.create_item(type_id, count)?;
        let (outcome, leftover) =
            self.add_item(HolderRef::Equipment(creature), item, INDEX_ANY, 0);
        if outcome.is_ok() && leftover == 0 {
            return Ok(item);
        }
        let Some(position) = self.creature(creature).and_then(|creature| creature.parent) else {
            self.release_item(item);
            return Err(format!("creature {:?} is not placed", creature));
        };
        let (fallback, _) =
            self.add_item(HolderRef::Tile(position), item, INDEX_ANY, FLAG_NOLIMIT);
        if !fallback.is_ok() {
            self.release_item(item);
            return Err(format!("no room for item at {}", position));
        }
        Ok(item)
    }

    /// Every item a creature carries, worn items first, then container
    /// contents breadth-first. Bounded against malformed cycles.
    pub fn inventory_items(&self, creature: CreatureId) -> Vec<ItemId> {
        let mut out = Vec::new();
        let Some(creature) = self.creature(creature) else {
            return out;
        };
        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut queue: Vec<ItemId> = creature.equipment.items().map(|(_, item)| item).collect();
        let mut cursor = 0;
        while cursor < queue.len() {
            let id = queue[cursor];
            cursor += 1;
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            if let Some(item) = self.item(id) {
                queue.extend(item.contents.iter().copied());
            }
        }
        out
    }

    pub fn find_item_of_type(&self, creature: CreatureId, type_id: ItemTypeId) -> Option<ItemId> {
        self.inventory_items(creature)
            .into_iter()
            .find(|id| self.item(*id).map(|item| item.type_id) == Some(type_id))
    }

    /// Total coin value a creature carries.
    pub fn money_value(&self, creature: CreatureId) -> u64 {
        self.inventory_items(creature)
            .into_iter()
            .filter_map(|id| {
                let item = self.item(id)?;
                let item_type = self.item_types.get(item.type_id)?;
                if item_type.worth == 0 {
                    return None;
                }
                Some(u64::from(item_type.worth) * u64::from(item.count.max(1)))
            })
            .sum()
    }

    /// Pays out `amount` in coins, largest denominations first.
    pub fn add_money(&mut self, creature: CreatureId, amount: u64) -> Result<(), String> {
        let mut remaining = amount;
        let denominations: Vec<(u32, ItemTypeId)> = self.item_types.currency_types().to_vec();
        for (worth, type_id) in denominations {
            let worth = u64::from(worth);
            let mut units = remaining / worth;
            remaining %= worth;
            while units > 0 {
                let stack = units.min(u64::from(STACK_LIMIT)) as u16;
                units -= u64::from(stack);
                self.player_add_item(creature, type_id, stack)?;
            }
        }
        if remaining > 0 {
            return Err(format!("no denomination covers remainder {}", remaining));
        }
        Ok(())
    }

    /// Takes `amount` in coins from a creature, smallest denominations
    /// first, paying back overshoot as change. Returns false without
    /// touching anything when the creature cannot cover the amount.
    pub fn remove_money(&mut self, creature: CreatureId, amount: u64) -> bool {
        if amount == 0 {
            return true;
        }
        let mut coins: Vec<(u64, ItemId, u16)> = self
            .inventory_items(creature)
            .into_iter()
            .filter_map(|id| {
                let item = self.item(id)?;
                let item_type = self.item_types.get(item.type_id)?;
                if item_type.worth == 0 {
                    return None;
                }
                Some((u64::from(item_type.worth), id, item.count.max(1)))
            })
            .collect();
        let total: u64 = coins
            .iter()
            .map(|(worth, _, count)| worth * u64::from(*count))
            .sum();
        if total < amount {
            return false;
        }
        coins.sort_by_key(|(worth, _, _)| *worth);
        let mut paid = 0u64;
        for (worth, id, count) in coins {
            if paid >= amount {
                break;
            }
            let needed = amount - paid;
            let units = u64::from(count).min(needed.div_ceil(worth));
            if self.remove_item(id, units as u32).is_err() {
                continue;
            }
            paid += worth * units;
        }
        if paid > amount {
            if let Err(err) = self.add_money(creature, paid - amount) {
                self.log_invariant(&format!("change payout failed: {}", err));
            }
        }
        true
    }

    /// Moves a thing to a map position without distance or permission
    /// checks.
    pub fn teleport_thing(&mut self, thing: Thing, to: Position) -> Outcome {
        match thing {
            Thing::Item(item) => {
                let count = self
                    .item(item)
                    .map(|item| u32::from(item.count.max(1)))
                    .unwrap_or(1);
                self.move_item(None, item, count, HolderRef::Tile(to), INDEX_ANY, FLAG_NOLIMIT)
                    .outcome
            }
            Thing::Creature(creature) => self.teleport_creature(creature, to),
        }
    }

    /// Entry point for a client move request, addressed in wire terms:
    /// positions that may name holder space, a thing index, and a type id
    /// used to verify the client's view is current.
    pub fn player_move_thing(
        &mut self,
        actor: CreatureId,
        from_pos: Position,
        type_id: ItemTypeId,
        from_index: u8,
        to_pos: Position,
        count: u8,
    ) -> Outcome {
        let Some(actor_pos) = self.creature(actor).and_then(|creature| creature.parent) else {
            return Outcome::NotPossible;
        };
        if type_id.0 == CREATURE_MARKER {
            let Some(Thing::Creature(target)) =
                HolderRef::Tile(from_pos).thing_at(self, usize::from(from_index))
            else {
                return Outcome::NotPossible;
            };
            if !to_pos.is_holder_space() && !from_pos.in_range(to_pos, 1, 1) {
                return Outcome::TooFarAway;
            }
            return self.push_creature(actor, target);
        }
        let Some((_, item)) = self.decode_source(actor, from_pos, from_index, type_id) else {
            return Outcome::NotPossible;
        };
        let Some((to, to_index)) = self.decode_destination(actor, to_pos) else {
            return Outcome::NotPossible;
        };
        if !from_pos.is_holder_space() {
            if actor_pos.z > from_pos.z {
                return Outcome::FirstGoUpstairs;
            }
            if actor_pos.z < from_pos.z {
                return Outcome::FirstGoDownstairs;
            }
            if !actor_pos.in_range(from_pos, 1, 1) {
                return Outcome::TooFarAway;
            }
        }
        if let HolderRef::Tile(dest) = to {
            let origin = if from_pos.is_holder_space() {
                actor_pos
            } else {
                from_pos
            };
            if !origin.in_range_z(dest, THROW_RANGE_X, THROW_RANGE_Y, 0) {
                return Outcome::CannotThrow;
            }
        }
        let requested = u32::from(count.max(1));
        let result = self.move_item(Some(actor), item, requested, to, to_index, 0);
        if result.outcome.is_ok() && result.moved < requested {
            // Part of the stack stayed behind; the client hears about the
            // shortfall even though the fitting units moved.
            return Outcome::NotEnoughRoom;
        }
        result.outcome
    }

    fn decode_source(
        &self,
        actor: CreatureId,
        position: Position,
        index: u8,
        type_id: ItemTypeId,
    ) -> Option<(HolderRef, ItemId)> {
        let (holder, at) = if position.is_holder_space() {
            if let Some((container_id, slot)) = position.holder_container() {
                let container = self
                    .creature(actor)?
                    .open_containers
                    .get(&container_id)
                    .copied()?;
                (HolderRef::Container(container), usize::from(slot))
            } else {
                let slot = position.holder_slot()?;
                (HolderRef::Equipment(actor), usize::from(slot))
            }
        } else {
            (HolderRef::Tile(position), usize::from(index))
        };
        let Thing::Item(item) = holder.thing_at(self, at)? else {
            return None;
        };
        // The client addressed what it last saw; a type mismatch means the
        // view is stale and the request is void.
        if self.item(item)?.type_id != type_id {
            return None;
        }
        Some((holder, item))
    }

    fn decode_destination(
        &self,
        actor: CreatureId,
        position: Position,
    ) -> Option<(HolderRef, i32)> {
        if position.is_holder_space() {
            if let Some((container_id, slot)) = position.holder_container() {
                let container = self
                    .creature(actor)?
                    .open_containers
                    .get(&container_id)
                    .copied()?;
                return Some((HolderRef::Container(container), i32::from(slot)));
            }
            let slot = position.holder_slot()?;
            return Some((HolderRef::Equipment(actor), i32::from(slot)));
        }
        Some((HolderRef::Tile(position), INDEX_ANY))
    }
}
