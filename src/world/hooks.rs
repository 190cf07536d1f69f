use crate::entities::creature::CreatureId;
use crate::entities::item::ItemId;
use crate::world::holder::HolderRef;
use crate::world::outcome::Outcome;
use crate::world::position::Position;
use crate::world::state::World;

/// Gameplay extension points. The `before_*` hooks run once the destination
/// has been resolved and its add query answered, ahead of any mutation, and
/// may veto by returning a non-success outcome; the
/// `on_*` hooks observe committed mutations. Implementations may call back
/// into world operations; reentrancy is safe because the hooks are taken out
/// of the world for the duration of a call.
pub trait GameHooks {
    fn before_item_move(
        &mut self,
        _world: &mut World,
        _actor: Option<CreatureId>,
        _item: ItemId,
        _from: HolderRef,
        _to: HolderRef,
    ) -> Outcome {
        Outcome::Ok
    }

    fn before_creature_move(
        &mut self,
        _world: &mut World,
        _creature: CreatureId,
        _from: Position,
        _to: Position,
    ) -> Outcome {
        Outcome::Ok
    }

    fn on_creature_appear(&mut self, _world: &mut World, _creature: CreatureId) {}

    fn on_creature_disappear(&mut self, _world: &mut World, _creature: CreatureId) {}

    fn on_creature_move(
        &mut self,
        _world: &mut World,
        _creature: CreatureId,
        _from: Position,
        _to: Position,
    ) {
    }

    fn on_item_moved(
        &mut self,
        _world: &mut World,
        _actor: Option<CreatureId>,
        _item: ItemId,
        _from: HolderRef,
        _to: HolderRef,
    ) {
    }

    /// Called when a creature's periodic think slot comes up.
    fn on_creature_think(&mut self, _world: &mut World, _creature: CreatureId) {}
}

pub struct NoopHooks;

impl GameHooks for NoopHooks {}
