use crate::entities::creature::CreatureId;
use crate::entities::item::ItemId;
use crate::world::position::Position;
use std::collections::HashMap;

/// One map tile. Item children are split the way clients stack them: the
/// ground item, then always-on-top items, then creatures, then the pile of
/// ordinary items with the newest at the front.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tile {
    pub ground: Option<ItemId>,
    pub top_items: Vec<ItemId>,
    pub down_items: Vec<ItemId>,
    pub creatures: Vec<CreatureId>,
    pub protection_zone: bool,
    pub no_logout: bool,
    /// Floor-change connector: entering creatures are redirected to this
    /// position (stairs, ladders, teleporters).
    pub redirect: Option<Position>,
}

impl Tile {
    pub fn item_count(&self) -> usize {
        usize::from(self.ground.is_some()) + self.top_items.len() + self.down_items.len()
    }

    pub fn thing_count(&self) -> usize {
        self.item_count() + self.creatures.len()
    }

    /// Topmost ordinary item, the one a merge or pickup targets first.
    pub fn top_down_item(&self) -> Option<ItemId> {
        self.down_items.first().copied()
    }

    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.ground
            .iter()
            .copied()
            .chain(self.top_items.iter().copied())
            .chain(self.down_items.iter().copied())
    }

    pub fn contains_item(&self, item: ItemId) -> bool {
        self.items().any(|id| id == item)
    }

    pub fn contains_creature(&self, creature: CreatureId) -> bool {
        self.creatures.contains(&creature)
    }
}

#[derive(Debug, Default, Clone)]
pub struct Map {
    tiles: HashMap<Position, Tile>,
}

impl Map {
    pub fn tile(&self, position: Position) -> Option<&Tile> {
        self.tiles.get(&position)
    }

    pub fn tile_mut(&mut self, position: Position) -> Option<&mut Tile> {
        self.tiles.get_mut(&position)
    }

    pub fn has_tile(&self, position: Position) -> bool {
        self.tiles.contains_key(&position)
    }

    pub fn insert_tile(&mut self, position: Position, tile: Tile) {
        self.tiles.insert(position, tile);
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.tiles.keys().copied()
    }
}
