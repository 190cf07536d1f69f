use crate::world::holder::HolderRef;
use crate::world::item_types::ItemType;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(pub u32);

static NEXT_ITEM_ID: AtomicU32 = AtomicU32::new(1);

impl ItemId {
    pub fn next() -> Self {
        let id = NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed);
        ItemId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemTypeId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Ground,
    Container,
    Weapon,
    Armor,
    Consumable,
    Rune,
    Misc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemAttribute {
    Text(String),
    UniqueId(u16),
    WrapId(u16),
    Charges(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayState {
    None,
    Pending,
    Done,
}

/// A placeable item. Children of container items are held by id; the
/// back-reference to the owning holder is kept in `parent`. Exactly one
/// holder owns an item at any time, or none while the item is detached and
/// pending destruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub type_id: ItemTypeId,
    pub count: u16,
    pub attributes: Vec<ItemAttribute>,
    pub contents: Vec<ItemId>,
    pub duration_ms: u32,
    pub decay_state: DecayState,
    pub parent: Option<HolderRef>,
    pub removed: bool,
}

impl Item {
    pub fn new(type_id: ItemTypeId, count: u16) -> Self {
        Self {
            id: ItemId::next(),
            type_id,
            count,
            attributes: Vec::new(),
            contents: Vec::new(),
            duration_ms: 0,
            decay_state: DecayState::None,
            parent: None,
            removed: false,
        }
    }

    pub fn unique_id(&self) -> Option<u16> {
        self.attributes.iter().find_map(|attr| match attr {
            ItemAttribute::UniqueId(id) => Some(*id),
            _ => None,
        })
    }

    pub fn charges(&self) -> Option<u16> {
        self.attributes.iter().find_map(|attr| match attr {
            ItemAttribute::Charges(value) => Some(*value),
            _ => None,
        })
    }

    pub fn text(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attr| match attr {
            ItemAttribute::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn set_text(&mut self, text: &str) {
        self.attributes
            .retain(|attr| !matches!(attr, ItemAttribute::Text(_)));
        if !text.is_empty() {
            self.attributes.push(ItemAttribute::Text(text.to_string()));
        }
    }

    /// Merge compatibility: same type, same attributes, and neither side
    /// carries a unique id. Count is deliberately not compared.
    pub fn equals_for_merge(&self, other: &Item) -> bool {
        self.type_id == other.type_id
            && self.unique_id().is_none()
            && other.unique_id().is_none()
            && self.attributes == other.attributes
    }

    pub fn count_of(&self, item_type: &ItemType) -> u32 {
        if item_type.stackable {
            u32::from(self.count.max(1))
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ids_are_unique() {
        let a = Item::new(ItemTypeId(1), 1);
        let b = Item::new(ItemTypeId(1), 1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn merge_equality_ignores_count() {
        let a = Item::new(ItemTypeId(5), 10);
        let b = Item::new(ItemTypeId(5), 90);
        assert!(a.equals_for_merge(&b));
    }

    #[test]
    fn unique_id_blocks_merge() {
        let a = Item::new(ItemTypeId(5), 10);
        let mut b = Item::new(ItemTypeId(5), 10);
        b.attributes.push(ItemAttribute::UniqueId(1000));
        assert!(!a.equals_for_merge(&b));
        assert!(!b.equals_for_merge(&a));
        assert_eq!(b.unique_id(), Some(1000));
    }

    #[test]
    fn set_text_replaces_existing() {
        let mut item = Item::new(ItemTypeId(9), 1);
        item.set_text("first");
        item.set_text("second");
        assert_eq!(item.text(), Some("second"));
        item.set_text("");
        assert_eq!(item.text(), None);
    }
}
