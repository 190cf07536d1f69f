use crate::entities::item::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EquipSlot {
    Head,
    Necklace,
    Backpack,
    Armor,
    RightHand,
    LeftHand,
    Legs,
    Feet,
    Ring,
    Ammo,
}

impl EquipSlot {
    pub const COUNT: usize = 10;

    pub fn index(self) -> usize {
        match self {
            EquipSlot::Head => 0,
            EquipSlot::Necklace => 1,
            EquipSlot::Backpack => 2,
            EquipSlot::Armor => 3,
            EquipSlot::RightHand => 4,
            EquipSlot::LeftHand => 5,
            EquipSlot::Legs => 6,
            EquipSlot::Feet => 7,
            EquipSlot::Ring => 8,
            EquipSlot::Ammo => 9,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(EquipSlot::Head),
            1 => Some(EquipSlot::Necklace),
            2 => Some(EquipSlot::Backpack),
            3 => Some(EquipSlot::Armor),
            4 => Some(EquipSlot::RightHand),
            5 => Some(EquipSlot::LeftHand),
            6 => Some(EquipSlot::Legs),
            7 => Some(EquipSlot::Feet),
            8 => Some(EquipSlot::Ring),
            9 => Some(EquipSlot::Ammo),
            _ => None,
        }
    }
}

pub const EQUIP_SLOTS: [EquipSlot; EquipSlot::COUNT] = [
    EquipSlot::Head,
    EquipSlot::Necklace,
    EquipSlot::Backpack,
    EquipSlot::Armor,
    EquipSlot::RightHand,
    EquipSlot::LeftHand,
    EquipSlot::Legs,
    EquipSlot::Feet,
    EquipSlot::Ring,
    EquipSlot::Ammo,
];

/// The worn-equipment holder of a creature: a fixed set of slots, each with
/// at most one item. Stack arithmetic and validation live in the holder
/// protocol; this is only the slot storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equipment {
    slots: Vec<Option<ItemId>>,
}

impl Default for Equipment {
    fn default() -> Self {
        Self {
            slots: vec![None; EquipSlot::COUNT],
        }
    }
}

impl Equipment {
    pub fn slot(&self, slot: EquipSlot) -> Option<ItemId> {
        self.slots.get(slot.index()).and_then(|entry| *entry)
    }

    pub fn set_slot(&mut self, slot: EquipSlot, item: Option<ItemId>) {
        if let Some(entry) = self.slots.get_mut(slot.index()) {
            *entry = item;
        }
    }

    pub fn slot_of(&self, item: ItemId) -> Option<EquipSlot> {
        self.slots
            .iter()
            .position(|entry| *entry == Some(item))
            .and_then(EquipSlot::from_index)
    }

    pub fn first_free_slot(&self) -> Option<EquipSlot> {
        self.slots
            .iter()
            .position(|entry| entry.is_none())
            .and_then(EquipSlot::from_index)
    }

    pub fn items(&self) -> impl Iterator<Item = (EquipSlot, ItemId)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, entry)| {
            entry.and_then(|item| EquipSlot::from_index(index).map(|slot| (slot, item)))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|entry| entry.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trip() {
        for slot in EQUIP_SLOTS {
            assert_eq!(EquipSlot::from_index(slot.index()), Some(slot));
        }
        assert_eq!(EquipSlot::from_index(EquipSlot::COUNT), None);
    }

    #[test]
    fn set_and_find_items() {
        let mut equipment = Equipment::default();
        let sword = ItemId::next();
        equipment.set_slot(EquipSlot::LeftHand, Some(sword));
        assert_eq!(equipment.slot(EquipSlot::LeftHand), Some(sword));
        assert_eq!(equipment.slot_of(sword), Some(EquipSlot::LeftHand));
        assert_eq!(equipment.first_free_slot(), Some(EquipSlot::Head));
        assert_eq!(equipment.items().count(), 1);
    }
}
