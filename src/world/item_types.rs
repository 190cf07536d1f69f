use crate::entities::item::{ItemKind, ItemTypeId};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Stack limit for cumulative items: counts live in `1..=STACK_LIMIT`.
pub const STACK_LIMIT: u16 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemType {
    pub id: ItemTypeId,
    pub name: String,
    pub kind: ItemKind,
    pub stackable: bool,
    pub has_charges: bool,
    pub has_fluid: bool,
    pub always_on_top: bool,
    pub block_solid: bool,
    pub moveable: bool,
    pub pickupable: bool,
    pub has_height: bool,
    pub is_ground: bool,
    pub container_capacity: Option<u16>,
    /// Weight of one unit, in hundredths of an ounce.
    pub weight: u32,
    /// Value of one unit when the item is currency, zero otherwise.
    pub worth: u32,
    pub expire_time_ms: Option<u32>,
    pub decay_target: Option<ItemTypeId>,
}

impl ItemType {
    pub fn is_container(&self) -> bool {
        self.container_capacity.is_some()
    }

    pub fn has_sub_type(&self) -> bool {
        self.stackable || self.has_charges || self.has_fluid
    }
}

#[derive(Debug, Default, Clone)]
pub struct ItemTypeIndex {
    types: HashMap<ItemTypeId, ItemType>,
    currency: Vec<(u32, ItemTypeId)>,
}

impl ItemTypeIndex {
    pub fn get(&self, id: ItemTypeId) -> Option<&ItemType> {
        self.types.get(&id)
    }

    pub fn insert(&mut self, item: ItemType) -> Result<(), String> {
        if self.types.contains_key(&item.id) {
            return Err(format!("item type {:?} already exists", item.id));
        }
        if item.worth > 0 {
            self.currency.push((item.worth, item.id));
            self.currency.sort_by(|a, b| b.0.cmp(&a.0));
        }
        self.types.insert(item.id, item);
        Ok(())
    }

    /// Currency types ordered by descending worth, for change-making.
    pub fn currency_types(&self) -> &[(u32, ItemTypeId)] {
        &self.currency
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    items: Vec<RawItemType>,
}

#[derive(Debug, Deserialize)]
struct RawItemType {
    id: u16,
    name: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    stackable: bool,
    #[serde(default)]
    charges: bool,
    #[serde(default)]
    fluid: bool,
    #[serde(default)]
    always_on_top: bool,
    #[serde(default)]
    block_solid: bool,
    #[serde(default = "default_true")]
    moveable: bool,
    #[serde(default)]
    pickupable: bool,
    #[serde(default)]
    height: bool,
    #[serde(default)]
    ground: bool,
    #[serde(default)]
    container_capacity: Option<u16>,
    #[serde(default)]
    weight: u32,
    #[serde(default)]
    worth: u32,
    #[serde(default)]
    expire_time_secs: Option<u32>,
    #[serde(default)]
    expire_target: Option<u16>,
}

fn default_true() -> bool {
    true
}

pub fn load_item_catalog(path: &Path) -> Result<ItemTypeIndex, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read item catalog {}: {}", path.display(), err))?;
    parse_item_catalog(&content)
        .map_err(|err| format!("item catalog {}: {}", path.display(), err))
}

pub fn parse_item_catalog(content: &str) -> Result<ItemTypeIndex, String> {
    let raw: RawCatalog = serde_yaml::from_str(content)
        .map_err(|err| format!("invalid catalog yaml: {}", err))?;

    let mut index = ItemTypeIndex::default();
    for entry in raw.items {
        let item = item_type_from_raw(entry)?;
        index.insert(item)?;
    }
    Ok(index)
}

fn item_type_from_raw(raw: RawItemType) -> Result<ItemType, String> {
    let kind = match raw.kind.as_deref() {
        Some("ground") => ItemKind::Ground,
        Some("container") => ItemKind::Container,
        Some("weapon") => ItemKind::Weapon,
        Some("armor") => ItemKind::Armor,
        Some("consumable") => ItemKind::Consumable,
        Some("rune") => ItemKind::Rune,
        Some("misc") | None => {
            if raw.ground {
                ItemKind::Ground
            } else if raw.container_capacity.is_some() {
                ItemKind::Container
            } else {
                ItemKind::Misc
            }
        }
        Some(other) => return Err(format!("item {} has unknown kind '{}'", raw.id, other)),
    };
    let decay_target = raw
        .expire_target
        .and_then(|value| if value == 0 { None } else { Some(ItemTypeId(value)) });
    Ok(ItemType {
        id: ItemTypeId(raw.id),
        name: raw.name,
        kind,
        stackable: raw.stackable,
        has_charges: raw.charges,
        has_fluid: raw.fluid,
        always_on_top: raw.always_on_top,
        block_solid: raw.block_solid,
        moveable: raw.moveable,
        pickupable: raw.pickupable,
        has_height: raw.height,
        is_ground: raw.ground || kind == ItemKind::Ground,
        container_capacity: raw.container_capacity,
        weight: raw.weight,
        worth: raw.worth,
        expire_time_ms: raw.expire_time_secs.map(|secs| secs.saturating_mul(1000)),
        decay_target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
items:
  - id: 101
    name: grass
    ground: true
    block_solid: false
    moveable: false
  - id: 200
    name: gold coin
    stackable: true
    pickupable: true
    weight: 10
    worth: 1
  - id: 201
    name: platinum coin
    stackable: true
    pickupable: true
    weight: 10
    worth: 100
  - id: 300
    name: backpack
    pickupable: true
    weight: 1800
    container_capacity: 20
  - id: 400
    name: torch
    pickupable: true
    weight: 500
    expire_time_secs: 10
    expire_target: 401
  - id: 401
    name: burnt torch
    pickupable: true
    weight: 500
"#;

    #[test]
    fn catalog_parses_and_indexes() {
        let index = parse_item_catalog(CATALOG).expect("parse catalog");
        assert_eq!(index.len(), 6);
        let backpack = index.get(ItemTypeId(300)).expect("backpack");
        assert!(backpack.is_container());
        assert_eq!(backpack.container_capacity, Some(20));
        let torch = index.get(ItemTypeId(400)).expect("torch");
        assert_eq!(torch.expire_time_ms, Some(10_000));
        assert_eq!(torch.decay_target, Some(ItemTypeId(401)));
    }

    #[test]
    fn currency_is_sorted_by_worth_descending() {
        let index = parse_item_catalog(CATALOG).expect("parse catalog");
        let currency = index.currency_types();
        assert_eq!(currency.len(), 2);
        assert_eq!(currency[0], (100, ItemTypeId(201)));
        assert_eq!(currency[1], (1, ItemTypeId(200)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let duplicated = r#"
items:
  - id: 7
    name: a
  - id: 7
    name: b
"#;
        let err = parse_item_catalog(duplicated).expect_err("duplicate id");
        assert!(err.contains("already exists"));
    }
}
