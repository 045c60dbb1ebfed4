//! Shop stock, utility items, and travel preparations

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSlot {
    Weapon,
    Armor,
    Trinket,
    Consumable,
    Utility,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopItem {
    pub name: &'static str,
    pub base_price: i64,
    pub slot: ItemSlot,
}

/// The town shop's standing stock.
pub const SHOP_STOCK: [ShopItem; 14] = [
    ShopItem { name: "Healing Potion", base_price: 10, slot: ItemSlot::Consumable },
    ShopItem { name: "Healing Herbs", base_price: 4, slot: ItemSlot::Consumable },
    ShopItem { name: "Sturdy Rations", base_price: 3, slot: ItemSlot::Consumable },
    ShopItem { name: "Focus Potion", base_price: 12, slot: ItemSlot::Consumable },
    ShopItem { name: "Whetstone", base_price: 5, slot: ItemSlot::Consumable },
    ShopItem { name: "Torch", base_price: 2, slot: ItemSlot::Utility },
    ShopItem { name: "Rope", base_price: 3, slot: ItemSlot::Utility },
    ShopItem { name: "Climbing Kit", base_price: 8, slot: ItemSlot::Utility },
    ShopItem { name: "Antitoxin", base_price: 9, slot: ItemSlot::Utility },
    ShopItem { name: "Leather Armor", base_price: 15, slot: ItemSlot::Armor },
    ShopItem { name: "Chain Shirt", base_price: 35, slot: ItemSlot::Armor },
    ShopItem { name: "Shield", base_price: 12, slot: ItemSlot::Armor },
    ShopItem { name: "Longsword", base_price: 20, slot: ItemSlot::Weapon },
    ShopItem { name: "Shortbow", base_price: 18, slot: ItemSlot::Weapon },
];

pub fn find_shop_item(name: &str) -> Option<&'static ShopItem> {
    SHOP_STOCK.iter().find(|row| row.name.eq_ignore_ascii_case(name))
}

/// Sell price: half the base, floor 1. Always at or below any buy price,
/// whatever surcharge the shop is running.
pub fn sell_price(name: &str) -> i64 {
    find_shop_item(name)
        .map(|row| (row.base_price / 2).max(1))
        .unwrap_or(1)
}

/// Utility items that counter hazards on the road and in the wild.
pub fn hazard_counter_item(hazard: &str) -> Option<&'static str> {
    let key = hazard.trim().to_ascii_lowercase();
    if key.contains("dark") || key.contains("cave") || key.contains("fog") {
        return Some("Torch");
    }
    if key.contains("cliff") || key.contains("ravine") || key.contains("climb") {
        return Some("Rope");
    }
    if key.contains("poison") || key.contains("miasma") || key.contains("spore") {
        return Some("Antitoxin");
    }
    None
}

/// Equipment slot inferred from an item name, if it is equipable.
pub fn infer_equipment_slot(item_name: &str) -> Option<&'static str> {
    let lowered = item_name.to_ascii_lowercase();
    const WEAPON_KEYWORDS: [&str; 8] = [
        "sword", "axe", "bow", "dagger", "mace", "spear", "staff", "hammer",
    ];
    const ARMOR_KEYWORDS: [&str; 4] = ["armor", "mail", "shirt", "shield"];
    const TRINKET_KEYWORDS: [&str; 4] = ["ring", "amulet", "charm", "talisman"];
    if WEAPON_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        return Some("weapon");
    }
    if ARMOR_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        return Some("armor");
    }
    if TRINKET_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        return Some("trinket");
    }
    None
}

/// Travel preparations purchasable before a journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelPrep {
    pub id: &'static str,
    pub name: &'static str,
    pub price: i64,
    pub summary: &'static str,
}

pub const TRAVEL_PREPS: [TravelPrep; 3] = [
    TravelPrep {
        id: "trail_rations",
        name: "Trail Rations",
        price: 4,
        summary: "Recover 2 HP at the end of each travel day.",
    },
    TravelPrep {
        id: "stealth_kit",
        name: "Stealth Kit",
        price: 7,
        summary: "Reduces ambush risk on stealth routes.",
    },
    TravelPrep {
        id: "caravan_pass",
        name: "Caravan Pass",
        price: 6,
        summary: "Caravan travel costs no extra days.",
    },
];

pub fn find_travel_prep(prep_id: &str) -> Option<&'static TravelPrep> {
    TRAVEL_PREPS.iter().find(|row| row.id == prep_id)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_never_exceeds_buy() {
        for item in SHOP_STOCK {
            assert!(sell_price(item.name) <= item.base_price);
        }
    }

    #[test]
    fn hazard_counters_match_keywords() {
        assert_eq!(hazard_counter_item("dark_tunnels"), Some("Torch"));
        assert_eq!(hazard_counter_item("cliff_face"), Some("Rope"));
        assert_eq!(hazard_counter_item("poison_miasma"), Some("Antitoxin"));
        assert_eq!(hazard_counter_item("spreading_fire"), None);
    }

    #[test]
    fn equipment_slots_infer_from_names() {
        assert_eq!(infer_equipment_slot("Longsword"), Some("weapon"));
        assert_eq!(infer_equipment_slot("Chain Shirt"), Some("armor"));
        assert_eq!(infer_equipment_slot("Lucky Charm"), Some("trinket"));
        assert_eq!(infer_equipment_slot("Torch"), None);
    }
}
