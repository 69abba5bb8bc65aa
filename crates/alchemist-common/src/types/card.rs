use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Coarse card classification derived from the type line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CardCategory {
    Creature,
    Spell,
    Artifact,
    Equipment,
    Land,
    #[default]
    Other,
}

impl CardCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            CardCategory::Creature => "creature",
            CardCategory::Spell => "spell",
            CardCategory::Artifact => "artifact",
            CardCategory::Equipment => "equipment",
            CardCategory::Land => "land",
            CardCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for CardCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Mythic,
    Special,
    Bonus,
}

impl Rarity {
    /// Map a source rarity string. Unknown or missing values are `Common`.
    pub fn from_source(value: Option<&str>) -> Self {
        match value {
            Some("uncommon") => Rarity::Uncommon,
            Some("rare") => Rarity::Rare,
            Some("mythic") => Rarity::Mythic,
            Some("special") => Rarity::Special,
            Some("bonus") => Rarity::Bonus,
            _ => Rarity::Common,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Mythic => "mythic",
            Rarity::Special => "special",
            Rarity::Bonus => "bonus",
        }
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured mana cost: `generic` plus one count per lowercased symbol.
///
/// Serializes as a flat JSON object, e.g. `{"generic": 2, "r": 2}`. The
/// `generic` key is only present when the cost had a numeric component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManaCost(BTreeMap<String, u32>);

impl ManaCost {
    pub const GENERIC: &'static str = "generic";

    pub fn add_generic(&mut self, amount: u32) {
        let entry = self.0.entry(Self::GENERIC.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn add_symbol(&mut self, symbol: &str) {
        let entry = self.0.entry(symbol.to_lowercase()).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn generic(&self) -> u32 {
        self.symbol(Self::GENERIC)
    }

    /// Count for a symbol key, matched case-insensitively
    pub fn symbol(&self, symbol: &str) -> u32 {
        self.0.get(&symbol.to_lowercase()).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Raw stat strings kept verbatim (`"*"`, `"1+*"`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardStats {
    pub power: Option<String>,
    pub toughness: Option<String>,
    pub loyalty: Option<String>,
    pub defense: Option<String>,
}

/// The normalized card persisted by the ingestion pipeline.
///
/// `slug` is the natural key and the only upsert conflict target.
/// Source fields without a column of their own are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    // Identity
    pub slug: String,
    pub name: String,
    pub object: String,
    pub scryfall_id: Option<String>,
    pub oracle_id: Option<String>,
    pub lang: String,
    pub released_at: Option<String>,

    // Mechanics
    pub mana_cost: Option<String>,
    pub cmc: f64,
    pub type_line: Option<String>,
    pub oracle_text: Option<String>,
    pub colors: Vec<String>,
    pub color_identity: Vec<String>,
    pub keywords: Vec<String>,
    pub produced_mana: Vec<String>,

    // Print and set
    pub set_code: Option<String>,
    pub set_name: Option<String>,
    pub set_type: Option<String>,
    pub collector_number: Option<String>,
    pub rarity: Rarity,
    pub artist: Option<String>,
    pub flavor_text: Option<String>,
    pub layout: String,
    pub image_status: String,
    pub border_color: String,
    pub frame: String,
    pub highres_image: bool,
    pub foil: bool,
    pub nonfoil: bool,
    pub reserved: bool,
    pub promo: bool,
    pub reprint: bool,
    pub digital: bool,
    pub full_art: bool,

    // Derived
    pub category: CardCategory,
    pub cost: ManaCost,
    pub description: String,
    pub attack: i64,
    pub defense: i64,
    pub health: i64,
    pub attributes: Vec<String>,
    pub tags: Vec<String>,
    pub image_url: String,
    pub is_published: bool,
    pub stats: CardStats,

    pub extra: Map<String, Value>,
}
