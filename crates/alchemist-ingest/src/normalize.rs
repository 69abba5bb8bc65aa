//! Raw snapshot record -> [`CanonicalRecord`]
//!
//! Normalization is total: missing or mistyped fields fall back to
//! defaults and never produce an error. Source fields without a column of
//! their own are carried over unchanged in `extra`.

use alchemist_common::{CanonicalRecord, CardCategory, CardStats, ManaCost, Rarity};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

#[allow(clippy::unwrap_used)]
static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

#[allow(clippy::unwrap_used)]
static COST_SYMBOL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^}]+)\}").unwrap());

/// Source keys mapped onto first-class fields; everything else goes to `extra`
const MAPPED_KEYS: &[&str] = &[
    "object",
    "id",
    "oracle_id",
    "name",
    "lang",
    "released_at",
    "mana_cost",
    "cmc",
    "type_line",
    "oracle_text",
    "colors",
    "color_identity",
    "keywords",
    "produced_mana",
    "set",
    "set_name",
    "set_type",
    "collector_number",
    "rarity",
    "artist",
    "flavor_text",
    "layout",
    "image_status",
    "border_color",
    "frame",
    "highres_image",
    "foil",
    "nonfoil",
    "reserved",
    "promo",
    "reprint",
    "digital",
    "full_art",
    "power",
    "toughness",
    "loyalty",
    "defense",
];

const UNNAMED_SLUG: &str = "unnamed";

pub fn normalize(raw: &Value) -> CanonicalRecord {
    let name = text(raw, "name");
    let scryfall_id = text(raw, "id");
    let type_line = text(raw, "type_line");
    let mana_cost = text(raw, "mana_cost");
    let oracle_text = text(raw, "oracle_text");
    let flavor_text = text(raw, "flavor_text");
    let set_code = text(raw, "set");
    let keywords = string_list(raw, "keywords");
    let color_identity = string_list(raw, "color_identity");
    let stats = CardStats {
        power: text(raw, "power"),
        toughness: text(raw, "toughness"),
        loyalty: text(raw, "loyalty"),
        defense: text(raw, "defense"),
    };

    CanonicalRecord {
        slug: derive_slug(name.as_deref(), scryfall_id.as_deref()),
        name: name.unwrap_or_default(),
        object: text(raw, "object").unwrap_or_else(|| "card".to_string()),
        scryfall_id,
        oracle_id: text(raw, "oracle_id"),
        lang: text(raw, "lang").unwrap_or_else(|| "en".to_string()),
        released_at: text(raw, "released_at"),

        cmc: raw.get("cmc").and_then(Value::as_f64).unwrap_or(0.0),
        colors: string_list(raw, "colors"),
        produced_mana: string_list(raw, "produced_mana"),

        set_name: text(raw, "set_name"),
        set_type: text(raw, "set_type"),
        collector_number: text(raw, "collector_number"),
        rarity: Rarity::from_source(raw.get("rarity").and_then(Value::as_str)),
        artist: text(raw, "artist"),
        layout: text(raw, "layout").unwrap_or_else(|| "normal".to_string()),
        image_status: text(raw, "image_status").unwrap_or_else(|| "missing".to_string()),
        border_color: text(raw, "border_color").unwrap_or_else(|| "black".to_string()),
        frame: text(raw, "frame").unwrap_or_else(|| "2015".to_string()),
        highres_image: flag(raw, "highres_image", false),
        foil: flag(raw, "foil", false),
        nonfoil: flag(raw, "nonfoil", true),
        reserved: flag(raw, "reserved", false),
        promo: flag(raw, "promo", false),
        reprint: flag(raw, "reprint", false),
        digital: flag(raw, "digital", false),
        full_art: flag(raw, "full_art", false),

        category: categorize(type_line.as_deref()),
        cost: parse_mana_cost(mana_cost.as_deref()),
        description: oracle_text
            .clone()
            .or_else(|| flavor_text.clone())
            .unwrap_or_default(),
        attack: stats.power.as_deref().map(parse_leading_int).unwrap_or(0),
        defense: stats.toughness.as_deref().map(parse_leading_int).unwrap_or(0),
        health: 0,
        attributes: color_attributes(&color_identity),
        tags: set_code.iter().chain(keywords.iter()).cloned().collect(),
        image_url: image_url(raw),
        is_published: true,

        extra: unmapped_fields(raw),
        stats,
        mana_cost,
        type_line,
        oracle_text,
        flavor_text,
        set_code,
        keywords,
        color_identity,
    }
}

/// Lowercase, collapse every run of non `[a-z0-9]` characters into `-`,
/// trim leading and trailing separators.
pub fn slugify(value: &str) -> String {
    let lowered = value.to_lowercase();
    NON_ALPHANUMERIC
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

fn derive_slug(name: Option<&str>, id: Option<&str>) -> String {
    [name, id]
        .into_iter()
        .flatten()
        .map(slugify)
        .find(|slug| !slug.is_empty())
        .unwrap_or_else(|| UNNAMED_SLUG.to_string())
}

/// Classify a type line by substring, first match wins:
/// creature, instant/sorcery, artifact (equipment), land.
pub fn categorize(type_line: Option<&str>) -> CardCategory {
    let Some(type_line) = type_line else {
        return CardCategory::Other;
    };
    let lower = type_line.to_lowercase();

    if lower.contains("creature") {
        CardCategory::Creature
    } else if lower.contains("instant") || lower.contains("sorcery") {
        CardCategory::Spell
    } else if lower.contains("artifact") {
        if lower.contains("equipment") {
            CardCategory::Equipment
        } else {
            CardCategory::Artifact
        }
    } else if lower.contains("land") {
        CardCategory::Land
    } else {
        CardCategory::Other
    }
}

/// `{2}{R}{R}` -> `{generic: 2, r: 2}`
pub fn parse_mana_cost(cost: Option<&str>) -> ManaCost {
    let mut parsed = ManaCost::default();
    for capture in COST_SYMBOL.captures_iter(cost.unwrap_or_default()) {
        let symbol = &capture[1];
        let digits = symbol.trim();
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            // Amounts past u32 saturate
            parsed.add_generic(digits.parse::<u32>().unwrap_or(u32::MAX));
        } else {
            parsed.add_symbol(symbol);
        }
    }
    parsed
}

/// Leading signed integer of a stat string; `"*"` and other non-numeric
/// values become 0, `"1+*"` becomes 1.
pub fn parse_leading_int(value: &str) -> i64 {
    let trimmed = value.trim_start();
    let (sign, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

fn color_attributes(color_identity: &[String]) -> Vec<String> {
    color_identity
        .iter()
        .filter_map(|c| match c.as_str() {
            "W" => Some("white"),
            "U" => Some("blue"),
            "B" => Some("black"),
            "R" => Some("red"),
            "G" => Some("green"),
            _ => None,
        })
        .map(str::to_string)
        .collect()
}

fn image_url(raw: &Value) -> String {
    let uris = raw.get("image_uris");
    ["normal", "small"]
        .iter()
        .filter_map(|size| uris.and_then(|u| u.get(*size)).and_then(Value::as_str))
        .find(|url| !url.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn unmapped_fields(raw: &Value) -> Map<String, Value> {
    raw.as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(key, _)| !MAPPED_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Non-empty string field
fn text(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn flag(raw: &Value, key: &str, default: bool) -> bool {
    raw.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Non-empty strings of an array field
fn string_list(raw: &Value, key: &str) -> Vec<String> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
