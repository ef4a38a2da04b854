//! Card records as returned by `GET /cards` and `GET /cards/:id`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Layouts rendered with the full text layout. Anything else falls back to
/// the card image, if there is one.
pub const TEXT_LAYOUTS: &[&str] = &["normal", "meld", "transform", "default"];

pub const GATHERER_URL: &str = "https://gatherer.wizards.com/Pages/Card/Details.aspx";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mana_cost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_identity: Option<Vec<String>>,
    /// Full type line, e.g. `Legendary Planeswalker — Nissa`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supertypes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtypes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity: Option<String>,
    /// Set code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toughness: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub loyalty: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub multiverseid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rulings: Option<Vec<Ruling>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_names: Option<Vec<ForeignName>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legalities: Option<Vec<Legality>>,
    /// Fields not modelled above, kept so the raw card can be exported.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruling {
    pub date: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignName {
    pub language: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiverseid: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Legality {
    pub format: String,
    pub legality: String,
}

// ---------------------------------------------------------------------------
// Colour identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManaColor {
    White,
    Blue,
    Black,
    Red,
    Green,
}

impl ManaColor {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "W" => Some(Self::White),
            "U" => Some(Self::Blue),
            "B" => Some(Self::Black),
            "R" => Some(Self::Red),
            "G" => Some(Self::Green),
            _ => None,
        }
    }

    pub fn rgb(self) -> u32 {
        match self {
            Self::White => 0xF8F6D8,
            Self::Blue => 0x3498DB,
            Self::Black => 0x2C2F33,
            Self::Red => 0xE74C3C,
            Self::Green => 0x2ECC71,
        }
    }
}

/// Accent for colourless cards.
pub const COLORLESS_RGB: u32 = 0x95A5A6;

impl Card {
    /// Rendered with the text layout rather than image-only.
    pub fn has_text_layout(&self) -> bool {
        self.layout
            .as_deref()
            .is_some_and(|layout| TEXT_LAYOUTS.contains(&layout))
    }

    /// Accent colour: grey without a colour identity, the colour itself for
    /// a mono-coloured card, nothing for multicolour.
    pub fn accent_color(&self) -> Option<u32> {
        match self.color_identity.as_deref() {
            None | Some([]) => Some(COLORLESS_RGB),
            Some([single]) => ManaColor::from_symbol(single).map(ManaColor::rgb),
            Some(_) => None,
        }
    }

    /// `Legendary Creature - Elf Warrior (rare)`, built from the split type
    /// fields.
    pub fn type_text(&self) -> String {
        let mut out = String::new();
        if let Some(supertypes) = &self.supertypes {
            out.push_str(&supertypes.join(" "));
            out.push(' ');
        }
        if let Some(types) = &self.types {
            out.push_str(&types.join(" "));
        }
        if let Some(subtypes) = &self.subtypes {
            out.push_str(" - ");
            out.push_str(&subtypes.join(" "));
        }
        if let Some(rarity) = &self.rarity {
            out.push_str(&format!(" ({})", rarity));
        }
        out.trim().to_string()
    }

    /// `(2/\*)`. Asterisks are escaped so Discord shows them literally.
    pub fn power_toughness(&self) -> Option<String> {
        let (power, toughness) = (self.power.as_ref()?, self.toughness.as_ref()?);
        Some(format!(
            "({}/{})",
            power.replace('*', "\\*"),
            toughness.replace('*', "\\*")
        ))
    }

    /// `KTK - Khans of Tarkir`, when both are known.
    pub fn set_label(&self) -> Option<String> {
        Some(format!("{} - {}", self.set.as_ref()?, self.set_name.as_ref()?))
    }

    pub fn gatherer_url(&self) -> Option<String> {
        self.multiverseid
            .as_ref()
            .map(|id| format!("{}?multiverseid={}", GATHERER_URL, id))
    }

    pub fn release_date(&self) -> Option<chrono::NaiveDate> {
        parse_date(self.release_date.as_deref()?)
    }

    /// `Legal: Commander, Modern` per line.
    pub fn legalities_text(&self) -> Option<String> {
        let legalities = self.legalities.as_ref().filter(|l| !l.is_empty())?;
        Some(group_lines(
            legalities.iter().map(|l| (l.legality.as_str(), l.format.as_str())),
            ", ",
        ))
    }

    /// `German: Name` per line.
    pub fn foreign_names_text(&self) -> Option<String> {
        let names = self.foreign_names.as_ref().filter(|n| !n.is_empty())?;
        Some(group_lines(
            names.iter().map(|n| (n.language.as_str(), n.name.as_str())),
            ", ",
        ))
    }

    /// Rulings grouped by date, one bullet per ruling.
    pub fn rulings_text(&self) -> Option<String> {
        let rulings = self.rulings.as_ref().filter(|r| !r.is_empty())?;
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for ruling in rulings {
            match groups.iter_mut().find(|(date, _)| *date == ruling.date) {
                Some((_, texts)) => texts.push(&ruling.text),
                None => groups.push((&ruling.date, vec![&ruling.text])),
            }
        }
        Some(
            groups
                .into_iter()
                .map(|(date, texts)| format!("{}:\n- {}", date, texts.join("\n- ")))
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }
}

/// Group `(key, value)` pairs by key, keeping first-seen order, and render
/// `key: v1, v2` lines.
fn group_lines<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>, sep: &str) -> String {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for (key, value) in pairs {
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => groups.push((key, vec![value])),
        }
    }
    groups
        .into_iter()
        .map(|(key, values)| format!("{}: {}", key, values.join(sep)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn parse_date(value: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// The API is inconsistent about quoting numeric fields.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nissa() -> Card {
        serde_json::from_value(json!({
            "name": "Nissa, Worldwaker",
            "manaCost": "{3}{G}{G}",
            "cmc": 5,
            "colors": ["Green"],
            "colorIdentity": ["G"],
            "type": "Legendary Planeswalker — Nissa",
            "supertypes": ["Legendary"],
            "types": ["Planeswalker"],
            "subtypes": ["Nissa"],
            "rarity": "Mythic",
            "set": "M15",
            "setName": "Magic 2015",
            "text": "+1: Target land you control becomes a 4/4 Elemental creature.",
            "loyalty": "3",
            "layout": "normal",
            "multiverseid": 383325,
            "imageUrl": "http://gatherer.wizards.com/Handlers/Image.ashx?multiverseid=383325&type=card",
            "rulings": [
                { "date": "2014-07-18", "text": "First." },
                { "date": "2014-07-18", "text": "Second." },
                { "date": "2020-01-01", "text": "Later." }
            ],
            "legalities": [
                { "format": "Commander", "legality": "Legal" },
                { "format": "Modern", "legality": "Legal" },
                { "format": "Vintage", "legality": "Restricted" }
            ],
            "foreignNames": [
                { "name": "Nissa, Weltenwandlerin", "language": "German", "multiverseid": 384101 }
            ],
            "releaseDate": "2014-07-18",
            "id": "7a3d1b2c",
            "originalText": "+1: ...",
            "hand": 0
        }))
        .unwrap()
    }

    #[test]
    fn decodes_and_keeps_unknown_fields() {
        let card = nissa();
        assert_eq!(card.name.as_deref(), Some("Nissa, Worldwaker"));
        assert_eq!(card.multiverseid.as_deref(), Some("383325"));
        assert_eq!(card.extra.get("hand"), Some(&json!(0)));

        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["hand"], json!(0));
        assert_eq!(value["setName"], json!("Magic 2015"));
        assert!(value.get("power").is_none());
    }

    #[test]
    fn type_text_includes_rarity() {
        assert_eq!(nissa().type_text(), "Legendary Planeswalker - Nissa (Mythic)");
    }

    #[test]
    fn type_text_without_subtypes() {
        let card = Card {
            types: Some(vec!["Instant".into()]),
            ..Default::default()
        };
        assert_eq!(card.type_text(), "Instant");
    }

    #[test]
    fn power_toughness_escapes_stars() {
        let card = Card {
            power: Some("*".into()),
            toughness: Some("1+*".into()),
            ..Default::default()
        };
        assert_eq!(card.power_toughness().as_deref(), Some("(\\*/1+\\*)"));
        assert_eq!(Card::default().power_toughness(), None);
    }

    #[test]
    fn accent_color_rules() {
        assert_eq!(nissa().accent_color(), Some(ManaColor::Green.rgb()));
        assert_eq!(Card::default().accent_color(), Some(COLORLESS_RGB));
        let multi = Card {
            color_identity: Some(vec!["W".into(), "U".into()]),
            ..Default::default()
        };
        assert_eq!(multi.accent_color(), None);
    }

    #[test]
    fn layouts() {
        assert!(nissa().has_text_layout());
        let split = Card {
            layout: Some("split".into()),
            ..Default::default()
        };
        assert!(!split.has_text_layout());
        assert!(!Card::default().has_text_layout());
    }

    #[test]
    fn set_label_and_gatherer() {
        let card = nissa();
        assert_eq!(card.set_label().as_deref(), Some("M15 - Magic 2015"));
        assert_eq!(
            card.gatherer_url().as_deref(),
            Some("https://gatherer.wizards.com/Pages/Card/Details.aspx?multiverseid=383325")
        );
    }

    #[test]
    fn release_date_parses() {
        assert_eq!(
            nissa().release_date(),
            chrono::NaiveDate::from_ymd_opt(2014, 7, 18)
        );
    }

    #[test]
    fn grouped_texts() {
        let card = nissa();
        assert_eq!(
            card.legalities_text().as_deref(),
            Some("Legal: Commander, Modern\nRestricted: Vintage")
        );
        assert_eq!(
            card.rulings_text().as_deref(),
            Some("2014-07-18:\n- First.\n- Second.\n\n2020-01-01:\n- Later.")
        );
        assert_eq!(
            card.foreign_names_text().as_deref(),
            Some("German: Nissa, Weltenwandlerin")
        );
        assert_eq!(Card::default().rulings_text(), None);
    }
}
