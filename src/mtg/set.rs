use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::card::parse_date;

/// A printed set (`GET /sets`, `GET /sets/:id`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Set {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gatherer_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magic_cards_info_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion: Option<String>,
    #[serde(default)]
    pub online_only: bool,
    /// Booster slot layout; a mix of strings and string arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booster: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Set {
    pub fn release_date(&self) -> Option<chrono::NaiveDate> {
        parse_date(self.release_date.as_deref()?)
    }

    /// One `Label: value` line per known field.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Code: {}", self.code),
            format!("Name: {}", self.name),
        ];
        if let Some(block) = &self.block {
            lines.push(format!("Block: {}", block));
        }
        if let Some(date) = &self.release_date {
            lines.push(format!("Release Date: {}", date));
        }
        lines.push(format!(
            "Online Only: {}",
            if self.online_only { "Yes" } else { "No" }
        ));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_set() {
        let set: Set = serde_json::from_value(json!({
            "code": "KTK",
            "name": "Khans of Tarkir",
            "type": "expansion",
            "border": "black",
            "block": "Khans of Tarkir",
            "releaseDate": "2014-09-26",
            "onlineOnly": false,
            "booster": ["rare", ["uncommon", "common"]],
            "mkm_id": 1495
        }))
        .unwrap();
        assert_eq!(set.kind.as_deref(), Some("expansion"));
        assert_eq!(set.release_date(), chrono::NaiveDate::from_ymd_opt(2014, 9, 26));
        assert_eq!(set.extra["mkm_id"], json!(1495));
        assert_eq!(
            set.summary_lines(),
            vec![
                "Code: KTK",
                "Name: Khans of Tarkir",
                "Block: Khans of Tarkir",
                "Release Date: 2014-09-26",
                "Online Only: No",
            ]
        );
    }

    #[test]
    fn summary_skips_missing_block() {
        let set = Set {
            code: "PRM".into(),
            name: "Magic Online Promos".into(),
            online_only: true,
            ..Default::default()
        };
        assert_eq!(
            set.summary_lines(),
            vec!["Code: PRM", "Name: Magic Online Promos", "Online Only: Yes"]
        );
    }
}
