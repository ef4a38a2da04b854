//! Query builders for `GET /cards` and `GET /sets`.
//!
//! Keys may be given in snake_case (as slash-command options are named) or
//! in the API's camelCase. Values are passed through untouched, so `|` still
//! means OR and `,` still means AND on the remote side.

use crate::endpoint::Endpoint;

use super::card::Card;

/// Every query key the cards endpoint understands.
pub const CARD_QUERY_KEYS: &[&str] = &[
    "name",
    "layout",
    "cmc",
    "colors",
    "colorIdentity",
    "type",
    "supertypes",
    "types",
    "subtypes",
    "rarity",
    "set",
    "setName",
    "text",
    "flavor",
    "artist",
    "number",
    "power",
    "toughness",
    "loyalty",
    "language",
    "gameFormat",
    "legality",
    "page",
    "pageSize",
    "orderBy",
    "random",
    "contains",
    "id",
    "multiverseid",
];

pub const DEFAULT_PAGE_SIZE: u32 = 1;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("unknown card query key `{0}`")]
    UnknownKey(String),
    #[error("pageSize must be between 1 and 100, got `{0}`")]
    PageSize(String),
}

/// `snake_case` → `camelCase`. Already camel-cased keys are unchanged.
pub fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.chars() {
        if ch == '_' {
            upper = !out.is_empty();
            continue;
        }
        if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// CardQuery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardQuery {
    params: Vec<(String, String)>,
}

impl CardQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing an earlier value for the same key.
    /// Blank values are ignored.
    pub fn set(mut self, key: &str, value: impl ToString) -> Result<Self, QueryError> {
        let key = camel_case(key);
        if !CARD_QUERY_KEYS.contains(&key.as_str()) {
            return Err(QueryError::UnknownKey(key));
        }

        let mut value = value.to_string().trim().to_string();
        if value.is_empty() {
            return Ok(self);
        }

        match key.as_str() {
            "pageSize" => {
                let size: u32 = value
                    .parse()
                    .map_err(|_| QueryError::PageSize(value.clone()))?;
                if !(1..=MAX_PAGE_SIZE).contains(&size) {
                    return Err(QueryError::PageSize(value));
                }
            }
            // Type lines use an em dash between types and subtypes.
            "type" => value = value.replace('-', "—"),
            _ => {}
        }

        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key, value)),
        }
        Ok(self)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToString,
    {
        pairs
            .into_iter()
            .try_fold(Self::new(), |query, (k, v)| query.set(k.as_ref(), v))
    }

    pub fn page_size(self, size: u32) -> Result<Self, QueryError> {
        self.set("pageSize", size)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = camel_case(key);
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// `cards` with every parameter applied; `pageSize` defaults to 1.
    pub(crate) fn endpoint(&self) -> Endpoint {
        let mut endpoint = Endpoint::new("cards");
        for (key, value) in &self.params {
            endpoint = endpoint.query(key.as_str(), value);
        }
        if self.get("pageSize").is_none() {
            endpoint = endpoint.query("pageSize", DEFAULT_PAGE_SIZE);
        }
        endpoint
    }
}

// ---------------------------------------------------------------------------
// SetQuery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetQuery {
    pub name: Option<String>,
    pub block: Option<String>,
}

impl SetQuery {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            block: None,
        }
    }

    /// Look up the set a card was printed in.
    pub fn for_card(card: &Card) -> Self {
        Self {
            name: card.set_name.clone(),
            block: None,
        }
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        let mut endpoint = Endpoint::new("sets");
        for (key, value) in [("name", &self.name), ("block", &self.block)] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                endpoint = endpoint.query(key, value);
            }
        }
        endpoint
    }
}
