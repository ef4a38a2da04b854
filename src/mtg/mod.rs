//! Client for the Magic: The Gathering API (`api.magicthegathering.io`).
//!
//! Every endpoint wraps its payload in a one-key envelope (`{"cards": [...]}`,
//! `{"card": {...}}`), which is stripped here. Requests share the governor's
//! rate-limit handling; the API reports its hourly budget through
//! `ratelimit-*` headers.

pub mod card;
pub mod query;
pub mod set;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::HttpError;
use crate::governor::{Governor, GovernorConfig, Request};
use crate::transport::Transport;

pub use self::card::{Card, ForeignName, Legality, ManaColor, Ruling};
pub use self::query::{CardQuery, QueryError, SetQuery};
pub use self::set::Set;

pub const DEFAULT_BASE: &str = "https://api.magicthegathering.io/v1/";

#[derive(Deserialize)]
struct CardsEnvelope {
    #[serde(default)]
    cards: Vec<Card>,
}

#[derive(Deserialize)]
struct CardEnvelope {
    card: Card,
}

#[derive(Deserialize)]
struct SetsEnvelope {
    #[serde(default)]
    sets: Vec<Set>,
}

#[derive(Deserialize)]
struct SetEnvelope {
    set: Set,
}

#[derive(Clone, Debug)]
pub struct MtgClient {
    governor: Governor,
}

impl MtgClient {
    pub fn new(base: &str, transport: Arc<dyn Transport>, max_retries: u32) -> Result<Self, HttpError> {
        let base = Url::parse(base)
            .map_err(|e| HttpError::Configuration(format!("bad MTG API base `{}`: {}", base, e)))?;
        let config = GovernorConfig::new(base, crate::http::user_agent()).max_retries(max_retries);
        Ok(Self::with_governor(Governor::new(config, transport)))
    }

    pub fn with_governor(governor: Governor) -> Self {
        Self { governor }
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Cards matching `query`. An empty list is not an error.
    pub async fn get_cards(&self, query: &CardQuery) -> Result<Vec<Card>, HttpError> {
        let envelope: CardsEnvelope = self.get(query.endpoint()).await?;
        Ok(envelope.cards)
    }

    /// First card matching `query`, if any.
    pub async fn find_card(&self, query: &CardQuery) -> Result<Option<Card>, HttpError> {
        Ok(self.get_cards(query).await?.into_iter().next())
    }

    /// By card id or multiverse id.
    pub async fn get_card(&self, id: &str) -> Result<Card, HttpError> {
        let envelope: CardEnvelope = self.get(Endpoint::new("cards/:id").bind("id", id)).await?;
        Ok(envelope.card)
    }

    pub async fn get_sets(&self, query: &SetQuery) -> Result<Vec<Set>, HttpError> {
        let envelope: SetsEnvelope = self.get(query.endpoint()).await?;
        Ok(envelope.sets)
    }

    pub async fn get_set(&self, code: &str) -> Result<Set, HttpError> {
        let envelope: SetEnvelope = self.get(Endpoint::new("sets/:id").bind("id", code)).await?;
        Ok(envelope.set)
    }

    /// A randomly generated booster pack for the set.
    pub async fn booster(&self, code: &str) -> Result<Vec<Card>, HttpError> {
        let envelope: CardsEnvelope = self
            .get(Endpoint::new("sets/:id/booster").bind("id", code))
            .await?;
        Ok(envelope.cards)
    }

    pub async fn types(&self) -> Result<Vec<String>, HttpError> {
        self.list("types", "types").await
    }

    pub async fn subtypes(&self) -> Result<Vec<String>, HttpError> {
        self.list("subtypes", "subtypes").await
    }

    pub async fn supertypes(&self) -> Result<Vec<String>, HttpError> {
        self.list("supertypes", "supertypes").await
    }

    pub async fn formats(&self) -> Result<Vec<String>, HttpError> {
        self.list("formats", "formats").await
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<T, HttpError> {
        self.governor.request_json(Request::get(endpoint)).await
    }

    async fn list(&self, route: &'static str, key: &str) -> Result<Vec<String>, HttpError> {
        let response = self.governor.request(Request::get(Endpoint::new(route))).await?;
        let mut value: serde_json::Value = response.json()?;
        match value.get_mut(key).map(serde_json::Value::take) {
            Some(list) => serde_json::from_value(list)
                .map_err(|e| HttpError::decoding(route, e, &response.body)),
            None => Err(HttpError::decoding(
                route,
                format!("missing `{}` field", key),
                &response.body,
            )),
        }
    }
}
