//! Client for the Some Random API facts and animal endpoints.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::HttpError;
use crate::governor::{Governor, GovernorConfig, Request};
use crate::transport::Transport;

pub const DEFAULT_BASE: &str = "https://api.some-random-api.com/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactCategory {
    Cat,
    Fox,
    Birb,
    Panda,
    Koala,
    Kangaroo,
    Racoon,
    Giraffe,
    Whale,
    Elephant,
    Dog,
    Bird,
    RedPanda,
}

impl FactCategory {
    pub const ALL: [FactCategory; 13] = [
        Self::Cat,
        Self::Fox,
        Self::Birb,
        Self::Panda,
        Self::Koala,
        Self::Kangaroo,
        Self::Racoon,
        Self::Giraffe,
        Self::Whale,
        Self::Elephant,
        Self::Dog,
        Self::Bird,
        Self::RedPanda,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cat => "cat",
            Self::Fox => "fox",
            Self::Birb => "birb",
            Self::Panda => "panda",
            Self::Koala => "koala",
            Self::Kangaroo => "kangaroo",
            Self::Racoon => "racoon",
            Self::Giraffe => "giraffe",
            Self::Whale => "whale",
            Self::Elephant => "elephant",
            Self::Dog => "dog",
            Self::Bird => "bird",
            Self::RedPanda => "red_panda",
        }
    }
}

impl fmt::Display for FactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fact category `{0}`")]
pub struct UnknownCategory(pub String);

impl FromStr for FactCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub fact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Animal {
    pub image: String,
    pub fact: String,
}

#[derive(Clone, Debug)]
pub struct SraClient {
    governor: Governor,
}

impl SraClient {
    pub fn new(
        base: &str,
        api_key: Option<&str>,
        transport: Arc<dyn Transport>,
        max_retries: u32,
    ) -> Result<Self, HttpError> {
        let base = Url::parse(base)
            .map_err(|e| HttpError::Configuration(format!("bad facts API base `{}`: {}", base, e)))?;
        let mut config = GovernorConfig::new(base, crate::http::user_agent()).max_retries(max_retries);
        if let Some(key) = api_key {
            config = config.authorization(key);
        }
        Ok(Self {
            governor: Governor::new(config, transport),
        })
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub async fn fact(&self, category: FactCategory) -> Result<Fact, HttpError> {
        let endpoint = Endpoint::new("facts/:category").bind("category", category);
        self.governor.request_json(Request::get(endpoint)).await
    }

    /// An image plus a fact for the same animal.
    pub async fn animal(&self, category: FactCategory) -> Result<Animal, HttpError> {
        let endpoint = Endpoint::new("animal/:category").bind("category", category);
        self.governor.request_json(Request::get(endpoint)).await
    }
}
