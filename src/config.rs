//! Runtime configuration from the environment (and `.env`, when present).

use crate::governor::DEFAULT_MAX_RETRIES;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("{name} must be {expected}, got `{value}`")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub token: String,
    /// Receives a DM whenever a handler fails.
    pub technician_id: Option<String>,
    /// Suppresses technician DMs.
    pub testing: bool,
    pub mtg_api_url: String,
    pub sra_api_url: String,
    pub sra_api_key: Option<String>,
    pub max_rate_limit_retries: u32,
}

impl BotConfig {
    /// Load `.env` if there is one, then read the process environment.
    #[cfg(feature = "io")]
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let token = get("DISCORD_TOKEN")
            .or_else(|| get("TOKEN"))
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let testing = match get("TESTING") {
            None => false,
            Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid {
                name: "TESTING",
                expected: "a boolean",
                value: v,
            })?,
        };

        let max_rate_limit_retries = match get("MAX_RATE_LIMIT_RETRIES") {
            None => DEFAULT_MAX_RETRIES,
            Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "MAX_RATE_LIMIT_RETRIES",
                expected: "a non-negative integer",
                value: v,
            })?,
        };

        Ok(Self {
            token,
            technician_id: get("TECHNICIAN_ID"),
            testing,
            mtg_api_url: get("MTG_API_URL").unwrap_or_else(|| crate::mtg::DEFAULT_BASE.to_string()),
            sra_api_url: get("SRA_API_URL").unwrap_or_else(|| crate::sra::DEFAULT_BASE.to_string()),
            sra_api_key: get("SRA_API_KEY"),
            max_rate_limit_retries,
        })
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"<redacted>")
            .field("technician_id", &self.technician_id)
            .field("testing", &self.testing)
            .field("mtg_api_url", &self.mtg_api_url)
            .field("sra_api_url", &self.sra_api_url)
            .field("sra_api_key", &self.sra_api_key.as_ref().map(|_| "<redacted>"))
            .field("max_rate_limit_retries", &self.max_rate_limit_retries)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<BotConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[("DISCORD_TOKEN", "abc")]).unwrap();
        assert_eq!(cfg.token, "abc");
        assert!(!cfg.testing);
        assert_eq!(cfg.technician_id, None);
        assert_eq!(cfg.mtg_api_url, "https://api.magicthegathering.io/v1/");
        assert_eq!(cfg.sra_api_url, "https://api.some-random-api.com/");
        assert_eq!(cfg.max_rate_limit_retries, 5);
    }

    #[test]
    fn token_alias_and_missing() {
        assert_eq!(config(&[("TOKEN", "t")]).unwrap().token, "t");
        assert_eq!(
            config(&[("DISCORD_TOKEN", "  ")]).unwrap_err(),
            ConfigError::Missing("DISCORD_TOKEN")
        );
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("DISCORD_TOKEN", "abc"),
            ("TECHNICIAN_ID", "116927250145869826"),
            ("TESTING", "yes"),
            ("MAX_RATE_LIMIT_RETRIES", "2"),
            ("SRA_API_KEY", "k"),
        ])
        .unwrap();
        assert!(cfg.testing);
        assert_eq!(cfg.technician_id.as_deref(), Some("116927250145869826"));
        assert_eq!(cfg.max_rate_limit_retries, 2);
        assert_eq!(cfg.sra_api_key.as_deref(), Some("k"));
    }

    #[test]
    fn malformed_values() {
        assert!(matches!(
            config(&[("DISCORD_TOKEN", "a"), ("TESTING", "maybe")]),
            Err(ConfigError::Invalid { name: "TESTING", .. })
        ));
        assert!(matches!(
            config(&[("DISCORD_TOKEN", "a"), ("MAX_RATE_LIMIT_RETRIES", "-1")]),
            Err(ConfigError::Invalid { name: "MAX_RATE_LIMIT_RETRIES", .. })
        ));
    }

    #[test]
    fn debug_hides_secrets() {
        let cfg = config(&[("DISCORD_TOKEN", "sekrit"), ("SRA_API_KEY", "k3y")]).unwrap();
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("sekrit"));
        assert!(!debug.contains("k3y"));
    }
}
