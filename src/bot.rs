//! Bot wiring: state, command registration, and the gateway event loop.
//!
//! Interactions are handled on their own tasks so a slow API call never
//! holds up the gateway. Failures are logged and, outside test mode, sent to
//! the technician by DM.

use std::sync::Arc;
use std::time::Instant;

use async_lock::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::config::BotConfig;
use crate::error::HttpError;
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig};
use crate::handlers::{self, Context, HandlerError};
use crate::http::DiscordHttpClient;
use crate::mtg::MtgClient;
use crate::sra::SraClient;
use crate::transport::{ReqwestTransport, Transport, TransportFailure};
use crate::types::*;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("could not build HTTP transport: {0}")]
    Transport(#[from] TransportFailure),
    #[error("gateway event stream ended")]
    GatewayStopped,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BotState {
    /// Set on READY.
    pub application_id: Option<String>,
    /// Commands are registered once per process, not once per READY.
    pub commands_registered: bool,
    pub start_time: Instant,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            application_id: None,
            commands_registered: false,
            start_time: Instant::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bot
// ---------------------------------------------------------------------------

/// Cheap to clone; clones share state.
#[derive(Clone, Debug)]
pub struct Bot {
    ctx: Context,
    technician_id: Option<String>,
    testing: bool,
    state: Arc<RwLock<BotState>>,
}

impl Bot {
    /// All three API clients share `transport` but keep separate governors,
    /// so each host's rate limits are tracked on their own.
    pub fn new(config: &BotConfig, transport: Arc<dyn Transport>) -> Result<Self, HttpError> {
        let retries = config.max_rate_limit_retries;
        let ctx = Context {
            discord: DiscordHttpClient::new(&config.token, transport.clone(), retries)?,
            mtg: MtgClient::new(&config.mtg_api_url, transport.clone(), retries)?,
            sra: SraClient::new(
                &config.sra_api_url,
                config.sra_api_key.as_deref(),
                transport,
                retries,
            )?,
        };
        Ok(Self {
            ctx,
            technician_id: config.technician_id.clone(),
            testing: config.testing,
            state: Arc::new(RwLock::new(BotState::default())),
        })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub async fn state(&self) -> BotState {
        self.state.read().await.clone()
    }

    pub async fn on_ready(&self, ready: &ReadyEvent) {
        info!(user = %ready.user.tag(), guilds = ready.guilds.len(), "bot is ready");

        let app_id = ready.application.id.clone();
        let already_registered = {
            let mut state = self.state.write().await;
            state.application_id = Some(app_id.clone());
            state.commands_registered
        };
        if already_registered {
            return;
        }

        match self.register_commands(&app_id).await {
            Ok(created) => {
                info!(created, "slash commands registered");
                self.state.write().await.commands_registered = true;
            }
            Err(e) => warn!(error = %e, "failed to register slash commands"),
        }
    }

    /// Create whichever of our commands the application doesn't have yet.
    /// Returns how many were created.
    async fn register_commands(&self, app_id: &str) -> Result<usize, HttpError> {
        let existing = self.ctx.discord.get_global_commands(app_id).await?;
        if !existing.is_empty() {
            let names: Vec<&str> = existing.iter().map(|c| c.name.as_str()).collect();
            debug!(commands = %names.join(", "), "global application commands");
        }

        let mut created = 0;
        for command in handlers::slash_commands() {
            if existing.iter().any(|c| c.name == command.name) {
                continue;
            }
            debug!(command = %command.name, "creating global command");
            self.ctx.discord.create_global_command(app_id, &command).await?;
            created += 1;
        }
        Ok(created)
    }

    pub async fn on_interaction(&self, interaction: Interaction) {
        if let Err(e) = handlers::on_interaction(&self.ctx, &interaction).await {
            let what = interaction.command_name().unwrap_or("interaction");
            self.report_failure(what, &e).await;
        }
    }

    async fn report_failure(&self, what: &str, err: &HandlerError) {
        error!(command = what, error = %err, "handler failed");
        if self.testing {
            return;
        }
        let Some(technician) = self.technician_id.as_deref() else {
            return;
        };
        let content = format!("Error while handling `{}`: {}", what, err);
        if let Err(e) = self.ctx.discord.send_dm(technician, &content).await {
            warn!(error = %e, "failed to notify technician");
        }
    }

    /// Connect to the gateway and handle events until the stream ends.
    pub async fn run(self, token: &str) -> Result<(), BotError> {
        let gw = gateway::connect(GatewayConfig::new(token, Intents::non_privileged()));
        info!("gateway started, entering event loop");

        while let Ok(event) = gw.events.recv().await {
            match event {
                GatewayEvent::Ready(ready) => self.on_ready(&ready).await,
                GatewayEvent::InteractionCreate(interaction) => {
                    let bot = self.clone();
                    tokio::spawn(async move { bot.on_interaction(interaction).await });
                }
                other => trace!(event = other.name(), "unhandled gateway event"),
            }
        }

        warn!("event stream ended, bot shutting down");
        Err(BotError::GatewayStopped)
    }
}

/// Build the production bot from `config` and run it.
pub async fn run(config: BotConfig) -> Result<(), BotError> {
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new()?);
    let bot = Bot::new(&config, transport)?;
    bot.run(&config.token).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::Scripted;
    use http::{Method, StatusCode};
    use serde_json::json;

    static_assertions::assert_impl_all!(Bot: Send, Sync, Clone);

    fn config(testing: bool) -> BotConfig {
        let vars = [
            ("DISCORD_TOKEN", "tok"),
            ("TECHNICIAN_ID", "42"),
            ("TESTING", if testing { "true" } else { "false" }),
        ];
        BotConfig::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    fn ready() -> ReadyEvent {
        serde_json::from_value(json!({
            "v": 10,
            "user": { "id": "1", "username": "cardinfo", "bot": true },
            "session_id": "s",
            "resume_gateway_url": "wss://resume",
            "application": { "id": "app" }
        }))
        .unwrap()
    }

    fn failing_command() -> Interaction {
        serde_json::from_value(json!({
            "id": "i1",
            "application_id": "app",
            "type": 2,
            "token": "tok",
            "data": { "name": "birdfact" }
        }))
        .unwrap()
    }

    #[test]
    fn bot_state_default_has_no_identity() {
        let state = BotState::default();
        assert!(state.application_id.is_none());
        assert!(!state.commands_registered);
    }

    #[tokio::test]
    async fn ready_creates_only_missing_commands_once() {
        let rec = Arc::new(
            Scripted::new()
                .on_method(
                    Method::GET,
                    "/applications/app/commands",
                    StatusCode::OK,
                    r#"[{"id":"9","name":"birdfact","description":"x","type":1}]"#,
                )
                .on_method(
                    Method::POST,
                    "/applications/app/commands",
                    StatusCode::CREATED,
                    r#"{"id":"10","name":"created","description":"x","type":1}"#,
                ),
        );
        let bot = Bot::new(&config(true), rec.clone()).unwrap();

        bot.on_ready(&ready()).await;
        bot.on_ready(&ready()).await;

        let seen = rec.seen.lock();
        let posted: Vec<String> = seen
            .iter()
            .filter(|r| r.method == Method::POST)
            .map(|r| {
                let body: serde_json::Value = serde_json::from_slice(r.body.as_deref().unwrap()).unwrap();
                body["name"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(posted, ["card_search", "birdfactimage"]);
        assert_eq!(seen.len(), 3);
        drop(seen);

        let state = bot.state().await;
        assert_eq!(state.application_id.as_deref(), Some("app"));
        assert!(state.commands_registered);
    }

    #[tokio::test]
    async fn failed_registration_is_retried_on_next_ready() {
        let rec = Scripted::always(StatusCode::FORBIDDEN, r#"{"message":"Missing Access"}"#);
        let bot = Bot::new(&config(true), rec.clone()).unwrap();
        bot.on_ready(&ready()).await;
        assert!(!bot.state().await.commands_registered);
        bot.on_ready(&ready()).await;
        assert_eq!(rec.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn failure_dms_technician() {
        let rec = Arc::new(
            Scripted::new()
                .on("/facts/bird", StatusCode::INTERNAL_SERVER_ERROR, "oops")
                .on("/callback", StatusCode::NO_CONTENT, "")
                .on("/users/@me/channels", StatusCode::OK, r#"{"id":"dm","type":1}"#)
                .on("/channels/dm/messages", StatusCode::OK, r#"{"id":"m","channel_id":"dm"}"#),
        );
        let bot = Bot::new(&config(false), rec.clone()).unwrap();
        bot.on_interaction(failing_command()).await;

        let paths = rec.paths();
        assert_eq!(paths.len(), 4);
        assert!(paths[2].ends_with("/users/@me/channels"));
        let seen = rec.seen.lock();
        let dm: serde_json::Value = serde_json::from_slice(seen[3].body.as_deref().unwrap()).unwrap();
        assert!(dm["content"].as_str().unwrap().starts_with("Error while handling `birdfact`"));
    }

    #[tokio::test]
    async fn testing_mode_skips_dm() {
        let rec = Arc::new(
            Scripted::new()
                .on("/facts/bird", StatusCode::INTERNAL_SERVER_ERROR, "oops")
                .on("/callback", StatusCode::NO_CONTENT, ""),
        );
        let bot = Bot::new(&config(true), rec.clone()).unwrap();
        bot.on_interaction(failing_command()).await;
        assert_eq!(rec.paths().len(), 2);
    }
}
