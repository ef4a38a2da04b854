//! Rate-limit aware client for the Discord REST API.
//!
//! Every call goes through a [`Governor`] so Discord's per-route buckets and
//! global limit are honoured without the handlers having to think about it.
//! Only the handful of endpoints the bot needs are wrapped here.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::endpoint::Endpoint;
use crate::error::HttpError;
use crate::governor::{Body, Governor, GovernorConfig, Request};
use crate::transport::Transport;
use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const API_BASE: &str = "https://discord.com/api/v10/";
pub const PROJECT_URL: &str = "https://github.com/discord-php/DiscordPHP-SRA";

pub(crate) fn user_agent() -> String {
    format!("DiscordBot ({}, {})", PROJECT_URL, env!("CARGO_PKG_VERSION"))
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// Cheap to clone (internals are behind `Arc`).
#[derive(Clone)]
pub struct DiscordHttpClient {
    governor: Governor,
}

impl DiscordHttpClient {
    pub fn new(
        token: &str,
        transport: Arc<dyn Transport>,
        max_retries: u32,
    ) -> Result<Self, HttpError> {
        let base = Url::parse(API_BASE)
            .map_err(|e| HttpError::Configuration(format!("bad Discord API base: {}", e)))?;
        let config = GovernorConfig::new(base, user_agent())
            .authorization(format!("Bot {}", token))
            .max_retries(max_retries);
        Ok(Self::with_governor(Governor::new(config, transport)))
    }

    pub fn with_governor(governor: Governor) -> Self {
        Self { governor }
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    /// Initial response to an interaction. Discord answers 204, so there is
    /// nothing to decode.
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), HttpError> {
        let endpoint = Endpoint::new("interactions/:interaction_id/:interaction_token/callback")
            .bind("interaction_id", interaction_id)
            .bind("interaction_token", interaction_token);
        self.governor
            .request(Request::post(endpoint).json(response)?)
            .await?;
        Ok(())
    }

    /// Replace the deferred "thinking" placeholder with the real reply.
    /// Files are sent as a multipart form and referenced from `attachments`.
    pub async fn edit_original_interaction_response(
        &self,
        application_id: &str,
        interaction_token: &str,
        body: &MessageBody,
        files: &[FileUpload],
    ) -> Result<Message, HttpError> {
        let endpoint = Endpoint::new("webhooks/:application_id/:interaction_token/messages/@original")
            .bind("application_id", application_id)
            .bind("interaction_token", interaction_token);
        let request = Request::patch(endpoint).body(message_body(body, files)?);
        self.governor.request_json(request).await
    }

    // ------------------------------------------------------------------
    // Slash command registration
    // ------------------------------------------------------------------

    pub async fn get_global_commands(
        &self,
        application_id: &str,
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let endpoint =
            Endpoint::new("applications/:application_id/commands").bind("application_id", application_id);
        self.governor.request_json(Request::get(endpoint)).await
    }

    /// Create (or overwrite, if the name exists) one global command.
    pub async fn create_global_command(
        &self,
        application_id: &str,
        command: &ApplicationCommand,
    ) -> Result<ApplicationCommand, HttpError> {
        debug!(command = %command.name, "creating global command");
        let endpoint =
            Endpoint::new("applications/:application_id/commands").bind("application_id", application_id);
        self.governor
            .request_json(Request::post(endpoint).json(command)?)
            .await
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    pub async fn create_dm_channel(&self, recipient_id: &str) -> Result<Channel, HttpError> {
        let body = serde_json::json!({ "recipient_id": recipient_id });
        self.governor
            .request_json(Request::post(Endpoint::new("users/@me/channels")).json(&body)?)
            .await
    }

    pub async fn create_message(
        &self,
        channel_id: &str,
        body: &MessageBody,
    ) -> Result<Message, HttpError> {
        let endpoint = Endpoint::new("channels/:channel_id/messages").bind("channel_id", channel_id);
        self.governor
            .request_json(Request::post(endpoint).json(body)?)
            .await
    }

    /// Open a DM with `user_id` and post `content` in it.
    pub async fn send_dm(&self, user_id: &str, content: &str) -> Result<Message, HttpError> {
        let channel = self.create_dm_channel(user_id).await?;
        self.create_message(&channel.id, &MessageBody::new().content(content))
            .await
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// JSON when there are no files, otherwise `payload_json` plus `files[n]`.
fn message_body(body: &MessageBody, files: &[FileUpload]) -> Result<Body, HttpError> {
    if files.is_empty() {
        return Body::json(body);
    }

    let body = files
        .iter()
        .enumerate()
        .fold(body.clone(), |body, (idx, file)| body.attach(idx as u32, &file.filename));
    let payload = serde_json::to_vec(&body)
        .map_err(|e| HttpError::Configuration(format!("unserializable body: {}", e)))?;

    let boundary = format!("CardInfoBoundary{:016x}", rand::random::<u64>());
    Ok(Body::multipart(
        &boundary,
        build_multipart(&boundary, &payload, files),
    ))
}

/// Build a multipart/form-data body as raw bytes.
fn build_multipart(boundary: &str, payload_json: &[u8], files: &[FileUpload]) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();

    buf.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    buf.extend_from_slice(b"Content-Disposition: form-data; name=\"payload_json\"\r\n");
    buf.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
    buf.extend_from_slice(payload_json);
    buf.extend_from_slice(b"\r\n");

    for (idx, file) in files.iter().enumerate() {
        buf.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        buf.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files[{}]\"; filename=\"{}\"\r\n",
                idx,
                file.filename.replace('"', "")
            )
            .as_bytes(),
        );
        buf.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        buf.extend_from_slice(&file.content);
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::Scripted;
    use http::{Method, StatusCode};

    static_assertions::assert_impl_all!(DiscordHttpClient: Send, Sync, Clone);

    fn client(transport: Arc<Scripted>) -> DiscordHttpClient {
        DiscordHttpClient::new("tok", transport, 5).unwrap()
    }

    const MESSAGE: &str = r#"{"id":"m1","channel_id":"c1","content":""}"#;

    #[tokio::test]
    async fn interaction_callback_posts_with_bot_auth() {
        let rec = Scripted::always(StatusCode::NO_CONTENT, "");
        client(rec.clone())
            .create_interaction_response("123", "abc", &InteractionResponse::deferred(true))
            .await
            .unwrap();

        let seen = rec.seen.lock();
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(
            seen[0].url.as_str(),
            "https://discord.com/api/v10/interactions/123/abc/callback"
        );
        assert_eq!(seen[0].headers["authorization"], "Bot tok");
        assert!(seen[0].headers["user-agent"]
            .to_str()
            .unwrap()
            .starts_with("DiscordBot ("));
    }

    #[tokio::test]
    async fn edit_original_without_files_is_json() {
        let rec = Scripted::always(StatusCode::OK, MESSAGE);
        let msg = client(rec.clone())
            .edit_original_interaction_response("app", "tok", &MessageBody::new().content("hi"), &[])
            .await
            .unwrap();
        assert_eq!(msg.id, "m1");

        let seen = rec.seen.lock();
        assert_eq!(seen[0].method, Method::PATCH);
        assert!(seen[0].url.path().ends_with("/webhooks/app/tok/messages/@original"));
        assert_eq!(seen[0].headers["content-type"], "application/json");
    }

    #[tokio::test]
    async fn edit_original_with_file_is_multipart() {
        let rec = Scripted::always(StatusCode::OK, MESSAGE);
        let file = FileUpload::new("card.json", br#"{"name":"x"}"#.to_vec());
        client(rec.clone())
            .edit_original_interaction_response(
                "app",
                "tok",
                &MessageBody::new().content("see attached"),
                &[file],
            )
            .await
            .unwrap();

        let seen = rec.seen.lock();
        let content_type = seen[0].headers["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary=CardInfoBoundary"));

        let body = String::from_utf8(seen[0].body.clone().unwrap()).unwrap();
        assert!(body.contains("name=\"payload_json\""));
        assert!(body.contains(r#""attachments":[{"id":0,"filename":"card.json"}]"#));
        assert!(body.contains("name=\"files[0]\"; filename=\"card.json\""));
        assert!(body.contains(r#"{"name":"x"}"#));
        assert!(body.trim_end().ends_with("--"));
    }

    #[tokio::test]
    async fn send_dm_opens_channel_then_posts() {
        let rec = Scripted::always(StatusCode::OK, r#"{"id":"c1","type":1,"channel_id":"c1"}"#);
        client(rec.clone()).send_dm("42", "boom").await.unwrap();

        let seen = rec.seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].url.path().ends_with("/users/@me/channels"));
        assert_eq!(
            seen[0].body.as_deref(),
            Some(&br#"{"recipient_id":"42"}"#[..])
        );
        assert!(seen[1].url.path().ends_with("/channels/c1/messages"));
    }

    #[tokio::test]
    async fn api_error_keeps_status() {
        let rec = Scripted::always(StatusCode::FORBIDDEN, r#"{"message":"Missing Access"}"#);
        let err = client(rec)
            .get_global_commands("app")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn multipart_closes_boundary() {
        let bytes = build_multipart("B", b"{}", &[FileUpload::new("a.txt", b"hi".to_vec())]);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("--B\r\n"));
        assert!(text.ends_with("--B--\r\n"));
        assert_eq!(text.matches("--B\r\n").count(), 2);
    }
}
