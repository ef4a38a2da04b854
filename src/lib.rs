//! A Discord bot that looks up Magic: The Gathering cards, built on a
//! per-route rate-limit governor shared by every outbound API client.
//!
//! [`governor`] owns queuing, bucket accounting and 429 handling;
//! [`http`], [`mtg`] and [`sra`] are thin typed clients on top of it.
//! With the `io` feature (on by default) [`bot`] wires those clients to the
//! Discord gateway.

pub mod components;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod governor;
pub mod handlers;
pub mod http;
pub mod mtg;
pub mod ratelimit;
pub mod sra;
pub mod transport;
pub mod types;

#[cfg(feature = "io")]
pub mod bot;
#[cfg(feature = "io")]
pub mod gateway;

pub use error::HttpError;
pub use governor::{Governor, GovernorConfig, Request, Response};
