//! # Data Ingestors Module
//!
//! This module holds the clients that bring external data into the tracker.
//! Each submodule owns the protocol details of one source (connection,
//! keep-alive, reconnection) and hands decoded messages to the rest of the
//! system over a channel.
//!
//! ## Contained Modules:
//! - **`discord_gateway`**: A resilient WebSocket client for the Discord
//!   gateway, forwarding `MESSAGE_CREATE` dispatches as `InboundMessage`s.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The WebSocket client for the Discord gateway.
pub mod discord_gateway;

// --- Public API Re-exports ---
pub use discord_gateway::{DiscordGatewayIngestor, GatewayConfig, GatewayEvent};
