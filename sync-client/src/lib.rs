//! # sync-client
//!
//! Client library for tabletop campaign sync.
//!
//! Connects to a campaign server, completes the handshake, and then
//! exchanges commands and assets over one framed connection:
//!
//! - [`CampaignClient::send`] queues a campaign command
//! - [`CampaignClient::request_asset`] and [`CampaignClient::upload`] move
//!   assets in chunks without blocking commands
//! - Everything the server says arrives as a [`ClientEvent`]
//!
//! [`CampaignClient::connect_stream`] accepts any async byte stream, which
//! is how the tests drive the client without a socket.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;

pub use client::{
    CampaignClient, ClientConfig, ClientError, ClientEvent, EventReceiver, EventSender,
    HANDSHAKE_TIMEOUT,
};
