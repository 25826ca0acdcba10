//! Punchcard client library.
//!
//! One request/reply channel to a remote service, shared by one-shot
//! queries and by live subscriptions that re-poll each identifier on a
//! fixed cadence and fan the reply out to every subscriber.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Client (any thread)                                         │
//! │    query · subscribe · watch · unsubscribe · shutdown        │
//! │                                                              │
//! │  ──────────────────── CommandChannel ──────────────────────  │
//! │                                                              │
//! │  punchcard-io worker                                         │
//! │    PollSchedule ─▶ ChannelSession ─▶ Registry::publish       │
//! │                         │                   │                │
//! │                    Transport (ZMTP)   Subscription mailbox   │
//! │                                       Dispatcher (UI thread) │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![deny(unused_must_use)]

pub mod client;
pub mod config;
pub mod decode;
pub mod endpoint;
pub mod entity;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod subscription;

mod error;

pub use client::Client;
pub use config::ClientConfig;
pub use decode::{Decoder, JsonDecoder, Utf8Decoder};
pub use endpoint::Endpoint;
pub use entity::Entity;
pub use error::{DecodeError, Error, Result, TransportError};
pub use registry::{SubscriptionHandle, SubscriptionId};
pub use rpc::transport::{ShutdownSignal, Transport};
pub use server::{ReplyServer, ServerHandle, entity_handler};
pub use subscription::{Backpressure, Dispatcher, Job, Subscription};
