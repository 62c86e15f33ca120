// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC-UA rendition of the topic-oriented publish/subscribe data bus.
//!
//! This crate maps the [`databus_core::DataBus`] contract onto OPC-UA
//! sessions: a publisher context runs a server whose topics are
//! data-source-backed variable nodes, and a subscriber context runs a
//! client whose topics are monitored items on one subscription.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────── OpcUaBus ───────────────────────────────┐
//! │                                                                        │
//! │  ServerContext (PUB)                     ClientContext (SUB)           │
//! │  ├── TopicRegistry                       ├── SubscriptionManager       │
//! │  ├── PayloadSource                       ├── command channel           │
//! │  └── Server Loop ──┐                     └── Reconnect Loop ──┐        │
//! │                    ▼                                          ▼        │
//! │            dyn ServerEngine                           dyn ClientEngine │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine traits keep the protocol stack out of the orchestration
//! layer: the [`engine::memory`] loopback pair serves tests and
//! development, and the `real-transport` feature wires in the `opcua`
//! crate.
//!
//! Two background tasks exist per bus at most: the server loop, which
//! iterates the engine under the context mutex, and the reconnect loop,
//! which owns the subscription state and transparently restores it after a
//! dropped session.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bus;
pub mod client;
pub mod engine;
pub mod security;
pub mod server;
pub mod subscription;
pub mod topics;

pub use bus::{OpcUaBus, OPCUA_SCHEME};
pub use client::ClientContext;
pub use engine::memory::MemoryBus;
pub use engine::{
    BrowseNode, ClientEngine, ClientEngineConfig, ClientState, EngineFactory, IntervalLimits,
    MonitoredItemRequest, MonitoredItemResult, PayloadSource, ServerEngine, ServerEngineConfig,
    StatusCode, ValueChange, MAX_PAYLOAD_BYTES,
};
pub use security::{
    CertificateLoader, FsCertificateLoader, MemoryCertificateLoader, SecurityArtifacts,
    SecurityMode, SECURITY_POLICY_URI,
};
pub use server::ServerContext;
pub use subscription::{MonitorContext, SubscriptionManager, SubscriptionPhase, SubscriptionStats};
pub use topics::TopicRegistry;

#[cfg(feature = "real-transport")]
pub use engine::real::RealEngineFactory;
