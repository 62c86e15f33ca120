// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol-independent publish/subscribe data bus abstraction.
//!
//! This crate defines the boundary contract of a topic-oriented data bus:
//! configuration types, the endpoint resolver, the error taxonomy, and the
//! [`DataBus`] trait that concrete bus implementations (such as the OPC-UA
//! rendition in `databus-opcua`) provide.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use databus_core::{ContextConfig, DataBus, Direction, TopicConfig};
//! use databus_core::bus::{ChannelHandler, SubscriptionTrigger};
//!
//! async fn run(bus: &mut dyn DataBus) -> databus_core::BusResult<()> {
//!     let config = ContextConfig::builder()
//!         .endpoint("opcua://localhost:65003")
//!         .direction(Direction::Sub)
//!         .build()?;
//!     bus.context_create(&config).await?;
//!
//!     let (handler, mut samples) = ChannelHandler::with_channel(64);
//!     let topics = vec![TopicConfig::new("factory", "temperature")];
//!     bus.subscribe(&topics, SubscriptionTrigger::Start, Arc::new(handler))
//!         .await?;
//!
//!     while let Some(sample) = samples.recv().await {
//!         println!("{} = {}", sample.topic, sample.payload);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod endpoint;
pub mod error;

pub use bus::{ChannelHandler, DataBus, DataChangeHandler, SubscriptionTrigger, TopicSample};
pub use config::{ContextConfig, ContextConfigBuilder, DataType, Direction, TopicConfig};
pub use endpoint::Endpoint;
pub use error::{BusError, BusResult};
