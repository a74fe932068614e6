//! Live host metrics over WebSockets
//!
//! A [`Sampler`](sampler::Sampler) collects host metrics on a fixed interval
//! and hands each rendered snapshot to a [`BroadcastServer`], which fans it
//! out to every connected subscriber through a bounded per-subscriber
//! mailbox.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hwmon_rs::sampler::{HostMetrics, Sampler, SamplerConfig};
//! use hwmon_rs::{BroadcastServer, ServerConfig};
//!
//! # async fn example() -> hwmon_rs::error::Result<()> {
//! let server = Arc::new(BroadcastServer::new(ServerConfig::default()));
//! let sampler = Sampler::new(HostMetrics::new(), SamplerConfig::default()).spawn(&server);
//!
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! sampler.abort();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod registry;
pub mod sampler;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, MetricError, Result};
pub use registry::{OverflowPolicy, RegistryConfig, Subscriber, SubscriberRegistry};
pub use server::{BroadcastServer, ServerConfig};
pub use session::CloseReason;
