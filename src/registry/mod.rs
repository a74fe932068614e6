//! Subscriber registry for broadcast fan-out
//!
//! The registry tracks every connection that is currently willing to
//! receive updates and fans each payload out to their mailboxes.
//!
//! # Architecture
//!
//! ```text
//!                     Arc<SubscriberRegistry>
//!                  ┌───────────────────────────┐
//!                  │ Mutex<HashMap<Id,         │
//!                  │   SubscriberHandle {      │
//!                  │     tx: mpsc::Sender,     │
//!                  │   }                       │
//!                  │ >>                        │
//!                  └─────────────┬─────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!    [Sampler]             [Subscriber]            [Subscriber]
//!    tick()                mailbox.recv()          mailbox.recv()
//!        │                       │                       │
//!        └──► registry.broadcast()──► transport.send() ──► client
//! ```
//!
//! `bytes::Bytes` is reference counted, so every mailbox shares the same
//! payload allocation.

pub mod config;
pub mod store;
pub mod subscriber;

pub use config::{OverflowPolicy, RegistryConfig};
pub use store::{BroadcastReport, SubscriberRegistry};
pub use subscriber::{Subscriber, SubscriberHandle, SubscriberId};
