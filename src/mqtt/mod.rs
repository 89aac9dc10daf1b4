//! Shared MQTT connection plumbing.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         MQTT Stack                            │
//! │                                                               │
//! │  callers (engine, job worker)                                 │
//! │       │ blocking publish / subscribe / unsubscribe            │
//! │       ▼                                                       │
//! │  ┌───────────────┐  enqueue + completion  ┌───────────────┐  │
//! │  │ CommandBridge │───────────────────────▶│   MqttAgent   │  │
//! │  └───────────────┘                        │   (trait)     │  │
//! │          │ add/remove on ack              └───────┬───────┘  │
//! │          ▼                                        │ inbound  │
//! │  ┌──────────────────────┐◀────────────────────────┘ PUBLISH  │
//! │  │ SubscriptionRegistry │──▶ per-filter callback             │
//! │  └──────────────────────┘     (chosen by topic::classify)    │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod bridge;
pub mod loopback;
pub mod subscriptions;
pub mod topic;
