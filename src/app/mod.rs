//! Application core: the lifecycle loop and its ports.
//!
//! Nothing in here talks to hardware or the network directly. The update
//! engine, the transport and the event sink are reached through the
//! **port traits** in [`ports`], so the loop runs unchanged against the
//! in-process loopback agent on the host.

pub mod callback;
pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
