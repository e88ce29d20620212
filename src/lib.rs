//! opdeck: sample manager backend for Teenage Engineering OP-Z and OP-1.
//!
//! The core of the crate is device connection tracking: a background poller
//! classifies each device's USB/mount state and fans out meaningful
//! transitions to every open page over SSE. See `monitor` for the pipeline,
//! `api` for the HTTP surface, and `client` for the consuming side.

pub mod api;
pub mod client;
pub mod monitor;
pub mod settings;
