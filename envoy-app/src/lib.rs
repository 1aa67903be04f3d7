//! Envoy server-architect orchestrator.
//!
//! The binary wires a chat surface on top of these modules; everything
//! below the gateway boundary lives here so it can be driven and tested
//! directly.

pub mod config;
pub mod confirm;
pub mod design;
pub mod dispatcher;
pub mod guard;
pub mod limiter;
pub mod plan;
pub mod server;
pub mod session;
pub mod subagent;
