//! Discord remote-API boundary for Envoy.
//!
//! This crate is pure I/O and data: a typed guild model, the `DiscordApi`
//! trait the orchestrator programs against, and a REST implementation.
//! Throttling, permission validation, and retry policy live upstream.

mod api;
mod error;
mod rest;
mod types;

pub use api::{CreateChannelSpec, CreateRoleSpec, DiscordApi, EditChannelSpec, EditRoleSpec};
pub use error::{ApiError, Result};
pub use rest::RestApi;
pub use types::{
    ChannelId, ChannelInfo, ChannelKind, GuildId, GuildSnapshot, OverwriteTarget,
    PermissionOverwrite, Permissions, RoleId, RoleInfo, UserId,
};
