use crate::error::Result;
use crate::types::{
    ChannelId, ChannelInfo, ChannelKind, GuildId, GuildSnapshot, PermissionOverwrite, Permissions,
    RoleId, RoleInfo, UserId,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct CreateChannelSpec {
    pub name: String,
    pub kind: ChannelKind,
    pub parent_id: Option<ChannelId>,
    pub topic: Option<String>,
    pub overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Clone, Default)]
pub struct EditChannelSpec {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub parent_id: Option<Option<ChannelId>>,
    pub position: Option<i64>,
    pub slowmode_seconds: Option<u64>,
    pub nsfw: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CreateRoleSpec {
    pub name: String,
    pub permissions: Permissions,
    pub color: u32,
    pub hoist: bool,
    pub mentionable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EditRoleSpec {
    pub name: Option<String>,
    pub permissions: Option<Permissions>,
    pub color: Option<u32>,
    pub hoist: Option<bool>,
    pub mentionable: Option<bool>,
}

/// Remote workspace-management boundary.
///
/// Every call may fail transiently; retry policy lives with the caller, not
/// here. Implementations must not cache structure across calls.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    /// Read the full current guild structure with stable entity ids.
    async fn fetch_snapshot(&self, guild_id: &GuildId) -> Result<GuildSnapshot>;

    async fn create_channel(
        &self,
        guild_id: &GuildId,
        spec: CreateChannelSpec,
    ) -> Result<ChannelInfo>;

    async fn edit_channel(&self, channel_id: &ChannelId, spec: EditChannelSpec)
    -> Result<ChannelInfo>;

    async fn delete_channel(&self, channel_id: &ChannelId) -> Result<()>;

    async fn create_role(&self, guild_id: &GuildId, spec: CreateRoleSpec) -> Result<RoleInfo>;

    async fn edit_role(
        &self,
        guild_id: &GuildId,
        role_id: &RoleId,
        spec: EditRoleSpec,
    ) -> Result<RoleInfo>;

    async fn delete_role(&self, guild_id: &GuildId, role_id: &RoleId) -> Result<()>;

    /// Replace the full overwrite set on a channel or category.
    async fn set_channel_overwrites(
        &self,
        channel_id: &ChannelId,
        overwrites: Vec<PermissionOverwrite>,
    ) -> Result<()>;

    async fn add_member_role(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Result<()>;

    async fn remove_member_role(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Result<()>;
}
