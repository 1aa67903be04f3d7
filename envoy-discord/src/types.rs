use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(GuildId);
id_newtype!(ChannelId);
id_newtype!(RoleId);
id_newtype!(UserId);

/// Discord permission bitset.
///
/// Values are the Discord API v10 permission flags. Only the subset the
/// orchestrator can require or grant through tools is named here; unknown
/// bits pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub u64);

impl Permissions {
    pub const CREATE_INSTANT_INVITE: Permissions = Permissions(1 << 0);
    pub const KICK_MEMBERS: Permissions = Permissions(1 << 1);
    pub const BAN_MEMBERS: Permissions = Permissions(1 << 2);
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const MANAGE_CHANNELS: Permissions = Permissions(1 << 4);
    pub const MANAGE_GUILD: Permissions = Permissions(1 << 5);
    pub const ADD_REACTIONS: Permissions = Permissions(1 << 6);
    pub const VIEW_AUDIT_LOG: Permissions = Permissions(1 << 7);
    pub const STREAM: Permissions = Permissions(1 << 9);
    pub const VIEW_CHANNEL: Permissions = Permissions(1 << 10);
    pub const SEND_MESSAGES: Permissions = Permissions(1 << 11);
    pub const MANAGE_MESSAGES: Permissions = Permissions(1 << 13);
    pub const EMBED_LINKS: Permissions = Permissions(1 << 14);
    pub const ATTACH_FILES: Permissions = Permissions(1 << 15);
    pub const READ_MESSAGE_HISTORY: Permissions = Permissions(1 << 16);
    pub const MENTION_EVERYONE: Permissions = Permissions(1 << 17);
    pub const CONNECT: Permissions = Permissions(1 << 20);
    pub const SPEAK: Permissions = Permissions(1 << 21);
    pub const MUTE_MEMBERS: Permissions = Permissions(1 << 22);
    pub const DEAFEN_MEMBERS: Permissions = Permissions(1 << 23);
    pub const MOVE_MEMBERS: Permissions = Permissions(1 << 24);
    pub const CHANGE_NICKNAME: Permissions = Permissions(1 << 26);
    pub const MANAGE_NICKNAMES: Permissions = Permissions(1 << 27);
    pub const MANAGE_ROLES: Permissions = Permissions(1 << 28);
    pub const MANAGE_WEBHOOKS: Permissions = Permissions(1 << 29);
    pub const MANAGE_EVENTS: Permissions = Permissions(1 << 33);
    pub const MANAGE_THREADS: Permissions = Permissions(1 << 34);
    pub const CREATE_PUBLIC_THREADS: Permissions = Permissions(1 << 35);
    pub const CREATE_PRIVATE_THREADS: Permissions = Permissions(1 << 36);
    pub const SEND_MESSAGES_IN_THREADS: Permissions = Permissions(1 << 38);
    pub const MODERATE_MEMBERS: Permissions = Permissions(1 << 40);

    pub const fn empty() -> Self {
        Permissions(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Permissions) -> Permissions {
        Permissions(self.0 | other.0)
    }

    pub fn missing_from(self, granted: Permissions) -> Permissions {
        Permissions(self.0 & !granted.0)
    }

    /// Resolve a lowercase permission name as used in tool arguments.
    pub fn by_name(name: &str) -> Option<Permissions> {
        let bits = match name {
            "create_instant_invite" => Self::CREATE_INSTANT_INVITE,
            "kick_members" => Self::KICK_MEMBERS,
            "ban_members" => Self::BAN_MEMBERS,
            "administrator" => Self::ADMINISTRATOR,
            "manage_channels" => Self::MANAGE_CHANNELS,
            "manage_guild" => Self::MANAGE_GUILD,
            "add_reactions" => Self::ADD_REACTIONS,
            "view_audit_log" => Self::VIEW_AUDIT_LOG,
            "stream" => Self::STREAM,
            "view_channel" | "read_messages" => Self::VIEW_CHANNEL,
            "send_messages" => Self::SEND_MESSAGES,
            "manage_messages" => Self::MANAGE_MESSAGES,
            "embed_links" => Self::EMBED_LINKS,
            "attach_files" => Self::ATTACH_FILES,
            "read_message_history" => Self::READ_MESSAGE_HISTORY,
            "mention_everyone" => Self::MENTION_EVERYONE,
            "connect" => Self::CONNECT,
            "speak" => Self::SPEAK,
            "mute_members" => Self::MUTE_MEMBERS,
            "deafen_members" => Self::DEAFEN_MEMBERS,
            "move_members" => Self::MOVE_MEMBERS,
            "change_nickname" => Self::CHANGE_NICKNAME,
            "manage_nicknames" => Self::MANAGE_NICKNAMES,
            "manage_roles" | "manage_permissions" => Self::MANAGE_ROLES,
            "manage_webhooks" => Self::MANAGE_WEBHOOKS,
            "manage_events" => Self::MANAGE_EVENTS,
            "manage_threads" => Self::MANAGE_THREADS,
            "create_public_threads" => Self::CREATE_PUBLIC_THREADS,
            "create_private_threads" => Self::CREATE_PRIVATE_THREADS,
            "send_messages_in_threads" => Self::SEND_MESSAGES_IN_THREADS,
            "moderate_members" => Self::MODERATE_MEMBERS,
            _ => return None,
        };
        Some(bits)
    }

    /// Build a bitset from tool-supplied names. Unknown names are returned
    /// rather than silently dropped so callers can report them.
    pub fn from_names<'a, I>(names: I) -> (Permissions, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut bits = Permissions::empty();
        let mut unknown = Vec::new();
        for name in names {
            let lower = name.to_ascii_lowercase();
            match Permissions::by_name(&lower) {
                Some(p) => bits = bits.union(p),
                None => unknown.push(name.to_string()),
            }
        }
        (bits, unknown)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
            ChannelKind::Category => "category",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(ChannelKind::Text),
            "voice" => Some(ChannelKind::Voice),
            "category" => Some(ChannelKind::Category),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum OverwriteTarget {
    Role(RoleId),
    Member(UserId),
}

/// One permission overwrite entry on a channel or category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub target: OverwriteTarget,
    pub allow: Permissions,
    pub deny: Permissions,
}

impl PermissionOverwrite {
    pub fn for_role(role: RoleId) -> Self {
        Self {
            target: OverwriteTarget::Role(role),
            allow: Permissions::empty(),
            deny: Permissions::empty(),
        }
    }

    pub fn for_member(user: UserId) -> Self {
        Self {
            target: OverwriteTarget::Member(user),
            allow: Permissions::empty(),
            deny: Permissions::empty(),
        }
    }

    pub fn allow(mut self, bits: Permissions) -> Self {
        self.allow = self.allow.union(bits);
        self.deny = Permissions(self.deny.0 & !bits.0);
        self
    }

    pub fn deny(mut self, bits: Permissions) -> Self {
        self.deny = self.deny.union(bits);
        self.allow = Permissions(self.allow.0 & !bits.0);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
    /// Hierarchy position; higher means more senior. `@everyone` is 0.
    pub position: i64,
    pub permissions: Permissions,
    pub color: u32,
    pub managed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    pub parent_id: Option<ChannelId>,
    pub position: i64,
    #[serde(default)]
    pub overwrites: Vec<PermissionOverwrite>,
}

/// Point-in-time view of the guild used for validation and name resolution.
///
/// A snapshot is never assumed stale-safe: the dispatcher refreshes it
/// before hierarchy-sensitive mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub guild_id: GuildId,
    pub name: String,
    pub roles: Vec<RoleInfo>,
    pub channels: Vec<ChannelInfo>,
    pub bot_user_id: UserId,
    pub bot_role_ids: Vec<RoleId>,
    pub taken_at: DateTime<Utc>,
}

impl GuildSnapshot {
    pub fn role_named(&self, name: &str) -> Option<&RoleInfo> {
        self.roles
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn role_by_id(&self, id: &RoleId) -> Option<&RoleInfo> {
        self.roles.iter().find(|r| &r.id == id)
    }

    /// The `@everyone` role shares its id with the guild.
    pub fn everyone_role(&self) -> Option<&RoleInfo> {
        self.roles.iter().find(|r| r.id.as_str() == self.guild_id.as_str())
    }

    pub fn channel_named(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels
            .iter()
            .find(|c| c.kind != ChannelKind::Category && c.name.eq_ignore_ascii_case(name))
    }

    pub fn category_named(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels
            .iter()
            .find(|c| c.kind == ChannelKind::Category && c.name.eq_ignore_ascii_case(name))
    }

    pub fn any_channel_named(&self, name: &str) -> Option<&ChannelInfo> {
        self.channels
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn channel_by_id(&self, id: &ChannelId) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| &c.id == id)
    }

    pub fn categories(&self) -> impl Iterator<Item = &ChannelInfo> {
        self.channels
            .iter()
            .filter(|c| c.kind == ChannelKind::Category)
    }

    pub fn children_of(&self, category_id: &ChannelId) -> Vec<&ChannelInfo> {
        self.channels
            .iter()
            .filter(|c| c.parent_id.as_ref() == Some(category_id))
            .collect()
    }

    /// Highest position among the bot's roles. 0 when only `@everyone`.
    pub fn bot_top_role_position(&self) -> i64 {
        self.bot_role_ids
            .iter()
            .filter_map(|id| self.role_by_id(id))
            .map(|r| r.position)
            .max()
            .unwrap_or(0)
    }

    /// Union of permission bits granted through the bot's roles, including
    /// the `@everyone` baseline.
    pub fn bot_permissions(&self) -> Permissions {
        let mut bits = self
            .everyone_role()
            .map(|r| r.permissions)
            .unwrap_or_default();
        for id in &self.bot_role_ids {
            if let Some(role) = self.role_by_id(id) {
                bits = bits.union(role.permissions);
            }
        }
        bits
    }
}
