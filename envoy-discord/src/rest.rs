use crate::api::{CreateChannelSpec, CreateRoleSpec, DiscordApi, EditChannelSpec, EditRoleSpec};
use crate::error::{ApiError, Result};
use crate::types::{
    ChannelId, ChannelInfo, ChannelKind, GuildId, GuildSnapshot, OverwriteTarget,
    PermissionOverwrite, Permissions, RoleId, RoleInfo, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord REST client.
///
/// Thin request/response translation only; throttling, retries, and
/// permission validation are the orchestrator's job.
#[derive(Clone)]
pub struct RestApi {
    http: reqwest::Client,
    bot_token: String,
}

impl RestApi {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{API_BASE}{path}")
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.api_url(path))
            .header("Authorization", format!("Bot {}", self.bot_token))
    }

    async fn expect_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let retry_after_ms = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
            .map(|secs| (secs * 1000.0) as u64);
        let body = resp.text().await.unwrap_or_default();
        Err(map_status(status.as_u16(), retry_after_ms, body))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        let resp = Self::expect_status(resp).await?;
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let resp = self.request(method, path).json(&body).send().await?;
        let resp = Self::expect_status(resp).await?;
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_no_content(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut req = self.request(method, path);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        Self::expect_status(resp).await?;
        Ok(())
    }
}

fn map_status(status: u16, retry_after_ms: Option<u64>, body: String) -> ApiError {
    match status {
        404 => ApiError::NotFound(body),
        403 => ApiError::Forbidden(body),
        409 => ApiError::Conflict(body),
        429 => ApiError::RateLimited {
            retry_after_ms: retry_after_ms.unwrap_or(1_000),
        },
        500..=599 => ApiError::Transient(format!("status={status} body={body}")),
        _ => ApiError::Permanent { status, body },
    }
}

// Discord wire representations.

#[derive(Debug, Deserialize)]
struct RawGuild {
    id: String,
    name: String,
    roles: Vec<RawRole>,
}

#[derive(Debug, Deserialize)]
struct RawRole {
    id: String,
    name: String,
    position: i64,
    permissions: String,
    #[serde(default)]
    color: u32,
    #[serde(default)]
    managed: bool,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    id: String,
    name: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    position: i64,
    #[serde(default)]
    permission_overwrites: Vec<RawOverwrite>,
}

#[derive(Debug, Deserialize)]
struct RawOverwrite {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    allow: String,
    deny: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    roles: Vec<String>,
}

fn parse_permission_bits(raw: &str) -> Permissions {
    Permissions(raw.parse::<u64>().unwrap_or(0))
}

fn role_from_raw(raw: RawRole) -> RoleInfo {
    RoleInfo {
        id: RoleId::new(raw.id),
        name: raw.name,
        position: raw.position,
        permissions: parse_permission_bits(&raw.permissions),
        color: raw.color,
        managed: raw.managed,
    }
}

fn channel_kind_from_raw(kind: u8) -> Option<ChannelKind> {
    match kind {
        0 | 5 => Some(ChannelKind::Text),
        2 | 13 => Some(ChannelKind::Voice),
        4 => Some(ChannelKind::Category),
        _ => None,
    }
}

fn channel_kind_to_raw(kind: ChannelKind) -> u8 {
    match kind {
        ChannelKind::Text => 0,
        ChannelKind::Voice => 2,
        ChannelKind::Category => 4,
    }
}

fn channel_from_raw(raw: RawChannel) -> Option<ChannelInfo> {
    let kind = channel_kind_from_raw(raw.kind)?;
    let overwrites = raw
        .permission_overwrites
        .into_iter()
        .map(|ow| PermissionOverwrite {
            target: if ow.kind == 0 {
                OverwriteTarget::Role(RoleId::new(ow.id))
            } else {
                OverwriteTarget::Member(UserId::new(ow.id))
            },
            allow: parse_permission_bits(&ow.allow),
            deny: parse_permission_bits(&ow.deny),
        })
        .collect();
    Some(ChannelInfo {
        id: ChannelId::new(raw.id),
        name: raw.name,
        kind,
        parent_id: raw.parent_id.map(ChannelId::new),
        position: raw.position,
        overwrites,
    })
}

fn overwrites_to_json(overwrites: &[PermissionOverwrite]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = overwrites
        .iter()
        .map(|ow| {
            let (id, kind) = match &ow.target {
                OverwriteTarget::Role(role) => (role.as_str(), 0),
                OverwriteTarget::Member(user) => (user.as_str(), 1),
            };
            json!({
                "id": id,
                "type": kind,
                "allow": ow.allow.0.to_string(),
                "deny": ow.deny.0.to_string(),
            })
        })
        .collect();
    serde_json::Value::Array(entries)
}

#[async_trait]
impl DiscordApi for RestApi {
    async fn fetch_snapshot(&self, guild_id: &GuildId) -> Result<GuildSnapshot> {
        let guild: RawGuild = self.get_json(&format!("/guilds/{guild_id}")).await?;
        let raw_channels: Vec<RawChannel> =
            self.get_json(&format!("/guilds/{guild_id}/channels")).await?;
        let me: RawUser = self.get_json("/users/@me").await?;
        let member: RawMember = self
            .get_json(&format!("/guilds/{guild_id}/members/{}", me.id))
            .await?;

        let snapshot = GuildSnapshot {
            guild_id: GuildId::new(guild.id),
            name: guild.name,
            roles: guild.roles.into_iter().map(role_from_raw).collect(),
            channels: raw_channels
                .into_iter()
                .filter_map(channel_from_raw)
                .collect(),
            bot_user_id: UserId::new(me.id),
            bot_role_ids: member.roles.into_iter().map(RoleId::new).collect(),
            taken_at: Utc::now(),
        };
        tracing::debug!(
            guild_id = %snapshot.guild_id,
            roles = snapshot.roles.len(),
            channels = snapshot.channels.len(),
            "guild snapshot fetched"
        );
        Ok(snapshot)
    }

    async fn create_channel(
        &self,
        guild_id: &GuildId,
        spec: CreateChannelSpec,
    ) -> Result<ChannelInfo> {
        let mut body = json!({
            "name": spec.name,
            "type": channel_kind_to_raw(spec.kind),
        });
        if let Some(parent) = &spec.parent_id {
            body["parent_id"] = json!(parent.as_str());
        }
        if let Some(topic) = &spec.topic {
            body["topic"] = json!(topic);
        }
        if !spec.overwrites.is_empty() {
            body["permission_overwrites"] = overwrites_to_json(&spec.overwrites);
        }
        let raw: RawChannel = self
            .send_json(
                reqwest::Method::POST,
                &format!("/guilds/{guild_id}/channels"),
                body,
            )
            .await?;
        channel_from_raw(raw).ok_or_else(|| ApiError::Permanent {
            status: 0,
            body: "created channel has unsupported type".to_string(),
        })
    }

    async fn edit_channel(
        &self,
        channel_id: &ChannelId,
        spec: EditChannelSpec,
    ) -> Result<ChannelInfo> {
        let mut body = json!({});
        if let Some(name) = spec.name {
            body["name"] = json!(name);
        }
        if let Some(topic) = spec.topic {
            body["topic"] = json!(topic);
        }
        if let Some(parent) = spec.parent_id {
            body["parent_id"] = match parent {
                Some(id) => json!(id.as_str()),
                None => serde_json::Value::Null,
            };
        }
        if let Some(position) = spec.position {
            body["position"] = json!(position);
        }
        if let Some(slowmode) = spec.slowmode_seconds {
            body["rate_limit_per_user"] = json!(slowmode);
        }
        if let Some(nsfw) = spec.nsfw {
            body["nsfw"] = json!(nsfw);
        }
        let raw: RawChannel = self
            .send_json(reqwest::Method::PATCH, &format!("/channels/{channel_id}"), body)
            .await?;
        channel_from_raw(raw).ok_or_else(|| ApiError::Permanent {
            status: 0,
            body: "edited channel has unsupported type".to_string(),
        })
    }

    async fn delete_channel(&self, channel_id: &ChannelId) -> Result<()> {
        self.send_no_content(
            reqwest::Method::DELETE,
            &format!("/channels/{channel_id}"),
            None,
        )
        .await
    }

    async fn create_role(&self, guild_id: &GuildId, spec: CreateRoleSpec) -> Result<RoleInfo> {
        let body = json!({
            "name": spec.name,
            "permissions": spec.permissions.0.to_string(),
            "color": spec.color,
            "hoist": spec.hoist,
            "mentionable": spec.mentionable,
        });
        let raw: RawRole = self
            .send_json(
                reqwest::Method::POST,
                &format!("/guilds/{guild_id}/roles"),
                body,
            )
            .await?;
        Ok(role_from_raw(raw))
    }

    async fn edit_role(
        &self,
        guild_id: &GuildId,
        role_id: &RoleId,
        spec: EditRoleSpec,
    ) -> Result<RoleInfo> {
        let mut body = json!({});
        if let Some(name) = spec.name {
            body["name"] = json!(name);
        }
        if let Some(permissions) = spec.permissions {
            body["permissions"] = json!(permissions.0.to_string());
        }
        if let Some(color) = spec.color {
            body["color"] = json!(color);
        }
        if let Some(hoist) = spec.hoist {
            body["hoist"] = json!(hoist);
        }
        if let Some(mentionable) = spec.mentionable {
            body["mentionable"] = json!(mentionable);
        }
        let raw: RawRole = self
            .send_json(
                reqwest::Method::PATCH,
                &format!("/guilds/{guild_id}/roles/{role_id}"),
                body,
            )
            .await?;
        Ok(role_from_raw(raw))
    }

    async fn delete_role(&self, guild_id: &GuildId, role_id: &RoleId) -> Result<()> {
        self.send_no_content(
            reqwest::Method::DELETE,
            &format!("/guilds/{guild_id}/roles/{role_id}"),
            None,
        )
        .await
    }

    async fn set_channel_overwrites(
        &self,
        channel_id: &ChannelId,
        overwrites: Vec<PermissionOverwrite>,
    ) -> Result<()> {
        let body = json!({ "permission_overwrites": overwrites_to_json(&overwrites) });
        let _: RawChannel = self
            .send_json(reqwest::Method::PATCH, &format!("/channels/{channel_id}"), body)
            .await?;
        Ok(())
    }

    async fn add_member_role(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Result<()> {
        self.send_no_content(
            reqwest::Method::PUT,
            &format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
            None,
        )
        .await
    }

    async fn remove_member_role(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Result<()> {
        self.send_no_content(
            reqwest::Method::DELETE,
            &format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_taxonomy() {
        assert!(matches!(
            map_status(404, None, String::new()),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            map_status(403, None, String::new()),
            ApiError::Forbidden(_)
        ));
        assert!(matches!(
            map_status(409, None, String::new()),
            ApiError::Conflict(_)
        ));
        assert!(map_status(429, Some(250), String::new()).is_transient());
        assert!(map_status(502, None, String::new()).is_transient());
        assert!(!map_status(400, None, String::new()).is_transient());
    }

    #[test]
    fn overwrite_json_uses_discord_wire_shape() {
        let ows = vec![
            PermissionOverwrite::for_role(RoleId::new("1")).allow(Permissions::VIEW_CHANNEL),
            PermissionOverwrite::for_member(UserId::new("2")).deny(Permissions::SEND_MESSAGES),
        ];
        let v = overwrites_to_json(&ows);
        assert_eq!(v[0]["type"], 0);
        assert_eq!(v[1]["type"], 1);
        assert_eq!(v[0]["allow"], Permissions::VIEW_CHANNEL.0.to_string());
        assert_eq!(v[1]["deny"], Permissions::SEND_MESSAGES.0.to_string());
    }

    #[test]
    fn raw_channel_decodes_and_filters_threads() {
        let raw: RawChannel = serde_json::from_value(json!({
            "id": "42",
            "name": "general",
            "type": 0,
            "parent_id": "7",
            "position": 3,
            "permission_overwrites": [
                { "id": "9", "type": 0, "allow": "1024", "deny": "0" }
            ]
        }))
        .expect("decode raw channel");
        let info = channel_from_raw(raw).expect("supported type");
        assert_eq!(info.kind, ChannelKind::Text);
        assert_eq!(info.overwrites.len(), 1);
        assert!(info.overwrites[0].allow.contains(Permissions::VIEW_CHANNEL));

        let thread: RawChannel = serde_json::from_value(json!({
            "id": "43", "name": "t", "type": 11
        }))
        .expect("decode thread");
        assert!(channel_from_raw(thread).is_none());
    }
}
