//! Envoy configuration loader.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct EnvoyConfig {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub design: DesignConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Rolling-window API call ceiling.
    #[serde(default = "default_max_calls_per_minute")]
    pub max_calls_per_minute: u32,
    /// Remote calls allowed in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Pause inserted between items of a batch operation.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_max_calls_per_minute() -> u32 {
    25
}

fn default_max_concurrency() -> u32 {
    2
}

fn default_batch_delay_ms() -> u64 {
    1000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_calls_per_minute: default_max_calls_per_minute(),
            max_concurrency: default_max_concurrency(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestructiveScope {
    /// Each operation is judged on its own blast radius.
    PerCall,
    /// Destructive deletions accumulate across an approved plan.
    PerPlan,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Permit edits and deletes of roles the operator flagged as protected.
    #[serde(default)]
    pub allow_unsafe_role_ops: bool,
    /// Require human approval of a plan before mutating operations run.
    #[serde(default = "default_confirmation_required")]
    pub confirmation_required: bool,
    /// Deletions at or above this count are blocked without operator override.
    #[serde(default = "default_destructive_threshold")]
    pub destructive_threshold: u32,
    #[serde(default = "default_destructive_scope")]
    pub destructive_scope: DestructiveScope,
    /// Role names that may never be edited or deleted regardless of hierarchy.
    #[serde(default)]
    pub protected_roles: Vec<String>,
}

fn default_confirmation_required() -> bool {
    true
}

fn default_destructive_threshold() -> u32 {
    5
}

fn default_destructive_scope() -> DestructiveScope {
    DestructiveScope::PerCall
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_unsafe_role_ops: false,
            confirmation_required: default_confirmation_required(),
            destructive_threshold: default_destructive_threshold(),
            destructive_scope: default_destructive_scope(),
            protected_roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    /// How long a submitted plan waits for a human decision.
    #[serde(default = "default_confirmation_secs")]
    pub confirmation_secs: u64,
    /// How long an `ask_user` question waits for an answer.
    #[serde(default = "default_ask_user_secs")]
    pub ask_user_secs: u64,
}

fn default_confirmation_secs() -> u64 {
    300
}

fn default_ask_user_secs() -> u64 {
    300
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            confirmation_secs: default_confirmation_secs(),
            ask_user_secs: default_ask_user_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DesignConfig {
    /// Markdown server-design guide; the embedded default is used when unset.
    #[serde(default)]
    pub guide_path: Option<PathBuf>,
}

impl EnvoyConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: EnvoyConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DISCORD_BOT_TOKEN") {
            if !v.trim().is_empty() {
                self.discord.bot_token = v;
            }
        }
        if let Ok(v) = std::env::var("ENVOY_ALLOW_UNSAFE_ROLE_OPS") {
            if let Ok(flag) = v.trim().parse::<bool>() {
                self.security.allow_unsafe_role_ops = flag;
            }
        }
        if let Ok(v) = std::env::var("ENVOY_DESIGN_GUIDE") {
            if !v.trim().is_empty() {
                self.design.guide_path = Some(PathBuf::from(v));
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "discord.bot_token is required (or set DISCORD_BOT_TOKEN)"
            ));
        }
        if self.limits.max_calls_per_minute == 0 {
            return Err(anyhow::anyhow!("limits.max_calls_per_minute must be > 0"));
        }
        if self.limits.max_concurrency == 0 {
            return Err(anyhow::anyhow!("limits.max_concurrency must be > 0"));
        }
        if self.security.destructive_threshold == 0 {
            return Err(anyhow::anyhow!("security.destructive_threshold must be > 0"));
        }
        if self.timeouts.confirmation_secs == 0 || self.timeouts.ask_user_secs == 0 {
            return Err(anyhow::anyhow!("timeouts must be > 0"));
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".envoy").join("config.toml")
}
