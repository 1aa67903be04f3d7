//! Process wiring.
//!
//! Builds the shared services (REST client, design guide, session manager)
//! and runs until shutdown. The chat gateway hands turns to the
//! [`SessionManager`]; this module owns everything below that boundary.

use crate::config::EnvoyConfig;
use crate::design::DesignGuide;
use crate::session::SessionManager;
use envoy_discord::RestApi;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = EnvoyConfig::load(config_path).await?;
    let manager = build_manager(config).await?;

    tracing::info!(
        active_sessions = manager.active_count(),
        "envoy ready; waiting for architecting requests"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("listen for shutdown signal: {e}"))?;
    tracing::info!(
        operations_performed = manager.limiter().operations_performed(),
        "shutdown signal received"
    );
    Ok(())
}

pub async fn build_manager(config: EnvoyConfig) -> anyhow::Result<SessionManager> {
    let design = match &config.design.guide_path {
        Some(path) => Arc::new(DesignGuide::load(path).await?),
        None => Arc::new(DesignGuide::embedded()),
    };
    let api = Arc::new(RestApi::new(&config.discord.bot_token)?);
    Ok(SessionManager::new(config, api, design))
}

/// Validate configuration and local assets without touching the network.
pub async fn doctor(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = EnvoyConfig::load(config_path).await?;
    println!("config: ok");
    println!(
        "limits: {}/min, concurrency {}, batch delay {}ms",
        config.limits.max_calls_per_minute,
        config.limits.max_concurrency,
        config.limits.batch_delay_ms
    );
    println!(
        "security: confirmation_required={}, destructive_threshold={}, unsafe_role_ops={}",
        config.security.confirmation_required,
        config.security.destructive_threshold,
        config.security.allow_unsafe_role_ops
    );

    let design = match &config.design.guide_path {
        Some(path) => DesignGuide::load(path).await?,
        None => DesignGuide::embedded(),
    };
    println!(
        "design guide: {} section(s) ({})",
        design.section_titles().len(),
        config
            .design
            .guide_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "embedded".to_string())
    );
    println!("doctor: all checks passed");
    Ok(())
}
