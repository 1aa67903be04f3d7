//! Pre-dispatch safety checks.
//!
//! The guard runs after argument parsing and before any remote call. Checks
//! run in a fixed order: target existence, role hierarchy, bot permission
//! bits, destructive blast radius. Denials come back as values so the
//! reasoning engine can adapt instead of aborting the session.

use crate::config::{DestructiveScope, SecurityConfig};
use envoy_discord::{GuildSnapshot, Permissions, RoleInfo};
use envoy_tools::{ErrorKind, ToolInvocation};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    TargetNotFound(String),
    RoleHierarchyViolation(String),
    InsufficientBotPermission(String),
    UnsafeOperationBlocked(String),
}

impl DenyReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DenyReason::TargetNotFound(_) => ErrorKind::TargetNotFound,
            DenyReason::RoleHierarchyViolation(_) => ErrorKind::RoleHierarchyViolation,
            DenyReason::InsufficientBotPermission(_) => ErrorKind::InsufficientBotPermission,
            DenyReason::UnsafeOperationBlocked(_) => ErrorKind::UnsafeOperationBlocked,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DenyReason::TargetNotFound(m)
            | DenyReason::RoleHierarchyViolation(m)
            | DenyReason::InsufficientBotPermission(m)
            | DenyReason::UnsafeOperationBlocked(m) => m,
        }
    }
}

pub struct PermissionGuard {
    security: SecurityConfig,
    /// Deletions accumulated across the approved plan. Only consulted when
    /// `destructive_scope` is per-plan.
    plan_deletions: AtomicU32,
}

impl PermissionGuard {
    pub fn new(security: SecurityConfig) -> Self {
        Self {
            security,
            plan_deletions: AtomicU32::new(0),
        }
    }

    /// Re-arm the cumulative deletion budget for a freshly approved plan.
    pub fn reset_plan_window(&self) {
        self.plan_deletions.store(0, Ordering::Relaxed);
    }

    /// Validate one mutating operation against the latest snapshot.
    ///
    /// Re-evaluated per call; nothing here is cached across the plan.
    pub fn validate(
        &self,
        invocation: &ToolInvocation,
        snapshot: &GuildSnapshot,
    ) -> Result<(), DenyReason> {
        self.check_targets(invocation, snapshot)?;
        self.check_role_hierarchy(invocation, snapshot)?;
        self.check_bot_permissions(invocation, snapshot)?;
        self.check_destructive_budget(invocation, snapshot)?;
        Ok(())
    }

    fn check_targets(
        &self,
        invocation: &ToolInvocation,
        snapshot: &GuildSnapshot,
    ) -> Result<(), DenyReason> {
        let missing_channel = |name: &str| {
            DenyReason::TargetNotFound(format!("channel '{name}' not found in this server"))
        };
        let missing_category = |name: &str| {
            DenyReason::TargetNotFound(format!("category '{name}' not found in this server"))
        };
        let missing_role =
            |name: &str| DenyReason::TargetNotFound(format!("role '{name}' not found in this server"));

        match invocation {
            ToolInvocation::CreateChannel(p) => {
                if let Some(category) = &p.category_name {
                    if snapshot.category_named(category).is_none() {
                        return Err(missing_category(category));
                    }
                }
            }
            ToolInvocation::EditChannel(p) => {
                if snapshot.channel_named(&p.channel_name).is_none() {
                    return Err(missing_channel(&p.channel_name));
                }
            }
            ToolInvocation::DeleteChannel(p) => {
                if snapshot.channel_named(&p.name).is_none() {
                    return Err(missing_channel(&p.name));
                }
            }
            ToolInvocation::MoveChannel(p) => {
                if snapshot.channel_named(&p.channel_name).is_none() {
                    return Err(missing_channel(&p.channel_name));
                }
                if snapshot.category_named(&p.category_name).is_none() {
                    return Err(missing_category(&p.category_name));
                }
            }
            ToolInvocation::EditCategory(p) => {
                if snapshot.category_named(&p.name).is_none() {
                    return Err(missing_category(&p.name));
                }
            }
            ToolInvocation::DeleteCategory(p) => {
                if snapshot.category_named(&p.name).is_none() {
                    return Err(missing_category(&p.name));
                }
            }
            ToolInvocation::EditRole(p) => {
                if snapshot.role_named(&p.name).is_none() {
                    return Err(missing_role(&p.name));
                }
            }
            ToolInvocation::DeleteRole(p) => {
                if snapshot.role_named(&p.name).is_none() {
                    return Err(missing_role(&p.name));
                }
            }
            ToolInvocation::AssignRole(p) => {
                if snapshot.role_named(&p.role_name).is_none() {
                    return Err(missing_role(&p.role_name));
                }
            }
            ToolInvocation::RemoveRole(p) => {
                if snapshot.role_named(&p.role_name).is_none() {
                    return Err(missing_role(&p.role_name));
                }
            }
            ToolInvocation::SetPermissions(p) => {
                if snapshot.any_channel_named(&p.channel_name).is_none() {
                    return Err(missing_channel(&p.channel_name));
                }
                if snapshot.role_named(&p.target_name).is_none() {
                    return Err(missing_role(&p.target_name));
                }
            }
            ToolInvocation::SetCategoryPermissions(p) => {
                if snapshot.category_named(&p.category_name).is_none() {
                    return Err(missing_category(&p.category_name));
                }
                for role_name in p.role_permissions.keys() {
                    if snapshot.role_named(role_name).is_none() {
                        return Err(missing_role(role_name));
                    }
                }
            }
            ToolInvocation::MakeChannelPrivate(p) => {
                if snapshot.any_channel_named(&p.channel_name).is_none() {
                    return Err(missing_channel(&p.channel_name));
                }
                for role_name in &p.allowed_roles {
                    if snapshot.role_named(role_name).is_none() {
                        return Err(missing_role(role_name));
                    }
                }
            }
            ToolInvocation::CloneChannelPermissions(p) => {
                if snapshot.any_channel_named(&p.source_channel).is_none() {
                    return Err(missing_channel(&p.source_channel));
                }
                if snapshot.any_channel_named(&p.target_channel).is_none() {
                    return Err(missing_channel(&p.target_channel));
                }
            }
            ToolInvocation::AutoConfigurePermissions(p) => {
                for role_name in &p.staff_roles {
                    if snapshot.role_named(role_name).is_none() {
                        return Err(missing_role(role_name));
                    }
                }
                if let Some(member) = &p.member_role {
                    if snapshot.role_named(member).is_none() {
                        return Err(missing_role(member));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_role_hierarchy(
        &self,
        invocation: &ToolInvocation,
        snapshot: &GuildSnapshot,
    ) -> Result<(), DenyReason> {
        if !invocation.is_role_affecting() {
            return Ok(());
        }
        let role_name = match invocation {
            ToolInvocation::EditRole(p) => &p.name,
            ToolInvocation::DeleteRole(p) => &p.name,
            ToolInvocation::AssignRole(p) => &p.role_name,
            ToolInvocation::RemoveRole(p) => &p.role_name,
            _ => return Ok(()),
        };
        // Target existence was checked above.
        let Some(role) = snapshot.role_named(role_name) else {
            return Ok(());
        };

        self.check_role_manageable(role, snapshot)
    }

    fn check_role_manageable(
        &self,
        role: &RoleInfo,
        snapshot: &GuildSnapshot,
    ) -> Result<(), DenyReason> {
        let bot_top = snapshot.bot_top_role_position();
        if role.position >= bot_top && !self.security.allow_unsafe_role_ops {
            return Err(DenyReason::RoleHierarchyViolation(format!(
                "role '{}' (position {}) is at or above the bot's highest role (position {bot_top})",
                role.name, role.position
            )));
        }
        if role.managed {
            return Err(DenyReason::UnsafeOperationBlocked(format!(
                "role '{}' is managed by an integration and cannot be modified",
                role.name
            )));
        }
        let everyone = snapshot.everyone_role().map(|r| r.id.clone());
        if everyone.as_ref() == Some(&role.id) && !self.security.allow_unsafe_role_ops {
            return Err(DenyReason::UnsafeOperationBlocked(
                "the @everyone role cannot be modified without the unsafe override".to_string(),
            ));
        }
        let protected = self
            .security
            .protected_roles
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&role.name));
        if protected && !self.security.allow_unsafe_role_ops {
            return Err(DenyReason::UnsafeOperationBlocked(format!(
                "role '{}' is protected by configuration",
                role.name
            )));
        }
        Ok(())
    }

    fn check_bot_permissions(
        &self,
        invocation: &ToolInvocation,
        snapshot: &GuildSnapshot,
    ) -> Result<(), DenyReason> {
        let required = invocation.required_permissions();
        if required.is_empty() {
            return Ok(());
        }
        // ADMINISTRATOR is not accepted as a blanket bypass; the specific
        // bits must be granted through the bot's roles.
        let granted = snapshot.bot_permissions();
        let missing = required.missing_from(granted);
        if !missing.is_empty() {
            return Err(DenyReason::InsufficientBotPermission(format!(
                "bot lacks required permission bits {missing} for {}",
                invocation.tool_name()
            )));
        }
        Ok(())
    }

    fn check_destructive_budget(
        &self,
        invocation: &ToolInvocation,
        snapshot: &GuildSnapshot,
    ) -> Result<(), DenyReason> {
        let count = destructive_count(invocation, snapshot);
        if count == 0 {
            return Ok(());
        }
        let effective = match self.security.destructive_scope {
            DestructiveScope::PerCall => count,
            DestructiveScope::PerPlan => {
                self.plan_deletions.fetch_add(count, Ordering::Relaxed) + count
            }
        };
        if effective >= self.security.destructive_threshold && !self.security.allow_unsafe_role_ops
        {
            return Err(DenyReason::UnsafeOperationBlocked(format!(
                "{effective} deletions reach the destructive threshold ({}); \
                 ask the operator to confirm or raise the limit",
                self.security.destructive_threshold
            )));
        }
        Ok(())
    }
}

/// Number of entities an operation would delete or strip.
fn destructive_count(invocation: &ToolInvocation, snapshot: &GuildSnapshot) -> u32 {
    match invocation {
        ToolInvocation::DeleteChannel(_)
        | ToolInvocation::DeleteRole(_)
        | ToolInvocation::RemoveRole(_) => 1,
        ToolInvocation::DeleteCategory(p) => {
            let children = if p.delete_channels {
                snapshot
                    .category_named(&p.name)
                    .map(|c| snapshot.children_of(&c.id).len() as u32)
                    .unwrap_or(0)
            } else {
                0
            };
            1 + children
        }
        _ => 0,
    }
}
