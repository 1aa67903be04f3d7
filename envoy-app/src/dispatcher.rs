//! Tool dispatcher.
//!
//! Maps one [`OperationRequest`] to a validated, throttled remote call and
//! normalizes the outcome into an [`OperationResult`]. Order of checks is
//! cheapest first: registry lookup, argument shape, argument semantics,
//! confirmation gate, permission guard, then the network.

use crate::confirm::ConfirmationGate;
use crate::design::DesignGuide;
use crate::guard::PermissionGuard;
use crate::limiter::RateLimiter;
use crate::plan::{PlanError, PlanTracker};
use crate::subagent::{self, AskOutcome, PermissionTemplate, QuestionDesk};
use envoy_discord::{
    ApiError, ChannelKind, CreateChannelSpec, CreateRoleSpec, DiscordApi, EditChannelSpec,
    EditRoleSpec, GuildId, GuildSnapshot, PermissionOverwrite, Permissions, UserId,
};
use envoy_tools::{
    ErrorKind, OperationRequest, OperationResult, TaskStatus, ToolInvocation,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

pub struct ToolDispatcher {
    api: Arc<dyn DiscordApi>,
    limiter: Arc<RateLimiter>,
    guard: PermissionGuard,
    plan: Arc<PlanTracker>,
    gate: Arc<ConfirmationGate>,
    questions: Arc<QuestionDesk>,
    design: Arc<DesignGuide>,
    guild_id: GuildId,
    ask_user_timeout: Duration,
    snapshot: Mutex<Option<GuildSnapshot>>,
}

impl ToolDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn DiscordApi>,
        limiter: Arc<RateLimiter>,
        guard: PermissionGuard,
        plan: Arc<PlanTracker>,
        gate: Arc<ConfirmationGate>,
        questions: Arc<QuestionDesk>,
        design: Arc<DesignGuide>,
        guild_id: GuildId,
        ask_user_timeout: Duration,
    ) -> Self {
        Self {
            api,
            limiter,
            guard,
            plan,
            gate,
            questions,
            design,
            guild_id,
            ask_user_timeout,
            snapshot: Mutex::new(None),
        }
    }

    /// Execute one operation end to end. Never returns a process error;
    /// every failure becomes a structured result the engine can react to.
    pub async fn dispatch(&self, request: &OperationRequest) -> OperationResult {
        let started = tokio::time::Instant::now();
        let invocation = match ToolInvocation::parse(request) {
            Ok(invocation) => invocation,
            Err(e) => {
                tracing::warn!(tool = %request.tool_name, error = %e, "rejected tool call");
                return OperationResult::fail(e.kind(), e.to_string());
            }
        };
        let tool = invocation.tool_name();

        if let Err(message) = semantic_check(&invocation) {
            return OperationResult::fail(ErrorKind::InvalidArguments, message);
        }

        let result = if invocation.is_mutating() {
            self.dispatch_mutating(request, &invocation).await
        } else {
            self.dispatch_control(&invocation).await
        };

        tracing::info!(
            tool = %tool,
            turn = %request.requested_by,
            status = ?result.status,
            error_kind = result.error_kind.map(|k| k.as_str()),
            latency_ms = started.elapsed().as_millis() as u64,
            "tool call finished"
        );
        result
    }

    async fn dispatch_mutating(
        &self,
        request: &OperationRequest,
        invocation: &ToolInvocation,
    ) -> OperationResult {
        if !self.gate.allows_mutations() {
            return OperationResult::fail(
                ErrorKind::UnsafeOperationBlocked,
                format!(
                    "plan is {}; mutating operations need an approved plan",
                    self.gate.state().name()
                ),
            );
        }

        let snapshot = match self.snapshot_for(invocation).await {
            Ok(snapshot) => snapshot,
            Err(result) => return result,
        };

        if let Err(deny) = self.guard.validate(invocation, &snapshot) {
            tracing::warn!(
                tool = %invocation.tool_name(),
                reason = deny.kind().as_str(),
                "guard denied operation"
            );
            return OperationResult::fail(deny.kind(), deny.message().to_string());
        }

        if let Some(task_id) = request.task_id {
            self.nudge_task(task_id, TaskStatus::InProgress, None);
        }

        let result = self.execute(invocation, &snapshot).await;

        if result.is_success() {
            self.invalidate_snapshot().await;
        }
        if let Some(task_id) = request.task_id {
            if result.is_success() {
                self.nudge_task(task_id, TaskStatus::Done, Some(result.message.clone()));
            } else {
                self.nudge_task(task_id, TaskStatus::Failed, Some(result.message.clone()));
            }
        }
        result
    }

    async fn dispatch_control(&self, invocation: &ToolInvocation) -> OperationResult {
        match invocation {
            ToolInvocation::GetServerInfo => self.get_server_info().await,
            ToolInvocation::SetPlan(p) => self.set_plan(&p.plan_title, p.tasks.clone()),
            ToolInvocation::UpdateTask(p) => {
                match self.plan.update_task(p.task_id, p.status, p.summary.clone()) {
                    Ok(()) => OperationResult::ok(
                        format!("task {} is now {}", p.task_id, p.status),
                        json!({ "task_id": p.task_id, "status": p.status }),
                    ),
                    Err(e @ PlanError::NotFound(_)) => {
                        OperationResult::fail(ErrorKind::TargetNotFound, e.to_string())
                    }
                    Err(e @ PlanError::InvalidTransition { .. }) => {
                        OperationResult::fail(ErrorKind::InvalidArguments, e.to_string())
                    }
                }
            }
            ToolInvocation::AskUser(p) => {
                let mut question = p.question.clone();
                if let Some(context) = &p.context {
                    question = format!("{question}\n{context}");
                }
                if !p.options.is_empty() {
                    question.push_str(&format!("\nOptions: {}", p.options.join(", ")));
                }
                match self.questions.ask(question, self.ask_user_timeout).await {
                    AskOutcome::Answered(answer) => OperationResult::ok(
                        "user answered",
                        json!({ "answer": answer }),
                    ),
                    AskOutcome::TimedOut => OperationResult::fail(
                        ErrorKind::AskUserTimeout,
                        "no answer arrived in time; proceed with your best judgment",
                    ),
                }
            }
            ToolInvocation::MarkComplete(p) => OperationResult::ok(
                "request marked complete",
                json!({ "summary": p.summary, "plan": self.plan.view().render() }),
            ),
            ToolInvocation::ListDesignSections => OperationResult::ok(
                "design guide sections",
                json!({ "sections": self.design.section_titles() }),
            ),
            ToolInvocation::GetDesignSection(p) => match self.design.section(&p.section) {
                Some((title, content)) => OperationResult::ok(
                    title.clone(),
                    json!({ "title": title, "content": content }),
                ),
                None => OperationResult::fail(
                    ErrorKind::TargetNotFound,
                    format!("no unique design-guide section matches '{}'", p.section),
                ),
            },
            // Mutating variants are routed through dispatch_mutating.
            other => OperationResult::fail(
                ErrorKind::UnknownTool,
                format!("{} is not a control operation", other.tool_name()),
            ),
        }
    }

    fn set_plan(&self, title: &str, tasks: Vec<String>) -> OperationResult {
        if !self.gate.allows_planning() {
            return OperationResult::fail(
                ErrorKind::UnsafeOperationBlocked,
                format!(
                    "cannot replace the plan while the gate is {}",
                    self.gate.state().name()
                ),
            );
        }
        if tasks.is_empty() {
            return OperationResult::fail(ErrorKind::InvalidArguments, "a plan needs tasks");
        }
        // An amended plan re-enters drafting before resubmission.
        let _ = self.gate.mark_revised();
        let view = self.plan.set_plan(title, tasks);
        self.guard.reset_plan_window();
        if let Err(e) = self.gate.submit_for_review() {
            return OperationResult::fail(ErrorKind::UnsafeOperationBlocked, e.to_string());
        }
        OperationResult::ok(
            format!("plan with {} task(s) submitted for review", view.tasks.len()),
            json!({ "rendered": view.render(), "task_count": view.tasks.len() }),
        )
    }

    async fn get_server_info(&self) -> OperationResult {
        let snapshot = match self.refresh_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(result) => return result,
        };
        let categories: Vec<_> = snapshot
            .categories()
            .map(|c| {
                json!({
                    "name": c.name,
                    "channels": snapshot
                        .children_of(&c.id)
                        .iter()
                        .map(|ch| json!({ "name": ch.name, "type": ch.kind.as_str() }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        let roles: Vec<_> = snapshot
            .roles
            .iter()
            .map(|r| json!({ "name": r.name, "position": r.position, "managed": r.managed }))
            .collect();
        let uncategorized: Vec<_> = snapshot
            .channels
            .iter()
            .filter(|c| c.kind != ChannelKind::Category && c.parent_id.is_none())
            .map(|c| json!({ "name": c.name, "type": c.kind.as_str() }))
            .collect();
        OperationResult::ok(
            format!("structure of '{}'", snapshot.name),
            json!({
                "server_name": snapshot.name,
                "categories": categories,
                "uncategorized_channels": uncategorized,
                "roles": roles,
                "bot_top_role_position": snapshot.bot_top_role_position(),
            }),
        )
    }

    async fn execute(
        &self,
        invocation: &ToolInvocation,
        snapshot: &GuildSnapshot,
    ) -> OperationResult {
        match invocation {
            ToolInvocation::CreateChannel(p) => {
                let parent_id = p
                    .category_name
                    .as_deref()
                    .and_then(|name| snapshot.category_named(name))
                    .map(|c| c.id.clone());
                let spec = CreateChannelSpec {
                    name: p.name.clone(),
                    kind: p.channel_type,
                    parent_id,
                    topic: p.topic.clone(),
                    overwrites: Vec::new(),
                };
                match self
                    .remote(|| self.api.create_channel(&self.guild_id, spec.clone()))
                    .await
                {
                    Ok(channel) => OperationResult::ok(
                        format!("created channel '{}'", channel.name),
                        json!({ "channel_id": channel.id, "name": channel.name }),
                    ),
                    Err(e) => remote_failure("create_channel", &e),
                }
            }
            ToolInvocation::EditChannel(p) => {
                let Some(channel) = snapshot.channel_named(&p.channel_name) else {
                    return not_found("channel", &p.channel_name);
                };
                let spec = EditChannelSpec {
                    name: p.new_name.clone(),
                    topic: p.topic.clone(),
                    slowmode_seconds: p.slowmode_seconds,
                    nsfw: p.nsfw,
                    ..EditChannelSpec::default()
                };
                match self
                    .remote(|| self.api.edit_channel(&channel.id, spec.clone()))
                    .await
                {
                    Ok(updated) => OperationResult::ok(
                        format!("updated channel '{}'", updated.name),
                        json!({ "channel_id": updated.id, "name": updated.name }),
                    ),
                    Err(e) => remote_failure("edit_channel", &e),
                }
            }
            ToolInvocation::DeleteChannel(p) => {
                let Some(channel) = snapshot.channel_named(&p.name) else {
                    return not_found("channel", &p.name);
                };
                match self.remote(|| self.api.delete_channel(&channel.id)).await {
                    Ok(()) => OperationResult::ok(
                        format!("deleted channel '{}'", p.name),
                        json!({ "channel_id": channel.id }),
                    ),
                    Err(e) => remote_failure("delete_channel", &e),
                }
            }
            ToolInvocation::MoveChannel(p) => {
                let Some(channel) = snapshot.channel_named(&p.channel_name) else {
                    return not_found("channel", &p.channel_name);
                };
                let Some(category) = snapshot.category_named(&p.category_name) else {
                    return not_found("category", &p.category_name);
                };
                let spec = EditChannelSpec {
                    parent_id: Some(Some(category.id.clone())),
                    ..EditChannelSpec::default()
                };
                if let Err(e) = self
                    .remote(|| self.api.edit_channel(&channel.id, spec.clone()))
                    .await
                {
                    return remote_failure("move_channel", &e);
                }
                if p.sync_permissions {
                    let overwrites = category.overwrites.clone();
                    if let Err(e) = self
                        .remote(|| {
                            self.api
                                .set_channel_overwrites(&channel.id, overwrites.clone())
                        })
                        .await
                    {
                        return remote_failure("move_channel (sync permissions)", &e);
                    }
                }
                OperationResult::ok(
                    format!("moved '{}' under '{}'", p.channel_name, p.category_name),
                    json!({ "channel_id": channel.id, "category_id": category.id }),
                )
            }
            ToolInvocation::CreateCategory(p) => {
                let spec = CreateChannelSpec {
                    name: p.name.clone(),
                    kind: ChannelKind::Category,
                    parent_id: None,
                    topic: None,
                    overwrites: Vec::new(),
                };
                let category = match self
                    .remote(|| self.api.create_channel(&self.guild_id, spec.clone()))
                    .await
                {
                    Ok(category) => category,
                    Err(e) => return remote_failure("create_category", &e),
                };
                let mut created = Vec::new();
                let mut errors = Vec::new();
                for child in &p.channels {
                    self.limiter.batch_pause().await;
                    let spec = CreateChannelSpec {
                        name: child.name.clone(),
                        kind: child.channel_type,
                        parent_id: Some(category.id.clone()),
                        topic: child.topic.clone(),
                        overwrites: Vec::new(),
                    };
                    match self
                        .remote(|| self.api.create_channel(&self.guild_id, spec.clone()))
                        .await
                    {
                        Ok(channel) => created.push(channel.name),
                        Err(e) => errors.push(format!("{}: {e}", child.name)),
                    }
                }
                OperationResult::ok(
                    format!(
                        "created category '{}' with {} channel(s)",
                        p.name,
                        created.len()
                    ),
                    json!({ "category_id": category.id, "channels": created, "errors": errors }),
                )
            }
            ToolInvocation::EditCategory(p) => {
                let Some(category) = snapshot.category_named(&p.name) else {
                    return not_found("category", &p.name);
                };
                let spec = EditChannelSpec {
                    name: p.new_name.clone(),
                    position: p.position,
                    ..EditChannelSpec::default()
                };
                match self
                    .remote(|| self.api.edit_channel(&category.id, spec.clone()))
                    .await
                {
                    Ok(updated) => OperationResult::ok(
                        format!("updated category '{}'", updated.name),
                        json!({ "category_id": updated.id }),
                    ),
                    Err(e) => remote_failure("edit_category", &e),
                }
            }
            ToolInvocation::DeleteCategory(p) => {
                let Some(category) = snapshot.category_named(&p.name) else {
                    return not_found("category", &p.name);
                };
                let mut deleted_children = 0usize;
                if p.delete_channels {
                    for child in snapshot.children_of(&category.id) {
                        let child_id = child.id.clone();
                        if let Err(e) = self.remote(|| self.api.delete_channel(&child_id)).await {
                            return remote_failure("delete_category (child channel)", &e);
                        }
                        deleted_children += 1;
                        self.limiter.batch_pause().await;
                    }
                }
                match self.remote(|| self.api.delete_channel(&category.id)).await {
                    Ok(()) => OperationResult::ok(
                        format!(
                            "deleted category '{}' and {deleted_children} channel(s)",
                            p.name
                        ),
                        json!({ "category_id": category.id, "deleted_channels": deleted_children }),
                    ),
                    Err(e) => remote_failure("delete_category", &e),
                }
            }
            ToolInvocation::CreateRole(p) => {
                // Checked by semantic_check.
                let (permissions, _) =
                    Permissions::from_names(p.permissions.iter().map(String::as_str));
                let color = p
                    .color
                    .as_deref()
                    .and_then(parse_color)
                    .unwrap_or_default();
                let spec = CreateRoleSpec {
                    name: p.name.clone(),
                    permissions,
                    color,
                    hoist: p.hoist,
                    mentionable: p.mentionable,
                };
                match self
                    .remote(|| self.api.create_role(&self.guild_id, spec.clone()))
                    .await
                {
                    Ok(role) => OperationResult::ok(
                        format!("created role '{}'", role.name),
                        json!({ "role_id": role.id, "name": role.name }),
                    ),
                    Err(e) => remote_failure("create_role", &e),
                }
            }
            ToolInvocation::BulkCreateRoles(p) => {
                let mut created = Vec::new();
                let mut failed = Vec::new();
                for (index, role) in p.roles.iter().enumerate() {
                    if index > 0 {
                        self.limiter.batch_pause().await;
                    }
                    let (permissions, _) =
                        Permissions::from_names(role.permissions.iter().map(String::as_str));
                    let spec = CreateRoleSpec {
                        name: role.name.clone(),
                        permissions,
                        color: role.color.as_deref().and_then(parse_color).unwrap_or_default(),
                        hoist: role.hoist,
                        mentionable: role.mentionable,
                    };
                    match self
                        .remote(|| self.api.create_role(&self.guild_id, spec.clone()))
                        .await
                    {
                        Ok(role) => created.push(role.name),
                        Err(e) => failed.push(format!("{}: {e}", role.name)),
                    }
                }
                OperationResult::ok(
                    format!("created {} role(s), {} failed", created.len(), failed.len()),
                    json!({ "created": created, "failed": failed }),
                )
            }
            ToolInvocation::EditRole(p) => {
                let Some(role) = snapshot.role_named(&p.name) else {
                    return not_found("role", &p.name);
                };
                let permissions = p.permissions.as_ref().map(|names| {
                    Permissions::from_names(names.iter().map(String::as_str)).0
                });
                let spec = EditRoleSpec {
                    name: p.new_name.clone(),
                    permissions,
                    color: p.color.as_deref().and_then(parse_color),
                    hoist: p.hoist,
                    mentionable: p.mentionable,
                };
                match self
                    .remote(|| self.api.edit_role(&self.guild_id, &role.id, spec.clone()))
                    .await
                {
                    Ok(updated) => OperationResult::ok(
                        format!("updated role '{}'", updated.name),
                        json!({ "role_id": updated.id }),
                    ),
                    Err(e) => remote_failure("edit_role", &e),
                }
            }
            ToolInvocation::DeleteRole(p) => {
                let Some(role) = snapshot.role_named(&p.name) else {
                    return not_found("role", &p.name);
                };
                match self
                    .remote(|| self.api.delete_role(&self.guild_id, &role.id))
                    .await
                {
                    Ok(()) => OperationResult::ok(
                        format!("deleted role '{}'", p.name),
                        json!({ "role_id": role.id }),
                    ),
                    Err(e) => remote_failure("delete_role", &e),
                }
            }
            ToolInvocation::AssignRole(p) => {
                self.member_role_change(snapshot, &p.role_name, &p.user_id, true)
                    .await
            }
            ToolInvocation::RemoveRole(p) => {
                self.member_role_change(snapshot, &p.role_name, &p.user_id, false)
                    .await
            }
            ToolInvocation::SetPermissions(p) => {
                let Some(channel) = snapshot.any_channel_named(&p.channel_name) else {
                    return not_found("channel", &p.channel_name);
                };
                let Some(role) = snapshot.role_named(&p.target_name) else {
                    return not_found("role", &p.target_name);
                };
                let (allow, _) = Permissions::from_names(p.allow.iter().map(String::as_str));
                let (deny, _) = Permissions::from_names(p.deny.iter().map(String::as_str));
                let overwrites = merge_overwrite(
                    &channel.overwrites,
                    PermissionOverwrite::for_role(role.id.clone())
                        .allow(allow)
                        .deny(deny),
                );
                match self
                    .remote(|| {
                        self.api
                            .set_channel_overwrites(&channel.id, overwrites.clone())
                    })
                    .await
                {
                    Ok(()) => OperationResult::ok(
                        format!(
                            "set permissions for '{}' on '{}'",
                            p.target_name, p.channel_name
                        ),
                        json!({ "channel_id": channel.id, "role_id": role.id }),
                    ),
                    Err(e) => remote_failure("set_permissions", &e),
                }
            }
            ToolInvocation::SetCategoryPermissions(p) => {
                let Some(category) = snapshot.category_named(&p.category_name) else {
                    return not_found("category", &p.category_name);
                };
                let mut overwrites = category.overwrites.clone();
                for (role_name, spec) in &p.role_permissions {
                    let Some(role) = snapshot.role_named(role_name) else {
                        return not_found("role", role_name);
                    };
                    let (allow, _) = Permissions::from_names(spec.allow.iter().map(String::as_str));
                    let (deny, _) = Permissions::from_names(spec.deny.iter().map(String::as_str));
                    overwrites = merge_overwrite(
                        &overwrites,
                        PermissionOverwrite::for_role(role.id.clone())
                            .allow(allow)
                            .deny(deny),
                    );
                }
                if let Err(e) = self
                    .remote(|| {
                        self.api
                            .set_channel_overwrites(&category.id, overwrites.clone())
                    })
                    .await
                {
                    return remote_failure("set_category_permissions", &e);
                }
                let mut synced = 0usize;
                if p.sync_to_channels {
                    for child in snapshot.children_of(&category.id) {
                        self.limiter.batch_pause().await;
                        let child_id = child.id.clone();
                        let overwrites = overwrites.clone();
                        if let Err(e) = self
                            .remote(|| self.api.set_channel_overwrites(&child_id, overwrites.clone()))
                            .await
                        {
                            return remote_failure("set_category_permissions (sync)", &e);
                        }
                        synced += 1;
                    }
                }
                OperationResult::ok(
                    format!(
                        "set permissions on '{}' and synced {synced} channel(s)",
                        p.category_name
                    ),
                    json!({ "category_id": category.id, "synced_channels": synced }),
                )
            }
            ToolInvocation::MakeChannelPrivate(p) => {
                let Some(channel) = snapshot.any_channel_named(&p.channel_name) else {
                    return not_found("channel", &p.channel_name);
                };
                let mut overwrites = channel.overwrites.clone();
                if p.deny_everyone {
                    if let Some(everyone) = snapshot.everyone_role() {
                        overwrites = merge_overwrite(
                            &overwrites,
                            PermissionOverwrite::for_role(everyone.id.clone()).deny(
                                Permissions::VIEW_CHANNEL
                                    .union(Permissions::SEND_MESSAGES)
                                    .union(Permissions::CONNECT),
                            ),
                        );
                    }
                }
                let member_access = Permissions::VIEW_CHANNEL
                    .union(Permissions::SEND_MESSAGES)
                    .union(Permissions::READ_MESSAGE_HISTORY)
                    .union(Permissions::CONNECT)
                    .union(Permissions::SPEAK);
                let mut allowed = Vec::new();
                for role_name in &p.allowed_roles {
                    let Some(role) = snapshot.role_named(role_name) else {
                        return not_found("role", role_name);
                    };
                    overwrites = merge_overwrite(
                        &overwrites,
                        PermissionOverwrite::for_role(role.id.clone()).allow(member_access),
                    );
                    allowed.push(role.name.clone());
                }
                // The bot keeps access so later edits still work.
                overwrites = merge_overwrite(
                    &overwrites,
                    PermissionOverwrite::for_member(snapshot.bot_user_id.clone()).allow(
                        Permissions::VIEW_CHANNEL
                            .union(Permissions::SEND_MESSAGES)
                            .union(Permissions::MANAGE_CHANNELS),
                    ),
                );
                match self
                    .remote(|| {
                        self.api
                            .set_channel_overwrites(&channel.id, overwrites.clone())
                    })
                    .await
                {
                    Ok(()) => OperationResult::ok(
                        format!(
                            "made '{}' private; allowed roles: {}",
                            p.channel_name,
                            allowed.join(", ")
                        ),
                        json!({ "channel_id": channel.id, "allowed_roles": allowed }),
                    ),
                    Err(e) => remote_failure("make_channel_private", &e),
                }
            }
            ToolInvocation::CloneChannelPermissions(p) => {
                let Some(source) = snapshot.any_channel_named(&p.source_channel) else {
                    return not_found("channel", &p.source_channel);
                };
                let Some(target) = snapshot.any_channel_named(&p.target_channel) else {
                    return not_found("channel", &p.target_channel);
                };
                let overwrites = source.overwrites.clone();
                let count = overwrites.len();
                match self
                    .remote(|| {
                        self.api
                            .set_channel_overwrites(&target.id, overwrites.clone())
                    })
                    .await
                {
                    Ok(()) => OperationResult::ok(
                        format!(
                            "cloned {count} overwrite(s) from '{}' to '{}'",
                            p.source_channel, p.target_channel
                        ),
                        json!({ "source_id": source.id, "target_id": target.id, "overwrites": count }),
                    ),
                    Err(e) => remote_failure("clone_channel_permissions", &e),
                }
            }
            ToolInvocation::AutoConfigurePermissions(p) => {
                // Template validity checked by semantic_check.
                let Some(template) = PermissionTemplate::parse(&p.template) else {
                    return OperationResult::fail(
                        ErrorKind::InvalidArguments,
                        format!("unknown template '{}'", p.template),
                    );
                };
                let updates = subagent::plan_template(p, template, snapshot);
                let planned = updates.len();
                let report = subagent::apply_template(&*self.api, &self.limiter, updates).await;
                OperationResult::ok(
                    format!(
                        "applied '{}' template: {} categories, {} channels, {} error(s)",
                        p.template,
                        report.categories_updated,
                        report.channels_updated,
                        report.errors.len()
                    ),
                    json!({
                        "planned": planned,
                        "categories_updated": report.categories_updated,
                        "channels_updated": report.channels_updated,
                        "errors": report.errors,
                    }),
                )
            }
            // Control variants never reach execute().
            other => OperationResult::fail(
                ErrorKind::UnknownTool,
                format!("{} is not a remote operation", other.tool_name()),
            ),
        }
    }

    async fn member_role_change(
        &self,
        snapshot: &GuildSnapshot,
        role_name: &str,
        user_id: &str,
        assigning: bool,
    ) -> OperationResult {
        let Some(role) = snapshot.role_named(role_name) else {
            return not_found("role", role_name);
        };
        let user = UserId::new(user_id);
        let outcome = if assigning {
            self.remote(|| self.api.add_member_role(&self.guild_id, &user, &role.id))
                .await
        } else {
            self.remote(|| self.api.remove_member_role(&self.guild_id, &user, &role.id))
                .await
        };
        match outcome {
            Ok(()) => OperationResult::ok(
                format!(
                    "{} role '{role_name}' for user {user_id}",
                    if assigning { "assigned" } else { "removed" }
                ),
                json!({ "role_id": role.id, "user_id": user }),
            ),
            Err(e) => remote_failure("member_role", &e),
        }
    }

    /// Run one remote call with bounded retry on transient failures. Each
    /// attempt takes its own limiter permit.
    async fn remote<T, F, Fut>(&self, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = envoy_discord::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let permit = self.limiter.acquire().await;
            let outcome = call().await;
            drop(permit);

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let mut backoff = BASE_BACKOFF * 2u32.pow(attempt - 1);
                    if let ApiError::RateLimited { retry_after_ms } = &e {
                        backoff = backoff.max(Duration::from_millis(*retry_after_ms));
                    }
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient remote failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Latest snapshot for validation. Hierarchy-sensitive operations always
    /// refetch; others reuse the cache until a mutation dirties it.
    async fn snapshot_for(
        &self,
        invocation: &ToolInvocation,
    ) -> Result<GuildSnapshot, OperationResult> {
        if !invocation.is_role_affecting() {
            if let Some(snapshot) = self.snapshot.lock().await.clone() {
                return Ok(snapshot);
            }
        }
        self.refresh_snapshot().await
    }

    async fn refresh_snapshot(&self) -> Result<GuildSnapshot, OperationResult> {
        match self
            .remote(|| self.api.fetch_snapshot(&self.guild_id))
            .await
        {
            Ok(snapshot) => {
                *self.snapshot.lock().await = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => Err(remote_failure("fetch_snapshot", &e)),
        }
    }

    async fn invalidate_snapshot(&self) {
        *self.snapshot.lock().await = None;
    }

    /// Mirror an operation outcome onto its declared task. Transition
    /// conflicts are logged, not surfaced; the engine may have already
    /// settled the task itself.
    fn nudge_task(&self, task_id: envoy_tools::TaskId, status: TaskStatus, summary: Option<String>) {
        if let Err(e) = self.plan.update_task(task_id, status, summary) {
            tracing::debug!(task = %task_id, status = %status, error = %e, "task nudge skipped");
        }
    }
}

/// Argument checks that need domain knowledge but no snapshot or network.
fn semantic_check(invocation: &ToolInvocation) -> Result<(), String> {
    match invocation {
        ToolInvocation::CreateRole(p) => {
            if let Some(color) = &p.color {
                if parse_color(color).is_none() {
                    return Err(format!("'{color}' is not a hex color"));
                }
            }
            let (_, unknown) = Permissions::from_names(p.permissions.iter().map(String::as_str));
            if !unknown.is_empty() {
                return Err(format!("unknown permission name(s): {}", unknown.join(", ")));
            }
            Ok(())
        }
        ToolInvocation::BulkCreateRoles(p) => {
            if p.roles.is_empty() {
                return Err("bulk_create_roles needs at least one role".to_string());
            }
            for role in &p.roles {
                if let Some(color) = &role.color {
                    if parse_color(color).is_none() {
                        return Err(format!("'{color}' is not a hex color"));
                    }
                }
                let (_, unknown) =
                    Permissions::from_names(role.permissions.iter().map(String::as_str));
                if !unknown.is_empty() {
                    return Err(format!("unknown permission name(s): {}", unknown.join(", ")));
                }
            }
            Ok(())
        }
        ToolInvocation::EditRole(p) => {
            if let Some(color) = &p.color {
                if parse_color(color).is_none() {
                    return Err(format!("'{color}' is not a hex color"));
                }
            }
            if let Some(names) = &p.permissions {
                let (_, unknown) = Permissions::from_names(names.iter().map(String::as_str));
                if !unknown.is_empty() {
                    return Err(format!("unknown permission name(s): {}", unknown.join(", ")));
                }
            }
            Ok(())
        }
        ToolInvocation::SetPermissions(p) => {
            let names = p.allow.iter().chain(p.deny.iter()).map(String::as_str);
            let (_, unknown) = Permissions::from_names(names);
            if !unknown.is_empty() {
                return Err(format!("unknown permission name(s): {}", unknown.join(", ")));
            }
            Ok(())
        }
        ToolInvocation::SetCategoryPermissions(p) => {
            for spec in p.role_permissions.values() {
                let names = spec.allow.iter().chain(spec.deny.iter()).map(String::as_str);
                let (_, unknown) = Permissions::from_names(names);
                if !unknown.is_empty() {
                    return Err(format!(
                        "unknown permission name(s): {}",
                        unknown.join(", ")
                    ));
                }
            }
            Ok(())
        }
        ToolInvocation::AutoConfigurePermissions(p) => {
            if PermissionTemplate::parse(&p.template).is_none() {
                return Err(format!(
                    "unknown template '{}'; expected professional, community, private, or gaming",
                    p.template
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn parse_color(value: &str) -> Option<u32> {
    let trimmed = value.trim().trim_start_matches('#');
    if trimmed.len() != 6 {
        return None;
    }
    u32::from_str_radix(trimmed, 16).ok()
}

/// Replace or append the overwrite for one target, keeping the rest.
fn merge_overwrite(
    existing: &[PermissionOverwrite],
    replacement: PermissionOverwrite,
) -> Vec<PermissionOverwrite> {
    let mut merged: Vec<PermissionOverwrite> = existing
        .iter()
        .filter(|o| o.target != replacement.target)
        .cloned()
        .collect();
    merged.push(replacement);
    merged
}

fn not_found(kind: &str, name: &str) -> OperationResult {
    OperationResult::fail(
        ErrorKind::TargetNotFound,
        format!("{kind} '{name}' disappeared between validation and execution"),
    )
}

fn remote_failure(operation: &str, error: &ApiError) -> OperationResult {
    let kind = match error {
        ApiError::NotFound(_) => ErrorKind::TargetNotFound,
        ApiError::Forbidden(_) => ErrorKind::InsufficientBotPermission,
        ApiError::RateLimited { .. } | ApiError::Transient(_) => ErrorKind::RemoteTransientError,
        ApiError::Conflict(_) | ApiError::Permanent { .. } => ErrorKind::RemotePermanentError,
    };
    OperationResult::fail(kind, format!("{operation}: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_parsing_accepts_hash_prefix() {
        assert_eq!(parse_color("#ff0000"), Some(0xff0000));
        assert_eq!(parse_color("00ff00"), Some(0x00ff00));
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color("#fff"), None);
    }

    #[test]
    fn merge_overwrite_replaces_matching_target() {
        use envoy_discord::RoleId;
        let existing = vec![
            PermissionOverwrite::for_role(RoleId::new("a")).allow(Permissions::VIEW_CHANNEL),
            PermissionOverwrite::for_role(RoleId::new("b")).deny(Permissions::SEND_MESSAGES),
        ];
        let merged = merge_overwrite(
            &existing,
            PermissionOverwrite::for_role(RoleId::new("a")).deny(Permissions::VIEW_CHANNEL),
        );
        assert_eq!(merged.len(), 2);
        let a = merged
            .iter()
            .find(|o| matches!(&o.target, envoy_discord::OverwriteTarget::Role(id) if id.as_str() == "a"))
            .unwrap();
        assert!(a.deny.contains(Permissions::VIEW_CHANNEL));
        assert!(!a.allow.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn semantic_check_catches_bad_permission_names() {
        let request = OperationRequest::new(
            "create_role",
            serde_json::json!({"name": "Helper", "permissions": ["fly"]}),
            envoy_tools::TurnId::new("t"),
        );
        let invocation = ToolInvocation::parse(&request).unwrap();
        assert!(semantic_check(&invocation).is_err());
    }

    #[test]
    fn semantic_check_validates_each_bulk_role() {
        let bad_color = OperationRequest::new(
            "bulk_create_roles",
            serde_json::json!({"roles": [{"name": "Admin"}, {"name": "Mod", "color": "blue"}]}),
            envoy_tools::TurnId::new("t"),
        );
        let invocation = ToolInvocation::parse(&bad_color).unwrap();
        assert!(semantic_check(&invocation).is_err());

        let empty = OperationRequest::new(
            "bulk_create_roles",
            serde_json::json!({"roles": []}),
            envoy_tools::TurnId::new("t"),
        );
        let invocation = ToolInvocation::parse(&empty).unwrap();
        assert!(semantic_check(&invocation).is_err());

        let good = OperationRequest::new(
            "bulk_create_roles",
            serde_json::json!({"roles": [{"name": "Admin", "color": "#FF0000", "permissions": ["kick_members"]}]}),
            envoy_tools::TurnId::new("t"),
        );
        let invocation = ToolInvocation::parse(&good).unwrap();
        assert!(semantic_check(&invocation).is_ok());
    }
}
