//! End-to-end orchestrator scenarios against a recording stub of the
//! remote API.

use async_trait::async_trait;
use chrono::Utc;
use envoy_app::config::{
    DesignConfig, DiscordConfig, EnvoyConfig, LimitsConfig, SecurityConfig, TimeoutsConfig,
};
use envoy_app::confirm::ConfirmationState;
use envoy_app::design::DesignGuide;
use envoy_app::session::{ArchitectSession, SessionManager};
use envoy_discord::{
    ApiError, ChannelId, ChannelInfo, ChannelKind, CreateChannelSpec, CreateRoleSpec, DiscordApi,
    EditChannelSpec, EditRoleSpec, GuildId, GuildSnapshot, PermissionOverwrite, Permissions,
    RoleId, RoleInfo, UserId,
};
use envoy_tools::{ErrorKind, OperationRequest, ResultStatus, TaskId, TaskStatus, TurnId};
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct RecordedCall {
    method: String,
    target: String,
    at: Instant,
}

struct StubApi {
    snapshot: Mutex<GuildSnapshot>,
    calls: Mutex<Vec<RecordedCall>>,
    next_id: AtomicU64,
}

impl StubApi {
    fn new(snapshot: GuildSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
        }
    }

    fn record(&self, method: &str, target: impl Into<String>) {
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            target: target.into(),
            at: Instant::now(),
        });
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_of(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    fn mutating_call_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method != "fetch_snapshot")
            .count()
    }

    fn fresh_id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl DiscordApi for StubApi {
    async fn fetch_snapshot(&self, guild_id: &GuildId) -> envoy_discord::Result<GuildSnapshot> {
        self.record("fetch_snapshot", guild_id.as_str());
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn create_channel(
        &self,
        _guild_id: &GuildId,
        spec: CreateChannelSpec,
    ) -> envoy_discord::Result<ChannelInfo> {
        self.record("create_channel", spec.name.clone());
        Ok(ChannelInfo {
            id: ChannelId::new(self.fresh_id()),
            name: spec.name,
            kind: spec.kind,
            parent_id: spec.parent_id,
            position: 0,
            overwrites: spec.overwrites,
        })
    }

    async fn edit_channel(
        &self,
        channel_id: &ChannelId,
        spec: EditChannelSpec,
    ) -> envoy_discord::Result<ChannelInfo> {
        self.record("edit_channel", channel_id.as_str());
        let snapshot = self.snapshot.lock().unwrap();
        let existing = snapshot
            .channel_by_id(channel_id)
            .ok_or_else(|| ApiError::NotFound("channel gone".into()))?;
        let mut updated = existing.clone();
        if let Some(name) = spec.name {
            updated.name = name;
        }
        Ok(updated)
    }

    async fn delete_channel(&self, channel_id: &ChannelId) -> envoy_discord::Result<()> {
        self.record("delete_channel", channel_id.as_str());
        Ok(())
    }

    async fn create_role(
        &self,
        _guild_id: &GuildId,
        spec: CreateRoleSpec,
    ) -> envoy_discord::Result<RoleInfo> {
        self.record("create_role", spec.name.clone());
        Ok(RoleInfo {
            id: RoleId::new(self.fresh_id()),
            name: spec.name,
            position: 1,
            permissions: spec.permissions,
            color: spec.color,
            managed: false,
        })
    }

    async fn edit_role(
        &self,
        _guild_id: &GuildId,
        role_id: &RoleId,
        _spec: EditRoleSpec,
    ) -> envoy_discord::Result<RoleInfo> {
        self.record("edit_role", role_id.as_str());
        let snapshot = self.snapshot.lock().unwrap();
        snapshot
            .role_by_id(role_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("role gone".into()))
    }

    async fn delete_role(&self, _guild_id: &GuildId, role_id: &RoleId) -> envoy_discord::Result<()> {
        self.record("delete_role", role_id.as_str());
        Ok(())
    }

    async fn set_channel_overwrites(
        &self,
        channel_id: &ChannelId,
        _overwrites: Vec<PermissionOverwrite>,
    ) -> envoy_discord::Result<()> {
        self.record("set_channel_overwrites", channel_id.as_str());
        Ok(())
    }

    async fn add_member_role(
        &self,
        _guild_id: &GuildId,
        user_id: &UserId,
        _role_id: &RoleId,
    ) -> envoy_discord::Result<()> {
        self.record("add_member_role", user_id.as_str());
        Ok(())
    }

    async fn remove_member_role(
        &self,
        _guild_id: &GuildId,
        user_id: &UserId,
        _role_id: &RoleId,
    ) -> envoy_discord::Result<()> {
        self.record("remove_member_role", user_id.as_str());
        Ok(())
    }
}

fn test_snapshot() -> GuildSnapshot {
    let bot_perms = Permissions::MANAGE_CHANNELS.union(Permissions::MANAGE_ROLES);
    let role = |id: &str, name: &str, position: i64, permissions: Permissions| RoleInfo {
        id: RoleId::new(id),
        name: name.to_string(),
        position,
        permissions,
        color: 0,
        managed: false,
    };
    GuildSnapshot {
        guild_id: GuildId::new("g1"),
        name: "Test Server".to_string(),
        roles: vec![
            role("g1", "@everyone", 0, Permissions::VIEW_CHANNEL),
            role("r-admin", "Admin", 10, Permissions::ADMINISTRATOR),
            role("r-envoy", "Envoy", 5, bot_perms),
            role("r-events", "Events", 4, Permissions::empty()),
            role("r-alpha", "Alpha", 1, Permissions::empty()),
            role("r-beta", "Beta", 2, Permissions::empty()),
            role("r-gamma", "Gamma", 3, Permissions::empty()),
        ],
        channels: vec![ChannelInfo {
            id: ChannelId::new("ch-general"),
            name: "general".to_string(),
            kind: ChannelKind::Text,
            parent_id: None,
            position: 0,
            overwrites: Vec::new(),
        }],
        bot_user_id: UserId::new("u-envoy"),
        bot_role_ids: vec![RoleId::new("r-envoy")],
        taken_at: Utc::now(),
    }
}

fn test_config(limits: LimitsConfig) -> EnvoyConfig {
    EnvoyConfig {
        discord: DiscordConfig {
            bot_token: "test-token".to_string(),
        },
        limits,
        security: SecurityConfig::default(),
        timeouts: TimeoutsConfig::default(),
        design: DesignConfig::default(),
    }
}

fn open_session(limits: LimitsConfig) -> (Arc<StubApi>, Arc<ArchitectSession>) {
    let api = Arc::new(StubApi::new(test_snapshot()));
    let manager = SessionManager::new(
        test_config(limits),
        Arc::clone(&api) as Arc<dyn DiscordApi>,
        Arc::new(DesignGuide::embedded()),
    );
    let session = manager.open(GuildId::new("g1"), "operator");
    (api, session)
}

fn fast_limits() -> LimitsConfig {
    LimitsConfig {
        max_calls_per_minute: 100,
        max_concurrency: 2,
        batch_delay_ms: 0,
    }
}

fn request(tool: &str, args: serde_json::Value) -> OperationRequest {
    OperationRequest::new(tool, args, TurnId::new("turn-1"))
}

async fn approve_plan(session: &ArchitectSession, tasks: Vec<&str>) {
    let result = session
        .dispatch_one(&request(
            "set_plan",
            json!({"plan_title": "Restructure", "tasks": tasks}),
        ))
        .await;
    assert_eq!(result.status, ResultStatus::Success);
    assert!(session.approve());
}

#[tokio::test(start_paused = true)]
async fn plan_executes_to_fully_done() {
    let (api, session) = open_session(fast_limits());
    approve_plan(
        &session,
        vec!["create announcements", "create help-desk", "create lounge"],
    )
    .await;

    for (i, name) in ["announcements", "help-desk", "lounge"].iter().enumerate() {
        let result = session
            .dispatch_one(
                &request("create_channel", json!({"name": name})).for_task(TaskId(i as u64 + 1)),
            )
            .await;
        assert_eq!(result.status, ResultStatus::Success, "{}", result.message);
    }

    let view = session.plan_view();
    assert!(view.is_settled());
    assert!(view.tasks.iter().all(|t| t.status == TaskStatus::Done));
    assert_eq!(api.calls_of("create_channel").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn hierarchy_violation_does_not_halt_siblings() {
    let (api, session) = open_session(fast_limits());
    approve_plan(&session, vec!["clean up roles"]).await;

    let batch: Vec<OperationRequest> = ["Alpha", "Beta", "Gamma", "Admin", "Events"]
        .iter()
        .map(|name| request("delete_role", json!({"name": name})))
        .collect();
    let results = session.dispatch_turn(&batch).await;

    for i in [0, 1, 2, 4] {
        assert_eq!(results[i].status, ResultStatus::Success, "{}", results[i].message);
    }
    assert_eq!(results[3].status, ResultStatus::Failure);
    assert_eq!(
        results[3].error_kind,
        Some(ErrorKind::RoleHierarchyViolation)
    );

    let deleted: Vec<String> = api
        .calls_of("delete_role")
        .into_iter()
        .map(|c| c.target)
        .collect();
    assert_eq!(deleted, vec!["r-alpha", "r-beta", "r-gamma", "r-events"]);
}

#[tokio::test(start_paused = true)]
async fn gate_blocks_mutations_outside_approved() {
    let mutate = request("create_channel", json!({"name": "blocked"}));

    // drafting
    let (api, session) = open_session(fast_limits());
    let result = session.dispatch_one(&mutate).await;
    assert_eq!(result.error_kind, Some(ErrorKind::UnsafeOperationBlocked));
    assert_eq!(api.mutating_call_count(), 0);

    // awaiting_confirmation
    let (api, session) = open_session(fast_limits());
    session
        .dispatch_one(&request("set_plan", json!({"tasks": ["one"]})))
        .await;
    assert_eq!(
        session.gate().state(),
        ConfirmationState::AwaitingConfirmation
    );
    // The plan is locked while it waits for review.
    let result = session
        .dispatch_one(&request("set_plan", json!({"tasks": ["replacement"]})))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::UnsafeOperationBlocked));
    let result = session.dispatch_one(&mutate).await;
    assert_eq!(result.error_kind, Some(ErrorKind::UnsafeOperationBlocked));
    assert_eq!(api.mutating_call_count(), 0);

    // amending
    assert!(session.amend("rename the channels"));
    let result = session.dispatch_one(&mutate).await;
    assert_eq!(result.error_kind, Some(ErrorKind::UnsafeOperationBlocked));
    assert_eq!(api.mutating_call_count(), 0);

    // rejected
    let (api, session) = open_session(fast_limits());
    session
        .dispatch_one(&request("set_plan", json!({"tasks": ["one"]})))
        .await;
    assert!(session.reject());
    let result = session.dispatch_one(&mutate).await;
    assert_eq!(result.error_kind, Some(ErrorKind::UnsafeOperationBlocked));
    assert_eq!(api.mutating_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn amended_plan_can_be_resubmitted_and_executed() {
    let (api, session) = open_session(fast_limits());
    session
        .dispatch_one(&request("set_plan", json!({"tasks": ["v1"]})))
        .await;
    assert!(session.amend("split into two tasks"));

    let result = session
        .dispatch_one(&request("set_plan", json!({"tasks": ["v2-a", "v2-b"]})))
        .await;
    assert_eq!(result.status, ResultStatus::Success);
    assert!(session.approve());

    let result = session
        .dispatch_one(&request("create_channel", json!({"name": "approved-now"})))
        .await;
    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(api.calls_of("create_channel").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn ask_user_timeout_lets_plan_continue() {
    let (_api, session) = open_session(fast_limits());
    approve_plan(&session, vec!["decide layout"]).await;

    let result = session
        .dispatch_one(&request(
            "ask_user",
            json!({"question": "Keep the memes channel?"}),
        ))
        .await;
    assert_eq!(result.status, ResultStatus::Failure);
    assert_eq!(result.error_kind, Some(ErrorKind::AskUserTimeout));

    // The session is still live and keeps executing.
    let result = session
        .dispatch_one(&request("create_channel", json!({"name": "after-timeout"})))
        .await;
    assert_eq!(result.status, ResultStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn per_minute_ceiling_is_never_exceeded() {
    let (api, session) = open_session(LimitsConfig {
        max_calls_per_minute: 3,
        max_concurrency: 2,
        batch_delay_ms: 0,
    });
    approve_plan(&session, vec!["many channels"]).await;

    for i in 0..4 {
        let result = session
            .dispatch_one(&request("create_channel", json!({"name": format!("ch-{i}")})))
            .await;
        assert_eq!(result.status, ResultStatus::Success, "{}", result.message);
    }

    let calls = api.calls();
    for call in &calls {
        let in_window = calls
            .iter()
            .filter(|c| {
                c.at >= call.at && c.at.duration_since(call.at) < std::time::Duration::from_secs(60)
            })
            .count();
        assert!(in_window <= 3, "{} calls inside one 60s window", in_window);
    }
}

#[tokio::test(start_paused = true)]
async fn update_task_on_unknown_id_changes_nothing() {
    let (_api, session) = open_session(fast_limits());
    approve_plan(&session, vec!["a", "b"]).await;
    let before = session.plan_view();

    let result = session
        .dispatch_one(&request(
            "update_task",
            json!({"task_id": 7, "status": "done"}),
        ))
        .await;
    assert_eq!(result.status, ResultStatus::Failure);
    assert_eq!(result.error_kind, Some(ErrorKind::TargetNotFound));
    assert_eq!(session.plan_view(), before);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_queued_operations() {
    let (api, session) = open_session(fast_limits());
    approve_plan(&session, vec!["one"]).await;

    session.cancel();
    let results = session
        .dispatch_turn(&[
            request("create_channel", json!({"name": "never-1"})),
            request("create_channel", json!({"name": "never-2"})),
        ])
        .await;
    assert!(results.iter().all(|r| r.status == ResultStatus::Failure));
    assert_eq!(api.mutating_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_tool_and_bad_arguments_fail_fast() {
    let (api, session) = open_session(fast_limits());
    approve_plan(&session, vec!["one"]).await;

    let result = session
        .dispatch_one(&request("summon_demon", json!({})))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::UnknownTool));

    let result = session
        .dispatch_one(&request("create_channel", json!({"nom": "typo"})))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidArguments));

    assert_eq!(api.mutating_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn bulk_create_roles_reports_per_role_outcomes() {
    let (api, session) = open_session(fast_limits());
    approve_plan(&session, vec!["seed roles"]).await;

    let result = session
        .dispatch_one(&request(
            "bulk_create_roles",
            json!({"roles": [
                {"name": "Helper", "color": "#00FF00"},
                {"name": "VIP", "permissions": ["view_channel", "send_messages"]},
            ]}),
        ))
        .await;
    assert_eq!(result.status, ResultStatus::Success, "{}", result.message);
    assert_eq!(result.payload["created"], json!(["Helper", "VIP"]));
    assert_eq!(api.calls_of("create_role").len(), 2);

    // A bad color in any spec rejects the whole batch before dispatch.
    let result = session
        .dispatch_one(&request(
            "bulk_create_roles",
            json!({"roles": [{"name": "Broken", "color": "green"}]}),
        ))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidArguments));
    assert_eq!(api.calls_of("create_role").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn privacy_and_clone_rewrite_channel_overwrites() {
    let mut snapshot = test_snapshot();
    snapshot.channels.push(ChannelInfo {
        id: ChannelId::new("ch-staff"),
        name: "staff-room".to_string(),
        kind: ChannelKind::Text,
        parent_id: None,
        position: 1,
        overwrites: vec![
            PermissionOverwrite::for_role(RoleId::new("r-admin")).allow(Permissions::VIEW_CHANNEL),
        ],
    });
    let api = Arc::new(StubApi::new(snapshot));
    let manager = SessionManager::new(
        test_config(fast_limits()),
        Arc::clone(&api) as Arc<dyn DiscordApi>,
        Arc::new(DesignGuide::embedded()),
    );
    let session = manager.open(GuildId::new("g1"), "operator");
    approve_plan(&session, vec!["lock down channels"]).await;

    let result = session
        .dispatch_one(&request(
            "make_channel_private",
            json!({"channel_name": "general", "allowed_roles": ["Events"]}),
        ))
        .await;
    assert_eq!(result.status, ResultStatus::Success, "{}", result.message);
    assert_eq!(result.payload["allowed_roles"], json!(["Events"]));

    let result = session
        .dispatch_one(&request(
            "clone_channel_permissions",
            json!({"source_channel": "staff-room", "target_channel": "general"}),
        ))
        .await;
    assert_eq!(result.status, ResultStatus::Success, "{}", result.message);
    assert_eq!(result.payload["overwrites"], 1);

    let targets: Vec<String> = api
        .calls_of("set_channel_overwrites")
        .into_iter()
        .map(|c| c.target)
        .collect();
    assert_eq!(targets, vec!["ch-general", "ch-general"]);

    // An unknown role is caught by validation, not sent to the remote.
    let result = session
        .dispatch_one(&request(
            "make_channel_private",
            json!({"channel_name": "general", "allowed_roles": ["Ghost"]}),
        ))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::TargetNotFound));
    assert_eq!(api.calls_of("set_channel_overwrites").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn auto_configure_applies_template_batch() {
    let mut snapshot = test_snapshot();
    snapshot.channels = vec![
        ChannelInfo {
            id: ChannelId::new("cat-staff"),
            name: "Staff".to_string(),
            kind: ChannelKind::Category,
            parent_id: None,
            position: 0,
            overwrites: Vec::new(),
        },
        ChannelInfo {
            id: ChannelId::new("ch-staff"),
            name: "staff-chat".to_string(),
            kind: ChannelKind::Text,
            parent_id: Some(ChannelId::new("cat-staff")),
            position: 0,
            overwrites: Vec::new(),
        },
    ];
    let api = Arc::new(StubApi::new(snapshot));
    let manager = SessionManager::new(
        test_config(fast_limits()),
        Arc::clone(&api) as Arc<dyn DiscordApi>,
        Arc::new(DesignGuide::embedded()),
    );
    let session = manager.open(GuildId::new("g1"), "operator");
    approve_plan(&session, vec!["lock down staff"]).await;

    let result = session
        .dispatch_one(&request(
            "auto_configure_permissions",
            json!({"template": "community", "staff_roles": ["Admin"], "staff_categories": ["Staff"]}),
        ))
        .await;
    assert_eq!(result.status, ResultStatus::Success, "{}", result.message);
    assert_eq!(result.payload["categories_updated"], 1);
    assert_eq!(result.payload["channels_updated"], 1);
    assert_eq!(api.calls_of("set_channel_overwrites").len(), 2);
}
