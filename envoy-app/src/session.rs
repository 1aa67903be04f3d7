//! Session lifecycle.
//!
//! One [`ArchitectSession`] lives per (guild, requester) pair: its own plan,
//! gate, and question desk, all wired to a dispatcher that shares the
//! process-wide rate limiter. Turns are serialized inside a session so one
//! turn's operations never interleave with another's.

use crate::config::EnvoyConfig;
use crate::confirm::{ConfirmationGate, Decision};
use crate::design::DesignGuide;
use crate::dispatcher::ToolDispatcher;
use crate::guard::PermissionGuard;
use crate::limiter::RateLimiter;
use crate::plan::{PlanTracker, PlanView};
use crate::subagent::QuestionDesk;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use envoy_discord::{DiscordApi, GuildId};
use envoy_tools::{ErrorKind, OperationRequest, OperationResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct ArchitectSession {
    pub id: Uuid,
    pub guild_id: GuildId,
    pub requester: String,
    pub created_at: DateTime<Utc>,
    dispatcher: ToolDispatcher,
    gate: Arc<ConfirmationGate>,
    plan: Arc<PlanTracker>,
    questions: Arc<QuestionDesk>,
    cancel: CancellationToken,
    confirmation_timeout: Duration,
    auto_approve: bool,
    turn_lock: tokio::sync::Mutex<()>,
}

impl ArchitectSession {
    fn new(
        config: &EnvoyConfig,
        api: Arc<dyn DiscordApi>,
        limiter: Arc<RateLimiter>,
        design: Arc<DesignGuide>,
        guild_id: GuildId,
        requester: String,
    ) -> Self {
        let gate = Arc::new(ConfirmationGate::new());
        let plan = Arc::new(PlanTracker::new());
        let questions = Arc::new(QuestionDesk::new());
        let auto_approve = !config.security.confirmation_required;
        if auto_approve {
            tracing::warn!("confirmation_required is off; plans auto-approve");
        }
        let dispatcher = ToolDispatcher::new(
            api,
            limiter,
            PermissionGuard::new(config.security.clone()),
            Arc::clone(&plan),
            Arc::clone(&gate),
            Arc::clone(&questions),
            design,
            guild_id.clone(),
            Duration::from_secs(config.timeouts.ask_user_secs),
        );
        Self {
            id: Uuid::new_v4(),
            guild_id,
            requester,
            created_at: Utc::now(),
            dispatcher,
            gate,
            plan,
            questions,
            cancel: CancellationToken::new(),
            confirmation_timeout: Duration::from_secs(config.timeouts.confirmation_secs),
            auto_approve,
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Dispatch one turn's operations in order. Cancellation is observed
    /// between operations: in-flight calls finish, queued ones are refused.
    pub async fn dispatch_turn(&self, requests: &[OperationRequest]) -> Vec<OperationResult> {
        let _turn = self.turn_lock.lock().await;
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            if self.cancel.is_cancelled() {
                results.push(OperationResult::fail(
                    ErrorKind::UnsafeOperationBlocked,
                    "session was cancelled; no further operations will run",
                ));
                continue;
            }
            results.push(self.dispatcher.dispatch(request).await);
        }
        results
    }

    pub async fn dispatch_one(&self, request: &OperationRequest) -> OperationResult {
        self.dispatch_turn(std::slice::from_ref(request))
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| {
                OperationResult::fail(ErrorKind::UnknownTool, "empty dispatch batch")
            })
    }

    /// Park until the human decides on the submitted plan or the review
    /// window lapses. With review disabled in config the gate opens
    /// immediately.
    pub async fn wait_for_decision(&self) -> Decision {
        if self.auto_approve {
            let _ = self.gate.approve();
        }
        self.gate.wait_decision(self.confirmation_timeout).await
    }

    pub fn approve(&self) -> bool {
        self.gate.approve().is_ok()
    }

    pub fn reject(&self) -> bool {
        self.gate.reject().is_ok()
    }

    pub fn amend(&self, feedback: impl Into<String>) -> bool {
        self.gate.amend(feedback).is_ok()
    }

    /// Answer the pending `ask_user` question, if one is waiting.
    pub fn answer_question(&self, text: impl Into<String>) -> bool {
        self.questions.answer(text)
    }

    pub fn pending_question(&self) -> Option<String> {
        self.questions.pending_question()
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    pub fn plan_view(&self) -> PlanView {
        self.plan.view()
    }

    pub fn subscribe_plan(&self) -> watch::Receiver<PlanView> {
        self.plan.subscribe()
    }

    pub fn cancel(&self) {
        tracing::info!(session = %self.id, "session cancelled");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Live sessions keyed by (guild, requester). A new request for the same
/// key replaces and cancels the old session.
pub struct SessionManager {
    config: EnvoyConfig,
    api: Arc<dyn DiscordApi>,
    limiter: Arc<RateLimiter>,
    design: Arc<DesignGuide>,
    sessions: DashMap<(String, String), Arc<ArchitectSession>>,
}

impl SessionManager {
    pub fn new(config: EnvoyConfig, api: Arc<dyn DiscordApi>, design: Arc<DesignGuide>) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.limits));
        Self {
            config,
            api,
            limiter,
            design,
            sessions: DashMap::new(),
        }
    }

    pub fn open(&self, guild_id: GuildId, requester: impl Into<String>) -> Arc<ArchitectSession> {
        let requester = requester.into();
        let session = Arc::new(ArchitectSession::new(
            &self.config,
            Arc::clone(&self.api),
            Arc::clone(&self.limiter),
            Arc::clone(&self.design),
            guild_id.clone(),
            requester.clone(),
        ));
        let key = (guild_id.into_inner(), requester);
        if let Some(old) = self.sessions.insert(key, Arc::clone(&session)) {
            old.cancel();
        }
        tracing::info!(session = %session.id, guild = %session.guild_id, "session opened");
        session
    }

    pub fn get(&self, guild_id: &GuildId, requester: &str) -> Option<Arc<ArchitectSession>> {
        self.sessions
            .get(&(guild_id.as_str().to_string(), requester.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn close(&self, guild_id: &GuildId, requester: &str) {
        if let Some((_, session)) = self
            .sessions
            .remove(&(guild_id.as_str().to_string(), requester.to_string()))
        {
            session.cancel();
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
