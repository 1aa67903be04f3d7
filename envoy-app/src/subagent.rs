//! Bounded sub-agent primitives.
//!
//! Two operations short-circuit the reasoning round-trip: a deterministic
//! permission-template batch computed entirely from the current snapshot,
//! and the `ask_user` suspension point that parks the dispatch loop until a
//! human answers or the wait lapses.

use crate::limiter::RateLimiter;
use envoy_discord::{
    ChannelId, ChannelKind, DiscordApi, GuildSnapshot, PermissionOverwrite, Permissions, RoleId,
};
use envoy_tools::AutoConfigurePermissionsParams;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionTemplate {
    Professional,
    Community,
    Private,
    Gaming,
}

impl PermissionTemplate {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "professional" => Some(Self::Professional),
            "community" => Some(Self::Community),
            "private" => Some(Self::Private),
            "gaming" => Some(Self::Gaming),
            _ => None,
        }
    }

    /// Whether ordinary channels are visible without a membership role.
    fn open_by_default(self) -> bool {
        matches!(self, Self::Community | Self::Gaming)
    }
}

/// One computed overwrite replacement, ready for the remote API.
#[derive(Debug, Clone)]
pub struct PlannedUpdate {
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub is_category: bool,
    pub overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Default)]
pub struct TemplateReport {
    pub categories_updated: usize,
    pub channels_updated: usize,
    pub errors: Vec<String>,
}

/// Compute the full batch of overwrite replacements for a template.
///
/// Pure function of the snapshot and arguments; the caller has already
/// verified every named role exists.
pub fn plan_template(
    params: &AutoConfigurePermissionsParams,
    template: PermissionTemplate,
    snapshot: &GuildSnapshot,
) -> Vec<PlannedUpdate> {
    let everyone = snapshot.everyone_role().map(|r| r.id.clone());
    let staff: Vec<RoleId> = params
        .staff_roles
        .iter()
        .filter_map(|name| snapshot.role_named(name))
        .map(|r| r.id.clone())
        .collect();
    let member = params
        .member_role
        .as_deref()
        .and_then(|name| snapshot.role_named(name))
        .map(|r| r.id.clone());

    let in_list = |list: &[String], name: &str| list.iter().any(|n| n.eq_ignore_ascii_case(name));

    let mut updates = Vec::new();
    for category in snapshot.categories() {
        let overwrites = if in_list(&params.staff_categories, &category.name) {
            staff_only(everyone.as_ref(), &staff)
        } else if in_list(&params.info_categories, &category.name) {
            read_only(everyone.as_ref(), &staff, member.as_ref(), template)
        } else {
            baseline(everyone.as_ref(), &staff, member.as_ref(), template)
        };
        updates.push(PlannedUpdate {
            channel_id: category.id.clone(),
            channel_name: category.name.clone(),
            is_category: true,
            overwrites: overwrites.clone(),
        });
        // Children inherit by replacement so drifted channels converge.
        for child in snapshot.children_of(&category.id) {
            let child_overwrites = if in_list(&params.announcement_channels, &child.name) {
                read_only(everyone.as_ref(), &staff, member.as_ref(), template)
            } else {
                overwrites.clone()
            };
            updates.push(PlannedUpdate {
                channel_id: child.id.clone(),
                channel_name: child.name.clone(),
                is_category: false,
                overwrites: child_overwrites,
            });
        }
    }
    // Announcement channels outside any category still get locked down.
    for channel in snapshot
        .channels
        .iter()
        .filter(|c| c.kind != ChannelKind::Category && c.parent_id.is_none())
    {
        if in_list(&params.announcement_channels, &channel.name) {
            updates.push(PlannedUpdate {
                channel_id: channel.id.clone(),
                channel_name: channel.name.clone(),
                is_category: false,
                overwrites: read_only(everyone.as_ref(), &staff, member.as_ref(), template),
            });
        }
    }
    updates
}

fn staff_only(everyone: Option<&RoleId>, staff: &[RoleId]) -> Vec<PermissionOverwrite> {
    let mut overwrites = Vec::new();
    if let Some(everyone) = everyone {
        overwrites
            .push(PermissionOverwrite::for_role(everyone.clone()).deny(Permissions::VIEW_CHANNEL));
    }
    for role in staff {
        overwrites.push(
            PermissionOverwrite::for_role(role.clone())
                .allow(Permissions::VIEW_CHANNEL.union(Permissions::SEND_MESSAGES)),
        );
    }
    overwrites
}

fn read_only(
    everyone: Option<&RoleId>,
    staff: &[RoleId],
    member: Option<&RoleId>,
    template: PermissionTemplate,
) -> Vec<PermissionOverwrite> {
    let mut overwrites = Vec::new();
    if let Some(everyone) = everyone {
        let mut ow = PermissionOverwrite::for_role(everyone.clone()).deny(Permissions::SEND_MESSAGES);
        if !template.open_by_default() && member.is_some() {
            ow = ow.deny(Permissions::VIEW_CHANNEL);
        }
        overwrites.push(ow);
    }
    if let Some(member) = member {
        overwrites.push(
            PermissionOverwrite::for_role(member.clone())
                .allow(Permissions::VIEW_CHANNEL)
                .deny(Permissions::SEND_MESSAGES),
        );
    }
    for role in staff {
        overwrites.push(
            PermissionOverwrite::for_role(role.clone())
                .allow(Permissions::VIEW_CHANNEL.union(Permissions::SEND_MESSAGES)),
        );
    }
    overwrites
}

fn baseline(
    everyone: Option<&RoleId>,
    staff: &[RoleId],
    member: Option<&RoleId>,
    template: PermissionTemplate,
) -> Vec<PermissionOverwrite> {
    let gated = match template {
        PermissionTemplate::Private => true,
        PermissionTemplate::Professional => member.is_some(),
        PermissionTemplate::Community | PermissionTemplate::Gaming => false,
    };
    if !gated {
        // Open servers keep the `@everyone` defaults; no overwrites needed.
        let mut overwrites = Vec::new();
        for role in staff {
            overwrites.push(
                PermissionOverwrite::for_role(role.clone())
                    .allow(Permissions::VIEW_CHANNEL.union(Permissions::SEND_MESSAGES)),
            );
        }
        return overwrites;
    }
    let mut overwrites = Vec::new();
    if let Some(everyone) = everyone {
        overwrites
            .push(PermissionOverwrite::for_role(everyone.clone()).deny(Permissions::VIEW_CHANNEL));
    }
    if let Some(member) = member {
        overwrites.push(
            PermissionOverwrite::for_role(member.clone())
                .allow(Permissions::VIEW_CHANNEL.union(Permissions::SEND_MESSAGES)),
        );
    }
    for role in staff {
        overwrites.push(
            PermissionOverwrite::for_role(role.clone())
                .allow(Permissions::VIEW_CHANNEL.union(Permissions::SEND_MESSAGES)),
        );
    }
    overwrites
}

/// Apply a planned batch through the shared limiter. Individual failures
/// are collected; the batch keeps going.
pub async fn apply_template(
    api: &dyn DiscordApi,
    limiter: &RateLimiter,
    updates: Vec<PlannedUpdate>,
) -> TemplateReport {
    let mut report = TemplateReport::default();
    let mut first = true;
    for update in updates {
        if !first {
            limiter.batch_pause().await;
        }
        first = false;

        let permit = limiter.acquire().await;
        let outcome = api
            .set_channel_overwrites(&update.channel_id, update.overwrites)
            .await;
        drop(permit);

        match outcome {
            Ok(()) => {
                if update.is_category {
                    report.categories_updated += 1;
                } else {
                    report.channels_updated += 1;
                }
            }
            Err(e) => {
                tracing::warn!(
                    channel = %update.channel_name,
                    error = %e,
                    "template overwrite failed"
                );
                report.errors.push(format!("{}: {e}", update.channel_name));
            }
        }
    }
    report
}

/// Pending `ask_user` questions, at most one at a time per session.
pub struct QuestionDesk {
    pending: Mutex<Option<PendingQuestion>>,
}

struct PendingQuestion {
    question: String,
    tx: oneshot::Sender<String>,
}

/// Outcome of an `ask_user` suspension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    Answered(String),
    TimedOut,
}

impl QuestionDesk {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// The question currently waiting on a human, if any.
    pub fn pending_question(&self) -> Option<String> {
        self.locked().as_ref().map(|p| p.question.clone())
    }

    /// Deliver an answer to the pending question. Returns false when
    /// nothing was waiting (late or duplicate answers are dropped).
    pub fn answer(&self, text: impl Into<String>) -> bool {
        let Some(pending) = self.locked().take() else {
            return false;
        };
        pending.tx.send(text.into()).is_ok()
    }

    /// Park until an answer arrives or the wait lapses. A lapsed question
    /// is withdrawn so a late answer cannot leak into the next one.
    pub async fn ask(&self, question: impl Into<String>, timeout: Duration) -> AskOutcome {
        let question = question.into();
        let (tx, rx) = oneshot::channel();
        *self.locked() = Some(PendingQuestion {
            question: question.clone(),
            tx,
        });
        tracing::info!(question = %question, "waiting on human input");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => AskOutcome::Answered(answer),
            // Sender dropped: the desk was cleared underneath us.
            Ok(Err(_)) => AskOutcome::TimedOut,
            Err(_) => {
                self.locked().take();
                AskOutcome::TimedOut
            }
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Option<PendingQuestion>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for QuestionDesk {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use envoy_discord::{ChannelInfo, GuildId, GuildSnapshot, OverwriteTarget, RoleInfo, UserId};
    use std::sync::Arc;

    fn snapshot() -> GuildSnapshot {
        let role = |id: &str, name: &str, position: i64| RoleInfo {
            id: RoleId::new(id),
            name: name.to_string(),
            position,
            permissions: Permissions::empty(),
            color: 0,
            managed: false,
        };
        let channel = |id: &str, name: &str, kind: ChannelKind, parent: Option<&str>| ChannelInfo {
            id: ChannelId::new(id),
            name: name.to_string(),
            kind,
            parent_id: parent.map(ChannelId::new),
            position: 0,
            overwrites: Vec::new(),
        };
        GuildSnapshot {
            guild_id: GuildId::new("g1"),
            name: "Test".to_string(),
            roles: vec![
                role("g1", "@everyone", 0),
                role("r-staff", "Moderator", 5),
                role("r-member", "Member", 1),
            ],
            channels: vec![
                channel("cat-info", "Information", ChannelKind::Category, None),
                channel("ch-rules", "rules", ChannelKind::Text, Some("cat-info")),
                channel("cat-staff", "Staff", ChannelKind::Category, None),
                channel("ch-staff", "staff-chat", ChannelKind::Text, Some("cat-staff")),
                channel("cat-main", "Community", ChannelKind::Category, None),
                channel("ch-general", "general", ChannelKind::Text, Some("cat-main")),
                channel("ch-news", "announcements", ChannelKind::Text, Some("cat-main")),
            ],
            bot_user_id: UserId::new("u-bot"),
            bot_role_ids: vec![],
            taken_at: Utc::now(),
        }
    }

    fn params() -> AutoConfigurePermissionsParams {
        serde_json::from_value(serde_json::json!({
            "template": "community",
            "staff_roles": ["Moderator"],
            "member_role": "Member",
            "info_categories": ["Information"],
            "staff_categories": ["Staff"],
            "announcement_channels": ["announcements"],
        }))
        .expect("params")
    }

    fn overwrite_for<'a>(
        update: &'a PlannedUpdate,
        role: &str,
    ) -> Option<&'a PermissionOverwrite> {
        update.overwrites.iter().find(|o| match &o.target {
            OverwriteTarget::Role(id) => id.as_str() == role,
            OverwriteTarget::Member(_) => false,
        })
    }

    #[test]
    fn staff_category_hidden_from_everyone() {
        let updates = plan_template(&params(), PermissionTemplate::Community, &snapshot());
        let staff_cat = updates
            .iter()
            .find(|u| u.channel_name == "Staff")
            .expect("staff category planned");
        let everyone = overwrite_for(staff_cat, "g1").expect("everyone overwrite");
        assert!(everyone.deny.contains(Permissions::VIEW_CHANNEL));
        let staff = overwrite_for(staff_cat, "r-staff").expect("staff overwrite");
        assert!(staff.allow.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn announcement_channel_is_read_only() {
        let updates = plan_template(&params(), PermissionTemplate::Community, &snapshot());
        let news = updates
            .iter()
            .find(|u| u.channel_name == "announcements")
            .expect("announcement planned");
        let everyone = overwrite_for(news, "g1").expect("everyone overwrite");
        assert!(everyone.deny.contains(Permissions::SEND_MESSAGES));
        assert!(!everyone.deny.contains(Permissions::VIEW_CHANNEL));
        let staff = overwrite_for(news, "r-staff").expect("staff overwrite");
        assert!(staff.allow.contains(Permissions::SEND_MESSAGES));
    }

    #[test]
    fn private_template_gates_everything() {
        let mut p = params();
        p.template = "private".to_string();
        let updates = plan_template(&p, PermissionTemplate::Private, &snapshot());
        let general = updates
            .iter()
            .find(|u| u.channel_name == "general")
            .expect("general planned");
        let everyone = overwrite_for(general, "g1").expect("everyone overwrite");
        assert!(everyone.deny.contains(Permissions::VIEW_CHANNEL));
        let member = overwrite_for(general, "r-member").expect("member overwrite");
        assert!(member.allow.contains(Permissions::VIEW_CHANNEL));
    }

    #[test]
    fn children_follow_their_category() {
        let updates = plan_template(&params(), PermissionTemplate::Community, &snapshot());
        let info = updates
            .iter()
            .find(|u| u.channel_name == "Information")
            .expect("info category");
        let rules = updates
            .iter()
            .find(|u| u.channel_name == "rules")
            .expect("rules channel");
        assert_eq!(info.overwrites, rules.overwrites);
    }

    #[tokio::test(start_paused = true)]
    async fn ask_times_out_without_answer() {
        let desk = QuestionDesk::new();
        let outcome = desk
            .ask("Which channel should be the default?", Duration::from_secs(300))
            .await;
        assert_eq!(outcome, AskOutcome::TimedOut);
        assert!(desk.pending_question().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ask_receives_answer() {
        let desk = Arc::new(QuestionDesk::new());
        let waiter = {
            let desk = Arc::clone(&desk);
            tokio::spawn(
                async move { desk.ask("Keep the memes channel?", Duration::from_secs(300)).await },
            )
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            desk.pending_question().as_deref(),
            Some("Keep the memes channel?")
        );
        assert!(desk.answer("yes"));
        assert_eq!(waiter.await.unwrap(), AskOutcome::Answered("yes".into()));
        assert!(!desk.answer("again"));
    }
}
