//! Plan tracker.
//!
//! Owns the ordered task list for a session. Mutation happens only through
//! `set_plan` and `update_task`; every change pushes a fresh [`PlanView`] to
//! watch subscribers so the human-facing surface re-renders without polling.

use envoy_tools::{TaskId, TaskStatus};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no task with id {0}")]
    NotFound(TaskId),

    #[error("task {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub summary: Option<String>,
}

/// Read-only copy of the plan handed to renderers and subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanView {
    pub title: String,
    pub tasks: Vec<Task>,
}

impl PlanView {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn done_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .count()
    }

    pub fn is_settled(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Markdown rendering pushed to the operator surface.
    pub fn render(&self) -> String {
        if self.tasks.is_empty() {
            return String::new();
        }
        let done = self.done_count();
        let total = self.tasks.len();
        let filled = (done * 10) / total;
        let bar: String = "█".repeat(filled) + &"░".repeat(10 - filled);

        let mut out = format!("**{}**\n`{bar}` {done}/{total}\n", self.title);
        for task in &self.tasks {
            let glyph = match task.status {
                TaskStatus::Pending => "⬜",
                TaskStatus::InProgress => "⏳",
                TaskStatus::Done => "✅",
                TaskStatus::Failed => "❌",
                TaskStatus::Skipped => "⏭️",
            };
            out.push_str(&format!("{glyph} {}. {}", task.id, task.description));
            if let Some(summary) = &task.summary {
                out.push_str(&format!(" — {summary}"));
            }
            out.push('\n');
        }
        out
    }
}

pub struct PlanTracker {
    state: Mutex<PlanView>,
    tx: watch::Sender<PlanView>,
}

impl PlanTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PlanView::default());
        Self {
            state: Mutex::new(PlanView::default()),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlanView> {
        self.tx.subscribe()
    }

    pub fn view(&self) -> PlanView {
        self.locked().clone()
    }

    /// Replace the whole plan. Task ids restart at 1 and stay stable for the
    /// plan's lifetime.
    pub fn set_plan(&self, title: impl Into<String>, descriptions: Vec<String>) -> PlanView {
        let view = PlanView {
            title: title.into(),
            tasks: descriptions
                .into_iter()
                .enumerate()
                .map(|(i, description)| Task {
                    id: TaskId(i as u64 + 1),
                    description,
                    status: TaskStatus::Pending,
                    summary: None,
                })
                .collect(),
        };
        *self.locked() = view.clone();
        self.push(&view);
        view
    }

    pub fn update_task(
        &self,
        id: TaskId,
        status: TaskStatus,
        summary: Option<String>,
    ) -> Result<(), PlanError> {
        let mut state = self.locked();
        let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) else {
            return Err(PlanError::NotFound(id));
        };
        if !task.status.can_transition_to(status) {
            return Err(PlanError::InvalidTransition {
                id,
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        if summary.is_some() {
            task.summary = summary;
        }
        let view = state.clone();
        drop(state);
        self.push(&view);
        Ok(())
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.locked().tasks.iter().find(|t| t.id == id).map(|t| t.status)
    }

    fn push(&self, view: &PlanView) {
        // Subscribers may all be gone; the send result is irrelevant.
        let _ = self.tx.send(view.clone());
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, PlanView> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for PlanTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_tasks() -> PlanTracker {
        let tracker = PlanTracker::new();
        tracker.set_plan(
            "Restructure",
            vec!["first".into(), "second".into(), "third".into()],
        );
        tracker
    }

    #[test]
    fn set_plan_assigns_one_based_ids() {
        let view = three_tasks().view();
        let ids: Vec<u64> = view.tasks.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(view.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn unknown_id_leaves_plan_unchanged() {
        let tracker = three_tasks();
        let before = tracker.view();
        let err = tracker
            .update_task(TaskId(9), TaskStatus::Done, None)
            .expect_err("must be NotFound");
        assert_eq!(err, PlanError::NotFound(TaskId(9)));
        assert_eq!(tracker.view(), before);
    }

    #[test]
    fn reversing_a_terminal_status_fails() {
        let tracker = three_tasks();
        tracker
            .update_task(TaskId(1), TaskStatus::Done, None)
            .expect("done");
        let err = tracker
            .update_task(TaskId(1), TaskStatus::InProgress, None)
            .expect_err("must reject reversal");
        assert!(matches!(err, PlanError::InvalidTransition { .. }));
        assert_eq!(tracker.task_status(TaskId(1)), Some(TaskStatus::Done));
    }

    #[test]
    fn mutations_push_to_subscribers() {
        let tracker = PlanTracker::new();
        let mut rx = tracker.subscribe();
        tracker.set_plan("Restructure", vec!["only".into()]);
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();
        tracker
            .update_task(TaskId(1), TaskStatus::InProgress, None)
            .unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().tasks[0].status, TaskStatus::InProgress);
    }

    #[test]
    fn render_shows_progress_bar_and_glyphs() {
        let tracker = three_tasks();
        tracker
            .update_task(TaskId(1), TaskStatus::Done, Some("created #general".into()))
            .unwrap();
        tracker
            .update_task(TaskId(2), TaskStatus::Failed, None)
            .unwrap();
        let text = tracker.view().render();
        assert!(text.contains("███░░░░░░░"));
        assert!(text.contains("1/3"));
        assert!(text.contains("✅ 1. first — created #general"));
        assert!(text.contains("❌ 2. second"));
        assert!(text.contains("⬜ 3. third"));
    }

    #[test]
    fn settled_requires_all_terminal() {
        let tracker = three_tasks();
        assert!(!tracker.view().is_settled());
        for id in 1..=2 {
            tracker
                .update_task(TaskId(id), TaskStatus::Done, None)
                .unwrap();
        }
        tracker
            .update_task(TaskId(3), TaskStatus::Skipped, None)
            .unwrap();
        assert!(tracker.view().is_settled());
    }
}
