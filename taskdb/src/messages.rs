//! Change notifications emitted after task mutations.

use serde::{Deserialize, Serialize};

use crate::types::Task;

/// The kind of mutation that produced a [`ChangeNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Lightweight event sent on the broadcast channel after every successful
/// task write, whichever front-end performed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub owner_id: Option<String>,
    pub task_id: String,
    /// The task after the change; `None` for deletions.
    pub task: Option<Task>,
}

impl ChangeNotification {
    pub fn created(task: &Task) -> Self {
        Self::with_task(ChangeKind::Created, task)
    }

    pub fn updated(task: &Task) -> Self {
        Self::with_task(ChangeKind::Updated, task)
    }

    pub fn deleted(task: &Task) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            owner_id: task.owner_id.clone(),
            task_id: task.id.clone(),
            task: None,
        }
    }

    fn with_task(kind: ChangeKind, task: &Task) -> Self {
        Self {
            kind,
            owner_id: task.owner_id.clone(),
            task_id: task.id.clone(),
            task: Some(task.clone()),
        }
    }

    /// Whether a subscriber acting for `owner` should see this event.
    pub fn is_visible_to(&self, owner: Option<&str>) -> bool {
        self.owner_id.as_deref() == owner
    }
}
