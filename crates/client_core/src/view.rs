//! Derived board views.
//!
//! A view is a pure function of the task mirror, the view mode, the signed-in
//! user and the local calendar day. Nothing here touches a collaborator.

use chrono::NaiveDate;
use shared::domain::{Role, Task, TaskId, TaskStatus, User, ViewMode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskActions {
    pub edit: bool,
    pub complete: bool,
    pub delete: bool,
    pub report: bool,
}

impl TaskActions {
    fn leader() -> Self {
        Self {
            edit: true,
            complete: true,
            delete: true,
            report: false,
        }
    }

    fn assignee() -> Self {
        Self {
            report: true,
            ..Self::default()
        }
    }

    pub fn any(&self) -> bool {
        self.edit || self.complete || self.delete || self.report
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCard {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub assignee: String,
    pub status: TaskStatus,
    pub report_note: Option<String>,
    pub actions: TaskActions,
}

impl TaskCard {
    fn with_note(task: &Task, actions: TaskActions) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            date: task.date,
            assignee: task.assignee.clone(),
            status: task.status,
            report_note: task.report_note.clone().filter(|n| !n.is_empty()),
            actions,
        }
    }

    /// Someone else's task as a member sees it: no note, no actions.
    fn redacted(task: &Task) -> Self {
        Self {
            report_note: None,
            actions: TaskActions::default(),
            ..Self::with_note(task, TaskActions::default())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskView {
    Leader {
        tasks: Vec<TaskCard>,
    },
    Member {
        mine: Vec<TaskCard>,
        others: Vec<TaskCard>,
    },
}

impl TaskView {
    pub fn len(&self) -> usize {
        match self {
            TaskView::Leader { tasks } => tasks.len(),
            TaskView::Member { mine, others } => mine.len() + others.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cards(&self) -> impl Iterator<Item = &TaskCard> {
        let (first, second) = match self {
            TaskView::Leader { tasks } => (tasks.as_slice(), &[][..]),
            TaskView::Member { mine, others } => (mine.as_slice(), others.as_slice()),
        };
        first.iter().chain(second.iter())
    }
}

pub fn filter_by_mode<'a>(
    tasks: &'a [Task],
    mode: ViewMode,
    today: NaiveDate,
) -> impl Iterator<Item = &'a Task> + 'a {
    tasks
        .iter()
        .filter(move |t| mode == ViewMode::All || t.date == today)
}

pub fn derive_view(tasks: &[Task], mode: ViewMode, session: &User, today: NaiveDate) -> TaskView {
    let filtered = filter_by_mode(tasks, mode, today);
    match session.role {
        Role::Leader => TaskView::Leader {
            tasks: filtered
                .map(|t| TaskCard::with_note(t, TaskActions::leader()))
                .collect(),
        },
        Role::Member => {
            let (mine, others): (Vec<&Task>, Vec<&Task>) =
                filtered.partition(|t| t.assignee == session.name);
            TaskView::Member {
                mine: mine
                    .into_iter()
                    .map(|t| TaskCard::with_note(t, TaskActions::assignee()))
                    .collect(),
                others: others.into_iter().map(TaskCard::redacted).collect(),
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
