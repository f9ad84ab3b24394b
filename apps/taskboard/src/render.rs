use client_core::{TaskActions, TaskCard, TaskView};
use shared::domain::Task;

fn action_names(actions: &TaskActions) -> Vec<&'static str> {
    [
        (actions.edit, "edit"),
        (actions.complete, "complete"),
        (actions.delete, "delete"),
        (actions.report, "report"),
    ]
    .into_iter()
    .filter_map(|(enabled, name)| enabled.then_some(name))
    .collect()
}

pub fn card_line(card: &TaskCard) -> String {
    let mut line = format!(
        "[{}] {} {} ({}) #{}",
        card.status.label(),
        card.date,
        card.title,
        card.assignee,
        card.id
    );
    if card.actions.any() {
        line.push_str(&format!("  <{}>", action_names(&card.actions).join("/")));
    }
    if let Some(note) = &card.report_note {
        line.push_str(&format!("\n    回報: {note}"));
    }
    if !card.description.is_empty() {
        line.push_str(&format!("\n    {}", card.description));
    }
    line
}

pub fn view_text(view: &TaskView) -> String {
    if view.is_empty() {
        return "目前沒有任務".to_string();
    }
    let mut out = Vec::new();
    match view {
        TaskView::Leader { .. } => out.extend(view.cards().map(card_line)),
        TaskView::Member { mine, others } => {
            out.push("我的任務".to_string());
            if mine.is_empty() {
                out.push("  (none)".to_string());
            }
            out.extend(mine.iter().map(card_line));
            out.push("其他人的任務".to_string());
            if others.is_empty() {
                out.push("  (none)".to_string());
            }
            out.extend(others.iter().map(card_line));
        }
    }
    out.push(format!("共 {} 項", view.len()));
    out.join("\n")
}

pub fn history_text(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "no tasks in range".to_string();
    }
    tasks
        .iter()
        .map(|t| {
            format!(
                "{} | {} | {} | {} | {}",
                t.date_string(),
                t.title,
                t.assignee,
                t.status.label(),
                t.report_note.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
