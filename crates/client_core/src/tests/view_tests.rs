use super::*;
use shared::domain::TaskStatus;

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

fn task(id: &str, date: &str, assignee: &str, note: Option<&str>) -> Task {
    Task {
        id: TaskId::from(id),
        title: format!("task {id}"),
        description: String::new(),
        date: day(date),
        assignee: assignee.to_string(),
        status: TaskStatus::Incomplete,
        report_note: note.map(str::to_string),
    }
}

fn leader() -> User {
    User::new("leader@example.com", Role::Leader, "老蔣")
}

fn member() -> User {
    User::new("member@example.com", Role::Member, "嵐欽")
}

fn sample() -> Vec<Task> {
    vec![
        task("a", "2025-01-10", "嵐欽", Some("checked")),
        task("b", "2025-01-10", "建偉", Some("private")),
        task("c", "2025-01-11", "嵐欽", None),
        task("d", "2025-01-09", "岩松", Some("")),
    ]
}

#[test]
fn today_filter_matches_calendar_day_only() {
    let tasks = sample();
    let kept: Vec<_> = filter_by_mode(&tasks, ViewMode::Today, day("2025-01-10"))
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(kept, vec!["a", "b"]);

    let all = filter_by_mode(&tasks, ViewMode::All, day("2025-01-10")).count();
    assert_eq!(all, tasks.len());
}

#[test]
fn leader_sees_everything_with_notes_and_actions() {
    let view = derive_view(&sample(), ViewMode::All, &leader(), day("2025-01-10"));
    let TaskView::Leader { tasks } = &view else {
        panic!("expected leader view");
    };
    assert_eq!(tasks.len(), 4);
    assert_eq!(tasks[1].report_note.as_deref(), Some("private"));
    assert_eq!(tasks[3].report_note, None, "empty notes are hidden");
    assert!(tasks.iter().all(|c| c.actions.edit && c.actions.complete && c.actions.delete));
    assert!(tasks.iter().all(|c| !c.actions.report));
}

#[test]
fn member_partition_covers_filtered_set_without_overlap() {
    let tasks = sample();
    for mode in [ViewMode::Today, ViewMode::All] {
        let today = day("2025-01-10");
        let view = derive_view(&tasks, mode, &member(), today);
        let TaskView::Member { mine, others } = &view else {
            panic!("expected member view");
        };

        let expected: Vec<_> = filter_by_mode(&tasks, mode, today).map(|t| &t.id).collect();
        assert_eq!(mine.len() + others.len(), expected.len());
        assert!(mine.iter().all(|c| c.assignee == "嵐欽"));
        assert!(others.iter().all(|c| c.assignee != "嵐欽"));
        for id in expected {
            let in_mine = mine.iter().any(|c| &c.id == id);
            let in_others = others.iter().any(|c| &c.id == id);
            assert!(in_mine ^ in_others, "{id} must land in exactly one group");
        }
    }
}

#[test]
fn member_never_sees_others_notes_or_actions() {
    let view = derive_view(&sample(), ViewMode::All, &member(), day("2025-01-10"));
    let TaskView::Member { mine, others } = view else {
        panic!("expected member view");
    };
    assert!(others.iter().all(|c| c.report_note.is_none() && !c.actions.any()));
    let report_only = TaskActions {
        report: true,
        ..TaskActions::default()
    };
    assert!(mine.iter().all(|c| c.actions == report_only));
    assert_eq!(mine[0].report_note.as_deref(), Some("checked"));
}

#[test]
fn cards_iterates_both_groups() {
    let view = derive_view(&sample(), ViewMode::Today, &member(), day("2025-01-10"));
    let ids: Vec<_> = view.cards().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(view.len(), 2);
    assert!(!view.is_empty());

    let empty = derive_view(&[], ViewMode::Today, &leader(), day("2025-01-10"));
    assert!(empty.is_empty());
}
