use super::*;

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, TASK_DATE_FORMAT).expect("date")
}

fn new_task(title: &str, date: &str, assignee: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        description: format!("{title} description"),
        date: day(date),
        assignee: assignee.to_string(),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("tasks.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn created_task_starts_incomplete_without_note() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let created = storage
        .create_task(&new_task("Inspect pump", "2024-06-01", "嵐欽"))
        .await
        .expect("create");
    assert!(!created.id.as_str().is_empty());

    let fetched = storage
        .get_task(&created.id)
        .await
        .expect("get")
        .expect("task exists");
    assert_eq!(fetched.status, TaskStatus::Incomplete);
    assert_eq!(fetched.report_note, None);
    assert_eq!(fetched.assignee, "嵐欽");
    assert_eq!(fetched.date, day("2024-06-01"));
}

#[tokio::test]
async fn ids_are_unique() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let a = storage
        .create_task(&new_task("a", "2024-06-01", "嵐欽"))
        .await
        .expect("a");
    let b = storage
        .create_task(&new_task("a", "2024-06-01", "嵐欽"))
        .await
        .expect("b");
    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn update_preserves_untouched_fields() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let created = storage
        .create_task(&new_task("Check valve", "2025-01-10", "嵐欽"))
        .await
        .expect("create");

    let reported = storage
        .update_task(
            &created.id,
            &TaskPatch::report(TaskStatus::Complete, "done, no leaks"),
        )
        .await
        .expect("update")
        .expect("task exists");
    assert_eq!(reported.title, "Check valve");
    assert_eq!(reported.description, "Check valve description");
    assert_eq!(reported.status, TaskStatus::Complete);
    assert_eq!(reported.report_note.as_deref(), Some("done, no leaks"));

    let edited = storage
        .update_task(&created.id, &TaskPatch::edit("Check valve 2", "new desc"))
        .await
        .expect("update")
        .expect("task exists");
    assert_eq!(edited.title, "Check valve 2");
    assert_eq!(edited.status, TaskStatus::Complete);
    assert_eq!(edited.report_note.as_deref(), Some("done, no leaks"));
}

#[tokio::test]
async fn update_and_delete_report_missing_tasks() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let missing = TaskId::from("does-not-exist");
    let updated = storage
        .update_task(&missing, &TaskPatch::complete())
        .await
        .expect("update");
    assert!(updated.is_none());
    assert!(!storage.delete_task(&missing).await.expect("delete"));
}

#[tokio::test]
async fn delete_removes_task() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let created = storage
        .create_task(&new_task("Check valve", "2025-01-10", "嵐欽"))
        .await
        .expect("create");
    assert!(storage.delete_task(&created.id).await.expect("delete"));
    assert!(storage.get_task(&created.id).await.expect("get").is_none());
}

#[tokio::test]
async fn range_query_is_inclusive_on_both_ends() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    for (title, date) in [
        ("before", "2024-12-31"),
        ("first", "2025-01-01"),
        ("middle", "2025-01-15"),
        ("last", "2025-01-31"),
        ("after", "2025-02-01"),
    ] {
        storage
            .create_task(&new_task(title, date, "建偉"))
            .await
            .expect("create");
    }

    let january = storage
        .list_tasks(&TaskQuery::DateRange {
            start: day("2025-01-01"),
            end: day("2025-01-31"),
        })
        .await
        .expect("list");
    let titles: Vec<_> = january.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["first", "middle", "last"]);
}

#[tokio::test]
async fn same_day_tasks_list_in_creation_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let created: Vec<String> = (0..20).map(|n| format!("t{n}")).collect();
    storage
        .create_task(&new_task("next day", "2025-01-11", "嵐欽"))
        .await
        .expect("create");
    for title in &created {
        storage
            .create_task(&new_task(title, "2025-01-10", "嵐欽"))
            .await
            .expect("create");
    }

    let listed: Vec<String> = storage
        .list_tasks(&TaskQuery::All)
        .await
        .expect("list")
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(listed[..20], created[..]);
    assert_eq!(listed[20], "next day");

    let january = storage
        .list_tasks(&TaskQuery::DateRange {
            start: day("2025-01-01"),
            end: day("2025-01-10"),
        })
        .await
        .expect("range");
    let titles: Vec<String> = january.into_iter().map(|t| t.title).collect();
    assert_eq!(titles, created);
}

#[tokio::test]
async fn assignee_query_filters_by_display_name() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .create_task(&new_task("mine", "2025-01-10", "嵐欽"))
        .await
        .expect("create");
    storage
        .create_task(&new_task("theirs", "2025-01-10", "岩松"))
        .await
        .expect("create");

    let mine = storage
        .list_tasks(&TaskQuery::Assignee {
            name: "嵐欽".into(),
        })
        .await
        .expect("list");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].title, "mine");

    let all = storage.list_tasks(&TaskQuery::All).await.expect("list");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn credentials_verify_case_insensitive_email() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .set_credential("Leader@Example.com", "s3cret")
        .await
        .expect("set");

    assert!(storage
        .verify_credential("leader@example.com", "s3cret")
        .await
        .expect("verify"));
    assert!(!storage
        .verify_credential("leader@example.com", "wrong")
        .await
        .expect("verify"));
    assert!(!storage
        .verify_credential("nobody@example.com", "s3cret")
        .await
        .expect("verify"));
}

#[tokio::test]
async fn resetting_credential_replaces_old_one() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .set_credential("member@example.com", "old")
        .await
        .expect("set");
    storage
        .set_credential("member@example.com", "new")
        .await
        .expect("reset");
    assert!(!storage
        .verify_credential("member@example.com", "old")
        .await
        .expect("verify"));
    assert!(storage
        .verify_credential("member@example.com", "new")
        .await
        .expect("verify"));
}

#[test]
fn sqlite_path_ignores_memory_urls() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/tasks.db?mode=rwc"),
        Some(PathBuf::from("./data/tasks.db"))
    );
}
