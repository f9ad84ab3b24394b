use super::*;
use shared::domain::Role;

#[test]
fn roster_defaults_to_builtin_team() {
    assert_eq!(load_roster(None).expect("roster"), Roster::default_team());
}

#[test]
fn roster_file_replaces_builtin_team() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(
        &path,
        r#"
bind_addr = "0.0.0.0:9000"

[[roster]]
email = "ops@example.com"
role = "leader"
name = "Ops"

[[roster]]
email = "crew@example.com"
role = "member"
name = "Crew"
"#,
    )
    .expect("write config");

    let roster = load_roster(Some(&path)).expect("roster");
    assert_eq!(
        roster.find_by_email("ops@example.com").map(|u| u.role),
        Some(Role::Leader)
    );
    assert!(roster.is_member_name("Crew"));
    assert!(!roster.is_member_name("嵐欽"));
}

#[test]
fn roster_file_without_roster_keeps_builtin_team() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("server.toml");
    fs::write(&path, "bind_addr = \"0.0.0.0:9000\"\n").expect("write config");
    assert_eq!(load_roster(Some(&path)).expect("roster"), Roster::default_team());
}

#[test]
fn unreadable_roster_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(load_roster(Some(&dir.path().join("missing.toml"))).is_err());
}
