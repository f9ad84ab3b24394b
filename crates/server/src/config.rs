use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use shared::roster::Roster;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";
pub const MAX_SESSION_TTL_SECONDS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub session_ttl_seconds: i64,
    pub roster: Roster,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/taskboard.db".into(),
            jwt_secret: DEV_JWT_SECRET.into(),
            session_ttl_seconds: 12 * 3600,
            roster: Roster::default_team(),
        }
    }
}

/// Shape of `server.toml`. Every key is optional; `[[roster]]` is read by
/// [`Roster::from_server_toml`] so the CLIs can share it.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    jwt_secret: Option<String>,
    session_ttl_seconds: Option<i64>,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string("server.toml") {
        apply_file(&mut settings, &raw).context("invalid server.toml")?;
    }
    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.jwt_secret {
        settings.jwt_secret = v;
    }
    if let Some(v) = file_cfg.session_ttl_seconds {
        settings.session_ttl_seconds = checked_ttl(v)?;
    }
    if let Some(roster) = Roster::from_server_toml(raw)? {
        settings.roster = roster;
    }
    Ok(())
}

/// Later keys win, so the `APP__` spelling overrides the short one.
fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    for key in ["SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = lookup(key) {
            settings.server_bind = v;
        }
    }
    for key in ["DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = lookup(key) {
            settings.database_url = v;
        }
    }
    if let Some(v) = lookup("APP__JWT_SECRET") {
        settings.jwt_secret = v;
    }
    if let Some(v) = lookup("APP__SESSION_TTL_SECONDS") {
        let parsed = v
            .trim()
            .parse::<i64>()
            .with_context(|| format!("APP__SESSION_TTL_SECONDS '{v}' is not a number"))?;
        settings.session_ttl_seconds = checked_ttl(parsed)?;
    }
    Ok(())
}

fn checked_ttl(seconds: i64) -> anyhow::Result<i64> {
    anyhow::ensure!(
        (1..=MAX_SESSION_TTL_SECONDS).contains(&seconds),
        "session_ttl_seconds must be between 1 and {MAX_SESSION_TTL_SECONDS}, got {seconds}"
    );
    Ok(seconds)
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite:{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
