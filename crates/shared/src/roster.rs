use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Role, User};

#[derive(Debug, Error)]
pub enum RosterFileError {
    #[error("invalid roster file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("roster must not be empty")]
    Empty,
}

/// The `[[roster]]` tables of `server.toml`; every other key is ignored.
#[derive(Debug, Default, Deserialize)]
struct RosterSection {
    roster: Option<Vec<User>>,
}

/// The fixed team list. Identities are resolved against it after authentication;
/// it is never edited at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    users: Vec<User>,
}

impl Roster {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }

    /// One leader and three members.
    pub fn default_team() -> Self {
        Self::new(vec![
            User::new("leader@example.com", Role::Leader, "老蔣"),
            User::new("member@example.com", Role::Member, "嵐欽"),
            User::new("member2@example.com", Role::Member, "建偉"),
            User::new("member3@example.com", Role::Member, "岩松"),
        ])
    }

    /// Roster override from a `server.toml` body, `None` when the file has no roster.
    pub fn from_server_toml(raw: &str) -> Result<Option<Self>, RosterFileError> {
        let section: RosterSection = toml::from_str(raw)?;
        match section.roster {
            None => Ok(None),
            Some(users) if users.is_empty() => Err(RosterFileError::Empty),
            Some(users) => Ok(Some(Self::new(users))),
        }
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn find_by_email(&self, email: &str) -> Option<&User> {
        let email = email.trim();
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }

    pub fn members(&self) -> impl Iterator<Item = &User> {
        self.users.iter().filter(|u| u.role == Role::Member)
    }

    pub fn is_member_name(&self, name: &str) -> bool {
        self.members().any(|u| u.name == name)
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::default_team()
    }
}

#[cfg(test)]
#[path = "tests/roster_tests.rs"]
mod tests;
