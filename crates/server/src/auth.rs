use anyhow::{anyhow, Context};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::{Role, User};

/// Issues and checks the bearer tokens handed out by `POST /login`.
#[derive(Debug, Clone)]
pub struct SessionAuthority {
    pub secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub name: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl SessionAuthority {
    pub fn mint(&self, user: &User) -> anyhow::Result<String> {
        anyhow::ensure!(
            self.ttl_seconds > 0,
            "session ttl must be positive, got {}",
            self.ttl_seconds
        );
        let now = Utc::now();
        let exp = Duration::try_seconds(self.ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| anyhow!("session ttl {}s overflows the clock", self.ttl_seconds))?;
        let claims = SessionClaims {
            sub: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("failed to sign session token")
    }

    /// Signature and expiry are checked; roster membership is the caller's job.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        let data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
