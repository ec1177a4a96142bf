//! Bearer token seam.
//!
//! Token acquisition (OAuth client-credentials and friends) lives outside
//! this crate. The request client only asks a [`TokenProvider`] for the
//! current token before each request and never mutates it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct BearerToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token (set CALLPEAK__API__TOKEN or pass --token)")]
    MissingToken,

    #[error("Bearer token expired at {0}")]
    Expired(DateTime<Utc>),
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<BearerToken, AuthError>;
}

/// Fixed token supplied through config, env or CLI.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: BearerToken,
}

impl StaticTokenProvider {
    pub fn new(value: impl Into<String>) -> Result<Self, AuthError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(AuthError::MissingToken);
        }
        Ok(Self {
            token: BearerToken {
                value,
                expires_at: None,
            },
        })
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.token.expires_at = Some(expires_at);
        self
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<BearerToken, AuthError> {
        if let Some(exp) = self.token.expires_at {
            if self.token.is_expired(Utc::now()) {
                return Err(AuthError::Expired(exp));
            }
        }
        Ok(self.token.clone())
    }
}
