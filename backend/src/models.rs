// backend/src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memoya_common::{DeviceFlowResponse, PollStatus};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAuthStatus {
    Pending,
    Authorized,
    Expired,
}

impl DeviceAuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::Expired => "expired",
        }
    }

}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("device session cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

/// The provider handed out a device code lifetime no deadline can represent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("device code lifetime of {0}s is out of range")]
pub struct LifetimeOutOfRange(pub u64);

/// A device-flow handshake in progress.
///
/// Fields that carry the state machine are private: a session only changes
/// through [`DeviceAuthSession::authorize`] and [`DeviceAuthSession::expire`],
/// which keeps `user_id` present exactly when the session is authorized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceAuthSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    status: DeviceAuthStatus,
    user_id: Option<String>,
}

impl DeviceAuthSession {
    pub fn pending(start: &DeviceFlowResponse, now: DateTime<Utc>) -> Result<Self, LifetimeOutOfRange> {
        let expires_at = i64::try_from(start.expires_in)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(LifetimeOutOfRange(start.expires_in))?;

        Ok(Self {
            device_code: start.device_code.clone(),
            user_code: start.user_code.clone(),
            verification_uri: start.verification_uri.clone(),
            interval: start.interval,
            expires_at,
            created_at: now,
            status: DeviceAuthStatus::Pending,
            user_id: None,
        })
    }

    pub fn status(&self) -> DeviceAuthStatus {
        self.status
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Strictly past the deadline.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Seconds left before the deadline, as reported back to clients.
    pub fn expires_in(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }

    pub fn authorize(&mut self, user_id: &str) -> Result<(), InvalidTransition> {
        if self.status != DeviceAuthStatus::Pending || user_id.is_empty() {
            return Err(InvalidTransition {
                from: self.status.as_str(),
                to: DeviceAuthStatus::Authorized.as_str(),
            });
        }
        self.status = DeviceAuthStatus::Authorized;
        self.user_id = Some(user_id.to_string());
        Ok(())
    }

    pub fn expire(&mut self) -> Result<(), InvalidTransition> {
        if self.status != DeviceAuthStatus::Pending {
            return Err(InvalidTransition {
                from: self.status.as_str(),
                to: DeviceAuthStatus::Expired.as_str(),
            });
        }
        self.status = DeviceAuthStatus::Expired;
        Ok(())
    }
}

/// A local account. `id` is random; `external_id` is the provider subject and
/// is only ever used to find the account again at login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl User {
    pub fn new(external_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            external_id: external_id.to_string(),
            created_at: now,
            is_active: true,
        }
    }
}

// --- HTTP DTOs ---

#[derive(Deserialize)]
pub struct PollQuery {
    pub device_code: String,
}

#[derive(Serialize, Debug)]
pub struct PollOut {
    pub status: PollStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_down: Option<bool>,
    /// Seconds the client should wait before polling again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct RefreshOut {
    pub access_token: String,
}

#[derive(Deserialize, Default)]
pub struct AccountDeleteIn {
    #[serde(default)]
    pub confirm: Option<bool>,
}

/// Public view of a [`User`]; the provider subject never leaves the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl From<User> for UserInfo {
    fn from(u: User) -> Self {
        Self { id: u.id, created_at: u.created_at, is_active: u.is_active }
    }
}
