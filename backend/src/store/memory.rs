// backend/src/store/memory.rs

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{AuthStore, StoreError};
use crate::clock::ClockDyn;
use crate::models::{DeviceAuthSession, User};

/// In-process store backed by concurrent maps.
///
/// Every operation touches a single map entry at a time, so each one is atomic
/// with respect to the others. The `external_id -> id` index doubles as the
/// unique constraint on provider subjects.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, DeviceAuthSession>,
    users: DashMap<String, User>,
    users_by_external: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Drops sessions whose deadline passed more than `grace` ago.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>, grace: chrono::Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at + grace >= now);
        before.saturating_sub(self.sessions.len())
    }

    /// Periodically purges stale sessions until the returned handle is aborted.
    pub fn spawn_reaper(self: Arc<Self>, clock: ClockDyn, every: Duration, grace: chrono::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired_sessions(clock.now(), grace);
                if purged > 0 {
                    info!("purged {} stale device sessions", purged);
                } else {
                    debug!("session reaper found nothing to purge");
                }
            }
        })
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn create_session(&self, session: &DeviceAuthSession) -> Result<(), StoreError> {
        match self.sessions.entry(session.device_code.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "device session {}",
                session.device_code
            ))),
            Entry::Vacant(v) => {
                v.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn get_session_by_device_code(&self, device_code: &str) -> Result<DeviceAuthSession, StoreError> {
        self.sessions
            .get(device_code)
            .map(|s| s.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update_session(&self, session: &DeviceAuthSession) -> Result<(), StoreError> {
        let mut existing = self
            .sessions
            .get_mut(&session.device_code)
            .ok_or(StoreError::NotFound)?;
        *existing = session.clone();
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<User, StoreError> {
        self.users.get(id).map(|u| u.clone()).ok_or(StoreError::NotFound)
    }

    async fn get_user_by_external_id(&self, external_id: &str) -> Result<User, StoreError> {
        let id = self
            .users_by_external
            .get(external_id)
            .map(|id| id.clone())
            .ok_or(StoreError::NotFound)?;
        self.get_user(&id).await
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        // The row goes in first so that the index never points at a missing user.
        match self.users.entry(user.id.clone()) {
            Entry::Occupied(_) => return Err(StoreError::Conflict(format!("user {}", user.id))),
            Entry::Vacant(v) => {
                v.insert(user.clone());
            }
        }

        match self.users_by_external.entry(user.external_id.clone()) {
            Entry::Occupied(_) => {
                self.users.remove(&user.id);
                Err(StoreError::Conflict("external identity already linked".into()))
            }
            Entry::Vacant(v) => {
                v.insert(user.id.clone());
                Ok(())
            }
        }
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let mut existing = self.users.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        if existing.external_id != user.external_id {
            return Err(StoreError::Conflict("external_id is immutable".into()));
        }
        *existing = user.clone();
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> Result<(), StoreError> {
        let (_, user) = self.users.remove(id).ok_or(StoreError::NotFound)?;
        self.users_by_external.remove_if(&user.external_id, |_, linked| linked == id);
        Ok(())
    }
}
