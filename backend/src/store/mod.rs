// backend/src/store/mod.rs

pub mod memory;

use std::sync::Arc;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{DeviceAuthSession, User};

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistence capability used by the authentication core.
///
/// Implementations must make `create_user` fail with [`StoreError::Conflict`]
/// when a user with the same `external_id` already exists; the device flow
/// relies on that to resolve concurrent logins to a single account.
#[async_trait]
pub trait AuthStore: Send + Sync + std::fmt::Debug {
    async fn create_session(&self, session: &DeviceAuthSession) -> Result<(), StoreError>;
    async fn get_session_by_device_code(&self, device_code: &str) -> Result<DeviceAuthSession, StoreError>;
    async fn update_session(&self, session: &DeviceAuthSession) -> Result<(), StoreError>;

    async fn get_user(&self, id: &str) -> Result<User, StoreError>;
    async fn get_user_by_external_id(&self, external_id: &str) -> Result<User, StoreError>;
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;
    async fn delete_user(&self, id: &str) -> Result<(), StoreError>;
}

pub type AuthStoreDyn = Arc<dyn AuthStore>;
