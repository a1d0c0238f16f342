//! Persistence seams.
//!
//! Handlers only see the traits; the in-memory implementations back the
//! binary and the tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::token::{Role, Subject};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{field} already exists")]
    Duplicate { field: &'static str },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
    pub password_salt: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn subject(&self) -> Subject {
        Subject { id: self.id.clone(), email: self.email.clone(), role: self.role }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
    pub password_salt: String,
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub id: String,
    pub owner_id: String,
    pub category: String,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;
    /// One page (1-based) of users in creation order plus the total count.
    async fn list(&self, page: u32, limit: u32) -> Result<(Vec<UserRecord>, u64), StoreError>;
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn save(&self, upload: UploadRecord) -> Result<UploadRecord, StoreError>;
    async fn list_for(&self, owner_id: &str) -> Result<Vec<UploadRecord>, StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryUserStore {
    users: Arc<RwLock<Vec<UserRecord>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write().await;
        let email = user.email.to_lowercase();
        if users.iter().any(|u| u.email == email) {
            return Err(StoreError::Duplicate { field: "email" });
        }
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            email,
            name: user.name,
            role: user.role,
            password_hash: user.password_hash,
            password_salt: user.password_salt,
            created_at: Utc::now(),
        };
        users.push(record.clone());
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = email.to_lowercase();
        Ok(self.users.read().await.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn list(&self, page: u32, limit: u32) -> Result<(Vec<UserRecord>, u64), StoreError> {
        let users = self.users.read().await;
        let offset = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
        let items = users.iter().skip(offset).take(limit as usize).cloned().collect();
        Ok((items, users.len() as u64))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryUploadStore {
    uploads: Arc<RwLock<Vec<UploadRecord>>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn save(&self, upload: UploadRecord) -> Result<UploadRecord, StoreError> {
        self.uploads.write().await.push(upload.clone());
        Ok(upload)
    }

    async fn list_for(&self, owner_id: &str) -> Result<Vec<UploadRecord>, StoreError> {
        Ok(self.uploads.read().await.iter().filter(|u| u.owner_id == owner_id).cloned().collect())
    }
}
