use super::error::Result;
use super::types::{Cursor, ListingQuery, Page};
use crate::models::{LogEntry, Property, Role, User};
use async_trait::async_trait;

/// Read and write access to the `properties` collection.
/// One implementation per hosted store; callers never see which.
#[async_trait]
pub trait ListingGateway: Send + Sync {
    /// Fetch one page. `cursor` is `None` for the first page.
    async fn fetch_page(&self, query: &ListingQuery, cursor: Option<&Cursor>) -> Result<Page>;

    /// Records for the given ids; ids the store does not know are skipped
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Property>>;

    /// Every record, newest first (back-office table)
    async fn list_all(&self) -> Result<Vec<Property>>;

    /// Store a validated record, returning the id the store assigned
    async fn create_property(&self, property: &Property) -> Result<String>;

    async fn update_property(&self, id: &str, property: &Property) -> Result<()>;

    /// Media referenced by the records is left alone
    async fn delete_properties(&self, ids: &[String]) -> Result<()>;

    /// Get the name of the backend
    fn backend_name(&self) -> &'static str;
}

/// Access to the `users` and `logs` collections
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, uid: &str) -> Result<Option<User>>;

    /// Insert or fully replace the record keyed by `user.uid`
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Replace the favorites list, but only if the stored list still equals
    /// `expected`. Fails with `GatewayError::Conflict` otherwise.
    async fn update_favorites(&self, uid: &str, expected: &[String], favorites: &[String])
        -> Result<()>;

    async fn list_users(&self) -> Result<Vec<User>>;

    async fn set_role(&self, uid: &str, role: Role) -> Result<()>;

    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<()>;

    async fn delete_user(&self, uid: &str) -> Result<()>;

    async fn append_log(&self, entry: &LogEntry) -> Result<()>;

    /// Newest first
    async fn list_logs(&self) -> Result<Vec<LogEntry>>;
}
