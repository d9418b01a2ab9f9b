use super::error::{GatewayError, Result};
use super::traits::{ListingGateway, UserStore};
use super::types::{Cursor, ListingQuery, Page};
use super::stamp_new;
use crate::models::{LogEntry, Property, Role, User};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// In-process store. Backs the demo CLI and the tests.
///
/// Pages by offset unless built with [`MemoryGateway::with_token_cursors`],
/// in which case the token is the id of the last record returned.
#[derive(Default)]
pub struct MemoryGateway {
    properties: RwLock<Vec<Property>>,
    users: RwLock<HashMap<String, User>>,
    logs: RwLock<Vec<LogEntry>>,
    token_cursors: bool,
    next_id: AtomicU64,
    failures: Mutex<u32>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties(properties: Vec<Property>) -> Self {
        Self {
            properties: RwLock::new(properties),
            ..Self::default()
        }
    }

    /// Load a JSON array of properties, as written by `search --output`
    pub async fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read seed file")?;
        let properties: Vec<Property> =
            serde_json::from_str(&json).context("Failed to parse seed file")?;
        info!("Seeded memory store with {} properties", properties.len());
        Ok(Self::with_properties(properties))
    }

    pub fn with_token_cursors(mut self) -> Self {
        self.token_cursors = true;
        self
    }

    /// Make the next `count` page fetches fail with a 503
    pub async fn fail_next_fetches(&self, count: u32) {
        *self.failures.lock().await = count;
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.uid.clone(), user);
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.logs.read().await.clone()
    }

    async fn take_failure(&self) -> Result<()> {
        let mut failures = self.failures.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(GatewayError::Status {
                status: 503,
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn sorted(&self, query: &ListingQuery, all: &[Property]) -> Vec<Property> {
        let mut matching: Vec<Property> =
            all.iter().filter(|p| query.matches(p)).cloned().collect();
        // Only recency ordering is ever requested
        matching.sort_by(|a, b| {
            let ord = a.created_at.cmp(&b.created_at);
            if query.descending {
                ord.reverse()
            } else {
                ord
            }
        });
        matching
    }
}

#[async_trait]
impl ListingGateway for MemoryGateway {
    async fn fetch_page(&self, query: &ListingQuery, cursor: Option<&Cursor>) -> Result<Page> {
        self.take_failure().await?;

        let all = self.properties.read().await;
        let matching = self.sorted(query, &all);

        let start = match cursor {
            None => 0,
            Some(Cursor::Offset(offset)) => *offset,
            Some(Cursor::Token(last_id)) => matching
                .iter()
                .position(|p| &p.id == last_id)
                .map(|i| i + 1)
                .ok_or_else(|| GatewayError::InvalidCursor(last_id.clone()))?,
        };

        let items: Vec<Property> = matching
            .into_iter()
            .skip(start)
            .take(query.limit)
            .collect();

        let next = if items.len() < query.limit {
            None
        } else if self.token_cursors {
            items.last().map(|p| Cursor::Token(p.id.clone()))
        } else {
            Some(Cursor::Offset(start + items.len()))
        };

        Ok(Page { items, next })
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Property>> {
        let all = self.properties.read().await;
        Ok(all.iter().filter(|p| ids.contains(&p.id)).cloned().collect())
    }

    async fn list_all(&self) -> Result<Vec<Property>> {
        let all = self.properties.read().await;
        Ok(self.sorted(&ListingQuery::new(), &all))
    }

    async fn create_property(&self, property: &Property) -> Result<String> {
        let mut record = stamp_new(property, Utc::now());
        record.id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let id = record.id.clone();
        self.properties.write().await.push(record);
        Ok(id)
    }

    async fn update_property(&self, id: &str, property: &Property) -> Result<()> {
        let mut all = self.properties.write().await;
        let existing = all
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("property {}", id)))?;

        let created_at = existing.created_at;
        *existing = property.clone();
        existing.id = id.to_string();
        existing.created_at = created_at;
        existing.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_properties(&self, ids: &[String]) -> Result<()> {
        self.properties
            .write()
            .await
            .retain(|p| !ids.contains(&p.id));
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl UserStore for MemoryGateway {
    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(uid).cloned())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.insert_user(user.clone()).await;
        Ok(())
    }

    async fn update_favorites(
        &self,
        uid: &str,
        expected: &[String],
        favorites: &[String],
    ) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(uid)
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", uid)))?;
        if user.favorites != expected {
            return Err(GatewayError::Conflict {
                current: user.favorites.clone(),
            });
        }
        user.favorites = favorites.to_vec();
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn set_role(&self, uid: &str, role: Role) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(uid)
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", uid)))?;
        user.role = role;
        Ok(())
    }

    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(uid)
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", uid)))?;
        user.disabled = disabled;
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> Result<()> {
        self.users.write().await.remove(uid);
        Ok(())
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<()> {
        let mut logs = self.logs.write().await;
        let mut entry = entry.clone();
        entry.id.get_or_insert_with(|| format!("log-{}", logs.len() + 1));
        logs.push(entry);
        Ok(())
    }

    async fn list_logs(&self) -> Result<Vec<LogEntry>> {
        let mut logs = self.logs().await;
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(logs)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::{MarketingType, Property};
    use chrono::{Duration, TimeZone, Utc};

    /// `count` listings in BSD, newest first by id order `p0`, `p1`, ...
    pub fn listings(count: usize) -> Vec<Property> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| Property {
                id: format!("p{}", i),
                region: "BSD".into(),
                marketing_type: Some(MarketingType::ForSale),
                price: 400_000_000 + i as u64 * 50_000_000,
                bedrooms: (i % 4) as u32 + 1,
                bathrooms: (i % 3) as u32 + 1,
                created_at: Some(base - Duration::hours(i as i64)),
                ..Default::default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::{Field, Predicate};

    #[tokio::test]
    async fn offset_pages_walk_the_whole_set() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(30));
        let query = ListingQuery::new();

        let first = gateway.fetch_page(&query, None).await.unwrap();
        assert_eq!(first.items.len(), 12);
        assert_eq!(first.items[0].id, "p0");
        assert_eq!(first.next, Some(Cursor::Offset(12)));

        let second = gateway.fetch_page(&query, first.next.as_ref()).await.unwrap();
        assert_eq!(second.items[0].id, "p12");

        let third = gateway.fetch_page(&query, second.next.as_ref()).await.unwrap();
        assert_eq!(third.items.len(), 6);
        assert_eq!(third.next, None);
    }

    #[tokio::test]
    async fn token_pages_resume_after_last_id() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(13)).with_token_cursors();
        let query = ListingQuery::new();

        let first = gateway.fetch_page(&query, None).await.unwrap();
        assert_eq!(first.next, Some(Cursor::Token("p11".into())));

        let second = gateway.fetch_page(&query, first.next.as_ref()).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].id, "p12");
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn filters_apply_before_paging() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(20));
        let query = ListingQuery::new().with(Predicate::AtLeast(Field::Bedrooms, 4));

        let page = gateway.fetch_page(&query, None).await.unwrap();
        assert!(page.items.iter().all(|p| p.bedrooms >= 4));
        assert_eq!(page.items.len(), 5);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(1));
        gateway.fail_next_fetches(1).await;

        assert!(gateway.fetch_page(&ListingQuery::new(), None).await.is_err());
        assert!(gateway.fetch_page(&ListingQuery::new(), None).await.is_ok());
    }

    #[tokio::test]
    async fn favorites_update_is_conditional() {
        let gateway = MemoryGateway::new();
        gateway.insert_user(User::new("u1", "a@example.com")).await;

        gateway
            .update_favorites("u1", &[], &["p1".to_string()])
            .await
            .unwrap();

        let err = gateway
            .update_favorites("u1", &[], &["p2".to_string()])
            .await
            .unwrap_err();
        match err {
            GatewayError::Conflict { current } => assert_eq!(current, vec!["p1".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_times() {
        let gateway = MemoryGateway::new();
        let id = gateway
            .create_property(&Property {
                region: "BSD".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let stored = gateway.fetch_by_ids(&[id.clone()]).await.unwrap();
        assert_eq!(stored[0].id, id);
        assert!(stored[0].created_at.is_some());
        assert!(!stored[0].listing_date.is_empty());
    }
}
