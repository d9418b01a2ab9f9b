//! Signed-in user and their favorites.
//!
//! A single listener task follows the identity provider's auth state and
//! resolves it to a user record, creating one on first sign-in. Favorites
//! are written with a conditional update keyed on the local snapshot.

use crate::gateway::{GatewayError, ListingGateway, UserStore};
use crate::models::{Property, User};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Favorites are resolved to records this many ids per request
pub const FAVORITES_BATCH: usize = 10;

/// What the identity provider says about the signed-in caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl AuthIdentity {
    /// Record for a first sign-in
    fn new_user(&self) -> User {
        let mut user = User::new(self.uid.clone(), self.email.clone());
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            user.display_name = name.to_string();
        }
        user.photo_url = self.photo_url.clone();
        user
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The stored list changed under us; local favorites now match the store
    #[error("favorites were changed elsewhere")]
    Conflict,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteOutcome {
    Updated,
    /// Already in (or already out of) the list; nothing written
    Unchanged,
    NoSession,
    /// A toggle for the same property is still running
    Busy,
}

pub struct SessionStore {
    users: Arc<dyn UserStore>,
    current: RwLock<Option<User>>,
    in_flight: Mutex<HashSet<String>>,
    writes: tokio::sync::Mutex<()>,
}

/// Marks a property id busy until dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut ids = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.remove(&self.id);
    }
}

impl SessionStore {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            current: RwLock::new(None),
            in_flight: Mutex::new(HashSet::new()),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    /// Follow auth state changes until the sender is dropped. The current
    /// value of `identities` is handled first.
    pub fn listen(
        self: Arc<Self>,
        mut identities: watch::Receiver<Option<AuthIdentity>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let identity = identities.borrow_and_update().clone();
                if let Err(e) = self.handle_auth_change(identity).await {
                    error!("Error resolving session: {}", e);
                }
                if identities.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Resolve an auth state to a user record, creating it if missing
    pub async fn handle_auth_change(
        &self,
        identity: Option<AuthIdentity>,
    ) -> Result<(), SessionError> {
        let Some(identity) = identity else {
            if self.current.write().await.take().is_some() {
                info!("Signed out");
            }
            return Ok(());
        };

        // A different account never sees the previous user's record
        {
            let mut current = self.current.write().await;
            if current.as_ref().is_some_and(|u| u.uid != identity.uid) {
                if let Some(previous) = current.take() {
                    info!("Signed out {}", previous.email);
                }
            }
        }

        let user = match self.users.get_user(&identity.uid).await? {
            Some(user) => user,
            None => {
                let user = identity.new_user();
                self.users.create_user(&user).await?;
                info!("Created user record for {}", user.email);
                user
            }
        };

        info!("Signed in as {} ({})", user.email, user.role);
        *self.current.write().await = Some(user);
        Ok(())
    }

    pub async fn user(&self) -> Option<User> {
        self.current.read().await.clone()
    }

    pub async fn favorites(&self) -> Vec<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|u| u.favorites.clone())
            .unwrap_or_default()
    }

    pub async fn is_favorite(&self, property_id: &str) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|u| u.has_favorite(property_id))
    }

    /// Role admin or super
    pub async fn is_admin(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|u| u.role.is_admin())
    }

    pub async fn add_to_favorites(&self, property_id: &str) -> Result<FavoriteOutcome, SessionError> {
        self.toggle(property_id, true).await
    }

    pub async fn remove_from_favorites(
        &self,
        property_id: &str,
    ) -> Result<FavoriteOutcome, SessionError> {
        self.toggle(property_id, false).await
    }

    async fn toggle(&self, property_id: &str, add: bool) -> Result<FavoriteOutcome, SessionError> {
        let Some(_busy) = InFlight::acquire(&self.in_flight, property_id) else {
            return Ok(FavoriteOutcome::Busy);
        };
        // One write at a time per session
        let _write = self.writes.lock().await;

        let (uid, expected) = match self.current.read().await.as_ref() {
            Some(user) => (user.uid.clone(), user.favorites.clone()),
            None => return Ok(FavoriteOutcome::NoSession),
        };

        let mut next = expected.clone();
        if add {
            if !next.iter().any(|id| id == property_id) {
                next.push(property_id.to_string());
            }
        } else {
            next.retain(|id| id != property_id);
        }
        if next == expected {
            return Ok(FavoriteOutcome::Unchanged);
        }

        match self.users.update_favorites(&uid, &expected, &next).await {
            Ok(()) => {
                self.set_local_favorites(&uid, next).await;
                Ok(FavoriteOutcome::Updated)
            }
            Err(GatewayError::Conflict { current }) => {
                warn!("Favorites for {} changed elsewhere, refreshing", uid);
                self.set_local_favorites(&uid, current).await;
                Err(SessionError::Conflict)
            }
            Err(e) => {
                error!("Error updating favorites: {}", e);
                Err(e.into())
            }
        }
    }

    async fn set_local_favorites(&self, uid: &str, favorites: Vec<String>) {
        // The session may have switched users while the write was out
        if let Some(user) = self.current.write().await.as_mut().filter(|u| u.uid == uid) {
            user.favorites = favorites;
        }
    }

    /// Favorites as property records, in favorites order. Ids that no
    /// longer resolve are skipped.
    pub async fn favorite_properties(
        &self,
        gateway: &dyn ListingGateway,
    ) -> Result<Vec<Property>, SessionError> {
        let favorites = self.favorites().await;

        let mut found = HashMap::new();
        for batch in favorites.chunks(FAVORITES_BATCH) {
            for property in gateway.fetch_by_ids(batch).await? {
                found.insert(property.id.clone(), property);
            }
        }

        Ok(favorites.iter().filter_map(|id| found.remove(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::fixtures;
    use crate::gateway::MemoryGateway;
    use crate::models::Role;
    use std::time::Duration;

    fn identity(uid: &str, email: &str) -> AuthIdentity {
        AuthIdentity {
            uid: uid.into(),
            email: email.into(),
            display_name: None,
            photo_url: None,
        }
    }

    /// Users whose record writes are refused
    struct RefusingWrites(MemoryGateway);

    #[async_trait::async_trait]
    impl UserStore for RefusingWrites {
        async fn get_user(&self, uid: &str) -> crate::gateway::Result<Option<User>> {
            self.0.get_user(uid).await
        }
        async fn create_user(&self, _user: &User) -> crate::gateway::Result<()> {
            Err(GatewayError::Status {
                status: 403,
                body: "permission denied".into(),
            })
        }
        async fn update_favorites(
            &self,
            uid: &str,
            expected: &[String],
            favorites: &[String],
        ) -> crate::gateway::Result<()> {
            self.0.update_favorites(uid, expected, favorites).await
        }
        async fn list_users(&self) -> crate::gateway::Result<Vec<User>> {
            self.0.list_users().await
        }
        async fn set_role(&self, uid: &str, role: Role) -> crate::gateway::Result<()> {
            self.0.set_role(uid, role).await
        }
        async fn set_disabled(&self, uid: &str, disabled: bool) -> crate::gateway::Result<()> {
            self.0.set_disabled(uid, disabled).await
        }
        async fn delete_user(&self, uid: &str) -> crate::gateway::Result<()> {
            self.0.delete_user(uid).await
        }
        async fn append_log(&self, entry: &crate::models::LogEntry) -> crate::gateway::Result<()> {
            self.0.append_log(entry).await
        }
        async fn list_logs(&self) -> crate::gateway::Result<Vec<crate::models::LogEntry>> {
            self.0.list_logs().await
        }
    }

    async fn signed_in(gateway: Arc<MemoryGateway>) -> SessionStore {
        let session = SessionStore::new(gateway);
        session
            .handle_auth_change(Some(identity("u1", "budi@example.com")))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn first_sign_in_creates_record() {
        let gateway = Arc::new(MemoryGateway::new());
        let session = signed_in(gateway.clone()).await;

        let stored = gateway.get_user("u1").await.unwrap().unwrap();
        assert_eq!(stored.display_name, "budi");
        assert_eq!(stored.role, Role::User);
        assert!(stored.favorites.is_empty());
        assert_eq!(session.user().await, Some(stored));
    }

    #[tokio::test]
    async fn existing_record_is_reused() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut admin = User::new("u1", "budi@example.com");
        admin.role = Role::Super;
        admin.favorites = vec!["p3".into()];
        gateway.insert_user(admin).await;

        let session = signed_in(gateway).await;
        assert!(session.is_admin().await);
        assert_eq!(session.favorites().await, vec!["p3".to_string()]);

        session.handle_auth_change(None).await.unwrap();
        assert!(session.user().await.is_none());
        assert!(!session.is_admin().await);
    }

    #[tokio::test]
    async fn failed_switch_leaves_nobody_signed_in() {
        let store = MemoryGateway::new();
        store.insert_user(User::new("u1", "budi@example.com")).await;
        let session = SessionStore::new(Arc::new(RefusingWrites(store)));

        session
            .handle_auth_change(Some(identity("u1", "budi@example.com")))
            .await
            .unwrap();
        assert_eq!(session.user().await.unwrap().uid, "u1");

        let err = session
            .handle_auth_change(Some(identity("u2", "rina@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Gateway(GatewayError::Status { status: 403, .. })));
        assert!(session.user().await.is_none());
        assert_eq!(
            session.add_to_favorites("p1").await.unwrap(),
            FavoriteOutcome::NoSession
        );

        // same account again keeps its record through a refresh
        session
            .handle_auth_change(Some(identity("u1", "budi@example.com")))
            .await
            .unwrap();
        session
            .handle_auth_change(Some(identity("u1", "budi@example.com")))
            .await
            .unwrap();
        assert_eq!(session.user().await.unwrap().uid, "u1");
    }

    #[tokio::test]
    async fn add_then_remove_restores_list() {
        let gateway = Arc::new(MemoryGateway::new());
        let session = signed_in(gateway.clone()).await;

        assert_eq!(session.add_to_favorites("p1").await.unwrap(), FavoriteOutcome::Updated);
        assert_eq!(session.add_to_favorites("p1").await.unwrap(), FavoriteOutcome::Unchanged);
        assert_eq!(session.favorites().await, vec!["p1".to_string()]);

        assert_eq!(
            session.remove_from_favorites("p1").await.unwrap(),
            FavoriteOutcome::Updated
        );
        assert!(session.favorites().await.is_empty());
        assert!(gateway.get_user("u1").await.unwrap().unwrap().favorites.is_empty());
    }

    #[tokio::test]
    async fn no_session_is_a_no_op() {
        let session = SessionStore::new(Arc::new(MemoryGateway::new()));
        assert_eq!(
            session.add_to_favorites("p1").await.unwrap(),
            FavoriteOutcome::NoSession
        );
    }

    #[tokio::test]
    async fn conflict_reconciles_local_state() {
        let gateway = Arc::new(MemoryGateway::new());
        let session = signed_in(gateway.clone()).await;

        // Another device adds a favorite
        gateway
            .update_favorites("u1", &[], &["p9".to_string()])
            .await
            .unwrap();

        let err = session.add_to_favorites("p1").await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict));
        assert_eq!(session.favorites().await, vec!["p9".to_string()]);

        assert_eq!(session.add_to_favorites("p1").await.unwrap(), FavoriteOutcome::Updated);
        assert_eq!(
            gateway.get_user("u1").await.unwrap().unwrap().favorites,
            vec!["p9".to_string(), "p1".to_string()]
        );
    }

    #[tokio::test]
    async fn toggle_in_flight_is_busy() {
        let session = signed_in(Arc::new(MemoryGateway::new())).await;

        let held = InFlight::acquire(&session.in_flight, "p1");
        assert!(held.is_some());
        assert_eq!(session.add_to_favorites("p1").await.unwrap(), FavoriteOutcome::Busy);
        assert_eq!(session.add_to_favorites("p2").await.unwrap(), FavoriteOutcome::Updated);

        drop(held);
        assert_eq!(session.add_to_favorites("p1").await.unwrap(), FavoriteOutcome::Updated);
    }

    #[tokio::test]
    async fn favorites_resolve_in_order_skipping_dangling() {
        let gateway = Arc::new(MemoryGateway::with_properties(fixtures::listings(25)));
        let mut user = User::new("u1", "budi@example.com");
        user.favorites = (0..25).rev().map(|i| format!("p{}", i)).collect();
        user.favorites.insert(3, "gone".into());
        gateway.insert_user(user).await;

        let session = signed_in(gateway.clone()).await;
        let properties = session.favorite_properties(gateway.as_ref()).await.unwrap();

        assert_eq!(properties.len(), 25);
        assert_eq!(properties[0].id, "p24");
        assert_eq!(properties[24].id, "p0");
    }

    #[tokio::test]
    async fn listener_follows_auth_state() {
        let gateway = Arc::new(MemoryGateway::new());
        let session = Arc::new(SessionStore::new(gateway));
        let (tx, rx) = watch::channel(None);
        let task = session.clone().listen(rx);

        tx.send(Some(identity("u7", "sari@example.com"))).unwrap();
        let mut signed_in = false;
        for _ in 0..50 {
            if session.user().await.is_some() {
                signed_in = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(signed_in);

        drop(tx);
        task.await.unwrap();
    }
}
