use crate::gateway::{Cursor, GatewayError, ListingGateway, ListingQuery, Page};
use crate::models::Property;
use tracing::{debug, error, info};

const INITIAL_LOAD_FAILED: &str = "Failed to load properties";
const MORE_LOAD_FAILED: &str = "Failed to load more properties";

/// One fetch the loader wants performed
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub seq: u64,
    pub query: ListingQuery,
    pub cursor: Option<Cursor>,
}

impl PageRequest {
    pub fn is_first_page(&self) -> bool {
        self.cursor.is_none()
    }
}

/// What happened to a response handed to [`ListingLoader::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Loaded { count: usize },
    Failed,
    /// A newer request was issued since; the response was dropped
    Stale,
    /// Nothing was fetched
    Skipped,
}

/// Accumulates listing pages for the current criteria.
///
/// Callers that run fetches themselves use `restart` / `next_request` /
/// `apply`; `load` and `load_more` do the round trip against a gateway.
#[derive(Debug, Default)]
pub struct ListingLoader {
    items: Vec<Property>,
    query: Option<ListingQuery>,
    cursor: Option<Cursor>,
    has_more: bool,
    first_page_loaded: bool,
    loading: bool,
    loading_more: bool,
    error: Option<String>,
    seq: u64,
}

impl ListingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Property] {
        &self.items
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_loading_more(&self) -> bool {
        self.loading_more
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Sequence number of the latest issued request
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// New criteria: drop everything loaded so far and ask for page one
    pub fn restart(&mut self, query: ListingQuery) -> PageRequest {
        self.seq += 1;
        self.items.clear();
        self.cursor = None;
        self.has_more = true;
        self.first_page_loaded = false;
        self.loading = true;
        self.loading_more = false;
        self.error = None;
        self.query = Some(query.clone());

        PageRequest {
            seq: self.seq,
            query,
            cursor: None,
        }
    }

    /// The next page to fetch, or `None` when exhausted, busy, or before
    /// the first page arrived
    pub fn next_request(&mut self) -> Option<PageRequest> {
        if self.loading || self.loading_more || !self.has_more || !self.first_page_loaded {
            return None;
        }
        let query = self.query.clone()?;

        self.seq += 1;
        self.loading_more = true;
        self.error = None;

        Some(PageRequest {
            seq: self.seq,
            query,
            cursor: self.cursor.clone(),
        })
    }

    pub fn apply(&mut self, request: PageRequest, result: Result<Page, GatewayError>) -> Applied {
        if request.seq != self.seq {
            debug!(
                "Discarding stale page response (seq {} < {})",
                request.seq, self.seq
            );
            return Applied::Stale;
        }

        self.loading = false;
        self.loading_more = false;

        match result {
            Ok(page) => {
                let count = page.items.len();
                self.has_more = page.next.is_some();
                self.cursor = page.next;
                self.first_page_loaded = true;
                if request.is_first_page() {
                    self.items = page.items;
                } else {
                    self.items.extend(page.items);
                }
                Applied::Loaded { count }
            }
            Err(e) => {
                let message = if request.is_first_page() {
                    INITIAL_LOAD_FAILED
                } else {
                    MORE_LOAD_FAILED
                };
                error!("{}: {}", message, e);
                self.error = Some(message.to_string());
                Applied::Failed
            }
        }
    }

    /// Fetch page one for `query`
    pub async fn load(&mut self, gateway: &dyn ListingGateway, query: ListingQuery) -> Applied {
        let request = self.restart(query);
        let result = gateway
            .fetch_page(&request.query, request.cursor.as_ref())
            .await;
        let applied = self.apply(request, result);
        if let Applied::Loaded { count } = applied {
            info!("Loaded {} properties from {}", count, gateway.backend_name());
        }
        applied
    }

    /// Fetch the page after the last one loaded
    pub async fn load_more(&mut self, gateway: &dyn ListingGateway) -> Applied {
        let Some(request) = self.next_request() else {
            return Applied::Skipped;
        };
        let result = gateway
            .fetch_page(&request.query, request.cursor.as_ref())
            .await;
        self.apply(request, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::fixtures;
    use crate::gateway::{Field, MemoryGateway, Predicate, PAGE_SIZE};

    #[tokio::test]
    async fn pages_accumulate_until_short_page() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(30));
        let mut loader = ListingLoader::new();

        assert_eq!(
            loader.load(&gateway, ListingQuery::new()).await,
            Applied::Loaded { count: PAGE_SIZE }
        );
        assert!(loader.has_more());

        loader.load_more(&gateway).await;
        assert_eq!(loader.items().len(), 24);

        assert_eq!(loader.load_more(&gateway).await, Applied::Loaded { count: 6 });
        assert_eq!(loader.items().len(), 30);
        assert!(!loader.has_more());

        assert_eq!(loader.load_more(&gateway).await, Applied::Skipped);
        assert_eq!(loader.items().len(), 30);
    }

    #[tokio::test]
    async fn short_first_page_is_exhausted() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(5));
        let mut loader = ListingLoader::new();

        loader.load(&gateway, ListingQuery::new()).await;
        assert_eq!(loader.items().len(), 5);
        assert!(!loader.has_more());
        assert!(loader.next_request().is_none());
    }

    #[test]
    fn stale_responses_are_discarded() {
        let mut loader = ListingLoader::new();
        let old = loader.restart(ListingQuery::new());
        let new = loader.restart(
            ListingQuery::new().with(Predicate::Equals(Field::Region, "BSD".into())),
        );

        let stale_page = Page {
            items: fixtures::listings(3),
            next: None,
        };
        assert_eq!(loader.apply(old, Ok(stale_page)), Applied::Stale);
        assert!(loader.items().is_empty());
        assert!(loader.is_loading());

        let fresh = Page {
            items: fixtures::listings(1),
            next: None,
        };
        assert_eq!(loader.apply(new, Ok(fresh)), Applied::Loaded { count: 1 });
        assert!(!loader.is_loading());
    }

    #[test]
    fn only_one_incremental_fetch_in_flight() {
        let mut loader = ListingLoader::new();
        let first = loader.restart(ListingQuery::new());
        assert!(loader.next_request().is_none());

        loader.apply(
            first,
            Ok(Page {
                items: fixtures::listings(12),
                next: Some(Cursor::Offset(12)),
            }),
        );

        let more = loader.next_request().unwrap();
        assert_eq!(more.cursor, Some(Cursor::Offset(12)));
        assert!(loader.is_loading_more());
        assert!(loader.next_request().is_none());
    }

    #[tokio::test]
    async fn failed_load_more_keeps_results() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(30));
        let mut loader = ListingLoader::new();
        loader.load(&gateway, ListingQuery::new()).await;

        gateway.fail_next_fetches(1).await;
        assert_eq!(loader.load_more(&gateway).await, Applied::Failed);
        assert_eq!(loader.error(), Some("Failed to load more properties"));
        assert_eq!(loader.items().len(), 12);
        assert!(loader.has_more());

        // The caller may ask again; nothing retries on its own
        assert_eq!(loader.load_more(&gateway).await, Applied::Loaded { count: 12 });
        assert!(loader.error().is_none());
        assert_eq!(loader.items()[12].id, "p12");
    }

    #[tokio::test]
    async fn failed_first_page_blocks_load_more() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(30));
        gateway.fail_next_fetches(1).await;
        let mut loader = ListingLoader::new();

        assert_eq!(loader.load(&gateway, ListingQuery::new()).await, Applied::Failed);
        assert_eq!(loader.error(), Some("Failed to load properties"));
        assert!(loader.items().is_empty());
        assert_eq!(loader.load_more(&gateway).await, Applied::Skipped);
    }

    #[tokio::test]
    async fn token_cursors_page_the_same_way() {
        let gateway = MemoryGateway::with_properties(fixtures::listings(13)).with_token_cursors();
        let mut loader = ListingLoader::new();

        loader.load(&gateway, ListingQuery::new()).await;
        loader.load_more(&gateway).await;

        let ids: Vec<&str> = loader.items().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), 13);
        assert_eq!(ids.last(), Some(&"p12"));
        assert!(!loader.has_more());
    }
}
