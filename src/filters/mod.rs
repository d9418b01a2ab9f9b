//! Search criteria and their mirror in the address bar.
//!
//! `FilterConfig` is the criteria record; `FilterState` owns the current
//! criteria plus any staged edits and publishes a navigation event
//! (the new URL) every time criteria are applied, searched or reset.

use crate::gateway::{Field, ListingQuery, Predicate};
use crate::models::{MarketingType, PropertyType, WireCode};
use crate::settings::RegionMatch;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;
use url::{form_urlencoded, Url};

/// `price_max` at or above this means "no upper bound"
pub const PRICE_UNBOUNDED: u64 = 1_000_000_000;

/// Query-string keys; existing shared links use these names
pub mod keys {
    pub const REGION: &str = "wilayah";
    pub const MARKETING_TYPE: &str = "jenisPemasaran";
    pub const PROPERTY_TYPE: &str = "tipe";
    pub const PRICE_MIN: &str = "hargaMin";
    pub const PRICE_MAX: &str = "hargaMax";
    pub const BEDROOMS_MIN: &str = "kamarTidur";
    pub const BATHROOMS_MIN: &str = "kamarMandi";
}

/// Zero is an empty price box, not a cap
fn price_cap(n: u64) -> u64 {
    if n == 0 {
        PRICE_UNBOUNDED
    } else {
        n.min(PRICE_UNBOUNDED)
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid location {location:?}: {source}")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    pub region: String,
    pub marketing_type: Option<MarketingType>,
    pub property_type: Option<PropertyType>,
    pub price_min: u64,
    pub price_max: u64,
    pub bedrooms_min: u32,
    pub bathrooms_min: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            marketing_type: None,
            property_type: None,
            price_min: 0,
            price_max: PRICE_UNBOUNDED,
            bedrooms_min: 0,
            bathrooms_min: 0,
        }
    }
}

/// A single edit to the criteria
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChange {
    Region(String),
    MarketingType(Option<MarketingType>),
    PropertyType(Option<PropertyType>),
    PriceMin(u64),
    PriceMax(u64),
    BedroomsMin(u32),
    BathroomsMin(u32),
}

impl FilterConfig {
    /// Parse a query string (with or without the leading `?`).
    /// Missing or unparsable fields keep their default.
    pub fn from_query_string(query: &str) -> Self {
        let mut config = Self::default();
        let query = query.strip_prefix('?').unwrap_or(query);

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                keys::REGION => config.region = value.into_owned(),
                keys::MARKETING_TYPE => config.marketing_type = MarketingType::from_code(&value),
                keys::PROPERTY_TYPE => config.property_type = PropertyType::from_code(&value),
                keys::PRICE_MIN => config.price_min = value.trim().parse().unwrap_or(0),
                keys::PRICE_MAX => {
                    config.price_max = value.trim().parse().unwrap_or(PRICE_UNBOUNDED)
                }
                keys::BEDROOMS_MIN => config.bedrooms_min = value.trim().parse().unwrap_or(0),
                keys::BATHROOMS_MIN => config.bathrooms_min = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }

        config.normalized()
    }

    /// Non-default fields only, in a stable order
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        if !self.region.is_empty() {
            serializer.append_pair(keys::REGION, &self.region);
        }
        if let Some(m) = self.marketing_type {
            serializer.append_pair(keys::MARKETING_TYPE, &m.code().to_lowercase());
        }
        if let Some(t) = self.property_type {
            serializer.append_pair(keys::PROPERTY_TYPE, &t.code().to_lowercase());
        }
        if self.price_min > 0 {
            serializer.append_pair(keys::PRICE_MIN, &self.price_min.to_string());
        }
        if self.has_price_cap() {
            serializer.append_pair(keys::PRICE_MAX, &self.price_max.to_string());
        }
        if self.bedrooms_min > 0 {
            serializer.append_pair(keys::BEDROOMS_MIN, &self.bedrooms_min.to_string());
        }
        if self.bathrooms_min > 0 {
            serializer.append_pair(keys::BATHROOMS_MIN, &self.bathrooms_min.to_string());
        }
        serializer.finish()
    }

    /// Any `price_max` past the sentinel, or zero, collapses onto it
    pub fn normalized(mut self) -> Self {
        self.price_max = price_cap(self.price_max);
        self
    }

    pub fn has_price_cap(&self) -> bool {
        price_cap(self.price_max) < PRICE_UNBOUNDED
    }

    /// True when any criterion differs from its default
    pub fn is_active(&self) -> bool {
        self.clone().normalized() != Self::default()
    }

    pub fn apply_change(&mut self, change: FilterChange) {
        match change {
            FilterChange::Region(region) => self.region = region,
            FilterChange::MarketingType(m) => self.marketing_type = m,
            FilterChange::PropertyType(t) => self.property_type = t,
            FilterChange::PriceMin(n) => self.price_min = n,
            FilterChange::PriceMax(n) => self.price_max = price_cap(n),
            FilterChange::BedroomsMin(n) => self.bedrooms_min = n,
            FilterChange::BathroomsMin(n) => self.bathrooms_min = n,
        }
    }

    /// The listing query these criteria select. Default-valued fields
    /// contribute no predicate.
    pub fn to_query(&self, region_match: RegionMatch) -> ListingQuery {
        let mut query = ListingQuery::new();

        let region = self.region.trim().to_uppercase();
        if !region.is_empty() {
            query = query.with(match region_match {
                RegionMatch::Exact => Predicate::Equals(Field::Region, region),
                RegionMatch::Partial => Predicate::Contains(Field::Region, region),
            });
        }
        if let Some(m) = self.marketing_type {
            query = query.with(Predicate::Equals(Field::MarketingType, m.code().to_string()));
        }
        if let Some(t) = self.property_type {
            query = query.with(Predicate::Equals(Field::PropertyType, t.code().to_string()));
        }
        if self.price_min > 0 {
            query = query.with(Predicate::AtLeast(Field::Price, self.price_min));
        }
        if self.has_price_cap() {
            query = query.with(Predicate::AtMost(Field::Price, self.price_max));
        }
        if self.bedrooms_min > 0 {
            query = query.with(Predicate::AtLeast(Field::Bedrooms, self.bedrooms_min.into()));
        }
        if self.bathrooms_min > 0 {
            query = query.with(Predicate::AtLeast(Field::Bathrooms, self.bathrooms_min.into()));
        }

        query
    }
}

/// Location for `config` under `base_path`; the bare path when nothing is set
pub fn location_for(base_path: &str, config: &FilterConfig) -> String {
    let query = config.to_query_string();
    if query.is_empty() {
        base_path.to_string()
    } else {
        format!("{}?{}", base_path, query)
    }
}

/// Owner of the current search criteria
pub struct FilterState {
    base_path: String,
    current: FilterConfig,
    pending: Option<FilterConfig>,
    location: watch::Sender<String>,
}

impl FilterState {
    pub fn new(base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        let (location, _) = watch::channel(base_path.clone());
        Self {
            base_path,
            current: FilterConfig::default(),
            pending: None,
            location,
        }
    }

    /// Initialize from the location currently displayed, either a full URL
    /// or a path with query string
    pub fn from_location(base_path: impl Into<String>, location: &str) -> Result<Self, FilterError> {
        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost")
                .and_then(|base| base.join(location))
                .map_err(|source| FilterError::InvalidLocation {
                    location: location.to_string(),
                    source,
                })?,
            Err(source) => {
                return Err(FilterError::InvalidLocation {
                    location: location.to_string(),
                    source,
                })
            }
        };

        let mut state = Self::new(base_path);
        state.current = FilterConfig::from_query_string(url.query().unwrap_or_default());
        state.location.send_replace(location_for(&state.base_path, &state.current));
        Ok(state)
    }

    /// Criteria currently in effect
    pub fn config(&self) -> &FilterConfig {
        &self.current
    }

    /// Edits staged but not yet applied
    pub fn pending(&self) -> Option<&FilterConfig> {
        self.pending.as_ref()
    }

    /// Change a criterion with immediate effect; the address bar is left alone
    pub fn set(&mut self, change: FilterChange) {
        self.current.apply_change(change);
    }

    /// Stage a change to take effect on the next [`apply`](Self::apply)
    pub fn stage(&mut self, change: FilterChange) {
        self.pending
            .get_or_insert_with(|| self.current.clone())
            .apply_change(change);
    }

    /// Commit staged edits and write the criteria into the address bar
    pub fn apply(&mut self) -> String {
        if let Some(pending) = self.pending.take() {
            self.current = pending.normalized();
        }
        self.navigate()
    }

    /// Search bar submit: replaces region, price range and marketing type,
    /// keeps the room minimums
    pub fn search(
        &mut self,
        region: &str,
        price_min: u64,
        price_max: u64,
        marketing_type: Option<MarketingType>,
    ) -> String {
        let mut next = self.pending.take().unwrap_or_else(|| self.current.clone());
        next.region = region.trim().to_string();
        next.price_min = price_min;
        next.price_max = price_max;
        next.marketing_type = marketing_type;
        self.current = next.normalized();
        self.navigate()
    }

    /// Back to defaults and the bare base path
    pub fn reset(&mut self) -> String {
        self.pending = None;
        self.current = FilterConfig::default();
        self.navigate()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_active()
    }

    /// URL currently displayed
    pub fn location(&self) -> String {
        self.location.borrow().clone()
    }

    /// Receives every navigation
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.location.subscribe()
    }

    fn navigate(&mut self) -> String {
        let url = location_for(&self.base_path, &self.current);
        debug!("Navigating to {}", url);
        self.location.send_replace(url.clone());
        url
    }
}
