use crate::models::{Property, WireCode};
use serde::{Deserialize, Serialize};

/// Listing pages are always this long, except the last one
pub const PAGE_SIZE: usize = 12;

/// Property attributes a listing query can constrain or sort on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Region,
    MarketingType,
    PropertyType,
    Price,
    Bedrooms,
    Bathrooms,
    CreatedAt,
}

impl Field {
    /// Column / field path in the remote store
    pub fn column(&self) -> &'static str {
        match self {
            Self::Region => "wilayah",
            Self::MarketingType => "status",
            Self::PropertyType => "type",
            Self::Price => "hargaJual",
            Self::Bedrooms => "kamarTidur",
            Self::Bathrooms => "kamarMandi",
            Self::CreatedAt => "created_at",
        }
    }

    fn text(&self, property: &Property) -> Option<String> {
        match self {
            Self::Region => Some(property.region.clone()),
            Self::MarketingType => property.marketing_type.map(|m| m.code().to_string()),
            Self::PropertyType => property.property_type.map(|t| t.code().to_string()),
            _ => None,
        }
    }

    fn number(&self, property: &Property) -> Option<u64> {
        match self {
            Self::Price => Some(property.price),
            Self::Bedrooms => Some(property.bedrooms.into()),
            Self::Bathrooms => Some(property.bathrooms.into()),
            _ => None,
        }
    }
}

/// One condition of a listing query; all predicates are ANDed
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(Field, String),
    /// Partial, case-insensitive text match
    Contains(Field, String),
    /// Inclusive lower bound
    AtLeast(Field, u64),
    /// Inclusive upper bound
    AtMost(Field, u64),
}

impl Predicate {
    pub fn field(&self) -> Field {
        match self {
            Self::Equals(f, _) | Self::Contains(f, _) | Self::AtLeast(f, _) | Self::AtMost(f, _) => {
                *f
            }
        }
    }

    /// Evaluate locally, used by the in-memory backend
    pub fn matches(&self, property: &Property) -> bool {
        match self {
            Self::Equals(f, v) => f.text(property).is_some_and(|t| t == *v),
            Self::Contains(f, v) => f
                .text(property)
                .is_some_and(|t| t.to_lowercase().contains(&v.to_lowercase())),
            Self::AtLeast(f, n) => f.number(property).is_some_and(|x| x >= *n),
            Self::AtMost(f, n) => f.number(property).is_some_and(|x| x <= *n),
        }
    }
}

/// A bounded, ordered query against the `properties` collection
#[derive(Debug, Clone, PartialEq)]
pub struct ListingQuery {
    pub predicates: Vec<Predicate>,
    pub order_by: Field,
    pub descending: bool,
    pub limit: usize,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            order_by: Field::CreatedAt,
            descending: true,
            limit: PAGE_SIZE,
        }
    }
}

impl ListingQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn constrains(&self, field: Field) -> bool {
        self.predicates.iter().any(|p| p.field() == field)
    }

    pub fn matches(&self, property: &Property) -> bool {
        self.predicates.iter().all(|p| p.matches(property))
    }
}

/// Where the next page resumes.
///
/// Relational backends page by offset; document backends hand back an
/// opaque token naming the last document seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cursor {
    Offset(usize),
    Token(String),
}

/// One page of listing results
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Property>,
    /// Absent when this page came back short
    pub next: Option<Cursor>,
}
