pub mod document;
pub mod error;
pub mod memory;
pub mod rest;
pub mod traits;
pub mod types;

pub use document::DocumentGateway;
pub use error::{GatewayError, Result};
pub use memory::MemoryGateway;
pub use rest::RestGateway;
pub use traits::{ListingGateway, UserStore};
pub use types::{Cursor, Field, ListingQuery, Page, Predicate, PAGE_SIZE};

use crate::models::{format, Property};
use crate::settings::{BackendKind, HttpSettings, Settings};
use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The store selected by configuration, seen through both interfaces
#[derive(Clone)]
pub struct Backend {
    pub listings: Arc<dyn ListingGateway>,
    pub users: Arc<dyn UserStore>,
}

impl Backend {
    pub fn from_gateway<G>(gateway: Arc<G>) -> Self
    where
        G: ListingGateway + UserStore + 'static,
    {
        Self {
            listings: gateway.clone(),
            users: gateway,
        }
    }
}

/// Build the backend named by `settings.backend.kind`
pub async fn connect(settings: &Settings) -> anyhow::Result<Backend> {
    let backend = match settings.backend.kind {
        BackendKind::Rest => {
            let client = http_client(&settings.http)?;
            Backend::from_gateway(Arc::new(RestGateway::new(client, &settings.backend.rest)))
        }
        BackendKind::Document => {
            let client = http_client(&settings.http)?;
            Backend::from_gateway(Arc::new(DocumentGateway::new(
                client,
                &settings.backend.document,
            )))
        }
        BackendKind::Memory => {
            let memory = &settings.backend.memory;
            let mut gateway = match &memory.seed_file {
                Some(path) => MemoryGateway::from_seed_file(path)
                    .await
                    .with_context(|| format!("Failed to load seed file {}", path.display()))?,
                None => MemoryGateway::new(),
            };
            if memory.token_cursors {
                gateway = gateway.with_token_cursors();
            }
            Backend::from_gateway(Arc::new(gateway))
        }
    };

    info!("Connected to {} backend", backend.listings.backend_name());
    Ok(backend)
}

/// Shared HTTP client for every remote call
pub fn http_client(http: &HttpSettings) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(http.timeout_secs))
        .user_agent(http.user_agent.as_str())
        .build()
        .context("Failed to create HTTP client")
}

/// Fill in what the store assigns to a new record
pub(crate) fn stamp_new(property: &Property, now: DateTime<Utc>) -> Property {
    let mut record = property.clone();
    record.id.clear();
    if record.listing_date.is_empty() {
        record.listing_date = format::listing_date(now.date_naive());
    }
    record.created_at = Some(now);
    record.updated_at = Some(now);
    record
}

/// Record as a JSON object without its id, ready to send as a row/document body
pub(crate) fn record_body(property: &Property) -> Result<Map<String, Value>> {
    let mut body = match serde_json::to_value(property)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    body.remove("id");
    Ok(body)
}
