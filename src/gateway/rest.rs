use super::error::{GatewayError, Result};
use super::traits::{ListingGateway, UserStore};
use super::types::{Cursor, Field, ListingQuery, Page, Predicate};
use super::{record_body, stamp_new};
use crate::models::{LogEntry, Property, Role, User};
use crate::settings::RestSettings;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

const PROPERTIES: &str = "properties";
const USERS: &str = "users";
const LOGS: &str = "logs";

/// Relational store reached through its PostgREST endpoint (`/rest/v1`).
/// Pages by offset.
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestGateway {
    pub fn new(client: Client, settings: &RestSettings) -> Self {
        Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn rows<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>> {
        let response = check(request.send().await?).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<()> {
        check(request.send().await?).await?;
        Ok(())
    }

    /// PATCH a single user row, failing with `NotFound` if no row matched
    async fn patch_user(&self, uid: &str, body: serde_json::Value) -> Result<()> {
        let request = self
            .request(Method::PATCH, USERS)
            .query(&[("uid", format!("eq.{}", uid))])
            .header("Prefer", "return=representation")
            .json(&body);
        let rows: Vec<User> = self.rows(request).await?;
        if rows.is_empty() {
            return Err(GatewayError::NotFound(format!("user {}", uid)));
        }
        Ok(())
    }
}

/// PostgREST query parameters for one page
pub fn query_params(query: &ListingQuery, cursor: Option<&Cursor>) -> Result<Vec<(String, String)>> {
    let mut params = vec![("select".to_string(), "*".to_string())];

    for predicate in &query.predicates {
        let (field, filter) = match predicate {
            Predicate::Equals(f, v) => (f, format!("eq.{}", v)),
            Predicate::Contains(f, v) => (f, format!("ilike.*{}*", v)),
            Predicate::AtLeast(f, n) => (f, format!("gte.{}", n)),
            Predicate::AtMost(f, n) => (f, format!("lte.{}", n)),
        };
        params.push((field.column().to_string(), filter));
    }

    let direction = if query.descending { "desc" } else { "asc" };
    params.push((
        "order".to_string(),
        format!("{}.{}", query.order_by.column(), direction),
    ));
    params.push(("limit".to_string(), query.limit.to_string()));

    match cursor {
        None => {}
        Some(Cursor::Offset(offset)) => params.push(("offset".to_string(), offset.to_string())),
        Some(Cursor::Token(token)) => {
            return Err(GatewayError::InvalidCursor(format!(
                "offset-paged store cannot resume from token {}",
                token
            )))
        }
    }

    Ok(params)
}

/// Double-quoted element; `\` and `"` inside are backslash-escaped
fn quote(item: &str) -> String {
    format!("\"{}\"", item.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `in.("a","b")` filter value
fn in_list(ids: &[String]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| quote(id)).collect();
    format!("in.({})", quoted.join(","))
}

/// Postgres array literal, `{"a","b"}`
fn array_literal(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|item| quote(item)).collect();
    format!("{{{}}}", quoted.join(","))
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("Store returned status: {}", status);
    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ListingGateway for RestGateway {
    async fn fetch_page(&self, query: &ListingQuery, cursor: Option<&Cursor>) -> Result<Page> {
        let params = query_params(query, cursor)?;
        debug!("Fetching properties with {:?}", params);

        let items: Vec<Property> = self
            .rows(self.request(Method::GET, PROPERTIES).query(&params))
            .await?;

        let offset = match cursor {
            Some(Cursor::Offset(offset)) => *offset,
            _ => 0,
        };
        let next = (items.len() == query.limit).then(|| Cursor::Offset(offset + items.len()));

        Ok(Page { items, next })
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Property>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.rows(
            self.request(Method::GET, PROPERTIES)
                .query(&[("select", "*".to_string()), ("id", in_list(ids))]),
        )
        .await
    }

    async fn list_all(&self) -> Result<Vec<Property>> {
        let order = format!("{}.desc", Field::CreatedAt.column());
        self.rows(
            self.request(Method::GET, PROPERTIES)
                .query(&[("select", "*"), ("order", order.as_str())]),
        )
        .await
    }

    async fn create_property(&self, property: &Property) -> Result<String> {
        let body = record_body(&stamp_new(property, Utc::now()))?;
        let rows: Vec<Property> = self
            .rows(
                self.request(Method::POST, PROPERTIES)
                    .header("Prefer", "return=representation")
                    .json(&body),
            )
            .await?;

        rows.into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| GatewayError::Status {
                status: 200,
                body: "insert returned no row".to_string(),
            })
    }

    async fn update_property(&self, id: &str, property: &Property) -> Result<()> {
        let mut body = record_body(property)?;
        body.remove("created_at");
        body.insert("timestamp".to_string(), json!(Utc::now()));

        let rows: Vec<Property> = self
            .rows(
                self.request(Method::PATCH, PROPERTIES)
                    .query(&[("id", format!("eq.{}", id))])
                    .header("Prefer", "return=representation")
                    .json(&body),
            )
            .await?;
        if rows.is_empty() {
            return Err(GatewayError::NotFound(format!("property {}", id)));
        }
        Ok(())
    }

    async fn delete_properties(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.execute(
            self.request(Method::DELETE, PROPERTIES)
                .query(&[("id", in_list(ids))]),
        )
        .await
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}

#[async_trait]
impl UserStore for RestGateway {
    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        let rows: Vec<User> = self
            .rows(
                self.request(Method::GET, USERS)
                    .query(&[("select", "*".to_string()), ("uid", format!("eq.{}", uid))]),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.execute(
            self.request(Method::POST, USERS)
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(user),
        )
        .await
    }

    async fn update_favorites(
        &self,
        uid: &str,
        expected: &[String],
        favorites: &[String],
    ) -> Result<()> {
        let rows: Vec<User> = self
            .rows(
                self.request(Method::PATCH, USERS)
                    .query(&[
                        ("uid", format!("eq.{}", uid)),
                        ("favorites", format!("eq.{}", array_literal(expected))),
                    ])
                    .header("Prefer", "return=representation")
                    .json(&json!({ "favorites": favorites })),
            )
            .await?;

        if !rows.is_empty() {
            return Ok(());
        }

        // Nothing matched: either the user is gone or the list moved on
        match self.get_user(uid).await? {
            Some(user) => Err(GatewayError::Conflict {
                current: user.favorites,
            }),
            None => Err(GatewayError::NotFound(format!("user {}", uid))),
        }
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.rows(self.request(Method::GET, USERS).query(&[("select", "*")]))
            .await
    }

    async fn set_role(&self, uid: &str, role: Role) -> Result<()> {
        self.patch_user(uid, json!({ "role": role })).await
    }

    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<()> {
        self.patch_user(uid, json!({ "disabled": disabled })).await
    }

    async fn delete_user(&self, uid: &str) -> Result<()> {
        self.execute(
            self.request(Method::DELETE, USERS)
                .query(&[("uid", format!("eq.{}", uid))]),
        )
        .await
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<()> {
        self.execute(
            self.request(Method::POST, LOGS)
                .header("Prefer", "return=minimal")
                .json(entry),
        )
        .await
    }

    async fn list_logs(&self) -> Result<Vec<LogEntry>> {
        self.rows(
            self.request(Method::GET, LOGS)
                .query(&[("select", "*"), ("order", "timestamp.desc")]),
        )
        .await
    }
}
