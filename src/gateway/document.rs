use super::error::{GatewayError, Result};
use super::traits::{ListingGateway, UserStore};
use super::types::{Cursor, Field, ListingQuery, Page, Predicate};
use super::{record_body, stamp_new};
use crate::models::{LogEntry, Property, Role, User};
use crate::settings::DocumentSettings;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const PROPERTIES: &str = "properties";
const USERS: &str = "users";
const LOGS: &str = "logs";

/// Fields holding instants; everything else string-typed stays a string
const TIMESTAMP_FIELDS: &[&str] = &["created_at", "timestamp"];

/// Listing date; the one recency field every stored listing carries,
/// including those written before `created_at` existed
const RECENCY_FIELD: &str = "tanggal";

/// Document store reached through the Firestore REST API.
/// Pages with continuation tokens naming the last document returned.
pub struct DocumentGateway {
    client: Client,
    documents_url: String,
    database: String,
    api_key: Option<String>,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    create_time: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct BatchGetResult {
    #[serde(default)]
    found: Option<Document>,
}

impl Document {
    fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    /// Plain JSON object with the document id and store times folded in
    fn into_plain(self, id_key: &str) -> Value {
        let id = self.id().to_string();
        let mut object = decode_fields(&self.fields);
        object.insert(id_key.to_string(), Value::String(id));
        if let Some(created) = self.create_time {
            object
                .entry("created_at")
                .or_insert(Value::String(created));
        }
        if let Some(updated) = self.update_time {
            object.entry("timestamp").or_insert(Value::String(updated));
        }
        Value::Object(object)
    }

    fn decode<T: DeserializeOwned>(self, id_key: &str) -> Result<T> {
        Ok(serde_json::from_value(self.into_plain(id_key))?)
    }
}

impl DocumentGateway {
    pub fn new(client: Client, settings: &DocumentSettings) -> Self {
        let database = format!("projects/{}/databases/(default)", settings.project_id);
        Self {
            client,
            documents_url: format!(
                "{}/v1/{}/documents",
                settings.base_url.trim_end_matches('/'),
                database
            ),
            database,
            api_key: settings.api_key.clone(),
            auth_token: settings.auth_token.clone(),
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let mut request = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    fn doc_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_url, collection, id)
    }

    fn doc_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database, collection, id)
    }

    async fn run_query(&self, structured_query: Value) -> Result<Vec<Document>> {
        let response = self
            .request(Method::POST, format!("{}:runQuery", self.documents_url))
            .json(&json!({ "structuredQuery": structured_query }))
            .send()
            .await?;
        let results: Vec<QueryResult> = check(response).await?.json().await?;
        Ok(results.into_iter().filter_map(|r| r.document).collect())
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let response = self
            .request(Method::GET, self.doc_url(collection, id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    /// Write the given fields only; `precondition` is an extra query pair
    async fn patch_fields(
        &self,
        collection: &str,
        id: &str,
        fields: &Map<String, Value>,
        precondition: Option<(&str, &str)>,
    ) -> Result<Response> {
        let mut params: Vec<(&str, &str)> = fields
            .keys()
            .map(|k| ("updateMask.fieldPaths", k.as_str()))
            .collect();
        if let Some(pair) = precondition {
            params.push(pair);
        }

        let response = self
            .request(Method::PATCH, self.doc_url(collection, id))
            .query(&params)
            .json(&json!({ "fields": encode_fields(fields) }))
            .send()
            .await?;
        Ok(response)
    }

    async fn set_user_field(&self, uid: &str, field: &str, value: Value) -> Result<()> {
        let mut fields = Map::new();
        fields.insert(field.to_string(), value);
        let response = self
            .patch_fields(USERS, uid, &fields, Some(("currentDocument.exists", "true")))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(format!("user {}", uid)));
        }
        check(response).await?;
        Ok(())
    }
}

/// Firestore `structuredQuery` for one page
pub fn structured_query(query: &ListingQuery, cursor: Option<&Cursor>) -> Result<Value> {
    let mut filters = Vec::new();
    for predicate in &query.predicates {
        match predicate {
            Predicate::Equals(f, v) => filters.push(field_filter(*f, "EQUAL", json!({ "stringValue": v }))),
            // prefix range; the store has no substring operator
            Predicate::Contains(f, v) => {
                filters.push(field_filter(
                    *f,
                    "GREATER_THAN_OR_EQUAL",
                    json!({ "stringValue": v }),
                ));
                filters.push(field_filter(
                    *f,
                    "LESS_THAN",
                    json!({ "stringValue": format!("{}\u{f8ff}", v) }),
                ));
            }
            Predicate::AtLeast(f, n) => filters.push(field_filter(
                *f,
                "GREATER_THAN_OR_EQUAL",
                json!({ "integerValue": n.to_string() }),
            )),
            Predicate::AtMost(f, n) => filters.push(field_filter(
                *f,
                "LESS_THAN_OR_EQUAL",
                json!({ "integerValue": n.to_string() }),
            )),
        }
    }

    let direction = if query.descending { "DESCENDING" } else { "ASCENDING" };
    let mut structured = json!({
        "from": [{ "collectionId": PROPERTIES }],
        "orderBy": [
            { "field": { "fieldPath": field_path(query.order_by) }, "direction": direction },
            { "field": { "fieldPath": "__name__" }, "direction": direction },
        ],
        "limit": query.limit,
    });

    match filters.len() {
        0 => {}
        1 => structured["where"] = filters.remove(0),
        _ => {
            structured["where"] = json!({
                "compositeFilter": { "op": "AND", "filters": filters }
            })
        }
    }

    match cursor {
        None => {}
        Some(Cursor::Offset(offset)) => structured["offset"] = json!(offset),
        Some(Cursor::Token(token)) => {
            let values: Vec<Value> = serde_json::from_str(token)
                .map_err(|_| GatewayError::InvalidCursor(token.clone()))?;
            if values.len() != 2 {
                return Err(GatewayError::InvalidCursor(token.clone()));
            }
            structured["startAt"] = json!({ "values": values, "before": false });
        }
    }

    Ok(structured)
}

fn field_path(field: Field) -> &'static str {
    match field {
        Field::CreatedAt => RECENCY_FIELD,
        other => other.column(),
    }
}

fn field_filter(field: Field, op: &str, value: Value) -> Value {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": field_path(field) },
            "op": op,
            "value": value,
        }
    })
}

/// Opaque token resuming after `document`, carrying its ordering value.
/// The store never returns a document without the field it orders on.
fn continuation_token(document: &Document, order_by: Field) -> Option<String> {
    let order_value = document.fields.get(field_path(order_by)).cloned()?;
    let values = json!([order_value, { "referenceValue": document.name }]);
    Some(values.to_string())
}

/// Typed Firestore value to plain JSON
fn decode_value(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = object.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "booleanValue" => inner.clone(),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        "geoPointValue" => inner.clone(),
        _ => Value::Null,
    }
}

fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect()
}

/// Plain JSON to a typed Firestore value
fn encode_value(value: &Value, timestamp: bool) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({ "integerValue": n.to_string() }),
        Value::Number(n) => json!({ "doubleValue": n }),
        Value::String(s) if timestamp => json!({ "timestampValue": s }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(|v| encode_value(v, false)).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| {
            let timestamp = TIMESTAMP_FIELDS.contains(&k.as_str());
            (k.clone(), encode_value(v, timestamp))
        })
        .collect()
}

fn object_of<T: serde::Serialize>(value: &T) -> Result<Map<String, Value>> {
    Ok(match serde_json::to_value(value)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
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
impl ListingGateway for DocumentGateway {
    async fn fetch_page(&self, query: &ListingQuery, cursor: Option<&Cursor>) -> Result<Page> {
        let structured = structured_query(query, cursor)?;
        debug!("Running structured query {}", structured);

        let documents = self.run_query(structured).await?;
        let next = if documents.len() == query.limit {
            documents
                .last()
                .and_then(|doc| continuation_token(doc, query.order_by))
                .map(Cursor::Token)
        } else {
            None
        };

        let items = documents
            .into_iter()
            .map(|doc| doc.decode::<Property>("id"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Page { items, next })
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Property>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = ids.iter().map(|id| self.doc_name(PROPERTIES, id)).collect();
        let response = self
            .request(Method::POST, format!("{}:batchGet", self.documents_url))
            .json(&json!({ "documents": names }))
            .send()
            .await?;
        let results: Vec<BatchGetResult> = check(response).await?.json().await?;

        results
            .into_iter()
            .filter_map(|r| r.found)
            .map(|doc| doc.decode::<Property>("id"))
            .collect()
    }

    async fn list_all(&self) -> Result<Vec<Property>> {
        let documents = self
            .run_query(json!({
                "from": [{ "collectionId": PROPERTIES }],
                "orderBy": [{ "field": { "fieldPath": RECENCY_FIELD }, "direction": "DESCENDING" }],
            }))
            .await?;
        documents
            .into_iter()
            .map(|doc| doc.decode::<Property>("id"))
            .collect()
    }

    async fn create_property(&self, property: &Property) -> Result<String> {
        let body = record_body(&stamp_new(property, Utc::now()))?;
        let response = self
            .request(Method::POST, format!("{}/{}", self.documents_url, PROPERTIES))
            .json(&json!({ "fields": encode_fields(&body) }))
            .send()
            .await?;
        let document: Document = check(response).await?.json().await?;
        Ok(document.id().to_string())
    }

    async fn update_property(&self, id: &str, property: &Property) -> Result<()> {
        let mut body = record_body(property)?;
        body.remove("created_at");
        body.insert("timestamp".to_string(), json!(Utc::now()));

        let response = self
            .patch_fields(PROPERTIES, id, &body, Some(("currentDocument.exists", "true")))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(format!("property {}", id)));
        }
        check(response).await?;
        Ok(())
    }

    async fn delete_properties(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let writes: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "delete": self.doc_name(PROPERTIES, id) }))
            .collect();
        let response = self
            .request(Method::POST, format!("{}:commit", self.documents_url))
            .json(&json!({ "writes": writes }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "document"
    }
}

#[async_trait]
impl UserStore for DocumentGateway {
    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        match self.get_document(USERS, uid).await? {
            Some(doc) => Ok(Some(doc.decode("uid")?)),
            None => Ok(None),
        }
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let fields = object_of(user)?;
        let response = self
            .request(Method::PATCH, self.doc_url(USERS, &user.uid))
            .json(&json!({ "fields": encode_fields(&fields) }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn update_favorites(
        &self,
        uid: &str,
        expected: &[String],
        favorites: &[String],
    ) -> Result<()> {
        let Some(doc) = self.get_document(USERS, uid).await? else {
            return Err(GatewayError::NotFound(format!("user {}", uid)));
        };
        let update_time = doc.update_time.clone().unwrap_or_default();
        let stored: User = doc.decode("uid")?;
        if stored.favorites != expected {
            return Err(GatewayError::Conflict {
                current: stored.favorites,
            });
        }

        let mut fields = Map::new();
        fields.insert("favorites".to_string(), json!(favorites));
        let response = self
            .patch_fields(
                USERS,
                uid,
                &fields,
                Some(("currentDocument.updateTime", update_time.as_str())),
            )
            .await?;

        // written by someone else between our read and our write
        if matches!(
            response.status(),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED
        ) {
            let current = self
                .get_user(uid)
                .await?
                .map(|u| u.favorites)
                .unwrap_or_default();
            return Err(GatewayError::Conflict { current });
        }
        check(response).await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let documents = self
            .run_query(json!({ "from": [{ "collectionId": USERS }] }))
            .await?;
        documents.into_iter().map(|doc| doc.decode("uid")).collect()
    }

    async fn set_role(&self, uid: &str, role: Role) -> Result<()> {
        self.set_user_field(uid, "role", json!(role)).await
    }

    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<()> {
        self.set_user_field(uid, "disabled", json!(disabled)).await
    }

    async fn delete_user(&self, uid: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, self.doc_url(USERS, uid))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<()> {
        let mut fields = object_of(entry)?;
        fields.remove("id");
        let response = self
            .request(Method::POST, format!("{}/{}", self.documents_url, LOGS))
            .json(&json!({ "fields": encode_fields(&fields) }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn list_logs(&self) -> Result<Vec<LogEntry>> {
        let documents = self
            .run_query(json!({
                "from": [{ "collectionId": LOGS }],
                "orderBy": [{ "field": { "fieldPath": "timestamp" }, "direction": "DESCENDING" }],
            }))
            .await?;
        documents.into_iter().map(|doc| doc.decode("id")).collect()
    }
}
