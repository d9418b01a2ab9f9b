use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to read media file: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Media endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Media provider error: {0}")]
    Provider(String),

    #[error("Upload reply had no secure_url")]
    MissingUrl,
}

/// Provider reply to an upload; the full body is kept in `raw`
#[derive(Debug, Clone)]
pub struct Uploaded {
    pub secure_url: String,
    pub public_id: Option<String>,
    pub raw: Value,
}

/// Outcome of deleting several media items
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    /// (url, reason)
    pub failed: Vec<(String, String)>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Deserialize)]
struct ProviderReply {
    #[serde(default)]
    error: Option<Value>,
}

/// Client for the upload/delete function in front of the media host
pub struct MediaClient {
    client: Client,
    endpoint: String,
}

impl MediaClient {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Upload a local image or video file
    pub async fn upload(&self, path: &Path) -> Result<Uploaded, MediaError> {
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let uploaded = self.upload_bytes(&bytes, mime.essence_str()).await?;
        info!("Uploaded {} to {}", path.display(), uploaded.secure_url);
        Ok(uploaded)
    }

    pub async fn upload_bytes(&self, bytes: &[u8], mime: &str) -> Result<Uploaded, MediaError> {
        let raw = self
            .call(json!({ "action": "upload", "file": data_url(bytes, mime) }))
            .await?;

        let secure_url = raw
            .get("secure_url")
            .and_then(Value::as_str)
            .ok_or(MediaError::MissingUrl)?
            .to_string();
        let public_id = raw
            .get("public_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Uploaded {
            secure_url,
            public_id,
            raw,
        })
    }

    pub async fn delete(&self, public_id: &str) -> Result<(), MediaError> {
        self.call(json!({ "action": "delete", "public_id": public_id }))
            .await?;
        Ok(())
    }

    /// Delete every url; a failure is recorded and the rest still run
    pub async fn delete_all(&self, urls: &[String]) -> DeleteReport {
        let mut report = DeleteReport::default();
        for url in urls {
            match self.delete(public_id_from_url(url)).await {
                Ok(()) => report.deleted.push(url.clone()),
                Err(e) => {
                    error!("Failed to delete {}: {}", url, e);
                    report.failed.push((url.clone(), e.to_string()));
                }
            }
        }
        report
    }

    async fn call(&self, body: Value) -> Result<Value, MediaError> {
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(MediaError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| MediaError::Provider(format!("unreadable reply: {}", e)))?;
        if let Ok(ProviderReply { error: Some(err) }) = ProviderReply::deserialize(&value) {
            let message = err
                .as_str()
                .map(str::to_string)
                .or_else(|| err.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| err.to_string());
            return Err(MediaError::Provider(message));
        }
        Ok(value)
    }
}

/// `data:<mime>;base64,<payload>`
pub fn data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Media id from a hosted URL: last path segment up to the first dot
pub fn public_id_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    last.split('.').next().unwrap_or(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    #[test]
    fn public_id_strips_path_and_extension() {
        assert_eq!(
            public_id_from_url(
                "https://res.cloudinary.com/demo/image/upload/v1712/abc123.jpg"
            ),
            "abc123"
        );
        assert_eq!(public_id_from_url("https://x/y/clip.v2.mp4?dl=1"), "clip");
        assert_eq!(public_id_from_url("plain"), "plain");
    }

    #[test]
    fn data_url_encodes_payload() {
        assert_eq!(data_url(b"hi", "image/png"), "data:image/png;base64,aGk=");
    }

    async fn fake_provider() -> String {
        async fn handle(Json(body): Json<Value>) -> Json<Value> {
            match body["action"].as_str() {
                Some("upload") => Json(json!({
                    "secure_url": "https://cdn.example/v1/new.png",
                    "public_id": "new",
                })),
                _ if body["public_id"] == "broken" => Json(json!({ "error": "not found" })),
                _ => Json(json!({ "result": "ok" })),
            }
        }

        let app = Router::new().route("/media", post(handle));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/media", addr)
    }

    #[tokio::test]
    async fn upload_reads_file_and_returns_url() {
        let endpoint = fake_provider().await;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        std::fs::write(&path, b"\x89PNG").unwrap();

        let media = MediaClient::new(Client::new(), endpoint);
        let uploaded = media.upload(&path).await.unwrap();
        assert_eq!(uploaded.secure_url, "https://cdn.example/v1/new.png");
        assert_eq!(uploaded.public_id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn delete_all_continues_past_failures() {
        let endpoint = fake_provider().await;
        let media = MediaClient::new(Client::new(), endpoint);

        let urls = vec![
            "https://cdn.example/v1/one.jpg".to_string(),
            "https://cdn.example/v1/broken.jpg".to_string(),
            "https://cdn.example/v1/two.jpg".to_string(),
        ];
        let report = media.delete_all(&urls).await;

        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, urls[1]);
        assert!(report.failed[0].1.contains("not found"));
        assert!(!report.is_clean());
    }
}
