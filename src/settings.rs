use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub search: SearchSettings,
    pub http: HttpSettings,
    pub media: MediaSettings,
    pub admin: AdminSettings,
}

/// Which hosted store backs the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Rest,
    Document,
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub rest: RestSettings,
    pub document: DocumentSettings,
    pub memory: MemorySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    /// Project URL, e.g. https://xyz.supabase.co
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    pub base_url: String,
    pub project_id: String,
    pub api_key: Option<String>,
    /// Bearer token for rules that require a signed-in caller
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemorySettings {
    /// JSON array of properties to start with
    pub seed_file: Option<PathBuf>,
    pub token_cursors: bool,
}

/// How the region filter is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegionMatch {
    #[default]
    Exact,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Path the search view lives at; query strings are appended to it
    pub base_path: String,
    pub region_match: RegionMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// Upload/delete function endpoint
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Address the admin dispatch server listens on
    pub bind: String,
    /// Admin dispatch endpoint used by `AdminClient`
    pub endpoint: String,
    /// Identity provider base URL, e.g. https://xyz.supabase.co
    pub identity_url: String,
    /// Service-role key for identity provider admin calls
    pub service_key: String,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            api_key: String::new(),
        }
    }
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            base_url: "https://firestore.googleapis.com".to_string(),
            project_id: String::new(),
            api_key: None,
            auth_token: None,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            base_path: "/search".to_string(),
            region_match: RegionMatch::Exact,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("property-listings/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8888/.netlify/functions/cloudinary".to_string(),
        }
    }
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            endpoint: "http://127.0.0.1:8787/admin".to_string(),
            identity_url: "http://localhost:54321".to_string(),
            service_key: String::new(),
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file if it exists, then `LISTINGS__*` env vars
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: LISTINGS__BACKEND__KIND=document, etc.
        builder = builder.add_source(
            config::Environment::with_prefix("LISTINGS")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;
        cfg.try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.backend.kind, BackendKind::Memory);
        assert_eq!(settings.search.base_path, "/search");
        assert_eq!(settings.search.region_match, RegionMatch::Exact);
        assert_eq!(settings.http.timeout_secs, 30);
        assert!(settings.backend.document.project_id.is_empty());
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("listings.toml");

        let config_content = r#"
[backend]
kind = "document"

[backend.document]
project_id = "rumah-prod"
api_key = "abc"

[search]
region_match = "partial"

[http]
timeout_secs = 5
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.backend.kind, BackendKind::Document);
        assert_eq!(settings.backend.document.project_id, "rumah-prod");
        assert_eq!(settings.backend.document.api_key.as_deref(), Some("abc"));
        assert_eq!(
            settings.backend.document.base_url,
            "https://firestore.googleapis.com"
        );
        assert_eq!(settings.search.region_match, RegionMatch::Partial);
        assert_eq!(settings.search.base_path, "/search");
        assert_eq!(settings.http.timeout_secs, 5);
    }
}
