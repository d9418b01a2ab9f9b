use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use property_listings::admin::{self, AdminAction, AdminClient, AdminDispatcher, AdminReply, GoTrueIdentity};
use property_listings::export;
use property_listings::filters::FilterState;
use property_listings::gateway::{self, http_client};
use property_listings::import;
use property_listings::listing::{Applied, ListingLoader};
use property_listings::media::MediaClient;
use property_listings::models::format::format_rupiah;
use property_listings::settings::Settings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "property-listings", version, about = "Property catalog search, export and admin dispatch")]
struct Cli {
    /// Settings file (TOML); LISTINGS__* env vars override it
    #[arg(short, long, env = "LISTINGS_CONFIG", default_value = "listings.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search listings, e.g. `search "wilayah=BSD&kamarTidur=2"`
    Search {
        #[arg(default_value = "")]
        query: String,
        /// Pages to load (12 listings each)
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Save the results as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Export listings to CSV
    Export {
        /// Only listings matching this query string
        #[arg(default_value = "")]
        query: String,
        /// Listing ids to export; all matching listings when omitted
        #[arg(long = "id")]
        ids: Vec<String>,
        #[arg(short, long, default_value = "selected_properties.csv")]
        output: PathBuf,
    },
    /// Import listings from a spreadsheet CSV export
    Import { file: PathBuf },
    /// Upload media files and print their hosted URLs
    Upload { files: Vec<PathBuf> },
    /// Run the admin dispatch endpoint
    ServeAdmin,
    /// Send one back-office action to the admin dispatch endpoint
    Admin {
        /// Caller's bearer token from the identity provider
        #[arg(long, env = "LISTINGS_ADMIN_TOKEN")]
        token: String,
        /// Caller's email, recorded in the audit log
        #[arg(long, default_value = "")]
        performed_by: String,
        #[command(subcommand)]
        action: AdminCommand,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    CreateUser {
        email: String,
        password: String,
        #[arg(long, default_value = "user")]
        role: String,
    },
    DeleteUser { user_id: String },
    ResetPassword { email: String },
    Disable { user_id: String },
    Enable { user_id: String },
    SetRole { user_id: String, role: String },
}

impl From<AdminCommand> for AdminAction {
    fn from(command: AdminCommand) -> Self {
        match command {
            AdminCommand::CreateUser {
                email,
                password,
                role,
            } => AdminAction::CreateUser {
                email,
                password,
                role,
            },
            AdminCommand::DeleteUser { user_id } => AdminAction::DeleteUser { user_id },
            AdminCommand::ResetPassword { email } => AdminAction::ResetPassword { email },
            AdminCommand::Disable { user_id } => AdminAction::ToggleUserStatus {
                user_id,
                disabled: Some(true),
            },
            AdminCommand::Enable { user_id } => AdminAction::ToggleUserStatus {
                user_id,
                disabled: Some(false),
            },
            AdminCommand::SetRole { user_id, role } => AdminAction::ChangeUserRole {
                user_id,
                new_role: role,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Command::Search {
            query,
            pages,
            output,
        } => search(&settings, &query, pages, output).await,
        Command::Export { query, ids, output } => export_csv(&settings, &query, ids, output).await,
        Command::Import { file } => import_csv(&settings, &file).await,
        Command::Upload { files } => upload(&settings, files).await,
        Command::ServeAdmin => serve_admin(&settings).await,
        Command::Admin {
            token,
            performed_by,
            action,
        } => send_admin(&settings, token, performed_by, action.into()).await,
    }
}

fn location(base_path: &str, query: &str) -> String {
    let query = query.trim_start_matches('?');
    if query.is_empty() {
        base_path.to_string()
    } else {
        format!("{}?{}", base_path, query)
    }
}

async fn search(settings: &Settings, query: &str, pages: usize, output: Option<PathBuf>) -> Result<()> {
    let backend = gateway::connect(settings).await?;
    let base_path = &settings.search.base_path;
    let filters = FilterState::from_location(base_path.as_str(), &location(base_path, query))?;

    info!("🏠 Searching {}", filters.location());

    let mut loader = ListingLoader::new();
    let listing_query = filters.config().to_query(settings.search.region_match);
    loader.load(backend.listings.as_ref(), listing_query).await;
    for _ in 1..pages {
        if loader.load_more(backend.listings.as_ref()).await == Applied::Skipped {
            break;
        }
    }
    if let Some(message) = loader.error() {
        warn!("{}", message);
    }

    let properties = loader.items();
    info!("\n✅ Found {} properties\n", properties.len());

    for (i, property) in properties.iter().enumerate() {
        let heading = if property.title.is_empty() {
            &property.region
        } else {
            &property.title
        };
        println!("{}. {} ({})", i + 1, heading, format_rupiah(property.price));
        println!(
            "   {} KT, {} KM, LT {} m², LB {} m²",
            property.bedrooms, property.bathrooms, property.land_area, property.building_area
        );
        if !property.cluster.is_empty() {
            println!("   Cluster: {}", property.cluster);
        }
        println!("   ID: {}", property.id);
        println!("   Listed: {}", property.listing_date);
        println!("   Cover: {}", property.cover_image());
        println!();
    }
    if loader.has_more() {
        info!("More results available; pass --pages to load them");
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(properties)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("💾 Saved {} properties to {}", properties.len(), path.display());
    }

    Ok(())
}

async fn export_csv(settings: &Settings, query: &str, ids: Vec<String>, output: PathBuf) -> Result<()> {
    let backend = gateway::connect(settings).await?;
    let base_path = &settings.search.base_path;
    let filters = FilterState::from_location(base_path.as_str(), &location(base_path, query))?;
    let listing_query = filters.config().to_query(settings.search.region_match);

    let properties: Vec<_> = backend
        .listings
        .list_all()
        .await
        .context("Failed to fetch properties")?
        .into_iter()
        .filter(|p| listing_query.matches(p))
        .collect();

    let selected = if ids.is_empty() {
        properties.iter().map(|p| p.id.clone()).collect()
    } else {
        ids
    };
    let missing = export::missing_ids(&properties, &selected);
    if !missing.is_empty() {
        warn!(
            "⚠️ {} requested ids not exported (unknown or filtered out): {}",
            missing.len(),
            missing.join(", ")
        );
    }

    export::write_csv(&output, &properties, &selected).await?;
    Ok(())
}

async fn import_csv(settings: &Settings, file: &Path) -> Result<()> {
    let backend = gateway::connect(settings).await?;
    let report = import::import_csv(backend.listings.as_ref(), file)
        .await
        .with_context(|| format!("Failed to import {}", file.display()))?;
    println!("Imported {} of {} rows", report.created.len(), report.rows);
    Ok(())
}

async fn upload(settings: &Settings, files: Vec<PathBuf>) -> Result<()> {
    let media = MediaClient::new(http_client(&settings.http)?, settings.media.endpoint.as_str());

    for file in &files {
        let uploaded = media
            .upload(file)
            .await
            .with_context(|| format!("Failed to upload {}", file.display()))?;
        println!("{}", uploaded.secure_url);
    }
    Ok(())
}

async fn serve_admin(settings: &Settings) -> Result<()> {
    let backend = gateway::connect(settings).await?;
    let identity = GoTrueIdentity::new(http_client(&settings.http)?, &settings.admin);
    let dispatcher = AdminDispatcher::new(Arc::new(identity), backend.users.clone());

    admin::serve(&settings.admin.bind, Arc::new(dispatcher)).await
}

async fn send_admin(
    settings: &Settings,
    token: String,
    performed_by: String,
    action: AdminAction,
) -> Result<()> {
    let client = AdminClient::new(
        http_client(&settings.http)?,
        settings.admin.endpoint.as_str(),
        token,
        performed_by,
    );
    let name = action.name();
    match client
        .send(action)
        .await
        .with_context(|| format!("{} failed", name))?
    {
        AdminReply::Created { uid } => println!("Created user {}", uid),
        AdminReply::Done { message } => println!("{}", message),
    }
    Ok(())
}
