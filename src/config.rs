use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket_name: String,
    pub storage_public_url: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Field-data sync server with versioned project storage")]
pub struct Args {
    /// Host to bind to (overrides FIELDSYNC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FIELDSYNC_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides FIELDSYNC_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FIELDSYNC_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Logical bucket name used in object URLs (overrides FIELDSYNC_BUCKET_NAME)
    #[arg(long)]
    pub bucket_name: Option<String>,

    /// Public storage endpoint used in object URLs (overrides FIELDSYNC_STORAGE_PUBLIC_URL)
    #[arg(long)]
    pub storage_public_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("FIELDSYNC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("FIELDSYNC_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing FIELDSYNC_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading FIELDSYNC_PORT"),
        };
        let env_storage =
            env::var("FIELDSYNC_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FIELDSYNC_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/fieldsync.db".into());
        let env_bucket =
            env::var("FIELDSYNC_BUCKET_NAME").unwrap_or_else(|_| "fieldsync".into());
        let env_public_url = env::var("FIELDSYNC_STORAGE_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000/storage".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket_name: args.bucket_name.unwrap_or(env_bucket),
            storage_public_url: args.storage_public_url.unwrap_or(env_public_url),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
