use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf};

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub database_url: String,
    pub max_upload_bytes: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Customer and vehicle registry API")]
pub struct Args {
    /// Host to bind to (overrides CUSTOMER_REGISTRY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CUSTOMER_REGISTRY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where vehicle images are stored (overrides CUSTOMER_REGISTRY_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Database URL (overrides CUSTOMER_REGISTRY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted image upload in bytes (overrides CUSTOMER_REGISTRY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values produced by `lookup`, then over defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_host = lookup("CUSTOMER_REGISTRY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match lookup("CUSTOMER_REGISTRY_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing CUSTOMER_REGISTRY_PORT value `{}`", value))?,
            None => 8080,
        };
        let env_upload = lookup("CUSTOMER_REGISTRY_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./uploads"));
        let env_db = lookup("CUSTOMER_REGISTRY_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/customer_registry.db".into());
        let env_max_upload = match lookup("CUSTOMER_REGISTRY_MAX_UPLOAD_BYTES") {
            Some(value) => value.parse::<u64>().with_context(|| {
                format!("parsing CUSTOMER_REGISTRY_MAX_UPLOAD_BYTES value `{}`", value)
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upload_dir: args.upload_dir.unwrap_or(env_upload),
            database_url: args.database_url.unwrap_or(env_db),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
