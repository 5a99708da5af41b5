use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};
use uuid::Uuid;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage_dir: String,
    pub public_base_url: String,
    pub bucket_name: String,
    pub table_name: String,
    pub index_name: String,
    pub signing_secret: String,
    pub upload_url_ttl: Duration,
    pub download_url_ttl: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub max_file_size: i64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Image metadata API with delegated uploads")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides IMAGE_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory where object payloads are stored (overrides IMAGE_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Origin used in issued upload/download URLs (overrides IMAGE_VAULT_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Bucket holding image payloads (overrides IMAGE_VAULT_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Metadata table name (overrides IMAGE_VAULT_TABLE)
    #[arg(long)]
    pub table: Option<String>,

    /// Owner/timestamp index name (overrides IMAGE_VAULT_INDEX)
    #[arg(long)]
    pub index: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            database_url: "sqlite://./data/meta/image_vault.db".into(),
            storage_dir: "./data/objects".into(),
            public_base_url: "http://127.0.0.1:3000".into(),
            bucket_name: "image-vault".into(),
            table_name: "images".into(),
            index_name: "images_owner_timestamp_idx".into(),
            signing_secret: Uuid::new_v4().simple().to_string(),
            upload_url_ttl: Duration::from_secs(3600),
            download_url_ttl: Duration::from_secs(900),
            default_page_size: 50,
            max_page_size: 100,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_env_with(args)?, migrate))
    }

    /// Merge `args` over the `IMAGE_VAULT_*` environment over defaults.
    pub fn from_env_with(args: Args) -> Result<Self> {
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_port = env_parse("IMAGE_VAULT_PORT")?.unwrap_or(defaults.port);
        let port = args.port.unwrap_or(env_port);

        let signing_secret = match env_string("IMAGE_VAULT_SIGNING_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!(
                    "IMAGE_VAULT_SIGNING_SECRET not set; issued URLs will not survive a restart"
                );
                defaults.signing_secret
            }
        };

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or_else(|| env_string("IMAGE_VAULT_HOST"))
                .unwrap_or(defaults.host),
            port,
            database_url: args
                .database_url
                .or_else(|| env_string("IMAGE_VAULT_DATABASE_URL"))
                .unwrap_or(defaults.database_url),
            storage_dir: args
                .storage_dir
                .or_else(|| env_string("IMAGE_VAULT_STORAGE_DIR"))
                .unwrap_or(defaults.storage_dir),
            public_base_url: args
                .public_base_url
                .or_else(|| env_string("IMAGE_VAULT_PUBLIC_BASE_URL"))
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", port)),
            bucket_name: args
                .bucket
                .or_else(|| env_string("IMAGE_VAULT_BUCKET"))
                .unwrap_or(defaults.bucket_name),
            table_name: args
                .table
                .or_else(|| env_string("IMAGE_VAULT_TABLE"))
                .unwrap_or(defaults.table_name),
            index_name: args
                .index
                .or_else(|| env_string("IMAGE_VAULT_INDEX"))
                .unwrap_or(defaults.index_name),
            signing_secret,
            upload_url_ttl: env_parse("IMAGE_VAULT_UPLOAD_URL_TTL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.upload_url_ttl),
            download_url_ttl: env_parse("IMAGE_VAULT_DOWNLOAD_URL_TTL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_url_ttl),
            default_page_size: env_parse("IMAGE_VAULT_DEFAULT_PAGE_SIZE")?
                .unwrap_or(defaults.default_page_size),
            max_page_size: env_parse("IMAGE_VAULT_MAX_PAGE_SIZE")?
                .unwrap_or(defaults.max_page_size),
            max_file_size: env_parse("IMAGE_VAULT_MAX_FILE_SIZE")?
                .unwrap_or(defaults.max_file_size),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.max_page_size == 0 {
            bail!("max page size must be at least 1");
        }
        if !(1..=self.max_page_size).contains(&self.default_page_size) {
            bail!(
                "default page size {} must be between 1 and {}",
                self.default_page_size,
                self.max_page_size
            );
        }
        if self.max_file_size <= 0 {
            bail!("max file size must be positive");
        }
        if self.bucket_name.is_empty() || self.bucket_name.contains(['/', '\\']) {
            bail!("bucket name `{}` is not a single path segment", self.bucket_name);
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
