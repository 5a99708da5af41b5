//! SQLite pool setup and schema application.

use anyhow::{Context, Result, bail};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Names of the metadata table and its owner/time index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub table: String,
    pub index: String,
}

impl TableNames {
    /// Both names are interpolated into SQL, so only plain identifiers pass.
    pub fn new(table: impl Into<String>, index: impl Into<String>) -> Result<Self> {
        let names = Self {
            table: table.into(),
            index: index.into(),
        };
        ensure_identifier(&names.table).context("invalid table name")?;
        ensure_identifier(&names.index).context("invalid index name")?;
        Ok(names)
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            table: "images".into(),
            index: "images_owner_timestamp_idx".into(),
        }
    }
}

/// Open a pool, creating the database file when missing.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to `{}`", database_url))
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn apply_schema(pool: &SqlitePool, names: &TableNames) -> Result<()> {
    let sql = SCHEMA
        .replace("{table}", &names.table)
        .replace("{index}", &names.index);
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} schema statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing schema SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(pool)
            .await
            .with_context(|| format!("executing schema statement: {}", stmt))?;
    }

    Ok(())
}

fn ensure_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        bail!("identifier must not be empty");
    };
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("`{}` is not a plain SQL identifier", name);
    }
    Ok(())
}
