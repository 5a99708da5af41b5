//! MetadataStore: persistence of `ImageRecord`s in SQLite.
//!
//! Point access by `image_id`, a range query over the owner/time secondary
//! index and an unfiltered scan. Both list operations are keyset-paginated:
//! a page ends with a [`PageCursor`] holding the last row's key attributes,
//! and the next page resumes strictly after it.
//!
//! Cursors carry no server-side state. Replaying one after concurrent
//! writes can skip or repeat rows; this layer does not correct for that.

use crate::{
    db::TableNames,
    models::image::{ImageRecord, ImageRow, ImageStatus},
    services::cursor::{CursorError, PageCursor},
};
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use thiserror::Error;
use tracing::debug;

const COLUMNS: &str = "image_id, owner_id, filename, content_type, file_size, \
                       upload_timestamp, tags, description, status, storage_key, \
                       created_at, updated_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata table unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("record `{image_id}` is corrupt: {reason}")]
    Corrupt { image_id: String, reason: String },
    #[error("encoding tags: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Cursor(#[from] CursorError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for [`MetadataStore::query_by_owner`]. Bounds are canonical
/// timestamps and both are inclusive.
#[derive(Debug, Clone, Copy)]
pub struct OwnerQuery<'a> {
    pub owner_id: &'a str,
    pub start: Option<&'a str>,
    pub end: Option<&'a str>,
}

impl<'a> OwnerQuery<'a> {
    pub fn new(owner_id: &'a str) -> Self {
        Self {
            owner_id,
            start: None,
            end: None,
        }
    }

    pub fn between(mut self, start: Option<&'a str>, end: Option<&'a str>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
}

/// One page of results. `next_cursor` is set iff more rows follow.
#[derive(Debug)]
pub struct Page {
    pub records: Vec<ImageRecord>,
    pub next_cursor: Option<PageCursor>,
}

#[derive(Clone)]
pub struct MetadataStore {
    db: SqlitePool,
    names: TableNames,
}

impl MetadataStore {
    pub fn new(db: SqlitePool, names: TableNames) -> Self {
        Self { db, names }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert or fully overwrite a record.
    ///
    /// `created_at`/`updated_at` on the input are ignored: both are set to
    /// now on insert, and an overwrite refreshes only `updated_at`. No
    /// conditional check, last writer wins.
    pub async fn put(&self, record: &ImageRecord) -> StoreResult<ImageRecord> {
        let now = Utc::now();
        let tags = record
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let sql = format!(
            "INSERT INTO {table} ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(image_id) DO UPDATE SET \
                owner_id = excluded.owner_id, \
                filename = excluded.filename, \
                content_type = excluded.content_type, \
                file_size = excluded.file_size, \
                upload_timestamp = excluded.upload_timestamp, \
                tags = excluded.tags, \
                description = excluded.description, \
                status = excluded.status, \
                storage_key = excluded.storage_key, \
                updated_at = excluded.updated_at \
             RETURNING {COLUMNS}",
            table = self.names.table,
        );

        let row = sqlx::query_as::<_, ImageRow>(&sql)
            .bind(&record.image_id)
            .bind(&record.owner_id)
            .bind(&record.filename)
            .bind(&record.content_type)
            .bind(record.file_size)
            .bind(&record.upload_timestamp)
            .bind(tags)
            .bind(&record.description)
            .bind(record.status.as_str())
            .bind(&record.storage_key)
            .bind(now)
            .bind(now)
            .fetch_one(&self.db)
            .await?;

        debug!("saved metadata for image {}", record.image_id);
        into_record(row)
    }

    /// Point lookup; `None` when absent.
    pub async fn get(&self, image_id: &str) -> StoreResult<Option<ImageRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} WHERE image_id = ?",
            table = self.names.table
        );
        sqlx::query_as::<_, ImageRow>(&sql)
            .bind(image_id)
            .fetch_optional(&self.db)
            .await?
            .map(into_record)
            .transpose()
    }

    /// Unconditional delete. Deleting an absent key is not an error.
    pub async fn delete(&self, image_id: &str) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE image_id = ?", self.names.table);
        let result = sqlx::query(&sql).bind(image_id).execute(&self.db).await?;
        debug!(
            "deleted metadata for image {} ({} rows)",
            image_id,
            result.rows_affected()
        );
        Ok(())
    }

    /// Range query over one owner's partition, newest first.
    ///
    /// The index is stored ascending by `(upload_timestamp, image_id)`; the
    /// scan is reversed explicitly and resumes strictly below the cursor.
    pub async fn query_by_owner(
        &self,
        query: OwnerQuery<'_>,
        limit: u32,
        cursor: Option<&PageCursor>,
    ) -> StoreResult<Page> {
        let fetch_limit = limit.max(1) as usize + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {COLUMNS} FROM {table} INDEXED BY {index} WHERE owner_id = ",
            table = self.names.table,
            index = self.names.index,
        ));
        builder.push_bind(query.owner_id);

        if let Some(start) = query.start {
            builder.push(" AND upload_timestamp >= ");
            builder.push_bind(start);
        }
        if let Some(end) = query.end {
            builder.push(" AND upload_timestamp <= ");
            builder.push_bind(end);
        }
        if let Some(cursor) = cursor {
            builder.push(" AND (upload_timestamp, image_id) < (");
            builder.push_bind(cursor.attribute("upload_timestamp")?);
            builder.push(", ");
            builder.push_bind(cursor.attribute("image_id")?);
            builder.push(")");
        }

        builder.push(" ORDER BY upload_timestamp DESC, image_id DESC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let rows: Vec<ImageRow> = builder.build_query_as().fetch_all(&self.db).await?;
        let page = paginate(rows, fetch_limit, |last| {
            PageCursor::from_pairs([
                ("owner_id", last.owner_id.as_str()),
                ("upload_timestamp", last.upload_timestamp.as_str()),
                ("image_id", last.image_id.as_str()),
            ])
        })?;

        debug!(
            "queried {} images for owner {}",
            page.records.len(),
            query.owner_id
        );
        Ok(page)
    }

    /// Walk the whole table. Callers must not rely on the order.
    pub async fn scan_all(&self, limit: u32, cursor: Option<&PageCursor>) -> StoreResult<Page> {
        let fetch_limit = limit.max(1) as usize + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {COLUMNS} FROM {table}",
            table = self.names.table
        ));
        if let Some(cursor) = cursor {
            builder.push(" WHERE image_id > ");
            builder.push_bind(cursor.attribute("image_id")?);
        }
        builder.push(" ORDER BY image_id ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let rows: Vec<ImageRow> = builder.build_query_as().fetch_all(&self.db).await?;
        let page = paginate(rows, fetch_limit, |last| {
            PageCursor::from_pairs([("image_id", last.image_id.as_str())])
        })?;

        debug!("scanned {} images", page.records.len());
        Ok(page)
    }

    /// Set `status` and `updated_at` only. Returns `false` (and changes
    /// nothing) when the record does not exist.
    pub async fn update_status(&self, image_id: &str, status: ImageStatus) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE {} SET status = ?, updated_at = ? WHERE image_id = ?",
            self.names.table
        );
        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(image_id)
            .execute(&self.db)
            .await?;

        let updated = result.rows_affected() > 0;
        if updated {
            debug!("updated status for image {} to {}", image_id, status);
        } else {
            debug!("status update for missing image {} ignored", image_id);
        }
        Ok(updated)
    }
}

/// Trim the look-ahead row and derive the continuation cursor from the last
/// row actually returned.
fn paginate(
    mut rows: Vec<ImageRow>,
    fetch_limit: usize,
    cursor_for: impl Fn(&ImageRow) -> PageCursor,
) -> StoreResult<Page> {
    let mut next_cursor = None;
    if rows.len() == fetch_limit {
        rows.pop();
        next_cursor = rows.last().map(&cursor_for);
    }

    let records = rows
        .into_iter()
        .map(into_record)
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(Page {
        records,
        next_cursor,
    })
}

fn into_record(row: ImageRow) -> StoreResult<ImageRecord> {
    let image_id = row.image_id.clone();
    ImageRecord::try_from(row).map_err(|reason| StoreError::Corrupt { image_id, reason })
}
