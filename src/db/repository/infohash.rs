//! Bidirectional content_id <-> infohash mapping

use sqlx::SqlitePool;

/// Record a learned mapping. Existing mappings for either key are left alone.
pub async fn add_mapping(
    pool: &SqlitePool,
    content_id: &str,
    infohash: &str,
) -> Result<(), sqlx::Error> {
    if content_id.is_empty() || infohash.is_empty() {
        return Ok(());
    }

    sqlx::query(
        "INSERT OR IGNORE INTO content_id_infohash (content_id, infohash) VALUES (?, ?)",
    )
    .bind(content_id)
    .bind(infohash)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn content_id_for(
    pool: &SqlitePool,
    infohash: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT content_id FROM content_id_infohash WHERE infohash = ?")
            .bind(infohash)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(content_id,)| content_id))
}

pub async fn infohash_for(
    pool: &SqlitePool,
    content_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT infohash FROM content_id_infohash WHERE content_id = ?")
            .bind(content_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(infohash,)| infohash))
}
