//! Catalog entry access (`ace_streams` table)

use sqlx::SqlitePool;

use crate::db::models::{NewStream, StreamRow};

/// Insert or update a catalog entry keyed by content id. The `xc_id` of an
/// existing row never changes.
pub async fn upsert(pool: &SqlitePool, stream: &NewStream) -> Result<(), sqlx::Error> {
    let sites = serde_json::to_string(&stream.sites_found_on).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        r#"
        INSERT INTO ace_streams
            (content_id, infohash, title, tvg_id, tvg_logo, group_title, sites_found_on, last_scraped_time)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(content_id) DO UPDATE SET
            infohash = excluded.infohash,
            title = excluded.title,
            tvg_id = excluded.tvg_id,
            tvg_logo = excluded.tvg_logo,
            group_title = excluded.group_title,
            sites_found_on = excluded.sites_found_on,
            last_scraped_time = excluded.last_scraped_time
        "#,
    )
    .bind(&stream.content_id)
    .bind(&stream.infohash)
    .bind(&stream.title)
    .bind(&stream.tvg_id)
    .bind(&stream.tvg_logo)
    .bind(&stream.group_title)
    .bind(sites)
    .bind(stream.last_scraped_time)
    .execute(pool)
    .await?;

    Ok(())
}

/// All catalog entries in `xc_id` order.
pub async fn all(pool: &SqlitePool) -> Result<Vec<StreamRow>, sqlx::Error> {
    sqlx::query_as::<_, StreamRow>("SELECT * FROM ace_streams ORDER BY xc_id")
        .fetch_all(pool)
        .await
}

pub async fn find_by_content_id(
    pool: &SqlitePool,
    content_id: &str,
) -> Result<Option<StreamRow>, sqlx::Error> {
    sqlx::query_as::<_, StreamRow>("SELECT * FROM ace_streams WHERE content_id = ?")
        .bind(content_id)
        .fetch_optional(pool)
        .await
}

pub async fn content_id_by_xc_id(
    pool: &SqlitePool,
    xc_id: i64,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT content_id FROM ace_streams WHERE xc_id = ?")
            .bind(xc_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(content_id,)| content_id))
}

pub async fn content_id_by_tvg_id(
    pool: &SqlitePool,
    tvg_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT content_id FROM ace_streams WHERE tvg_id = ? ORDER BY xc_id LIMIT 1")
            .bind(tvg_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(content_id,)| content_id))
}

/// Content id recorded against this infohash in the catalog itself.
pub async fn content_id_by_infohash(
    pool: &SqlitePool,
    infohash: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT content_id FROM ace_streams WHERE infohash = ? LIMIT 1")
            .bind(infohash)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(content_id,)| content_id))
}

/// Delete an entry, returning whether a row existed.
pub async fn delete_by_content_id(
    pool: &SqlitePool,
    content_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM ace_streams WHERE content_id = ?")
        .bind(content_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
