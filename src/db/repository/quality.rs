//! Persisted quality scores (`ace_quality_cache` table)

use sqlx::SqlitePool;

use crate::db::models::QualityRow;

pub async fn get(
    pool: &SqlitePool,
    content_id: &str,
) -> Result<Option<QualityRow>, sqlx::Error> {
    sqlx::query_as::<_, QualityRow>("SELECT * FROM ace_quality_cache WHERE content_id = ?")
        .bind(content_id)
        .fetch_optional(pool)
        .await
}

pub async fn upsert(
    pool: &SqlitePool,
    content_id: &str,
    score: i64,
    has_ever_worked: bool,
    m3u_failures: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ace_quality_cache (content_id, score, has_ever_worked, m3u_failures)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(content_id) DO UPDATE SET
            score = excluded.score,
            has_ever_worked = excluded.has_ever_worked,
            m3u_failures = excluded.m3u_failures
        "#,
    )
    .bind(content_id)
    .bind(score)
    .bind(has_ever_worked)
    .bind(m3u_failures)
    .execute(pool)
    .await?;

    Ok(())
}
