//! Category name <-> dense XC category id mapping

use sqlx::SqlitePool;

use crate::db::models::CategoryRow;

/// Get the XC category id for a name, allocating one on first sight.
/// Ids are never reused.
pub async fn id_for_category(pool: &SqlitePool, category: &str) -> Result<i64, sqlx::Error> {
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT xc_category_id FROM category_xc WHERE category = ?")
            .bind(category)
            .fetch_optional(pool)
            .await?;

    if let Some((id,)) = existing {
        return Ok(id);
    }

    let result = sqlx::query("INSERT INTO category_xc (category) VALUES (?)")
        .bind(category)
        .execute(pool)
        .await?;

    let id = result.last_insert_rowid();
    tracing::debug!("Allocated XC category id {} for '{}'", id, category);
    Ok(id)
}

pub async fn name_for_id(pool: &SqlitePool, xc_category_id: i64) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT category FROM category_xc WHERE xc_category_id = ?")
            .bind(xc_category_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(category,)| category))
}

pub async fn all(pool: &SqlitePool) -> Result<Vec<CategoryRow>, sqlx::Error> {
    sqlx::query_as::<_, CategoryRow>("SELECT * FROM category_xc ORDER BY xc_category_id")
        .fetch_all(pool)
        .await
}
