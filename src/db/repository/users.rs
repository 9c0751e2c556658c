//! External user store surface: stream tokens only
//!
//! User management itself is out of scope; only the membership checks the
//! gateway needs are implemented here.

use sqlx::SqlitePool;

pub async fn all_stream_tokens(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT stream_token FROM users")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(token,)| token).collect())
}

/// XC auth: the password must equal the user's stream token. Returns the
/// token when the pair matches.
pub async fn stream_token_for_credentials(
    pool: &SqlitePool,
    username: &str,
    stream_token: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT stream_token FROM users WHERE username = ? AND stream_token = ?",
    )
    .bind(username)
    .bind(stream_token)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(token,)| token))
}
