//! Catalog service: cached stream snapshot and playlist generation
//!
//! Reads are served from an in-memory snapshot of the `ace_streams` table
//! that is invalidated on every write and lazily rebuilt on the next read.
//! Alternate-title markers (` #1`, ` #2`, ...) are applied when the snapshot
//! is built so duplicated titles stay distinguishable in players.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::db::models::{NewStream, StreamRow};
use crate::db::repository::{categories, streams};
use crate::util::m3u::create_extinf_line;

#[derive(Clone)]
pub struct CatalogService {
    pool: SqlitePool,
    snapshot: Arc<RwLock<Option<Arc<Vec<StreamRow>>>>>,
}

impl CatalogService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            snapshot: Arc::new(RwLock::new(None)),
        }
    }

    /// Upsert a catalog entry and invalidate the snapshot.
    pub async fn update_stream(&self, stream: &NewStream) -> Result<(), sqlx::Error> {
        streams::upsert(&self.pool, stream).await?;
        *self.snapshot.write().await = None;
        Ok(())
    }

    /// Delete an entry by content id, invalidating the snapshot when a row
    /// actually existed.
    pub async fn delete_by_content_id(&self, content_id: &str) -> Result<bool, sqlx::Error> {
        let deleted = streams::delete_by_content_id(&self.pool, content_id).await?;
        if deleted {
            tracing::info!("Deleted catalog entry for content_id {}", content_id);
            *self.snapshot.write().await = None;
        }
        Ok(deleted)
    }

    /// The cached snapshot with alternate-title marking applied.
    pub async fn streams_cached(&self) -> Result<Arc<Vec<StreamRow>>, sqlx::Error> {
        if let Some(cached) = self.snapshot.read().await.as_ref() {
            return Ok(Arc::clone(cached));
        }

        let mut rows = streams::all(&self.pool).await?;
        mark_alternate_streams(&mut rows);
        let built = Arc::new(rows);

        let mut guard = self.snapshot.write().await;
        *guard = Some(Arc::clone(&built));
        Ok(built)
    }

    /// Uncached read of every entry, in xc_id order.
    pub async fn streams_all(&self) -> Result<Vec<StreamRow>, sqlx::Error> {
        streams::all(&self.pool).await
    }

    pub async fn find_by_content_id(
        &self,
        content_id: &str,
    ) -> Result<Option<StreamRow>, sqlx::Error> {
        streams::find_by_content_id(&self.pool, content_id).await
    }

    pub async fn content_id_by_xc_id(&self, xc_id: i64) -> Result<Option<String>, sqlx::Error> {
        streams::content_id_by_xc_id(&self.pool, xc_id).await
    }

    pub async fn content_id_by_infohash(
        &self,
        infohash: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        streams::content_id_by_infohash(&self.pool, infohash).await
    }

    /// XC category id for a group title, allocated on first sight.
    pub async fn xc_category_id(&self, group_title: &str) -> Result<i64, sqlx::Error> {
        categories::id_for_category(&self.pool, group_title).await
    }

    pub async fn xc_categories_all(
        &self,
    ) -> Result<Vec<crate::db::models::CategoryRow>, sqlx::Error> {
        categories::all(&self.pool).await
    }

    /// Render the whole catalog as an IPTV M3U playlist pointing back at the
    /// gateway. Entries without a content id never reach the catalog, so
    /// every line here is playable.
    pub async fn as_iptv_playlist(
        &self,
        external_url: &str,
        token: &str,
    ) -> Result<String, sqlx::Error> {
        let base = external_url.trim_end_matches('/');
        let epg_url = format!("{base}/epg.xml");
        let header =
            format!("#EXTM3U x-tvg-url=\"{epg_url}\" url-tvg=\"{epg_url}\" refresh=\"3600\"\n");

        let mut entries: Vec<String> = Vec::new();
        for stream in self.streams_cached().await?.iter() {
            let line_one = create_extinf_line(
                &stream.title,
                &stream.tvg_id,
                stream.tvg_logo.as_deref(),
                &stream.group_title,
                external_url,
                token,
                stream.last_scraped_time.timestamp(),
            );
            let mut line_two = format!("{base}/hls/{}", stream.content_id);
            if !token.is_empty() {
                line_two.push_str(&format!("?token={token}"));
            }
            entries.push(format!("{line_one}{line_two}"));
        }

        entries.sort();
        entries.dedup();

        Ok(header + &entries.join("\n"))
    }
}

/// For identical titles, sort by xc_id and suffix each with a stream number.
fn mark_alternate_streams(rows: &mut [StreamRow]) {
    let mut by_title: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, row) in rows.iter().enumerate() {
        by_title.entry(row.title.clone()).or_default().push(index);
    }

    for indexes in by_title.into_values() {
        if indexes.len() <= 1 {
            continue;
        }

        let mut ordered = indexes;
        ordered.sort_by_key(|&index| rows[index].xc_id);

        for (n, index) in ordered.into_iter().enumerate() {
            rows[index].title.push_str(&format!(" #{}", n + 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(xc_id: i64, title: &str) -> StreamRow {
        StreamRow {
            xc_id,
            content_id: format!("{:040}", xc_id),
            infohash: None,
            title: title.to_string(),
            tvg_id: String::new(),
            tvg_logo: None,
            group_title: "General".to_string(),
            sites_found_on: "[]".to_string(),
            last_scraped_time: Utc::now(),
        }
    }

    #[test]
    fn test_mark_alternate_streams() {
        let mut rows = vec![row(3, "Chan"), row(1, "Chan"), row(2, "Other")];
        mark_alternate_streams(&mut rows);

        // Sorted by xc_id: 1 gets #1, 3 gets #2
        let titles: HashMap<i64, String> =
            rows.iter().map(|r| (r.xc_id, r.title.clone())).collect();
        assert_eq!(titles[&1], "Chan #1");
        assert_eq!(titles[&3], "Chan #2");
        assert_eq!(titles[&2], "Other");
    }

    #[test]
    fn test_unique_titles_untouched() {
        let mut rows = vec![row(1, "A"), row(2, "B")];
        mark_alternate_streams(&mut rows);
        assert_eq!(rows[0].title, "A");
        assert_eq!(rows[1].title, "B");
    }
}
