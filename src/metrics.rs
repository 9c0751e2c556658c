//! Prometheus counters for the gateway's hot paths

use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

lazy_static! {
    pub static ref HLS_PLAYLIST_REQUESTS: IntCounter = register_int_counter!(
        "gateway_hls_playlist_requests_total",
        "HLS playlist requests served through the reverse proxy"
    )
    .unwrap();
    pub static ref HLS_SEGMENT_REQUESTS: IntCounter = register_int_counter!(
        "gateway_hls_segment_requests_total",
        "Media segment requests proxied to the engine"
    )
    .unwrap();
    pub static ref SCRAPE_PASSES: IntCounter = register_int_counter!(
        "gateway_scrape_passes_total",
        "Completed catalog scrape passes"
    )
    .unwrap();
    pub static ref EPG_CONDENSATIONS: IntCounter = register_int_counter!(
        "gateway_epg_condensations_total",
        "EPG condensation runs"
    )
    .unwrap();
    pub static ref POOL_EVICTIONS: IntCounter = register_int_counter!(
        "gateway_pool_evictions_total",
        "Pool entries evicted to make room for new streams"
    )
    .unwrap();
}
