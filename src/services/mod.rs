//! Long-lived services owned by the application state

pub mod catalog;
pub mod epg;
pub mod hls_proxy;
pub mod pool;
pub mod quality;
pub mod remote_settings;
pub mod scraper;
pub mod token;
