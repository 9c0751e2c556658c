//! HTTP route handlers

pub mod admin;
pub mod health;
pub mod hls;
pub mod iptv;
pub mod xc;

use serde::Deserialize;

/// Common `?token=` query parameter for stream-token guarded routes.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}
