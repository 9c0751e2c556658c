//! Repository layer: one module per table, plain functions over the pool.
//!
//! All writes run inside short implicit transactions; nothing here holds a
//! connection across await points outside a single statement.

pub mod categories;
pub mod infohash;
pub mod quality;
pub mod streams;
pub mod users;
