//! keyturn: access/refresh token issuance with single-use refresh rotation
//! over a transactional SQLite identity store.

pub mod auth;
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
