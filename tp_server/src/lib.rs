//! HTTP server for the table pool.
//!
//! Exposes table creation, listing, invites and joins over a JSON API and
//! runs the consolidation sweeper in the background.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
