//! Client-side consistency layer for an offline-capable ticketing client.
//!
//! Reads go through an owner-partitioned cache-aside layer, writes
//! propagate into every cached view of a ticket, offline writes are queued
//! durably and applied optimistically, and push events mark affected views
//! stale.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod offline;
pub mod query;
pub mod realtime;
pub mod session;
pub mod tickets;
