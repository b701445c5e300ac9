//! Read-only export client for the Kindly statistics API.
//!
//! A [`client::StatsClient`] talks to the API through a pluggable transport and
//! a self-refreshing [`auth::CredentialCache`]; an [`export::Exporter`] splits
//! a [`filter::Filter`] into per-day, per-source sub-queries and merges their
//! rows into a [`export::Table`] in a fixed order.

pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod csv;
pub mod error;
pub mod export;
pub mod filter;
pub mod server;
pub mod types;

#[cfg(test)]
mod testing;
