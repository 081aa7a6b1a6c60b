pub mod config;
pub mod context;
pub mod ingest;
pub mod materialize;
pub mod query;
pub mod repository;
pub mod schema;

#[cfg(test)]
pub(crate) mod testutils;
