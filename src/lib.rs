//! scrapeledger - processing-state ledger for document scrapers.
//!
//! Tracks which URLs each scraper has handled, reconciles that ledger
//! against a document archive and a search index, and pushes documents
//! into the index with their metadata.

pub mod cli;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod migrations;
pub mod models;
pub mod reconcile;
pub mod repository;
pub mod schema;
pub mod scrapers;
