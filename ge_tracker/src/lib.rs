//! GE Tracker - Grand Exchange price cache
//!
//! Pulls the OSRS Wiki latest price snapshot on a schedule, stores it in SQLite
//! and serves point lookups, time-windowed history and name search without
//! hammering the upstream API.

pub mod config;
pub mod database;
pub mod directory;
pub mod error;
pub mod models;
pub mod refresh;
pub mod scheduler;
pub mod search;
pub mod service;
pub mod web;
pub mod wiki;

pub use config::TrackerConfig;
pub use database::Store;
pub use error::{Result, TrackerError};
pub use models::{HistoryPoint, Item, ItemPrice, PricePoint, RefreshReport, SystemStatus};
pub use refresh::{RefreshOrchestrator, RefreshOutcome};
pub use service::PriceService;
pub use wiki::{CatalogItem, WikiClient};
