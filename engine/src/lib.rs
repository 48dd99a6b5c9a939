//! Station Sync - a local mirror of a remote download station
//!
//! Keeps a SQLite cache of the station's tasks, transfer statistics, VPN
//! profiles and search results in step with the remote API, and exposes it
//! through a small HTTP and WebSocket surface.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod observable;
pub mod server;
pub mod session;
pub mod sync;

use crate::config::Settings;
use crate::sync::SyncEngine;
use parking_lot::RwLock;

/// Application state shared across all components
pub struct AppState {
    pub settings: RwLock<Settings>,
    pub engine: SyncEngine,
}

impl AppState {
    pub fn new(settings: Settings, engine: SyncEngine) -> Self {
        Self {
            settings: RwLock::new(settings),
            engine,
        }
    }
}
