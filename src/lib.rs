//! # Deeptracy
//!
//! Tracks dependency analyses reported by a build pipeline: which package
//! versions each analysis installed, deduplicated into a shared catalog, and
//! which of those versions are known to be vulnerable.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use deeptracy::server::{AppState, create_router};
//! use deeptracy::store::{SqliteStore, Store};
//!
//! let store = SqliteStore::new("./data/deeptracy.db").unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(Arc::new(store)));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `deeptracy` binary. Disable with `default-features = false`.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod server;
pub mod store;
pub mod types;
