//! Real-time session synchronization for a shared code editor.
//!
//! Clients connect over `/ws`, create or join a session, and exchange
//! document and cursor updates. The document is last-write-wins: every
//! accepted `code:change` replaces code and language wholesale.

pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod state;
pub mod websocket;
pub mod ws;

pub use config::Config;
pub use routes::create_app;
pub use state::AppState;
