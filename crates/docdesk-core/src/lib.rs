//! docdesk-core: conversational messaging core for the documentation portal
//!
//! This crate provides the session/conversation store, the message log with
//! content-based dedup sync, the realtime fan-out bus, the inactivity timer,
//! the feedback collector, the link-dispatch parser and the admin
//! conversation index shared by the AI chat widget and the live agent chat.

pub mod bus;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod index;
pub mod links;
pub mod live;
pub mod message_log;
pub mod models;
pub mod paths;
pub mod reply;
pub mod schema;
pub mod store;
pub mod timer;
pub mod widget;

pub use bus::FanoutBus;
pub use config::Config;
pub use db::Database;
pub use error::Error;
pub use error::Result;
pub use store::ChatStore;
pub use widget::ChatWidget;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "docdesk";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "DOCDESK".to_string()
}
