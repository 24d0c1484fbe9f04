// Public API for integration tests and potential library usage

pub mod api;
pub mod config;
pub mod llm;
pub mod oracle;
pub mod protocol;
pub mod session;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;
