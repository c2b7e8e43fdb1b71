//! API module
//!
//! This module provides the outward facing parts of klaris: the gateways to
//! the external agent and upload services, and the HTTP server for the UI.

pub mod gateway;
pub mod server;

// Re-export commonly used types
pub use gateway::{
    AgentGateway, GatewayConfig, GatewayError, HttpAgentGateway, HttpUploadGateway, UploadGateway,
};
pub use server::{router, serve, AppState, ServerConfig};
