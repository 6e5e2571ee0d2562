//! HTTP and WebSocket API for the support chat server

pub mod admin_handlers;
pub mod handlers;
pub mod routes;
pub mod upload_handlers;
pub mod ws_handlers;

pub use routes::create_router;
