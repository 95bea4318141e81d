//! HTTP control plane for the gadget service

pub mod handlers;
pub mod routes;

pub use routes::create_router;
