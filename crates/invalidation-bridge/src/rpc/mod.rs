//! # RPC Handler Surface
//!
//! The node-local entry points the RPC substrate invokes for remote
//! invalidation delivery. Swapping substrate or wire format only touches
//! this module.

mod handler;

pub use handler::RpcHandlerSurface;
