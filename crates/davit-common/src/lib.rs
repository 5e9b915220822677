//! Common types and utilities for Davit
//!
//! This crate defines the error type, the virtual path representation,
//! MIME classification rules, and configuration structures shared by all
//! Davit components.

pub mod config;
pub mod error;
pub mod mime;
pub mod path;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use path::VirtualPath;
