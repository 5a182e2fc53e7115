//! # kestrel-rpc-core
//!
//! This crate provides the core utilities for `kestrel-rpc`.
//! It includes the error kinds, configs, message bodies, the extension registry and the
//! contracts each kind of extension implements.

pub mod balance;
pub mod codec;
mod config;
pub use config::*;
pub mod error;
pub mod extension;
pub mod message;
pub mod registry;
