//! Core domain + application logic for the post dispatcher.
//!
//! This crate is intentionally platform-agnostic. Reddit / GitHub live behind
//! ports (traits) implemented in adapter crates.

pub mod analytics;
pub mod config;
pub mod content;
pub mod context;
pub mod credentials;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod hosting;
pub mod logging;
pub mod platform;
pub mod scheduler;
pub mod utils;
pub mod webhook;

pub use errors::{Error, Result};
