//! Core domain + application logic for the Slack/Twitter bridge bot.
//!
//! This crate is intentionally transport-agnostic. Slack and Twitter live
//! behind ports (traits) implemented in adapter crates.

pub mod commands;
pub mod config;
pub mod controller;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod relay;
pub mod replies;
pub mod session;
pub mod utils;

pub use errors::{Error, Result};
