//! Common utilities and types shared across the room client crates.

#![warn(clippy::pedantic)]

/// Module for gateway identifier types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
