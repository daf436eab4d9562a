//! Secret types for values that must never reach logs.
//!
//! `SecretString` redacts itself in `Debug`, so structs that derive `Debug`
//! stay safe to log. Reading the value requires an explicit
//! [`ExposeSecret::expose_secret`] call.

pub use secrecy::{ExposeSecret, SecretString};
