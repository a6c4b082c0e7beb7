//! Scan framework: configuration, recorder, capability traits and the
//! worker registry. This crate knows nothing about TLS; the protocol
//! engine and the concrete workers live in the `tlsprobe` crate.

pub mod caps;
pub mod config;
pub mod error;
pub mod logging;
pub mod recorder;
pub mod registry;
