//! Integration-test helpers: a small fixture HTTP server with scriptable
//! routes.

#![forbid(unsafe_code)]

mod http_server;

pub use http_server::{FixtureServer, Scripted};
