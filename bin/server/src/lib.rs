//! Host web server for the Casdoor single sign-on flow.
//!
//! Wires the `casdoor-sso-relying-party` flow into axum routes backed by
//! Postgres account and session stores.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
