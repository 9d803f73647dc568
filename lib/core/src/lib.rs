//! Core types shared by the casdoor-sso crates.
//!
//! This crate provides the strongly-typed identifiers and the error
//! handling foundation used by the relying-party library and the host
//! server.

pub mod error;
pub mod id;

pub use error::{Result, StoreError};
pub use id::{AccountId, FlowId, ParseIdError};
