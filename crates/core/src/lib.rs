//! Replica Core - Fundamental types and utilities shared by every crate

mod error;
mod types;
mod idgen;

pub use error::*;
pub use types::*;
pub use idgen::*;
