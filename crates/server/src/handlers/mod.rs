//! HTTP request handlers.

pub mod admin;
pub mod packages;

pub use admin::*;
pub use packages::*;
