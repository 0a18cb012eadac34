//! Repository backends.

pub mod filesystem;
