//! Core type definitions used across the Livebase workspace.

pub mod id;

pub use id::*;
