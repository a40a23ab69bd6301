//! Application construction.
//!
//! [`builder`] turns pipeline descriptions into applications; [`loader`]
//! decides which description to evaluate and memoizes the result.

pub mod builder;
pub mod loader;

pub use builder::{BuildError, Builder, TomlBuilder};
pub use loader::{resolve_config, ApplicationLoader, LoadError};
