//! Page composition and versioning for a content management system.
//!
//! Pages own a forest of positioned components stored flat in SQLite and
//! addressed by stable keys. The [`db`] module is the node store and version
//! manager, [`tree`] and [`grid`] are the pure assembly and ordering rules,
//! and [`designer`] is the optimistic editing protocol on top. [`api`]
//! exposes all of it over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod designer;
pub mod error;
pub mod grid;
pub mod models;
pub mod providers;
pub mod tree;

pub use error::{PageError, Result};
