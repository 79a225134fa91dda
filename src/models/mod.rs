//! Domain models for pagesmith.
//!
//! # Core Concepts
//!
//! - [`Page`]: A named, slugged document with a lifecycle status. Pages form
//!   their own hierarchy via `parent_id`, distinct from the component tree.
//! - [`PageComponent`]: One positioned element of a page. Components are stored
//!   flat and linked to their parent by `parent_key`; the nested form is
//!   rebuilt on demand by [`crate::tree::assemble`].
//! - [`PageVersion`]: An immutable, numbered snapshot of a page's full forest.
//!
//! Components are addressed by their durable `key`, never by the storage id,
//! so editors can refer to nodes that have not been saved yet.

mod component;
mod page;
mod version;

pub use component::*;
pub use page::*;
pub use version::*;
