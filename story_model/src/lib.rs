//! # Story Model
//!
//! The data crate for story paths - cards, their typed fields, dependency
//! conditions and the parsed document structure a story path is built from.
//! This crate holds no graph logic: it describes what a story path contains,
//! and `story_engine` decides what is visible.

pub mod cards;
pub mod conditions;
pub mod document;
pub mod error;

pub use cards::*;
pub use conditions::*;
pub use document::*;
pub use error::*;
