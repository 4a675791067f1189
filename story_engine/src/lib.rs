//! # Story Engine
//!
//! Dependency tracking and visibility for branching story paths.
//!
//! A [`StoryPath`] is built from a parsed document: its cards, the
//! conditions that decide which of them are visible, and the edges those
//! conditions imply. Writing a field re-evaluates only the cards downstream
//! of it and reports the result as ordered [`ChangeEvent`]s. A [`Story`]
//! holds the current story path together with the ones it links to, loads
//! new ones through a [`DocumentSource`] and relays changes between them.
//!
//! Display text may embed field placeholders such as `name::value`, which
//! the [`Resolver`] substitutes on every read.

pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod reference;
pub mod story;
pub mod story_path;

pub use config::*;
pub use error::*;
pub use events::*;
pub use loader::*;
pub use reference::*;
pub use story::*;
pub use story_path::*;
