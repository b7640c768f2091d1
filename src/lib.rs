//! Fetches upstream source trees once and builds them into shared libraries,
//! following a KDL pipeline manifest.

pub mod definition;
pub mod engine;
pub mod template;
mod utils;

pub use definition::{load_pipeline, Pipeline, BUILTIN_PIPELINE};
pub use engine::settings::{EngineSettings, Jobs};
pub use engine::Engine;
