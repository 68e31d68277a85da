//! Kiln - Multi-stage container build pipeline
//!
//! Builds isolated stages (builder, test, development, production) from
//! a pinned lock artifact, with content-addressed layer caching and
//! quality gates between testing and release.

pub mod artifact;
pub mod assemble;
pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod health;
pub mod input;
pub mod installer;
pub mod lock;
pub mod pipeline;
pub mod stage;
pub mod ui;

pub use error::{KilnError, KilnResult};
