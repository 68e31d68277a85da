//! CLI command implementations

pub mod artifacts;
pub mod build;
pub mod cache;
pub mod config;
pub mod init;
pub mod plan;

pub use artifacts::execute as artifacts;
pub use build::execute as build;
pub use cache::execute as cache;
pub use config::execute as config;
pub use init::execute as init;
pub use plan::execute as plan;
