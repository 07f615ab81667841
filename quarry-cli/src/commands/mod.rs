//! CLI command implementations.

pub mod build;
pub mod watch;

pub use build::{run_build, BuildOptions};
pub use watch::watch_files;
