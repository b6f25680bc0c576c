//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Freeze a program from its manifest
//! - `show` - Display configuration or archive contents
//! - `extract` - Pull an entry out of an archive
//! - `clean` - Remove build artifacts

pub mod build;
pub mod clean;
pub mod extract;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use extract::cmd_extract;
pub use show::cmd_show;
