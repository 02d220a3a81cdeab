//! Reelup Bridge Core
//!
//! Everything that runs without a UI shell: the CLI process bridge, local
//! file inspection, persisted settings and logging setup.

pub mod bridge;
pub mod files;
pub mod logging;
pub mod settings;
