//! IPC (Inter-Process Communication) Module
//!
//! The caller-facing surface a UI shell binds to: plain async command
//! functions returning `Result<T, ErrorPayload>`, and the events pushed back
//! through an [`EventEmitter`].

mod commands;
mod events;

pub use commands::*;
pub use events::*;
