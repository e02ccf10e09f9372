//! Shared wire types for the masterclaw CLI runtime.
//!
//! Every crate in the workspace depends on this one so that a
//! [`CorrelationId`], an [`ExitCode`], or an [`McError`] kind means the same
//! thing no matter which layer produced or consumed it.

pub mod context;
pub mod correlation;
pub mod error;
pub mod exit_code;

pub use context::CommandContext;
pub use context::OutputMode;
pub use correlation::CorrelationId;
pub use error::ErrorKind;
pub use error::McError;
pub use exit_code::ExitCode;
