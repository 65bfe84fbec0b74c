//! Redaction pipeline for console-log-saver
//!
//! Replaces user-identifying fragments of exported text with `${category}`
//! placeholders and classifies package versions that may carry local paths.

mod dependency;
mod environment;
mod redactor;

pub use dependency::{UpmVersionKind, classify_upm_version};
pub use environment::UserEnvironment;
pub use redactor::Redactor;
