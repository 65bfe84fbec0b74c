//! ConsoleLogSaverData container format
//!
//! This crate provides the in-memory model of a log bundle (header fields plus
//! ordered sections), the builders that enforce field naming rules, the
//! writer that renders the self-delimiting text form, and a decoder for it.

mod error;
mod model;
mod reader;
mod writer;

pub use error::{FormatError, ParseError};
pub use model::{ContainerDocument, DocumentBuilder, Field, Section, SectionBuilder};
pub use reader::parse;
pub use writer::{Separator, render, render_with_separator};

/// First line prefix of every container
pub const FORMAT_MAGIC: &str = "ConsoleLogSaverData/1.";
