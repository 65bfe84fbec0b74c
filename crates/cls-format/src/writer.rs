use std::fmt;
use std::fmt::Write as _;

use uuid::Uuid;

use crate::model::{ContainerDocument, Field, SEPARATOR_FIELD};
use crate::FORMAT_MAGIC;

const SEPARATOR_PADDING: &str = "================";

/// Boundary token between container blocks, fresh per render
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Separator(String);

impl Separator {
    /// 128 random bits as lowercase hex, padded with `=` runs
    pub fn generate() -> Self {
        Self(format!(
            "{SEPARATOR_PADDING}{}{SEPARATOR_PADDING}",
            Uuid::new_v4().simple()
        ))
    }

    /// Wrap a known token. Used for deterministic output.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialise a document with a freshly generated separator
pub fn render(doc: &ContainerDocument) -> String {
    render_with_separator(doc, &Separator::generate())
}

/// Serialise a document using the given separator.
///
/// Section content is written verbatim, so the separator line directly
/// follows the last content byte.
pub fn render_with_separator(doc: &ContainerDocument, separator: &Separator) -> String {
    let content_len: usize = doc.sections().iter().map(|s| s.content().len()).sum();
    let mut out = String::with_capacity(content_len + 256 * (doc.sections().len() + 1));

    let _ = writeln!(out, "{FORMAT_MAGIC}{}", doc.minor_version());
    let _ = writeln!(out, "{SEPARATOR_FIELD}: {separator}");
    write_fields(&mut out, doc.header());
    out.push('\n');
    let _ = writeln!(out, "{separator}");

    for section in doc.sections() {
        write_fields(&mut out, section.fields());
        out.push('\n');
        out.push_str(section.content());
        let _ = writeln!(out, "{separator}");
    }

    out
}

fn write_fields(out: &mut String, fields: &[Field]) {
    for field in fields {
        let _ = writeln!(out, "{}: {}", field.name, field.value);
    }
}
