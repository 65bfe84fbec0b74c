use crate::FORMAT_MAGIC;
use crate::error::ParseError;
use crate::model::{ContainerDocument, Field, SEPARATOR_FIELD, Section};

/// Cursor over container text that tracks 1-based line numbers
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    /// Next line without its terminator (`\n`, tolerating a trailing `\r`)
    fn next_line(&mut self) -> Option<&'a str> {
        if self.at_end() {
            return None;
        }
        let rest = &self.text[self.pos..];
        let (line, consumed) = match rest.find('\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        self.line += 1;
        Some(line.strip_suffix('\r').unwrap_or(line))
    }

    /// Field lines up to (and consuming) the next blank line
    fn read_fields(&mut self) -> Result<Vec<Field>, ParseError> {
        let mut fields = Vec::new();
        loop {
            let line_no = self.line;
            match self.next_line() {
                None | Some("") => return Ok(fields),
                Some(line) => fields.push(parse_field(line, line_no)?),
            }
        }
    }

    /// Find the next separator that ends a line and return the text before it.
    /// The cursor moves past the separator and its line break.
    fn take_until_separator(&mut self, separator: &str) -> Option<&'a str> {
        let rest = &self.text[self.pos..];
        let mut from = 0;
        while let Some(found) = rest[from..].find(separator) {
            let start = from + found;
            let end = start + separator.len();
            let after = &rest[end..];
            let terminator = if after.is_empty() {
                Some(0)
            } else if after.starts_with('\n') {
                Some(1)
            } else if after.starts_with("\r\n") {
                Some(2)
            } else {
                None
            };

            if let Some(term_len) = terminator {
                let before = &rest[..start];
                self.line += before.matches('\n').count() + usize::from(term_len > 0);
                self.pos += end + term_len;
                return Some(before);
            }
            from = start + 1;
        }
        None
    }
}

/// `name: value`, splitting at the first colon and dropping one optional space
fn parse_field(line: &str, line_no: usize) -> Result<Field, ParseError> {
    let (name, value) = line
        .split_once(':')
        .ok_or(ParseError::InvalidFieldLine { line: line_no })?;
    if name.is_empty() {
        return Err(ParseError::InvalidFieldLine { line: line_no });
    }
    let value = value.strip_prefix(' ').unwrap_or(value);
    Ok(Field {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Decode container text back into a document
pub fn parse(text: &str) -> Result<ContainerDocument, ParseError> {
    let mut cursor = Cursor::new(text);

    let version_line = cursor.next_line().unwrap_or_default();
    let minor_version = version_line
        .strip_prefix(FORMAT_MAGIC)
        .and_then(|minor| minor.trim().parse::<u32>().ok())
        .ok_or_else(|| ParseError::UnsupportedVersion(version_line.to_string()))?;

    let mut header = cursor.read_fields()?;
    let separator_idx = header
        .iter()
        .position(|f| f.name.eq_ignore_ascii_case(SEPARATOR_FIELD))
        .ok_or(ParseError::MissingSeparator)?;
    let separator = header.remove(separator_idx).value;
    if separator.is_empty() {
        return Err(ParseError::MissingSeparator);
    }

    let mut sections = Vec::new();
    if cursor.take_until_separator(&separator).is_none() {
        return Ok(ContainerDocument::from_parts(minor_version, header, sections));
    }

    while !cursor.at_end() {
        let fields = cursor.read_fields()?;
        let content = match cursor.take_until_separator(&separator) {
            Some(content) => content,
            // Truncated file: keep whatever content is left
            None => {
                let rest = &cursor.text[cursor.pos..];
                cursor.pos = cursor.text.len();
                rest
            }
        };
        if fields.is_empty() && content.is_empty() {
            break;
        }
        sections.push(Section::from_parts(fields, content.to_string()));
    }

    Ok(ContainerDocument::from_parts(minor_version, header, sections))
}
