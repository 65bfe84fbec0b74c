use crate::error::FormatError;

/// Reserved header field carrying the per-render separator token
pub(crate) const SEPARATOR_FIELD: &str = "Separator";

/// Reserved section field carrying the section's content type
pub(crate) const CONTENT_FIELD: &str = "Content";

/// A single `Name: value` pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Field {
    pub(crate) fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered field list with one reserved (case-insensitive) name
#[derive(Clone, Debug)]
struct FieldList {
    reserved: &'static str,
    fields: Vec<Field>,
}

impl FieldList {
    fn new(reserved: &'static str) -> Self {
        Self {
            reserved,
            fields: Vec::new(),
        }
    }

    fn add(&mut self, name: &str, value: &str, sanitize: bool) -> Result<(), FormatError> {
        if name.eq_ignore_ascii_case(self.reserved) {
            return Err(FormatError::InvalidField {
                name: name.to_string(),
                reason: "reserved field name",
            });
        }
        self.force_add(name, value, sanitize)
    }

    fn force_add(&mut self, name: &str, value: &str, sanitize: bool) -> Result<(), FormatError> {
        if !is_valid_field_name(name) {
            return Err(FormatError::InvalidField {
                name: name.to_string(),
                reason: "name must be non-empty token characters",
            });
        }

        let value = if value.contains(['\r', '\n']) {
            if !sanitize {
                return Err(FormatError::InvalidField {
                    name: name.to_string(),
                    reason: "value contains a line break",
                });
            }
            fold_line_breaks(value)
        } else {
            value.to_string()
        };

        self.fields.push(Field::new(name, value));
        Ok(())
    }
}

/// Field names are HTTP-style tokens
pub(crate) fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(
                    c,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

fn is_valid_content_type(content_type: &str) -> bool {
    !content_type.is_empty()
        && content_type
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_'))
}

/// Replace every `\r\n`, `\r` and `\n` with a single space
fn fold_line_breaks(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

// ============================================================================
// Section
// ============================================================================

/// One content record: fields (first is always `Content`) and a raw blob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    fields: Vec<Field>,
    content: String,
}

impl Section {
    pub(crate) fn from_parts(fields: Vec<Field>, content: String) -> Self {
        Self { fields, content }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Value of the leading `Content` field, if this section has one
    pub fn content_type(&self) -> Option<&str> {
        self.fields
            .first()
            .filter(|f| f.name.eq_ignore_ascii_case(CONTENT_FIELD))
            .map(|f| f.value.as_str())
    }

    /// First field with the given name (case-insensitive)
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }
}

/// Builder for a [`Section`]
#[derive(Clone, Debug)]
pub struct SectionBuilder {
    fields: FieldList,
    content: String,
}

impl SectionBuilder {
    /// Start a section tagged with `content_type` (`[-._0-9A-Za-z]+`)
    pub fn new(content_type: &str) -> Result<Self, FormatError> {
        if !is_valid_content_type(content_type) {
            return Err(FormatError::InvalidContentType(content_type.to_string()));
        }
        let mut fields = FieldList::new(CONTENT_FIELD);
        fields.force_add(CONTENT_FIELD, content_type, false)?;
        Ok(Self {
            fields,
            content: String::new(),
        })
    }

    pub fn add_field(&mut self, name: &str, value: &str) -> Result<&mut Self, FormatError> {
        self.fields.add(name, value, false)?;
        Ok(self)
    }

    /// Like [`add_field`](Self::add_field) but folds line breaks into spaces
    pub fn add_field_sanitized(&mut self, name: &str, value: &str) -> Result<&mut Self, FormatError> {
        self.fields.add(name, value, true)?;
        Ok(self)
    }

    /// Append raw content; it is written verbatim
    pub fn push_content(&mut self, content: &str) -> &mut Self {
        self.content.push_str(content);
        self
    }

    pub fn build(&self) -> Section {
        Section::from_parts(self.fields.fields.clone(), self.content.clone())
    }
}

// ============================================================================
// Document
// ============================================================================

/// Immutable log bundle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerDocument {
    minor_version: u32,
    header: Vec<Field>,
    sections: Vec<Section>,
}

impl ContainerDocument {
    pub(crate) fn from_parts(minor_version: u32, header: Vec<Field>, sections: Vec<Section>) -> Self {
        Self {
            minor_version,
            header,
            sections,
        }
    }

    pub fn minor_version(&self) -> u32 {
        self.minor_version
    }

    /// Header fields in insertion order (never includes `Separator`)
    pub fn header(&self) -> &[Field] {
        &self.header
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// All values of a header field (case-insensitive), in order
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.header
            .iter()
            .filter(move |f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }
}

/// Builder for a [`ContainerDocument`]
#[derive(Clone, Debug)]
pub struct DocumentBuilder {
    minor_version: u32,
    fields: FieldList,
    sections: Vec<Section>,
}

impl DocumentBuilder {
    pub fn new(minor_version: u32) -> Self {
        Self {
            minor_version,
            fields: FieldList::new(SEPARATOR_FIELD),
            sections: Vec::new(),
        }
    }

    pub fn add_field(&mut self, name: &str, value: &str) -> Result<&mut Self, FormatError> {
        self.fields.add(name, value, false)?;
        Ok(self)
    }

    /// Like [`add_field`](Self::add_field) but folds line breaks into spaces
    pub fn add_field_sanitized(&mut self, name: &str, value: &str) -> Result<&mut Self, FormatError> {
        self.fields.add(name, value, true)?;
        Ok(self)
    }

    pub fn add_section(&mut self, section: Section) -> &mut Self {
        self.sections.push(section);
        self
    }

    pub fn header(&self) -> &[Field] {
        &self.fields.fields
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Snapshot the current state; later builder changes do not affect it
    pub fn build(&self) -> ContainerDocument {
        ContainerDocument::from_parts(
            self.minor_version,
            self.fields.fields.clone(),
            self.sections.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_invalid_field_names() {
        let mut builder = DocumentBuilder::new(0);
        assert!(builder.add_field("", "x").is_err());
        assert!(builder.add_field("Has Space", "x").is_err());
        assert!(builder.add_field("Colon:", "x").is_err());
        assert!(builder.add_field("Unity-Version", "2022.3.1f1").is_ok());
        assert!(builder.add_field("x!#$%&'*+-.^_`|~9", "ok").is_ok());
    }

    #[test]
    fn test_rejects_reserved_header_name() {
        let mut builder = DocumentBuilder::new(0);
        assert!(matches!(
            builder.add_field("Separator", "x"),
            Err(FormatError::InvalidField { .. })
        ));
        assert!(builder.add_field("SEPARATOR", "x").is_err());
        // "Content" is only reserved inside sections
        assert!(builder.add_field("Content", "x").is_ok());
    }

    #[test]
    fn test_section_seeds_content_field() {
        let mut section = SectionBuilder::new("log-element").unwrap();
        section.add_field("Mode", "Log").unwrap();
        assert!(section.add_field("content", "other").is_err());
        let section = section.build();
        assert_eq!(section.content_type(), Some("log-element"));
        assert_eq!(section.fields()[0].name, "Content");
        assert_eq!(section.field("mode"), Some("Log"));
    }

    #[test]
    fn test_rejects_invalid_content_type() {
        assert_eq!(
            SectionBuilder::new("").unwrap_err(),
            FormatError::InvalidContentType(String::new())
        );
        assert!(SectionBuilder::new("log element").is_err());
        assert!(SectionBuilder::new("log/element").is_err());
        assert!(SectionBuilder::new("log-element_1.x").is_ok());
    }

    #[test]
    fn test_line_break_rejected_without_sanitize() {
        let mut builder = DocumentBuilder::new(0);
        assert!(builder.add_field("Name", "a\nb").is_err());
        assert!(builder.add_field("Name", "a\rb").is_err());
        assert!(builder.header().is_empty());
    }

    #[test]
    fn test_sanitize_folds_each_break_to_one_space() {
        let mut builder = DocumentBuilder::new(0);
        builder.add_field_sanitized("Name", "a\r\nb\rc\nd").unwrap();
        assert_eq!(builder.header()[0].value, "a b c d");
    }

    #[test]
    fn test_build_is_a_snapshot() {
        let mut builder = DocumentBuilder::new(0);
        builder.add_field("A", "1").unwrap();
        let doc = builder.build();
        builder.add_field("B", "2").unwrap();
        builder.add_section(SectionBuilder::new("x").unwrap().build());
        assert_eq!(doc.header().len(), 1);
        assert!(doc.sections().is_empty());
    }

    #[test]
    fn test_duplicate_names_keep_order() {
        let mut builder = DocumentBuilder::new(0);
        builder.add_field("Hidden-Data", "user-name").unwrap();
        builder.add_field("Hidden-Data", "user-home").unwrap();
        let doc = builder.build();
        let values: Vec<_> = doc.header_values("hidden-data").collect();
        assert_eq!(values, vec!["user-name", "user-home"]);
    }

    proptest! {
        #[test]
        fn prop_sanitized_values_have_no_line_breaks(value in "[a-z\r\n ]{0,40}") {
            let mut builder = DocumentBuilder::new(0);
            builder.add_field_sanitized("Name", &value).unwrap();
            let stored = &builder.header()[0].value;
            prop_assert!(!stored.contains('\r') && !stored.contains('\n'));
            prop_assert_eq!(stored, &value.replace("\r\n", " ").replace(['\r', '\n'], " "));
        }

        #[test]
        fn prop_strict_add_rejects_any_line_break(prefix in "[a-z]{0,10}", brk in "(\r\n|\r|\n)", suffix in "[a-z]{0,10}") {
            let mut builder = DocumentBuilder::new(0);
            let value = format!("{prefix}{brk}{suffix}");
            let rejected = matches!(builder.add_field("Name", &value), Err(FormatError::InvalidField { .. }));
            prop_assert!(rejected);
        }
    }
}
