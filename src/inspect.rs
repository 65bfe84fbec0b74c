use std::collections::BTreeMap;
use std::fmt;

use cls_format::ContainerDocument;
use cls_types::{LogMode, LogSeverity};

/// Versions of one package as seen by each package manager
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackageVersions {
    pub upm: Option<String>,
    pub vpm: Option<String>,
}

/// What `inspect` prints about a saved log
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub vendor: Option<String>,
    pub unity_version: Option<String>,
    pub build_target: Option<String>,
    pub editor_platform: Option<String>,
    pub hidden_data: Vec<String>,
    pub packages: BTreeMap<String, PackageVersions>,
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

impl Summary {
    pub fn from_document(doc: &ContainerDocument) -> Self {
        let first = |name: &str| doc.header_values(name).next().map(str::to_string);

        let mut summary = Self {
            vendor: first("Vendor"),
            unity_version: first("Unity-Version"),
            build_target: first("Build-Target"),
            editor_platform: first("Editor-Platform"),
            hidden_data: doc.header_values("Hidden-Data").map(str::to_string).collect(),
            ..Self::default()
        };

        for dependency in doc.header_values("Upm-Dependency") {
            if let Some((name, version)) = dependency.split_once('@') {
                summary.packages.entry(name.to_string()).or_default().upm = Some(version.to_string());
            }
        }
        for dependency in doc.header_values("Vpm-Dependency") {
            if let Some((name, version)) = dependency.split_once('@') {
                summary.packages.entry(name.to_string()).or_default().vpm = Some(version.to_string());
            }
        }

        for section in doc.sections() {
            if section.content_type() != Some("log-element") {
                continue;
            }
            let mode = section
                .field("Mode-Raw")
                .and_then(|raw| u32::from_str_radix(raw, 16).ok())
                .map(LogMode)
                .unwrap_or_default();
            match mode.severity() {
                LogSeverity::Error => summary.errors += 1,
                LogSeverity::Warning => summary.warnings += 1,
                LogSeverity::Info => summary.infos += 1,
            }
        }

        summary
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = "(unknown)";
        writeln!(f, "Unity version:   {}", self.unity_version.as_deref().unwrap_or(unknown))?;
        writeln!(f, "Build target:    {}", self.build_target.as_deref().unwrap_or(unknown))?;
        writeln!(f, "Editor platform: {}", self.editor_platform.as_deref().unwrap_or("(hidden)"))?;
        if let Some(vendor) = &self.vendor {
            writeln!(f, "Saved by:        {vendor}")?;
        }
        if !self.hidden_data.is_empty() {
            writeln!(f, "Hidden data:     {}", self.hidden_data.join(", "))?;
        }

        if !self.packages.is_empty() {
            writeln!(f)?;
            writeln!(f, "Packages:")?;
            for (name, versions) in &self.packages {
                write!(f, "  {name}")?;
                if let Some(upm) = &versions.upm {
                    write!(f, "  upm {upm}")?;
                }
                if let Some(vpm) = &versions.vpm {
                    write!(f, "  vpm {vpm}")?;
                }
                writeln!(f)?;
            }
        }

        writeln!(f)?;
        writeln!(
            f,
            "Entries: {} errors, {} warnings, {} info",
            self.errors, self.warnings, self.infos
        )
    }
}
