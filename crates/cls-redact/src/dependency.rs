/// Where a UPM package version points
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpmVersionKind {
    Registry,
    HttpsGit,
    SshGit,
    GitGit,
    FileGit,
    FileRelative,
    FileAbsolute,
}

impl UpmVersionKind {
    /// Whether a version of this kind may embed a local path and needs redaction
    pub fn may_contain_local_path(&self, version: &str) -> bool {
        match self {
            Self::Registry | Self::HttpsGit | Self::SshGit | Self::GitGit => false,
            Self::FileGit | Self::FileAbsolute => true,
            // Only paths escaping the project by two levels can reach the home dir
            Self::FileRelative => {
                version.starts_with("file:../..") || version.starts_with("file:..\\..")
            }
        }
    }
}

/// Classify a `packages-lock.json` version string
pub fn classify_upm_version(version: &str) -> UpmVersionKind {
    if version.starts_with("file://") || version.contains(".git") || version.starts_with("git+") {
        let url = version.strip_prefix("git+").unwrap_or(version);
        if url.starts_with("https:") {
            return UpmVersionKind::HttpsGit;
        }
        if url.starts_with("ssh:") {
            return UpmVersionKind::SshGit;
        }
        if url.starts_with("file:") {
            return UpmVersionKind::FileGit;
        }
        if url.starts_with("git:") {
            return UpmVersionKind::GitGit;
        }
    }

    if let Some(path) = version.strip_prefix("file:") {
        return if is_rooted(path) {
            UpmVersionKind::FileAbsolute
        } else {
            UpmVersionKind::FileRelative
        };
    }

    UpmVersionKind::Registry
}

/// Rooted on either platform: `/x`, `\x` or a drive letter `C:`
fn is_rooted(path: &str) -> bool {
    let bytes = path.as_bytes();
    matches!(bytes.first(), Some(b'/' | b'\\'))
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}
