//! Shared types for console-log-saver
//!
//! This crate contains data structures used across multiple console-log-saver crates.

use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

// ============================================================================
// Process / Endpoint Types
// ============================================================================

/// OS process identifier of a target editor process
pub type ProcessId = u32;

/// A network address that may reach the debug agent of one target process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    /// Endpoint on the loopback interface
    pub fn localhost(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self::from)
    }
}

// ============================================================================
// Unity Console Types
// ============================================================================

/// Bit set mirroring `UnityEditor.LogEntries.consoleFlags`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ConsoleFlags(pub u32);

impl ConsoleFlags {
    pub const COLLAPSE: Self = Self(1 << 0);
    pub const CLEAR_ON_PLAY: Self = Self(1 << 1);
    pub const ERROR_PAUSE: Self = Self(1 << 2);
    pub const VERBOSE: Self = Self(1 << 3);
    pub const STOP_FOR_ASSERT: Self = Self(1 << 4);
    pub const STOP_FOR_ERROR: Self = Self(1 << 5);
    pub const AUTOSCROLL: Self = Self(1 << 6);
    pub const LOG_LEVEL_LOG: Self = Self(1 << 7);
    pub const LOG_LEVEL_WARNING: Self = Self(1 << 8);
    pub const LOG_LEVEL_ERROR: Self = Self(1 << 9);
    pub const SHOW_TIMESTAMP: Self = Self(1 << 10);
    pub const CLEAR_ON_BUILD: Self = Self(1 << 11);
    pub const CLEAR_ON_RECOMPILE: Self = Self(1 << 12);
    pub const USE_MONOSPACE_FONT: Self = Self(1 << 13);
    pub const STRIP_LOGGING_CALLSTACK: Self = Self(1 << 14);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Return a copy with `flag` set or cleared
    pub fn with(self, flag: Self, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | flag.0)
        } else {
            Self(self.0 & !flag.0)
        }
    }
}

/// Severity bits of a single console entry (`UnityEditor.LogEntry.mode`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct LogMode(pub u32);

/// Named mode bits in ascending bit order
const LOG_MODE_NAMES: &[(u32, &str)] = &[
    (1 << 0, "Error"),
    (1 << 1, "Assert"),
    (1 << 2, "Log"),
    (1 << 4, "Fatal"),
    (1 << 5, "DontPreprocessCondition"),
    (1 << 6, "AssetImportError"),
    (1 << 7, "AssetImportWarning"),
    (1 << 8, "ScriptingError"),
    (1 << 9, "ScriptingWarning"),
    (1 << 10, "ScriptingLog"),
    (1 << 11, "ScriptCompileError"),
    (1 << 12, "ScriptCompileWarning"),
    (1 << 13, "StickyError"),
    (1 << 14, "MayIgnoreLineNumber"),
    (1 << 15, "ReportBug"),
    (1 << 16, "DisplayPreviousErrorInStatusBar"),
    (1 << 17, "ScriptingException"),
    (1 << 18, "DontExtractStacktrace"),
    (1 << 19, "ShouldClearOnPlay"),
    (1 << 20, "GraphCompileError"),
    (1 << 21, "ScriptingAssertion"),
    (1 << 22, "VisualScriptingError"),
];

impl LogMode {
    pub const ERROR: u32 = 1 << 0;
    pub const ASSERT: u32 = 1 << 1;
    pub const LOG: u32 = 1 << 2;
    pub const FATAL: u32 = 1 << 4;
    pub const ASSET_IMPORT_ERROR: u32 = 1 << 6;
    pub const ASSET_IMPORT_WARNING: u32 = 1 << 7;
    pub const SCRIPTING_ERROR: u32 = 1 << 8;
    pub const SCRIPTING_WARNING: u32 = 1 << 9;
    pub const SCRIPTING_LOG: u32 = 1 << 10;
    pub const SCRIPT_COMPILE_ERROR: u32 = 1 << 11;
    pub const SCRIPT_COMPILE_WARNING: u32 = 1 << 12;
    pub const SCRIPTING_EXCEPTION: u32 = 1 << 17;
    pub const GRAPH_COMPILE_ERROR: u32 = 1 << 20;
    pub const SCRIPTING_ASSERTION: u32 = 1 << 21;

    const ERROR_MASK: u32 = Self::FATAL
        | Self::ASSERT
        | Self::ERROR
        | Self::SCRIPTING_ERROR
        | Self::ASSET_IMPORT_ERROR
        | Self::SCRIPT_COMPILE_ERROR
        | Self::GRAPH_COMPILE_ERROR
        | Self::SCRIPTING_ASSERTION
        | Self::SCRIPTING_EXCEPTION;

    const WARNING_MASK: u32 =
        Self::SCRIPT_COMPILE_WARNING | Self::SCRIPTING_WARNING | Self::ASSET_IMPORT_WARNING;

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Raw bit pattern as eight lowercase hex digits
    pub fn raw_hex(&self) -> String {
        format!("{:08x}", self.0)
    }

    /// Classify the entry the way the console window picks its icon
    pub fn severity(&self) -> LogSeverity {
        if self.0 & Self::ERROR_MASK != 0 {
            LogSeverity::Error
        } else if self.0 & Self::WARNING_MASK != 0 {
            LogSeverity::Warning
        } else {
            LogSeverity::Info
        }
    }
}

impl fmt::Display for LogMode {
    /// Flag names joined by ", "; falls back to the decimal value when
    /// unnamed bits are present or nothing is set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = LOG_MODE_NAMES.iter().fold(0, |acc, (bit, _)| acc | bit);
        if self.0 == 0 || self.0 & !named != 0 {
            return write!(f, "{}", self.0);
        }

        let mut first = true;
        for (bit, name) in LOG_MODE_NAMES {
            if self.0 & bit != 0 {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Coarse severity used for summaries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogSeverity {
    Error,
    Warning,
    Info,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// Human readable name of a `UnityEditor.BuildTarget` value
pub fn build_target_name(value: i32) -> Cow<'static, str> {
    let name = match value {
        -2 => "NoTarget",
        2 => "StandaloneOSX",
        5 => "StandaloneWindows",
        9 => "iOS",
        13 => "Android",
        19 => "StandaloneWindows64",
        20 => "WebGL",
        21 => "WSAPlayer",
        24 => "StandaloneLinux64",
        31 => "PS4",
        33 => "XboxOne",
        37 => "tvOS",
        38 => "Switch",
        44 => "PS5",
        other => return Cow::Owned(other.to_string()),
    };
    Cow::Borrowed(name)
}

// ============================================================================
// Redaction / Configuration Types
// ============================================================================

/// Category of data replaced by a placeholder in the exported log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HiddenData {
    UserName,
    UserHome,
    AwsAccessKeyIdParam,
    AssetUrl,
    SignatureParam,
}

impl HiddenData {
    /// Token used both as the placeholder body and as the `Hidden-Data` header value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserName => "user-name",
            Self::UserHome => "user-home",
            Self::AwsAccessKeyIdParam => "aws-access-key-id-param",
            Self::AssetUrl => "asset-url",
            Self::SignatureParam => "signature-param",
        }
    }

    /// Placeholder written in place of a redacted value, e.g. `${user-home}`
    pub fn placeholder(&self) -> String {
        format!("${{{}}}", self.as_str())
    }
}

impl fmt::Display for HiddenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the saver is allowed to leave in the exported log
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SaverConfig {
    pub hide_user_name: bool,
    pub hide_user_home: bool,
    pub hide_os_info: bool,
    pub hide_aws_upload_signature: bool,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            hide_user_name: true,
            hide_user_home: true,
            hide_os_info: false,
            hide_aws_upload_signature: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_mode_symbolic() {
        let mode = LogMode(LogMode::ERROR | LogMode::SCRIPTING_ERROR);
        assert_eq!(mode.to_string(), "Error, ScriptingError");
        assert_eq!(mode.raw_hex(), "00000101");
    }

    #[test]
    fn test_log_mode_unknown_bits_fall_back_to_number() {
        assert_eq!(LogMode(1 << 3).to_string(), "8");
        assert_eq!(LogMode(0).to_string(), "0");
    }

    #[test]
    fn test_log_mode_severity() {
        assert_eq!(LogMode(LogMode::SCRIPTING_EXCEPTION).severity(), LogSeverity::Error);
        assert_eq!(LogMode(LogMode::SCRIPTING_WARNING).severity(), LogSeverity::Warning);
        assert_eq!(LogMode(LogMode::SCRIPTING_LOG).severity(), LogSeverity::Info);
    }

    #[test]
    fn test_console_flags_with() {
        let flags = ConsoleFlags(0)
            .with(ConsoleFlags::COLLAPSE, true)
            .with(ConsoleFlags::LOG_LEVEL_LOG, true)
            .with(ConsoleFlags::COLLAPSE, false);
        assert!(!flags.contains(ConsoleFlags::COLLAPSE));
        assert!(flags.contains(ConsoleFlags::LOG_LEVEL_LOG));
        assert_eq!(flags.bits(), 1 << 7);
    }

    #[test]
    fn test_endpoint_parse_and_display() {
        let endpoint: Endpoint = "127.0.0.1:56123".parse().unwrap();
        assert_eq!(endpoint, Endpoint::localhost(56123));
        assert_eq!(endpoint.to_string(), "127.0.0.1:56123");
    }

    #[test]
    fn test_build_target_name() {
        assert_eq!(build_target_name(19), "StandaloneWindows64");
        assert_eq!(build_target_name(12345), "12345");
    }

    #[test]
    fn test_hidden_data_placeholder() {
        assert_eq!(HiddenData::UserHome.placeholder(), "${user-home}");
    }
}
