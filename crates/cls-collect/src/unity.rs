//! Typed access to the editor-side types read while paused

use cls_remote::{PausedScope, RemoteValue, Result, TypeRef};
use cls_types::{ConsoleFlags, LogMode};

const APPLICATION: TypeRef<'static> = TypeRef::in_assembly("UnityEngine.CoreModule", "UnityEngine.Application");
const BUILD_SETTINGS: TypeRef<'static> = TypeRef::in_assembly("UnityEditor", "UnityEditor.EditorUserBuildSettings");
const LOG_ENTRIES: TypeRef<'static> = TypeRef::in_assembly("UnityEditor", "UnityEditor.LogEntries");
const LOG_ENTRY: TypeRef<'static> = TypeRef::in_assembly("UnityEditor", "UnityEditor.LogEntry");
const RUNTIME_INFORMATION: TypeRef<'static> = TypeRef::new("System.Runtime.InteropServices.RuntimeInformation");

const INT32: &str = "System.Int32";
const BOOLEAN: &str = "System.Boolean";

pub(crate) async fn unity_version(scope: &PausedScope<'_>) -> Result<String> {
    scope
        .get_static_property(APPLICATION, "unityVersion")
        .await?
        .into_string()
}

pub(crate) async fn os_description(scope: &PausedScope<'_>) -> Result<String> {
    scope
        .get_static_property(RUNTIME_INFORMATION, "OSDescription")
        .await?
        .into_string()
}

/// Raw `BuildTarget` enum value
pub(crate) async fn active_build_target(scope: &PausedScope<'_>) -> Result<i32> {
    scope
        .get_static_property(BUILD_SETTINGS, "activeBuildTarget")
        .await?
        .as_i32()
}

/// `UnityEditor.LogEntries`, the console's backing store
pub(crate) struct LogEntries<'a, 's> {
    scope: &'a PausedScope<'s>,
}

impl<'a, 's> LogEntries<'a, 's> {
    pub(crate) fn new(scope: &'a PausedScope<'s>) -> Self {
        Self { scope }
    }

    pub(crate) async fn console_flags(&self) -> Result<ConsoleFlags> {
        let bits = self
            .scope
            .get_static_property(LOG_ENTRIES, "consoleFlags")
            .await?
            .as_i32()?;
        Ok(ConsoleFlags(bits as u32))
    }

    pub(crate) async fn set_console_flags(&self, flags: ConsoleFlags) -> Result<()> {
        self.scope
            .call_static_method(
                LOG_ENTRIES,
                "set_consoleFlags",
                &[INT32],
                &[RemoteValue::I32(flags.bits() as i32)],
            )
            .await
            .map(|_| ())
    }

    pub(crate) async fn set_console_flag(&self, flag: ConsoleFlags, enabled: bool) -> Result<()> {
        self.scope
            .call_static_method(
                LOG_ENTRIES,
                "SetConsoleFlag",
                &[INT32, BOOLEAN],
                &[RemoteValue::I32(flag.bits() as i32), RemoteValue::Bool(enabled)],
            )
            .await
            .map(|_| ())
    }

    /// Returns the number of rows available until `end_getting_entries`
    pub(crate) async fn start_getting_entries(&self) -> Result<usize> {
        let rows = self
            .scope
            .call_static_method(LOG_ENTRIES, "StartGettingEntries", &[], &[])
            .await?
            .as_i32()?;
        Ok(usize::try_from(rows).unwrap_or(0))
    }

    pub(crate) async fn end_getting_entries(&self) -> Result<()> {
        self.scope
            .call_static_method(LOG_ENTRIES, "EndGettingEntries", &[], &[])
            .await
            .map(|_| ())
    }

    /// Fill `entry` with row `index`
    pub(crate) async fn get_entry(&self, index: usize, entry: &LogEntry) -> Result<()> {
        self.scope
            .call_static_method(
                LOG_ENTRIES,
                "GetEntryInternal",
                &[INT32, LOG_ENTRY.name],
                &[RemoteValue::I32(index as i32), entry.object.clone()],
            )
            .await
            .map(|_| ())
    }
}

/// A `UnityEditor.LogEntry` instance living in the target
pub(crate) struct LogEntry {
    object: RemoteValue,
}

impl LogEntry {
    pub(crate) async fn new(scope: &PausedScope<'_>) -> Result<Self> {
        let object = scope.construct_instance(LOG_ENTRY).await?;
        object.as_object()?;
        Ok(Self { object })
    }

    pub(crate) async fn mode(&self, scope: &PausedScope<'_>) -> Result<LogMode> {
        let bits = scope.get_instance_field(&self.object, "mode").await?.as_i32()?;
        Ok(LogMode(bits as u32))
    }

    pub(crate) async fn message(&self, scope: &PausedScope<'_>) -> Result<String> {
        scope
            .get_instance_field(&self.object, "message")
            .await?
            .into_string()
    }
}
