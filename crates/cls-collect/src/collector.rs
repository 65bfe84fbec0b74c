use std::path::PathBuf;
use std::sync::Arc;

use cls_format::{ContainerDocument, DocumentBuilder, SectionBuilder};
use cls_redact::Redactor;
use cls_remote::{PausedScope, RemoteError, RemoteSession};
use cls_types::{ConsoleFlags, SaverConfig, build_target_name};
use tokio_util::sync::CancellationToken;

use crate::error::CollectError;
use crate::manifest::{FsManifestReader, LockedPackage, ManifestReader};
use crate::unity::{self, LogEntries, LogEntry};

/// Value of the `Vendor` header
pub const VENDOR: &str = concat!("ConsoleLogSaver/", env!("CARGO_PKG_VERSION"), " (cls-rs)");

const MINOR_VERSION: u32 = 0;
const LOG_ELEMENT: &str = "log-element";

/// Flags forced on while reading so that every entry is listed once
const VISIBLE_FLAGS: [(ConsoleFlags, bool); 4] = [
    (ConsoleFlags::COLLAPSE, false),
    (ConsoleFlags::LOG_LEVEL_LOG, true),
    (ConsoleFlags::LOG_LEVEL_WARNING, true),
    (ConsoleFlags::LOG_LEVEL_ERROR, true),
];

/// Reads the console of a paused editor into a redacted document.
///
/// Cheap to clone; clones share the redactor and manifest reader.
#[derive(Clone)]
pub struct Collector {
    config: SaverConfig,
    redactor: Arc<Redactor>,
    manifests: Arc<dyn ManifestReader>,
}

struct Packages {
    upm: Vec<LockedPackage>,
    vpm: Vec<LockedPackage>,
}

impl Collector {
    pub fn new(config: SaverConfig, redactor: Redactor) -> Self {
        Self {
            config,
            redactor: Arc::new(redactor),
            manifests: Arc::new(FsManifestReader),
        }
    }

    pub fn with_manifest_reader(mut self, reader: Arc<dyn ManifestReader>) -> Self {
        self.manifests = reader;
        self
    }

    pub fn config(&self) -> &SaverConfig {
        &self.config
    }

    /// Pause the target once, read everything, and build the document.
    ///
    /// Nothing is returned unless the whole pass succeeded.
    pub async fn collect(
        &self,
        session: &mut RemoteSession,
        cancel: &CancellationToken,
    ) -> Result<ContainerDocument, CollectError> {
        let root = PathBuf::from(session.project_root());
        let packages = Packages {
            upm: self.manifests.upm_locked(&root),
            vpm: self.manifests.vpm_locked(&root),
        };
        tracing::debug!(
            upm = packages.upm.len(),
            vpm = packages.vpm.len(),
            "Read project manifests"
        );

        let collector = self.clone();
        let cancel_entries = cancel.clone();
        session
            .with_paused_scope(cancel, move |scope| {
                Box::pin(async move { collector.collect_paused(scope, &packages, &cancel_entries).await })
            })
            .await
    }

    async fn collect_paused(
        &self,
        scope: &PausedScope<'_>,
        packages: &Packages,
        cancel: &CancellationToken,
    ) -> Result<ContainerDocument, CollectError> {
        let mut doc = DocumentBuilder::new(MINOR_VERSION);
        doc.add_field("Vendor", VENDOR)?;
        doc.add_field_sanitized("Unity-Version", &unity::unity_version(scope).await?)?;
        if !self.config.hide_os_info {
            doc.add_field_sanitized("Editor-Platform", &unity::os_description(scope).await?)?;
        }
        for hidden in self.redactor.hidden_data() {
            doc.add_field("Hidden-Data", hidden.as_str())?;
        }
        let target = unity::active_build_target(scope).await?;
        doc.add_field_sanitized("Build-Target", &build_target_name(target))?;

        for package in &packages.upm {
            let version = self.redactor.redact_upm_version(&package.version);
            doc.add_field_sanitized("Upm-Dependency", &format!("{}@{}", package.name, version))?;
        }
        for package in &packages.vpm {
            doc.add_field_sanitized("Vpm-Dependency", &format!("{}@{}", package.name, package.version))?;
        }

        let entries = LogEntries::new(scope);
        let saved = entries.console_flags().await?;
        let read = async {
            for (flag, enabled) in VISIBLE_FLAGS {
                entries.set_console_flag(flag, enabled).await?;
            }
            self.read_entries(scope, &entries, &mut doc, cancel).await
        }
        .await;
        let restored = entries.set_console_flags(saved).await;
        read?;
        restored?;

        let doc = doc.build();
        tracing::info!(entries = doc.sections().len(), "Collected console log");
        Ok(doc)
    }

    async fn read_entries(
        &self,
        scope: &PausedScope<'_>,
        entries: &LogEntries<'_, '_>,
        doc: &mut DocumentBuilder,
        cancel: &CancellationToken,
    ) -> Result<(), CollectError> {
        let rows = entries.start_getting_entries().await?;
        tracing::debug!(rows, "Reading console entries");

        let read = async {
            let entry = LogEntry::new(scope).await?;
            for index in 0..rows {
                if cancel.is_cancelled() {
                    return Err(RemoteError::Cancelled.into());
                }
                entries.get_entry(index, &entry).await?;
                let mode = entry.mode(scope).await?;
                let message = entry.message(scope).await?;

                let mut section = SectionBuilder::new(LOG_ELEMENT)?;
                section
                    .add_field("Mode", &mode.to_string())?
                    .add_field("Mode-Raw", &mode.raw_hex())?
                    .push_content(&self.redactor.redact(&message));
                doc.add_section(section.build());
            }
            Ok::<_, CollectError>(())
        }
        .await;
        let ended = entries.end_getting_entries().await;
        read?;
        ended?;
        Ok(())
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("config", &self.config)
            .field("redactor", &self.redactor)
            .finish_non_exhaustive()
    }
}
