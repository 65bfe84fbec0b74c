//! Console log collection for console-log-saver
//!
//! Drives one paused scope on a remote editor and turns what it reads into
//! a redacted [`ContainerDocument`](cls_format::ContainerDocument).

mod collector;
mod error;
mod manifest;
mod unity;

pub use collector::{Collector, VENDOR};
pub use error::CollectError;
pub use manifest::{FsManifestReader, LockedPackage, ManifestReader};
