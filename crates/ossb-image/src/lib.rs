//! Layer diffing and packaging, config/manifest/index assembly, and
//! content addressing (`spec.md` §4.E — Component E).

mod config;
mod index;
mod layer;
mod manifest;
mod snapshot;

pub use config::{HealthCheck, HistoryEntry, ImageConfig, RootFs, RuntimeConfig};
pub use index::assemble_index;
pub use layer::{package_layer, PackagedLayer};
pub use manifest::{assemble_manifest, verify_descriptor_bytes};
pub use snapshot::{diff, snapshot, whiteout_name, Diff, EntryKind, FileMeta, FileSnapshot, OPAQUE_WHITEOUT_NAME};
