//! Core data model shared by every component of the builder: image
//! references, platforms, the operation/stage graph shape, and the OCI
//! descriptor/manifest/index types.
//!
//! This crate holds data only — no I/O, no retry/error-substrate behavior.
//! `FromStr`/`Display` implementations live alongside the types they parse
//! since reference and platform syntax are part of the data's own grammar,
//! not wire behavior (that's `ossb-registry`).

mod descriptor;
mod operation;
mod platform;
mod reference;

pub use descriptor::{Descriptor, ImageManifest, ManifestIndex, MediaType, PlatformManifest};
pub use operation::{
    FileAction, MetaInstruction, MultiStageContext, Operation, OperationCommon, Stage,
    StageGraphError,
};
pub use platform::Platform;
pub use reference::{ImageReference, ReferenceError};
