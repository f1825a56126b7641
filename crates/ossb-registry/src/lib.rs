//! OCI v2 registry client (`spec.md` §4.F — Component F): reference-aware
//! transport selection, four-tier authenticator discovery, the minimal
//! v2 wire protocol (blob HEAD/upload, manifest PUT/GET, index PUT), and
//! pull with platform-compatible manifest-list selection.

mod auth;
mod client;
mod pull;
mod transport;

pub use auth::{Auth, AuthConfigMap};
pub use client::{ManifestFetch, RegistryClient};
pub use pull::{cache_file_name, fetch_manifest_and_cache_blobs, pull, PullProgress};
pub use transport::{scheme_for_host, validate_insecure_list};
