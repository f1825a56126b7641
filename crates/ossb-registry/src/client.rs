//! The v2 wire protocol client (`spec.md` §4.F): blob HEAD/upload,
//! manifest PUT/GET, manifest-index PUT with its existence precondition.
//! Grounded on `shipper/src/registry.rs`'s `RegistryClient` shape (a
//! `reqwest::blocking::Client` plus small per-operation methods matching
//! response status to outcome) and its `tiny_http`-based test harness.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};

use ossb_error::{BuildError, CancellationToken, CircuitBreakerMap, ErrorCategory, RetryConfig, RetryPolicy, Severity};
use ossb_secrets::SecretStore;
use ossb_types::{ImageManifest, ImageReference, ManifestIndex};

use crate::auth::{self, Auth, AuthConfigMap};
use crate::transport::{self, base_url};

/// Either shape a manifest GET can return (`spec.md` §4.F "Pull": "if it
/// is a manifest list, select the entry...").
pub enum ManifestFetch {
    Image(ImageManifest),
    Index(ManifestIndex),
}

pub struct RegistryClient {
    http: Client,
    auth_config: AuthConfigMap,
    secrets: SecretStore,
    insecure_registries: Vec<String>,
    circuits: CircuitBreakerMap,
    retry: RetryConfig,
}

impl RegistryClient {
    pub fn new(insecure_registries: Vec<String>, strict_mode: bool, auth_config: AuthConfigMap) -> Result<Self, BuildError> {
        transport::validate_insecure_list(&insecure_registries, strict_mode)?;
        let http = Client::builder()
            .user_agent(concat!("ossb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                BuildError::builder(format!("failed to build HTTP client: {e}"))
                    .category(ErrorCategory::Registry)
                    .severity(Severity::Critical)
                    .retryable(false)
                    .build()
            })?;
        Ok(Self {
            http,
            auth_config,
            secrets: SecretStore::new(),
            insecure_registries,
            circuits: CircuitBreakerMap::new(5, Duration::from_secs(30)),
            retry: RetryPolicy::Default.to_config(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy.to_config();
        self
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    fn auth_for(&self, reference: &ImageReference) -> Auth {
        auth::discover(
            reference.display_registry(),
            &self.auth_config,
            &self.secrets,
            reference.is_canonical_registry(),
        )
    }

    fn base_url(&self, reference: &ImageReference) -> String {
        base_url(reference.wire_registry(), reference.display_registry(), &self.insecure_registries)
    }

    fn apply_auth(&self, builder: reqwest::blocking::RequestBuilder, auth: &Auth) -> reqwest::blocking::RequestBuilder {
        match auth.header_value() {
            Some(header) => builder.header("Authorization", header),
            None => builder,
        }
    }

    fn registry_error(operation: &str, message: impl Into<String>) -> BuildError {
        BuildError::builder(message)
            .category(ErrorCategory::Registry)
            .operation(operation)
            .retryable(true)
            .build()
    }

    fn auth_error(operation: &str, message: impl Into<String>) -> BuildError {
        BuildError::builder(message)
            .category(ErrorCategory::Auth)
            .severity(Severity::Critical)
            .operation(operation)
            .retryable(false)
            .build()
    }

    fn validation_error(operation: &str, message: impl Into<String>) -> BuildError {
        BuildError::builder(message)
            .category(ErrorCategory::Validation)
            .severity(Severity::Critical)
            .operation(operation)
            .retryable(false)
            .build()
    }

    /// Runs `op` through this registry's circuit breaker (keyed by wire
    /// host) and retry policy, in that order — a tripped breaker rejects
    /// without ever invoking the retry loop's thunk.
    fn call<T>(&self, token: &CancellationToken, host: &str, operation: &str, mut op: impl FnMut() -> Result<T, BuildError>) -> Result<T, BuildError> {
        self.circuits.execute(host, operation, || ossb_error::retry(token, &self.retry, operation, &mut op))
    }

    /// `HEAD /v2/<repo>/blobs/<digest>`. 401 on blob HEAD is treated as
    /// absent (`spec.md` §4.F: "fresh repositories return 401 for
    /// unknown blobs"), not as an auth error.
    pub fn blob_exists(&self, token: &CancellationToken, reference: &ImageReference, digest: &str) -> Result<bool, BuildError> {
        let auth = self.auth_for(reference);
        let base = self.base_url(reference);
        let url = format!("{base}/v2/{}/blobs/{digest}", reference.repository);
        self.call(token, reference.wire_registry(), "blob-head", || {
            let resp = self
                .apply_auth(self.http.head(&url), &auth)
                .send()
                .map_err(|e| Self::registry_error("blob-head", format!("blob HEAD failed: {e}")))?;
            match resp.status() {
                StatusCode::OK => Ok(true),
                StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => Ok(false),
                StatusCode::TOO_MANY_REQUESTS => Err(Self::registry_error("blob-head", "429 rate limited")),
                s if s.is_server_error() => Err(Self::registry_error("blob-head", format!("server error {s}"))),
                s => Err(Self::registry_error("blob-head", format!("unexpected status {s}"))),
            }
        })
    }

    /// Blob upload: HEAD first and skip if present; otherwise POST to
    /// obtain an upload URL, then PUT the body with `?digest=` appended,
    /// verifying the uploaded content's digest before declaring success.
    pub fn upload_blob(&self, token: &CancellationToken, reference: &ImageReference, digest: &str, bytes: &[u8]) -> Result<(), BuildError> {
        if self.blob_exists(token, reference, digest)? {
            return Ok(());
        }
        verify_bytes_match_digest(digest, bytes)?;

        let auth = self.auth_for(reference);
        let base = self.base_url(reference);
        let init_url = format!("{base}/v2/{}/blobs/uploads/", reference.repository);
        let upload_location = self.call(token, reference.wire_registry(), "blob-upload-init", || {
            let resp = self
                .apply_auth(self.http.post(&init_url), &auth)
                .send()
                .map_err(|e| Self::registry_error("blob-upload-init", format!("upload init failed: {e}")))?;
            match resp.status() {
                StatusCode::ACCEPTED => resp
                    .headers()
                    .get("Location")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| Self::registry_error("blob-upload-init", "202 response missing Location header")),
                StatusCode::UNAUTHORIZED => Err(Self::auth_error("blob-upload-init", "401 unauthorized")),
                StatusCode::TOO_MANY_REQUESTS => Err(Self::registry_error("blob-upload-init", "429 rate limited")),
                s if s.is_server_error() => Err(Self::registry_error("blob-upload-init", format!("server error {s}"))),
                s => Err(Self::registry_error("blob-upload-init", format!("unexpected status {s}"))),
            }
        })?;

        let finalize_url = append_digest_query(&upload_location, digest);
        self.call(token, reference.wire_registry(), "blob-upload-finalize", || {
            let resp = self
                .apply_auth(self.http.put(&finalize_url), &auth)
                .header("Content-Type", "application/octet-stream")
                .header("Content-Length", bytes.len().to_string())
                .body(bytes.to_vec())
                .send()
                .map_err(|e| Self::registry_error("blob-upload-finalize", format!("upload finalize failed: {e}")))?;
            match resp.status() {
                StatusCode::CREATED => Ok(()),
                StatusCode::UNAUTHORIZED => Err(Self::auth_error("blob-upload-finalize", "401 unauthorized")),
                StatusCode::TOO_MANY_REQUESTS => Err(Self::registry_error("blob-upload-finalize", "429 rate limited")),
                s if s.is_server_error() => Err(Self::registry_error("blob-upload-finalize", format!("server error {s}"))),
                s => Err(Self::registry_error("blob-upload-finalize", format!("unexpected status {s}"))),
            }
        })
    }

    /// `PUT /v2/<repo>/manifests/<ref>`. Refuses (validation-category) to
    /// upload a manifest whose referenced blobs are not all confirmed
    /// present first.
    pub fn put_manifest(&self, token: &CancellationToken, reference: &ImageReference, manifest: &ImageManifest) -> Result<(), BuildError> {
        for descriptor in manifest.referenced_descriptors() {
            if !self.blob_exists(token, reference, &descriptor.digest)? {
                return Err(Self::validation_error(
                    "manifest-put",
                    format!("referenced blob {} is not present on the registry", descriptor.digest),
                ));
            }
        }

        let body = serde_json::to_vec(manifest).map_err(|e| {
            BuildError::builder(format!("failed to serialize manifest: {e}"))
                .category(ErrorCategory::Manifest)
                .severity(Severity::High)
                .build()
        })?;
        let auth = self.auth_for(reference);
        let base = self.base_url(reference);
        let manifest_ref = reference.effective_tag().map(str::to_string).or_else(|| reference.digest.clone()).unwrap_or_else(|| "latest".to_string());
        let url = format!("{base}/v2/{}/manifests/{manifest_ref}", reference.repository);
        let media_type = manifest.media_type.clone();
        self.call(token, reference.wire_registry(), "manifest-put", || {
            let resp = self
                .apply_auth(self.http.put(&url), &auth)
                .header("Content-Type", media_type.clone())
                .body(body.clone())
                .send()
                .map_err(|e| Self::registry_error("manifest-put", format!("manifest PUT failed: {e}")))?;
            match resp.status() {
                StatusCode::CREATED => Ok(()),
                StatusCode::UNAUTHORIZED => Err(Self::auth_error("manifest-put", "401 unauthorized")),
                StatusCode::TOO_MANY_REQUESTS => Err(Self::registry_error("manifest-put", "429 rate limited")),
                s if s.is_server_error() => Err(Self::registry_error("manifest-put", format!("server error {s}"))),
                s => Err(Self::registry_error("manifest-put", format!("unexpected status {s}"))),
            }
        })
    }

    /// `GET /v2/<repo>/manifests/<ref>`. Dispatches on the response
    /// `Content-Type` to decide whether the body is a single manifest or
    /// a manifest list.
    pub fn get_manifest(&self, token: &CancellationToken, reference: &ImageReference) -> Result<ManifestFetch, BuildError> {
        let auth = self.auth_for(reference);
        let base = self.base_url(reference);
        let manifest_ref = reference.effective_tag().map(str::to_string).or_else(|| reference.digest.clone()).unwrap_or_else(|| "latest".to_string());
        let url = format!("{base}/v2/{}/manifests/{manifest_ref}", reference.repository);
        self.call(token, reference.wire_registry(), "manifest-get", || {
            let resp = self
                .apply_auth(self.http.get(&url), &auth)
                .send()
                .map_err(|e| Self::registry_error("manifest-get", format!("manifest GET failed: {e}")))?;
            match resp.status() {
                StatusCode::OK => {
                    let content_type = resp
                        .headers()
                        .get("Content-Type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let bytes = resp.bytes().map_err(|e| Self::registry_error("manifest-get", format!("failed to read body: {e}")))?;
                    parse_manifest_body(&content_type, &bytes)
                }
                StatusCode::NOT_FOUND => Err(Self::validation_error("manifest-get", format!("manifest not found: {reference}"))),
                StatusCode::UNAUTHORIZED => Err(Self::auth_error("manifest-get", "401 unauthorized")),
                StatusCode::TOO_MANY_REQUESTS => Err(Self::registry_error("manifest-get", "429 rate limited")),
                s if s.is_server_error() => Err(Self::registry_error("manifest-get", format!("server error {s}"))),
                s => Err(Self::registry_error("manifest-get", format!("unexpected status {s}"))),
            }
        })
    }

    /// `GET /v2/<repo>/blobs/<digest>`, verified against `digest` before
    /// being returned. Used by [`crate::pull::pull`] to materialize
    /// layers.
    pub(crate) fn fetch_blob_bytes(&self, token: &CancellationToken, reference: &ImageReference, digest: &str) -> Result<Vec<u8>, BuildError> {
        let auth = self.auth_for(reference);
        let base = self.base_url(reference);
        let url = format!("{base}/v2/{}/blobs/{digest}", reference.repository);
        let bytes = self.call(token, reference.wire_registry(), "blob-get", || {
            let resp = self
                .apply_auth(self.http.get(&url), &auth)
                .send()
                .map_err(|e| Self::registry_error("blob-get", format!("blob GET failed: {e}")))?;
            match resp.status() {
                StatusCode::OK => resp.bytes().map(|b| b.to_vec()).map_err(|e| Self::registry_error("blob-get", format!("failed to read body: {e}"))),
                StatusCode::NOT_FOUND => Err(Self::validation_error("blob-get", format!("blob not found: {digest}"))),
                StatusCode::UNAUTHORIZED => Err(Self::auth_error("blob-get", "401 unauthorized")),
                StatusCode::TOO_MANY_REQUESTS => Err(Self::registry_error("blob-get", "429 rate limited")),
                s if s.is_server_error() => Err(Self::registry_error("blob-get", format!("server error {s}"))),
                s => Err(Self::registry_error("blob-get", format!("unexpected status {s}"))),
            }
        })?;
        verify_bytes_match_digest(digest, &bytes)?;
        Ok(bytes)
    }

    /// Uploads a manifest index. Precondition (scenario S6): every
    /// referenced per-platform manifest must already be retrievable by
    /// digest; a missing one is a validation-category error and no PUT
    /// to the index URL is made at all.
    pub fn put_index(&self, token: &CancellationToken, reference: &ImageReference, index: &ManifestIndex) -> Result<(), BuildError> {
        for entry in &index.entries {
            let by_digest = ImageReference::try_new(reference.registry.clone(), reference.repository.clone(), None, Some(entry.digest.clone())).map_err(|e| {
                Self::validation_error("index-put", format!("invalid platform-manifest digest {}: {e}", entry.digest))
            })?;
            match self.get_manifest(token, &by_digest) {
                Ok(_) => {}
                Err(_) => {
                    return Err(Self::validation_error(
                        "index-put",
                        format!("platform manifest {} is not present on the registry; index not uploaded", entry.digest),
                    ));
                }
            }
        }

        let body = serde_json::to_vec(index).map_err(|e| {
            BuildError::builder(format!("failed to serialize manifest index: {e}"))
                .category(ErrorCategory::Manifest)
                .severity(Severity::High)
                .build()
        })?;
        let auth = self.auth_for(reference);
        let base = self.base_url(reference);
        let manifest_ref = reference.effective_tag().map(str::to_string).or_else(|| reference.digest.clone()).unwrap_or_else(|| "latest".to_string());
        let url = format!("{base}/v2/{}/manifests/{manifest_ref}", reference.repository);
        let media_type = index.media_type.clone();
        self.call(token, reference.wire_registry(), "index-put", || {
            let resp = self
                .apply_auth(self.http.put(&url), &auth)
                .header("Content-Type", media_type.clone())
                .body(body.clone())
                .send()
                .map_err(|e| Self::registry_error("index-put", format!("index PUT failed: {e}")))?;
            match resp.status() {
                StatusCode::CREATED => Ok(()),
                StatusCode::UNAUTHORIZED => Err(Self::auth_error("index-put", "401 unauthorized")),
                StatusCode::TOO_MANY_REQUESTS => Err(Self::registry_error("index-put", "429 rate limited")),
                s if s.is_server_error() => Err(Self::registry_error("index-put", format!("server error {s}"))),
                s => Err(Self::registry_error("index-put", format!("unexpected status {s}"))),
            }
        })
    }
}

fn parse_manifest_body(content_type: &str, bytes: &[u8]) -> Result<ManifestFetch, BuildError> {
    let is_index = content_type.contains("manifest.list") || content_type.contains("image.index");
    if is_index {
        serde_json::from_slice::<ManifestIndex>(bytes)
            .map(ManifestFetch::Index)
            .map_err(|e| manifest_parse_error(&e))
    } else {
        serde_json::from_slice::<ImageManifest>(bytes)
            .map(ManifestFetch::Image)
            .map_err(|e| manifest_parse_error(&e))
    }
}

fn manifest_parse_error(e: &serde_json::Error) -> BuildError {
    BuildError::builder(format!("failed to parse manifest body: {e}"))
        .category(ErrorCategory::Manifest)
        .severity(Severity::High)
        .build()
}

fn append_digest_query(location: &str, digest: &str) -> String {
    let separator = if location.contains('?') { "&" } else { "?" };
    format!("{location}{separator}digest={digest}")
}

fn verify_bytes_match_digest(digest: &str, bytes: &[u8]) -> Result<(), BuildError> {
    let Some((algorithm, expected_hex)) = digest.split_once(':') else {
        return Err(BuildError::builder(format!("malformed digest {digest}"))
            .category(ErrorCategory::Validation)
            .severity(Severity::Critical)
            .build());
    };
    if algorithm != "sha256" {
        return Err(BuildError::builder(format!("unsupported digest algorithm {algorithm}"))
            .category(ErrorCategory::Validation)
            .severity(Severity::Critical)
            .build());
    }
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let actual = hex::encode(hasher.finalize());
    if actual != expected_hex {
        return Err(BuildError::builder(format!("blob bytes do not match digest {digest}"))
            .category(ErrorCategory::Validation)
            .severity(Severity::Critical)
            .build());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tiny_http::{Response, Server};

    fn with_server<F>(handler: F) -> (String, thread::JoinHandle<()>)
    where
        F: FnOnce(tiny_http::Request) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").expect("server");
        let addr = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            let req = server.recv().expect("request");
            handler(req);
        });
        (addr, handle)
    }

    fn test_reference(addr: &str) -> ImageReference {
        let host = addr.trim_start_matches("http://");
        ImageReference::try_new(Some(host.to_string()), "library/demo".to_string(), Some("latest".to_string()), None).unwrap()
    }

    #[test]
    fn blob_exists_true_for_200() {
        let (addr, handle) = with_server(|req| {
            req.respond(Response::empty(200)).unwrap();
        });
        let client = RegistryClient::new(vec![test_reference(&addr).wire_registry().to_string()], false, AuthConfigMap::new()).unwrap();
        let token = CancellationToken::new();
        let exists = client.blob_exists(&token, &test_reference(&addr), "sha256:aa").unwrap();
        assert!(exists);
        handle.join().unwrap();
    }

    #[test]
    fn blob_exists_false_for_401() {
        let (addr, handle) = with_server(|req| {
            req.respond(Response::empty(401)).unwrap();
        });
        let client = RegistryClient::new(vec![test_reference(&addr).wire_registry().to_string()], false, AuthConfigMap::new()).unwrap();
        let token = CancellationToken::new();
        let exists = client.blob_exists(&token, &test_reference(&addr), "sha256:aa").unwrap();
        assert!(!exists);
        handle.join().unwrap();
    }

    #[test]
    fn upload_blob_skips_put_when_blob_already_present() {
        let (addr, handle) = with_server(|req| {
            assert_eq!(req.method(), &tiny_http::Method::Head);
            req.respond(Response::empty(200)).unwrap();
        });
        let client = RegistryClient::new(vec![test_reference(&addr).wire_registry().to_string()], false, AuthConfigMap::new()).unwrap();
        let token = CancellationToken::new();
        let digest = "sha256:".to_string() + &hex::encode(Sha256::digest(b"hi"));
        client.upload_blob(&token, &test_reference(&addr), &digest, b"hi").unwrap();
        handle.join().unwrap();
    }
}
