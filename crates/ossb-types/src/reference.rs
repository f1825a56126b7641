use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DEFAULT_NAMESPACE: &str = "library";
const DIGEST_ALGORITHMS: &[&str] = &["sha256", "sha512", "sha1", "md5"];

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("repository name is empty")]
    EmptyRepository,
    #[error("repository name exceeds 255 characters")]
    RepositoryTooLong,
    #[error("invalid repository segment {0:?}")]
    InvalidRepositorySegment(String),
    #[error("invalid tag {0:?}")]
    InvalidTag(String),
    #[error("invalid digest {0:?}")]
    InvalidDigest(String),
    #[error("reference cannot set both a tag and a digest explicitly")]
    BothTagAndDigest,
    #[error("malformed reference {0:?}")]
    Malformed(String),
}

/// `(registry, repository, tag?, digest?)`. `registry = None` means the
/// canonical public registry (display host `docker.io`; see `ossb-registry`
/// for the wire-host rewrite to `registry-1.docker.io`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Construct a reference directly, enforcing the tag/digest exclusivity
    /// invariant (parsing instead silently prefers digest; see `FromStr`).
    pub fn try_new(
        registry: Option<String>,
        repository: String,
        tag: Option<String>,
        digest: Option<String>,
    ) -> Result<Self, ReferenceError> {
        if tag.is_some() && digest.is_some() {
            return Err(ReferenceError::BothTagAndDigest);
        }
        validate_repository(&repository)?;
        if let Some(t) = &tag {
            validate_tag(t)?;
        }
        if let Some(d) = &digest {
            validate_digest(d)?;
        }
        let (tag, digest) = normalize_tag_digest(tag, digest);
        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// `true` when this reference targets the canonical public registry
    /// (no explicit registry host was set).
    pub fn is_canonical_registry(&self) -> bool {
        self.registry.is_none()
    }

    /// Wire-level host: explicit registry if set, else the canonical
    /// registry's wire host. Display uses [`Self::display_registry`]
    /// instead.
    pub fn wire_registry(&self) -> &str {
        self.registry.as_deref().unwrap_or("registry-1.docker.io")
    }

    /// Display-level host: explicit registry if set, else `docker.io`.
    pub fn display_registry(&self) -> &str {
        self.registry.as_deref().unwrap_or("docker.io")
    }

    /// Effective tag: the explicit tag, `"latest"` when neither tag nor
    /// digest is set, or none when addressed purely by digest.
    pub fn effective_tag(&self) -> Option<&str> {
        if self.digest.is_some() {
            return None;
        }
        Some(self.tag.as_deref().unwrap_or("latest"))
    }

    /// Render in `repository[:tag]` form (no registry host), matching the
    /// format used for the "short" display form.
    pub fn format(&self) -> String {
        match (&self.tag, &self.digest) {
            (_, Some(d)) => format!("{}@{}", self.repository, d),
            (Some(t), None) => format!("{}:{}", self.repository, t),
            (None, None) => format!("{}:latest", self.repository),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.format())
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ReferenceError::EmptyRepository);
        }

        let (name_and_tag, digest) = match s.rsplit_once('@') {
            Some((name_and_tag, digest)) => {
                validate_digest(digest)?;
                (name_and_tag, Some(digest.to_string()))
            }
            None => (s, None),
        };
        if name_and_tag.is_empty() {
            return Err(ReferenceError::Malformed(s.to_string()));
        }

        let (remainder, explicit_tag) = split_tag(name_and_tag)?;

        let (registry, repository) = split_registry(remainder);

        let repository = if registry.is_none() && !repository.contains('/') {
            format!("{DEFAULT_NAMESPACE}/{repository}")
        } else {
            repository.to_string()
        };
        validate_repository(&repository)?;

        let (tag, digest) = normalize_tag_digest(explicit_tag, digest);
        if let Some(t) = &tag {
            validate_tag(t)?;
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

/// Digest preferred over tag when both are present (parsing only; see
/// `spec.md` §3: "parsing resolves this by preferring digest").
fn normalize_tag_digest(tag: Option<String>, digest: Option<String>) -> (Option<String>, Option<String>) {
    if digest.is_some() {
        (None, digest)
    } else {
        (tag, None)
    }
}

/// Split an explicit tag off the rightmost colon, applying the
/// host:port-vs-repo:tag disambiguation from `spec.md` §4.F: scan from the
/// rightmost colon, and decide based on whether a `/` appears before or
/// after it.
fn split_tag(s: &str) -> Result<(&str, Option<String>), ReferenceError> {
    let Some(colon_idx) = s.rfind(':') else {
        return Ok((s, None));
    };
    let before = &s[..colon_idx];
    let after = &s[colon_idx + 1..];

    if after.contains('/') {
        // The rightmost colon is inside a host:port that is followed by
        // more path — not a tag separator.
        return Ok((s, None));
    }

    // `before` containing a `/`, or not, both resolve to "this is a tag":
    // either we've already passed the host segment, or there was never a
    // host segment mentioned (bare `name:tag`).
    let _ = before;
    Ok((before, Some(after.to_string())))
}

/// Split an optional registry host off the front of a `name` (post
/// tag/digest stripping). A leading segment is treated as a registry host
/// when it contains `.` or `:` or is exactly `localhost`.
fn split_registry(s: &str) -> (Option<String>, &str) {
    let Some((first, rest)) = s.split_once('/') else {
        return (None, s);
    };
    if first.contains('.') || first.contains(':') || first == "localhost" {
        (Some(first.to_string()), rest)
    } else {
        (None, s)
    }
}

fn validate_repository(repo: &str) -> Result<(), ReferenceError> {
    if repo.is_empty() {
        return Err(ReferenceError::EmptyRepository);
    }
    if repo.len() > 255 {
        return Err(ReferenceError::RepositoryTooLong);
    }
    for segment in repo.split('/') {
        if segment.is_empty()
            || segment.starts_with('.')
            || segment.starts_with('-')
            || !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ReferenceError::InvalidRepositorySegment(segment.to_string()));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), ReferenceError> {
    let valid_len = !tag.is_empty() && tag.len() <= 128;
    let valid_start = !tag.starts_with('.') && !tag.starts_with('-');
    let valid_chars = tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid_len && valid_start && valid_chars {
        Ok(())
    } else {
        Err(ReferenceError::InvalidTag(tag.to_string()))
    }
}

fn validate_digest(digest: &str) -> Result<(), ReferenceError> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(ReferenceError::InvalidDigest(digest.to_string()));
    };
    if !DIGEST_ALGORITHMS.contains(&algorithm) {
        return Err(ReferenceError::InvalidDigest(digest.to_string()));
    }
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ReferenceError::InvalidDigest(digest.to_string()));
    }
    Ok(())
}
