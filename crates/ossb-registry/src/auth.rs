//! Authenticator discovery (`spec.md` §4.F): four tiers, first successful
//! wins. Grounded on `shipper-auth`'s `resolve_token` chain (env first,
//! then a credentials file), extended with the Docker-config and
//! mounted-secret-directory tiers this spec additionally requires.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use ossb_secrets::{SecretBytes, SecretStore};

/// Generic host key used for env/in-process lookups that apply to the
/// canonical public registry regardless of its display/wire host string.
const DOCKER_GENERIC_PREFIX: &str = "DOCKER";

/// Three standard mount points checked, in order, for tier 4. Not
/// specified verbatim by the spec beyond "one of three standard paths";
/// chosen to mirror common Kubernetes image-pull-secret conventions (see
/// `DESIGN.md`).
const SECRET_MOUNT_CANDIDATES: &[&str] = &[
    "/var/run/secrets/ossb.io/registry",
    "/etc/ossb/registry-secrets",
    "/var/run/secrets/kubernetes.io/dockerconfigjson",
];

/// The resolved authenticator for a request. `Basic`/`Bearer` carry their
/// secret material as [`SecretBytes`] so it is wiped on drop.
pub enum Auth {
    Basic { username: String, password: SecretBytes },
    Bearer { token: SecretBytes },
    Anonymous,
}

impl Auth {
    /// The literal `Authorization` header value, or `None` for anonymous
    /// (`spec.md` §4.F: "a missing authenticator yields no header").
    pub fn header_value(&self) -> Option<String> {
        match self {
            Auth::Basic { username, password } => {
                let raw = format!("{username}:{}", password.as_str().unwrap_or_default());
                Some(format!("Basic {}", base64::Engine::encode(&base64::engine::general_purpose::STANDARD, raw)))
            }
            Auth::Bearer { token } => Some(format!("Bearer {}", token.as_str().unwrap_or_default())),
            Auth::Anonymous => None,
        }
    }
}

/// Tier 1: an in-process config map keyed by registry display host.
pub type AuthConfigMap = BTreeMap<String, Auth>;

/// Runs the four-tier chain for `display_host`, registering any
/// discovered secret material in `secrets` (`spec.md` §5: "secrets live
/// in a process-local store").
pub fn discover(display_host: &str, in_process: &AuthConfigMap, secrets: &SecretStore, is_canonical: bool) -> Auth {
    if let Some(auth) = in_process.get(display_host) {
        return clone_auth(auth);
    }
    if let Some(auth) = from_env(display_host, is_canonical, secrets) {
        return auth;
    }
    if let Some(auth) = from_docker_config_file(display_host, secrets) {
        return auth;
    }
    if let Some(auth) = from_mounted_secrets(display_host, secrets) {
        return auth;
    }
    Auth::Anonymous
}

fn clone_auth(auth: &Auth) -> Auth {
    match auth {
        Auth::Basic { username, password } => Auth::Basic {
            username: username.clone(),
            password: password.clone(),
        },
        Auth::Bearer { token } => Auth::Bearer { token: token.clone() },
        Auth::Anonymous => Auth::Anonymous,
    }
}

/// Host transformed the way `spec.md` §4.F requires for env var names:
/// uppercase, dots and dashes to underscores.
fn env_prefix(host: &str) -> String {
    host.to_uppercase().replace(['.', '-'], "_")
}

fn from_env(display_host: &str, is_canonical: bool, secrets: &SecretStore) -> Option<Auth> {
    let prefix = env_prefix(display_host);
    if let Some(auth) = read_env_triplet(&prefix, display_host, secrets) {
        return Some(auth);
    }
    if is_canonical {
        if let Some(auth) = read_env_triplet(DOCKER_GENERIC_PREFIX, display_host, secrets) {
            return Some(auth);
        }
    }
    None
}

fn read_env_triplet(prefix: &str, display_host: &str, secrets: &SecretStore) -> Option<Auth> {
    if let Ok(token) = std::env::var(format!("{prefix}_TOKEN")) {
        if !token.is_empty() {
            secrets.set(format!("registry:{display_host}:token"), token.into_bytes());
            return Some(Auth::Bearer {
                token: secrets.get(&format!("registry:{display_host}:token"))?,
            });
        }
    }
    let username = std::env::var(format!("{prefix}_USERNAME")).ok().filter(|v| !v.is_empty());
    let password = std::env::var(format!("{prefix}_PASSWORD")).ok().filter(|v| !v.is_empty());
    if let (Some(username), Some(password)) = (username, password) {
        secrets.set(format!("registry:{display_host}:password"), password.into_bytes());
        return Some(Auth::Basic {
            username,
            password: secrets.get(&format!("registry:{display_host}:password"))?,
        });
    }
    None
}

/// `$DOCKER_CONFIG` names a directory (matching the real `docker` CLI
/// convention), not the `config.json` file itself.
fn docker_config_path() -> PathBuf {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return PathBuf::from(dir).join("config.json");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".docker").join("config.json");
    }
    PathBuf::from("/root/.docker/config.json")
}

#[derive(Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuthEntry>,
}

#[derive(Deserialize)]
struct DockerAuthEntry {
    auth: Option<String>,
    identitytoken: Option<String>,
}

fn from_docker_config_file(display_host: &str, secrets: &SecretStore) -> Option<Auth> {
    let path = docker_config_path();
    parse_docker_config_at(&path, display_host, secrets)
}

fn parse_docker_config_at(path: &Path, display_host: &str, secrets: &SecretStore) -> Option<Auth> {
    let content = std::fs::read_to_string(path).ok()?;
    let config: DockerConfigFile = serde_json::from_str(&content).ok()?;
    let entry = config
        .auths
        .get(display_host)
        .or_else(|| config.auths.get(&format!("https://{display_host}")))
        .or_else(|| config.auths.get(&format!("https://{display_host}/v1/")))?;
    docker_entry_to_auth(entry, display_host, secrets)
}

fn docker_entry_to_auth(entry: &DockerAuthEntry, display_host: &str, secrets: &SecretStore) -> Option<Auth> {
    if let Some(token) = &entry.identitytoken {
        if !token.is_empty() {
            secrets.set(format!("registry:{display_host}:token"), token.clone().into_bytes());
            return Some(Auth::Bearer {
                token: secrets.get(&format!("registry:{display_host}:token"))?,
            });
        }
    }
    let raw = entry.auth.as_ref()?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, raw).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    secrets.set(format!("registry:{display_host}:password"), password.as_bytes().to_vec());
    Some(Auth::Basic {
        username: username.to_string(),
        password: secrets.get(&format!("registry:{display_host}:password"))?,
    })
}

/// Kubernetes-style pull-secret JSON: `{"auths": {...}}`, same shape as
/// the Docker config file, mounted under one of [`SECRET_MOUNT_CANDIDATES`].
fn from_mounted_secrets(display_host: &str, secrets: &SecretStore) -> Option<Auth> {
    for dir in SECRET_MOUNT_CANDIDATES {
        let dir = Path::new(dir);
        if let Some(auth) = auth_from_mount_dir(dir, display_host, secrets) {
            return Some(auth);
        }
    }
    None
}

fn auth_from_mount_dir(dir: &Path, display_host: &str, secrets: &SecretStore) -> Option<Auth> {
    for json_name in [".dockerconfigjson", "config.json"] {
        if let Some(auth) = parse_docker_config_at(&dir.join(json_name), display_host, secrets) {
            return Some(auth);
        }
    }
    if let Ok(token) = std::fs::read_to_string(dir.join("token")) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            secrets.set(format!("registry:{display_host}:token"), token.into_bytes());
            return Some(Auth::Bearer {
                token: secrets.get(&format!("registry:{display_host}:token"))?,
            });
        }
    }
    let username = std::fs::read_to_string(dir.join("username")).ok().map(|s| s.trim().to_string());
    let password = std::fs::read_to_string(dir.join("password")).ok().map(|s| s.trim().to_string());
    if let (Some(username), Some(password)) = (username, password) {
        if !username.is_empty() && !password.is_empty() {
            secrets.set(format!("registry:{display_host}:password"), password.into_bytes());
            return Some(Auth::Basic {
                username,
                password: secrets.get(&format!("registry:{display_host}:password"))?,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prefix_uppercases_and_replaces_dots_and_dashes() {
        assert_eq!(env_prefix("my-registry.example.com"), "MY_REGISTRY_EXAMPLE_COM");
    }

    #[test]
    fn in_process_map_wins_over_everything_else() {
        let mut map = AuthConfigMap::new();
        map.insert(
            "registry.example.com".to_string(),
            Auth::Bearer {
                token: SecretBytes::new(b"preconfigured".to_vec()),
            },
        );
        let secrets = SecretStore::new();
        let auth = discover("registry.example.com", &map, &secrets, false);
        match auth {
            Auth::Bearer { token } => assert_eq!(token.as_bytes(), b"preconfigured"),
            _ => panic!("expected bearer auth from in-process map"),
        }
    }

    #[test]
    fn docker_config_file_resolves_basic_auth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"alice:hunter2");
        std::fs::write(
            &path,
            format!(r#"{{"auths":{{"registry.example.com":{{"auth":"{encoded}"}}}}}}"#),
        )
        .unwrap();
        let secrets = SecretStore::new();
        let auth = parse_docker_config_at(&path, "registry.example.com", &secrets).unwrap();
        match auth {
            Auth::Basic { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password.as_str(), Some("hunter2"));
            }
            _ => panic!("expected basic auth"),
        }
    }

    #[test]
    fn mounted_username_password_files_resolve_basic_auth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("username"), "bob\n").unwrap();
        std::fs::write(dir.path().join("password"), "s3cret\n").unwrap();
        let secrets = SecretStore::new();
        let auth = auth_from_mount_dir(dir.path(), "registry.example.com", &secrets).unwrap();
        match auth {
            Auth::Basic { username, password } => {
                assert_eq!(username, "bob");
                assert_eq!(password.as_str(), Some("s3cret"));
            }
            _ => panic!("expected basic auth"),
        }
    }

    #[test]
    fn no_tier_resolves_to_anonymous() {
        let map = AuthConfigMap::new();
        let secrets = SecretStore::new();
        let auth = discover("unconfigured.example.com", &map, &secrets, false);
        assert!(matches!(auth, Auth::Anonymous));
    }

    #[test]
    fn header_value_formats_basic_and_bearer() {
        let basic = Auth::Basic {
            username: "alice".to_string(),
            password: SecretBytes::new(b"hunter2".to_vec()),
        };
        assert!(basic.header_value().unwrap().starts_with("Basic "));
        let bearer = Auth::Bearer {
            token: SecretBytes::new(b"tok".to_vec()),
        };
        assert_eq!(bearer.header_value().unwrap(), "Bearer tok");
        assert_eq!(Auth::Anonymous.header_value(), None);
    }
}
