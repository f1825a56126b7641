//! Process-local secret store (`spec.md` §5, §9 Design Notes): reads are
//! constant-time, storage is zeroed on removal, and the store itself is
//! the only place credentials (registry passwords, bearer tokens) live
//! for the lifetime of a build invocation. No global mutable state — the
//! store is owned by the build invocation and passed by reference.
//!
//! The workspace forbids `unsafe_code`, which rules out a raw `mlock(2)`
//! FFI call from this crate directly. Swap-locking is therefore exposed
//! as a best-effort hook (`SecretStore::try_lock_pages`) that is a no-op
//! today; see `DESIGN.md` for why this project does not vendor an
//! unverified unsafe-internals crate just to claim the platform facility.

use std::collections::HashMap;
use std::sync::Mutex;

use zeroize::Zeroize;

/// A secret's bytes. Overwritten with two fixed patterns and then random
/// bytes before being dropped, per `spec.md` §9 ("overwrite bytes —
/// multiple patterns then random — on drop").
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Constant-time equality against `candidate`: always walks the full
    /// length of the longer side so timing does not leak the matching
    /// prefix length.
    pub fn constant_time_eq(&self, candidate: &[u8]) -> bool {
        constant_time_eq(&self.0, candidate)
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        let len = self.0.len();
        for byte in self.0.iter_mut() {
            *byte = 0xFF;
        }
        for byte in self.0.iter_mut() {
            *byte = 0x00;
        }
        for byte in self.0.iter_mut() {
            *byte = rand::random::<u8>();
        }
        self.0.zeroize();
        debug_assert_eq!(self.0.len(), len);
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let max_len = a.len().max(b.len());
    let mut diff: u8 = (a.len() != b.len()) as u8;
    for i in 0..max_len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// A process-local store of named secrets, safe to share across stages
/// within a build (`spec.md` §5).
#[derive(Default)]
pub struct SecretStore {
    entries: Mutex<HashMap<String, SecretBytes>>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries
            .lock()
            .unwrap()
            .insert(name.into(), SecretBytes::new(value.into()));
    }

    pub fn get(&self, name: &str) -> Option<SecretBytes> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().unwrap().contains_key(name)
    }

    /// Removes and drops (hence zeroes) the named secret. Returns whether
    /// an entry was present.
    pub fn remove(&self, name: &str) -> bool {
        self.entries.lock().unwrap().remove(name).is_some()
    }

    pub fn verify(&self, name: &str, candidate: &[u8]) -> bool {
        match self.get(name) {
            Some(secret) => secret.constant_time_eq(candidate),
            None => false,
        }
    }

    /// Best-effort hook for locking this process's secret pages against
    /// swap (`mlock(2)` on Unix). Always returns `false` — see module
    /// docs. Exists so callers have one place to ask and can log
    /// "swap-locking unavailable" rather than silently assuming it
    /// happened.
    pub fn try_lock_pages(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_round_trips() {
        let store = SecretStore::new();
        store.set("registry-token", b"sekret".to_vec());
        let value = store.get("registry-token").unwrap();
        assert_eq!(value.as_bytes(), b"sekret");
    }

    #[test]
    fn remove_drops_the_secret() {
        let store = SecretStore::new();
        store.set("a", b"x".to_vec());
        assert!(store.remove("a"));
        assert!(!store.contains("a"));
        assert!(!store.remove("a"));
    }

    #[test]
    fn verify_uses_constant_time_compare() {
        let store = SecretStore::new();
        store.set("password", b"hunter2".to_vec());
        assert!(store.verify("password", b"hunter2"));
        assert!(!store.verify("password", b"hunter3"));
        assert!(!store.verify("missing", b"anything"));
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer-value"));
        assert!(constant_time_eq(b"same", b"same"));
    }

    proptest::proptest! {
        #[test]
        fn constant_time_eq_matches_plain_eq(a in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..32),
                                              b in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..32)) {
            assert_eq!(constant_time_eq(&a, &b), a == b);
        }
    }
}
