//! Workspace layout and lifecycle (`spec.md` §6): `tmp/`, `cache/`,
//! `layers/`, `manifests/` under one root, created mode `0755`, with
//! scratch space guaranteed to be released whether the build invocation
//! ends normally or is interrupted.

use std::fs;
use std::path::{Path, PathBuf};

use ossb_error::{BuildError, CleanupRegistry, ErrorCategory};

const DIR_MODE: u32 = 0o755;

/// `<workspace>/{tmp,cache,layers,manifests}` (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub tmp: PathBuf,
    pub cache: PathBuf,
    pub layers: PathBuf,
    pub manifests: PathBuf,
}

impl Workspace {
    /// Creates the four standard subtrees under `root`, each mode `0755`.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let root = root.into();
        let ws = Self {
            tmp: root.join("tmp"),
            cache: root.join("cache"),
            layers: root.join("layers"),
            manifests: root.join("manifests"),
            root,
        };
        for dir in [&ws.root, &ws.tmp, &ws.cache, &ws.layers, &ws.manifests] {
            make_dir(dir)?;
        }
        Ok(ws)
    }

    /// `layers/<stage>/rootfs/` — the stage's mutable filesystem view.
    pub fn stage_rootfs(&self, stage: &str) -> PathBuf {
        self.layers.join(stage).join("rootfs")
    }

    /// `layers/<stage>/blobs/` — cached compressed layer blobs awaiting
    /// extraction or re-push, keyed by digest (see `ossb_registry::cache_file_name`).
    pub fn stage_blob_cache(&self, stage: &str) -> PathBuf {
        self.layers.join(stage).join("blobs")
    }

    /// `layers/<stage>/<digest-with-dashes>.tar.gz` — a stage's own
    /// packaged layer, produced by the `Layer` operation.
    pub fn stage_layer_blob(&self, stage: &str, digest: &str) -> PathBuf {
        self.layers.join(stage).join(ossb_registry::cache_file_name(digest))
    }

    /// `manifests/<stage>/` — holds `manifest.json` and `config.json`.
    pub fn stage_manifest_dir(&self, stage: &str) -> PathBuf {
        self.manifests.join(stage)
    }

    pub fn ensure_stage_dirs(&self, stage: &str) -> Result<(), BuildError> {
        make_dir(&self.stage_rootfs(stage))?;
        make_dir(&self.stage_blob_cache(stage))?;
        make_dir(&self.stage_manifest_dir(stage))?;
        Ok(())
    }

    /// Registers a cleanup action that removes the scratch `tmp/` subtree.
    /// `cache/`, `layers/` and `manifests/` persist — they are the
    /// content-addressed output this build produces, not scratch space.
    pub fn register_cleanup(&self, registry: &mut CleanupRegistry) {
        let tmp = self.tmp.clone();
        registry.register("workspace-tmp", 0, move |_token| {
            if tmp.exists() {
                fs::remove_dir_all(&tmp).map_err(|e| format!("failed to remove {}: {e}", tmp.display()))?;
            }
            Ok(())
        });
    }
}

fn make_dir(path: &Path) -> Result<(), BuildError> {
    fs::create_dir_all(path).map_err(|e| {
        BuildError::builder(format!("failed to create workspace directory {}: {e}", path.display()))
            .category(ErrorCategory::Filesystem)
            .build()
    })?;
    set_mode(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path) -> Result<(), BuildError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE)).map_err(|e| {
        BuildError::builder(format!("failed to set mode on {}: {e}", path.display()))
            .category(ErrorCategory::Filesystem)
            .build()
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path) -> Result<(), BuildError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_lays_out_four_standard_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path().join("ws")).unwrap();
        assert!(ws.tmp.is_dir());
        assert!(ws.cache.is_dir());
        assert!(ws.layers.is_dir());
        assert!(ws.manifests.is_dir());
    }

    #[test]
    fn cleanup_removes_tmp_but_not_layers() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path().join("ws")).unwrap();
        fs::write(ws.tmp.join("scratch.txt"), b"x").unwrap();
        ws.ensure_stage_dirs("base").unwrap();
        fs::write(ws.stage_rootfs("base").join("keep.txt"), b"y").unwrap();

        let mut registry = CleanupRegistry::new();
        ws.register_cleanup(&mut registry);
        let token = ossb_error::CancellationToken::new();
        registry.run(&token).unwrap();

        assert!(!ws.tmp.exists());
        assert!(ws.stage_rootfs("base").join("keep.txt").exists());
    }
}
