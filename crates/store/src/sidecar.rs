// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-target sidecar artifacts and guarded project writes.
//!
//! A target `app/controllers/foo/bar_controller.rb` keeps its JSON
//! artifacts under `app/controllers/foo/<mode-dir>/bar_controller/`.

use crate::locks::{GrantId, LockManager};
use crate::paths::{ProjectLayout, StoreError};
use fortify_core::{Clock, Mode};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pluggable mapping from a source file to its test file.
pub trait TestPathResolver: Send + Sync + 'static {
    /// The test path for a target, or `None` when no test file exists.
    fn derive(&self, project_root: &Path, target_path: &Path) -> Option<PathBuf>;
}

/// Default resolver: mirrors `app/**/x.rb` to `test/**/x_test.rb`.
#[derive(Debug, Clone, Default)]
pub struct MirrorResolver;

impl TestPathResolver for MirrorResolver {
    fn derive(&self, project_root: &Path, target_path: &Path) -> Option<PathBuf> {
        let relative = target_path.strip_prefix(project_root).unwrap_or(target_path);
        let mirrored = relative.strip_prefix("app").ok()?;
        let stem = mirrored.file_stem()?.to_str()?;
        let ext = mirrored.extension()?.to_str()?;
        let test_rel = Path::new("test")
            .join(mirrored.parent().unwrap_or(Path::new("")))
            .join(format!("{stem}_test.{ext}"));
        let test_abs = project_root.join(test_rel);
        test_abs.exists().then_some(test_abs)
    }
}

/// Path-validated sidecar and project writes for one project.
pub struct SidecarStore<C: Clock> {
    layout: ProjectLayout,
    locks: Arc<LockManager<C>>,
    resolver: Box<dyn TestPathResolver>,
}

impl<C: Clock> SidecarStore<C> {
    pub fn new(layout: ProjectLayout, locks: Arc<LockManager<C>>) -> Self {
        Self { layout, locks, resolver: Box::new(MirrorResolver) }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn TestPathResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Sidecar directory for a target in a given mode.
    pub fn sidecar_dir(&self, target_full_path: &Path, mode: Mode) -> PathBuf {
        let parent = target_full_path.parent().unwrap_or(Path::new(""));
        let stem = target_full_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        parent.join(mode.sidecar_dir()).join(stem)
    }

    /// Path of a named sidecar file.
    pub fn sidecar_path(&self, target_full_path: &Path, mode: Mode, filename: &str) -> PathBuf {
        self.sidecar_dir(target_full_path, mode).join(filename)
    }

    /// Create the sidecar directory tree; idempotent. The directory is
    /// validated against the allow-list before anything is created.
    pub fn ensure_sidecar_dir(&self, target_full_path: &Path, mode: Mode) -> Result<PathBuf, StoreError> {
        let probe = self.sidecar_path(target_full_path, mode, ".keep");
        let resolved = self.layout.resolve_write(&probe)?;
        let dir = resolved
            .parent()
            .ok_or_else(|| StoreError::PathEscape { path: probe.display().to_string() })?
            .to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::io(format!("create sidecar dir {}", dir.display()), e))?;
        Ok(dir)
    }

    /// Path-validated, pretty-printed JSON sidecar write.
    pub fn write_sidecar(
        &self,
        target_full_path: &Path,
        mode: Mode,
        filename: &str,
        content: &Value,
    ) -> Result<PathBuf, StoreError> {
        let path = self.sidecar_path(target_full_path, mode, filename);
        let resolved = self.layout.resolve_write(&path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(format!("create {}", parent.display()), e))?;
        }
        let pretty = serde_json::to_string_pretty(content)
            .map_err(|e| StoreError::io("serialize sidecar", std::io::Error::other(e)))?;
        fs::write(&resolved, pretty)
            .map_err(|e| StoreError::io(format!("write {}", resolved.display()), e))?;
        tracing::debug!(path = %resolved.display(), "sidecar written");
        Ok(resolved)
    }

    /// Read a sidecar file back, `None` if absent.
    pub fn read_sidecar(
        &self,
        target_full_path: &Path,
        mode: Mode,
        filename: &str,
    ) -> Result<Option<Value>, StoreError> {
        let path = self.sidecar_path(target_full_path, mode, filename);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(format!("read {}", path.display()), e)),
        };
        let value = serde_json::from_str(&raw)
            .map_err(|e| StoreError::io(format!("parse {}", path.display()), std::io::Error::other(e)))?;
        Ok(Some(value))
    }

    /// Path-validated project write, optionally enforced against a grant.
    ///
    /// With a grant id, the grant must be active and hold the exact
    /// canonical path; anything else is a [`StoreError::LockViolation`].
    pub fn safe_write(
        &self,
        path: &Path,
        content: &str,
        grant_id: Option<GrantId>,
    ) -> Result<PathBuf, StoreError> {
        let resolved = self.layout.resolve_write(path)?;

        if let Some(grant_id) = grant_id {
            if !self.locks.holds(grant_id, &resolved) {
                return Err(StoreError::LockViolation { path: resolved.display().to_string() });
            }
        }

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(format!("create {}", parent.display()), e))?;
        }
        fs::write(&resolved, content)
            .map_err(|e| StoreError::io(format!("write {}", resolved.display()), e))?;
        tracing::debug!(path = %resolved.display(), "project file written");
        Ok(resolved)
    }

    /// Test file for a target, via the configured resolver.
    pub fn derive_test_path(&self, target_full_path: &Path) -> Option<PathBuf> {
        self.resolver.derive(self.layout.project_root(), target_full_path)
    }

    /// Copy every file under a staging tree to its mirrored absolute
    /// path under the project root, each through [`Self::safe_write`].
    pub fn copy_from_staging(
        &self,
        staging_dir: &Path,
        grant_id: Option<GrantId>,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let mut written = Vec::new();
        let mut pending = vec![staging_dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir)
                .map_err(|e| StoreError::io(format!("read staging dir {}", dir.display()), e))?;
            for entry in entries {
                let entry =
                    entry.map_err(|e| StoreError::io("read staging entry", e))?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let relative = path.strip_prefix(staging_dir).map_err(|_| {
                    StoreError::PathEscape { path: path.display().to_string() }
                })?;
                let content = fs::read_to_string(&path)
                    .map_err(|e| StoreError::io(format!("read {}", path.display()), e))?;
                let target = self.layout.project_root().join(relative);
                written.push(self.safe_write(&target, &content, grant_id)?);
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
#[path = "sidecar_tests.rs"]
mod tests;
