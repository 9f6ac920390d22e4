// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical allow-list validation for project writes.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("path escapes allowed directories: {path}")]
    PathEscape { path: String },

    #[error("write denied by lock grant: {path}")]
    LockViolation { path: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}

/// The writable geography of a target project.
///
/// Allow-list entries are canonicalized once at construction; every
/// write is checked against them after resolving symlinks, which
/// rejects `..` traversal, symlink escapes, and absolute paths outside
/// the project.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    project_root: PathBuf,
    allow_list: Vec<PathBuf>,
}

impl ProjectLayout {
    pub fn new(project_root: PathBuf, allow_list: Vec<PathBuf>) -> Self {
        let allow_list = allow_list
            .iter()
            .map(|dir| {
                let abs = if dir.is_absolute() { dir.clone() } else { project_root.join(dir) };
                abs.canonicalize().unwrap_or(abs)
            })
            .collect();
        Self { project_root, allow_list }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn allow_list(&self) -> &[PathBuf] {
        &self.allow_list
    }

    /// Resolve a proposed write path to its canonical absolute form,
    /// verifying it lies inside an allow-listed directory.
    ///
    /// The deepest existing ancestor is canonicalized (following
    /// symlinks); not-yet-created suffix components must be plain names.
    pub fn resolve_write(&self, path: &Path) -> Result<PathBuf, StoreError> {
        let escape = || StoreError::PathEscape { path: path.display().to_string() };

        let abs = if path.is_absolute() { path.to_path_buf() } else { self.project_root.join(path) };
        let file_name = abs.file_name().ok_or_else(escape)?.to_os_string();
        let parent = abs.parent().ok_or_else(escape)?;

        let canonical_parent = canonicalize_deepest(parent).ok_or_else(escape)?;
        let candidate = canonical_parent.join(file_name);

        if self.allow_list.iter().any(|dir| candidate.starts_with(dir)) {
            Ok(candidate)
        } else {
            Err(escape())
        }
    }
}

/// Canonicalize the deepest existing ancestor of `dir`, then re-append
/// the missing suffix. Returns `None` when the suffix contains anything
/// but plain names (`..`/`.` in a not-yet-created segment cannot be
/// resolved and is treated as an escape).
fn canonicalize_deepest(dir: &Path) -> Option<PathBuf> {
    let mut existing = dir.to_path_buf();
    let mut suffix: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut out = canonical;
                for part in suffix.iter().rev() {
                    out.push(part);
                }
                return Some(out);
            }
            Err(_) => {
                let name = match existing.components().next_back()? {
                    Component::Normal(name) => name.to_os_string(),
                    _ => return None,
                };
                suffix.push(name);
                existing = existing.parent()?.to_path_buf();
            }
        }
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
