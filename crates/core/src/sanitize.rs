// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem-layout scrubbing for operator-visible strings.

use std::path::{Path, PathBuf};

/// Replaces occurrences of the project root (raw and canonical forms)
/// with `<project>` before a string leaves the server.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    roots: Vec<String>,
}

impl Sanitizer {
    pub fn new(project_root: &Path) -> Self {
        let mut roots = vec![project_root.display().to_string()];
        if let Ok(canonical) = project_root.canonicalize() {
            let canonical = canonical.display().to_string();
            if !roots.contains(&canonical) {
                roots.push(canonical);
            }
        }
        // Longest first so the canonical form wins when one prefixes the other
        roots.sort_by_key(|r| std::cmp::Reverse(r.len()));
        Self { roots }
    }

    /// For tests: sanitize against explicit root strings.
    pub fn with_roots(roots: Vec<String>) -> Self {
        let mut roots = roots;
        roots.sort_by_key(|r| std::cmp::Reverse(r.len()));
        Self { roots }
    }

    pub fn scrub(&self, message: &str) -> String {
        let mut out = message.to_string();
        for root in &self.roots {
            if !root.is_empty() && root != "/" {
                out = out.replace(root.as_str(), "<project>");
            }
        }
        out
    }

    pub fn scrub_path(&self, path: &Path) -> String {
        self.scrub(&path.display().to_string())
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.iter().map(PathBuf::from).collect()
    }
}

#[cfg(test)]
#[path = "sanitize_tests.rs"]
mod tests;
