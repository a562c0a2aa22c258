use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Serialize;

/// Accumulates validity verdicts for one scan session.
///
/// Reasons are appended in discovery order and never removed; a rescan
/// starts from a fresh instance. The tree itself is never touched from
/// here.
#[derive(Debug, Clone, Serialize)]
pub struct Validator {
    valid: bool,
    invalid: IndexMap<Utf8PathBuf, Vec<String>>,
}

impl Validator {
    pub fn new() -> Validator {
        Validator {
            valid: true,
            invalid: IndexMap::new(),
        }
    }

    /// Append a reason for this path and drop the tree-wide flag.
    pub fn mark_invalid(&mut self, path: &Utf8Path, reason: impl Into<String>) {
        self.valid = false;
        self.invalid
            .entry(path.to_path_buf())
            .or_default()
            .push(reason.into());
    }

    /// Tree-wide AND over all entries.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Ordered reasons recorded for this path; empty if the path is valid.
    pub fn reasons_for(&self, path: &Utf8Path) -> &[String] {
        self.invalid
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn invalid_paths(&self) -> impl Iterator<Item = (&Utf8Path, &[String])> {
        self.invalid
            .iter()
            .map(|(path, reasons)| (path.as_path(), reasons.as_slice()))
    }

    /// Number of distinct paths with at least one reason.
    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }

    /// Fold another validator's verdicts in, preserving its reason order.
    pub fn merge(&mut self, other: Validator) {
        for (path, reasons) in other.invalid {
            self.valid = false;
            self.invalid.entry(path).or_default().extend(reasons);
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
