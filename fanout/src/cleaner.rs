//! Removal of partial output files left by interrupted jobs.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::CleanupWarning;
use crate::job::{Job, JobDescriptor};
use crate::telemetry;

/// Result of one or more cleaner passes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    /// Files that matched but were kept because the cleaner ran dry.
    pub retained: Vec<PathBuf>,
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.retained.is_empty()
            && self.warnings.is_empty()
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.removed.extend(other.removed);
        self.retained.extend(other.retained);
        self.warnings.extend(other.warnings);
    }
}

/// Deletes files matching `<output prefix>*<suffix>` for a job's known
/// suffixes, plus their compressed variants.
///
/// Only regular files are removed. A file that disappears between matching
/// and deletion counts as removed by someone else and is not reported.
#[derive(Clone, Debug)]
pub struct OutputArtifactCleaner {
    compressed_extensions: Vec<String>,
    dry_run: bool,
}

impl Default for OutputArtifactCleaner {
    fn default() -> Self {
        Self {
            compressed_extensions: vec!["bz2".to_string()],
            dry_run: false,
        }
    }
}

impl OutputArtifactCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also match `<file>.<extension>` for every known suffix.
    pub fn with_compressed_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        if !self.compressed_extensions.contains(&extension) {
            self.compressed_extensions.push(extension);
        }
        self
    }

    /// Match only uncompressed outputs.
    pub fn without_compressed_extensions(mut self) -> Self {
        self.compressed_extensions.clear();
        self
    }

    /// List matches in [`CleanupReport::retained`] instead of deleting them.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Clean `job`'s prefix for `known_suffixes` and for the intermediate
    /// patterns of its kind.
    pub fn clean_for<J: Job>(
        &self,
        job: &JobDescriptor<J>,
        known_suffixes: &[&str],
    ) -> CleanupReport {
        self.clean_matching(
            job.output_prefix(),
            known_suffixes,
            job.intermediate_patterns(),
        )
    }

    pub fn clean_prefix(
        &self,
        prefix: &Path,
        known_suffixes: &[&str],
    ) -> CleanupReport {
        self.clean_matching(prefix, known_suffixes, &[])
    }

    fn clean_matching(
        &self,
        prefix: &Path,
        known_suffixes: &[&str],
        intermediate_patterns: &[&str],
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        let Some(prefix_str) = prefix.to_str() else {
            let warning =
                CleanupWarning::new(prefix, "output prefix is not valid UTF-8");
            telemetry::record_cleanup_warning(&warning);
            report.warnings.push(warning);
            return report;
        };
        let escaped = Pattern::escape(prefix_str);

        let mut seen = HashSet::new();
        let mut patterns = self.patterns(&escaped, known_suffixes);
        patterns.extend(
            intermediate_patterns
                .iter()
                .map(|fragment| format!("{escaped}*{fragment}")),
        );
        for pattern in patterns {
            let paths = match glob::glob(&pattern) {
                Ok(paths) => paths,
                Err(err) => {
                    let warning = CleanupWarning::new(
                        prefix,
                        format!("bad pattern {pattern}: {err}"),
                    );
                    telemetry::record_cleanup_warning(&warning);
                    report.warnings.push(warning);
                    continue;
                }
            };

            for entry in paths {
                match entry {
                    Ok(path) => {
                        if seen.insert(path.clone()) {
                            self.remove(path, &mut report);
                        }
                    }
                    Err(err) => {
                        if err.error().kind() == ErrorKind::NotFound {
                            continue;
                        }
                        let warning = CleanupWarning::new(
                            err.path(),
                            err.error().to_string(),
                        );
                        telemetry::record_cleanup_warning(&warning);
                        report.warnings.push(warning);
                    }
                }
            }
        }

        if !self.dry_run {
            telemetry::record_artifacts_removed(report.removed.len());
        }
        report
    }

    fn patterns(&self, escaped_prefix: &str, suffixes: &[&str]) -> Vec<String> {
        let mut patterns = Vec::with_capacity(
            suffixes.len() * (1 + self.compressed_extensions.len()),
        );
        for suffix in suffixes {
            let base = format!("{escaped_prefix}*{}", Pattern::escape(suffix));
            for extension in &self.compressed_extensions {
                patterns.push(format!("{base}.{}", Pattern::escape(extension)));
            }
            patterns.push(base);
        }
        patterns
    }

    fn remove(&self, path: PathBuf, report: &mut CleanupReport) {
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                let warning = CleanupWarning::new(&path, err.to_string());
                telemetry::record_cleanup_warning(&warning);
                report.warnings.push(warning);
                return;
            }
        }

        if self.dry_run {
            tracing::debug!(path = %path.display(), "would remove output file");
            report.retained.push(path);
            return;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed output file");
                report.removed.push(path);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                let warning = CleanupWarning::new(&path, err.to_string());
                telemetry::record_cleanup_warning(&warning);
                report.warnings.push(warning);
            }
        }
    }
}
