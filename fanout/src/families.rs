//! Built-in job families for population-genetics batch runs.
//!
//! Each family has one worker entry point and a fixed set of output file
//! suffixes, which the cleaner uses to find partial outputs. Output prefixes
//! end with `.` so that replicate `r1` never matches the files of `r10`.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::job::{Job, JobKind};

/// Files written by one simulation replicate.
pub const SIMULATION_REPLICATE_SUFFIXES: &[&str] = &[
    "sim",
    "gen",
    "db",
    "conf",
    "genepop",
    "sim.interruption.msg",
];

/// Files written by one Ne estimation run: the driver's tables plus the
/// estimator's per-sample tags (`NoDat.txt`, `xTp.txt`, `ne_run.txt`, and the
/// columnar `x.txt`).
pub const NE_ESTIMATION_SUFFIXES: &[&str] = &[
    "ldne.tsv",
    "ldne.msgs",
    "NoDat.txt",
    "xTp.txt",
    "ne_run.txt",
    "x.txt",
];

/// Subsampled genepop files an Ne estimation run writes before estimating.
pub const NE_INTERMEDIATE_GENEPOP_PATTERNS: &[&str] = &["_r_*_g_*"];

/// Tag placed between an output basename and a replicate number.
pub const REPLICATE_TAG: &str = ".r";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    SimulationReplicate,
    NeEstimation,
}

impl JobKind for AnalysisKind {
    fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::SimulationReplicate => "simulation-replicate",
            AnalysisKind::NeEstimation => "ne-estimation",
        }
    }

    fn output_suffixes(&self) -> &'static [&'static str] {
        match self {
            AnalysisKind::SimulationReplicate => SIMULATION_REPLICATE_SUFFIXES,
            AnalysisKind::NeEstimation => NE_ESTIMATION_SUFFIXES,
        }
    }

    fn intermediate_patterns(&self) -> &'static [&'static str] {
        match self {
            AnalysisKind::SimulationReplicate => &[],
            AnalysisKind::NeEstimation => NE_INTERMEDIATE_GENEPOP_PATTERNS,
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any job from the built-in families.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AnalysisJob {
    SimulationReplicate(SimulationReplicate),
    NeEstimation(NeEstimationRun),
}

impl Job for AnalysisJob {
    type Kind = AnalysisKind;

    fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisJob::SimulationReplicate(_) => {
                AnalysisKind::SimulationReplicate
            }
            AnalysisJob::NeEstimation(_) => AnalysisKind::NeEstimation,
        }
    }

    fn output_prefix(&self) -> &Path {
        match self {
            AnalysisJob::SimulationReplicate(job) => &job.output_prefix,
            AnalysisJob::NeEstimation(job) => &job.output_prefix,
        }
    }
}

impl From<SimulationReplicate> for AnalysisJob {
    fn from(job: SimulationReplicate) -> Self {
        AnalysisJob::SimulationReplicate(job)
    }
}

impl From<NeEstimationRun> for AnalysisJob {
    fn from(job: NeEstimationRun) -> Self {
        AnalysisJob::NeEstimation(job)
    }
}

/// One replicate of a simulation configured by a config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationReplicate {
    pub config_file: PathBuf,
    /// Empty when the simulation runs without life tables.
    pub life_table_files: Vec<PathBuf>,
    pub param_names_file: PathBuf,
    output_basename: PathBuf,
    /// One-based.
    replicate: u32,
    output_prefix: PathBuf,
}

impl SimulationReplicate {
    /// Replicate 1 of a simulation; use [`replicate`](Self::replicate) or
    /// [`replicates`](Self::replicates) for the rest of the batch.
    pub fn new(
        config_file: impl Into<PathBuf>,
        life_table_files: Vec<PathBuf>,
        param_names_file: impl Into<PathBuf>,
        output_basename: impl Into<PathBuf>,
    ) -> Self {
        let output_basename = output_basename.into();
        Self {
            config_file: config_file.into(),
            life_table_files,
            param_names_file: param_names_file.into(),
            output_prefix: replicate_prefix(&output_basename, 1),
            output_basename,
            replicate: 1,
        }
    }

    /// The same simulation with a different replicate number.
    pub fn replicate(&self, replicate: u32) -> Self {
        Self {
            replicate,
            output_prefix: replicate_prefix(&self.output_basename, replicate),
            ..self.clone()
        }
    }

    /// Replicates `1..=count`, in order.
    pub fn replicates(&self, count: u32) -> Vec<AnalysisJob> {
        (1..=count)
            .map(|n| AnalysisJob::from(self.replicate(n)))
            .collect()
    }

    /// Whether this replicate writes the shared config file for the batch.
    pub fn writes_batch_config(&self) -> bool {
        self.replicate == 1
    }

    pub fn replicate_number(&self) -> u32 {
        self.replicate
    }

    pub fn output_basename(&self) -> &Path {
        &self.output_basename
    }

    pub fn output_prefix(&self) -> &Path {
        &self.output_prefix
    }
}

/// One Ne estimation run over a set of genepop files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeEstimationRun {
    pub genepop_files: Vec<PathBuf>,
    output_basename: PathBuf,
    pub min_allele_freq: f64,
    pub monogamy: bool,
    pub population_replicates: u32,
    pub loci_replicates: u32,
    output_prefix: PathBuf,
}

impl NeEstimationRun {
    pub fn new(
        genepop_files: Vec<PathBuf>,
        output_basename: impl Into<PathBuf>,
    ) -> Self {
        let output_basename = output_basename.into();
        Self {
            genepop_files,
            output_prefix: append_to_path(&output_basename, "."),
            output_basename,
            min_allele_freq: 0.02,
            monogamy: false,
            population_replicates: 1,
            loci_replicates: 1,
        }
    }

    /// One run per genepop file, writing to `<out_dir>/<file stem>.*`.
    pub fn per_file(
        genepop_files: &[PathBuf],
        out_dir: &Path,
        template: &NeEstimationRun,
    ) -> Vec<AnalysisJob> {
        genepop_files
            .iter()
            .map(|file| {
                let stem = file
                    .file_stem()
                    .map(|s| s.to_os_string())
                    .unwrap_or_else(|| OsString::from("genepop"));
                let basename = out_dir.join(stem);
                AnalysisJob::from(Self {
                    genepop_files: vec![file.clone()],
                    output_prefix: append_to_path(&basename, "."),
                    output_basename: basename,
                    ..template.clone()
                })
            })
            .collect()
    }

    pub fn with_min_allele_freq(mut self, freq: f64) -> Self {
        self.min_allele_freq = freq;
        self
    }

    pub fn with_monogamy(mut self, monogamy: bool) -> Self {
        self.monogamy = monogamy;
        self
    }

    pub fn with_replicates(mut self, population: u32, loci: u32) -> Self {
        self.population_replicates = population;
        self.loci_replicates = loci;
        self
    }

    pub fn output_basename(&self) -> &Path {
        &self.output_basename
    }

    pub fn output_prefix(&self) -> &Path {
        &self.output_prefix
    }
}

fn replicate_prefix(basename: &Path, replicate: u32) -> PathBuf {
    append_to_path(basename, &format!("{REPLICATE_TAG}{replicate}."))
}

fn append_to_path(base: &Path, suffix: &str) -> PathBuf {
    let mut joined = base.as_os_str().to_owned();
    joined.push(suffix);
    PathBuf::from(joined)
}
