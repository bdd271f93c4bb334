use fanout::{Job, JobKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffixes a [`TestJob`] may write under its prefix.
pub const TEST_SUFFIXES: &[&str] = &["out", "log", "partial.tsv"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestJobKind {
    Script,
}

impl JobKind for TestJobKind {
    fn as_str(&self) -> &'static str {
        "script"
    }

    fn output_suffixes(&self) -> &'static [&'static str] {
        TEST_SUFFIXES
    }
}

impl fmt::Display for TestJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job run by `sh -c`: writes its output files first, then sleeps, then
/// exits with a chosen code. Killing it mid-sleep leaves partial outputs.
///
/// With a journal set, the script appends `start <name>` first and
/// `end <name>` just before exiting, so tests can observe overlap from the
/// workers' side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestJob {
    pub name: String,
    pub output_prefix: PathBuf,
    pub writes: Vec<String>,
    pub sleep_ms: u64,
    pub exit_code: i32,
    #[serde(default)]
    pub journal: Option<PathBuf>,
}

impl Job for TestJob {
    type Kind = TestJobKind;

    fn kind(&self) -> TestJobKind {
        TestJobKind::Script
    }

    fn output_prefix(&self) -> &Path {
        &self.output_prefix
    }
}

impl TestJob {
    /// A job writing every [`TEST_SUFFIXES`] file under `<dir>/<name>.` and
    /// exiting 0 immediately.
    pub fn new(dir: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output_prefix: dir.join(format!("{name}.")),
            name,
            writes: TEST_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            sleep_ms: 0,
            exit_code: 0,
            journal: None,
        }
    }

    pub fn with_sleep(mut self, ms: u64) -> Self {
        self.sleep_ms = ms;
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Append start/end lines to `path`.
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal = Some(path.into());
        self
    }

    /// Write only these suffixes.
    pub fn writing(mut self, suffixes: &[&str]) -> Self {
        self.writes = suffixes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn output_path(&self, suffix: &str) -> PathBuf {
        let mut path = self.output_prefix.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Shell script implementing this job.
    pub fn script(&self) -> String {
        let mut script = String::new();
        let journal = self
            .journal
            .as_ref()
            .map(|path| shell_quote(&path.to_string_lossy()));
        if let Some(journal) = &journal {
            script.push_str(&format!(
                "echo {} >> {journal}; ",
                shell_quote(&format!("start {}", self.name))
            ));
        }
        for suffix in &self.writes {
            let path = self.output_path(suffix);
            script.push_str(&format!(
                "echo {} > {}; ",
                shell_quote(&self.name),
                shell_quote(&path.to_string_lossy())
            ));
        }
        if self.sleep_ms > 0 {
            script.push_str(&format!(
                "sleep {}.{:03}; ",
                self.sleep_ms / 1000,
                self.sleep_ms % 1000
            ));
        }
        if let Some(journal) = &journal {
            script.push_str(&format!(
                "echo {} >> {journal}; ",
                shell_quote(&format!("end {}", self.name))
            ));
        }
        script.push_str(&format!("exit {}", self.exit_code));
        script
    }
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_writes_then_sleeps_then_exits() {
        let job = TestJob::new(Path::new("/tmp/run"), "job-3")
            .writing(&["out"])
            .with_sleep(1_250)
            .with_exit_code(2);

        assert_eq!(
            job.script(),
            "echo 'job-3' > '/tmp/run/job-3.out'; sleep 1.250; exit 2"
        );
    }

    #[test]
    fn journal_brackets_the_script() {
        let job = TestJob::new(Path::new("/tmp/run"), "job-1")
            .writing(&[])
            .with_journal("/tmp/run/journal");

        assert_eq!(
            job.script(),
            "echo 'start job-1' >> '/tmp/run/journal'; \
             echo 'end job-1' >> '/tmp/run/journal'; exit 0"
        );
    }

    #[test]
    fn quotes_survive_in_paths() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
