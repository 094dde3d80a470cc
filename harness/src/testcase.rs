use client::Row;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestLoadError {
    #[error("Could not read test file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse test file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Deserialize)]
struct TestCaseFile {
    name: String,
    prompt: String,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    schema_output: Option<Vec<String>>,
}

/// A single test definition loaded from a YAML file.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub prompt: String,
    /// Expected SQL. `None` means the agent should decline to answer.
    pub sql: Option<String>,
    /// Expected output columns, used as a hint when `sql` is absent.
    pub schema_output: Option<Vec<String>>,
    pub file_path: PathBuf,
}

impl TestCase {
    pub fn from_yaml(path: &Path) -> Result<Self, TestLoadError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: TestCaseFile = serde_yaml::from_str(&raw)?;

        Ok(Self {
            name: parsed.name,
            prompt: parsed.prompt,
            sql: parsed.sql.filter(|sql| !sql.trim().is_empty()),
            schema_output: parsed.schema_output,
            file_path: path.to_path_buf(),
        })
    }

    /// True when no valid answer is expected from the agent.
    pub fn expects_no_answer(&self) -> bool {
        self.sql.is_none()
    }
}

/// Result of running a single test.
#[derive(Debug, Clone, Default)]
pub struct TestResult {
    pub name: String,
    pub time_seconds: f64,
    pub total_tokens: u64,
    pub is_correct: bool,
    /// `None` means not applicable (no answer was expected).
    pub has_answer: Option<bool>,
    pub error: Option<String>,
    pub agent_sql: Option<String>,
    pub expected_data: Option<Vec<Row>>,
    pub actual_data: Option<Vec<Row>>,
    /// The prompt sent to extract the final query.
    pub final_prompt: Option<String>,
    /// The raw final-turn response from the agent.
    pub agent_response: Option<String>,
    /// Total bytes scanned by all SQL executions for this test.
    pub bytes_processed: Option<u64>,
}

/// Load all test cases from the tests folder, non-recursively.
///
/// Unparseable files are reported and skipped so one bad definition never
/// takes down the run.
pub fn load_test_cases(tests_folder: &Path) -> Vec<TestCase> {
    let mut cases = Vec::new();

    if !tests_folder.exists() {
        return cases;
    }

    for extension in ["yml", "yaml"] {
        let pattern = tests_folder
            .join(format!("*.{extension}"))
            .display()
            .to_string();
        let Ok(paths) = glob::glob(&pattern) else {
            continue;
        };
        for path in paths.flatten() {
            match TestCase::from_yaml(&path) {
                Ok(case) => cases.push(case),
                Err(e) => println!("⚠ Warning: could not load {}: {e}", path.display()),
            }
        }
    }

    cases
}
