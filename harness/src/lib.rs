pub mod compare;
pub mod config;
pub mod evaluator;
pub mod extract;
pub mod report;
pub mod servers;
pub mod testcase;

pub use compare::results_equal;
pub use config::{ConfigError, LlmConfig, NaoConfig, CONFIG_FILE_NAME};
pub use evaluator::run_single_test;
pub use extract::extract_query_json;
pub use servers::{ServerManager, SupervisorError, SupervisorState};
pub use testcase::{load_test_cases, TestCase, TestResult};
