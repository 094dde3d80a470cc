use clap::{Parser, Subcommand};
use client::{AgentClient, ServiceConfig, SqlClient};
use harness::config::{NaoConfig, CONFIG_FILE_NAME};
use harness::evaluator::run_single_test;
use harness::report;
use harness::servers::ServerManager;
use harness::testcase::{load_test_cases, TestResult};
use std::process::ExitCode;
use tracing::error;

#[derive(Parser)]
#[command(name = "nao")]
#[command(about = "Project CLI for the nao data assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run agent SQL-generation tests from the project tests folder
    Test {
        /// Run only the test with this name
        #[arg(short, long)]
        select: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Test { select } => run_tests(select).await,
    }
}

async fn run_tests(select: Option<String>) -> ExitCode {
    println!("\n🧪 Running nao tests...\n");

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            error!("could not resolve working directory: {e}");
            return ExitCode::from(1);
        }
    };

    let Some(config) = NaoConfig::try_load(&cwd) else {
        println!("✗ No {CONFIG_FILE_NAME} found in current directory.");
        println!("  Navigate to a nao project directory first.");
        return ExitCode::from(1);
    };

    let tests_folder = cwd.join("tests");
    if !tests_folder.exists() {
        println!("⚠ Tests folder not found: {}", tests_folder.display());
        println!("  Create a 'tests' folder with YAML test files to run tests.");
        return ExitCode::from(1);
    }

    let mut test_cases = load_test_cases(&tests_folder);
    if test_cases.is_empty() {
        println!("⚠ No test files found in tests folder.");
        println!("  Add .yml or .yaml test files to the tests folder.");
        return ExitCode::from(1);
    }

    if let Some(name) = &select {
        let available: Vec<String> = test_cases.iter().map(|case| case.name.clone()).collect();
        test_cases.retain(|case| &case.name == name);
        if test_cases.is_empty() {
            println!("✗ No test found with name: {name}");
            println!("  Available tests:");
            for available_name in available {
                println!("  • {available_name}");
            }
            return ExitCode::from(1);
        }
    }

    println!("✓ Found {} test(s)", test_cases.len());

    let services = ServiceConfig::default();
    let (agent, sql) = match (AgentClient::new(&services), SqlClient::new(&services)) {
        (Ok(agent), Ok(sql)) => (agent, sql),
        (Err(e), _) | (_, Err(e)) => {
            println!("✗ {e}");
            return ExitCode::from(1);
        }
    };

    let project_folder = cwd.display().to_string();
    let mut server = ServerManager::new(config, &cwd);

    // Teardown is guaranteed: the failure path stops inside start(), the
    // success path stops below, and ServerManager's Drop covers panics.
    let exit = match server.start().await {
        Err(e) => {
            println!("✗ {e}");
            ExitCode::from(1)
        }
        Ok(()) => {
            println!();

            let mut results: Vec<TestResult> = Vec::new();
            for (index, test_case) in test_cases.iter().enumerate() {
                println!(
                    "Running test {}/{}: {}...",
                    index + 1,
                    test_cases.len(),
                    test_case.name
                );
                let result = run_single_test(test_case, &project_folder, &agent, &sql).await;
                report::display_test_details(&result, test_case);
                results.push(result);
            }

            report::display_results(&results);
            report::display_summary(&results);
            ExitCode::SUCCESS
        }
    };

    server.stop();
    exit
}
