//! End-to-end evaluator scenarios against stubbed agent and SQL endpoints.

use client::{AgentClient, ServiceConfig, SqlClient};
use harness::evaluator::run_single_test;
use harness::testcase::TestCase;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::path::PathBuf;

const FINAL_TURN_MARKER: &str = "Based on your previous analysis";

fn test_case(name: &str, prompt: &str, sql: Option<&str>) -> TestCase {
    TestCase {
        name: name.to_string(),
        prompt: prompt.to_string(),
        sql: sql.map(str::to_string),
        schema_output: None,
        file_path: PathBuf::from(format!("tests/{name}.yml")),
    }
}

fn agent_body(final_text: &str, tokens: u64) -> String {
    json!({
        "finalText": final_text,
        "totalTokens": {"total": tokens},
        "messages": [
            {"id": "a1", "role": "assistant", "parts": [{"type": "text", "text": final_text}]}
        ]
    })
    .to_string()
}

/// Stub the two agent turns: a catch-all for the first turn, and a
/// later-registered (and therefore higher-priority) mock for the final
/// query-extraction turn. The returned mocks must be kept alive for the
/// duration of the test.
async fn stub_agent_turns(
    server: &mut ServerGuard,
    final_text: &str,
) -> (mockito::Mock, mockito::Mock) {
    let first_turn = server
        .mock("POST", "/api/test/run")
        .with_status(200)
        .with_body(agent_body("Looking at the relevant tables now.", 10))
        .create_async()
        .await;
    let final_turn = server
        .mock("POST", "/api/test/run")
        .match_body(Matcher::Regex(FINAL_TURN_MARKER.to_string()))
        .with_status(200)
        .with_body(agent_body(final_text, 5))
        .create_async()
        .await;
    (first_turn, final_turn)
}

fn clients(agent_server: &ServerGuard, sql_server: &ServerGuard) -> (AgentClient, SqlClient) {
    let config = ServiceConfig::default()
        .with_agent_base_url(agent_server.url())
        .with_sql_base_url(sql_server.url());
    (
        AgentClient::new(&config).expect("agent client"),
        SqlClient::new(&config).expect("sql client"),
    )
}

#[tokio::test]
async fn agent_answer_matches_despite_row_order() {
    let mut agent_server = Server::new_async().await;
    let mut sql_server = Server::new_async().await;

    let _agent_mocks = stub_agent_turns(
        &mut agent_server,
        "```json\n{\"query\": \"SELECT id FROM users ORDER BY id DESC\"}\n```",
    )
    .await;

    let _expected_sql = sql_server
        .mock("POST", "/execute_sql")
        .match_body(Matcher::PartialJson(json!({"sql": "SELECT id FROM users"})))
        .with_status(200)
        .with_body(r#"{"data": [{"id": 1}, {"id": 2}], "bytes_processed": 100}"#)
        .create_async()
        .await;
    let _agent_sql = sql_server
        .mock("POST", "/execute_sql")
        .match_body(Matcher::PartialJson(
            json!({"sql": "SELECT id FROM users ORDER BY id DESC"}),
        ))
        .with_status(200)
        .with_body(r#"{"data": [{"id": 2}, {"id": 1}], "bytes_processed": 150}"#)
        .create_async()
        .await;

    let (agent, sql) = clients(&agent_server, &sql_server);
    let case = test_case(
        "reversed_rows",
        "Which users do we have?",
        Some("SELECT id FROM users"),
    );
    let result = run_single_test(&case, "/tmp/project", &agent, &sql).await;

    assert!(result.is_correct, "error: {:?}", result.error);
    assert_eq!(result.has_answer, Some(true));
    assert_eq!(result.total_tokens, 15);
    assert_eq!(result.bytes_processed, Some(250));
    assert_eq!(
        result.agent_sql.as_deref(),
        Some("SELECT id FROM users ORDER BY id DESC")
    );
    assert!(result.expected_data.is_some());
    assert!(result.actual_data.is_some());
}

#[tokio::test]
async fn no_answer_test_passes_when_agent_declines() {
    let mut agent_server = Server::new_async().await;
    let sql_server = Server::new_async().await;

    let _agent_mocks = stub_agent_turns(&mut agent_server, "{\"query\": null}").await;

    let (agent, sql) = clients(&agent_server, &sql_server);
    let case = test_case("unanswerable", "What is our Q7 revenue?", None);
    let result = run_single_test(&case, "/tmp/project", &agent, &sql).await;

    assert!(result.is_correct);
    assert_eq!(result.has_answer, None);
    assert!(result.error.is_none());
    assert!(result.agent_sql.is_none());
}

#[tokio::test]
async fn no_answer_test_fails_when_agent_hallucinates() {
    let mut agent_server = Server::new_async().await;
    let sql_server = Server::new_async().await;

    let _agent_mocks = stub_agent_turns(&mut agent_server, "{\"query\": \"SELECT 1\"}").await;

    let (agent, sql) = clients(&agent_server, &sql_server);
    let case = test_case("unanswerable", "What is our Q7 revenue?", None);
    let result = run_single_test(&case, "/tmp/project", &agent, &sql).await;

    assert!(!result.is_correct);
    assert_eq!(result.has_answer, Some(true));
    assert_eq!(result.agent_sql.as_deref(), Some("SELECT 1"));
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("none was expected"));
}

#[tokio::test]
async fn agent_sql_failure_is_recorded() {
    let mut agent_server = Server::new_async().await;
    let mut sql_server = Server::new_async().await;

    let _agent_mocks = stub_agent_turns(&mut agent_server, "{\"query\": \"SELECT boom\"}").await;

    let _expected_sql = sql_server
        .mock("POST", "/execute_sql")
        .match_body(Matcher::PartialJson(json!({"sql": "SELECT count(*) FROM users"})))
        .with_status(200)
        .with_body(r#"{"data": [{"n": 3}]}"#)
        .create_async()
        .await;
    let _agent_sql = sql_server
        .mock("POST", "/execute_sql")
        .match_body(Matcher::PartialJson(json!({"sql": "SELECT boom"})))
        .with_status(400)
        .with_body(r#"{"detail": "syntax error near boom"}"#)
        .create_async()
        .await;

    let (agent, sql) = clients(&agent_server, &sql_server);
    let case = test_case(
        "user_count",
        "How many users do we have?",
        Some("SELECT count(*) FROM users"),
    );
    let result = run_single_test(&case, "/tmp/project", &agent, &sql).await;

    assert!(!result.is_correct);
    assert_eq!(result.has_answer, Some(true));
    let error = result.error.as_deref().unwrap_or_default();
    assert!(error.contains("Agent SQL error"));
    assert!(error.contains("syntax error near boom"));
    assert!(result.actual_data.is_none());
}

#[tokio::test]
async fn extraction_failure_means_no_answer() {
    let mut agent_server = Server::new_async().await;
    let mut sql_server = Server::new_async().await;

    let _agent_mocks = stub_agent_turns(&mut agent_server, "I think the answer is forty-two.").await;

    let _expected_sql = sql_server
        .mock("POST", "/execute_sql")
        .with_status(200)
        .with_body(r#"{"data": [{"n": 3}]}"#)
        .create_async()
        .await;

    let (agent, sql) = clients(&agent_server, &sql_server);
    let case = test_case(
        "user_count",
        "How many users do we have?",
        Some("SELECT count(*) FROM users"),
    );
    let result = run_single_test(&case, "/tmp/project", &agent, &sql).await;

    assert!(!result.is_correct);
    assert_eq!(result.has_answer, Some(false));
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("Could not extract JSON query"));
}

#[tokio::test]
async fn agent_transport_failure_is_captured_not_propagated() {
    let mut agent_server = Server::new_async().await;
    let sql_server = Server::new_async().await;

    let _agent_mock = agent_server
        .mock("POST", "/api/test/run")
        .with_status(500)
        .with_body(r#"{"error": "model overloaded"}"#)
        .create_async()
        .await;

    let (agent, sql) = clients(&agent_server, &sql_server);
    let case = test_case("unanswerable", "What is our Q7 revenue?", None);
    let result = run_single_test(&case, "/tmp/project", &agent, &sql).await;

    assert!(!result.is_correct);
    assert_eq!(result.has_answer, None);
    let error = result.error.as_deref().unwrap_or_default();
    assert!(error.contains("Agent request failed"));
    assert!(error.contains("model overloaded"));
    assert!(result.time_seconds >= 0.0);
}

#[tokio::test]
async fn expected_sql_failure_still_probes_the_agent() {
    let mut agent_server = Server::new_async().await;
    let mut sql_server = Server::new_async().await;

    let _agent_mocks = stub_agent_turns(&mut agent_server, "{\"query\": \"SELECT 1\"}").await;

    let _expected_sql = sql_server
        .mock("POST", "/execute_sql")
        .with_status(500)
        .with_body(r#"{"detail": "warehouse unreachable"}"#)
        .create_async()
        .await;

    let (agent, sql) = clients(&agent_server, &sql_server);
    let case = test_case("broken_expected", "Count the users.", Some("SELECT bad"));
    let result = run_single_test(&case, "/tmp/project", &agent, &sql).await;

    // The agent is still exercised, but correctness cannot hold without
    // expected data, and the expected-side failure stays on the record.
    assert!(!result.is_correct);
    assert_eq!(result.has_answer, Some(true));
    assert_eq!(result.agent_sql.as_deref(), Some("SELECT 1"));
    let error = result.error.as_deref().unwrap_or_default();
    assert!(error.contains("Expected SQL error"));
    assert!(error.contains("warehouse unreachable"));
    assert_eq!(result.total_tokens, 15);
}
