//! Per-test evaluation: drive the agent conversation, execute SQL on both
//! sides, and score the outcome.
//!
//! A test run is a straight line through one state machine per test case:
//! execute the expected SQL (when declared), send the natural-language
//! prompt, send the deterministic query-extraction prompt continuing the
//! same conversation, extract the agent's `{"query": ...}` answer, then
//! either verify abstention (no-answer tests) or execute the agent SQL and
//! compare result sets. Nothing in here aborts the run: every failure is
//! folded into the returned [`TestResult`].

use crate::compare::results_equal;
use crate::extract::extract_query_json;
use crate::testcase::{TestCase, TestResult};
use client::{AgentClient, ClientResult, SqlClient, SqlOutcome};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

fn build_final_prompt(columns: &[String]) -> String {
    let schema_hint = if columns.is_empty() {
        "unknown".to_string()
    } else {
        columns.join(", ")
    };

    format!(
        "Based on your previous analysis, provide the final SQL query that answers the original question.\n\
         \n\
         Format your answer as a JSON on this format: {{'query': 'YOUR_SQL_QUERY_HERE'}}\n\
         Output schema of the query should have these columns: {schema_hint}\n\
         \n\
         If you cannot answer, respond with: {{'query': null}}"
    )
}

/// Whether an extracted query value amounts to a declined answer.
fn is_declined(query_value: Option<&Value>) -> bool {
    match query_value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty() || text == "null",
        Some(_) => false,
    }
}

fn value_display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Run a single test case and return its result. Never fails: errors are
/// recorded on the result and leave `is_correct` false.
pub async fn run_single_test(
    test_case: &TestCase,
    project_folder: &str,
    agent: &AgentClient,
    sql: &SqlClient,
) -> TestResult {
    let start = Instant::now();
    let mut result = TestResult {
        name: test_case.name.clone(),
        ..TestResult::default()
    };
    let mut total_bytes: u64 = 0;

    let outcome: ClientResult<()> = async {
        // Execute the expected SQL first to learn the output columns and the
        // data the agent's answer will be compared against.
        let mut columns: Vec<String> = Vec::new();
        if let Some(expected_sql) = &test_case.sql {
            match sql.execute(expected_sql, project_folder, None).await {
                SqlOutcome::Error { message } => {
                    result.error = Some(format!("Expected SQL error: {message}"));
                }
                SqlOutcome::Rows {
                    data,
                    bytes_processed,
                } => {
                    total_bytes += bytes_processed.unwrap_or(0);
                    if let Some(first_row) = data.first() {
                        columns = first_row.keys().cloned().collect();
                    }
                    result.expected_data = Some(data);
                }
            }
        } else if let Some(schema) = &test_case.schema_output {
            columns = schema.clone();
        }

        // First turn: the natural-language question.
        let first_turn = agent.send_prompt(&test_case.prompt, &[]).await?;
        result.total_tokens += first_turn.total_tokens;

        // Second turn: ask for the final query in JSON, continuing the
        // conversation the first turn started.
        let final_prompt = build_final_prompt(&columns);
        result.final_prompt = Some(final_prompt.clone());
        let final_turn = agent.send_prompt(&final_prompt, &first_turn.messages).await?;
        result.total_tokens += final_turn.total_tokens;
        result.agent_response = Some(final_turn.final_text.clone());

        let extracted = extract_query_json(&final_turn.final_text);
        debug!(test = %test_case.name, extracted = extracted.is_some(), "final turn parsed");

        if test_case.expects_no_answer() {
            let query_value = extracted.as_ref().and_then(|json| json.get("query"));
            if extracted.is_none() || is_declined(query_value) {
                result.has_answer = None;
                result.is_correct = true;
            } else {
                result.has_answer = Some(true);
                result.agent_sql = query_value.map(value_display);
                result.is_correct = false;
                result.error =
                    Some("Agent provided an answer when none was expected".to_string());
            }
            return Ok(());
        }

        let agent_query = extracted
            .as_ref()
            .and_then(|json| json.get("query"))
            .and_then(Value::as_str)
            .filter(|query| !query.is_empty());

        let Some(agent_query) = agent_query else {
            result.has_answer = Some(false);
            result.error = Some("Could not extract JSON query from agent response".to_string());
            return Ok(());
        };

        result.has_answer = Some(true);
        result.agent_sql = Some(agent_query.to_string());

        // Only comparable when the expected side produced data.
        if result.expected_data.is_some() {
            match sql.execute(agent_query, project_folder, None).await {
                SqlOutcome::Error { message } => {
                    result.error = Some(format!("Agent SQL error: {message}"));
                }
                SqlOutcome::Rows {
                    data,
                    bytes_processed,
                } => {
                    total_bytes += bytes_processed.unwrap_or(0);
                    result.is_correct =
                        results_equal(result.expected_data.as_deref().unwrap_or(&[]), &data);
                    result.actual_data = Some(data);
                }
            }
        }

        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        result.error = Some(e.to_string());
    }

    result.time_seconds = start.elapsed().as_secs_f64();
    result.bytes_processed = (total_bytes > 0).then_some(total_bytes);
    result
}
