//! Terminal reporting: per-test detail blocks, the end-of-run results table,
//! and the summary with an error digest.

use crate::testcase::{TestCase, TestResult};
use client::Row;
use serde_json::Value;

const PREVIEW_ROWS: usize = 5;
const PREVIEW_CELL_WIDTH: usize = 30;
const RESPONSE_PREVIEW_CHARS: usize = 2000;

/// Format a byte count into a human-readable string.
pub fn format_bytes(bytes: Option<u64>) -> String {
    const KIB: u64 = 1024;
    let Some(bytes) = bytes else {
        return "N/A".to_string();
    };

    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < KIB.pow(2) {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else if bytes < KIB.pow(3) {
        format!("{:.1} MB", bytes as f64 / KIB.pow(2) as f64)
    } else if bytes < KIB.pow(4) {
        format!("{:.2} GB", bytes as f64 / KIB.pow(3) as f64)
    } else {
        format!("{:.2} TB", bytes as f64 / KIB.pow(4) as f64)
    }
}

fn with_commas(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn print_data_preview(data: &[Row]) {
    if data.is_empty() {
        println!("  (no data)");
        return;
    }

    let columns: Vec<&String> = data[0].keys().collect();
    let header = columns
        .iter()
        .map(|column| truncate(column, PREVIEW_CELL_WIDTH))
        .collect::<Vec<_>>()
        .join(" | ");
    println!("  {header}");

    for row in data.iter().take(PREVIEW_ROWS) {
        let line = columns
            .iter()
            .map(|column| truncate(&cell_text(row.get(column.as_str())), PREVIEW_CELL_WIDTH))
            .collect::<Vec<_>>()
            .join(" | ");
        println!("  {line}");
    }

    if data.len() > PREVIEW_ROWS {
        println!("  ... +{} more", data.len() - PREVIEW_ROWS);
    }
}

/// Print the detailed log for a single finished test.
pub fn display_test_details(result: &TestResult, test_case: &TestCase) {
    let (icon, status) = if result.is_correct {
        ("✓", "PASS")
    } else {
        ("✗", "FAIL")
    };

    println!();
    println!("{}", "─".repeat(80));
    println!("{icon} {} - {status}", result.name);
    println!();

    println!("  Time: {:.2}s", result.time_seconds);
    println!("  Tokens: {}", with_commas(result.total_tokens));
    if result.bytes_processed.is_some() {
        println!("  Bytes processed: {}", format_bytes(result.bytes_processed));
    }
    if let Some(has_answer) = result.has_answer {
        println!("  Answer provided: {}", if has_answer { "yes" } else { "no" });
    }
    println!("  Correct: {}", if result.is_correct { "yes" } else { "no" });
    println!();

    println!("Prompt:");
    println!("  {}", test_case.prompt);

    if let Some(final_prompt) = &result.final_prompt {
        println!();
        println!("Final prompt (query extraction):");
        for line in final_prompt.lines() {
            println!("  {line}");
        }
    }

    if let Some(response) = &result.agent_response {
        println!();
        println!("Agent response:");
        let preview = truncate(response, RESPONSE_PREVIEW_CHARS);
        for line in preview.lines() {
            println!("  {line}");
        }
        if response.chars().count() > RESPONSE_PREVIEW_CHARS {
            println!("  ... (truncated, {} chars total)", response.chars().count());
        }
    }

    println!();
    println!("Agent SQL query:");
    match &result.agent_sql {
        Some(sql) => println!("  {sql}"),
        None => println!("  (no query generated)"),
    }

    println!();
    println!("Expected SQL query:");
    if test_case.expects_no_answer() {
        match &test_case.schema_output {
            Some(columns) => println!(
                "  No answer expected | Expected schema: {}",
                columns.join(", ")
            ),
            None => println!("  No answer expected"),
        }
    } else if let Some(sql) = &test_case.sql {
        println!("  {}", sql.trim());
    }

    println!();
    println!("Agent query results:");
    match &result.actual_data {
        Some(data) => print_data_preview(data),
        None => println!("  No results (query failed or not executed)"),
    }

    println!();
    println!("Expected query results:");
    if test_case.expects_no_answer() {
        println!("  No results expected");
    } else {
        match &result.expected_data {
            Some(data) => print_data_preview(data),
            None => println!("  No results (query failed or not executed)"),
        }
    }

    if let Some(error) = &result.error {
        println!();
        println!("⚠ Error: {error}");
    }
}

/// Print the end-of-run results table.
pub fn display_results(results: &[TestResult]) {
    let has_bytes = results.iter().any(|result| result.bytes_processed.is_some());
    let name_width = results
        .iter()
        .map(|result| result.name.chars().count())
        .max()
        .unwrap_or(4)
        .max(4);

    println!();
    println!("Test Results");

    let mut header = format!("{:<name_width$}  {:>8}  {:>8}", "Test", "Time (s)", "Tokens");
    if has_bytes {
        header.push_str(&format!("  {:>10}", "Bytes"));
    }
    header.push_str(&format!("  {:^6}  {:^7}  {:^6}", "Answer", "Correct", "Status"));
    println!("{header}");
    println!("{}", "─".repeat(header.chars().count()));

    for result in results {
        let mut line = format!(
            "{:<name_width$}  {:>8.2}  {:>8}",
            result.name,
            result.time_seconds,
            with_commas(result.total_tokens)
        );
        if has_bytes {
            line.push_str(&format!("  {:>10}", format_bytes(result.bytes_processed)));
        }
        let answer = match result.has_answer {
            None => "N/A",
            Some(true) => "Yes",
            Some(false) => "No",
        };
        let correct = if result.is_correct { "Yes" } else { "No" };
        let status = if result.is_correct { "✓ PASS" } else { "✗ FAIL" };
        line.push_str(&format!("  {answer:^6}  {correct:^7}  {status:^6}"));
        println!("{line}");
    }
}

/// Print summary statistics and the error digest.
pub fn display_summary(results: &[TestResult]) {
    if results.is_empty() {
        return;
    }

    let total = results.len();
    let passed = results.iter().filter(|result| result.is_correct).count();
    let expecting_answer = results
        .iter()
        .filter(|result| result.has_answer.is_some())
        .count();
    let answered = results
        .iter()
        .filter(|result| result.has_answer == Some(true))
        .count();
    let not_applicable = total - expecting_answer;
    let average_time = results.iter().map(|result| result.time_seconds).sum::<f64>() / total as f64;
    let total_tokens: u64 = results.iter().map(|result| result.total_tokens).sum();
    let total_bytes: u64 = results.iter().filter_map(|result| result.bytes_processed).sum();

    println!();
    println!("Summary");
    println!(
        "  Tests: {passed}/{total} passed ({:.1}%)",
        100.0 * passed as f64 / total as f64
    );
    if expecting_answer == 0 {
        println!("  Answer rate: N/A");
    } else {
        let suffix = if not_applicable > 0 {
            format!(" (+{not_applicable} N/A)")
        } else {
            String::new()
        };
        println!(
            "  Answer rate: {answered}/{expecting_answer} ({:.1}%){suffix}",
            100.0 * answered as f64 / expecting_answer as f64
        );
    }
    println!("  Average time: {average_time:.2} seconds");
    println!("  Average tokens: {}", with_commas(total_tokens / total as u64));
    println!("  Total tokens: {}", with_commas(total_tokens));
    if total_bytes > 0 {
        println!("  Total bytes processed: {}", format_bytes(Some(total_bytes)));
    }

    let failures: Vec<&TestResult> = results
        .iter()
        .filter(|result| result.error.is_some())
        .collect();
    if !failures.is_empty() {
        println!();
        println!("Errors:");
        for result in failures {
            println!(
                "  • {}: {}",
                result.name,
                result.error.as_deref().unwrap_or_default()
            );
        }
    }
}
