use crate::config::ServiceConfig;
use crate::error::{ClientError, ClientResult};
use crate::types::Row;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    sql: &'a str,
    nao_project_folder: &'a str,
    database_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    data: Vec<Row>,
    bytes_processed: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    detail: Option<String>,
}

/// Outcome of a SQL execution. Failures are values, not errors: callers get
/// an `Error` variant for transport problems and server rejections alike.
#[derive(Debug, Clone)]
pub enum SqlOutcome {
    Rows {
        data: Vec<Row>,
        bytes_processed: Option<u64>,
    },
    Error {
        message: String,
    },
}

/// Client for the SQL execution endpoint.
pub struct SqlClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SqlClient {
    pub fn new(config: &ServiceConfig) -> ClientResult<Self> {
        config
            .validate()
            .map_err(|message| ClientError::InvalidConfig { message })?;

        let http = reqwest::Client::builder()
            .timeout(config.sql_timeout)
            .build()?;

        let endpoint = format!("{}/execute_sql", config.sql_base_url.trim_end_matches('/'));

        Ok(Self { http, endpoint })
    }

    /// Execute a SQL query in the given project folder context.
    pub async fn execute(
        &self,
        sql: &str,
        project_folder: &str,
        database_id: Option<&str>,
    ) -> SqlOutcome {
        match self.post(sql, project_folder, database_id).await {
            Ok(outcome) => outcome,
            Err(e) => SqlOutcome::Error {
                message: e.to_string(),
            },
        }
    }

    async fn post(
        &self,
        sql: &str,
        project_folder: &str,
        database_id: Option<&str>,
    ) -> ClientResult<SqlOutcome> {
        debug!(endpoint = %self.endpoint, "executing sql");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&ExecuteRequest {
                sql,
                nao_project_folder: project_folder,
                database_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string();
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                reason
            } else {
                serde_json::from_str::<ErrorDetail>(&body)
                    .ok()
                    .and_then(|parsed| parsed.detail)
                    .unwrap_or(reason)
            };
            return Ok(SqlOutcome::Error { message });
        }

        let body: ExecuteResponse = response.json().await?;
        Ok(SqlOutcome::Rows {
            data: body.data,
            bytes_processed: body.bytes_processed,
        })
    }
}
