use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Port the chat/agent server listens on.
pub const CHAT_SERVER_PORT: u16 = 5005;
/// Port the SQL execution server listens on.
pub const SQL_SERVER_PORT: u16 = 8005;

/// Endpoints and timeouts for the two backing services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub agent_base_url: String,
    pub sql_base_url: String,
    /// Agent calls are bounded by model latency, so this is generous.
    pub agent_timeout: Duration,
    pub sql_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            agent_base_url: format!("http://localhost:{CHAT_SERVER_PORT}"),
            sql_base_url: format!("http://localhost:{SQL_SERVER_PORT}"),
            agent_timeout: Duration::from_secs(300),
            sql_timeout: Duration::from_secs(60),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.agent_base_url = base_url.into();
        self
    }

    pub fn with_sql_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.sql_base_url = base_url.into();
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_sql_timeout(mut self, timeout: Duration) -> Self {
        self.sql_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        for url in [&self.agent_base_url, &self.sql_base_url] {
            if url.is_empty() {
                return Err("Base URL cannot be empty".to_string());
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Base URL must start with http:// or https://".to_string());
            }
        }

        if self.agent_timeout.is_zero() || self.sql_timeout.is_zero() {
            return Err("Timeouts must be greater than 0".to_string());
        }

        Ok(())
    }
}
