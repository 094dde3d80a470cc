pub mod agent;
pub mod config;
pub mod error;
pub mod executor;
pub mod types;

pub use agent::AgentClient;
pub use config::{ServiceConfig, CHAT_SERVER_PORT, SQL_SERVER_PORT};
pub use error::{ClientError, ClientResult};
pub use executor::{SqlClient, SqlOutcome};
pub use types::{MessagePart, OutgoingMessage, PromptExchange, Row};

pub mod prelude {
    pub use crate::agent::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::executor::*;
    pub use crate::types::*;
}
