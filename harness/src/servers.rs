//! Lifecycle management for the two backing servers of a test run.
//!
//! The harness needs a chat/agent server and a SQL execution server on their
//! fixed localhost ports. Either may already be running (started manually by
//! a developer); in that case it is reused and left alone on teardown. Only
//! processes this supervisor spawned itself are terminated when the run ends.

use crate::config::NaoConfig;
use client::{CHAT_SERVER_PORT, SQL_SERVER_PORT};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Shared-secret file used for inter-process auth with the chat server.
pub const SECRET_FILE_NAME: &str = ".nao-secret";
const CHAT_SERVER_BINARY: &str = "nao-chat-server";

/// Length of a 32-byte URL-safe token.
const SECRET_LEN: usize = 43;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_TIMEOUT: Duration = Duration::from_secs(30);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// No runnable artifact for a server could be located.
    #[error("No runnable artifact found for the {server} server. {hint}")]
    ArtifactNotFound {
        server: &'static str,
        hint: String,
    },

    /// The server process could not be spawned.
    #[error("Failed to start the {server} server: {source}")]
    SpawnFailed {
        server: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The server never opened its port within the readiness timeout.
    #[error("The {server} server did not open port {port} within {timeout}s")]
    StartupTimeout {
        server: &'static str,
        port: u16,
        timeout: u64,
    },
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Supervisor lifecycle. There is no way back from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

/// How to launch one server when it is not already running.
#[derive(Debug, Clone)]
struct LaunchPlan {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    /// Directory holding the auth secret file, for servers that need one.
    secret_dir: Option<PathBuf>,
}

/// One supervised server. `child` is `None` when an externally started
/// instance is being reused.
#[derive(Debug, Default)]
struct ManagedServer {
    child: Option<Child>,
}

/// Starts, health-checks, and tears down the backing servers.
pub struct ServerManager {
    config: NaoConfig,
    project_folder: PathBuf,
    chat: ManagedServer,
    sql: ManagedServer,
    state: SupervisorState,
}

impl ServerManager {
    pub fn new(config: NaoConfig, project_folder: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_folder: project_folder.into(),
            chat: ManagedServer::default(),
            sql: ManagedServer::default(),
            state: SupervisorState::NotStarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Start both servers, skipping any that already answer on their port.
    ///
    /// On any failure everything started so far is torn down before the
    /// error is returned; the run must not proceed on half a stack.
    pub async fn start(&mut self) -> SupervisorResult<()> {
        self.state = SupervisorState::Starting;
        let mut env = self.build_env();

        if is_port_open(SQL_SERVER_PORT) {
            println!("  SQL execution server already running on port {SQL_SERVER_PORT}");
        } else {
            let plan = match sql_server_plan() {
                Ok(plan) => plan,
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            };
            println!("  Starting SQL execution server...");
            match spawn_server(&plan, &env, "SQL execution") {
                Ok(child) => self.sql.child = Some(child),
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
            if !wait_for_port(SQL_SERVER_PORT, READY_TIMEOUT).await {
                println!("✗ SQL execution server failed to start");
                self.stop();
                return Err(SupervisorError::StartupTimeout {
                    server: "SQL execution",
                    port: SQL_SERVER_PORT,
                    timeout: READY_TIMEOUT.as_secs(),
                });
            }
            println!("✓ SQL execution server ready");
        }

        if is_port_open(CHAT_SERVER_PORT) {
            println!("  Chat server already running on port {CHAT_SERVER_PORT}");
        } else {
            let plan = match chat_server_plan() {
                Ok(plan) => plan,
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            };
            if let Some(secret_dir) = &plan.secret_dir {
                if let Some(secret) = ensure_auth_secret(secret_dir) {
                    env.push(("BETTER_AUTH_SECRET".to_string(), secret));
                }
            }
            println!("  Starting chat server...");
            match spawn_server(&plan, &env, "chat") {
                Ok(child) => self.chat.child = Some(child),
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
            if !wait_for_port(CHAT_SERVER_PORT, READY_TIMEOUT).await {
                println!("✗ Chat server failed to start");
                self.stop();
                return Err(SupervisorError::StartupTimeout {
                    server: "chat",
                    port: CHAT_SERVER_PORT,
                    timeout: READY_TIMEOUT.as_secs(),
                });
            }
            println!("✓ Chat server ready");
        }

        self.state = SupervisorState::Running;
        Ok(())
    }

    /// Stop every server this supervisor spawned. Reused servers are left
    /// running. Safe to call more than once; later calls are no-ops.
    pub fn stop(&mut self) {
        if self.state == SupervisorState::Stopped {
            return;
        }
        if let Some(mut child) = self.chat.child.take() {
            terminate("chat", &mut child);
        }
        if let Some(mut child) = self.sql.child.take() {
            terminate("SQL execution", &mut child);
        }
        self.state = SupervisorState::Stopped;
        println!("  Servers stopped");
    }

    fn build_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("NAO_TEST_MODE".to_string(), "true".to_string()),
            (
                "NAO_DEFAULT_PROJECT_PATH".to_string(),
                self.project_folder.display().to_string(),
            ),
            (
                "FASTAPI_URL".to_string(),
                format!("http://localhost:{SQL_SERVER_PORT}"),
            ),
        ];
        if let Some(llm) = &self.config.llm {
            env.push((
                format!("{}_API_KEY", llm.provider.to_uppercase()),
                llm.api_key.clone(),
            ));
        }
        env
    }
}

impl Drop for ServerManager {
    fn drop(&mut self) {
        if self.chat.child.is_some() || self.sql.child.is_some() {
            warn!("server manager dropped while servers were running");
            self.stop();
        }
    }
}

/// Check whether something already answers on a localhost port.
pub fn is_port_open(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, PORT_PROBE_TIMEOUT).is_ok()
}

/// Poll a localhost port until it answers or the timeout lapses.
pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if is_port_open(port) {
            return true;
        }
        sleep(READY_POLL_INTERVAL).await;
    }
    false
}

/// Resolve the auth secret for the chat server.
///
/// An explicit `BETTER_AUTH_SECRET` in the environment wins and nothing is
/// written. Otherwise the persisted secret file is reused when present, or a
/// fresh secret is generated and stored with owner-only permissions.
pub fn ensure_auth_secret(secret_dir: &Path) -> Option<String> {
    if std::env::var("BETTER_AUTH_SECRET").is_ok_and(|value| !value.is_empty()) {
        return None;
    }

    let secret_path = secret_dir.join(SECRET_FILE_NAME);

    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Some(existing.to_string());
        }
    }

    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect();

    match std::fs::write(&secret_path, &secret) {
        Ok(()) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(
                    &secret_path,
                    std::fs::Permissions::from_mode(0o600),
                );
            }
        }
        Err(e) => warn!("could not persist auth secret: {e}"),
    }

    Some(secret)
}

/// Directory of bundled server artifacts, next to the installed binary.
fn bundled_bin_dir() -> Option<PathBuf> {
    Some(std::env::current_exe().ok()?.parent()?.join("bin"))
}

fn find_in_ancestors(relative: &Path) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    cwd.ancestors()
        .map(|ancestor| ancestor.join(relative))
        .find(|candidate| candidate.exists())
}

fn chat_server_plan() -> SupervisorResult<LaunchPlan> {
    if let Some(bin_dir) = bundled_bin_dir() {
        let binary = bin_dir.join(CHAT_SERVER_BINARY);
        if binary.exists() {
            return Ok(LaunchPlan {
                program: binary.display().to_string(),
                args: vec![],
                working_dir: Some(bin_dir.clone()),
                secret_dir: Some(bin_dir),
            });
        }
    }

    if let Some(entrypoint) = find_in_ancestors(Path::new("apps/backend/src/index.ts")) {
        let backend_dir = entrypoint.parent().and_then(Path::parent);
        if let Some(backend_dir) = backend_dir {
            debug!("chat server binary not bundled, using development mode (bun)");
            return Ok(LaunchPlan {
                program: "bun".to_string(),
                args: vec!["run".to_string(), "src/index.ts".to_string()],
                working_dir: Some(backend_dir.to_path_buf()),
                secret_dir: Some(backend_dir.to_path_buf()),
            });
        }
    }

    Err(SupervisorError::ArtifactNotFound {
        server: "chat",
        hint: "Build the server or start the backend manually: cd apps/backend && bun run dev"
            .to_string(),
    })
}

fn sql_server_plan() -> SupervisorResult<LaunchPlan> {
    if let Some(bin_dir) = bundled_bin_dir() {
        let bundled = bin_dir.join("fastapi").join("main.py");
        if bundled.exists() {
            return Ok(LaunchPlan {
                program: "python3".to_string(),
                args: vec![bundled.display().to_string()],
                working_dir: None,
                secret_dir: None,
            });
        }
    }

    if let Some(entrypoint) = find_in_ancestors(Path::new("apps/backend/fastapi/main.py")) {
        debug!("SQL execution server not bundled, using development entrypoint");
        return Ok(LaunchPlan {
            program: "python3".to_string(),
            args: vec![entrypoint.display().to_string()],
            working_dir: None,
            secret_dir: None,
        });
    }

    Err(SupervisorError::ArtifactNotFound {
        server: "SQL execution",
        hint: "No bundled or development entrypoint was found".to_string(),
    })
}

fn spawn_server(
    plan: &LaunchPlan,
    env: &[(String, String)],
    server: &'static str,
) -> SupervisorResult<Child> {
    let mut command = Command::new(&plan.program);
    command
        .args(&plan.args)
        .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = &plan.working_dir {
        command.current_dir(dir);
    }

    debug!(server, program = %plan.program, "spawning server process");
    command
        .spawn()
        .map_err(|source| SupervisorError::SpawnFailed { server, source })
}

/// Graceful terminate, bounded wait, then force-kill.
fn terminate(server: &str, child: &mut Child) {
    debug!(server, pid = child.id(), "stopping server process");

    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .arg(child.id().to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let deadline = Instant::now() + STOP_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(Duration::from_millis(100)),
                Err(_) => break,
            }
        }
        warn!(server, "server did not exit after terminate, killing");
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::net::TcpListener;

    #[test]
    fn test_is_port_open_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_open(port));
    }

    #[test]
    fn test_is_port_open_closed_port() {
        // Port 1 is privileged and effectively never bound on dev machines.
        assert!(!is_port_open(1));
    }

    #[tokio::test]
    async fn test_wait_for_port_times_out() {
        let start = Instant::now();
        assert!(!wait_for_port(1, Duration::from_millis(300)).await);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_wait_for_port_sees_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(wait_for_port(port, Duration::from_secs(1)).await);
    }

    #[test]
    #[serial]
    fn test_secret_generated_and_reused() {
        std::env::remove_var("BETTER_AUTH_SECRET");
        let dir = tempfile::tempdir().unwrap();

        let first = ensure_auth_secret(dir.path()).unwrap();
        assert_eq!(first.chars().count(), SECRET_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(dir.path().join(SECRET_FILE_NAME).exists());

        let second = ensure_auth_secret(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_secret_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        std::env::remove_var("BETTER_AUTH_SECRET");
        let dir = tempfile::tempdir().unwrap();
        ensure_auth_secret(dir.path()).unwrap();

        let mode = std::fs::metadata(dir.path().join(SECRET_FILE_NAME))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    #[serial]
    fn test_secret_env_var_wins() {
        std::env::set_var("BETTER_AUTH_SECRET", "from-env");
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_auth_secret(dir.path()).is_none());
        assert!(!dir.path().join(SECRET_FILE_NAME).exists());
        std::env::remove_var("BETTER_AUTH_SECRET");
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_and_terminate_process() {
        let plan = LaunchPlan {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
            working_dir: None,
            secret_dir: None,
        };
        let mut child = spawn_server(&plan, &[], "sleep").unwrap();
        terminate("sleep", &mut child);
        // The process was reaped; its exit status is already cached.
        assert!(child.try_wait().is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_start_fails_without_artifacts_and_tears_down() {
        if is_port_open(SQL_SERVER_PORT) || is_port_open(CHAT_SERVER_PORT) {
            // Live servers in this environment; the failure path is not reachable.
            return;
        }
        let config = NaoConfig {
            project_name: "demo".to_string(),
            llm: None,
        };
        let mut manager = ServerManager::new(config, "/tmp/demo");
        assert!(manager.start().await.is_err());
        assert_eq!(manager.state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_manager_state_machine() {
        let config = NaoConfig {
            project_name: "demo".to_string(),
            llm: None,
        };
        let mut manager = ServerManager::new(config, "/tmp/demo");
        assert_eq!(manager.state(), SupervisorState::NotStarted);

        manager.stop();
        assert_eq!(manager.state(), SupervisorState::Stopped);

        // stop() stays idempotent.
        manager.stop();
        assert_eq!(manager.state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_build_env_injects_api_key() {
        let config = NaoConfig {
            project_name: "demo".to_string(),
            llm: Some(crate::config::LlmConfig {
                provider: "openai".to_string(),
                api_key: "sk-test".to_string(),
            }),
        };
        let manager = ServerManager::new(config, "/tmp/demo");
        let env = manager.build_env();

        let lookup = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(lookup("NAO_TEST_MODE"), Some("true"));
        assert_eq!(lookup("NAO_DEFAULT_PROJECT_PATH"), Some("/tmp/demo"));
        assert_eq!(lookup("FASTAPI_URL"), Some("http://localhost:8005"));
        assert_eq!(lookup("OPENAI_API_KEY"), Some("sk-test"));
    }
}
