//! Async client for the driver worker process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};

use super::error::{WorkerError, WorkerResult};
use super::protocol::{
    methods, AckResponse, ErrorInfo, ExecuteQueryParams, ExecuteQueryResponse,
    OpenSessionParams, OpenSessionResponse, RequestEnvelope, ResponseEnvelope, SessionParams,
};
use crate::config::Settings;

/// Default timeout for requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

/// Async client for the driver worker.
///
/// The client spawns the worker as a child process and communicates via
/// NDJSON (newline-delimited JSON) over stdin/stdout. Each request has a
/// unique ID for correlation with responses, enabling concurrent requests.
///
/// The worker keeps database sessions open between requests; the client is
/// shared by every [`WorkerConnection`](crate::connection::WorkerConnection).
pub struct WorkerClient {
    /// Writer for sending requests to worker stdin.
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,

    /// Map of pending request IDs to response channels.
    pending: PendingMap,

    /// Handle to the worker child process.
    _child: Child,

    /// Handle to the background reader task.
    reader_task: tokio::task::JoinHandle<()>,

    /// Request timeout duration.
    timeout: Duration,
}

impl WorkerClient {
    /// Spawn a new worker process.
    pub async fn spawn<P: AsRef<Path>>(worker_path: P) -> WorkerResult<Self> {
        Self::spawn_with_args_and_timeout(worker_path, &[], DEFAULT_TIMEOUT).await
    }

    /// Spawn the worker described by the `[worker]` settings section.
    ///
    /// Returns `Ok(None)` when no worker is configured and none is found on
    /// the search path; networked engines are then unavailable.
    pub async fn spawn_with_settings(settings: &Settings) -> WorkerResult<Option<Self>> {
        let Some(worker_path) = Self::resolve_worker_path(settings)? else {
            return Ok(None);
        };
        let timeout = settings
            .worker
            .request_timeout()
            .map_err(|e| WorkerError::remote("INVALID_CONFIG", e.to_string()))?;

        tracing::info!(path = %worker_path.display(), "spawning driver worker");
        let client =
            Self::spawn_with_args_and_timeout(&worker_path, &settings.worker.args, timeout)
                .await?;
        Ok(Some(client))
    }

    /// Resolve the worker binary path from settings.
    fn resolve_worker_path(settings: &Settings) -> WorkerResult<Option<PathBuf>> {
        let configured = settings
            .worker_path()
            .map_err(|e| WorkerError::remote("INVALID_CONFIG", e.to_string()))?;
        if let Some(path) = configured {
            if !path.exists() {
                return Err(WorkerError::SpawnFailed(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("worker binary not found at {}", path.display()),
                )));
            }
            return Ok(Some(path));
        }

        let candidates = [
            "schemascope-worker",
            "./schemascope-worker",
            "./worker/schemascope-worker",
        ];
        Ok(candidates
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists()))
    }

    /// Spawn a worker with arguments and custom timeout.
    pub async fn spawn_with_args_and_timeout<P: AsRef<Path>>(
        worker_path: P,
        args: &[String],
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let mut child = Command::new(worker_path.as_ref())
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(WorkerError::SpawnFailed(std::io::Error::other(
                "worker stdio not captured",
            )));
        };

        let stdin = Arc::new(Mutex::new(BufWriter::new(stdin)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Spawn background reader task
        let reader_task = Self::spawn_reader_task(stdout, pending.clone());

        Ok(Self {
            stdin,
            pending,
            _child: child,
            reader_task,
            timeout,
        })
    }

    /// Spawn the background task that reads responses from the worker.
    fn spawn_reader_task(
        stdout: ChildStdout,
        pending: PendingMap,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(resp) => {
                            let mut pending = pending.lock().await;
                            if let Some(tx) = pending.remove(&resp.id) {
                                let _ = tx.send(resp);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "worker: failed to parse response");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "worker: read error");
                        break;
                    }
                }
            }

            tracing::warn!("driver worker exited");

            // Fail every waiter rather than letting it run into its timeout
            let mut pending = pending.lock().await;
            for (id, tx) in pending.drain() {
                let error_response = ResponseEnvelope {
                    id,
                    success: false,
                    result: None,
                    error: Some(ErrorInfo {
                        code: "WORKER_EXITED".to_string(),
                        message: "Worker process exited unexpectedly".to_string(),
                        vendor_code: None,
                    }),
                };
                let _ = tx.send(error_response);
            }
        })
    }

    /// Send a request to the worker and wait for a response.
    pub async fn request<P, R>(&self, method: &str, params: P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if !self.is_alive() {
            return Err(WorkerError::WorkerExited);
        }

        let id = uuid::Uuid::new_v4().to_string();

        let request = RequestEnvelope {
            id: id.clone(),
            method: method.to_string(),
            params: serde_json::to_value(params).map_err(WorkerError::SerializeFailed)?,
        };

        // Register response channel
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        // Send request
        {
            let mut stdin = self.stdin.lock().await;
            let line =
                serde_json::to_string(&request).map_err(WorkerError::SerializeFailed)? + "\n";
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                self.pending.lock().await.remove(&id);
                return Err(WorkerError::WriteFailed(e));
            }
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(WorkerError::ChannelClosed),
            Err(_) => {
                // Drop the pending entry so a late response is discarded
                self.pending.lock().await.remove(&id);
                return Err(WorkerError::Timeout(self.timeout.as_millis() as u64));
            }
        };

        if response.success {
            let result = response.result.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(result).map_err(WorkerError::DeserializeFailed)
        } else {
            let error = response.error.unwrap_or_else(|| ErrorInfo {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
                vendor_code: None,
            });
            Err(Self::classify_error(error))
        }
    }

    /// Classify a worker error into a more specific error type.
    fn classify_error(error: ErrorInfo) -> WorkerError {
        let ErrorInfo {
            code,
            message,
            vendor_code,
        } = error;
        match code.as_str() {
            "WORKER_EXITED" => WorkerError::WorkerExited,
            "DRIVER_NOT_FOUND" => WorkerError::DriverNotFound(message),
            "CONNECTION_FAILED" => WorkerError::ConnectionFailed {
                vendor_code,
                message,
            },
            "SESSION_NOT_FOUND" => WorkerError::SessionNotFound(message),
            "QUERY_FAILED" | "TIMEOUT" => WorkerError::Query {
                code,
                vendor_code,
                message,
            },
            _ => WorkerError::remote(code, message),
        }
    }

    /// Check if the worker is still running.
    ///
    /// Returns `false` once the reader task has finished, which happens when
    /// the worker closes its stdout.
    pub fn is_alive(&self) -> bool {
        !self.reader_task.is_finished()
    }

    /// Get the current request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

// Session operations
impl WorkerClient {
    /// Open a database session; returns the worker's session id.
    pub async fn open_session(
        &self,
        driver: &str,
        connection_string: &str,
    ) -> WorkerResult<OpenSessionResponse> {
        self.request(
            methods::OPEN_SESSION,
            OpenSessionParams {
                driver: driver.to_string(),
                connection_string: connection_string.to_string(),
            },
        )
        .await
    }

    pub async fn close_session(&self, session_id: &str) -> WorkerResult<()> {
        let _: AckResponse = self
            .request(
                methods::CLOSE_SESSION,
                SessionParams {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn ping_session(&self, session_id: &str) -> WorkerResult<()> {
        let _: AckResponse = self
            .request(
                methods::PING_SESSION,
                SessionParams {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Execute a parameterized statement on an open session.
    pub async fn execute(
        &self,
        session_id: &str,
        sql: &str,
        args: &[serde_json::Value],
    ) -> WorkerResult<ExecuteQueryResponse> {
        self.request(
            methods::EXECUTE_QUERY,
            ExecuteQueryParams {
                session_id: session_id.to_string(),
                sql: sql.to_string(),
                args: args.to_vec(),
            },
        )
        .await
    }
}
