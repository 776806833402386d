// =============================================================================
// Broker bridge — owns the Trade Republic child process
// =============================================================================
//
// Exactly one child process, spoken to over its own stdin/stdout in a second
// JSON-RPC-shaped protocol. A single mutex covers every write+read pair:
// interleaving byte writes from two concurrent callers would corrupt the
// stream, so this is the one case in the engine where a coarse lock is
// correct rather than a missed optimization.
// =============================================================================

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::protocol::bridge_codec::{decode_bridge_response, decode_handshake, encode_bridge_request, BridgeRequest};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

struct ChildHandle {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// The broker bridge. `child` is `None` until the first call, or after a
/// timeout/desync forces a respawn.
pub struct BrokerBridge {
    binary: String,
    args: Vec<String>,
    child: Mutex<Option<ChildHandle>>,
    next_id: AtomicU64,
}

impl BrokerBridge {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            child: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue one JSON-RPC call to the broker child, spawning or respawning it
    /// as needed. Holds the mutex for the full write+read cycle.
    pub async fn call(&self, method: &str, params: Value) -> EngineResult<Value> {
        let mut guard = self.child.lock().await;

        if guard.is_none() {
            *guard = Some(self.spawn().await?);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let request = BridgeRequest {
            method: method.to_string(),
            params,
            id: id.clone(),
        };

        let result = self.call_once(guard.as_mut().unwrap(), &request).await;

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                // Any bridge-level failure invalidates the child: the next
                // caller respawns from a clean slate.
                if let Some(mut handle) = guard.take() {
                    let _ = handle.child.kill().await;
                }
                Err(e)
            }
        }
    }

    async fn call_once(&self, handle: &mut ChildHandle, request: &BridgeRequest) -> EngineResult<Value> {
        let bytes = encode_bridge_request(request);
        handle
        .stdin
        .write_all(&bytes)
        .await
        .map_err(EngineError::Io)?;
        handle.stdin.flush().await.map_err(EngineError::Io)?;

        let mut line = String::new();
        let read = timeout(REQUEST_TIMEOUT, handle.stdout.read_line(&mut line)).await;

        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(EngineError::Io(e)),
            Err(_) => return Err(EngineError::BridgeTimeout(REQUEST_TIMEOUT)),
        };
        if n == 0 {
            return Err(EngineError::BridgeStartupFailed("broker child closed stdout".into()));
        }

        let response = decode_bridge_response(line.as_bytes())
        .map_err(|e| EngineError::DataFetchFailed(format!("malformed bridge response: {e:?}")))?;

        if response.id != request.id {
            return Err(EngineError::BridgeDesync {
                    expected: request.id.clone(),
                    got: response.id,
                });
        }

        if let Some(err) = response.error {
            return Err(EngineError::TrAuth(err.message));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn spawn(&self) -> EngineResult<ChildHandle> {
        info!(binary = %self.binary, "spawning broker bridge child process");
        let mut child = Command::new(&self.binary)
        .args(&self.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::BridgeStartupFailed(format!("failed to spawn: {e}")))?;

        let stdin = child
        .stdin
        .take()
        .ok_or_else(|| EngineError::BridgeStartupFailed("no stdin handle".into()))?;
        let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::BridgeStartupFailed("no stdout handle".into()))?;
        let mut stdout = BufReader::new(stdout);

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                    let mut reader = BufReader::new(stderr);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        match reader.read_line(&mut line).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => warn!(target: "broker_bridge::stderr", "{}", line.trim_end()),
                        }
                    }
                });
        }

        let mut handshake_line = String::new();
        let read = timeout(HANDSHAKE_TIMEOUT, stdout.read_line(&mut handshake_line)).await;
        match read {
            Ok(Ok(n)) if n > 0 => {
                let handshake = decode_handshake(handshake_line.as_bytes())
                .map_err(|e| EngineError::BridgeStartupFailed(format!("malformed handshake: {e:?}")))?;
                if handshake.status != "ready" {
                    return Err(EngineError::BridgeStartupFailed(format!(
                                "unexpected handshake status '{}'",
                                handshake.status
                            )));
                }
            }
            Ok(Ok(_)) => {
                return Err(EngineError::BridgeStartupFailed("child closed stdout before handshake".into()))
            }
            Ok(Err(e)) => return Err(EngineError::BridgeStartupFailed(format!("handshake read error: {e}"))),
            Err(_) => return Err(EngineError::BridgeStartupFailed("handshake timed out after 5s".into())),
        }

        Ok(ChildHandle {
                child,
                stdin,
                stdout,
            })
    }

    /// Kill the child unconditionally. Called on engine shutdown.
    pub async fn shutdown(&self) {
        if let Some(mut handle) = self.child.lock().await.take() {
            if let Err(e) = handle.child.kill().await {
                error!(error = %e, "failed to kill broker bridge child on shutdown");
            }
        }
    }
}
