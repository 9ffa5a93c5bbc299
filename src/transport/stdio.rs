use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use crate::error::{Result, TransportError};
use super::{Connection, Transport};

const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

pub struct StdioTransport {
    plugin_id: String,
    command: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl StdioTransport {
    pub fn new(plugin_id: String) -> Self {
        Self {
            plugin_id,
            command: PathBuf::new(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn with_command(mut self, command: PathBuf, args: Vec<String>) -> Self {
        self.command = command;
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to spawn {}: {}",
                self.command.display(),
                e
            ))
        })?;

        let stdin = child.stdin.take()
            .ok_or_else(|| TransportError::ConnectionFailed("Failed to get stdin".into()))?;
        let stdout = child.stdout.take()
            .ok_or_else(|| TransportError::ConnectionFailed("Failed to get stdout".into()))?;
        let pid = child.id();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(self.plugin_id.clone(), stderr));
        }

        tracing::debug!(plugin_id = %self.plugin_id, pid = ?pid, "Spawned plugin process");

        Ok(Arc::new(StdioConnection {
            plugin_id: self.plugin_id.clone(),
            pid,
            child: StdMutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(FramedRead::new(
                stdout,
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            )),
            closed: AtomicBool::new(false),
            discarded_line: AtomicBool::new(false),
        }))
    }
}

/// Plugin stderr is diagnostic output; surface it through tracing.
async fn forward_stderr(plugin_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(plugin_id = %plugin_id, "{}", line);
    }
}

pub struct StdioConnection {
    plugin_id: String,
    pid: Option<u32>,
    child: StdMutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<FramedRead<ChildStdout, LinesCodec>>,
    closed: AtomicBool,
    /// Set after an oversized line; the reader yields one `None` before resuming.
    discarded_line: AtomicBool,
}

#[async_trait]
impl Connection for StdioConnection {
    async fn send(&self, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if !data.ends_with(b"\n") {
            stdin.write_all(b"\n")
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        stdin.flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        Ok(())
    }

    async fn recv(&self) -> Result<Bytes> {
        let mut stdout = self.stdout.lock().await;
        loop {
            match stdout.next().await {
                Some(Ok(line)) => {
                    self.discarded_line.store(false, Ordering::SeqCst);
                    return Ok(Bytes::from(line));
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    // The codec skips the rest of the line on the next read.
                    self.discarded_line.store(true, Ordering::SeqCst);
                    return Err(TransportError::InvalidFormat.into());
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()).into());
                }
                None if self.discarded_line.swap(false, Ordering::SeqCst) => continue,
                None => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Err(TransportError::Closed.into());
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);

        let mut child = match self.child.lock() {
            Ok(child) => child,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Ok(None) = child.try_wait() {
            if let Err(e) = child.start_kill() {
                tracing::warn!(plugin_id = %self.plugin_id, "Failed to kill plugin process: {}", e);
            }
        }

        Ok(())
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }

        let exited = match self.child.lock() {
            Ok(mut child) => match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(
                        plugin_id = %self.plugin_id,
                        pid = ?self.pid,
                        %status,
                        "Plugin process exited"
                    );
                    true
                }
                Ok(None) => false,
                Err(_) => true,
            },
            Err(_) => true,
        };

        if exited {
            self.closed.store(true, Ordering::SeqCst);
        }
        exited
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}
