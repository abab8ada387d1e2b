//! Agent process handle
//!
//! Each agent runs in its own process group so a kill also reaches any
//! helpers it forked. Output is drained by background readers from spawn
//! onward so a chatty agent never blocks on a full pipe.

use super::config::AgentCommand;
use crate::task::ExecutionRequest;
use agentd_foundation::{Error, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Prompt file written into the task's scratch directory
pub const PROMPT_FILE: &str = "prompt.txt";

/// Environment variable carrying the request's project id
pub const PROJECT_ID_ENV: &str = "AGENTD_PROJECT_ID";

/// A spawned agent process
pub(crate) struct RunningProcess {
    child: Child,
    pid: u32,
    started_at: Instant,
    output: OutputReaders,
    runtime: Handle,
}

impl RunningProcess {
    /// Write the prompt file and launch the agent with it on stdin
    pub fn spawn(agent: &AgentCommand, request: &ExecutionRequest, workdir: &Path) -> Result<Self> {
        let prompt_path = workdir.join(PROMPT_FILE);
        std::fs::write(&prompt_path, &request.prompt)
            .map_err(|e| Error::Task(format!("Failed to write prompt file: {}", e)))?;
        let stdin = std::fs::File::open(&prompt_path)
            .map_err(|e| Error::Task(format!("Failed to open prompt file: {}", e)))?;

        let mut cmd = Command::new(&agent.program);
        cmd.args(agent.args_for(&request.model))
            .current_dir(workdir)
            .env(PROJECT_ID_ENV, &request.project_id)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Task(format!("Failed to spawn {}: {}", agent.program, e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Task("Spawned process has no pid".to_string()))?;

        let output = OutputReaders {
            stdout: child.stdout.take().map(StreamReader::spawn),
            stderr: child.stderr.take().map(StreamReader::spawn),
        };

        debug!("Spawned {} (pid {})", agent.program, pid);

        Ok(Self {
            child,
            pid,
            started_at: Instant::now(),
            output,
            runtime: Handle::current(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Non-blocking exit check
    pub fn try_exit(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Hand over the output readers; later calls get empty readers
    pub fn take_output(&mut self) -> OutputReaders {
        std::mem::take(&mut self.output)
    }

    /// SIGKILL the process group and reap in the background
    pub fn kill(mut self) {
        #[cfg(unix)]
        signal_group(self.pid, nix::sys::signal::Signal::SIGKILL);

        if let Err(e) = self.child.start_kill() {
            debug!("start_kill on pid {}: {}", self.pid, e);
        }
        self.output.abort();

        let mut child = self.child;
        let pid = self.pid;
        self.runtime.spawn(async move {
            if let Err(e) = child.wait().await {
                debug!("Failed to reap pid {}: {}", pid, e);
            }
        });
    }
}

/// Send SIGTERM to a process group
pub fn terminate_group(pid: u32) {
    #[cfg(unix)]
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);

    #[cfg(not(unix))]
    debug!("No SIGTERM on this platform, pid {} left for force kill", pid);
}

/// SIGKILL whatever is left in a process group. Used once the leader is
/// gone so backgrounded helpers do not outlive their task.
pub fn kill_group(pid: u32) {
    #[cfg(unix)]
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);

    #[cfg(not(unix))]
    debug!("No process groups on this platform, pid {} not signalled", pid);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        // ESRCH once the group is gone
        debug!("Failed to send {} to group {}: {}", signal, pid, e);
    }
}

// ============================================================================
// Output capture
// ============================================================================

/// Background readers for stdout/stderr
#[derive(Default)]
pub(crate) struct OutputReaders {
    stdout: Option<StreamReader>,
    stderr: Option<StreamReader>,
}

impl OutputReaders {
    /// Wait for both streams to close, up to `limit` each. A stream still
    /// open at the limit yields what was read so far.
    pub async fn collect(self, limit: Duration) -> (String, String) {
        let stdout = match self.stdout {
            Some(reader) => reader.finish(limit).await,
            None => String::new(),
        };
        let stderr = match self.stderr {
            Some(reader) => reader.finish(limit).await,
            None => String::new(),
        };
        (stdout, stderr)
    }

    fn abort(&mut self) {
        for reader in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            reader.handle.abort();
        }
    }
}

/// One pipe drained into a shared buffer
struct StreamReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl StreamReader {
    fn spawn<R: AsyncRead + Unpin + Send + 'static>(mut reader: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!("Output stream read error: {}", e);
                        break;
                    }
                }
            }
        });
        Self { buf, handle }
    }

    async fn finish(mut self, limit: Duration) -> String {
        match tokio::time::timeout(limit, &mut self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Output reader failed: {}", e),
            Err(_) => {
                // Something outside the group still holds the pipe open
                debug!("Output pipe still open after {:?}, keeping partial output", limit);
                self.handle.abort();
            }
        }
        let bytes = std::mem::take(&mut *self.buf.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
