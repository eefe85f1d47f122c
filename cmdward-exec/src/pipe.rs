//! Pipe-based spawning for supervised commands.
//!
//! The child gets `/dev/null` for stdin and pipes for stdout/stderr. Each pipe
//! is drained by its own task into a bounded buffer so a chatty child never
//! blocks on a full pipe and never grows our memory without limit.

use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::process_group::{self, ProcessTree};

const READ_CHUNK: usize = 8_192;

/// What to spawn and how much output to keep.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Bytes kept per stream; the rest is read and discarded.
    pub capture_limit: usize,
}

impl SpawnOptions {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            capture_limit: 64 * 1024,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }
}

/// Bytes read from one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    /// Bytes past the capture limit were dropped.
    pub overflowed: bool,
}

/// A stream being drained in the background.
#[derive(Debug)]
pub struct StreamCapture {
    buffer: Arc<Mutex<CapturedStream>>,
    task: JoinHandle<()>,
}

impl StreamCapture {
    fn spawn<R>(reader: R, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(CapturedStream::default()));
        let task = tokio::spawn(read_bounded(reader, limit, Arc::clone(&buffer)));
        Self { buffer, task }
    }

    fn empty() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(CapturedStream::default())),
            task: tokio::spawn(async {}),
        }
    }

    /// Wait up to `drain` for EOF, then return whatever was captured.
    ///
    /// A descendant that escaped the process group can hold the pipe open
    /// forever; the reader is aborted in that case.
    pub async fn finish(mut self, drain: Duration) -> CapturedStream {
        if tokio::time::timeout(drain, &mut self.task).await.is_err() {
            self.task.abort();
            tracing::debug!("output pipe still open after drain window; keeping partial output");
        }
        std::mem::take(&mut *self.buffer.lock())
    }
}

async fn read_bounded<R>(mut reader: R, limit: usize, buffer: Arc<Mutex<CapturedStream>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut captured = buffer.lock();
                let room = limit.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.overflowed = true;
                }
                let keep = n.min(room);
                captured.bytes.extend_from_slice(&chunk[..keep]);
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!(error = %err, "stopped reading child output");
                break;
            }
        }
    }
}

/// A spawned group leader with its output being captured.
#[derive(Debug)]
pub struct SpawnedChild {
    pub child: Child,
    pub tree: ProcessTree,
    pub stdout: StreamCapture,
    pub stderr: StreamCapture,
}

/// Spawn `opts.program` as the leader of a new process group.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_in_new_group(opts: &SpawnOptions) -> io::Result<SpawnedChild> {
    if opts.program.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "missing program for pipe spawn",
        ));
    }

    let mut command = Command::new(&opts.program);
    command
        .args(&opts.args)
        .current_dir(&opts.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    process_group::configure_new_group(&mut command);

    let mut child = command.spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| io::Error::other("spawned child has no pid"))?;
    let tree = ProcessTree::for_leader(pid);
    process_group::track_tree(&child, tree);

    let stdout = child
        .stdout
        .take()
        .map(|out| StreamCapture::spawn(out, opts.capture_limit))
        .unwrap_or_else(StreamCapture::empty);
    let stderr = child
        .stderr
        .take()
        .map(|err| StreamCapture::spawn(err, opts.capture_limit))
        .unwrap_or_else(StreamCapture::empty);

    Ok(SpawnedChild {
        child,
        tree,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_reader_keeps_prefix_and_flags_overflow() {
        let data = std::io::Cursor::new(vec![b'a'; 10_000]);
        let capture = StreamCapture::spawn(data, 1_000);
        let captured = capture.finish(Duration::from_secs(1)).await;
        assert_eq!(captured.bytes.len(), 1_000);
        assert!(captured.overflowed);
    }

    #[tokio::test]
    async fn small_streams_are_kept_whole() {
        let capture = StreamCapture::spawn(std::io::Cursor::new(b"hello\n".to_vec()), 1_000);
        let captured = capture.finish(Duration::from_secs(1)).await;
        assert_eq!(captured.bytes, b"hello\n");
        assert!(!captured.overflowed);
    }

    #[test]
    fn empty_program_is_rejected() {
        let err = spawn_in_new_group(&SpawnOptions::new("", ".")).expect_err("must fail");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_leads_its_own_group() -> io::Result<()> {
        let spawned = spawn_in_new_group(
            &SpawnOptions::new("sh", ".").args(["-c", "echo out; echo err >&2"]),
        )?;
        let SpawnedChild {
            mut child,
            tree,
            stdout,
            stderr,
        } = spawned;

        assert_eq!(tree.pid, tree.pgid);
        assert_ne!(tree.pgid, nix::unistd::getpgrp().as_raw() as u32);

        let status = child.wait().await?;
        assert!(status.success());
        let out = stdout.finish(Duration::from_secs(1)).await;
        let err = stderr.finish(Duration::from_secs(1)).await;
        assert_eq!(out.bytes, b"out\n");
        assert_eq!(err.bytes, b"err\n");
        Ok(())
    }
}
