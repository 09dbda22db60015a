//! Live remuxing of browser-incompatible containers into fragmented MP4.
//!
//! Each active client connection owns exactly one external process. The process is
//! wrapped in a [`RemuxSession`] whose `Drop` kills it, so every exit path (normal
//! end, client disconnect, error before the first byte) tears it down.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::RemuxConfig,
    error::{AppError, AppResult},
    proxy::stream::ResponseStream,
};

/// Parameters of one remux: where to read, how to look like a browser, and
/// what to produce on stdout.
#[derive(Debug, Clone)]
pub struct RemuxJob {
    pub input: Url,
    pub user_agent: String,
    pub referer: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub native_rate: bool,
    pub io_timeout: Duration,
}

impl RemuxJob {
    /// Fragmented MP4 on stdout with the video stream copied untouched and only the
    /// audio re-encoded.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error"]
            .into_iter()
            .map(String::from)
            .collect();

        if self.native_rate {
            args.push("-re".to_string());
        }

        args.extend([
            "-user_agent".to_string(),
            self.user_agent.clone(),
            "-headers".to_string(),
            format!("Referer: {}\r\n", self.referer),
            "-rw_timeout".to_string(),
            self.io_timeout.as_micros().to_string(),
            "-i".to_string(),
            self.input.to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "0:a:0?".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-movflags".to_string(),
            "frag_keyframe+empty_moov+default_base_moof".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            "pipe:1".to_string(),
        ]);

        args
    }
}

/// Builds the command for a remux job. Stdio wiring is applied by the pipeline.
pub trait ProcessLauncher: Send + Sync {
    fn command(&self, job: &RemuxJob) -> Command;
}

#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    binary: String,
}

impl FfmpegLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl ProcessLauncher for FfmpegLauncher {
    fn command(&self, job: &RemuxJob) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(job.ffmpeg_args());
        command
    }
}

pub struct RemuxSession {
    child: Child,
    stdout: ChildStdout,
    label: String,
    chunk_size: usize,
}

impl RemuxSession {
    pub fn start(
        launcher: &dyn ProcessLauncher,
        job: &RemuxJob,
        chunk_size: usize,
    ) -> AppResult<Self> {
        let mut command = launcher.command(job);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            error!("Failed to start remux process for {}: {}", job.input, e);
            AppError::RemuxProcessFailure(format!("Failed to start remux process: {}", e))
        })?;

        let label = match child.id() {
            Some(pid) => format!("remux[{}] {}", pid, job.input),
            None => format!("remux {}", job.input),
        };
        info!("Started {}", label);

        let stdout = child.stdout.take().ok_or_else(|| {
            AppError::Internal("remux process has no stdout pipe".to_string())
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, label.clone()));
        }

        Ok(Self {
            child,
            stdout,
            label,
            chunk_size: chunk_size.max(4096),
        })
    }

    async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        let n = self.stdout.read_buf(&mut buf).await?;
        Ok((n > 0).then(|| buf.freeze()))
    }

    async fn wait_success(&mut self) -> AppResult<()> {
        let status = self.child.wait().await.map_err(|e| {
            AppError::RemuxProcessFailure(format!("Failed to wait for {}: {}", self.label, e))
        })?;
        if status.success() {
            info!("{} finished", self.label);
            Ok(())
        } else {
            Err(AppError::RemuxProcessFailure(format!(
                "{} exited with {}",
                self.label, status
            )))
        }
    }

    fn terminate(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        match self.child.start_kill() {
            Ok(()) => info!("Killed {}", self.label),
            Err(e) => warn!("Failed to kill {}: {}", self.label, e),
        }
    }

    /// Streams stdout starting with `first`. A non-zero exit after output has begun
    /// is logged and surfaces as a stream error so the client sees a truncated body.
    fn into_stream(self, first: Bytes) -> ResponseStream {
        let mut session = self;
        ResponseStream::new(async_stream::stream! {
            let mut total_bytes = first.len() as u64;
            yield Ok(first);

            loop {
                let next = session.read_chunk().await;
                match next {
                    Ok(Some(chunk)) => {
                        total_bytes += chunk.len() as u64;
                        yield Ok(chunk);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Reading {} failed after {} bytes: {}", session.label, total_bytes, e);
                        yield Err(AppError::RemuxProcessFailure(e.to_string()));
                        return;
                    }
                }
            }

            debug!("{} closed stdout after {} bytes", session.label, total_bytes);
            if let Err(e) = session.wait_success().await {
                error!("{} after {} bytes", e, total_bytes);
                yield Err(e);
            }
        })
    }
}

impl Drop for RemuxSession {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn log_stderr(stderr: ChildStderr, label: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            warn!("{}: {}", label, line);
        }
    }
}

#[derive(Clone)]
pub struct RemuxPipeline {
    launcher: Arc<dyn ProcessLauncher>,
    config: RemuxConfig,
    io_timeout: Duration,
}

impl RemuxPipeline {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: RemuxConfig, io_timeout: Duration) -> Self {
        Self {
            launcher,
            config,
            io_timeout,
        }
    }

    pub fn job(&self, input: Url, user_agent: &str, referer: String) -> RemuxJob {
        RemuxJob {
            input,
            user_agent: user_agent.to_string(),
            referer,
            audio_codec: self.config.audio_codec.clone(),
            audio_bitrate: self.config.audio_bitrate.clone(),
            native_rate: self.config.native_rate,
            io_timeout: self.io_timeout,
        }
    }

    /// Remuxed output is a one-shot live stream: always 200, never ranged.
    pub fn response_headers() -> Vec<(&'static str, String)> {
        vec![
            ("content-type", "video/mp4".to_string()),
            ("cache-control", "no-cache".to_string()),
            ("accept-ranges", "none".to_string()),
            ("cross-origin-resource-policy", "cross-origin".to_string()),
        ]
    }

    /// Spawns the process and waits for its first output chunk, so failures before
    /// any byte is written still become a gateway error status.
    pub async fn open(&self, job: RemuxJob) -> AppResult<ResponseStream> {
        let mut session = RemuxSession::start(self.launcher.as_ref(), &job, self.config.chunk_size)?;
        let first_byte_timeout = self.config.first_byte_timeout();

        let first_read = tokio::time::timeout(first_byte_timeout, session.read_chunk()).await;
        let first = match first_read {
            Err(_) => {
                warn!(
                    "{} produced no output within {:?}",
                    session.label, first_byte_timeout
                );
                return Err(AppError::UpstreamTimeout(format!(
                    "remux of {} produced no output",
                    job.input
                )));
            }
            Ok(Err(e)) => return Err(AppError::RemuxProcessFailure(e.to_string())),
            Ok(Ok(None)) => {
                session.wait_success().await?;
                return Err(AppError::RemuxProcessFailure(format!(
                    "{} exited without producing output",
                    session.label
                )));
            }
            Ok(Ok(Some(chunk))) => chunk,
        };

        Ok(session.into_stream(first))
    }
}
