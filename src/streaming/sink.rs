//! Sink station: writes audio bytes to an exclusively owned output.
//!
//! The output is acquired lazily on the first audio frame and released on the
//! end marker. The session manager also releases it after a dropped attempt,
//! so at most one player process is ever attached to our audio stream.

use crate::config::PlayerConfig;
use crate::error::{Result, SpeakError};
use crate::streaming::frame::AudioFrame;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

/// Pluggable audio destination with an explicit lifecycle.
#[async_trait::async_trait]
pub trait AudioOutput: Send {
    /// Starts the output. No-op if already active.
    async fn acquire(&mut self) -> Result<()>;

    /// Writes bytes verbatim. The output must be active.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flushes, closes and waits for the output to finish. No-op if inactive.
    async fn release(&mut self) -> Result<()>;

    fn is_active(&self) -> bool;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "output"
    }
}

/// Plays audio through an external player reading from its standard input.
#[derive(Debug)]
pub struct ProcessAudioOutput {
    program: PathBuf,
    args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl ProcessAudioOutput {
    /// Locates the player executable.
    ///
    /// Fails with [`SpeakError::AudioUnavailable`] when it cannot be found, so
    /// callers learn about a missing player before any text is synthesized.
    pub fn new(config: &PlayerConfig) -> Result<Self> {
        let program = find_program(&config.program).ok_or_else(|| SpeakError::AudioUnavailable {
            program: config.program.clone(),
        })?;
        Ok(Self {
            program,
            args: config.args.clone(),
            child: None,
            stdin: None,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait::async_trait]
impl AudioOutput for ProcessAudioOutput {
    async fn acquire(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpeakError::AudioOutput {
                message: format!("failed to start {}: {}", self.program.display(), e),
            })?;

        self.stdin = child.stdin.take();
        tracing::debug!(program = %self.program.display(), pid = ?child.id(), "audio player started");
        self.child = Some(child);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| SpeakError::AudioOutput {
            message: "audio player is not running".to_string(),
        })?;
        stdin
            .write_all(bytes)
            .await
            .map_err(|e| SpeakError::AudioOutput {
                message: format!("failed to write to audio player: {e}"),
            })
    }

    async fn release(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.flush().await {
                tracing::warn!(error = %e, "failed to flush audio player input");
            }
            drop(stdin);
        }

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().await.map_err(|e| SpeakError::AudioOutput {
            message: format!("failed waiting for audio player: {e}"),
        })?;
        if status.success() {
            tracing::debug!("audio player exited");
        } else {
            tracing::warn!(%status, "audio player exited with failure");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.child.is_some()
    }

    fn name(&self) -> &'static str {
        "player"
    }
}

/// Resolves `program` against `PATH`, or checks it directly if it has a path.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Shared view of what a [`CollectorOutput`] received.
#[derive(Debug, Default)]
pub struct CollectedAudio {
    pub bytes: Vec<u8>,
    pub acquisitions: usize,
    pub releases: usize,
    /// Writes that arrived while the output was not acquired.
    pub writes_while_inactive: usize,
}

/// Collects audio in memory for tests and library use.
#[derive(Debug, Clone, Default)]
pub struct CollectorOutput {
    active: bool,
    collected: Arc<Mutex<CollectedAudio>>,
}

impl CollectorOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle that stays readable after the output is moved.
    pub fn handle(&self) -> Arc<Mutex<CollectedAudio>> {
        Arc::clone(&self.collected)
    }

    /// Copies out every byte written so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().bytes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CollectedAudio> {
        self.collected.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl AudioOutput for CollectorOutput {
    async fn acquire(&mut self) -> Result<()> {
        if !self.active {
            self.active = true;
            self.lock().acquisitions += 1;
        }
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut collected = self.lock();
        if !self.active {
            collected.writes_while_inactive += 1;
        }
        collected.bytes.extend_from_slice(bytes);
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        if self.active {
            self.active = false;
            self.lock().releases += 1;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Drains the audio queue into an [`AudioOutput`].
#[derive(Debug, Default)]
pub struct SinkStation {
    frames: u64,
    bytes: usize,
}

impl SinkStation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written over this station's lifetime.
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Runs until the end marker, then releases the output.
    pub async fn run(
        &mut self,
        input: &mut mpsc::Receiver<AudioFrame>,
        output: &mut dyn AudioOutput,
    ) -> Result<()> {
        loop {
            match input.recv().await {
                Some(AudioFrame::Audio(bytes)) => self.write(output, &bytes).await?,
                Some(AudioFrame::End) => {
                    output.release().await?;
                    tracing::debug!(
                        output = output.name(),
                        frames = self.frames,
                        bytes = self.bytes,
                        "audio stream finished"
                    );
                    return Ok(());
                }
                None => {
                    return Err(SpeakError::ChannelClosed {
                        stage: crate::error::Stage::Listener,
                    });
                }
            }
        }
    }

    /// Writes audio already queued when a session ended early.
    ///
    /// Never waits: only frames already in the queue are written.
    pub async fn drain(
        &mut self,
        input: &mut mpsc::Receiver<AudioFrame>,
        output: &mut dyn AudioOutput,
    ) -> Result<()> {
        let mut drained = 0usize;
        while let Ok(frame) = input.try_recv() {
            if let AudioFrame::Audio(bytes) = frame {
                drained += bytes.len();
                self.write(output, &bytes).await?;
            }
        }
        if drained > 0 {
            tracing::debug!(bytes = drained, "drained queued audio");
        }
        Ok(())
    }

    async fn write(&mut self, output: &mut dyn AudioOutput, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if !output.is_active() {
            output.acquire().await?;
        }
        output.write(bytes).await?;
        self.frames += 1;
        self.bytes += bytes.len();
        Ok(())
    }
}
