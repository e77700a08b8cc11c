//! Compiler proxy: the only writer to the external compiler process.
//!
//! A launched compiler is reached through a [`CompilerChannel`]. The process
//! implementation spawns the compiler with piped stdio, writes one JSON job per
//! line from a writer task, and decodes replies on a reader task that reports
//! everything, including the final exit, back to the scheduler.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::CompilerSettings;
use crate::job::Job;
use crate::protocol::{self, CompilerEvent};
use crate::scheduler::EngineEvent;

const WRITER_CHANNEL_CAPACITY: usize = 32;

/// Delivers compiler events to the scheduler, stamped with the generation of
/// the process that produced them.
#[derive(Debug, Clone)]
pub struct CompilerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl CompilerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` once the scheduler is gone.
    pub fn emit(&self, event: CompilerEvent) -> bool {
        self.tx
            .send(EngineEvent::Compiler {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A live connection to one compiler process.
pub trait CompilerChannel: Send + 'static {
    /// Hand a job to the compiler. Never retries.
    fn dispatch(&mut self, job: &Job) -> Result<()>;

    /// Stop the compiler. Its exit may still be reported through the sink.
    fn terminate(&mut self);
}

/// Starts compiler processes.
pub trait CompilerLauncher: Send + 'static {
    type Channel: CompilerChannel;

    fn launch(
        &mut self,
        settings: &CompilerSettings,
        events: CompilerEventSink,
    ) -> Result<Self::Channel>;
}

/// Launches the compiler as a child process speaking line-delimited JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl CompilerLauncher for ProcessLauncher {
    type Channel = CompilerProcess;

    fn launch(
        &mut self,
        settings: &CompilerSettings,
        events: CompilerEventSink,
    ) -> Result<CompilerProcess> {
        CompilerProcess::spawn(settings, events)
    }
}

/// A running compiler. The writer task ends when this is dropped and the
/// reader task ends at the compiler's EOF.
pub struct CompilerProcess {
    child: Child,
    writer_tx: mpsc::Sender<String>,
}

impl CompilerProcess {
    pub fn spawn(settings: &CompilerSettings, events: CompilerEventSink) -> Result<Self> {
        let mut command = Command::new(&settings.command);
        command
            .args(&settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &settings.working_directory {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning compiler `{}`", settings.command))?;
        let mut stdin = child.stdin.take().context("compiler has no stdin")?;
        let stdout = child.stdout.take().context("compiler has no stdout")?;

        log::info!(
            "Started compiler `{}` (generation {}, pid {:?})",
            settings.command,
            events.generation(),
            child.id()
        );

        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(WRITER_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if let Err(e) = write_line(&mut stdin, &line).await {
                    log::error!("Failed to write to compiler stdin: {}", e);
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        log::info!("Compiler closed stdout (generation {})", events.generation());
                        break;
                    }
                    Ok(_) => {
                        // Invalid UTF-8 is decoded lossily and surfaces as unmatched output.
                        let line = String::from_utf8_lossy(&buf);
                        let Some(event) = protocol::decode_line(&line) else {
                            continue;
                        };
                        if !events.emit(event) {
                            return;
                        }
                    }
                    Err(e) => {
                        log::error!("Failed to read compiler stdout: {}", e);
                        break;
                    }
                }
            }
            events.emit(CompilerEvent::Exited);
        });

        Ok(Self { child, writer_tx })
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

impl CompilerChannel for CompilerProcess {
    fn dispatch(&mut self, job: &Job) -> Result<()> {
        let line = protocol::encode_job(job).context("encoding job")?;
        log::debug!("Dispatching job {} ({})", job.id, job.kind());
        self.writer_tx
            .try_send(line)
            .map_err(|_| anyhow!("compiler input is closed or full"))
    }

    fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            log::debug!("Compiler already gone: {}", e);
        }
    }
}
