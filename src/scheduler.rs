//! The event loop that owns the job engine, the diagnostics ledger and the
//! compiler channel.
//!
//! Editor handlers and the compiler reader task never touch engine state
//! directly. They post [`EngineEvent`]s through an [`EngineHandle`], and the
//! scheduler task applies them one at a time, dispatching at most one job after
//! each event.

use std::future::Future;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tower_lsp::lsp_types::MessageType;

use crate::config::BridgeConfig;
use crate::diagnostics::{to_lsp_diagnostic, CompileReport, DiagnosticsLedger, Publication};
use crate::engine::{CompletedJob, EngineSnapshot, JobEngine, Responder};
use crate::error::{JobError, JobOutcome};
use crate::job::{JobCategory, JobRequest};
use crate::protocol::{self, CompilerEvent};
use crate::proxy::{CompilerChannel, CompilerEventSink, CompilerLauncher};
use crate::transport::{EditorNotice, Transport};

#[derive(Debug)]
pub enum EngineEvent {
    /// Start the first compiler.
    Launch(BridgeConfig),
    /// Replace the compiler, resetting engine and ledger.
    Restart(BridgeConfig),
    Submit {
        request: JobRequest,
        responder: Option<Responder>,
    },
    Compiler {
        generation: u64,
        event: CompilerEvent,
    },
    Status(oneshot::Sender<StatusReport>),
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub engine: EngineSnapshot,
    pub tracked_uris: usize,
    pub generation: u64,
}

/// Cloneable front door to a running scheduler.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub fn launch(&self, config: BridgeConfig) {
        self.send(EngineEvent::Launch(config));
    }

    pub fn restart(&self, config: BridgeConfig) {
        self.send(EngineEvent::Restart(config));
    }

    /// Queue a job nobody waits on.
    pub fn submit(&self, request: JobRequest) {
        self.send(EngineEvent::Submit {
            request,
            responder: None,
        });
    }

    /// Queue a job and wait for its outcome.
    ///
    /// The job is submitted before this returns, so call order is queue order
    /// even if the returned future is polled later.
    pub fn request(&self, request: JobRequest) -> impl Future<Output = JobOutcome> + Send {
        let (tx, rx) = oneshot::channel();
        let sent = self.send(EngineEvent::Submit {
            request,
            responder: Some(tx),
        });
        async move {
            if !sent {
                return Err(JobError::CompilerUnavailable);
            }
            rx.await.unwrap_or(Err(JobError::CompilerUnavailable))
        }
    }

    pub async fn status(&self) -> Option<StatusReport> {
        let (tx, rx) = oneshot::channel();
        if !self.send(EngineEvent::Status(tx)) {
            return None;
        }
        rx.await.ok()
    }

    pub fn stop(&self) {
        self.send(EngineEvent::Stop);
    }

    fn send(&self, event: EngineEvent) -> bool {
        if self.tx.send(event).is_err() {
            log::warn!("Job scheduler is not running");
            return false;
        }
        true
    }
}

pub struct Scheduler<L: CompilerLauncher, T: Transport> {
    engine: JobEngine,
    ledger: DiagnosticsLedger,
    launcher: L,
    compiler: Option<L::Channel>,
    transport: T,
    generation: u64,
    /// A shutdown job reached the current compiler, so its exit is expected.
    shutting_down: bool,
    diagnostics_source: String,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Spawn a scheduler task and return its handle.
pub fn spawn<L: CompilerLauncher, T: Transport>(launcher: L, transport: T) -> EngineHandle {
    let (scheduler, handle) = Scheduler::new(launcher, transport);
    tokio::spawn(scheduler.run());
    handle
}

impl<L: CompilerLauncher, T: Transport> Scheduler<L, T> {
    pub fn new(launcher: L, transport: T) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = EngineHandle {
            tx: events_tx.clone(),
        };
        let scheduler = Self {
            engine: JobEngine::new(),
            ledger: DiagnosticsLedger::new(),
            launcher,
            compiler: None,
            transport,
            generation: 0,
            shutting_down: false,
            diagnostics_source: BridgeConfig::default().diagnostics_source,
            events_tx,
            events_rx,
        };
        (scheduler, handle)
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events_rx.recv().await {
            if matches!(event, EngineEvent::Stop) {
                break;
            }
            self.handle(event).await;
            self.pump().await;
        }
        if let Some(mut compiler) = self.compiler.take() {
            compiler.terminate();
        }
        log::info!("Job scheduler stopped");
    }

    async fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Launch(config) => {
                if self.generation != 0 {
                    log::warn!("Compiler already launched; use restart instead");
                    return;
                }
                self.start_compiler(config).await;
            }
            EngineEvent::Restart(config) => self.restart(config).await,
            EngineEvent::Submit { request, responder } => {
                self.engine.submit(request, responder);
            }
            EngineEvent::Compiler { generation, event } => {
                if generation != self.generation {
                    log::debug!(
                        "Ignoring {:?} from retired compiler generation {}",
                        event,
                        generation
                    );
                    return;
                }
                self.on_compiler_event(event).await;
            }
            EngineEvent::Status(reply) => {
                let _ = reply.send(self.status());
            }
            EngineEvent::Stop => {}
        }
    }

    fn status(&self) -> StatusReport {
        StatusReport {
            engine: self.engine.snapshot(),
            tracked_uris: self.ledger.len(),
            generation: self.generation,
        }
    }

    async fn start_compiler(&mut self, config: BridgeConfig) {
        self.generation += 1;
        self.shutting_down = false;
        self.diagnostics_source = config.diagnostics_source;
        let sink = CompilerEventSink::new(self.generation, self.events_tx.clone());

        match self.launcher.launch(&config.compiler, sink) {
            Ok(channel) => {
                self.compiler = Some(channel);
                self.notify_status().await;
            }
            Err(e) => {
                log::error!("Failed to start compiler: {:#}", e);
                self.transport
                    .send_notification(EditorNotice::ShowMessage {
                        typ: MessageType::ERROR,
                        message: format!(
                            "Failed to start compiler `{}`: {:#}",
                            config.compiler.command, e
                        ),
                    })
                    .await;
                self.compiler_gone().await;
            }
        }
    }

    async fn restart(&mut self, config: BridgeConfig) {
        log::info!("Restarting compiler");
        if let Some(mut old) = self.compiler.take() {
            old.terminate();
        }
        let failed = self.engine.restart();
        if failed > 0 {
            log::info!("Restart abandoned {} outstanding job(s)", failed);
        }
        let retractions = self.ledger.clear_all();
        self.send_all(retractions).await;
        self.start_compiler(config).await;
    }

    async fn on_compiler_event(&mut self, event: CompilerEvent) {
        match event {
            CompilerEvent::Ready => {
                if self.engine.mark_ready() {
                    log::info!("Compiler ready");
                    self.notify_status().await;
                }
            }
            CompilerEvent::Response { id, outcome } => {
                if let Some(done) = self.engine.on_result(id, outcome) {
                    self.absorb(done).await;
                }
            }
            CompilerEvent::Unmatched { reason } => {
                log::warn!("Unrecognized compiler output: {}", reason);
                if let Some(id) = self.engine.in_flight() {
                    if let Some(done) = self.engine.on_result(id, Err(JobError::Protocol(reason))) {
                        self.absorb(done).await;
                    }
                }
            }
            CompilerEvent::Notification(notice) => {
                self.transport.send_notification(notice).await;
            }
            CompilerEvent::Exited => {
                self.compiler_gone().await;
                if self.shutting_down {
                    log::info!("Compiler exited after shutdown");
                    return;
                }
                self.transport
                    .send_notification(EditorNotice::ShowMessage {
                        typ: MessageType::WARNING,
                        message: "The compiler exited. Run the `compilerBridge.restart` command to start it again.".to_string(),
                    })
                    .await;
            }
        }
    }

    async fn compiler_gone(&mut self) {
        // Dropping the channel kills the process if it is still around.
        self.compiler = None;
        let failed = self.engine.on_compiler_exit();
        log::warn!("Compiler unavailable; failed {} outstanding job(s)", failed);
        self.notify_status().await;
    }

    /// Dispatch the next job if the engine allows it.
    async fn pump(&mut self) {
        let Some(job) = self.engine.drive() else {
            return;
        };

        let dispatched = match self.compiler.as_mut() {
            Some(compiler) => compiler.dispatch(&job),
            None => Err(anyhow::anyhow!("no compiler process")),
        };
        if let Err(e) = dispatched {
            log::error!("Failed to dispatch job {} ({}): {:#}", job.id, job.kind(), e);
            self.compiler_gone().await;
            return;
        }

        // Results arrive as later events, so these retractions precede them.
        match job.kind().category() {
            JobCategory::Workspace => {
                let retractions = self.ledger.clear_all();
                self.send_all(retractions).await;
            }
            JobCategory::Lifecycle => self.shutting_down = true,
            JobCategory::Recompile | JobCategory::Query => {}
        }
    }

    async fn absorb(&mut self, done: CompletedJob) {
        let CompletedJob { job, outcome } = done;
        let kind = job.kind();
        match outcome {
            Ok(result) if kind.produces_diagnostics() => match protocol::decode_report(&result) {
                Ok(report) => self.publish_report(report).await,
                Err(e) => log::warn!("Job {} ({}): {}", job.id, kind, e),
            },
            Ok(_) => log::debug!("Job {} ({}) completed", job.id, kind),
            Err(e @ JobError::Protocol(_)) => log::warn!("Job {} ({}) failed: {}", job.id, kind, e),
            Err(e) => log::debug!("Job {} ({}) failed: {}", job.id, kind, e),
        }
    }

    async fn publish_report(&mut self, report: CompileReport) {
        for file in report.files {
            let diagnostics = file
                .diagnostics
                .iter()
                .map(|d| to_lsp_diagnostic(d, &self.diagnostics_source))
                .collect();
            if let Some(publication) = self.ledger.publish(file.uri, diagnostics) {
                self.transport.send_diagnostics(publication).await;
            }
        }
    }

    async fn send_all(&mut self, publications: Vec<Publication>) {
        for publication in publications {
            self.transport.send_diagnostics(publication).await;
        }
    }

    async fn notify_status(&mut self) {
        self.transport
            .send_notification(EditorNotice::Status(self.engine.state()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerSettings;
    use crate::engine::EngineState;
    use crate::job::{DocumentSnapshot, Job, JobId, PositionQuery, RequestKind};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tower_lsp::lsp_types::{Position, Url};

    #[derive(Default)]
    struct FakeState {
        dispatched: Vec<Job>,
        sinks: Vec<CompilerEventSink>,
        launches: Vec<CompilerSettings>,
        terminated: usize,
        fail_launch: bool,
        fail_dispatch: bool,
    }

    #[derive(Clone, Default)]
    struct FakeCompiler(Arc<Mutex<FakeState>>);

    impl FakeCompiler {
        fn emit(&self, event: CompilerEvent) {
            let state = self.0.lock().unwrap();
            state.sinks.last().expect("compiler launched").emit(event);
        }

        fn emit_from(&self, generation_index: usize, event: CompilerEvent) {
            let state = self.0.lock().unwrap();
            state.sinks[generation_index].emit(event);
        }

        fn dispatched(&self) -> Vec<Job> {
            self.0.lock().unwrap().dispatched.clone()
        }

        fn last_id(&self) -> JobId {
            self.dispatched().last().expect("a dispatched job").id
        }

        fn respond(&self, result: serde_json::Value) {
            let id = self.last_id();
            self.emit(CompilerEvent::Response {
                id,
                outcome: Ok(result),
            });
        }
    }

    struct FakeLauncher(FakeCompiler);

    struct FakeChannel(FakeCompiler);

    impl CompilerLauncher for FakeLauncher {
        type Channel = FakeChannel;

        fn launch(
            &mut self,
            settings: &CompilerSettings,
            events: CompilerEventSink,
        ) -> anyhow::Result<FakeChannel> {
            let mut state = (self.0).0.lock().unwrap();
            state.launches.push(settings.clone());
            if state.fail_launch {
                anyhow::bail!("no such file");
            }
            state.sinks.push(events);
            Ok(FakeChannel(self.0.clone()))
        }
    }

    impl CompilerChannel for FakeChannel {
        fn dispatch(&mut self, job: &Job) -> anyhow::Result<()> {
            let mut state = (self.0).0.lock().unwrap();
            if state.fail_dispatch {
                anyhow::bail!("broken pipe");
            }
            state.dispatched.push(job.clone());
            Ok(())
        }

        fn terminate(&mut self) {
            (self.0).0.lock().unwrap().terminated += 1;
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Diagnostics(Publication),
        Notice(EditorNotice),
    }

    #[derive(Clone, Default)]
    struct RecordingTransport(Arc<Mutex<Vec<Sent>>>);

    impl RecordingTransport {
        fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }

        fn take_diagnostics(&self) -> Vec<Publication> {
            self.take()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Diagnostics(p) => Some(p),
                    Sent::Notice(_) => None,
                })
                .collect()
        }
    }

    #[tower_lsp::async_trait]
    impl Transport for RecordingTransport {
        async fn send_diagnostics(&self, publication: Publication) {
            self.0.lock().unwrap().push(Sent::Diagnostics(publication));
        }

        async fn send_notification(&self, notice: EditorNotice) {
            self.0.lock().unwrap().push(Sent::Notice(notice));
        }
    }

    struct Harness {
        handle: EngineHandle,
        compiler: FakeCompiler,
        transport: RecordingTransport,
    }

    impl Harness {
        fn start() -> Self {
            let compiler = FakeCompiler::default();
            let transport = RecordingTransport::default();
            let handle = spawn(FakeLauncher(compiler.clone()), transport.clone());
            Self {
                handle,
                compiler,
                transport,
            }
        }

        async fn ready() -> Self {
            let harness = Self::start();
            harness.handle.launch(BridgeConfig::default());
            harness.settle().await;
            harness.compiler.emit(CompilerEvent::Ready);
            harness.settle().await;
            harness.transport.take();
            harness
        }

        /// Round-trip through the scheduler so every earlier event is applied.
        async fn settle(&self) -> StatusReport {
            self.handle.status().await.expect("scheduler running")
        }
    }

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file://{path}")).unwrap()
    }

    fn change(path: &str, version: i32) -> JobRequest {
        JobRequest::DocumentChanged(DocumentSnapshot {
            uri: uri(path),
            version,
            text: format!("v{version}"),
        })
    }

    fn hover(path: &str) -> JobRequest {
        JobRequest::Hover(PositionQuery {
            uri: uri(path),
            position: Position::new(1, 1),
        })
    }

    fn report(path: &str, messages: &[&str]) -> serde_json::Value {
        let diagnostics: Vec<_> = messages
            .iter()
            .map(|message| {
                json!({
                    "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
                    "message": message,
                    "severity": "error"
                })
            })
            .collect();
        json!({ "files": [{ "uri": uri(path), "diagnostics": diagnostics }] })
    }

    #[tokio::test]
    async fn waits_for_readiness_before_dispatching() {
        let harness = Harness::start();
        harness.handle.launch(BridgeConfig::default());
        harness.handle.submit(change("/a.src", 1));
        let status = harness.settle().await;
        assert_eq!(status.engine.state, EngineState::NotReady);
        assert_eq!(status.engine.pending, 1);
        assert!(harness.compiler.dispatched().is_empty());

        harness.compiler.emit(CompilerEvent::Ready);
        let status = harness.settle().await;
        assert_eq!(status.engine.state, EngineState::Busy);
        assert_eq!(harness.compiler.dispatched().len(), 1);

        let notices = harness.transport.take();
        assert!(notices.contains(&Sent::Notice(EditorNotice::Status(EngineState::NotReady))));
        assert!(notices.contains(&Sent::Notice(EditorNotice::Status(EngineState::Ready))));
    }

    #[tokio::test]
    async fn superseded_change_is_never_dispatched() {
        let harness = Harness::start();
        harness.handle.launch(BridgeConfig::default());
        harness.handle.submit(change("/a.src", 1));
        harness.handle.submit(change("/a.src", 2));
        harness.settle().await;
        harness.compiler.emit(CompilerEvent::Ready);
        harness.settle().await;

        let dispatched = harness.compiler.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert!(matches!(&dispatched[0].request, JobRequest::DocumentChanged(doc) if doc.version == 2));
    }

    #[tokio::test]
    async fn compile_results_publish_and_retract() {
        let harness = Harness::ready().await;

        harness.handle.submit(change("/a.src", 1));
        harness.settle().await;
        harness.compiler.respond(report("/a.src", &["err1"]));
        let status = harness.settle().await;
        assert_eq!(status.tracked_uris, 1);

        harness.handle.submit(change("/a.src", 2));
        harness.settle().await;
        harness.compiler.respond(report("/a.src", &[]));
        let status = harness.settle().await;
        assert_eq!(status.tracked_uris, 0);

        let sent = harness.transport.take_diagnostics();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].uri, uri("/a.src"));
        assert_eq!(sent[0].diagnostics[0].message, "err1");
        assert_eq!(sent[0].diagnostics[0].source.as_deref(), Some("compiler"));
        assert!(sent[1].is_retraction());
    }

    #[tokio::test]
    async fn clean_report_for_untracked_file_sends_nothing() {
        let harness = Harness::ready().await;
        harness.handle.submit(change("/clean.src", 1));
        harness.settle().await;
        harness.compiler.respond(report("/clean.src", &[]));
        harness.settle().await;
        assert!(harness.transport.take_diagnostics().is_empty());
    }

    #[tokio::test]
    async fn workspace_job_retracts_everything_when_dispatched() {
        let harness = Harness::ready().await;
        harness.handle.submit(change("/a.src", 1));
        harness.settle().await;
        harness.compiler.respond(report("/a.src", &["err"]));
        harness.settle().await;
        harness.transport.take();

        harness.handle.submit(JobRequest::AddUri(uri("/lib/new.src")));
        let status = harness.settle().await;
        assert_eq!(status.tracked_uris, 0);
        let sent = harness.transport.take_diagnostics();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_retraction());
        assert_eq!(harness.compiler.dispatched().last().unwrap().kind(), RequestKind::ApiAddUri);

        harness.compiler.respond(report("/b.src", &["moved"]));
        let status = harness.settle().await;
        assert_eq!(status.tracked_uris, 1);
    }

    #[tokio::test]
    async fn failed_workspace_dispatch_keeps_diagnostics() {
        let harness = Harness::ready().await;
        harness.handle.submit(change("/a.src", 1));
        harness.settle().await;
        harness.compiler.respond(report("/a.src", &["err"]));
        harness.settle().await;
        harness.transport.take();

        harness.compiler.0.lock().unwrap().fail_dispatch = true;
        harness.handle.submit(JobRequest::InternalReady);
        let status = harness.settle().await;
        assert_eq!(status.engine.state, EngineState::Exited);
        assert_eq!(status.tracked_uris, 1);
        assert!(harness.transport.take_diagnostics().is_empty());
    }

    #[tokio::test]
    async fn hover_reply_reaches_caller() {
        let harness = Harness::ready().await;
        let reply = harness.handle.request(hover("/a.src"));
        harness.settle().await;
        assert_eq!(harness.compiler.dispatched().last().unwrap().kind(), RequestKind::Hover);

        harness.compiler.respond(json!({ "contents": "doc" }));
        assert_eq!(reply.await, Ok(json!({ "contents": "doc" })));
        assert_eq!(harness.settle().await.engine.state, EngineState::Ready);
    }

    #[tokio::test]
    async fn exit_fails_pending_caller_and_stops_dispatch() {
        let harness = Harness::ready().await;
        let reply = harness.handle.request(hover("/a.src"));
        harness.settle().await;

        harness.compiler.emit(CompilerEvent::Exited);
        assert_eq!(reply.await, Err(JobError::CompilerUnavailable));

        harness.handle.submit(change("/a.src", 1));
        let status = harness.settle().await;
        assert_eq!(status.engine.state, EngineState::Exited);
        assert_eq!(status.engine.pending, 0);
        assert_eq!(harness.compiler.dispatched().len(), 1);

        let late = harness.handle.request(hover("/a.src"));
        assert_eq!(late.await, Err(JobError::CompilerUnavailable));

        let sent = harness.transport.take();
        assert!(sent.contains(&Sent::Notice(EditorNotice::Status(EngineState::Exited))));
        assert!(sent
            .iter()
            .any(|s| matches!(s, Sent::Notice(EditorNotice::ShowMessage { typ, .. }) if *typ == MessageType::WARNING)));
    }

    #[tokio::test]
    async fn exit_after_shutdown_is_not_reported_as_a_crash() {
        let harness = Harness::ready().await;
        harness.handle.submit(JobRequest::Shutdown);
        harness.settle().await;
        assert_eq!(harness.compiler.dispatched().last().unwrap().kind(), RequestKind::Shutdown);

        harness.compiler.emit(CompilerEvent::Exited);
        let status = harness.settle().await;
        assert_eq!(status.engine.state, EngineState::Exited);

        let sent = harness.transport.take();
        assert!(sent.contains(&Sent::Notice(EditorNotice::Status(EngineState::Exited))));
        assert!(!sent
            .iter()
            .any(|s| matches!(s, Sent::Notice(EditorNotice::ShowMessage { .. }))));
    }

    #[tokio::test]
    async fn restart_after_shutdown_reports_later_crashes() {
        let harness = Harness::ready().await;
        harness.handle.submit(JobRequest::Shutdown);
        harness.settle().await;
        harness.handle.restart(BridgeConfig::default());
        harness.settle().await;
        harness.transport.take();

        harness.compiler.emit(CompilerEvent::Exited);
        harness.settle().await;
        assert!(harness
            .transport
            .take()
            .iter()
            .any(|s| matches!(s, Sent::Notice(EditorNotice::ShowMessage { typ, .. }) if *typ == MessageType::WARNING)));
    }

    #[tokio::test]
    async fn stale_result_is_ignored_and_queue_advances() {
        let harness = Harness::ready().await;
        let reply = harness.handle.request(hover("/a.src"));
        harness.handle.submit(change("/b.src", 1));
        harness.settle().await;
        let in_flight = harness.compiler.last_id();

        harness.compiler.emit(CompilerEvent::Response {
            id: JobId(in_flight.0 + 100),
            outcome: Ok(json!(null)),
        });
        let status = harness.settle().await;
        assert_eq!(status.engine.in_flight, Some(in_flight));

        harness.compiler.respond(json!(null));
        assert_eq!(reply.await, Ok(json!(null)));
        harness.settle().await;
        assert_eq!(harness.compiler.dispatched().len(), 2);
    }

    #[tokio::test]
    async fn unmatched_output_fails_in_flight_job() {
        let harness = Harness::ready().await;
        let reply = harness.handle.request(hover("/a.src"));
        harness.handle.submit(change("/b.src", 1));
        harness.settle().await;

        harness.compiler.emit(CompilerEvent::Unmatched {
            reason: "expected value".to_string(),
        });
        assert!(matches!(reply.await, Err(JobError::Protocol(_))));
        harness.settle().await;
        assert_eq!(harness.compiler.dispatched().len(), 2);
    }

    #[tokio::test]
    async fn malformed_report_leaves_ledger_untouched() {
        let harness = Harness::ready().await;
        harness.handle.submit(change("/a.src", 1));
        harness.settle().await;
        harness.compiler.respond(json!({ "files": 3 }));
        let status = harness.settle().await;
        assert_eq!(status.tracked_uris, 0);
        assert_eq!(status.engine.state, EngineState::Ready);
        assert!(harness.transport.take_diagnostics().is_empty());
    }

    #[tokio::test]
    async fn restart_retracts_and_ignores_retired_generation() {
        let harness = Harness::ready().await;
        harness.handle.submit(change("/a.src", 1));
        harness.settle().await;
        harness.compiler.respond(report("/a.src", &["err"]));
        harness.settle().await;
        harness.transport.take();

        harness.handle.restart(BridgeConfig::default());
        let status = harness.settle().await;
        assert_eq!(status.generation, 2);
        assert_eq!(status.engine.state, EngineState::NotReady);
        assert_eq!(status.tracked_uris, 0);
        assert_eq!(harness.compiler.0.lock().unwrap().terminated, 1);
        assert!(harness.transport.take_diagnostics()[0].is_retraction());

        // The old process dying must not take down its replacement.
        harness.compiler.emit_from(0, CompilerEvent::Exited);
        assert_eq!(harness.settle().await.engine.state, EngineState::NotReady);

        harness.compiler.emit(CompilerEvent::Ready);
        assert_eq!(harness.settle().await.engine.state, EngineState::Ready);
    }

    #[tokio::test]
    async fn restart_after_exit_resumes() {
        let harness = Harness::ready().await;
        harness.compiler.emit(CompilerEvent::Exited);
        assert_eq!(harness.settle().await.engine.state, EngineState::Exited);

        harness.handle.restart(BridgeConfig::default());
        harness.handle.submit(change("/a.src", 1));
        harness.settle().await;
        harness.compiler.emit(CompilerEvent::Ready);
        harness.settle().await;
        assert_eq!(harness.compiler.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn launch_failure_marks_compiler_unavailable() {
        let harness = Harness::start();
        harness.compiler.0.lock().unwrap().fail_launch = true;
        harness.handle.launch(BridgeConfig::default());

        let status = harness.settle().await;
        assert_eq!(status.engine.state, EngineState::Exited);
        let sent = harness.transport.take();
        assert!(sent
            .iter()
            .any(|s| matches!(s, Sent::Notice(EditorNotice::ShowMessage { typ, .. }) if *typ == MessageType::ERROR)));
    }

    #[tokio::test]
    async fn second_launch_is_ignored() {
        let harness = Harness::ready().await;
        harness.handle.launch(BridgeConfig::default());
        let status = harness.settle().await;
        assert_eq!(status.generation, 1);
        assert_eq!(harness.compiler.0.lock().unwrap().launches.len(), 1);
    }

    #[tokio::test]
    async fn compiler_notifications_are_relayed() {
        let harness = Harness::ready().await;
        let notice = EditorNotice::Relay {
            method: "build/progress".to_string(),
            params: json!({ "done": 1 }),
        };
        harness.compiler.emit(CompilerEvent::Notification(notice.clone()));
        harness.settle().await;
        assert_eq!(harness.transport.take(), vec![Sent::Notice(notice)]);
    }

    #[tokio::test]
    async fn diagnostics_source_follows_config() {
        let harness = Harness::start();
        harness.handle.launch(BridgeConfig {
            diagnostics_source: "lc".to_string(),
            ..BridgeConfig::default()
        });
        harness.settle().await;
        harness.compiler.emit(CompilerEvent::Ready);
        harness.handle.submit(change("/a.src", 1));
        harness.settle().await;
        harness.compiler.respond(report("/a.src", &["bad"]));
        harness.settle().await;

        let sent = harness.transport.take_diagnostics();
        assert_eq!(sent[0].diagnostics[0].source.as_deref(), Some("lc"));
    }
}
