//! # Worker Supervisor
//!
//! Spawns workers, frames messages to and from them, and drives
//! [`MasterCore`] from a single event loop. Each worker's output is read by
//! its own task and funnelled into one channel, so the core only ever sees
//! one event at a time.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::master::{Directive, MasterCore, MigrationReport};
use crate::error::{DocshiftError, Result};
use crate::logging::log_error;
use crate::messaging::{MasterMessage, MessageReader, MessageWriter, WorkerMessage};
use crate::provider::ProviderConnector;
use crate::transform::FunctionRegistry;
use crate::types::WorkerId;
use crate::worker::{run_worker, WorkerContext};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DUPLEX_BUFFER_BYTES: usize = 64 * 1024;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// How a spawned worker is controlled
#[derive(Debug)]
pub enum WorkerControl {
    Process(Child),
    Task(JoinHandle<Result<()>>),
}

impl WorkerControl {
    pub fn kill(&mut self) {
        match self {
            Self::Process(child) => {
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Worker process already gone");
                }
            }
            Self::Task(handle) => handle.abort(),
        }
    }

    /// Wait for the worker to end, returning whether it ended cleanly
    pub async fn wait(self) -> bool {
        match self {
            Self::Process(mut child) => child.wait().await.map(|s| s.success()).unwrap_or(false),
            Self::Task(handle) => matches!(handle.await, Ok(Ok(()))),
        }
    }
}

/// A freshly spawned worker's channels
pub struct SpawnedWorker {
    pub pid: Option<u32>,
    pub input: BoxedWriter,
    pub output: BoxedReader,
    pub control: WorkerControl,
}

impl std::fmt::Debug for SpawnedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedWorker")
            .field("pid", &self.pid)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, worker_id: WorkerId) -> Result<SpawnedWorker>;
}

/// Runs each worker as a child process speaking the protocol over stdio
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-run the current executable's `worker` subcommand
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, vec![OsString::from("worker")]))
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, worker_id: WorkerId) -> Result<SpawnedWorker> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("DOCSHIFT_WORKER_ID", worker_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let input = child
            .stdin
            .take()
            .ok_or_else(|| DocshiftError::protocol("worker stdin was not captured"))?;
        let output = child
            .stdout
            .take()
            .ok_or_else(|| DocshiftError::protocol("worker stdout was not captured"))?;

        Ok(SpawnedWorker {
            pid: child.id(),
            input: Box::new(input),
            output: Box::new(output),
            control: WorkerControl::Process(child),
        })
    }
}

/// Runs each worker as a task in this process over in-memory pipes
#[derive(Debug, Clone)]
pub struct InProcessSpawner {
    connector: Arc<dyn ProviderConnector>,
    registry: FunctionRegistry,
}

impl InProcessSpawner {
    pub fn new(connector: Arc<dyn ProviderConnector>) -> Self {
        Self::with_registry(connector, FunctionRegistry::builtin())
    }

    pub fn with_registry(connector: Arc<dyn ProviderConnector>, registry: FunctionRegistry) -> Self {
        Self {
            connector,
            registry,
        }
    }
}

#[async_trait]
impl WorkerSpawner for InProcessSpawner {
    async fn spawn(&self, worker_id: WorkerId) -> Result<SpawnedWorker> {
        let (master_input, worker_input) = tokio::io::duplex(DUPLEX_BUFFER_BYTES);
        let (worker_output, master_output) = tokio::io::duplex(DUPLEX_BUFFER_BYTES);
        let ctx = WorkerContext::with_registry(Arc::clone(&self.connector), self.registry.clone());

        let handle = tokio::spawn(async move {
            let result = run_worker(BufReader::new(worker_input), worker_output, ctx).await;
            if let Err(e) = &result {
                error!(worker_id, error = %e, "In-process worker failed");
            }
            result
        });

        Ok(SpawnedWorker {
            pid: None,
            input: Box::new(master_input),
            output: Box::new(master_output),
            control: WorkerControl::Task(handle),
        })
    }
}

#[derive(Debug)]
enum WorkerEventKind {
    Message(WorkerMessage),
    Malformed(String),
    Disconnected,
}

#[derive(Debug)]
struct WorkerEvent {
    worker_id: WorkerId,
    kind: WorkerEventKind,
}

/// Timing knobs for the event loop
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub worker_count: usize,
    pub settle_delay: Duration,
    pub chunk_timeout: Option<Duration>,
}

struct Supervisor {
    writers: BTreeMap<WorkerId, MessageWriter<BoxedWriter, MasterMessage>>,
    controls: BTreeMap<WorkerId, WorkerControl>,
}

impl Supervisor {
    async fn dispatch(&mut self, directives: Vec<Directive>) {
        for directive in directives {
            match directive {
                Directive::Send(worker_id, message) => {
                    let Some(writer) = self.writers.get_mut(&worker_id) else {
                        warn!(worker_id, "No channel to worker");
                        continue;
                    };
                    // A closed pipe shows up as a disconnect event from the reader side
                    if let Err(e) = writer.send(&message).await {
                        warn!(worker_id, error = %e, "Failed to send message to worker");
                    }
                }
                Directive::Terminate(worker_id) => {
                    if let Some(control) = self.controls.get_mut(&worker_id) {
                        control.kill();
                    }
                    self.writers.remove(&worker_id);
                }
            }
        }
    }

    fn kill_all(&mut self) {
        for control in self.controls.values_mut() {
            control.kill();
        }
    }

    async fn wait_all(self) {
        let waits = self
            .controls
            .into_iter()
            .map(|(worker_id, control)| async move { (worker_id, control.wait().await) });
        for (worker_id, clean) in futures::future::join_all(waits).await {
            debug!(worker_id, clean, "Worker exited");
        }
    }
}

fn spawn_reader(
    worker_id: WorkerId,
    output: BoxedReader,
    events: mpsc::Sender<WorkerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = MessageReader::<_, WorkerMessage>::new(BufReader::new(output));
        loop {
            let kind = match reader.next().await {
                Ok(Some(message)) => WorkerEventKind::Message(message),
                Ok(None) => WorkerEventKind::Disconnected,
                Err(DocshiftError::Io(e)) => {
                    debug!(worker_id, error = %e, "Worker output closed with an error");
                    WorkerEventKind::Disconnected
                }
                Err(e) => WorkerEventKind::Malformed(e.to_string()),
            };
            let last = !matches!(kind, WorkerEventKind::Message(_));
            if events.send(WorkerEvent { worker_id, kind }).await.is_err() || last {
                break;
            }
        }
    })
}

/// Spawn the workers and run the job to completion
pub async fn supervise(
    mut core: MasterCore,
    spawner: &dyn WorkerSpawner,
    settings: SupervisorSettings,
) -> Result<MigrationReport> {
    let (events_tx, mut events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let mut supervisor = Supervisor {
        writers: BTreeMap::new(),
        controls: BTreeMap::new(),
    };
    let mut readers = Vec::with_capacity(settings.worker_count);

    for worker_id in 1..=settings.worker_count as WorkerId {
        let spawned = match spawner.spawn(worker_id).await {
            Ok(spawned) => spawned,
            Err(e) => {
                supervisor.kill_all();
                return Err(e);
            }
        };
        core.register_worker(worker_id, spawned.pid)?;
        supervisor
            .writers
            .insert(worker_id, MessageWriter::new(spawned.input));
        supervisor.controls.insert(worker_id, spawned.control);
        readers.push(spawn_reader(worker_id, spawned.output, events_tx.clone()));
    }
    drop(events_tx);

    info!(
        workers = settings.worker_count,
        settle_delay_ms = settings.settle_delay.as_millis() as u64,
        "Workers spawned"
    );
    tokio::time::sleep(settings.settle_delay).await;

    for worker_id in core.registry().ids() {
        let handshake = core.handshake(worker_id);
        supervisor.dispatch(handshake).await;
    }

    let result = run_event_loop(&mut core, &mut supervisor, &mut events, settings).await;

    match result {
        Ok(()) => {
            supervisor.wait_all().await;
            for reader in readers {
                reader.abort();
            }
            let report = core.report();
            info!(
                chunks = report.chunk_count,
                documents = report.document_count,
                requeues = report.requeues,
                elapsed_ms = report.elapsed_ms,
                "Migration finished"
            );
            Ok(report)
        }
        Err(e) => {
            log_error("supervisor", "run", &e.to_string(), None);
            supervisor.kill_all();
            for reader in readers {
                reader.abort();
            }
            supervisor.wait_all().await;
            Err(e)
        }
    }
}

async fn run_event_loop(
    core: &mut MasterCore,
    supervisor: &mut Supervisor,
    events: &mut mpsc::Receiver<WorkerEvent>,
    settings: SupervisorSettings,
) -> Result<()> {
    let tick_period = settings
        .chunk_timeout
        .map(|timeout| (timeout / 4).max(Duration::from_millis(10)))
        .unwrap_or(Duration::from_secs(3600));
    let mut ticker = tokio::time::interval(tick_period);

    while !core.is_finished() {
        tokio::select! {
            event = events.recv() => {
                let Some(WorkerEvent { worker_id, kind }) = event else {
                    return Err(DocshiftError::WorkerLost {
                        worker_id: 0,
                        chunks: core.tracker().unfinished(),
                    });
                };
                let directives = match kind {
                    WorkerEventKind::Message(message) => core.handle(worker_id, message)?,
                    WorkerEventKind::Malformed(reason) => {
                        return Err(DocshiftError::protocol(format!(
                            "worker {worker_id}: {reason}"
                        )))
                    }
                    WorkerEventKind::Disconnected => {
                        supervisor.writers.remove(&worker_id);
                        core.worker_disconnected(worker_id)?
                    }
                };
                supervisor.dispatch(directives).await;
            }
            _ = ticker.tick(), if settings.chunk_timeout.is_some() => {
                if let Some(timeout) = settings.chunk_timeout {
                    let directives = core.check_timeouts(Instant::now(), timeout)?;
                    supervisor.dispatch(directives).await;
                }
            }
        }
    }

    Ok(())
}
