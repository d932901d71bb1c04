//! Spawners with scripted misbehaving workers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use docshift::messaging::{Ack, MasterMessage, MessageReader, ProtocolMessage, WorkerMessage};
use docshift::orchestration::{InProcessSpawner, SpawnedWorker, WorkerControl, WorkerSpawner};
use docshift::provider::ProviderConnector;
use docshift::types::WorkerId;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Completes the handshake, then exits as soon as it is given a chunk
    CrashOnChunk,
    /// Completes the handshake, then writes a line that is not a protocol message
    Garbage,
    /// Completes the handshake, then never answers
    Hang,
}

/// In-process workers, except for the ids listed in `behaviors`
#[derive(Debug)]
pub struct ScriptedSpawner {
    normal: InProcessSpawner,
    behaviors: BTreeMap<WorkerId, Behavior>,
}

impl ScriptedSpawner {
    pub fn new(connector: Arc<dyn ProviderConnector>, behaviors: &[(WorkerId, Behavior)]) -> Self {
        Self {
            normal: InProcessSpawner::new(connector),
            behaviors: behaviors.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl WorkerSpawner for ScriptedSpawner {
    async fn spawn(&self, worker_id: WorkerId) -> docshift::Result<SpawnedWorker> {
        let Some(behavior) = self.behaviors.get(&worker_id).copied() else {
            return self.normal.spawn(worker_id).await;
        };

        let (master_input, worker_input) = tokio::io::duplex(4096);
        let (worker_output, master_output) = tokio::io::duplex(4096);
        let handle = tokio::spawn(scripted_worker(behavior, worker_input, worker_output));

        Ok(SpawnedWorker {
            pid: None,
            input: Box::new(master_input),
            output: Box::new(master_output),
            control: WorkerControl::Task(handle),
        })
    }
}

async fn scripted_worker(
    behavior: Behavior,
    input: DuplexStream,
    mut output: DuplexStream,
) -> docshift::Result<()> {
    let mut reader = MessageReader::<_, MasterMessage>::new(BufReader::new(input));

    while let Some(message) = reader.next().await? {
        let reply = match message {
            MasterMessage::ReceiveMigrationArgs(_) => WorkerMessage::AckMigrationArgs(Ack::ok()),
            MasterMessage::ReceiveTransform(_) => WorkerMessage::AckTransform(Ack::ok()),
            MasterMessage::ReceiveChunk(_) | MasterMessage::Stop => match behavior {
                Behavior::CrashOnChunk => return Ok(()),
                Behavior::Garbage => {
                    output.write_all(b"{\"type\":\"SELF_DESTRUCT\"}\n").await?;
                    output.flush().await?;
                    std::future::pending::<()>().await;
                    return Ok(());
                }
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    return Ok(());
                }
            },
        };
        let mut frame = reply.encode()?;
        frame.push('\n');
        output.write_all(frame.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}
