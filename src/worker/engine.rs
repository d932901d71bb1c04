//! Worker message loop.

use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, error, info};

use super::context::WorkerContext;
use super::executor::execute_chunk;
use crate::error::{DocshiftError, Result};
use crate::messaging::{
    Ack, MasterMessage, MessageReader, MessageWriter, ProtocolMessage, WorkerMessage,
};

/// Serve one master connection until `STOP`
///
/// Messages are handled strictly one at a time. Any error ends the loop and
/// is returned to the caller, which exits the process with a failure.
pub async fn run_worker<R, W>(reader: R, writer: W, mut ctx: WorkerContext) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut inbound = MessageReader::<R, MasterMessage>::new(reader);
    let mut outbound = MessageWriter::<W, WorkerMessage>::new(writer);
    let mut chunks_processed = 0usize;

    loop {
        let message = match inbound.next().await? {
            Some(message) => message,
            None => {
                return Err(DocshiftError::protocol(
                    "master closed the channel before sending STOP",
                ))
            }
        };
        debug!(message_type = message.message_type(), "Worker received message");

        match message {
            MasterMessage::ReceiveMigrationArgs(args) => {
                if let Err(e) = ctx.configure(args).await {
                    return reject(&mut outbound, e, WorkerMessage::AckMigrationArgs).await;
                }
                outbound
                    .send(&WorkerMessage::AckMigrationArgs(Ack::ok()))
                    .await?;
            }
            MasterMessage::ReceiveTransform(source) => {
                if let Err(e) = ctx.install_transform(&source) {
                    return reject(&mut outbound, e, WorkerMessage::AckTransform).await;
                }
                outbound.send(&WorkerMessage::AckTransform(Ack::ok())).await?;
            }
            MasterMessage::ReceiveChunk(assignment) => {
                execute_chunk(&ctx, &assignment).await?;
                chunks_processed += 1;
                outbound
                    .send(&WorkerMessage::ChunkCompleted(assignment.index))
                    .await?;
            }
            MasterMessage::Stop => {
                outbound.send(&WorkerMessage::ProcessFinished).await?;
                outbound.close().await?;
                info!(chunks_processed, "Worker stopping");
                return Ok(());
            }
        }
    }
}

/// Report a failed handshake step, then fail
///
/// A repeated handshake step is a protocol violation by the master and gets
/// no acknowledgement.
async fn reject<W>(
    outbound: &mut MessageWriter<W, WorkerMessage>,
    err: DocshiftError,
    ack: fn(Ack) -> WorkerMessage,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    error!(error = %err, "Worker handshake step failed");
    if !matches!(err, DocshiftError::PreconditionError(_)) {
        outbound.send(&ack(Ack::failed(err.to_string()))).await?;
    }
    Err(err)
}
