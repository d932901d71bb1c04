//! Newline-delimited JSON framing over async byte streams.

use std::marker::PhantomData;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::protocol::ProtocolMessage;
use crate::error::Result;

/// Reads one message per line; blank lines are ignored
#[derive(Debug)]
pub struct MessageReader<R, M> {
    inner: R,
    line: String,
    _message: PhantomData<fn() -> M>,
}

impl<R, M> MessageReader<R, M>
where
    R: AsyncBufRead + Unpin,
    M: ProtocolMessage,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
            _message: PhantomData,
        }
    }

    /// Next message, or `None` once the stream is closed
    pub async fn next(&mut self) -> Result<Option<M>> {
        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let frame = self.line.trim();
            if frame.is_empty() {
                continue;
            }
            trace!(frame, "Received frame");
            return M::decode(frame).map(Some);
        }
    }
}

#[derive(Debug)]
pub struct MessageWriter<W, M> {
    inner: W,
    _message: PhantomData<fn(M)>,
}

impl<W, M> MessageWriter<W, M>
where
    W: AsyncWrite + Unpin,
    M: ProtocolMessage,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            _message: PhantomData,
        }
    }

    pub async fn send(&mut self, message: &M) -> Result<()> {
        let mut frame = message.encode()?;
        trace!(message_type = message.message_type(), "Sending frame");
        frame.push('\n');
        self.inner.write_all(frame.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and close the underlying stream
    pub async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocshiftError;
    use crate::messaging::protocol::{ChunkAssignment, MasterMessage, WorkerMessage};
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_writer_emits_one_line_per_message() {
        let mock = Builder::new()
            .write(b"{\"type\":\"CHUNK_COMPLETED\",\"data\":4}\n")
            .write(b"{\"type\":\"PROCESS_FINISHED\"}\n")
            .build();
        let mut writer = MessageWriter::<_, WorkerMessage>::new(mock);

        writer.send(&WorkerMessage::ChunkCompleted(4)).await.unwrap();
        writer.send(&WorkerMessage::ProcessFinished).await.unwrap();
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_handles_frames_split_across_reads() {
        let mock = Builder::new()
            .read(b"{\"type\":\"RECEIVE_CHUNK\",\"da")
            .read(b"ta\":{\"index\":2,\"ids\":[\"a\",\"b\"]}}\n{\"type\":")
            .read(b"\"STOP\"}\n")
            .build();
        let mut reader = MessageReader::<_, MasterMessage>::new(BufReader::new(mock));

        assert_eq!(
            reader.next().await.unwrap(),
            Some(MasterMessage::ReceiveChunk(ChunkAssignment {
                index: 2,
                ids: vec!["a".to_string(), "b".to_string()],
            }))
        );
        assert_eq!(reader.next().await.unwrap(), Some(MasterMessage::Stop));
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped_and_garbage_is_rejected() {
        let mock = Builder::new()
            .read(b"\n\n{\"type\":\"STOP\"}\n")
            .read(b"{\"type\":\"DANCE\"}\n")
            .build();
        let mut reader = MessageReader::<_, MasterMessage>::new(BufReader::new(mock));

        assert_eq!(reader.next().await.unwrap(), Some(MasterMessage::Stop));
        let err = reader.next().await.unwrap_err();
        assert!(matches!(err, DocshiftError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_close_ends_the_stream_for_the_reader() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = MessageWriter::<_, WorkerMessage>::new(client);
        let mut reader = MessageReader::<_, WorkerMessage>::new(BufReader::new(server));

        writer.send(&WorkerMessage::ProcessFinished).await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(
            reader.next().await.unwrap(),
            Some(WorkerMessage::ProcessFinished)
        );
        assert_eq!(reader.next().await.unwrap(), None);
        drop(writer);
    }
}
