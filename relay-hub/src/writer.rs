use std::io;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
};
use tracing::{debug, trace};

use crate::{
    protocol::write_line,
    registry::{ClientId, OutboundReceiver},
};

/// How a writer task ended.
#[derive(Debug)]
pub enum WriterExit {
    /// The hub closed the queue and every queued line was written.
    Drained,
    /// Writing to the connection failed; queued lines were discarded.
    Failed(io::Error),
}

/// Spawns the task that copies `outbound` onto `writer`, one line at a time.
pub fn spawn_writer<W>(id: ClientId, outbound: OutboundReceiver, writer: W) -> JoinHandle<WriterExit>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(drain(id, outbound, writer))
}

async fn drain<W>(id: ClientId, mut outbound: OutboundReceiver, mut writer: W) -> WriterExit
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(client = %id, error = ?err, "write failed");
            // Fail the hub's next try_send instead of letting lines pile up.
            outbound.close();
            return WriterExit::Failed(err);
        }
        trace!(client = %id, "line written");
    }

    if let Err(err) = writer.shutdown().await {
        debug!(client = %id, error = ?err, "failed to shut down write half");
    }
    WriterExit::Drained
}
