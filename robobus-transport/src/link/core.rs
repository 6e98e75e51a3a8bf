//! Reader and writer tasks of a link.

use std::sync::Arc;

use robobus_core::BoxedStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{LinkError, LinkId, LinkResult};
use crate::router::Router;
use crate::wire::FrameDecoder;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Background tasks of one link.
#[derive(Debug)]
pub(crate) struct LinkTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LinkTasks {
    /// Stop both tasks. Dropping their halves closes the socket.
    pub(crate) fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Start the reader and writer tasks for a registered link.
pub(crate) fn spawn_link(
    router: Arc<Router>,
    id: LinkId,
    stream: BoxedStream,
    outbound: mpsc::Receiver<Vec<u8>>,
    max_frame_size: usize,
) -> LinkTasks {
    let (reader, writer) = tokio::io::split(stream);

    let writer = tokio::spawn(write_loop(router.clone(), id, writer, outbound));
    let reader = tokio::spawn(read_loop(router, id, reader, max_frame_size));

    LinkTasks { reader, writer }
}

async fn read_loop(
    router: Arc<Router>,
    id: LinkId,
    mut reader: ReadHalf<BoxedStream>,
    max_frame_size: usize,
) {
    let mut decoder = FrameDecoder::new(max_frame_size);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    let reason = loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break LinkError::Closed,
            Ok(n) => {
                decoder.feed(&buffer[..n]);
                tracing::debug!(
                    "{}: received {} bytes, {} buffered",
                    id,
                    n,
                    decoder.buffered()
                );
                if let Err(e) = process_read_buffer(&router, id, &mut decoder) {
                    break e;
                }
            }
            Err(e) => break LinkError::Io(e),
        }
    };

    router.link_terminated(id, reason);
}

/// Hand every complete frame to the router.
///
/// Any wire or decode error poisons the stream: framing cannot be trusted to
/// realign, so the caller tears the link down.
fn process_read_buffer(
    router: &Arc<Router>,
    id: LinkId,
    decoder: &mut FrameDecoder,
) -> LinkResult<()> {
    while let Some(frame) = decoder.next_frame()? {
        router.handle_frame(id, &frame)?;
    }
    Ok(())
}

async fn write_loop(
    router: Arc<Router>,
    id: LinkId,
    mut writer: WriteHalf<BoxedStream>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(frame) = outbound.recv().await {
        tracing::debug!("{}: writing {} bytes", id, frame.len());
        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            router.link_terminated(id, LinkError::Io(e));
            return;
        }
    }

    // Every sender is gone: the router dropped this link.
    let _ = writer.shutdown().await;
}
