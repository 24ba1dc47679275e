//! Direct channel over a TCP stream.

use super::codec::{read_frame, write_frame};
use crate::transport::DirectChannel;
use tandem_types::PeerId;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

/// Wraps an established stream in a [`DirectChannel`].
///
/// A reader task turns frames into inbound messages and a writer task turns
/// outbound messages into frames. Dropping the channel shuts the write side
/// down, which the peer sees as end of stream.
pub(crate) fn spawn_channel(stream: TcpStream, remote: PeerId, max_frame: usize) -> DirectChannel {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let peer = remote.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = read_frame(&mut reader, max_frame) => match frame {
                    Ok(payload) => {
                        if in_tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("channel from {peer} ended: {e}");
                        break;
                    }
                },
                () = in_tx.closed() => break,
            }
        }
    });

    let peer = remote.clone();
    tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &payload, max_frame).await {
                debug!("channel to {peer} failed: {e}");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    DirectChannel::new(remote, out_tx, in_rx)
}
