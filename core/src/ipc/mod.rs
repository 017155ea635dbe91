//! Local client surface
//!
//! Clients talk to the daemon over a Unix stream socket using the same TLV
//! frames as the network: a push-data frame stores data, a request frame
//! pulls it. Replies to a pull are the matching push frames followed by the
//! terminator, after which the daemon closes the stream.
//!
//! Each accepted connection gets its own task that reads exactly one
//! request, translates it into a [`Command`] for the engine task, and
//! writes the reply back. Protocol state never leaves the engine task.

use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::data::ReplyFrames;
use crate::network::wire::{
    DataRecord, Frame, MacAddr, FRAME_HEADER_LEN, MAX_PAYLOAD,
};
use crate::protocol::ProtocolError;

/// A client request translated for the engine task.
pub(crate) enum Command {
    /// Store locally contributed records.
    SetData { records: Vec<DataRecord> },
    /// Pull datasets of one type; the engine resolves `reply` with the
    /// encoded reply frames once they are available.
    Request {
        requested_type: u8,
        tx_id: u16,
        reply: oneshot::Sender<ReplyFrames>,
    },
}

/// Accept loop: one task per client connection. Ends when the engine task
/// goes away.
pub(crate) async fn run_listener(listener: UnixListener, cmd_tx: mpsc::Sender<Command>) {
    loop {
        tokio::select! {
            _ = cmd_tx.closed() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let cmd_tx = cmd_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, cmd_tx).await {
                            debug!(error = %e, "client connection error");
                        }
                    });
                }
                Err(e) => {
                    debug!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
        }
    }
}

/// Serve one client: read a single frame, act on it, reply, close.
async fn handle_client<S>(mut stream: S, cmd_tx: mpsc::Sender<Command>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(bytes) = read_frame(&mut stream).await? else {
        return Ok(());
    };

    match Frame::decode(&bytes) {
        Ok(Frame::PushData { records, .. }) => {
            trace!(records = records.len(), "client set-data");
            let _ = cmd_tx.send(Command::SetData { records }).await;
        }
        Ok(Frame::Request {
            requested_type,
            tx_id,
        }) => {
            trace!(requested_type, tx_id, "client request");
            let (reply_tx, reply_rx) = oneshot::channel();
            if cmd_tx
                .send(Command::Request {
                    requested_type,
                    tx_id,
                    reply: reply_tx,
                })
                .await
                .is_err()
            {
                return Ok(());
            }
            // A closed channel means the pull died mid-flight (swept
            // transaction, daemon shutdown); the client sees the stream
            // end without a terminator. A pull the engine cannot serve at
            // all is answered with an empty terminator instead.
            if let Ok(frames) = reply_rx.await {
                for frame in frames {
                    stream.write_all(&frame).await?;
                }
            }
            stream.shutdown().await?;
        }
        Ok(other) => debug!(?other, "unexpected frame from client"),
        Err(e) => debug!(error = %e, "undecodable frame from client"),
    }
    Ok(())
}

/// Read one length-delimited frame from a stream. Returns `None` on a clean
/// end-of-stream before any bytes.
pub(crate) async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    if FRAME_HEADER_LEN + length > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds maximum size",
        ));
    }

    let mut frame = vec![0u8; FRAME_HEADER_LEN + length];
    frame[..FRAME_HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut frame[FRAME_HEADER_LEN..]).await?;
    Ok(Some(frame))
}

/// Client side: store one payload in the local daemon.
pub async fn set_data(
    socket_path: &Path,
    data_type: u8,
    version: u8,
    payload: Vec<u8>,
) -> Result<(), ProtocolError> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| ProtocolError::Ipc(format!("connect {}: {}", socket_path.display(), e)))?;

    let frame = Frame::PushData {
        tx_id: rand::random(),
        seqno: 0,
        records: vec![DataRecord {
            // The daemon stamps its own hardware address over this.
            source: MacAddr::new([0; 6]),
            data_type,
            version,
            payload,
        }],
    };
    stream.write_all(&frame.encode()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Client side: pull all datasets of one type from the local daemon.
pub async fn request_data(
    socket_path: &Path,
    data_type: u8,
) -> Result<Vec<DataRecord>, ProtocolError> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| ProtocolError::Ipc(format!("connect {}: {}", socket_path.display(), e)))?;

    let tx_id: u16 = rand::random();
    let frame = Frame::Request {
        requested_type: data_type,
        tx_id,
    };
    stream.write_all(&frame.encode()).await?;

    let mut records = Vec::new();
    loop {
        let Some(bytes) = read_frame(&mut stream).await? else {
            return Err(ProtocolError::Ipc(
                "stream ended before terminator".to_string(),
            ));
        };
        match Frame::decode(&bytes) {
            Ok(Frame::PushData { records: more, .. }) => records.extend(more),
            Ok(Frame::StatusTxEnd { .. }) => return Ok(records),
            Ok(other) => {
                return Err(ProtocolError::Ipc(format!(
                    "unexpected reply frame: {:?}",
                    other
                )))
            }
            Err(e) => return Err(ProtocolError::Ipc(format!("bad reply frame: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;

    #[tokio::test]
    async fn test_read_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frame = Frame::Request {
            requested_type: 64,
            tx_id: 7,
        }
        .encode();
        client.write_all(&frame).await.unwrap();
        drop(client);

        let read = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(read, frame);
        // Clean EOF after the frame.
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frame = Frame::StatusTxEnd { tx_id: 1, seqno: 1 }.encode();
        client.write_all(&frame[..frame.len() - 1]).await.unwrap();
        drop(client);

        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_handle_client_set_data() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);

        let task = tokio::spawn(handle_client(server, cmd_tx));

        let frame = Frame::PushData {
            tx_id: 1,
            seqno: 0,
            records: vec![record(1, 64, b"hello")],
        };
        client.write_all(&frame.encode()).await.unwrap();
        drop(client);

        match cmd_rx.recv().await.unwrap() {
            Command::SetData { records } => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].payload, b"hello");
            }
            _ => panic!("expected SetData"),
        }
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handle_client_request_reply() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);

        let task = tokio::spawn(handle_client(server, cmd_tx));

        client
            .write_all(
                &Frame::Request {
                    requested_type: 66,
                    tx_id: 42,
                }
                .encode(),
            )
            .await
            .unwrap();

        // Stand in for the engine: answer with one push and the terminator.
        match cmd_rx.recv().await.unwrap() {
            Command::Request {
                requested_type,
                tx_id,
                reply,
            } => {
                assert_eq!(requested_type, 66);
                assert_eq!(tx_id, 42);
                let frames = vec![
                    Frame::PushData {
                        tx_id,
                        seqno: 0,
                        records: vec![record(1, 66, b"value")],
                    }
                    .encode(),
                    Frame::StatusTxEnd { tx_id, seqno: 1 }.encode(),
                ];
                reply.send(frames).unwrap();
            }
            _ => panic!("expected Request"),
        }

        let first = read_frame(&mut client).await.unwrap().unwrap();
        assert!(matches!(
            Frame::decode(&first).unwrap(),
            Frame::PushData { tx_id: 42, .. }
        ));
        let second = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(
            Frame::decode(&second).unwrap(),
            Frame::StatusTxEnd { tx_id: 42, seqno: 1 }
        );
        assert!(read_frame(&mut client).await.unwrap().is_none());

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_listener_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lantern.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        tokio::spawn(run_listener(listener, cmd_tx));

        // Stand in for the engine task.
        tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                match command {
                    Command::SetData { records } => {
                        assert_eq!(records[0].payload, b"stored");
                    }
                    Command::Request { tx_id, reply, .. } => {
                        let frames = vec![
                            Frame::PushData {
                                tx_id,
                                seqno: 0,
                                records: vec![record(1, 64, b"pulled")],
                            }
                            .encode(),
                            Frame::StatusTxEnd { tx_id, seqno: 1 }.encode(),
                        ];
                        let _ = reply.send(frames);
                    }
                }
            }
        });

        set_data(&path, 64, 0, b"stored".to_vec()).await.unwrap();

        let records = request_data(&path, 64).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"pulled");
    }

    #[tokio::test]
    async fn test_failed_pull_still_gets_empty_terminator() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);

        let task = tokio::spawn(handle_client(server, cmd_tx));

        client
            .write_all(
                &Frame::Request {
                    requested_type: 66,
                    tx_id: 42,
                }
                .encode(),
            )
            .await
            .unwrap();

        // Answer with a bare empty terminator, as the engine does for a
        // pull it cannot serve (no master known). The client must see a
        // real terminator frame, not just a closed stream.
        match cmd_rx.recv().await.unwrap() {
            Command::Request { tx_id, reply, .. } => {
                let _ = reply.send(vec![Frame::StatusTxEnd { tx_id, seqno: 0 }.encode()]);
            }
            _ => panic!("expected Request"),
        }

        let frame = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(
            Frame::decode(&frame).unwrap(),
            Frame::StatusTxEnd { tx_id: 42, seqno: 0 }
        );
        assert!(read_frame(&mut client).await.unwrap().is_none());
        task.await.unwrap().unwrap();
    }
}
