// Per-connection I/O threads.
//
// Each TCP connection is split into a reader thread and a writer thread, so
// the owning actor never touches a socket:
//
// - The **writer** owns the write half and drains an `mpsc` outbox of
//   already-encoded frames. When every `Outbox` handle is dropped (or a write
//   fails) it shuts the socket down in both directions, which also unblocks
//   the reader. Dropping the actor's `Outbox` is therefore how a connection
//   is torn down. A failed write is logged once and never retried.
// - The **reader** drives a `FramedReader` and forwards each decoded message,
//   then a final `Closed`, through a caller-supplied wrapper into the actor's
//   event channel. It exits on EOF, on a socket error, or when the actor's
//   channel is gone.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use scatter_protocol::{FramedReader, Message, encode};
use tracing::{debug, trace, warn};

/// Sending handle for one connection's writer thread.
#[derive(Clone, Debug)]
pub struct Outbox {
    label: String,
    tx: Sender<Vec<u8>>,
}

impl Outbox {
    pub fn new(label: impl Into<String>, tx: Sender<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            tx,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Encode and queue one message. Returns false if the writer is gone or
    /// the message could not be encoded.
    pub fn send(&self, msg: &Message) -> bool {
        match encode(msg) {
            Ok(bytes) => self.send_bytes(bytes),
            Err(e) => {
                warn!(peer = %self.label, tag = msg.tag(), error = %e, "failed to encode message");
                false
            }
        }
    }

    pub fn send_bytes(&self, bytes: Vec<u8>) -> bool {
        self.tx.send(bytes).is_ok()
    }
}

/// What a reader thread reports.
#[derive(Debug)]
pub enum ReadEvent {
    Message(Message),
    Closed,
}

pub fn spawn_writer(stream: TcpStream, label: String) -> io::Result<Outbox> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let outbox = Outbox::new(label.clone(), tx);
    thread::Builder::new()
        .name(format!("writer-{label}"))
        .spawn(move || {
            let mut stream = stream;
            for bytes in rx {
                if let Err(e) = stream.write_all(&bytes).and_then(|()| stream.flush()) {
                    warn!(peer = %label, error = %e, "write failed, dropping connection");
                    break;
                }
            }
            let _ = stream.shutdown(Shutdown::Both);
            debug!(peer = %label, "writer stopped");
        })?;
    Ok(outbox)
}

/// Spawn the reader loop. `wrap` turns each `ReadEvent` into the actor's
/// event type.
pub fn spawn_reader<E, F>(
    mut reader: FramedReader<TcpStream>,
    label: String,
    tx: Sender<E>,
    wrap: F,
) -> io::Result<JoinHandle<()>>
where
    E: Send + 'static,
    F: Fn(ReadEvent) -> E + Send + 'static,
{
    thread::Builder::new()
        .name(format!("reader-{label}"))
        .spawn(move || {
            loop {
                match reader.read_batch::<Message>() {
                    Ok(messages) => {
                        for message in messages {
                            trace!(peer = %label, tag = message.tag(), "received");
                            if tx.send(wrap(ReadEvent::Message(message))).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock
                                | io::ErrorKind::TimedOut
                                | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        debug!(peer = %label, error = %e, "reader stopped");
                        let _ = tx.send(wrap(ReadEvent::Closed));
                        return;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    use scatter_protocol::Framer;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn writer_delivers_frames_and_closes_on_drop() {
        let (client, server) = tcp_pair();
        let outbox = spawn_writer(server, "test".into()).unwrap();
        assert!(outbox.send(&Message::TimerEnd));
        assert!(outbox.send(&Message::Ping { timestamp: 7 }));
        drop(outbox);

        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = FramedReader::new(client);
        let mut got: Vec<Message> = Vec::new();
        while got.len() < 2 {
            got.extend(reader.read_batch::<Message>().unwrap());
        }
        assert_eq!(got, vec![Message::TimerEnd, Message::Ping { timestamp: 7 }]);
        let err = reader.read_batch::<Message>().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn reader_forwards_messages_then_closed() {
        let (mut client, server) = tcp_pair();
        let (tx, rx) = mpsc::channel();
        spawn_reader(FramedReader::new(server), "test".into(), tx, |e| e).unwrap();

        let mut bytes = encode(&Message::Join { name: "P1".into() }).unwrap();
        bytes.extend(b"garbage\n");
        bytes.extend(encode(&Message::TimerEnd).unwrap());
        client.write_all(&bytes).unwrap();
        drop(client);

        let timeout = Duration::from_secs(5);
        match rx.recv_timeout(timeout).unwrap() {
            ReadEvent::Message(Message::Join { name }) => assert_eq!(name, "P1"),
            other => panic!("expected Join, got {other:?}"),
        }
        match rx.recv_timeout(timeout).unwrap() {
            ReadEvent::Message(Message::TimerEnd) => {}
            other => panic!("expected TimerEnd, got {other:?}"),
        }
        match rx.recv_timeout(timeout).unwrap() {
            ReadEvent::Closed => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn test_outbox_captures_encoded_frames() {
        let (tx, rx) = mpsc::channel();
        let outbox = Outbox::new("mem", tx);
        outbox.send(&Message::GameFinalize);
        let mut framer = Framer::new();
        let msgs: Vec<Message> = rx.try_iter().flat_map(|b| framer.feed::<Message>(&b)).collect();
        assert_eq!(msgs, vec![Message::GameFinalize]);
    }
}
