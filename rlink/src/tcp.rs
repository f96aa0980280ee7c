//! A transport over a TCP stream.
//!
//! A reader thread splits the incoming byte stream into reply frames
//! and attention notices.  Reply frames are queued for
//! [`Transport::receive`]; attention notices raise the attention
//! signal as soon as they arrive, even while no batch is executing.
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{event, Level};

use super::attention::AttentionSignal;
use super::codec::{self, ATTENTION_MAGIC, HEADER_LEN, REPLY_MAGIC};
use super::transport::{Transport, TransportError};

pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    frames: Receiver<Vec<u8>>,
    attention: Arc<AttentionSignal>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn connect<A: ToSocketAddrs>(address: A) -> Result<TcpTransport, TransportError> {
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let reader_stream = stream.try_clone()?;
        let attention = Arc::new(AttentionSignal::new());
        let (tx, frames) = mpsc::channel();
        let reader = {
            let attention = Arc::clone(&attention);
            thread::Builder::new()
                .name(format!("link-reader {peer}"))
                .spawn(move || read_frames(reader_stream, &tx, &attention))?
        };
        event!(Level::INFO, "connected to {peer}");
        Ok(TcpTransport {
            stream,
            peer,
            frames,
            attention,
            reader: Some(reader),
        })
    }
}

fn read_frames(mut stream: TcpStream, frames: &Sender<Vec<u8>>, attention: &AttentionSignal) {
    loop {
        match read_one(&mut stream, attention) {
            Ok(Some(frame)) => {
                if frames.send(frame).is_err() {
                    return;
                }
            }
            Ok(None) => (),
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    event!(Level::DEBUG, "link reader stopping: {e}");
                }
                return;
            }
        }
    }
}

/// Read the next frame or attention notice.  Returns `None` for an
/// attention notice, which is handled here.
fn read_one(stream: &mut TcpStream, attention: &AttentionSignal) -> io::Result<Option<Vec<u8>>> {
    let mut magic = [0u8; 1];
    stream.read_exact(&mut magic)?;
    match magic[0] {
        ATTENTION_MAGIC => {
            let mut pattern = [0u8; 2];
            stream.read_exact(&mut pattern)?;
            event!(
                Level::TRACE,
                "attention notice {:#06x}",
                u16::from_le_bytes(pattern)
            );
            attention.notify();
            Ok(None)
        }
        REPLY_MAGIC => {
            let mut frame = vec![0u8; HEADER_LEN];
            frame[0] = REPLY_MAGIC;
            stream.read_exact(&mut frame[1..])?;
            let total = codec::frame_len(&frame).unwrap_or(HEADER_LEN);
            frame.resize(total, 0);
            stream.read_exact(&mut frame[HEADER_LEN..])?;
            Ok(Some(frame))
        }
        other => {
            // Framing is lost; hand the byte on so that the executor
            // reports a malformed reply.
            event!(Level::WARN, "unexpected byte {other:#04x} from target");
            Ok(Some(vec![other]))
        }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        // Anything still queued belongs to an exchange which has
        // already been given up on.
        while self.frames.try_recv().is_ok() {}
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn attention(&self) -> Arc<AttentionSignal> {
        Arc::clone(&self.attention)
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.peer)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;
    use crate::codec::{decode_request, encode_attention, encode_reply, Reply};
    use crate::config::LinkConfig;
    use crate::connection::Connection;
    use crate::status::Status;
    use crate::testing::plain_response;

    fn read_request(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
        let mut frame = vec![0u8; HEADER_LEN];
        stream.read_exact(&mut frame)?;
        let total = codec::frame_len(&frame).unwrap_or(HEADER_LEN);
        frame.resize(total, 0);
        stream.read_exact(&mut frame[HEADER_LEN..])?;
        Ok(frame)
    }

    #[test]
    fn test_exchange_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let target = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream).unwrap();
            let (tag, ops) = decode_request(&request).unwrap();
            let replies: Vec<Reply> = ops
                .iter()
                .enumerate()
                .map(|(i, op)| Reply::to(i, op, plain_response(op, 0o1234), Status::OK))
                .collect();
            stream.write_all(&encode_attention(0x0001)).unwrap();
            stream.write_all(&encode_reply(tag, &replies).unwrap()).unwrap();
            ops
        });

        let transport = TcpTransport::connect(address).unwrap();
        let conn = Connection::new(Box::new(transport), LinkConfig::default());
        let mut batch = conn.new_batch();
        batch.add_register_write(0x04, 0o1000).unwrap();
        batch.add_register_read(0x06).unwrap();
        let outcome = conn.execute(&mut batch).unwrap();
        assert!(outcome.all_passed());
        assert_eq!(batch.result(1).unwrap().data(), 0o1234);
        // The attention notice was sent ahead of the reply.
        assert!(conn.attention_signal().wait(Duration::ZERO).is_signaled());
        assert_eq!(target.join().unwrap(), batch.operations());
    }

    #[test]
    fn test_closed_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let target = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });
        let transport = TcpTransport::connect(address).unwrap();
        target.join().unwrap();
        let conn = Connection::new(Box::new(transport), LinkConfig::default());
        let mut batch = conn.new_batch();
        batch.add_attention_query().unwrap();
        assert!(conn.execute(&mut batch).is_err());
    }
}
