use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use tungstenite::client::client;
use tungstenite::handshake::client::Request;
use tungstenite::Message;
use tungstenite::WebSocket;

use super::{Transport, TryClone};

/// MQTT-over-WebSocket transport: a blocking `tungstenite` client negotiated
/// with the `mqtt` subprotocol, re-exposed as a plain byte stream (WebSocket
/// is message-framed; MQTT packet boundaries don't line up with WebSocket
/// message boundaries, so reads/writes buffer across frames).
#[derive(Clone)]
pub struct Ws(Arc<Mutex<Inner>>);

struct Inner {
    socket: WebSocket<TcpStream>,
    read_buf: VecDeque<u8>,
}

impl Ws {
    pub fn connect<A: ToSocketAddrs>(addr: A, url: &str) -> io::Result<Self> {
        let sock = TcpStream::connect(addr)?;
        sock.set_nodelay(true)?;

        let request = Request::builder()
            .uri(url)
            .header("Sec-WebSocket-Protocol", "mqtt")
            .body(())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let (socket, _response) = client(request, sock)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        Ok(Ws(Arc::new(Mutex::new(Inner {
            socket,
            read_buf: VecDeque::new(),
        }))))
    }
}

impl Read for Ws {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap();

        while inner.read_buf.is_empty() {
            let msg = inner
                .socket
                .read_message()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

            match msg {
                Message::Binary(data) => inner.read_buf.extend(data),
                Message::Close(_) => return Ok(0),
                _ => continue,
            }
        }

        let n = buf.len().min(inner.read_buf.len());
        for b in buf.iter_mut().take(n) {
            *b = inner.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for Ws {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap();
        inner
            .socket
            .write_message(Message::Binary(buf.to_vec()))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.0.lock().unwrap();
        inner
            .socket
            .write_pending()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

impl TryClone for Ws {
    fn try_clone(&self) -> io::Result<Self> {
        Ok(Ws(self.0.clone()))
    }
}

impl Transport for Ws {
    fn close(&mut self) -> io::Result<()> {
        let mut inner = self.0.lock().unwrap();
        let _ = inner.socket.close(None);
        inner.socket.get_mut().shutdown(Shutdown::Both)
    }
}
