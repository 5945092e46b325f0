use std::io::{self, Read, Write};

pub mod tcp;
pub mod tls;
pub mod ws;

/// Duplicates a handle to the same underlying connection.
///
/// The dispatcher's receive loop and the foreground send path (plus the
/// keep-alive timer) each need their own handle to the same stream; for a
/// plain `TcpStream` that's an OS-level `dup`, for TLS/WebSocket it's a
/// shared, mutex-guarded handle.
pub trait TryClone: Sized {
    fn try_clone(&self) -> io::Result<Self>;
}

/// The byte-stream contract the protocol engine depends on: a reliable,
/// ordered, bidirectional stream of bytes that can be closed out from under
/// a blocked reader.
pub trait Transport: Read + Write + TryClone + Send + 'static {
    fn close(&mut self) -> io::Result<()>;
}

/// The three transport variants a client may be configured to use: plain
/// TCP, TLS, or MQTT-over-WebSocket. A single enum rather than a trait
/// object because `TryClone` returns `Self` and so isn't object-safe.
pub enum AnyTransport {
    Tcp(tcp::Tcp),
    Tls(tls::Tls),
    Ws(ws::Ws),
}

impl Read for AnyTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            AnyTransport::Tcp(t) => t.read(buf),
            AnyTransport::Tls(t) => t.read(buf),
            AnyTransport::Ws(t) => t.read(buf),
        }
    }
}

impl Write for AnyTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            AnyTransport::Tcp(t) => t.write(buf),
            AnyTransport::Tls(t) => t.write(buf),
            AnyTransport::Ws(t) => t.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            AnyTransport::Tcp(t) => t.flush(),
            AnyTransport::Tls(t) => t.flush(),
            AnyTransport::Ws(t) => t.flush(),
        }
    }
}

impl TryClone for AnyTransport {
    fn try_clone(&self) -> io::Result<Self> {
        Ok(match self {
            AnyTransport::Tcp(t) => AnyTransport::Tcp(t.try_clone()?),
            AnyTransport::Tls(t) => AnyTransport::Tls(t.try_clone()?),
            AnyTransport::Ws(t) => AnyTransport::Ws(t.try_clone()?),
        })
    }
}

impl Transport for AnyTransport {
    fn close(&mut self) -> io::Result<()> {
        match self {
            AnyTransport::Tcp(t) => t.close(),
            AnyTransport::Tls(t) => t.close(),
            AnyTransport::Ws(t) => t.close(),
        }
    }
}
