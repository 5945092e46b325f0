use core::slice;
use std::io::{self, Read};

use bytes::{Buf, BufMut, BytesMut};
use hexplay::HexViewBuilder;
use mqtt_core::{decode, DecodeError, Packet};

use crate::error::ClientError;

const INITIAL_CAPACITY: usize = 8 * 1024;

/// Buffers bytes read from a transport and hands back whole decoded packets.
pub struct Framed<T> {
    inner: T,
    eof: bool,
    buffer: BytesMut,
}

impl<T> Framed<T> {
    pub fn new(inner: T) -> Self {
        Framed {
            inner,
            eof: false,
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    // The returned `Packet<'b>` borrows from `self.buffer`, but we need to
    // call `self.buffer.advance` afterward, which the borrow checker won't
    // allow against a packet still borrowing `&'a mut self`. Detach the
    // lifetime instead: the buffer's backing storage doesn't move until the
    // *next* fill/parse cycle, by which point the caller is expected to be
    // done with the packet.
    fn parse_packet<'a, 'b: 'a>(&'a mut self) -> Result<Option<Packet<'b>>, DecodeError> {
        let input = self.buffer.bytes();
        let input = unsafe { slice::from_raw_parts(input.as_ptr(), input.len()) };

        match decode(input) {
            Ok((remaining, packet)) => {
                let read = self.buffer.len() - remaining.len();
                trace!(
                    "read {:?} packet from {} bytes:\n{}",
                    packet.packet_type(),
                    read,
                    HexViewBuilder::new(&input[..read]).finish()
                );
                self.buffer.advance(read);
                Ok(Some(packet))
            }
            Err(DecodeError::Truncated) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<T> Framed<T>
where
    T: Read,
{
    fn fill_buf(&mut self) -> io::Result<()> {
        self.buffer.reserve(INITIAL_CAPACITY);

        let mut chunk = [0u8; INITIAL_CAPACITY];
        let read = self.inner.read(&mut chunk)?;

        self.buffer.put_slice(&chunk[..read]);
        self.eof = read == 0;

        Ok(())
    }

    /// Blocks until a full packet is available, reading from the transport
    /// as needed.
    pub fn receive(&mut self) -> Result<Packet, ClientError> {
        loop {
            if let Some(packet) = self.parse_packet()? {
                return Ok(packet);
            }

            if self.eof {
                return Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "transport closed mid-packet",
                )));
            }

            self.fill_buf()?;
        }
    }
}
