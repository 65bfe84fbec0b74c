use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RemoteError, Result};

pub(crate) const HANDSHAKE: &[u8] = b"DWP-Handshake";
const HEADER_LEN: usize = 11;
const FLAG_REPLY: u8 = 0x80;

/// Upper bound for a single packet; larger lengths mean a corrupt stream
const MAX_PACKET_LEN: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Packet {
    Command {
        id: u32,
        command_set: u8,
        command: u8,
        data: Vec<u8>,
    },
    Reply {
        id: u32,
        error_code: u16,
        data: Vec<u8>,
    },
}

impl Packet {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let (id, flags, tail, data) = match self {
            Self::Command {
                id,
                command_set,
                command,
                data,
            } => (*id, 0u8, BigEndian::read_u16(&[*command_set, *command]), data),
            Self::Reply {
                id,
                error_code,
                data,
            } => (*id, FLAG_REPLY, *error_code, data),
        };

        let mut header = [0u8; HEADER_LEN];
        BigEndian::write_u32(&mut header[0..4], (HEADER_LEN + data.len()) as u32);
        BigEndian::write_u32(&mut header[4..8], id);
        header[8] = flags;
        BigEndian::write_u16(&mut header[9..11], tail);

        let mut out = Vec::with_capacity(HEADER_LEN + data.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(data);
        out
    }

    pub(crate) async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let len = BigEndian::read_u32(&header[0..4]) as usize;
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad packet length {len}"),
            ));
        }
        let id = BigEndian::read_u32(&header[4..8]);
        let flags = header[8];

        let mut data = vec![0u8; len - HEADER_LEN];
        reader.read_exact(&mut data).await?;

        Ok(if flags & FLAG_REPLY != 0 {
            Self::Reply {
                id,
                error_code: BigEndian::read_u16(&header[9..11]),
                data,
            }
        } else {
            Self::Command {
                id,
                command_set: header[9],
                command: header[10],
                data,
            }
        })
    }
}

/// Big-endian payload builder
#[derive(Default)]
pub(crate) struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Grow the buffer by `n` bytes and hand them to `write`
    fn put(mut self, n: usize, write: impl FnOnce(&mut [u8])) -> Self {
        let start = self.buf.len();
        self.buf.resize(start + n, 0);
        write(&mut self.buf[start..]);
        self
    }

    pub(crate) fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    pub(crate) fn i32(self, value: i32) -> Self {
        self.put(4, |buf| BigEndian::write_i32(buf, value))
    }

    pub(crate) fn i64(self, value: i64) -> Self {
        self.put(8, |buf| BigEndian::write_i64(buf, value))
    }

    /// Object, type and method ids travel as 32-bit integers
    pub(crate) fn id(self, value: i64) -> Self {
        self.i32(value as i32)
    }

    pub(crate) fn string(self, value: &str) -> Self {
        let mut writer = self.i32(value.len() as i32);
        writer.buf.extend_from_slice(value.as_bytes());
        writer
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

fn malformed(what: &str) -> RemoteError {
    RemoteError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed packet: {what}"),
    ))
}

fn truncated(e: io::Error) -> RemoteError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        malformed("truncated")
    } else {
        RemoteError::Io(e)
    }
}

/// Big-endian payload cursor
///
/// `Cursor` is also `AsyncRead`, so reads name their trait.
pub(crate) struct PacketReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PacketReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn remaining(&self) -> usize {
        let data = self.cursor.get_ref();
        data.len().saturating_sub(self.cursor.position() as usize)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        ReadBytesExt::read_u8(&mut self.cursor).map_err(truncated)
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        ReadBytesExt::read_i32::<BigEndian>(&mut self.cursor).map_err(truncated)
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        ReadBytesExt::read_i64::<BigEndian>(&mut self.cursor).map_err(truncated)
    }

    pub(crate) fn id(&mut self) -> Result<i64> {
        self.i32().map(i64::from)
    }

    pub(crate) fn count(&mut self) -> Result<usize> {
        usize::try_from(self.i32()?).map_err(|_| malformed("negative count"))
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        let len = self.count()?;
        if len > self.remaining() {
            return Err(malformed("truncated"));
        }
        let mut bytes = vec![0u8; len];
        Read::read_exact(&mut self.cursor, &mut bytes).map_err(truncated)?;
        String::from_utf8(bytes).map_err(|_| malformed("string is not UTF-8"))
    }
}
