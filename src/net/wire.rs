//! Packet framing: `[i32 big-endian length][payload]`, no tag, no checksum.
//! A zero length marks the end of the stream.

use std::io::{Read, Write};

use super::connection::{read_exact_into, write_exact};
use crate::error::WireError;

/// Largest payload a receiver accepts unless configured otherwise.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

pub fn write_packet<W: Write + ?Sized>(w: &mut W, payload: &[u8]) -> Result<(), WireError> {
    let length = i32::try_from(payload.len()).map_err(|_| WireError::Desync {
        length: payload.len() as i64,
    })?;
    write_exact(w, &length.to_be_bytes())?;
    write_exact(w, payload)?;
    Ok(())
}

pub fn write_end_of_stream<W: Write + ?Sized>(w: &mut W) -> Result<(), WireError> {
    write_exact(w, &0i32.to_be_bytes())?;
    Ok(())
}

/// Reads one length prefix. Negative values and values above `max_len` mean
/// the stream lost its framing.
pub fn read_packet_len<R: Read + ?Sized>(r: &mut R, max_len: usize) -> Result<usize, WireError> {
    let mut prefix = [0u8; 4];
    read_exact_into(r, &mut prefix)?;
    let length = i32::from_be_bytes(prefix);
    if length < 0 || length as usize > max_len {
        return Err(WireError::Desync {
            length: length as i64,
        });
    }
    Ok(length as usize)
}

/// Reads one packet into `buf`, replacing its contents. Returns the payload
/// length; `0` is end of stream.
pub fn read_packet<R: Read + ?Sized>(
    r: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> Result<usize, WireError> {
    let length = read_packet_len(r, max_len)?;
    buf.resize(length, 0);
    read_exact_into(r, buf)?;
    Ok(length)
}

/// Receives packets into one reusable buffer. The buffer grows to the
/// largest packet seen and is never shrunk.
pub struct PacketReader {
    buf: Vec<u8>,
    len: usize,
    max_len: usize,
}

impl PacketReader {
    pub fn new(initial_capacity: usize, max_len: usize) -> Self {
        Self {
            buf: vec![0u8; initial_capacity],
            len: 0,
            max_len,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Payload of the last packet read.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn read_len<R: Read + ?Sized>(&mut self, r: &mut R) -> Result<usize, WireError> {
        read_packet_len(r, self.max_len)
    }

    /// Reads a payload of `length` bytes, after [`PacketReader::read_len`].
    pub fn read_payload<R: Read + ?Sized>(
        &mut self,
        r: &mut R,
        length: usize,
    ) -> Result<&[u8], WireError> {
        if length > self.buf.len() {
            log::debug!("growing packet buffer {} -> {}", self.buf.len(), length);
            self.buf.resize(length, 0);
        }
        self.len = 0;
        read_exact_into(r, &mut self.buf[..length])?;
        self.len = length;
        Ok(self.payload())
    }

    /// Reads a whole packet. `Ok(None)` is end of stream.
    pub fn next_packet<R: Read + ?Sized>(&mut self, r: &mut R) -> Result<Option<&[u8]>, WireError> {
        let length = self.read_len(r)?;
        if length == 0 {
            return Ok(None);
        }
        self.read_payload(r, length).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_framing_round_trip() -> anyhow::Result<()> {
        for len in [0usize, 1, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
            let mut wire = Vec::new();
            write_packet(&mut wire, &payload)?;
            assert_eq!(&wire[..4], &(len as i32).to_be_bytes());

            let mut buf = Vec::new();
            let read = read_packet(&mut Cursor::new(wire), &mut buf, DEFAULT_MAX_PACKET_SIZE)?;
            assert_eq!(read, len);
            assert_eq!(buf, payload);
        }
        Ok(())
    }

    #[test]
    fn test_length_is_big_endian() -> anyhow::Result<()> {
        let mut wire = Vec::new();
        write_packet(&mut wire, &[0xAA; 258])?;
        assert_eq!(&wire[..4], &[0, 0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_desync_lengths_rejected() {
        let negative = (-5i32).to_be_bytes();
        assert!(matches!(
            read_packet_len(&mut Cursor::new(negative), 1024),
            Err(WireError::Desync { length: -5 })
        ));

        let too_big = 2048i32.to_be_bytes();
        assert!(matches!(
            read_packet_len(&mut Cursor::new(too_big), 1024),
            Err(WireError::Desync { length: 2048 })
        ));
    }

    #[test]
    fn test_truncated_payload_is_transport_error() -> anyhow::Result<()> {
        let mut wire = Vec::new();
        write_packet(&mut wire, &[1, 2, 3, 4])?;
        wire.truncate(6);
        let mut buf = Vec::new();
        assert!(matches!(
            read_packet(&mut Cursor::new(wire), &mut buf, 1024),
            Err(WireError::Transport(_))
        ));
        Ok(())
    }

    #[test]
    fn test_reader_grows_and_never_shrinks() -> anyhow::Result<()> {
        let mut wire = Vec::new();
        write_packet(&mut wire, &[1u8; 8])?;
        write_packet(&mut wire, &[2u8; 100])?;
        write_packet(&mut wire, &[3u8; 4])?;
        write_end_of_stream(&mut wire)?;
        let mut r = Cursor::new(wire);

        let mut reader = PacketReader::new(16, 1024);
        assert_eq!(reader.next_packet(&mut r)?, Some(&[1u8; 8][..]));
        assert_eq!(reader.capacity(), 16);
        assert_eq!(reader.next_packet(&mut r)?.map(|p| p.len()), Some(100));
        assert_eq!(reader.capacity(), 100);
        assert_eq!(reader.next_packet(&mut r)?, Some(&[3u8; 4][..]));
        assert_eq!(reader.capacity(), 100);
        assert_eq!(reader.next_packet(&mut r)?, None);
        Ok(())
    }
}
