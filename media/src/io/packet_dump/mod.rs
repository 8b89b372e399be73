#[cfg(test)]
mod packet_dump_test;

use std::io::{ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use util::ntp::NtpTime;

use crate::error::{Error, Result};

/// Entries larger than this are treated as stream corruption.
const MAX_ENTRY_SIZE: u32 = 1 << 20;

/// One captured packet: its arrival instant and the raw octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEntry {
    pub arrival: NtpTime,
    pub payload: Bytes,
}

/// PacketDumpWriter persists received packets for offline analysis. Each
/// entry is an 8-octet network-time arrival, a 4-octet big-endian size and
/// the payload octets.
pub struct PacketDumpWriter<W: Write> {
    writer: W,
}

impl<W: Write> PacketDumpWriter<W> {
    pub fn new(writer: W) -> Self {
        PacketDumpWriter { writer }
    }

    pub fn write_packet(&mut self, arrival: NtpTime, payload: &[u8]) -> Result<()> {
        self.writer.write_u64::<BigEndian>(arrival.as_u64())?;
        self.writer.write_u32::<BigEndian>(payload.len() as u32)?;
        self.writer.write_all(payload)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// PacketDumpReader replays a capture stream entry by entry.
pub struct PacketDumpReader<R: Read> {
    reader: R,
}

impl<R: Read> PacketDumpReader<R> {
    pub fn new(reader: R) -> Self {
        PacketDumpReader { reader }
    }

    /// Reads the next entry, or None at a clean end of stream.
    pub fn read_packet(&mut self) -> Result<Option<CaptureEntry>> {
        let arrival = match self.reader.read_u64::<BigEndian>() {
            Ok(v) => NtpTime::new(v),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let size = self
            .reader
            .read_u32::<BigEndian>()
            .map_err(|_| Error::TruncatedCaptureEntry)?;
        if size > MAX_ENTRY_SIZE {
            return Err(Error::CaptureEntryTooLarge(size));
        }

        let mut payload = vec![0u8; size as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(|_| Error::TruncatedCaptureEntry)?;

        Ok(Some(CaptureEntry {
            arrival,
            payload: Bytes::from(payload),
        }))
    }

    /// Drains the remaining entries.
    pub fn read_all(&mut self) -> Result<Vec<CaptureEntry>> {
        let mut entries = vec![];
        while let Some(entry) = self.read_packet()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
