#[cfg(test)]
mod app_defined_test;

use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes};
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::error::Error;
use crate::header::*;
use crate::packet::*;
use crate::util::*;

type Result<T> = std::result::Result<T, util::Error>;

const APP_NAME_LENGTH: usize = 4;

/// An ApplicationDefined (APP) packet carries application-specific data that
/// is not part of the standardized control traffic. The four-octet name
/// namespaces the payload; the subtype distinguishes messages within it.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct ApplicationDefined {
    /// Application subtype, carried in the count field of the header.
    pub sub_type: u8,
    /// SSRC/CSRC of the originator.
    pub ssrc: u32,
    /// Four ASCII octets chosen by the application.
    pub name: [u8; 4],
    /// Application-dependent data, a multiple of 32 bits long.
    pub data: Bytes,
}

impl fmt::Display for ApplicationDefined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ApplicationDefined {:x} {}/{}",
            self.ssrc,
            String::from_utf8_lossy(&self.name),
            self.sub_type
        )
    }
}

impl Packet for ApplicationDefined {
    fn header(&self) -> Header {
        Header {
            padding: get_padding_size(self.raw_size()) != 0,
            count: self.sub_type & COUNT_MASK,
            packet_type: PacketType::ApplicationDefined,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        vec![self.ssrc]
    }

    fn raw_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH + APP_NAME_LENGTH + self.data.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other
            .as_any()
            .downcast_ref::<ApplicationDefined>()
            .map_or(false, |a| self == a)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}

impl MarshalSize for ApplicationDefined {
    fn marshal_size(&self) -> usize {
        let l = self.raw_size();
        // align to 32-bit boundary
        l + get_padding_size(l)
    }
}

impl Marshal for ApplicationDefined {
    /// Marshal encodes the ApplicationDefined packet in binary
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if self.sub_type > 31 {
            return Err(Error::InvalidHeader.into());
        }

        if buf.remaining_mut() < self.marshal_size() {
            return Err(Error::BufferTooShort.into());
        }

        /*
         *  0                   1                   2                   3
         *  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |V=2|P| subtype |   PT=APP=204  |             length            |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                           SSRC/CSRC                           |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                          name (ASCII)                         |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                   application-dependent data                ...
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         */
        let h = self.header();
        let n = h.marshal_to(buf)?;
        buf = &mut buf[n..];

        buf.put_u32(self.ssrc);
        buf.put_slice(&self.name);
        buf.put(self.data.clone());

        if h.padding {
            put_padding(buf, self.raw_size());
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for ApplicationDefined {
    /// Unmarshal decodes the ApplicationDefined packet from binary
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let raw_packet_len = raw_packet.remaining();
        if raw_packet_len < HEADER_LENGTH + SSRC_LENGTH + APP_NAME_LENGTH {
            return Err(Error::PacketTooShort.into());
        }

        let header = Header::unmarshal(raw_packet)?;
        if header.packet_type != PacketType::ApplicationDefined {
            return Err(Error::WrongType.into());
        }

        let ssrc = raw_packet.get_u32();

        let mut name = [0u8; 4];
        raw_packet.copy_to_slice(&mut name);

        let data = raw_packet.copy_to_bytes(raw_packet.remaining());

        Ok(ApplicationDefined {
            sub_type: header.count,
            ssrc,
            name,
            data,
        })
    }
}
