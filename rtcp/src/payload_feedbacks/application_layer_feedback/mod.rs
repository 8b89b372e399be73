#[cfg(test)]
mod application_layer_feedback_test;

use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes};
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::error::Error;
use crate::header::*;
use crate::packet::*;
use crate::util::*;

type Result<T> = std::result::Result<T, util::Error>;

/// An ApplicationLayerFeedback packet (RFC 4585, 6.4) transports
/// codec-control or congestion-control messages whose semantics are defined
/// at the application layer; the FCI octets are opaque to this crate. The
/// experimental congestion feedback schemes negotiated by name (goog-remb,
/// scream, nada) all travel in this envelope.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct ApplicationLayerFeedback {
    /// SSRC of the packet sender
    pub sender_ssrc: u32,
    /// SSRC of the media source the message applies to
    pub media_ssrc: u32,
    /// Feedback control information, a multiple of 32 bits long.
    pub data: Bytes,
}

impl fmt::Display for ApplicationLayerFeedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ApplicationLayerFeedback {:x} {:x} ({} octets)",
            self.sender_ssrc,
            self.media_ssrc,
            self.data.len()
        )
    }
}

impl Packet for ApplicationLayerFeedback {
    fn header(&self) -> Header {
        Header {
            padding: get_padding_size(self.raw_size()) != 0,
            count: FORMAT_ALF,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        vec![self.media_ssrc]
    }

    fn raw_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH * 2 + self.data.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other
            .as_any()
            .downcast_ref::<ApplicationLayerFeedback>()
            .map_or(false, |a| self == a)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}

impl MarshalSize for ApplicationLayerFeedback {
    fn marshal_size(&self) -> usize {
        let l = self.raw_size();
        // align to 32-bit boundary
        l + get_padding_size(l)
    }
}

impl Marshal for ApplicationLayerFeedback {
    /// Marshal encodes the ApplicationLayerFeedback in binary
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < self.marshal_size() {
            return Err(Error::BufferTooShort.into());
        }

        /*
         *  0                   1                   2                   3
         *  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |V=2|P| FMT=15  |    PT=206     |             length            |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                   SSRC of packet sender                       |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                    SSRC of media source                       |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                 feedback control information                ...
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         */
        let h = self.header();
        let n = h.marshal_to(buf)?;
        buf = &mut buf[n..];

        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        buf.put(self.data.clone());

        if h.padding {
            put_padding(buf, self.raw_size());
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for ApplicationLayerFeedback {
    /// Unmarshal decodes the ApplicationLayerFeedback from binary
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < (HEADER_LENGTH + SSRC_LENGTH * 2) {
            return Err(Error::PacketTooShort.into());
        }

        let header = Header::unmarshal(raw_packet)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback || header.count != FORMAT_ALF
        {
            return Err(Error::WrongType.into());
        }

        let sender_ssrc = raw_packet.get_u32();
        let media_ssrc = raw_packet.get_u32();
        let data = raw_packet.copy_to_bytes(raw_packet.remaining());

        Ok(ApplicationLayerFeedback {
            sender_ssrc,
            media_ssrc,
            data,
        })
    }
}
