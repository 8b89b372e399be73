
use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes};
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::error::Error;
use crate::header::*;
use crate::packet::*;
use crate::util::*;

type Result<T> = std::result::Result<T, util::Error>;

const BLOCK_HEADER_LENGTH: usize = 4;

/// A SubflowReport block nests the control packets of one subflow inside a
/// multipath wrapper, so every subflow reports through a single compound.
#[derive(Debug, PartialEq, Default, Clone)]
pub struct SubflowReport {
    pub subflow_id: u16,
    pub packets: Vec<Box<dyn Packet + Send + Sync>>,
}

impl SubflowReport {
    fn body_size(&self) -> usize {
        self.packets.iter().map(|p| p.marshal_size()).sum()
    }
}

/// An InterfaceAdvertisement block announces an endpoint a subflow can be
/// reached on: a raw IPv4/IPv6 address or a DNS name, with a port.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct InterfaceAdvertisement {
    pub subflow_id: u16,
    /// One of SUBFLOW_INTERFACE_ADVERTISEMENT_{IPV4,IPV6,DNS}.
    pub kind: u8,
    pub port: u16,
    /// 4 octets for IPv4, 16 for IPv6, a length-prefixed name for DNS.
    pub address: Bytes,
}

impl Default for InterfaceAdvertisement {
    fn default() -> Self {
        InterfaceAdvertisement {
            subflow_id: 0,
            kind: SUBFLOW_INTERFACE_ADVERTISEMENT_IPV4,
            port: 0,
            address: Bytes::from_static(&[0, 0, 0, 0]),
        }
    }
}

impl InterfaceAdvertisement {
    fn validate(&self) -> std::result::Result<(), Error> {
        match self.kind {
            SUBFLOW_INTERFACE_ADVERTISEMENT_IPV4 => {
                if self.address.len() != 4 {
                    return Err(Error::BadInterfaceAddress);
                }
            }
            SUBFLOW_INTERFACE_ADVERTISEMENT_IPV6 => {
                if self.address.len() != 16 {
                    return Err(Error::BadInterfaceAddress);
                }
            }
            SUBFLOW_INTERFACE_ADVERTISEMENT_DNS => {
                if self.address.len() > 255 {
                    return Err(Error::BadInterfaceAddress);
                }
            }
            _ => return Err(Error::UnknownSubflowReportType),
        }
        Ok(())
    }

    fn body_raw_size(&self) -> usize {
        // port + address, DNS adds a length octet
        let addr = if self.kind == SUBFLOW_INTERFACE_ADVERTISEMENT_DNS {
            1 + self.address.len()
        } else {
            self.address.len()
        };
        2 + addr
    }

    fn body_size(&self) -> usize {
        let l = self.body_raw_size();
        l + get_padding_size(l)
    }
}

/// One block of a multipath wrapper: a nested subflow compound or an
/// interface advertisement.
#[derive(Debug, PartialEq, Clone)]
pub enum MultipathBlock {
    Report(SubflowReport),
    Interface(InterfaceAdvertisement),
}

impl MultipathBlock {
    pub fn report_type(&self) -> u8 {
        match self {
            MultipathBlock::Report(_) => SUBFLOW_REPORT,
            MultipathBlock::Interface(a) => a.kind,
        }
    }

    pub fn subflow_id(&self) -> u16 {
        match self {
            MultipathBlock::Report(r) => r.subflow_id,
            MultipathBlock::Interface(a) => a.subflow_id,
        }
    }

    fn body_size(&self) -> usize {
        match self {
            MultipathBlock::Report(r) => r.body_size(),
            MultipathBlock::Interface(a) => a.body_size(),
        }
    }
}

/// The MultipathReport packet (PT 211) wraps per-subflow control traffic so
/// one compound covers every subflow of a multipath session. Each block is
/// keyed by subflow id; the subflow report type travels in the block header.
///
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|  count  |    PT=211     |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         SSRC of sender                        |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |  report type  | block length  |           subflow id          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                  block body (block length words)              :
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
#[derive(Debug, PartialEq, Default, Clone)]
pub struct MultipathReport {
    pub ssrc: u32,
    pub blocks: Vec<MultipathBlock>,
}

impl MultipathReport {
    /// Returns the nested packets reported for a given subflow.
    pub fn subflow_packets(&self, subflow_id: u16) -> Vec<Box<dyn Packet + Send + Sync>> {
        let mut out = vec![];
        for b in &self.blocks {
            if let MultipathBlock::Report(r) = b {
                if r.subflow_id == subflow_id {
                    out.extend(r.packets.iter().cloned());
                }
            }
        }
        out
    }
}

impl fmt::Display for MultipathReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = format!("MultipathReport from {:x}\n", self.ssrc);
        for b in &self.blocks {
            out += format!("\tsubflow {} type {}\n", b.subflow_id(), b.report_type()).as_str();
        }
        write!(f, "{out}")
    }
}

impl Packet for MultipathReport {
    fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.blocks.len().min(COUNT_MAX) as u8,
            packet_type: PacketType::MultipathReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        let mut out = vec![self.ssrc];
        for b in &self.blocks {
            if let MultipathBlock::Report(r) = b {
                for p in &r.packets {
                    out.extend(p.destination_ssrc());
                }
            }
        }
        out
    }

    fn raw_size(&self) -> usize {
        let blocks: usize = self
            .blocks
            .iter()
            .map(|b| BLOCK_HEADER_LENGTH + b.body_size())
            .sum();
        HEADER_LENGTH + SSRC_LENGTH + blocks
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other
            .as_any()
            .downcast_ref::<MultipathReport>()
            .map_or(false, |a| self == a)
    }

    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}

impl MarshalSize for MultipathReport {
    fn marshal_size(&self) -> usize {
        // block bodies are already word aligned
        self.raw_size()
    }
}

impl Marshal for MultipathReport {
    /// Marshal encodes the MultipathReport in binary
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if self.blocks.len() > COUNT_MAX {
            return Err(Error::TooManyReports.into());
        }

        if buf.remaining_mut() < self.marshal_size() {
            return Err(Error::BufferTooShort.into());
        }

        let h = self.header();
        let n = h.marshal_to(buf)?;
        buf = &mut buf[n..];

        buf.put_u32(self.ssrc);

        for block in &self.blocks {
            let body_size = block.body_size();
            if body_size / 4 > u8::MAX as usize {
                return Err(Error::SubflowBlockTooLong.into());
            }

            buf.put_u8(block.report_type());
            buf.put_u8((body_size / 4) as u8);
            buf.put_u16(block.subflow_id());

            match block {
                MultipathBlock::Report(r) => {
                    for p in &r.packets {
                        let n = p.marshal_to(buf)?;
                        buf = &mut buf[n..];
                    }
                }
                MultipathBlock::Interface(a) => {
                    a.validate()?;
                    buf.put_u16(a.port);
                    if a.kind == SUBFLOW_INTERFACE_ADVERTISEMENT_DNS {
                        buf.put_u8(a.address.len() as u8);
                    }
                    buf.put(a.address.clone());
                    put_padding(buf, a.body_raw_size());
                    buf = &mut buf[get_padding_size(a.body_raw_size())..];
                }
            }
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for MultipathReport {
    /// Unmarshal decodes the MultipathReport from binary
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < (HEADER_LENGTH + SSRC_LENGTH) {
            return Err(Error::PacketTooShort.into());
        }

        let header = Header::unmarshal(raw_packet)?;
        if header.packet_type != PacketType::MultipathReport {
            return Err(Error::WrongType.into());
        }

        let ssrc = raw_packet.get_u32();

        let mut blocks = vec![];
        while raw_packet.remaining() >= BLOCK_HEADER_LENGTH {
            let report_type = raw_packet.get_u8();
            let body_size = raw_packet.get_u8() as usize * 4;
            let subflow_id = raw_packet.get_u16();

            if raw_packet.remaining() < body_size {
                return Err(Error::PacketTooShort.into());
            }

            let mut body = raw_packet.copy_to_bytes(body_size);
            let block = match report_type {
                SUBFLOW_REPORT => {
                    let mut packets = vec![];
                    while body.has_remaining() {
                        packets.push(unmarshaller(&mut body)?);
                    }
                    MultipathBlock::Report(SubflowReport {
                        subflow_id,
                        packets,
                    })
                }
                SUBFLOW_INTERFACE_ADVERTISEMENT_IPV4
                | SUBFLOW_INTERFACE_ADVERTISEMENT_IPV6
                | SUBFLOW_INTERFACE_ADVERTISEMENT_DNS => {
                    if body.remaining() < 2 {
                        return Err(Error::PacketTooShort.into());
                    }
                    let port = body.get_u16();
                    let address = match report_type {
                        SUBFLOW_INTERFACE_ADVERTISEMENT_IPV4 => {
                            if body.remaining() < 4 {
                                return Err(Error::BadInterfaceAddress.into());
                            }
                            body.copy_to_bytes(4)
                        }
                        SUBFLOW_INTERFACE_ADVERTISEMENT_IPV6 => {
                            if body.remaining() < 16 {
                                return Err(Error::BadInterfaceAddress.into());
                            }
                            body.copy_to_bytes(16)
                        }
                        _ => {
                            if !body.has_remaining() {
                                return Err(Error::BadInterfaceAddress.into());
                            }
                            let len = body.get_u8() as usize;
                            if body.remaining() < len {
                                return Err(Error::BadInterfaceAddress.into());
                            }
                            body.copy_to_bytes(len)
                        }
                    };
                    MultipathBlock::Interface(InterfaceAdvertisement {
                        subflow_id,
                        kind: report_type,
                        port,
                        address,
                    })
                }
                _ => return Err(Error::UnknownSubflowReportType.into()),
            };
            blocks.push(block);
        }

        Ok(MultipathReport { ssrc, blocks })
    }
}
