#[cfg(test)]
mod h265_test;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codecs::h264::{next_ind, ANNEXB_NALUSTART_CODE};
use crate::error::{Error, Result};
use crate::packetizer::{Depacketizer, Payloader};

pub const H265NALU_HEADER_SIZE: usize = 2;
/// https://datatracker.ietf.org/doc/html/rfc7798#section-4.4.2
pub const H265NALU_AGGREGATION_PACKET_TYPE: u8 = 48;
/// https://datatracker.ietf.org/doc/html/rfc7798#section-4.4.3
pub const H265NALU_FRAGMENTATION_UNIT_TYPE: u8 = 49;
pub const H265NALU_PACI_PACKET_TYPE: u8 = 50;

pub const H265FU_HEADER_SIZE: usize = 1;
pub const H265AP_NALU_LENGTH_SIZE: usize = 2;

pub const H265FU_START_BITMASK: u8 = 0x80;
pub const H265FU_END_BITMASK: u8 = 0x40;
pub const H265FU_TYPE_BITMASK: u8 = 0x3F;

/// H265NaluHeader is the two-octet header opening every H265 NAL unit.
///
/// +---------------+---------------+
/// |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |F|   Type    |  LayerID  | TID |
/// +-------------+-----------------+
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct H265NaluHeader(pub u16);

impl H265NaluHeader {
    pub fn new(b0: u8, b1: u8) -> Self {
        H265NaluHeader((b0 as u16) << 8 | b1 as u16)
    }

    pub fn from_nalu(nalu: &[u8]) -> Result<Self> {
        if nalu.len() < H265NALU_HEADER_SIZE {
            return Err(Error::ErrShortPacket);
        }
        Ok(Self::new(nalu[0], nalu[1]))
    }

    /// forbidden-zero bit, must be false in a valid unit
    pub fn f(&self) -> bool {
        self.0 >> 15 != 0
    }

    pub fn nalu_type(&self) -> u8 {
        const MASK: u16 = 0b0111_1110 << 8;
        ((self.0 & MASK) >> (8 + 1)) as u8
    }

    pub fn layer_id(&self) -> u8 {
        const MASK: u16 = (0b0000_0001 << 8) | 0b1111_1000;
        ((self.0 & MASK) >> 3) as u8
    }

    pub fn tid(&self) -> u8 {
        const MASK: u16 = 0b0000_0111;
        (self.0 & MASK) as u8
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [(self.0 >> 8) as u8, self.0 as u8]
    }

    pub fn with_type(self, nalu_type: u8) -> Self {
        let cleared = self.0 & !(0b0111_1110 << 8);
        H265NaluHeader(cleared | ((nalu_type as u16 & 0x3F) << 9))
    }
}

/// Splits an H265 Annex B buffer into its NAL units.
pub(crate) fn split_h265_nalus(buf: &Bytes) -> Vec<Bytes> {
    let mut nalus = vec![];

    let (first_start, first_len) = next_ind(buf, 0);
    if first_start == -1 {
        nalus.push(buf.clone());
        return nalus;
    }

    let mut prev_start = (first_start + first_len) as usize;
    loop {
        let (next_start, next_len) = next_ind(buf, prev_start);
        if next_start == -1 {
            nalus.push(buf.slice(prev_start..));
            break;
        }
        nalus.push(buf.slice(prev_start..next_start as usize));
        prev_start = (next_start + next_len) as usize;
    }

    nalus
}

/// H265Payloader packetizes H265 Annex B streams into single-NAL-unit
/// payloads, aggregation packets (type 48) for small units sharing a
/// timestamp, and fragmentation units (type 49) for oversized units
/// (RFC 7798).
#[derive(Default, Debug, Clone)]
pub struct H265Payloader {
    aggregate: Vec<Bytes>,
}

impl H265Payloader {
    fn aggregate_size(&self) -> usize {
        H265NALU_HEADER_SIZE
            + self
                .aggregate
                .iter()
                .map(|n| H265AP_NALU_LENGTH_SIZE + n.len())
                .sum::<usize>()
    }

    fn flush_aggregate(&mut self, payloads: &mut Vec<Bytes>) {
        match self.aggregate.len() {
            0 => {}
            1 => payloads.extend(self.aggregate.drain(..)),
            _ => {
                // the AP header carries the lowest layer id and tid of the
                // aggregated units
                let mut layer_id = u8::MAX;
                let mut tid = u8::MAX;
                for nalu in &self.aggregate {
                    if let Ok(h) = H265NaluHeader::from_nalu(nalu) {
                        layer_id = layer_id.min(h.layer_id());
                        tid = tid.min(h.tid());
                    }
                }
                if layer_id == u8::MAX {
                    layer_id = 0;
                }
                if tid == u8::MAX {
                    tid = 0;
                }

                let header = ((H265NALU_AGGREGATION_PACKET_TYPE as u16) << 9)
                    | ((layer_id as u16) << 3)
                    | tid as u16;

                let mut ap = BytesMut::with_capacity(self.aggregate_size());
                ap.put_u16(header);
                for nalu in self.aggregate.drain(..) {
                    ap.put_u16(nalu.len() as u16);
                    ap.put(nalu);
                }
                payloads.push(ap.freeze());
            }
        }
    }

    fn fragment(&self, nalu: &Bytes, mtu: usize, payloads: &mut Vec<Bytes>) {
        let Ok(header) = H265NaluHeader::from_nalu(nalu) else {
            return;
        };

        let fu_indicator = header.with_type(H265NALU_FRAGMENTATION_UNIT_TYPE).to_bytes();
        let max_fragment_size =
            mtu as isize - (H265NALU_HEADER_SIZE + H265FU_HEADER_SIZE) as isize;

        // the two-octet unit header is reconstructed from the FU header at
        // the receiver and not transmitted in the fragments
        let mut nalu_data_index = H265NALU_HEADER_SIZE as isize;
        let nalu_data_length = nalu.len() as isize - nalu_data_index;
        let mut nalu_data_remaining = nalu_data_length;

        if std::cmp::min(max_fragment_size, nalu_data_remaining) <= 0 {
            return;
        }

        while nalu_data_remaining > 0 {
            let current_fragment_size = std::cmp::min(max_fragment_size, nalu_data_remaining);
            let mut out = BytesMut::with_capacity(
                H265NALU_HEADER_SIZE + H265FU_HEADER_SIZE + current_fragment_size as usize,
            );

            out.put_slice(&fu_indicator);

            // +---------------+
            // |0|1|2|3|4|5|6|7|
            // +-+-+-+-+-+-+-+-+
            // |S|E|   FuType  |
            // +---------------+
            let mut fu_header = header.nalu_type() & H265FU_TYPE_BITMASK;
            if nalu_data_remaining == nalu_data_length {
                fu_header |= H265FU_START_BITMASK;
            } else if nalu_data_remaining - current_fragment_size == 0 {
                fu_header |= H265FU_END_BITMASK;
            }
            out.put_u8(fu_header);

            out.put(
                &nalu[nalu_data_index as usize..(nalu_data_index + current_fragment_size) as usize],
            );
            payloads.push(out.freeze());

            nalu_data_remaining -= current_fragment_size;
            nalu_data_index += current_fragment_size;
        }
    }

    fn emit(&mut self, nalu: &Bytes, mtu: usize, payloads: &mut Vec<Bytes>) {
        if nalu.len() < H265NALU_HEADER_SIZE {
            return;
        }

        if nalu.len() > mtu {
            self.flush_aggregate(payloads);
            self.fragment(nalu, mtu, payloads);
            return;
        }

        if self.aggregate_size() + H265AP_NALU_LENGTH_SIZE + nalu.len() > mtu {
            self.flush_aggregate(payloads);
        }
        self.aggregate.push(nalu.clone());
    }
}

impl Payloader for H265Payloader {
    /// Payload fragments an H265 Annex B stream across one or more payloads.
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let mut payloads = vec![];
        for nalu in split_h265_nalus(payload) {
            self.emit(&nalu, mtu, &mut payloads);
        }
        self.flush_aggregate(&mut payloads);

        Ok(payloads)
    }

    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync> {
        Box::new(self.clone())
    }
}

/// H265Packet depacketizes RFC 7798 payloads back into Annex B NAL units,
/// with the same strict fragmentation-unit validation as the AVC path.
#[derive(PartialEq, Eq, Debug, Default, Clone)]
pub struct H265Packet {
    fu_buffer: Option<BytesMut>,
    fu_header: H265NaluHeader,
}

impl Depacketizer for H265Packet {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        if packet.len() <= H265NALU_HEADER_SIZE {
            return Err(Error::ErrShortPacket);
        }

        let header = H265NaluHeader::new(packet[0], packet[1]);
        if header.f() {
            return Err(Error::ErrH265CorruptedPacket);
        }

        let mut payload = BytesMut::new();

        match header.nalu_type() {
            H265NALU_AGGREGATION_PACKET_TYPE => {
                self.fu_buffer = None;

                let mut curr_offset = H265NALU_HEADER_SIZE;
                while curr_offset < packet.len() {
                    if packet.len() < curr_offset + H265AP_NALU_LENGTH_SIZE {
                        return Err(Error::ErrShortPacket);
                    }
                    let nalu_size =
                        ((packet[curr_offset] as usize) << 8) | packet[curr_offset + 1] as usize;
                    curr_offset += H265AP_NALU_LENGTH_SIZE;

                    if packet.len() < curr_offset + nalu_size {
                        return Err(Error::AggregationSizeLargerThanBuffer(
                            nalu_size,
                            packet.len() - curr_offset,
                        ));
                    }

                    payload.put(&*ANNEXB_NALUSTART_CODE);
                    payload.put(&packet[curr_offset..curr_offset + nalu_size]);
                    curr_offset += nalu_size;
                }

                Ok(payload.freeze())
            }
            H265NALU_FRAGMENTATION_UNIT_TYPE => {
                if packet.len() < H265NALU_HEADER_SIZE + H265FU_HEADER_SIZE {
                    return Err(Error::ErrShortPacket);
                }

                let fu_header = packet[H265NALU_HEADER_SIZE];
                let fu_type = fu_header & H265FU_TYPE_BITMASK;

                if fu_header & H265FU_START_BITMASK != 0 {
                    // an unfinished fragment sequence is discarded here
                    self.fu_buffer = Some(BytesMut::new());
                    self.fu_header = header.with_type(fu_type);
                } else {
                    match &self.fu_buffer {
                        None => return Err(Error::FragmentMissingStart),
                        Some(_) => {
                            if self.fu_header.nalu_type() != fu_type {
                                self.fu_buffer = None;
                                return Err(Error::FragmentTypeMismatch);
                            }
                        }
                    }
                }

                if let Some(fu_buffer) = &mut self.fu_buffer {
                    fu_buffer
                        .put(&*packet.slice(H265NALU_HEADER_SIZE + H265FU_HEADER_SIZE..));
                }

                if fu_header & H265FU_END_BITMASK != 0 {
                    if let Some(fu_buffer) = self.fu_buffer.take() {
                        payload.put(&*ANNEXB_NALUSTART_CODE);
                        payload.put_slice(&self.fu_header.to_bytes());
                        payload.put(fu_buffer);
                    }

                    Ok(payload.freeze())
                } else {
                    Ok(Bytes::new())
                }
            }
            H265NALU_PACI_PACKET_TYPE => Err(Error::ErrInvalidH265PacketType),
            _ => {
                // single NAL unit
                self.fu_buffer = None;

                payload.put(&*ANNEXB_NALUSTART_CODE);
                payload.put(&*packet.clone());
                Ok(payload.freeze())
            }
        }
    }

    fn is_partition_head(&self, payload: &Bytes) -> bool {
        if payload.len() < H265NALU_HEADER_SIZE + H265FU_HEADER_SIZE {
            return true;
        }

        let header = H265NaluHeader::new(payload[0], payload[1]);
        if header.nalu_type() == H265NALU_FRAGMENTATION_UNIT_TYPE {
            payload[H265NALU_HEADER_SIZE] & H265FU_START_BITMASK != 0
        } else {
            true
        }
    }

    fn is_partition_tail(&self, marker: bool, _payload: &Bytes) -> bool {
        marker
    }
}
