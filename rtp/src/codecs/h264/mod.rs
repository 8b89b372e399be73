#[cfg(test)]
mod h264_test;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::packetizer::{Depacketizer, Payloader};

pub const STAPA_NALU_TYPE: u8 = 24;
pub const FUA_NALU_TYPE: u8 = 28;
pub const FUB_NALU_TYPE: u8 = 29;
pub const SPS_NALU_TYPE: u8 = 7;
pub const PPS_NALU_TYPE: u8 = 8;
pub const AUD_NALU_TYPE: u8 = 9;
pub const FILLER_NALU_TYPE: u8 = 12;

pub const FUA_HEADER_SIZE: usize = 2;
pub const STAPA_HEADER_SIZE: usize = 1;
pub const STAPA_NALU_LENGTH_SIZE: usize = 2;

pub const NALU_TYPE_BITMASK: u8 = 0x1F;
pub const NALU_REF_IDC_BITMASK: u8 = 0x60;
pub const FU_START_BITMASK: u8 = 0x80;
pub const FU_END_BITMASK: u8 = 0x40;

pub static ANNEXB_NALUSTART_CODE: Bytes = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01]);

/// Scans an Annex B stream for the next NAL-unit start code at or after
/// `start`. Returns (index, start-code length), or (-1, -1) when none left.
pub(crate) fn next_ind(nalu: &Bytes, start: usize) -> (isize, isize) {
    let mut zero_count = 0;

    for (i, &b) in nalu[start..].iter().enumerate() {
        if b == 0 {
            zero_count += 1;
            continue;
        } else if b == 1 && zero_count >= 2 {
            return ((start + i - zero_count) as isize, zero_count as isize + 1);
        }
        zero_count = 0
    }
    (-1, -1)
}

/// Splits an Annex B buffer into its NAL units. A buffer without any start
/// code is treated as a single unit.
pub(crate) fn split_nalus(buf: &Bytes) -> Vec<Bytes> {
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

/// H264Payloader packetizes H264 Annex B streams into single-NAL-unit
/// payloads, STAP-A aggregates of small units sharing a timestamp, and FU-A
/// fragments for units exceeding the transmission unit (RFC 6184,
/// non-interleaved mode).
#[derive(Default, Debug, Clone)]
pub struct H264Payloader {
    /// pending small units for the STAP-A under construction
    aggregate: Vec<Bytes>,
}

impl H264Payloader {
    fn aggregate_size(&self) -> usize {
        STAPA_HEADER_SIZE
            + self
                .aggregate
                .iter()
                .map(|n| STAPA_NALU_LENGTH_SIZE + n.len())
                .sum::<usize>()
    }

    fn flush_aggregate(&mut self, payloads: &mut Vec<Bytes>) {
        match self.aggregate.len() {
            0 => {}
            1 => payloads.extend(self.aggregate.drain(..)),
            _ => {
                // F is zero, NRI is the strongest of the aggregated units
                let nri = self
                    .aggregate
                    .iter()
                    .map(|n| n[0] & NALU_REF_IDC_BITMASK)
                    .max()
                    .unwrap_or(0);

                let mut stap_a = BytesMut::with_capacity(self.aggregate_size());
                stap_a.put_u8(STAPA_NALU_TYPE | nri);
                for nalu in self.aggregate.drain(..) {
                    stap_a.put_u16(nalu.len() as u16);
                    stap_a.put(nalu);
                }
                payloads.push(stap_a.freeze());
            }
        }
    }

    fn fragment(&self, nalu: &Bytes, mtu: usize, payloads: &mut Vec<Bytes>) {
        let nalu_type = nalu[0] & NALU_TYPE_BITMASK;
        let nalu_ref_idc = nalu[0] & NALU_REF_IDC_BITMASK;

        let max_fragment_size = mtu as isize - FUA_HEADER_SIZE as isize;

        // The FU payload carries the fragmented unit without its first
        // octet; that octet's information travels in the FU indicator and
        // FU header instead.
        let mut nalu_data_index = 1;
        let nalu_data_length = nalu.len() as isize - nalu_data_index;
        let mut nalu_data_remaining = nalu_data_length;

        if std::cmp::min(max_fragment_size, nalu_data_remaining) <= 0 {
            return;
        }

        while nalu_data_remaining > 0 {
            let current_fragment_size = std::cmp::min(max_fragment_size, nalu_data_remaining);
            let mut out = BytesMut::with_capacity(FUA_HEADER_SIZE + current_fragment_size as usize);

            // +---------------+     +---------------+
            // |0|1|2|3|4|5|6|7|     |0|1|2|3|4|5|6|7|
            // +-+-+-+-+-+-+-+-+     +-+-+-+-+-+-+-+-+
            // |F|NRI| Type=28 |     |S|E|R|  Type   |
            // +---------------+     +---------------+
            out.put_u8(FUA_NALU_TYPE | nalu_ref_idc);

            let mut b1 = nalu_type;
            if nalu_data_remaining == nalu_data_length {
                b1 |= FU_START_BITMASK;
            } else if nalu_data_remaining - current_fragment_size == 0 {
                b1 |= FU_END_BITMASK;
            }
            out.put_u8(b1);

            out.put(
                &nalu[nalu_data_index as usize..(nalu_data_index + current_fragment_size) as usize],
            );
            payloads.push(out.freeze());

            nalu_data_remaining -= current_fragment_size;
            nalu_data_index += current_fragment_size;
        }
    }

    fn emit(&mut self, nalu: &Bytes, mtu: usize, payloads: &mut Vec<Bytes>) {
        if nalu.is_empty() {
            return;
        }

        let nalu_type = nalu[0] & NALU_TYPE_BITMASK;
        if nalu_type == AUD_NALU_TYPE || nalu_type == FILLER_NALU_TYPE {
            return;
        }

        if nalu.len() > mtu {
            self.flush_aggregate(payloads);
            self.fragment(nalu, mtu, payloads);
            return;
        }

        // pack small consecutive units of this access unit into one STAP-A
        if self.aggregate_size() + STAPA_NALU_LENGTH_SIZE + nalu.len() > mtu {
            self.flush_aggregate(payloads);
        }
        self.aggregate.push(nalu.clone());
    }
}

impl Payloader for H264Payloader {
    /// Payload fragments an H264 Annex B stream across one or more payloads.
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let mut payloads = vec![];
        for nalu in split_nalus(payload) {
            self.emit(&nalu, mtu, &mut payloads);
        }
        self.flush_aggregate(&mut payloads);

        Ok(payloads)
    }

    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync> {
        Box::new(self.clone())
    }
}

/// H264Packet depacketizes the RFC 6184 payload formats back into Annex B
/// (or length-prefixed AVC) NAL units.
///
/// Fragmented units are validated strictly: the sequence must open with the
/// start bit, close with the end bit and keep its NALU type throughout.
/// Violations drop the partial unit and surface as an error the caller
/// accounts as a loss.
#[derive(PartialEq, Eq, Debug, Default, Clone)]
pub struct H264Packet {
    pub is_avc: bool,
    fua_buffer: Option<BytesMut>,
    fua_nalu_type: u8,
}

impl H264Packet {
    fn write_unit(&self, out: &mut BytesMut, unit: &[u8]) {
        if self.is_avc {
            out.put_u32(unit.len() as u32);
        } else {
            out.put(&*ANNEXB_NALUSTART_CODE);
        }
        out.put(unit);
    }
}

impl Depacketizer for H264Packet {
    /// depacketize parses the passed byte slice and returns the contained
    /// NAL units, reassembling fragmentation units across calls.
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        if packet.len() <= 2 {
            return Err(Error::ErrShortPacket);
        }

        let mut payload = BytesMut::new();

        // NALU Types
        // https://tools.ietf.org/html/rfc6184#section-5.4
        let b0 = packet[0];
        let nalu_type = b0 & NALU_TYPE_BITMASK;

        match nalu_type {
            1..=23 => {
                // a pending fragment sequence never saw its end bit
                self.fua_buffer = None;

                self.write_unit(&mut payload, packet);
                Ok(payload.freeze())
            }
            STAPA_NALU_TYPE => {
                self.fua_buffer = None;

                let mut curr_offset = STAPA_HEADER_SIZE;
                while curr_offset < packet.len() {
                    if packet.len() < curr_offset + STAPA_NALU_LENGTH_SIZE {
                        return Err(Error::ErrShortPacket);
                    }
                    let nalu_size =
                        ((packet[curr_offset] as usize) << 8) | packet[curr_offset + 1] as usize;
                    curr_offset += STAPA_NALU_LENGTH_SIZE;

                    if packet.len() < curr_offset + nalu_size {
                        return Err(Error::AggregationSizeLargerThanBuffer(
                            nalu_size,
                            packet.len() - curr_offset,
                        ));
                    }

                    self.write_unit(&mut payload, &packet[curr_offset..curr_offset + nalu_size]);
                    curr_offset += nalu_size;
                }

                Ok(payload.freeze())
            }
            FUA_NALU_TYPE => {
                if packet.len() < FUA_HEADER_SIZE {
                    return Err(Error::ErrShortPacket);
                }

                let b1 = packet[1];
                let fragmented_nalu_type = b1 & NALU_TYPE_BITMASK;

                if b1 & FU_START_BITMASK != 0 {
                    // an unfinished fragment sequence is discarded here
                    self.fua_buffer = Some(BytesMut::new());
                    self.fua_nalu_type = fragmented_nalu_type;
                } else {
                    match &self.fua_buffer {
                        None => return Err(Error::FragmentMissingStart),
                        Some(_) => {
                            if fragmented_nalu_type != self.fua_nalu_type {
                                self.fua_buffer = None;
                                return Err(Error::FragmentTypeMismatch);
                            }
                        }
                    }
                }

                if let Some(fua_buffer) = &mut self.fua_buffer {
                    fua_buffer.put(&*packet.slice(FUA_HEADER_SIZE..));
                }

                if b1 & FU_END_BITMASK != 0 {
                    let nalu_ref_idc = b0 & NALU_REF_IDC_BITMASK;

                    if let Some(fua_buffer) = self.fua_buffer.take() {
                        if self.is_avc {
                            payload.put_u32((fua_buffer.len() + 1) as u32);
                        } else {
                            payload.put(&*ANNEXB_NALUSTART_CODE);
                        }
                        payload.put_u8(nalu_ref_idc | self.fua_nalu_type);
                        payload.put(fua_buffer);
                    }

                    Ok(payload.freeze())
                } else {
                    Ok(Bytes::new())
                }
            }
            _ => Err(Error::NaluTypeIsNotHandled(nalu_type)),
        }
    }

    /// is_partition_head checks if this is the head of a packetized nalu
    /// stream.
    fn is_partition_head(&self, payload: &Bytes) -> bool {
        if payload.len() < 2 {
            return false;
        }

        if payload[0] & NALU_TYPE_BITMASK == FUA_NALU_TYPE
            || payload[0] & NALU_TYPE_BITMASK == FUB_NALU_TYPE
        {
            (payload[1] & FU_START_BITMASK) != 0
        } else {
            true
        }
    }

    fn is_partition_tail(&self, marker: bool, _payload: &Bytes) -> bool {
        marker
    }
}
