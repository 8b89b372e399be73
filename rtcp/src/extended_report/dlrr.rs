use super::*;

const DLRR_REPORT_LENGTH: usize = 12;

/// DlrrReport encodes a single sub-block of a DLRR report block: the last
/// receiver-reference time heard from `ssrc` and the delay since it arrived.
///
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 SSRC_1 (ssrc of first receiver)               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         last RR (LRR)                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   delay since last RR (DLRR)                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct DlrrReport {
    /// SSRC of the receiver whose RRT is echoed.
    pub ssrc: u32,
    /// Middle 32 bits of the NTP timestamp in the last RRT block received.
    pub last_rr: u32,
    /// Delay since that RRT block arrived, in units of 1/65536 seconds.
    pub dlrr: u32,
}

impl fmt::Display for DlrrReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// DlrrReportBlock encodes a DLRR report block as described in RFC 3611
/// section 4.5. A sender echoes every receiver-reference time it has heard,
/// so each receiver can compute the round-trip time without being a sender.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct DlrrReportBlock {
    pub reports: Vec<DlrrReport>,
}

impl fmt::Display for DlrrReportBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl DlrrReportBlock {
    pub fn xr_header(&self) -> XRHeader {
        XRHeader {
            block_type: BlockType::Dlrr,
            type_specific: 0,
            block_length: (self.raw_size() / 4 - 1) as u16,
        }
    }
}

impl Packet for DlrrReportBlock {
    fn header(&self) -> Header {
        Header::default()
    }

    /// destination_ssrc returns an array of ssrc values that this report block refers to.
    fn destination_ssrc(&self) -> Vec<u32> {
        self.reports.iter().map(|r| r.ssrc).collect()
    }

    fn raw_size(&self) -> usize {
        XR_HEADER_LENGTH + self.reports.len() * DLRR_REPORT_LENGTH
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
    fn equal(&self, other: &(dyn Packet + Send + Sync)) -> bool {
        other
            .as_any()
            .downcast_ref::<DlrrReportBlock>()
            .map_or(false, |a| self == a)
    }
    fn cloned(&self) -> Box<dyn Packet + Send + Sync> {
        Box::new(self.clone())
    }
}

impl MarshalSize for DlrrReportBlock {
    fn marshal_size(&self) -> usize {
        self.raw_size()
    }
}

impl Marshal for DlrrReportBlock {
    /// marshal_to encodes the DlrrReportBlock in binary
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < self.marshal_size() {
            return Err(error::Error::BufferTooShort.into());
        }

        let h = self.xr_header();
        let n = h.marshal_to(buf)?;
        buf = &mut buf[n..];

        for rep in &self.reports {
            buf.put_u32(rep.ssrc);
            buf.put_u32(rep.last_rr);
            buf.put_u32(rep.dlrr);
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for DlrrReportBlock {
    /// Unmarshal decodes the DlrrReportBlock from binary
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < XR_HEADER_LENGTH {
            return Err(error::Error::PacketTooShort.into());
        }

        let xr_header = XRHeader::unmarshal(raw_packet)?;
        let block_length = xr_header.block_length as usize * 4;
        if block_length % DLRR_REPORT_LENGTH != 0 || raw_packet.remaining() < block_length {
            return Err(error::Error::PacketTooShort.into());
        }

        let mut reports = Vec::with_capacity(block_length / DLRR_REPORT_LENGTH);
        for _ in 0..block_length / DLRR_REPORT_LENGTH {
            reports.push(DlrrReport {
                ssrc: raw_packet.get_u32(),
                last_rr: raw_packet.get_u32(),
                dlrr: raw_packet.get_u32(),
            });
        }

        Ok(DlrrReportBlock { reports })
    }
}
