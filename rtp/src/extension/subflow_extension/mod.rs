
use bytes::{Buf, BufMut};
use util::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::error::Error;

pub const SUBFLOW_EXTENSION_SIZE: usize = 4;

/// Element type carried in-band next to the subflow header on some stacks:
/// a zero-length connectivity check. Recognized so a probing peer is not
/// counted as malformed; it carries no state.
pub const SUBFLOW_CONNECTIVITY_CHECK_SIZE: usize = 0;

/// SubflowExtension is the multipath subflow tag: the id of the subflow a
/// packet was scheduled onto and the packet's sequence number within that
/// subflow's own sequence space.
#[derive(PartialEq, Eq, Debug, Default, Copy, Clone)]
pub struct SubflowExtension {
    pub subflow_id: u16,
    pub subflow_sequence_number: u16,
}

impl MarshalSize for SubflowExtension {
    fn marshal_size(&self) -> usize {
        SUBFLOW_EXTENSION_SIZE
    }
}

impl Marshal for SubflowExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize, util::Error> {
        if buf.remaining_mut() < SUBFLOW_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall.into());
        }

        buf.put_u16(self.subflow_id);
        buf.put_u16(self.subflow_sequence_number);

        Ok(SUBFLOW_EXTENSION_SIZE)
    }
}

impl Unmarshal for SubflowExtension {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self, util::Error>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < SUBFLOW_EXTENSION_SIZE {
            return Err(Error::ErrShortPacket.into());
        }

        let subflow_id = raw_packet.get_u16();
        let subflow_sequence_number = raw_packet.get_u16();

        Ok(SubflowExtension {
            subflow_id,
            subflow_sequence_number,
        })
    }
}
