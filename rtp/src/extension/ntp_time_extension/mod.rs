#[cfg(test)]
mod ntp_time_extension_test;

use std::time::SystemTime;

use bytes::{Buf, BufMut};
use util::marshal::{Marshal, MarshalSize, Unmarshal};
use util::ntp::NtpTime;

use crate::error::Error;

pub const NTP_TIME_EXTENSION_SIZE: usize = 8;
/// The 56-bit variant is recognized on the wire but carries no supported
/// semantics; parsing it is an explicit error the caller discards on.
pub const NTP_TIME_EXTENSION_56_SIZE: usize = 7;

/// NtpTimeExtension is the 64-bit wall-clock synchronization header
/// extension element: 32 bits of seconds and 32 bits of fraction
/// (urn:ietf:params:rtp-hdrext:ntp-64).
#[derive(PartialEq, Eq, Debug, Default, Copy, Clone)]
pub struct NtpTimeExtension {
    pub timestamp: NtpTime,
}

impl NtpTimeExtension {
    pub fn new(send_time: SystemTime) -> Self {
        NtpTimeExtension {
            timestamp: NtpTime::from(send_time),
        }
    }
}

impl MarshalSize for NtpTimeExtension {
    fn marshal_size(&self) -> usize {
        NTP_TIME_EXTENSION_SIZE
    }
}

impl Marshal for NtpTimeExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize, util::Error> {
        if buf.remaining_mut() < NTP_TIME_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall.into());
        }

        let (seconds, fraction) = self.timestamp.split();
        buf.put_u32(seconds);
        buf.put_u32(fraction);

        Ok(NTP_TIME_EXTENSION_SIZE)
    }
}

impl Unmarshal for NtpTimeExtension {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self, util::Error>
    where
        Self: Sized,
        B: Buf,
    {
        match raw_packet.remaining() {
            NTP_TIME_EXTENSION_SIZE => {
                let seconds = raw_packet.get_u32();
                let fraction = raw_packet.get_u32();
                Ok(NtpTimeExtension {
                    timestamp: NtpTime::from_parts(seconds, fraction),
                })
            }
            // 56-bit form: acknowledged, not interpreted
            NTP_TIME_EXTENSION_56_SIZE => Err(Error::ErrNtp56Unsupported.into()),
            _ => Err(Error::ErrBadSyncExtensionLength.into()),
        }
    }
}
