#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod error;
pub mod io;
pub mod playout;

pub use error::Error;

use std::time::{Duration, SystemTime};

use bytes::Bytes;

/// A Sample contains encoded media and timing information.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Bytes,
    pub timestamp: SystemTime,
    pub duration: Duration,
    pub packet_timestamp: u32,
    pub prev_dropped_packets: u16,
}

impl Default for Sample {
    fn default() -> Self {
        Sample {
            data: Bytes::new(),
            timestamp: SystemTime::now(),
            duration: Duration::from_secs(0),
            packet_timestamp: 0,
            prev_dropped_packets: 0,
        }
    }
}

impl PartialEq for Sample {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
            && self.duration == other.duration
            && self.packet_timestamp == other.packet_timestamp
            && self.prev_dropped_packets == other.prev_dropped_packets
    }
}

/// An AccessUnit is a group of encoded samples sharing one presentation
/// time. Every sample of the unit is packetized under the same media
/// timestamp; the unit as a whole advances the media clock by
/// `duration_ticks`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AccessUnit {
    pub samples: Vec<Bytes>,
    pub duration_ticks: u32,
}

impl AccessUnit {
    pub fn new(samples: Vec<Bytes>, duration_ticks: u32) -> Self {
        AccessUnit {
            samples,
            duration_ticks,
        }
    }
}
