#![warn(rust_2018_idioms)]
#![allow(dead_code)]

// re-export sub-crates
pub use media;
pub use rtcp;
pub use rtp;
pub use session;
pub use util;

pub use session::session::{
    MediaGroup, RtpSession, SessionConfig, SessionEvent, SessionSnapshot,
};
pub use session::Error;
