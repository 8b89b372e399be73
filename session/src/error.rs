use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session core.
///
/// Wire-format and validation failures are recovered locally (the offending
/// packet is dropped and counted); they appear here only when a caller asks
/// to parse explicitly. Transport faults are reported to the caller and are
/// not locally recoverable. Configuration faults are fatal at construction.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed bits, length mismatch, inconsistent padding, or an unknown
    /// mandatory variant. The packet is discarded and counted.
    #[error("wire format: {0}")]
    WireFormat(String),
    /// Version mismatch, probation failure or reserved-bit violation.
    #[error("validation: {0}")]
    Validation(String),
    /// Own synchronization source observed from a foreign endpoint.
    #[error("ssrc collision on {0:#010x}")]
    Collision(u32),
    /// Reported by the transport adapter; the session records it and
    /// signals the caller.
    #[error("transport fault: {0}")]
    TransportFault(String),
    /// Inconsistent session parameters, fatal at construction.
    #[error("configuration fault: {0}")]
    ConfigurationFault(String),
    /// The session was asked to do something after teardown.
    #[error("session closed")]
    SessionClosed,

    #[error("{0}")]
    Rtp(#[from] rtp::Error),
    #[error("{0}")]
    Rtcp(#[from] rtcp::Error),
    #[error("{0}")]
    Util(#[from] util::Error),
    #[error("{0}")]
    Media(#[from] media::Error),
}
