use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("RTP header size insufficient")]
    ErrHeaderSizeInsufficient,
    #[error("RTP header size insufficient for extension")]
    ErrHeaderSizeInsufficientForExtension,
    #[error("buffer too small")]
    ErrBufferTooSmall,
    #[error("extension not enabled")]
    ErrHeaderExtensionsNotEnabled,
    #[error("extension not found")]
    ErrHeaderExtensionNotFound,

    #[error("header extension id must be between 1 and 14 for RFC 5285 one byte extensions")]
    ErrRfc8285oneByteHeaderIdrange,
    #[error("header extension payload must be 16 bytes or less for RFC 5285 one byte extensions")]
    ErrRfc8285oneByteHeaderSize,

    #[error("header extension id must be between 1 and 255 for RFC 5285 extensions")]
    ErrRfc8285twoByteHeaderIdrange,
    #[error("header extension payload must be 255 bytes or less for RFC 5285 two byte extensions")]
    ErrRfc8285twoByteHeaderSize,

    #[error("header extension id must be 0 for non RFC 5285 extensions")]
    ErrRfc3550headerIdrange,

    #[error("header extension payload must be in 32-bit words")]
    HeaderExtensionPayloadNot32BitWords,

    #[error("packet is not large enough")]
    ErrShortPacket,
    #[error("NALU type is unhandled")]
    ErrUnhandledNaluType,
    #[error("aggregation unit declared size({0}) is larger than buffer({1})")]
    AggregationSizeLargerThanBuffer(usize, usize),
    #[error("nalu type {0} is currently not handled")]
    NaluTypeIsNotHandled(u8),

    #[error("fragmentation unit started without a start bit")]
    FragmentMissingStart,
    #[error("fragmentation unit ended without an end bit")]
    FragmentMissingEnd,
    #[error("fragmentation unit changed NALU type mid-stream")]
    FragmentTypeMismatch,

    #[error("corrupted h265 packet")]
    ErrH265CorruptedPacket,
    #[error("invalid h265 packet type")]
    ErrInvalidH265PacketType,

    #[error("56-bit wall-clock synchronization extension is not supported")]
    ErrNtp56Unsupported,
    #[error("wall-clock synchronization extension has unknown length")]
    ErrBadSyncExtensionLength,

    #[error("{0}")]
    Util(#[from] util::Error),

    #[error("{0}")]
    Other(String),
}

impl From<Error> for util::Error {
    fn from(e: Error) -> Self {
        util::Error::from_std(e)
    }
}

impl PartialEq<util::Error> for Error {
    fn eq(&self, other: &util::Error) -> bool {
        if let Some(down) = other.downcast_ref::<Error>() {
            self == down
        } else {
            false
        }
    }
}
