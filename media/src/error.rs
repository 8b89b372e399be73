use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Dump stream ended inside an entry.
    #[error("truncated capture entry")]
    TruncatedCaptureEntry,
    /// Capture entry declares an implausible size.
    #[error("capture entry too large ({0} octets)")]
    CaptureEntryTooLarge(u32),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Util(#[from] util::Error),
}
