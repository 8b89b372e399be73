use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// A type-erased error carried across the trait-object seams of the stack.
///
/// The protocol crates keep their own typed errors; at the `Marshal` /
/// `Unmarshal` boundary they are converted into this wrapper and can be
/// recovered with [`Error::downcast_ref`].
#[derive(Debug)]
pub struct Error {
    inner: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Wraps a plain message.
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Error {
            inner: Box::new(ErrorMessage(msg.into())),
        }
    }

    /// Wraps a typed error, preserving it for later `downcast_ref`.
    pub fn from_std<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error {
            inner: Box::new(error),
        }
    }

    /// Attempts to recover the typed error this wrapper was built from.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.inner.downcast_ref::<E>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

// Compared by message; the typed originals live behind `downcast_ref`.
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

#[derive(Debug)]
struct ErrorMessage(String);

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ErrorMessage {}
