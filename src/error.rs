use core::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A slot heap or buffer could not be allocated.
    AllocationFailed,
    /// A handle did not resolve in the heap it was looked up in.
    InvalidHandle,
    /// A profile, entrypoint, buffer type, render-target format or stream feature outside the
    /// supported set.
    Unsupported,
    /// A fixed-size list (for example the config attribute list) is full.
    CapacityExceeded,
    InvalidParameter,
    /// The operation is not valid in the object's current state (e.g. nested `begin_picture`).
    InvalidState,
    /// A buffer needed for decoding was never attached.
    MissingBuffer,
    /// Picture data that cannot be decoded at all.
    ///
    /// Truncated slice data is *not* reported this way; it is logged and decoding continues.
    MalformedBitstream,
}

pub struct Error {
    repr: Repr,
}

pub(crate) enum Repr {
    Simple(ErrorKind),
    Other(ErrorKind, String),
}

impl From<ErrorKind> for Repr {
    fn from(value: ErrorKind) -> Self {
        Self::Simple(value)
    }
}

impl From<(ErrorKind, String)> for Repr {
    fn from((kind, msg): (ErrorKind, String)) -> Self {
        Self::Other(kind, msg)
    }
}

impl<'a> From<(ErrorKind, &'a str)> for Repr {
    fn from((kind, msg): (ErrorKind, &'a str)) -> Self {
        Self::Other(kind, msg.into())
    }
}

impl Error {
    pub(crate) fn from(e: impl Into<Repr>) -> Self {
        Self { repr: e.into() }
    }

    pub(crate) fn invalid_handle(what: &str, raw: u32) -> Self {
        Self::from((ErrorKind::InvalidHandle, format!("invalid {what} {raw:08x}")))
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            Repr::Simple(kind) | Repr::Other(kind, _) => *kind,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::AllocationFailed => "allocation failed",
            ErrorKind::InvalidHandle => "invalid handle",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::CapacityExceeded => "capacity exceeded",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::MissingBuffer => "missing buffer",
            ErrorKind::MalformedBitstream => "malformed bitstream",
        })
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Simple(kind) => write!(f, "{kind:?}"),
            Repr::Other(kind, s) => write!(f, "{kind:?}: {s:?}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Simple(kind) => kind.fmt(f),
            Repr::Other(_, s) => s.fmt(f),
        }
    }
}

impl std::error::Error for Error {}
