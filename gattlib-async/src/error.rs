//! Errors returned by the `async` wrappers.
//!
//! Failures reported by the core keep their [`gattlib::Error`], including any platform detail.
//! The wrappers add two failures of their own: a reply that can never arrive, and a receiver
//! that fell behind a broadcast channel.

use std::fmt::Display;

use futures_channel::oneshot;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    data: ErrorData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// See [`gattlib::ErrorKind`].
    Gattlib(gattlib::ErrorKind),
    /// The event loop dropped the request without answering it.
    Canceled,
    /// Values were dropped because a receiver did not keep up.
    Lagged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ErrorData {
    Core(gattlib::Error),
    Wrapper(ErrorKind),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match &self.data {
            ErrorData::Core(error) => ErrorKind::Gattlib(error.kind()),
            ErrorData::Wrapper(kind) => *kind,
        }
    }

    /// The error reported by the core, if there was one.
    pub fn get_ref(&self) -> Option<&gattlib::Error> {
        match &self.data {
            ErrorData::Core(error) => Some(error),
            ErrorData::Wrapper(_) => None,
        }
    }

    pub fn into_inner(self) -> Option<gattlib::Error> {
        match self.data {
            ErrorData::Core(error) => Some(error),
            ErrorData::Wrapper(_) => None,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.get_ref().map(|error| error as _)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ErrorData::Core(error) => Display::fmt(error, f),
            ErrorData::Wrapper(kind) => Display::fmt(kind, f),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Gattlib(kind) => Display::fmt(kind, f),
            ErrorKind::Canceled => f.write_str("request canceled"),
            ErrorKind::Lagged => f.write_str("receiver lagged"),
        }
    }
}

impl From<gattlib::Error> for Error {
    fn from(error: gattlib::Error) -> Self {
        Error {
            data: ErrorData::Core(error),
        }
    }
}

impl From<gattlib::ErrorKind> for Error {
    fn from(kind: gattlib::ErrorKind) -> Self {
        gattlib::Error::from(kind).into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Gattlib(kind) => kind.into(),
            kind => Error {
                data: ErrorData::Wrapper(kind),
            },
        }
    }
}

impl From<oneshot::Canceled> for Error {
    fn from(_: oneshot::Canceled) -> Self {
        ErrorKind::Canceled.into()
    }
}

impl From<async_broadcast::RecvError> for Error {
    fn from(error: async_broadcast::RecvError) -> Self {
        match error {
            async_broadcast::RecvError::Overflowed(_) => ErrorKind::Lagged.into(),
            async_broadcast::RecvError::Closed => ErrorKind::Canceled.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_keep_their_kind() {
        let error = Error::from(gattlib::ErrorKind::Busy);
        assert_eq!(error.kind(), ErrorKind::Gattlib(gattlib::ErrorKind::Busy));
        assert!(error.get_ref().is_some());
        assert_eq!(Error::from(ErrorKind::Gattlib(gattlib::ErrorKind::Busy)), error);
    }

    #[test]
    fn channel_failures() {
        let lagged = Error::from(async_broadcast::RecvError::Overflowed(3));
        assert_eq!(lagged.kind(), ErrorKind::Lagged);
        assert!(lagged.into_inner().is_none());
        assert_eq!(Error::from(oneshot::Canceled).kind(), ErrorKind::Canceled);
    }
}
