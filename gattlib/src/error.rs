//! Error types for this crate.

use std::fmt::Display;

/// A convenience type alias for a `Result` with an `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    data: ErrorData,
}

/// The platform layer an underlying error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlatformModule {
    /// The inter-process transport to the platform Bluetooth service.
    Dbus,
    /// The platform Bluetooth service itself.
    Bluez,
    /// The host operating system or runtime.
    Internal,
}

impl PlatformModule {
    /// The bit mask OR-ed into [`Error::code()`] for errors from this module.
    pub const fn mask(self) -> u32 {
        match self {
            PlatformModule::Dbus => 0x1000_0000,
            PlatformModule::Bluez => 0x2000_0000,
            PlatformModule::Internal => 0x8000_0000,
        }
    }
}

/// The kind of error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// The caller supplied a missing or contradictory argument.
    InvalidParameter,
    /// The adapter, device, characteristic or descriptor does not exist.
    NotFound,
    /// A bounded wait elapsed.
    Timeout,
    /// An allocation failed.
    OutOfMemory,
    /// The active platform does not support the operation.
    NotSupported,
    /// The device is not in the connected state.
    NotConnected,
    /// The operation conflicts with a state transition already in progress.
    Busy,
    /// An internal invariant was violated.
    Unexpected,
    /// The adapter has been closed.
    AdapterClosed,
    /// The connection has been torn down.
    DeviceDisconnected,
    /// An error reported by the platform.
    Platform(PlatformModule),
}

impl ErrorKind {
    /// The stable numeric code of this kind.
    pub const fn code(self) -> u32 {
        match self {
            ErrorKind::InvalidParameter => 1,
            ErrorKind::NotFound => 2,
            ErrorKind::Timeout => 3,
            ErrorKind::OutOfMemory => 4,
            ErrorKind::NotSupported => 5,
            ErrorKind::NotConnected => 7,
            ErrorKind::Busy => 9,
            ErrorKind::Unexpected => 10,
            ErrorKind::AdapterClosed => 11,
            ErrorKind::DeviceDisconnected => 12,
            ErrorKind::Platform(module) => module.mask(),
        }
    }
}

/// An error reported by a platform collaborator, preserved with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformError {
    module: PlatformModule,
    domain: String,
    code: u32,
    message: String,
}

impl PlatformError {
    pub fn new(
        module: PlatformModule,
        domain: impl Into<String>,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            module,
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    pub fn module(&self) -> PlatformModule {
        self.module
    }

    /// The collaborator's error domain, e.g. `org.bluez.Error.Failed`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.domain, self.message, self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ErrorData {
    Platform(PlatformError),
    Simple(ErrorKind),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ErrorData::Platform(error) => error.fmt(f),
            ErrorData::Simple(kind) => kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            data: ErrorData::Simple(kind),
        }
    }
}

impl From<PlatformError> for Error {
    fn from(error: PlatformError) -> Self {
        Error {
            data: ErrorData::Platform(error),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::OutOfMemory {
            return ErrorKind::OutOfMemory.into();
        }

        let code = error.raw_os_error().map_or(0, |code| code as u32);
        PlatformError::new(PlatformModule::Internal, "std::io", code, error.to_string()).into()
    }
}

impl From<serial_executor::LockError> for Error {
    fn from(error: serial_executor::LockError) -> Self {
        match error {
            serial_executor::LockError::Closed => ErrorKind::AdapterClosed.into(),
            serial_executor::LockError::Reentrant => ErrorKind::Unexpected.into(),
        }
    }
}

impl Error {
    /// If this error came from the platform, returns a reference to the underlying `PlatformError`.
    pub fn get_ref(&self) -> Option<&PlatformError> {
        match &self.data {
            ErrorData::Platform(error) => Some(error),
            ErrorData::Simple(_) => None,
        }
    }

    /// If this error came from the platform, returns the underlying `PlatformError`.
    pub fn into_inner(self) -> Option<PlatformError> {
        match self.data {
            ErrorData::Platform(error) => Some(error),
            ErrorData::Simple(_) => None,
        }
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> ErrorKind {
        match &self.data {
            ErrorData::Platform(error) => ErrorKind::Platform(error.module),
            ErrorData::Simple(kind) => *kind,
        }
    }

    /// The numeric error code.
    ///
    /// Platform errors carry their module mask in the high bits and the collaborator's own code
    /// in the low bits.
    pub fn code(&self) -> u32 {
        match &self.data {
            ErrorData::Platform(error) => error.module.mask() | (error.code & 0x0fff_ffff),
            ErrorData::Simple(kind) => kind.code(),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidParameter => f.write_str("invalid parameter"),
            ErrorKind::NotFound => f.write_str("not found"),
            ErrorKind::Timeout => f.write_str("timed out"),
            ErrorKind::OutOfMemory => f.write_str("out of memory"),
            ErrorKind::NotSupported => f.write_str("not supported"),
            ErrorKind::NotConnected => f.write_str("device not connected"),
            ErrorKind::Busy => f.write_str("busy"),
            ErrorKind::Unexpected => f.write_str("unexpected state"),
            ErrorKind::AdapterClosed => f.write_str("adapter closed"),
            ErrorKind::DeviceDisconnected => f.write_str("device disconnected"),
            ErrorKind::Platform(PlatformModule::Dbus) => f.write_str("D-Bus error"),
            ErrorKind::Platform(PlatformModule::Bluez) => f.write_str("BlueZ error"),
            ErrorKind::Platform(PlatformModule::Internal) => f.write_str("internal error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_codes_are_stable() {
        assert_eq!(Error::from(ErrorKind::InvalidParameter).code(), 1);
        assert_eq!(Error::from(ErrorKind::NotFound).code(), 2);
        assert_eq!(Error::from(ErrorKind::Timeout).code(), 3);
        assert_eq!(Error::from(ErrorKind::Busy).code(), 9);
        assert_eq!(Error::from(ErrorKind::Unexpected).code(), 10);
        assert_eq!(Error::from(ErrorKind::DeviceDisconnected).code(), 12);
    }

    #[test]
    fn platform_errors_carry_their_module() {
        let error: Error =
            PlatformError::new(PlatformModule::Bluez, "org.bluez.Error.Failed", 36, "failed")
                .into();
        assert_eq!(error.kind(), ErrorKind::Platform(PlatformModule::Bluez));
        assert_eq!(error.code(), 0x2000_0024);
        assert_eq!(error.get_ref().map(PlatformError::domain), Some("org.bluez.Error.Failed"));
        assert_eq!(error.to_string(), "org.bluez.Error.Failed: failed (36)");
        assert!(error.into_inner().is_some());
    }

    #[test]
    fn simple_errors_have_no_inner() {
        let error = Error::from(ErrorKind::Busy);
        assert!(error.get_ref().is_none());
        assert_eq!(error.to_string(), "busy");
    }
}
