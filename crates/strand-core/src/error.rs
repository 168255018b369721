//! Runtime error type.
//!
//! One enum covers every failure class the runtime reports. Variants carry
//! the raw `errno` where the kernel produced one so callers can match on
//! specific OS errors without string inspection.

use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// io_uring setup failed during worker construction.
    RingSetup(i32),
    /// io_uring submission failed; the operation was never in flight.
    Submit(i32),
    /// OS error with errno, from a socket call or a completed operation.
    Os(i32),
    /// Malformed IP address string.
    BadAddress,
}

impl Error {
    /// Capture the calling thread's `errno` as an [`Error::Os`].
    #[inline]
    pub fn last_os() -> Self {
        Self::Os(io::Error::last_os_error().raw_os_error().unwrap_or(-1))
    }

    /// The raw errno carried by this error, if any.
    #[inline]
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::RingSetup(e) | Self::Submit(e) | Self::Os(e) => Some(*e),
            Self::BadAddress => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RingSetup(e) => write!(f, "io_uring setup: errno {}", e),
            Self::Submit(e) => write!(f, "io_uring submit: errno {}", e),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
            Self::BadAddress => write!(f, "malformed IP address"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err.os_code() {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(io::ErrorKind::InvalidInput, err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_code_roundtrip() {
        assert_eq!(Error::Os(libc::ECONNRESET).os_code(), Some(libc::ECONNRESET));
        assert_eq!(Error::Submit(libc::EBUSY).os_code(), Some(libc::EBUSY));
        assert_eq!(Error::BadAddress.os_code(), None);
    }

    #[test]
    fn io_error_conversion() {
        let err: io::Error = Error::Os(libc::ECONNREFUSED).into();
        assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));

        let err: io::Error = Error::BadAddress.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn display_carries_errno() {
        let s = format!("{}", Error::RingSetup(libc::ENOMEM));
        assert!(s.contains(&libc::ENOMEM.to_string()), "unexpected: {}", s);
    }
}
