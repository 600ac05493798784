//! Closed error taxonomy shared by the transport and the radio driver
//!
//! Every fallible operation in this crate reports exactly one [`Error`]. The numeric
//! value of each kind is a stable contract with external tooling (bindings, scripts
//! parsing exit codes), so the discriminants below must never be renumbered:
//!
//! | Code | Kind             | Meaning                            |
//! |------|------------------|------------------------------------|
//! | 0    | -                | success                            |
//! | 1    | `Failed`         | generic operation failure          |
//! | 2    | `Assert`         | internal invariant violated        |
//! | 3    | `Null`           | required resource absent           |
//! | 4    | `Invalid`        | argument/config out of range       |
//! | 5    | `NotImplemented` | functionality not implemented      |
//! | 6    | `Timeout`        | deadline elapsed                   |
//! | 7    | `NoResponse`     | chip unresponsive                  |
//! | 8    | `Overflow`       | overflow occurred                  |
//! | 9    | `Underflow`      | underflow occurred                 |
//! | 10   | `Again`          | transient, repeat the request      |
//! | 11   | `Done`           | already done                       |
//! | 12   | `Corrupt`        | payload failed integrity check     |
//! | 13   | `Busy`           | resource is busy                   |
//! | 14   | `NotFound`       | requested resource not found       |
//! | 15   | `Cancelled`      | operation was cancelled            |
//! | 16   | `Empty`          | buffer/response is empty           |
//! | 17   | `NoMemory`       | no memory left                     |
//! | 18   | `OutOfBounds`    | size constraint violated           |
//!
//! Codes outside `0..=18` are not silently folded into one of the known kinds:
//! [`check`] reports them as [`CodeError::Unknown`].

/// Failure kinds reported by the transport and the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Error {
    /// Operation failed (generic error)
    #[error("operation failed")]
    Failed = 1,
    /// Internal invariant violated
    #[error("assertion failed")]
    Assert = 2,
    /// Required resource absent
    #[error("required resource is absent")]
    Null = 3,
    /// Argument or configuration out of range
    #[error("invalid value")]
    Invalid = 4,
    /// Functionality not implemented
    #[error("not implemented")]
    NotImplemented = 5,
    /// Deadline elapsed
    #[error("operation timed out")]
    Timeout = 6,
    /// Chip did not respond as expected
    #[error("no response")]
    NoResponse = 7,
    /// Overflow occurred
    #[error("overflow")]
    Overflow = 8,
    /// Underflow occurred
    #[error("underflow")]
    Underflow = 9,
    /// Transient failure, repeat the request
    #[error("try again")]
    Again = 10,
    /// Already done
    #[error("already done")]
    Done = 11,
    /// Payload failed its integrity check
    #[error("data is corrupt")]
    Corrupt = 12,
    /// Resource is busy
    #[error("resource is busy")]
    Busy = 13,
    /// Requested resource can't be found
    #[error("not found")]
    NotFound = 14,
    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled = 15,
    /// Buffer or response is empty
    #[error("empty")]
    Empty = 16,
    /// No memory left
    #[error("out of memory")]
    NoMemory = 17,
    /// Size constraint violated
    #[error("out of bounds")]
    OutOfBounds = 18,
}

impl Error {
    /// Every kind, in code order.
    pub const ALL: [Error; 18] = [
        Error::Failed,
        Error::Assert,
        Error::Null,
        Error::Invalid,
        Error::NotImplemented,
        Error::Timeout,
        Error::NoResponse,
        Error::Overflow,
        Error::Underflow,
        Error::Again,
        Error::Done,
        Error::Corrupt,
        Error::Busy,
        Error::NotFound,
        Error::Cancelled,
        Error::Empty,
        Error::NoMemory,
        Error::OutOfBounds,
    ];

    /// Returns the stable wire code of this kind (`1..=18`).
    pub const fn code(self) -> i32 {
        self as u8 as i32
    }

    /// Returns true for kinds a caller may reasonably retry.
    pub const fn is_transient(self) -> bool {
        matches!(self, Error::Again | Error::Busy)
    }
}

impl TryFrom<i32> for Error {
    type Error = CodeError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1..=18 => Ok(Error::ALL[(code - 1) as usize]),
            other => Err(CodeError::Unknown(other)),
        }
    }
}

impl From<Error> for i32 {
    fn from(err: Error) -> Self {
        err.code()
    }
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}

/// Outcome of decoding a non-zero wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodeError {
    /// One of the 18 known kinds
    #[error(transparent)]
    Known(#[from] Error),
    /// A code outside the known range
    #[error("invalid error code {0}")]
    Unknown(i32),
}

/// Maps a wire code to a result: `0` is success, `1..=18` a known kind and
/// anything else [`CodeError::Unknown`].
pub fn check(code: i32) -> Result<(), CodeError> {
    match code {
        0 => Ok(()),
        code => Err(Error::try_from(code).map_or_else(|unknown| unknown, CodeError::Known)),
    }
}

/// Maps a result to its wire code, `0` on success.
pub fn status<T>(result: &Result<T, Error>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.code(),
    }
}
