//! Kernel error codes as seen from user space
//!
//! Privileged calls report failure as a small negative integer; user code
//! works with [`Error`] and converts at the boundary.

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unspecified error")]
    Unspecified,
    /// Environment doesn't exist or the caller may not touch it
    #[error("bad environment")]
    BadEnv,
    #[error("invalid parameter")]
    Invalid,
    #[error("out of memory")]
    NoMem,
    /// Environment table is full
    #[error("out of environments")]
    NoFreeEnv,
    #[error("segmentation fault")]
    Fault,
    /// Target isn't blocked in `ipc_recv`
    #[error("env is not recving")]
    IpcNotRecv,
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Negative status code as returned by the kernel
    pub const fn code(self) -> i32 {
        match self {
            Error::Unspecified => -1,
            Error::BadEnv      => -2,
            Error::Invalid     => -3,
            Error::NoMem       => -4,
            Error::NoFreeEnv   => -5,
            Error::Fault       => -6,
            Error::IpcNotRecv  => -7,
        }
    }

    /// Parse a kernel status; `None` for success (>= 0).
    /// Unknown negative codes map to `Unspecified`.
    pub const fn from_code(code: i32) -> Option<Error> {
        if code >= 0 {
            return None;
        }
        Some(match code {
            -2  => Error::BadEnv,
            -3  => Error::Invalid,
            -4  => Error::NoMem,
            -5  => Error::NoFreeEnv,
            -6  => Error::Fault,
            -7  => Error::IpcNotRecv,
            _   => Error::Unspecified,
        })
    }
}
