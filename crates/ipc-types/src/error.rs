//! The closed, negative-valued IPC error set (spec §6, §7).
//!
//! Every fallible entry point in the IPC fabric returns `Result<T, IpcError>`.
//! Mirrors the original `DAS_E_IPC_*` codes, reserved range
//! `-1_080_000_000 + k`, confirmed against
//! `das/Core/IPC/test/IpcErrorsTest.cpp`.

use std::borrow::Cow;
use std::fmt;

/// Base of the IPC error-code reserved range. Individual kinds occupy
/// `IPC_ERROR_BASE - (k + 1)` for their index `k` in [`IpcErrorKind`]'s
/// declaration order, matching the sequential pattern the original test
/// suite checks.
pub const IPC_ERROR_BASE: i32 = -1_080_000_000;

/// The numeric kind of an [`IpcError`], independent of any attached detail
/// string. Declaration order is load-bearing: it fixes each kind's offset
/// from [`IPC_ERROR_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcErrorKind {
    InvalidMessageHeader,
    Timeout,
    InvalidHandle,
    StaleHandle,
    PeerLost,
    SharedMemoryFailure,
    ConnectionClosed,
    Reentrancy,
    OutOfMemory,
    InvalidState,
    ObjectNotFound,
    InvalidString,
    InvalidStringSize,
    InvalidArgument,
}

impl IpcErrorKind {
    /// The stable negative code for this kind, as it appears on the wire in
    /// `MessageHeader::error_code`.
    pub const fn code(self) -> i32 {
        IPC_ERROR_BASE - (self as i32 + 1)
    }

    fn label(self) -> &'static str {
        match self {
            IpcErrorKind::InvalidMessageHeader => "InvalidMessageHeader",
            IpcErrorKind::Timeout => "Timeout",
            IpcErrorKind::InvalidHandle => "InvalidHandle",
            IpcErrorKind::StaleHandle => "StaleHandle",
            IpcErrorKind::PeerLost => "PeerLost",
            IpcErrorKind::SharedMemoryFailure => "SharedMemoryFailure",
            IpcErrorKind::ConnectionClosed => "ConnectionClosed",
            IpcErrorKind::Reentrancy => "Reentrancy",
            IpcErrorKind::OutOfMemory => "OutOfMemory",
            IpcErrorKind::InvalidState => "InvalidState",
            IpcErrorKind::ObjectNotFound => "ObjectNotFound",
            IpcErrorKind::InvalidString => "InvalidString",
            IpcErrorKind::InvalidStringSize => "InvalidStringSize",
            IpcErrorKind::InvalidArgument => "InvalidArgument",
        }
    }
}

/// An IPC failure: a closed [`IpcErrorKind`] plus an optional human-readable
/// detail, attached only at the point the error is first raised (the
/// original's `ErrorAndExplanation`, `das/Utils/include/das/Utils/
/// Expected.h`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    InvalidMessageHeader { detail: Option<Cow<'static, str>> },
    Timeout,
    InvalidHandle,
    StaleHandle,
    PeerLost,
    SharedMemoryFailure { detail: Option<Cow<'static, str>> },
    ConnectionClosed,
    Reentrancy,
    OutOfMemory,
    InvalidState { detail: Option<Cow<'static, str>> },
    ObjectNotFound,
    InvalidString { detail: Cow<'static, str> },
    InvalidStringSize { len: usize },
    InvalidArgument { detail: Cow<'static, str> },
}

impl IpcError {
    pub fn kind(&self) -> IpcErrorKind {
        match self {
            IpcError::InvalidMessageHeader { .. } => IpcErrorKind::InvalidMessageHeader,
            IpcError::Timeout => IpcErrorKind::Timeout,
            IpcError::InvalidHandle => IpcErrorKind::InvalidHandle,
            IpcError::StaleHandle => IpcErrorKind::StaleHandle,
            IpcError::PeerLost => IpcErrorKind::PeerLost,
            IpcError::SharedMemoryFailure { .. } => IpcErrorKind::SharedMemoryFailure,
            IpcError::ConnectionClosed => IpcErrorKind::ConnectionClosed,
            IpcError::Reentrancy => IpcErrorKind::Reentrancy,
            IpcError::OutOfMemory => IpcErrorKind::OutOfMemory,
            IpcError::InvalidState { .. } => IpcErrorKind::InvalidState,
            IpcError::ObjectNotFound => IpcErrorKind::ObjectNotFound,
            IpcError::InvalidString { .. } => IpcErrorKind::InvalidString,
            IpcError::InvalidStringSize { .. } => IpcErrorKind::InvalidStringSize,
            IpcError::InvalidArgument { .. } => IpcErrorKind::InvalidArgument,
        }
    }

    /// The wire-level numeric code, for `MessageHeader::error_code`.
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    pub fn invalid_message_header(detail: impl Into<Cow<'static, str>>) -> Self {
        IpcError::InvalidMessageHeader { detail: Some(detail.into()) }
    }

    pub fn shared_memory_failure(detail: impl Into<Cow<'static, str>>) -> Self {
        IpcError::SharedMemoryFailure { detail: Some(detail.into()) }
    }

    pub fn invalid_state(detail: impl Into<Cow<'static, str>>) -> Self {
        IpcError::InvalidState { detail: Some(detail.into()) }
    }

    pub fn invalid_string(detail: impl Into<Cow<'static, str>>) -> Self {
        IpcError::InvalidString { detail: detail.into() }
    }

    pub fn invalid_string_size(len: usize) -> Self {
        IpcError::InvalidStringSize { len }
    }

    pub fn invalid_argument(detail: impl Into<Cow<'static, str>>) -> Self {
        IpcError::InvalidArgument { detail: detail.into() }
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.kind().label(), self.code())?;
        match self {
            IpcError::InvalidMessageHeader { detail: Some(d) }
            | IpcError::SharedMemoryFailure { detail: Some(d) }
            | IpcError::InvalidState { detail: Some(d) } => write!(f, ": {d}"),
            IpcError::InvalidString { detail } | IpcError::InvalidArgument { detail } => {
                write!(f, ": {detail}")
            }
            IpcError::InvalidStringSize { len } => write!(f, ": length {len} (expected 36)"),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for IpcError {}
