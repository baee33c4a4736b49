// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types shared by every operation in this crate.
//!
//! Failures are reported through a flat [`ErrorCode`] plus a human-readable detail string
//! (interface name, errno text or address). Every [`Error`] that gets constructed also
//! overwrites a process-wide "last error" slot, readable via [`last_error_message()`], for
//! callers that only keep the code around.

use std::fmt;
use std::io;
use std::sync::Mutex;

use thiserror::Error;

static LAST_ERROR: Mutex<String> = Mutex::new(String::new());

/// Returns the detail text of the most recent failure reported by this crate.
///
/// The slot is process-wide and overwritten by every failing operation. It is safe to read from
/// any thread, but when several threads fail concurrently the message may belong to any one of
/// them. Prefer the [`Error`] returned from the failing call.
pub fn last_error_message() -> String {
    LAST_ERROR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn record_last_error(detail: &str) {
    let mut slot = LAST_ERROR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.clear();
    slot.push_str(detail);
}

/// The category of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// Creating, sending on or receiving from a socket failed.
    Socket,
    /// Address/service name resolution failed.
    GetAddrInfo,
    /// Setting a generic socket option (e.g. `IPV6_RECVPKTINFO`) failed.
    SocketOption,
    /// Binding the socket to a network interface (`SO_BINDTODEVICE`) failed.
    BindToInterface,
    /// Enabling `SO_REUSEADDR` failed.
    ReuseAddr,
    /// Joining an IPv6 multicast group failed.
    MulticastJoin,
    /// Binding the socket to its local address failed.
    Bind,
    /// The named interface does not exist.
    UnknownInterface,
    /// The operation is not supported on this platform.
    NotImplemented,
    /// Any other failure, including rejections reported by the kernel.
    Unspecified,
}

impl ErrorCode {
    /// The numeric value used for this code by C-style callers (always negative).
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::Unspecified => -1,
            ErrorCode::Socket => -2,
            ErrorCode::GetAddrInfo => -3,
            ErrorCode::SocketOption => -4,
            ErrorCode::BindToInterface => -5,
            ErrorCode::ReuseAddr => -6,
            ErrorCode::MulticastJoin => -7,
            ErrorCode::Bind => -8,
            ErrorCode::UnknownInterface => -9,
            ErrorCode::NotImplemented => -10,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCode::Socket => "socket error",
            ErrorCode::GetAddrInfo => "address resolution error",
            ErrorCode::SocketOption => "socket option error",
            ErrorCode::BindToInterface => "bind to interface error",
            ErrorCode::ReuseAddr => "address reuse error",
            ErrorCode::MulticastJoin => "multicast join error",
            ErrorCode::Bind => "bind error",
            ErrorCode::UnknownInterface => "unknown interface",
            ErrorCode::NotImplemented => "not implemented",
            ErrorCode::Unspecified => "unspecified error",
        })
    }
}

/// A failed operation: an [`ErrorCode`] together with a descriptive detail message and, where
/// one exists, the underlying OS error.
#[derive(Debug, Error)]
#[error("{code}: {detail}")]
pub struct Error {
    code: ErrorCode,
    detail: String,
    #[source]
    source: Option<io::Error>,
}

impl Error {
    /// Creates a new error with no underlying OS error.
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self::build(code, detail.into(), None)
    }

    /// Creates a new error from the calling thread's current `errno`.
    ///
    /// The errno text is appended to `detail`.
    pub fn os(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self::from_io(code, detail, io::Error::last_os_error())
    }

    /// Creates a new error from an explicit errno value (e.g. one returned by the kernel in a
    /// netlink error message).
    pub fn from_errno(code: ErrorCode, detail: impl Into<String>, errno: i32) -> Self {
        Self::from_io(code, detail, io::Error::from_raw_os_error(errno))
    }

    /// Creates a new error wrapping an [`io::Error`]; its text is appended to `detail`.
    pub fn from_io(code: ErrorCode, detail: impl Into<String>, err: io::Error) -> Self {
        let detail = format!("{}: {}", detail.into(), err);
        Self::build(code, detail, Some(err))
    }

    fn build(code: ErrorCode, detail: String, source: Option<io::Error>) -> Self {
        tracing::debug!(%code, %detail, "ifconf6 operation failed");
        record_last_error(&detail);
        Self {
            code,
            detail,
            source,
        }
    }

    /// The category of failure.
    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable detail message.
    #[inline]
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The raw OS error number, if the failure originated from a system call or the kernel.
    #[inline]
    pub fn os_error(&self) -> Option<i32> {
        self.source.as_ref().and_then(|e| e.raw_os_error())
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        let kind = match (&value.source, value.code) {
            (Some(e), _) => e.kind(),
            (None, ErrorCode::UnknownInterface) => io::ErrorKind::NotFound,
            (None, ErrorCode::NotImplemented) => io::ErrorKind::Unsupported,
            (None, _) => io::ErrorKind::Other,
        };
        io::Error::new(kind, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_includes_code_and_detail() {
        let err = Error::new(ErrorCode::UnknownInterface, "Cannot find device: eth9");
        assert_eq!(err.to_string(), "unknown interface: Cannot find device: eth9");
        assert_eq!(err.code(), ErrorCode::UnknownInterface);
        assert!(err.os_error().is_none());
        assert!(err.source().is_none());
    }

    #[test]
    fn errno_is_preserved() {
        let err = Error::from_errno(ErrorCode::Unspecified, "netlink request failed", libc::EEXIST);
        assert_eq!(err.os_error(), Some(libc::EEXIST));
        assert!(err.detail().starts_with("netlink request failed: "));
        assert!(err.source().is_some());

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn last_error_tracks_latest_failure() {
        let err = Error::new(ErrorCode::Bind, "last-error-probe-8c41");
        // Other tests may overwrite the slot concurrently; only check when undisturbed.
        let msg = last_error_message();
        if msg.contains("last-error-probe") {
            assert_eq!(msg, err.detail());
        }
    }

    #[test]
    fn numeric_codes_are_distinct() {
        let codes = [
            ErrorCode::Socket,
            ErrorCode::GetAddrInfo,
            ErrorCode::SocketOption,
            ErrorCode::BindToInterface,
            ErrorCode::ReuseAddr,
            ErrorCode::MulticastJoin,
            ErrorCode::Bind,
            ErrorCode::UnknownInterface,
            ErrorCode::NotImplemented,
            ErrorCode::Unspecified,
        ];
        for (i, a) in codes.iter().enumerate() {
            assert!(a.code() < 0);
            for b in &codes[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }
}
