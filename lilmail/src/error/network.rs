//
// lilmail - error module
//
// Copyright 2017 Emmanouil Pitsidianakis <manos@pitsidianak.is>
//
// This file is part of lilmail.
//
// lilmail is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// lilmail is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with lilmail. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error kinds for network related errors.

use super::ErrorKind;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NetworkErrorKind {
    /// Unspecified
    #[default]
    None,
    /// Name lookup of host failed.
    HostLookupFailed,
    /// Connection failed
    ConnectionFailed,
    /// TLS Connection failed
    TLSConnectionFailed,
    /// Invalid TLS connection
    InvalidTLSConnection,
    /// IO Error
    Io,
    /// Protocol violation
    ProtocolViolation,
    /// Connection (not request) timeout.
    Timeout,
}

impl NetworkErrorKind {
    pub const fn as_str(&self) -> &'static str {
        use NetworkErrorKind::*;
        match self {
            None => "Unspecified network error",
            HostLookupFailed => "Name lookup of host failed",
            ConnectionFailed => "Connection failed",
            TLSConnectionFailed => "TLS connection failed",
            InvalidTLSConnection => "Invalid TLS connection",
            Io => "IO error",
            ProtocolViolation => "Protocol violation",
            Timeout => "Connection timed out",
        }
    }

    pub const fn is_disconnected(&self) -> bool {
        use NetworkErrorKind::*;
        matches!(
            self,
            ConnectionFailed | TLSConnectionFailed | InvalidTLSConnection | Io | Timeout
        )
    }
}

impl From<NetworkErrorKind> for ErrorKind {
    #[inline]
    fn from(kind: NetworkErrorKind) -> Self {
        Self::Network(kind)
    }
}
