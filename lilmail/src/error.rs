/*
 * lilmail - error module
 *
 * Copyright 2017 Manos Pitsidianakis
 *
 * This file is part of lilmail.
 *
 * lilmail is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * lilmail is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with lilmail. If not, see <http://www.gnu.org/licenses/>.
 */

//! An error object for `lilmail`.
//!
//! Every failure the engine can report carries an [`ErrorKind`] so that the
//! presentation layer can tell a rejected password from an unreachable host
//! or a missing message without parsing strings.

use std::{borrow::Cow, fmt, io, result, str, string, sync::Arc};

pub mod network;
pub use network::NetworkErrorKind;

pub type Result<T> = result::Result<T, Error>;

/// Sub-kinds of server-reported protocol failures.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProtocolErrorKind {
    /// Tagged `NO` or `BAD` completion.
    #[default]
    ServerResponse,
    /// The server sent data we could not make sense of.
    Parse,
    /// `BYE` or end of stream.
    Disconnected,
    /// A move copied the message to its target but the source copy could not
    /// be flagged or purged. The message now exists in both folders.
    MovePurgeFailed,
}

impl ProtocolErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ServerResponse => "Server replied with an error",
            Self::Parse => "Could not parse server response",
            Self::Disconnected => "Server closed the connection",
            Self::MovePurgeFailed => "Message was copied but not removed from its source folder",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorKind {
    #[default]
    None,
    /// Could not reach the server or negotiate TLS.
    Network(NetworkErrorKind),
    /// Credentials were rejected.
    Authentication,
    /// Operation attempted on a session that is not authenticated.
    NotConnected,
    NotFound,
    /// Disallowed operation, such as mutating a reserved folder.
    Validation,
    /// A single message could not be decoded.
    Decode,
    Protocol(ProtocolErrorKind),
    Configuration,
    Bug,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{}",
            match self {
                Self::None => "None",
                Self::Network(inner) => inner.as_str(),
                Self::Authentication => "Authentication",
                Self::NotConnected => "Not connected",
                Self::NotFound => "Not found",
                Self::Validation => "Invalid operation",
                Self::Decode => "Decoding error",
                Self::Protocol(inner) => inner.as_str(),
                Self::Configuration => "Configuration",
                Self::Bug => "Bug, please report this!",
            }
        )
    }
}

macro_rules! is_variant {
    ($n:ident, $($var:tt)+) => {
        #[inline]
        pub fn $n(&self) -> bool {
            matches!(self, Self::$($var)*)
        }
    };
}

impl ErrorKind {
    is_variant! { is_authentication, Authentication }
    is_variant! { is_bug, Bug }
    is_variant! { is_configuration, Configuration }
    is_variant! { is_decode, Decode }
    is_variant! { is_network, Network(_) }
    is_variant! { is_not_connected, NotConnected }
    is_variant! { is_not_found, NotFound }
    is_variant! { is_protocol, Protocol(_) }
    is_variant! { is_validation, Validation }

    /// Whether a caller may retry after a backoff. The engine never retries
    /// by itself.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.is_network()
    }

    /// Expected failures that leave the session usable.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound | Self::Validation | Self::Decode)
    }

    /// Failures after which the connection cannot be trusted anymore.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        match self {
            Self::Network(inner) => inner.is_disconnected(),
            Self::Protocol(ProtocolErrorKind::Disconnected) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    pub summary: Cow<'static, str>,
    pub details: Option<Cow<'static, str>>,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    pub kind: ErrorKind,
}

pub trait IntoError {
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_details<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_kind(self, kind: ErrorKind) -> Error;
}

pub trait ResultIntoError<T> {
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_details<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<I: Into<Error>> IntoError for I {
    #[inline]
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_summary(msg)
    }

    #[inline]
    fn set_err_details<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_details(msg)
    }

    #[inline]
    fn set_err_kind(self, kind: ErrorKind) -> Error {
        let err: Error = self.into();
        err.set_kind(kind)
    }
}

impl<T, I: Into<Error>> ResultIntoError<T> for result::Result<T, I> {
    #[inline]
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_summary(msg_fn()))
    }

    #[inline]
    fn chain_err_details<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_details(msg_fn()))
    }

    #[inline]
    fn chain_err_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|err| err.set_err_kind(kind))
    }
}

impl Error {
    pub fn new<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self {
            summary: msg.into(),
            details: None,
            source: None,
            kind: ErrorKind::None,
        }
    }

    pub fn set_details<M>(mut self, details: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        if let Some(old_details) = self.details.as_ref() {
            self.details = Some(format!("{}. {}", old_details, details.into()).into());
        } else {
            self.details = Some(details.into());
        }
        self
    }

    pub fn set_summary<M>(mut self, summary: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        let old_summary = std::mem::replace(&mut self.summary, summary.into());
        if !old_summary.is_empty() {
            self = self.set_details(old_summary);
        }
        self
    }

    pub fn set_source(
        mut self,
        new_val: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = new_val;
        self
    }

    pub fn set_kind(mut self, new_val: ErrorKind) -> Self {
        self.kind = new_val;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.summary)?;
        if let Some(details) = self.details.as_ref() {
            if !details.trim().is_empty() {
                writeln!(f, "{}", details)?;
            }
        }
        if let Some(source) = self.source.as_ref() {
            writeln!(f, "Caused by: {}", source)?;
        }
        if self.kind != ErrorKind::None {
            write!(f, "Error kind: {}", self.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| &(*(*s)) as &(dyn std::error::Error + 'static))
    }
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable => Self::Network(NetworkErrorKind::ConnectionFailed),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                Self::Network(NetworkErrorKind::Timeout)
            }
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => {
                Self::Protocol(ProtocolErrorKind::Disconnected)
            }
            io::ErrorKind::InvalidData => Self::Protocol(ProtocolErrorKind::Parse),
            _ => Self::Network(NetworkErrorKind::Io),
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        let s = err.to_string();
        Self::new(s)
            .set_kind(err.kind().into())
            .set_source(Some(Arc::new(err)))
    }
}

impl From<string::FromUtf8Error> for Error {
    #[inline]
    fn from(err: string::FromUtf8Error) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Decode)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<str::Utf8Error> for Error {
    #[inline]
    fn from(err: str::Utf8Error) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Decode)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<std::num::ParseIntError> for Error {
    #[inline]
    fn from(err: std::num::ParseIntError) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Protocol(ProtocolErrorKind::Parse))
            .set_source(Some(Arc::new(err)))
    }
}

impl From<data_encoding::DecodeError> for Error {
    #[inline]
    fn from(err: data_encoding::DecodeError) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Decode)
            .set_source(Some(Arc::new(err)))
    }
}

impl From<serde_json::error::Error> for Error {
    #[inline]
    fn from(err: serde_json::error::Error) -> Self {
        Self::new(err.to_string()).set_source(Some(Arc::new(err)))
    }
}

impl From<serde_path_to_error::Error<toml::de::Error>> for Error {
    #[inline]
    fn from(err: serde_path_to_error::Error<toml::de::Error>) -> Self {
        Self::new(format!("Configuration error at `{}`", err.path()))
            .set_details(err.inner().to_string())
            .set_kind(ErrorKind::Configuration)
            .set_source(Some(Arc::new(err.into_inner())))
    }
}

#[cfg(feature = "tls")]
impl From<native_tls::Error> for Error {
    #[inline]
    fn from(err: native_tls::Error) -> Self {
        Self::new(err.to_string())
            .set_kind(ErrorKind::Network(NetworkErrorKind::TLSConnectionFailed))
            .set_source(Some(Arc::new(err)))
    }
}

#[cfg(feature = "tls")]
impl From<native_tls::HandshakeError<std::net::TcpStream>> for Error {
    #[inline]
    fn from(err: native_tls::HandshakeError<std::net::TcpStream>) -> Self {
        Self::new(err.to_string()).set_kind(ErrorKind::Network(NetworkErrorKind::TLSConnectionFailed))
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(kind: &str) -> Self {
        Self::new(kind.to_string())
    }
}

impl From<String> for Error {
    #[inline]
    fn from(kind: String) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(err.kind, ErrorKind::Network(NetworkErrorKind::Timeout));
        assert!(err.kind.is_retryable());
        assert!(!err.kind.is_recoverable());

        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(err.kind.is_disconnected());

        assert!(ErrorKind::NotFound.is_recoverable());
        assert!(ErrorKind::Validation.is_recoverable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert_ne!(
            ErrorKind::Protocol(ProtocolErrorKind::MovePurgeFailed),
            ErrorKind::Protocol(ProtocolErrorKind::ServerResponse)
        );
    }

    #[test]
    fn test_error_chaining() {
        let res: Result<()> = Err(Error::new("inner"));
        let err = res
            .chain_err_summary(|| "outer")
            .chain_err_kind(ErrorKind::NotFound)
            .unwrap_err();
        assert_eq!(err.summary, "outer");
        assert_eq!(err.details.as_deref(), Some("inner"));
        assert_eq!(err.kind, ErrorKind::NotFound);
        let display = err.to_string();
        assert!(display.contains("outer"));
        assert!(display.contains("Not found"));
    }
}
