/*
 * lilmail - imap/connection.rs
 *
 * Copyright 2017 - 2019 Manos Pitsidianakis
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

use std::{
    borrow::Cow,
    convert::TryFrom,
    io::{Read, Write},
};

use indexmap::IndexSet;

use crate::{
    conf::ImapServerConf,
    email::parser::BytesExt,
    error::*,
    imap::{
        protocol_parser::{
            self, literal_length, quote, ImapLineSplit, ImapResponse, ResponseCode,
            SelectResponse, CRLF,
        },
        UID,
    },
    utils::connections::{connect as tcp_stream_connect, Connection},
};

macro_rules! imap_log {
    ($fn:ident, $conn:expr, $fmt:literal, $($t:tt)*) => {
        log::$fn!(std::concat!("{} ", $fmt), $conn.id, $($t)*);
    };
    ($fn:ident, $conn:expr, $fmt:literal) => {
        log::$fn!(std::concat!("{} ", $fmt), $conn.id);
    };
}

pub type Capabilities = IndexSet<Box<[u8]>>;

/// What the connection currently has selected.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum MailboxSelection {
    #[default]
    None,
    Select(String),
    Examine(String),
}

impl MailboxSelection {
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn is(&self, folder: &str) -> bool {
        match self {
            Self::Select(name) | Self::Examine(name) => name == folder,
            Self::None => false,
        }
    }
}

fn disconnected(details: &[u8]) -> Error {
    Error::new("Server closed the connection.")
        .set_details(String::from_utf8_lossy(details.trim()).to_string())
        .set_kind(ErrorKind::Protocol(ProtocolErrorKind::Disconnected))
}

/// One authenticated connection. Commands are tagged `M<n>` with `n`
/// increasing for the lifetime of the connection.
#[derive(Debug)]
pub struct ImapStream {
    pub cmd_id: usize,
    pub id: Cow<'static, str>,
    pub stream: Connection,
    pub current_mailbox: MailboxSelection,
    pub capabilities: Capabilities,
    /// Bytes read from the socket but not yet returned as a line.
    buf: Vec<u8>,
    logging_out: bool,
}

impl ImapStream {
    pub fn new_connection(server_conf: &ImapServerConf, id: Cow<'static, str>) -> Result<Self> {
        let path = &server_conf.server_hostname;
        let socket = tcp_stream_connect((path.as_str(), server_conf.server_port), server_conf.timeout)
            .chain_err_summary(|| format!("Could not connect to {}.", path))?;
        socket.set_read_timeout(server_conf.timeout)?;
        socket.set_write_timeout(server_conf.timeout)?;

        let stream = if server_conf.use_tls {
            #[cfg(feature = "tls")]
            {
                Connection::new_tls(socket, path, server_conf.danger_accept_invalid_certs)?
            }
            #[cfg(not(feature = "tls"))]
            {
                return Err(Error::new(format!(
                    "Could not connect to {}: this build has no TLS support.",
                    path
                ))
                .set_kind(ErrorKind::Configuration));
            }
        } else {
            Connection::new_tcp(socket)
        };
        let stream = if cfg!(feature = "imap-trace") {
            stream.trace(true).with_id("imap")
        } else {
            stream
        };

        let mut ret = Self {
            cmd_id: 1,
            id,
            stream,
            current_mailbox: MailboxSelection::None,
            capabilities: Capabilities::default(),
            buf: Vec::with_capacity(Connection::IO_BUF_SIZE),
            logging_out: false,
        };

        let greeting = ret.read_line()?;
        let preauth = match ImapResponse::try_from(greeting.as_slice()) {
            Ok(ImapResponse::Ok(_)) => false,
            Ok(ImapResponse::Preauth(_)) => true,
            Ok(ImapResponse::Bye(_)) => return Err(disconnected(&greeting)),
            _ => {
                return Err(Error::new(format!(
                    "Could not connect to {}: unexpected greeting `{}`",
                    path,
                    String::from_utf8_lossy(greeting.trim())
                ))
                .set_kind(ErrorKind::Protocol(ProtocolErrorKind::Parse)))
            }
        };
        imap_log!(debug, ret, "connected to {}", path);

        ret.capabilities = ret.fetch_capabilities(path)?;
        if !ret.has_capability("IMAP4rev1") {
            return Err(Error::new(format!(
                "Could not connect to {}: server is not IMAP4rev1 compliant",
                path
            ))
            .set_kind(ErrorKind::Protocol(ProtocolErrorKind::ServerResponse)));
        }
        if preauth {
            return Ok(ret);
        }
        if ret.has_capability("LOGINDISABLED") {
            return Err(Error::new(format!(
                "Could not connect to {}: server does not accept LOGIN.",
                path
            ))
            .set_details("The server advertises LOGINDISABLED.")
            .set_kind(ErrorKind::Authentication));
        }

        ret.send_command(
            format!(
                "LOGIN {} {}",
                quote(&server_conf.server_username),
                quote(&server_conf.server_password)
            )
            .as_bytes(),
        )?;
        let mut res = Vec::with_capacity(1024);
        if let Err(err) = ret.read_response(&mut res) {
            if err.kind.is_disconnected() || err.kind.is_network() {
                return Err(err);
            }
            return Err(Error::new(format!("Could not log in to {}.", path))
                .set_details(err.details.unwrap_or(err.summary))
                .set_kind(ErrorKind::Authentication));
        }
        imap_log!(info, ret, "logged in to {}", path);

        let login_capabilities = res
            .split_rn()
            .last()
            .and_then(|l| ImapResponse::try_from(l).ok());
        ret.capabilities = match login_capabilities {
            Some(ImapResponse::Ok(ResponseCode::Capability(caps))) => caps
                .into_iter()
                .map(|c| c.into_bytes().into_boxed_slice())
                .collect(),
            _ => ret.fetch_capabilities(path)?,
        };
        Ok(ret)
    }

    fn fetch_capabilities(&mut self, hostname: &str) -> Result<Capabilities> {
        let mut res = Vec::with_capacity(512);
        self.send_command(b"CAPABILITY")?;
        self.read_response(&mut res)?;
        let line = res
            .split_rn()
            .find(|l| l.starts_with(b"* CAPABILITY"))
            .ok_or_else(|| {
                Error::new(format!(
                    "Could not connect to {}: could not parse CAPABILITY response: `{}`",
                    hostname,
                    String::from_utf8_lossy(&res).trim()
                ))
                .set_details("Response does not start with `* CAPABILITY`.")
                .set_kind(ErrorKind::Protocol(ProtocolErrorKind::Parse))
            })?;
        let (_, caps) = protocol_parser::capabilities(line).map_err(|err| {
            Error::from(err)
                .set_summary(format!(
                    "Could not connect to {}: could not parse CAPABILITY response",
                    hostname
                ))
                .set_kind(ErrorKind::Protocol(ProtocolErrorKind::Parse))
        })?;
        imap_log!(trace, self, "capabilities: {}", String::from_utf8_lossy(line).trim());
        Ok(caps
            .into_iter()
            .map(|c| c.to_vec().into_boxed_slice())
            .collect())
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(cap.as_bytes()))
    }

    fn fill_buf(&mut self) -> Result<()> {
        let mut chunk = [0; 16 * 1024];
        let n = self.stream.read(&mut chunk)?;
        if n == 0 {
            return Err(disconnected(b"Connection closed by peer."));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Read one response line including the CRLF. A line that announces a
    /// literal is returned together with the literal and the rest of the
    /// line after it.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].find(CRLF) {
                let line_end = scanned + pos + CRLF.len();
                if let Some(len) = literal_length(&self.buf[..line_end]) {
                    while self.buf.len() < line_end + len {
                        self.fill_buf()?;
                    }
                    scanned = line_end + len;
                    continue;
                }
                let line: Vec<u8> = self.buf.drain(..line_end).collect();
                if line.starts_with(b"* BYE") && !self.logging_out {
                    imap_log!(debug, self, "server sent BYE: {}", String::from_utf8_lossy(&line).trim());
                    return Err(disconnected(&line));
                }
                return Ok(line);
            }
            scanned = scanned.max(self.buf.len().saturating_sub(1));
            self.fill_buf()?;
        }
    }

    /// Whether `line` is the tagged completion of the last command sent.
    pub fn is_completion(&self, line: &[u8]) -> bool {
        line.strip_prefix(b"M")
            .and_then(|l| l.strip_prefix(self.last_tag().as_bytes()))
            .is_some_and(|l| l.starts_with(b" "))
    }

    fn last_tag(&self) -> String {
        (self.cmd_id - 1).to_string()
    }

    /// Read every line up to and including the tagged completion of the last
    /// command into `ret`. A `NO` or `BAD` completion is an error.
    pub fn read_response(&mut self, ret: &mut Vec<u8>) -> Result<()> {
        ret.clear();
        loop {
            let line = self.read_line()?;
            ret.extend_from_slice(&line);
            if self.is_completion(&line) {
                let response = ImapResponse::try_from(line.as_slice())?;
                imap_log!(trace, self, "M{} completed: {:?}", self.last_tag(), response);
                return response.into();
            }
        }
    }

    pub fn send_command(&mut self, command: &[u8]) -> Result<()> {
        let command = command.trim();
        if command.contains(&b'\r') || command.contains(&b'\n') {
            return Err(Error::new("Command arguments must not contain line breaks.")
                .set_kind(ErrorKind::Validation));
        }
        let mut line = Vec::with_capacity(command.len() + 16);
        line.extend_from_slice(format!("M{} ", self.cmd_id).as_bytes());
        line.extend_from_slice(command);
        line.extend_from_slice(CRLF);
        self.stream.write_all(&line)?;
        self.stream.flush()?;
        if command.starts_with(b"LOGIN") {
            imap_log!(trace, self, "sent: M{} LOGIN ..", self.cmd_id);
        } else {
            imap_log!(trace, self, "sent: M{} {}", self.cmd_id, String::from_utf8_lossy(command));
        }
        self.cmd_id += 1;
        Ok(())
    }

    /// `SELECT` or `EXAMINE` a folder. A `NO` means the folder does not exist.
    pub fn select_mailbox(
        &mut self,
        folder: &str,
        read_only: bool,
        ret: &mut Vec<u8>,
    ) -> Result<SelectResponse> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        self.current_mailbox.take();
        self.send_command(format!("{} {}", verb, quote(folder)).as_bytes())?;
        if let Err(err) = self.read_response(ret) {
            if matches!(
                err.kind,
                ErrorKind::Protocol(ProtocolErrorKind::ServerResponse)
            ) {
                return Err(Error::new(format!("Folder `{}` does not exist.", folder))
                    .set_details(err.details.unwrap_or(err.summary))
                    .set_kind(ErrorKind::NotFound));
            }
            return Err(err);
        }
        imap_log!(
            trace,
            self,
            "{} {} response {}",
            folder,
            verb,
            String::from_utf8_lossy(ret)
        );
        let mut select_response = protocol_parser::select_response(ret).chain_err_summary(|| {
            format!("Could not parse {} response for folder {}", verb, folder)
        })?;
        select_response.read_only |= read_only;
        self.current_mailbox = if read_only {
            MailboxSelection::Examine(folder.to_string())
        } else {
            MailboxSelection::Select(folder.to_string())
        };
        Ok(select_response)
    }

    /// Whether `uid` exists in the selected folder.
    pub fn uid_exists(&mut self, uid: UID, ret: &mut Vec<u8>) -> Result<bool> {
        self.send_command(format!("UID SEARCH UID {}", uid).as_bytes())?;
        self.read_response(ret)?;
        for l in ret.split_rn() {
            if l.starts_with(b"* SEARCH") {
                let (_, uids) = protocol_parser::search_results(l).map_err(|err| {
                    Error::from(err)
                        .set_summary("Could not parse SEARCH response")
                        .set_kind(ErrorKind::Protocol(ProtocolErrorKind::Parse))
                })?;
                return Ok(uids.contains(&uid));
            }
        }
        Ok(false)
    }

    /// Permanently remove `\Deleted` messages. Restricted to `uid` when the
    /// server supports `UIDPLUS`.
    pub fn expunge(&mut self, uid: UID, ret: &mut Vec<u8>) -> Result<()> {
        if self.has_capability("UIDPLUS") {
            self.send_command(format!("UID EXPUNGE {}", uid).as_bytes())?;
        } else {
            self.send_command(b"EXPUNGE")?;
        }
        self.read_response(ret)
    }

    pub fn logout(&mut self) -> Result<()> {
        self.logging_out = true;
        self.current_mailbox.take();
        let mut res = Vec::new();
        self.send_command(b"LOGOUT")?;
        let result = self.read_response(&mut res);
        imap_log!(debug, self, "logged out");
        _ = self.stream.shutdown();
        result
    }
}
