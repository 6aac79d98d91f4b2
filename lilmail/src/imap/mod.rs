/*
 * lilmail - imap module.
 *
 * Copyright 2019 Manos Pitsidianakis
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

//! A blocking IMAP4rev1 session over one connection.
//!
//! [`ImapSession`] moves from [`SessionState::Unauthenticated`] to
//! [`SessionState::Authenticated`] on a successful login and ends in
//! [`SessionState::Closed`] after [`ImapSession::close`] or after the
//! connection is lost. Every data operation selects its folder again, so
//! message counts are always fresh.
//!
//! Message identifiers handed out and accepted by this module are UIDs in
//! decimal string form.

#[macro_use]
mod connection;
pub use connection::{Capabilities, ImapStream, MailboxSelection};
pub mod fetch;
pub mod protocol_parser;

use std::{borrow::Cow, convert::TryFrom};

use fetch::{fetch_decoded, skip_undecodable, FETCH_ITEMS};
use protocol_parser::{quote, ImapResponse, SelectResponse};

use crate::{
    conf::ImapServerConf,
    email::{Attachment, Flag, Message},
    error::{Error, ErrorKind, ProtocolErrorKind, Result},
    pagination::{FolderPage, PageSpec},
    search::{self, SearchQuery},
    thread::{build_threads, Thread},
};

pub type UID = u32;

/// Folders that can be neither deleted nor renamed. `INBOX` is matched
/// case-insensitively, the rest exactly.
pub const RESERVED_FOLDERS: &[&str] = &["INBOX", "Sent", "Drafts", "Trash", "Spam"];

pub fn is_reserved_folder(name: &str) -> bool {
    name.eq_ignore_ascii_case("INBOX") || RESERVED_FOLDERS.contains(&name)
}

bitflags::bitflags! {
    /// Name attributes of a `LIST` response, including the special-use ones.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
    pub struct FolderAttributes: u16 {
        const NOSELECT        = 1;
        const HAS_CHILDREN    = 1 << 1;
        const HAS_NO_CHILDREN = 1 << 2;
        const MARKED          = 1 << 3;
        const UNMARKED        = 1 << 4;
        const NOINFERIORS     = 1 << 5;
        const SENT            = 1 << 6;
        const DRAFTS          = 1 << 7;
        const TRASH           = 1 << 8;
        const JUNK            = 1 << 9;
        const ARCHIVE         = 1 << 10;
        const ALL             = 1 << 11;
        const FLAGGED         = 1 << 12;
    }
}

impl FolderAttributes {
    /// Map one attribute such as `\HasNoChildren`. Unknown attributes map to
    /// the empty set.
    pub fn from_attribute(name: &[u8]) -> Self {
        const NAMES: &[(&[u8], FolderAttributes)] = &[
            (b"\\Noselect", FolderAttributes::NOSELECT),
            (b"\\NonExistent", FolderAttributes::NOSELECT),
            (b"\\HasChildren", FolderAttributes::HAS_CHILDREN),
            (b"\\HasNoChildren", FolderAttributes::HAS_NO_CHILDREN),
            (b"\\Marked", FolderAttributes::MARKED),
            (b"\\Unmarked", FolderAttributes::UNMARKED),
            (b"\\Noinferiors", FolderAttributes::NOINFERIORS),
            (b"\\Sent", FolderAttributes::SENT),
            (b"\\Drafts", FolderAttributes::DRAFTS),
            (b"\\Trash", FolderAttributes::TRASH),
            (b"\\Junk", FolderAttributes::JUNK),
            (b"\\Archive", FolderAttributes::ARCHIVE),
            (b"\\All", FolderAttributes::ALL),
            (b"\\Flagged", FolderAttributes::FLAGGED),
        ];
        NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, a)| *a)
            .unwrap_or_default()
    }
}

/// One entry of a folder listing.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FolderInfo {
    pub name: String,
    pub delimiter: Option<char>,
    pub attributes: FolderAttributes,
}

impl FolderInfo {
    pub fn is_selectable(&self) -> bool {
        !self.attributes.contains(FolderAttributes::NOSELECT)
    }
}

/// What `SELECT`/`EXAMINE` reported about a folder.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FolderStatus {
    pub name: String,
    /// Number of messages.
    pub exists: usize,
    pub recent: usize,
    /// Sequence number of the first unseen message, if the server said.
    pub first_unseen: Option<usize>,
    pub uidvalidity: UID,
    pub uidnext: UID,
    pub read_only: bool,
    pub permanent_flags: Flag,
    pub can_create_keywords: bool,
}

impl FolderStatus {
    fn new(name: &str, r: SelectResponse) -> Self {
        Self {
            name: name.to_string(),
            exists: r.exists,
            recent: r.recent,
            first_unseen: r.first_unseen,
            uidvalidity: r.uidvalidity,
            uidnext: r.uidnext,
            read_only: r.read_only,
            permanent_flags: r.permanentflags.0,
            can_create_keywords: r.can_create_flags,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated,
    Closed,
}

fn not_connected(state: SessionState) -> Error {
    Error::new(format!("IMAP session is not connected ({:?}).", state))
        .set_kind(ErrorKind::NotConnected)
}

fn message_not_found(folder: &str, id: &str) -> Error {
    Error::new(format!("Message `{}` not found in folder `{}`.", id, folder))
        .set_kind(ErrorKind::NotFound)
}

fn validate_folder_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::new("Folder name must not be empty.").set_kind(ErrorKind::Validation));
    }
    Ok(())
}

fn validate_not_reserved(name: &str, action: &str) -> Result<()> {
    if is_reserved_folder(name) {
        return Err(
            Error::new(format!("Cannot {} reserved folder `{}`.", action, name))
                .set_kind(ErrorKind::Validation),
        );
    }
    Ok(())
}

/// A positive decimal UID. Anything else cannot resolve to a message.
fn parse_uid(folder: &str, id: &str) -> Result<UID> {
    id.trim()
        .parse::<UID>()
        .ok()
        .filter(|uid| *uid > 0)
        .ok_or_else(|| message_not_found(folder, id))
}

fn ensure_uid(stream: &mut ImapStream, folder: &str, uid: UID, ret: &mut Vec<u8>) -> Result<()> {
    if !stream.uid_exists(uid, ret)? {
        return Err(message_not_found(folder, &uid.to_string()));
    }
    Ok(())
}

fn store_flags(
    stream: &mut ImapStream,
    uid: UID,
    flags: Flag,
    present: bool,
    ret: &mut Vec<u8>,
) -> Result<()> {
    let names = flags
        .iter()
        .map(|f| f.imap_name())
        .collect::<Vec<&str>>()
        .join(" ");
    stream.send_command(
        format!(
            "UID STORE {} {}FLAGS.SILENT ({})",
            uid,
            if present { "+" } else { "-" },
            names
        )
        .as_bytes(),
    )?;
    stream.read_response(ret)
}

/// Flag `uid` deleted and purge it from the selected folder.
fn purge(stream: &mut ImapStream, uid: UID, ret: &mut Vec<u8>) -> Result<()> {
    store_flags(stream, uid, Flag::TRASHED, true, ret)?;
    stream.expunge(uid, ret)
}

/// Messages newest first.
fn newest_first(mut messages: Vec<(usize, Message)>) -> Vec<Message> {
    messages.sort_by(|a, b| b.0.cmp(&a.0));
    messages.into_iter().map(|(_, m)| m).collect()
}

#[derive(Debug)]
pub struct ImapSession {
    pub server_conf: ImapServerConf,
    state: SessionState,
    stream: Option<ImapStream>,
}

impl ImapSession {
    /// An unauthenticated session. Call [`ImapSession::connect`] to log in.
    pub fn new(server_conf: ImapServerConf) -> Self {
        Self {
            server_conf,
            state: SessionState::Unauthenticated,
            stream: None,
        }
    }

    /// Connect and log in.
    pub fn open(server_conf: ImapServerConf) -> Result<Self> {
        server_conf.validate()?;
        let mut ret = Self::new(server_conf);
        ret.connect()?;
        Ok(ret)
    }

    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Authenticated => return Ok(()),
            SessionState::Closed => return Err(not_connected(self.state)),
            SessionState::Unauthenticated => {}
        }
        let id = Cow::Owned(format!("[{}]", self.server_conf.server_hostname));
        let stream = ImapStream::new_connection(&self.server_conf, id)?;
        self.stream = Some(stream);
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Log out and drop the connection. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.logout() {
                imap_log!(debug, stream, "LOGOUT failed: {}", err);
            }
        }
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Capabilities the server advertised after login.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.stream.as_ref().map(|s| &s.capabilities)
    }

    /// The connection is unusable after a dropped socket.
    fn fail(&mut self, err: &Error) {
        if err.kind.is_disconnected() || err.kind.is_network() {
            log::debug!("IMAP session closed after error: {}", err);
            self.stream = None;
            self.state = SessionState::Closed;
        }
    }

    /// Run one exchange on the authenticated connection.
    fn run<T>(&mut self, f: impl FnOnce(&mut ImapStream) -> Result<T>) -> Result<T> {
        let stream = match (self.state, self.stream.as_mut()) {
            (SessionState::Authenticated, Some(stream)) => stream,
            _ => return Err(not_connected(self.state)),
        };
        let result = f(stream);
        if let Err(ref err) = result {
            self.fail(err);
        }
        result
    }

    /// Lazily list every folder. The iterator reads one `LIST` line per
    /// item and must be dropped before the session is used again.
    pub fn list_folders(&mut self) -> Result<FolderIter<'_>> {
        self.run(|stream| stream.send_command(br#"LIST "" "*""#))?;
        Ok(FolderIter {
            session: self,
            done: false,
        })
    }

    pub fn select_folder(&mut self, name: &str, read_only: bool) -> Result<FolderStatus> {
        validate_folder_name(name)?;
        self.run(|stream| {
            let mut ret = Vec::with_capacity(1024);
            let r = stream.select_mailbox(name, read_only, &mut ret)?;
            Ok(FolderStatus::new(name, r))
        })
    }

    /// One page of `folder`, newest messages on page 1. Messages that fail
    /// to decode are left out.
    pub fn fetch_page(&mut self, folder: &str, page: usize, page_size: usize) -> Result<FolderPage> {
        PageSpec::new(page, page_size, 0)?;
        validate_folder_name(folder)?;
        let capacity = self.server_conf.fetch_channel_capacity;
        self.run(|stream| {
            let mut ret = Vec::with_capacity(1024);
            let status = stream.select_mailbox(folder, true, &mut ret)?;
            let spec = PageSpec::new(page, page_size, status.exists)?;
            let Some(range) = spec.sequence_range() else {
                return Ok(spec.into_page(vec![]));
            };
            let fetched = fetch_decoded(
                stream,
                &format!("FETCH {}:{} {}", range.start(), range.end(), FETCH_ITEMS),
                capacity,
            )?;
            Ok(spec.into_page(newest_first(skip_undecodable(fetched))))
        })
    }

    /// A decode failure is returned, unlike the batch operations.
    pub fn fetch_by_id(&mut self, folder: &str, id: &str) -> Result<Message> {
        validate_folder_name(folder)?;
        let capacity = self.server_conf.fetch_channel_capacity;
        self.run(|stream| {
            let uid = parse_uid(folder, id)?;
            let mut ret = Vec::with_capacity(1024);
            stream.select_mailbox(folder, true, &mut ret)?;
            let fetched = fetch_decoded(
                stream,
                &format!("UID FETCH {} {}", uid, FETCH_ITEMS),
                capacity,
            )?;
            fetched
                .into_iter()
                .next()
                .map(|f| f.message)
                .unwrap_or_else(|| Err(message_not_found(folder, id)))
        })
    }

    /// Fetch several messages in one round trip. Identifiers that do not
    /// resolve and messages that fail to decode are left out. The result
    /// order is the server's.
    pub fn fetch_batch<S: AsRef<str>>(&mut self, folder: &str, ids: &[S]) -> Result<Vec<Message>> {
        validate_folder_name(folder)?;
        let capacity = self.server_conf.fetch_channel_capacity;
        self.run(|stream| {
            let mut uids = Vec::with_capacity(ids.len());
            for id in ids {
                match parse_uid(folder, id.as_ref()) {
                    Ok(uid) if !uids.contains(&uid) => uids.push(uid),
                    Ok(_) => {}
                    Err(err) => log::debug!("fetch_batch: {}", err),
                }
            }
            if uids.is_empty() {
                return Ok(vec![]);
            }
            let mut ret = Vec::with_capacity(1024);
            stream.select_mailbox(folder, true, &mut ret)?;
            let set = uids
                .iter()
                .map(UID::to_string)
                .collect::<Vec<String>>()
                .join(",");
            let fetched = fetch_decoded(
                stream,
                &format!("UID FETCH {} {}", set, FETCH_ITEMS),
                capacity,
            )?;
            Ok(skip_undecodable(fetched)
                .into_iter()
                .map(|(_, m)| m)
                .collect())
        })
    }

    /// Up to `limit` of the most recent messages, newest first.
    pub fn fetch_recent(&mut self, folder: &str, limit: usize) -> Result<Vec<Message>> {
        validate_folder_name(folder)?;
        let capacity = self.server_conf.fetch_channel_capacity;
        self.run(|stream| {
            let mut ret = Vec::with_capacity(1024);
            let status = stream.select_mailbox(folder, true, &mut ret)?;
            if status.exists == 0 || limit == 0 {
                return Ok(vec![]);
            }
            let start = status.exists.saturating_sub(limit) + 1;
            let fetched = fetch_decoded(
                stream,
                &format!("FETCH {}:{} {}", start, status.exists, FETCH_ITEMS),
                capacity,
            )?;
            Ok(newest_first(skip_undecodable(fetched)))
        })
    }

    /// The attachment at `index` in the order [`Message::attachments`] lists
    /// them.
    pub fn fetch_attachment(&mut self, folder: &str, id: &str, index: usize) -> Result<Attachment> {
        let message = self.fetch_by_id(folder, id)?;
        message.attachments.into_iter().nth(index).ok_or_else(|| {
            Error::new(format!(
                "Message `{}` in folder `{}` has no attachment #{}.",
                id, folder, index
            ))
            .set_kind(ErrorKind::NotFound)
        })
    }

    /// Thread the `limit` most recent messages of `folder`.
    pub fn fetch_threads(&mut self, folder: &str, limit: usize) -> Result<Vec<Thread>> {
        let messages = self.fetch_recent(folder, limit)?;
        Ok(build_threads(messages))
    }

    /// Filter the `limit` most recent messages of `folder`, newest first.
    /// Page the result with [`search::paginate`].
    pub fn search(&mut self, folder: &str, query: &SearchQuery, limit: usize) -> Result<Vec<Message>> {
        let messages = self.fetch_recent(folder, limit)?;
        Ok(search::filter(messages, query))
    }

    /// Add (`present`) or remove every flag in `flag`.
    pub fn set_flag(&mut self, folder: &str, id: &str, flag: Flag, present: bool) -> Result<()> {
        if flag.is_empty() {
            return Err(Error::new("No flag given.").set_kind(ErrorKind::Validation));
        }
        validate_folder_name(folder)?;
        self.run(|stream| {
            let uid = parse_uid(folder, id)?;
            let mut ret = Vec::with_capacity(1024);
            stream.select_mailbox(folder, false, &mut ret)?;
            ensure_uid(stream, folder, uid, &mut ret)?;
            store_flags(stream, uid, flag, present, &mut ret)
        })
    }

    pub fn mark_read(&mut self, folder: &str, id: &str) -> Result<()> {
        self.set_flag(folder, id, Flag::SEEN, true)
    }

    pub fn mark_unread(&mut self, folder: &str, id: &str) -> Result<()> {
        self.set_flag(folder, id, Flag::SEEN, false)
    }

    /// Flag the message deleted and purge it.
    pub fn delete(&mut self, folder: &str, id: &str) -> Result<()> {
        validate_folder_name(folder)?;
        self.run(|stream| {
            let uid = parse_uid(folder, id)?;
            let mut ret = Vec::with_capacity(1024);
            stream.select_mailbox(folder, false, &mut ret)?;
            ensure_uid(stream, folder, uid, &mut ret)?;
            purge(stream, uid, &mut ret)
        })
    }

    /// Copy the message to `target`, then purge it from `folder`.
    ///
    /// The two steps are separate round trips. If the purge fails the
    /// message exists in both folders and the error kind is
    /// [`ProtocolErrorKind::MovePurgeFailed`].
    pub fn move_message(&mut self, folder: &str, target: &str, id: &str) -> Result<()> {
        validate_folder_name(folder)?;
        validate_folder_name(target)?;
        if folder == target {
            return Err(Error::new(format!(
                "Cannot move a message from `{}` to itself.",
                folder
            ))
            .set_kind(ErrorKind::Validation));
        }
        let uid = self.run(|stream| {
            let uid = parse_uid(folder, id)?;
            let mut ret = Vec::with_capacity(1024);
            stream.select_mailbox(folder, false, &mut ret)?;
            ensure_uid(stream, folder, uid, &mut ret)?;
            stream.send_command(format!("UID COPY {} {}", uid, quote(target)).as_bytes())?;
            stream.read_response(&mut ret).map_err(|err| {
                if err.kind.is_not_found() {
                    err.set_summary(format!("Target folder `{}` does not exist.", target))
                } else {
                    err
                }
            })?;
            Ok(uid)
        })?;
        self.run(|stream| {
            let mut ret = Vec::with_capacity(1024);
            purge(stream, uid, &mut ret)
        })
        .map_err(|err| {
            err.set_summary(format!(
                "Message `{}` was copied to `{}` but could not be removed from `{}`.",
                id, target, folder
            ))
            .set_kind(ErrorKind::Protocol(ProtocolErrorKind::MovePurgeFailed))
        })
    }

    pub fn create_folder(&mut self, name: &str) -> Result<()> {
        validate_folder_name(name)?;
        self.simple_command(format!("CREATE {}", quote(name)), || {
            format!("Could not create folder `{}`.", name)
        })
    }

    pub fn delete_folder(&mut self, name: &str) -> Result<()> {
        validate_folder_name(name)?;
        validate_not_reserved(name, "delete")?;
        self.simple_command(format!("DELETE {}", quote(name)), || {
            format!("Could not delete folder `{}`.", name)
        })
    }

    pub fn rename_folder(&mut self, from: &str, to: &str) -> Result<()> {
        validate_folder_name(from)?;
        validate_folder_name(to)?;
        validate_not_reserved(from, "rename")?;
        self.simple_command(format!("RENAME {} {}", quote(from), quote(to)), || {
            format!("Could not rename folder `{}` to `{}`.", from, to)
        })
    }

    fn simple_command(&mut self, command: String, summary: impl FnOnce() -> String) -> Result<()> {
        self.run(|stream| {
            let mut ret = Vec::with_capacity(256);
            // The selected folder may be the one being changed.
            stream.current_mailbox.take();
            stream.send_command(command.as_bytes())?;
            stream.read_response(&mut ret)
        })
        .map_err(|err| {
            if err.kind.is_protocol() && !err.kind.is_disconnected() {
                err.set_summary(summary())
            } else {
                err
            }
        })
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.close();
        }
    }
}

/// Folders of one `LIST` exchange, read as they are iterated. Dropping the
/// iterator early reads the rest of the response.
pub struct FolderIter<'a> {
    session: &'a mut ImapSession,
    done: bool,
}

impl std::fmt::Debug for FolderIter<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct(stringify!(FolderIter))
            .field("done", &self.done)
            .finish()
    }
}

impl Iterator for FolderIter<'_> {
    type Item = Result<FolderInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some(stream) = self.session.stream.as_mut() else {
                self.done = true;
                return None;
            };
            let line = match stream.read_line() {
                Ok(l) => l,
                Err(err) => {
                    self.done = true;
                    self.session.fail(&err);
                    return Some(Err(err));
                }
            };
            if stream.is_completion(&line) {
                self.done = true;
                let result: Result<()> = ImapResponse::try_from(line.as_slice()).and_then(Into::into);
                return result.err().map(Err);
            }
            match protocol_parser::list_mailbox_result(&line) {
                Ok((_, info)) => return Some(Ok(info)),
                Err(err) if line.starts_with(b"* LIST") || line.starts_with(b"* LSUB") => {
                    return Some(Err(Error::from(err)
                        .set_summary("Could not parse LIST response")
                        .set_kind(ErrorKind::Protocol(ProtocolErrorKind::Parse))));
                }
                Err(_) => {
                    imap_log!(
                        trace,
                        stream,
                        "ignoring untagged response during LIST: {}",
                        String::from_utf8_lossy(&line).trim()
                    );
                }
            }
        }
        None
    }
}

impl Drop for FolderIter<'_> {
    fn drop(&mut self) {
        for item in self.by_ref() {
            if let Err(err) = item {
                log::debug!("LIST response: {}", err);
            }
        }
    }
}
