/*
 * lilmail - imap/protocol_parser.rs
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

//! Parsers for server responses. Every parser works on one complete
//! response line, with any literals it announces already read in.

#![allow(clippy::type_complexity)]

use std::{convert::TryFrom, str::FromStr};

use nom::{
    branch::alt,
    bytes::complete::{is_a, is_not, tag, take, take_until, take_while1},
    character::complete::digit1,
    combinator::{map, map_res, opt},
    multi::{length_data, many1, separated_list1},
    sequence::{delimited, preceded},
};

use super::{FolderAttributes, FolderInfo, UID};
use crate::{
    email::{
        parser::{encodings::phrase, BytesExt, IResult},
        Address, Flag, RawEnvelope, RawMessage,
    },
    error::{Error, ErrorKind, ProtocolErrorKind, Result},
};


pub const UNTAGGED_PREFIX: &[u8] = b"* ";
pub const CRLF: &[u8] = b"\r\n";

const WS: &[u8] = b"\r\n\t ";

fn parse_error(msg: String) -> Error {
    Error::new(msg).set_kind(ErrorKind::Protocol(ProtocolErrorKind::Parse))
}

fn lossy_prefix(input: &[u8]) -> String {
    String::from_utf8_lossy(input).chars().take(40).collect()
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseCode {
    /// Human-readable text without a bracketed code.
    Text(String),
    /// `[ALERT]`: text that must be shown to the user.
    Alert(String),
    /// `[CAPABILITY ...]` sent along with a greeting or login completion.
    Capability(Vec<String>),
    /// `[PERMANENTFLAGS (...)]`
    Permanentflags(String),
    /// The folder is selected read-only.
    ReadOnly,
    /// The folder is selected read-write.
    ReadWrite,
    /// A COPY or APPEND failed because the target folder does not exist.
    Trycreate,
    Uidnext(UID),
    Uidvalidity(UID),
    /// Sequence number of the first message without `\Seen`.
    Unseen(usize),
    /// Any other bracketed code, with its text.
    Other { code: String, text: String },
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        use ResponseCode::*;
        match self {
            Text(s) => write!(fmt, "{}", s),
            Alert(s) => write!(fmt, "ALERT: {}", s),
            Capability(caps) => write!(fmt, "Server capabilities: {}", caps.join(" ")),
            Permanentflags(s) => write!(fmt, "Folder supports these flags: {}", s),
            ReadOnly => write!(fmt, "This folder is selected read-only."),
            ReadWrite => write!(fmt, "This folder is selected with read-write permissions."),
            Trycreate => write!(
                fmt,
                "Failed to operate on the target folder because it doesn't exist."
            ),
            Uidnext(uid) => write!(fmt, "Next UID value is {}", uid),
            Uidvalidity(uid) => write!(fmt, "UIDVALIDITY value is {}", uid),
            Unseen(n) => write!(fmt, "First message without the \\Seen flag is {}", n),
            Other { code, text } if text.is_empty() => write!(fmt, "[{}]", code),
            Other { code, text } => write!(fmt, "[{}] {}", code, text),
        }
    }
}

impl ResponseCode {
    fn parse(val: &[u8]) -> Self {
        use ResponseCode::*;
        let val = val.trim();
        let text = |t: &[u8]| String::from_utf8_lossy(t.trim()).to_string();
        if !val.starts_with(b"[") {
            return Text(text(val));
        }
        let Some(end) = val.find(b"]") else {
            return Text(text(val));
        };
        let code = &val[1..end];
        let rest = &val[end + 1..];
        let (name, args) = match code.find(b" ") {
            Some(pos) => (&code[..pos], code[pos + 1..].trim()),
            None => (code, &b""[..]),
        };
        let number = || {
            String::from_utf8_lossy(args)
                .trim()
                .parse::<usize>()
                .unwrap_or(0)
        };
        match name.to_ascii_uppercase().as_slice() {
            b"ALERT" => Alert(text(rest)),
            b"CAPABILITY" => Capability(
                args.split(|&b| b == b' ')
                    .filter(|c| !c.is_empty())
                    .map(text)
                    .collect(),
            ),
            b"PERMANENTFLAGS" => Permanentflags(text(args)),
            b"READ-ONLY" => ReadOnly,
            b"READ-WRITE" => ReadWrite,
            b"TRYCREATE" => Trycreate,
            b"UIDNEXT" => Uidnext(number() as UID),
            b"UIDVALIDITY" => Uidvalidity(number() as UID),
            b"UNSEEN" => Unseen(number()),
            _ => Other {
                code: text(code),
                text: text(rest),
            },
        }
    }
}

/// A status response: tagged completion, greeting or `BYE`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImapResponse {
    Ok(ResponseCode),
    No(ResponseCode),
    Bad(ResponseCode),
    Preauth(ResponseCode),
    Bye(ResponseCode),
}

impl TryFrom<&'_ [u8]> for ImapResponse {
    type Error = Error;

    fn try_from(original_val: &'_ [u8]) -> Result<Self> {
        let unexpected = || {
            parse_error(format!(
                "Expected tagged IMAP response (OK,NO,BAD, etc) but found {:?}",
                String::from_utf8_lossy(original_val)
            ))
        };
        let val: &[u8] = original_val.split_rn().last().unwrap_or(original_val);
        let mut val = val[val.find(b" ").ok_or_else(unexpected)? + 1..].trim();
        // M12 NO [CANNOT] Invalid mailbox name (0.000 + 0.098 + 0.097 secs).
        if val.ends_with(b" secs).") {
            val = val[..val.rfind(b"(").ok_or_else(unexpected)?].trim();
        }
        let after = |word: &[u8]| val.get(word.len()..).unwrap_or_default();

        Ok(if val.starts_with(b"OK") {
            Self::Ok(ResponseCode::parse(after(b"OK")))
        } else if val.starts_with(b"NO") {
            Self::No(ResponseCode::parse(after(b"NO")))
        } else if val.starts_with(b"BAD") {
            Self::Bad(ResponseCode::parse(after(b"BAD")))
        } else if val.starts_with(b"PREAUTH") {
            Self::Preauth(ResponseCode::parse(after(b"PREAUTH")))
        } else if val.starts_with(b"BYE") {
            Self::Bye(ResponseCode::parse(after(b"BYE")))
        } else {
            return Err(unexpected());
        })
    }
}

impl From<ImapResponse> for Result<()> {
    fn from(resp: ImapResponse) -> Self {
        match resp {
            ImapResponse::Ok(_) | ImapResponse::Preauth(_) => Ok(()),
            ImapResponse::No(ResponseCode::Trycreate) => {
                Err(Error::new("Target folder does not exist.").set_kind(ErrorKind::NotFound))
            }
            ImapResponse::No(code) => Err(Error::new("IMAP NO response.")
                .set_details(code.to_string())
                .set_kind(ErrorKind::Protocol(ProtocolErrorKind::ServerResponse))),
            ImapResponse::Bad(code) => Err(Error::new("IMAP BAD response.")
                .set_details(code.to_string())
                .set_kind(ErrorKind::Protocol(ProtocolErrorKind::ServerResponse))),
            ImapResponse::Bye(code) => Err(Error::new("Server closed the connection.")
                .set_details(code.to_string())
                .set_kind(ErrorKind::Protocol(ProtocolErrorKind::Disconnected))),
        }
    }
}

/// Iterator over the lines of a response buffer. A line that announces a
/// literal extends over the literal's bytes.
pub struct ImapLineIterator<'a> {
    slice: &'a [u8],
}

impl<'a> Iterator for ImapLineIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.slice.is_empty() {
            return None;
        }
        let mut i = 0;
        loop {
            let cur_slice = &self.slice[i..];
            if let Some(pos) = cur_slice.find(CRLF) {
                if let Some(len) = literal_length(&cur_slice[..pos + 2]) {
                    i += pos + 2 + len;
                    if i < self.slice.len() {
                        continue;
                    }
                    let ret = self.slice;
                    self.slice = &[];
                    return Some(ret);
                }
                let end = (i + pos + 2).min(self.slice.len());
                let ret = &self.slice[..end];
                self.slice = &self.slice[end..];
                return Some(ret);
            } else {
                let ret = self.slice;
                self.slice = &[];
                return Some(ret);
            }
        }
    }
}

pub trait ImapLineSplit {
    fn split_rn(&self) -> ImapLineIterator;
}

impl ImapLineSplit for [u8] {
    fn split_rn(&self) -> ImapLineIterator {
        ImapLineIterator { slice: self }
    }
}

/// If `line` (ending in CRLF) announces a literal, its length in bytes.
pub fn literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(CRLF)?;
    let line = line.strip_suffix(b"}")?;
    let start = line.rfind(b"{")?;
    std::str::from_utf8(&line[start + 1..]).ok()?.parse().ok()
}

fn number<T: FromStr>(input: &[u8]) -> IResult<&[u8], T> {
    map_res(digit1, |s: &[u8]| {
        std::str::from_utf8(s)
            .map_err(|_| ())
            .and_then(|s| T::from_str(s).map_err(|_| ()))
    })(input)
}

fn sp(input: &[u8]) -> IResult<&[u8], ()> {
    map(opt(is_a(WS)), |_| ())(input)
}

/* Input Example:
 * ==============
 *
 *  "* CAPABILITY IMAP4rev1 LITERAL+ SASL-IR LOGIN-REFERRALS ID ENABLE IDLE
 *  AUTH=PLAIN\r\n"
 *  "M1 OK [CAPABILITY IMAP4rev1 UIDPLUS MOVE] Logged in\r\n"
 */

pub fn capabilities(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    let (input, _) = take_until("CAPABILITY ")(input)?;
    let (input, _) = tag("CAPABILITY ")(input)?;
    let (input, ret) = separated_list1(tag(" "), is_not(" ]\r\n"))(input)?;
    let (input, _) = take_until(CRLF)(input)?;
    let (input, _) = tag(CRLF)(input)?;
    Ok((input, ret))
}

/*
 * * LIST (\HasNoChildren) "." INBOX.Sent
 * * LIST (\HasChildren) "/" "Work/Projects"
 * * LIST (\Noselect) NIL ""
 */

pub fn list_mailbox_result(input: &[u8]) -> IResult<&[u8], FolderInfo> {
    let (input, _) = alt((tag("* LIST ("), tag("* LSUB (")))(input.ltrim())?;
    let (input, properties) = take_until(&b")"[0..])(input)?;
    let (input, _) = tag(b") ")(input)?;
    let (input, delimiter) = alt((
        map(tag("NIL"), |_| None),
        map(
            delimited(
                tag(b"\""),
                alt((preceded(tag(b"\\"), take(1_u32)), take(1_u32))),
                tag(b"\""),
            ),
            |d: &[u8]| Some(d[0] as char),
        ),
    ))(input)?;
    let (input, _) = tag(b" ")(input)?;
    let (input, name) = mailbox_token(input)?;
    let (input, _) = tag(CRLF)(input)?;
    let mut attributes = FolderAttributes::empty();
    for p in properties.split(|&b| b == b' ').filter(|p| !p.is_empty()) {
        attributes |= FolderAttributes::from_attribute(p);
    }
    Ok((
        input,
        FolderInfo {
            name,
            delimiter,
            attributes,
        },
    ))
}

/// One untagged FETCH record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchResponse<'a> {
    pub message_sequence_number: usize,
    pub uid: Option<UID>,
    pub flags: Option<(Flag, Vec<String>)>,
    pub body: Option<&'a [u8]>,
    pub envelope: Option<RawEnvelope>,
}

impl FetchResponse<'_> {
    /// The record as handed to the decoder. A record without a UID cannot be
    /// addressed later, so it is a protocol error.
    pub fn into_raw_message(self) -> Result<RawMessage> {
        let uid = self.uid.ok_or_else(|| {
            parse_error(format!(
                "FETCH response for message {} has no UID",
                self.message_sequence_number
            ))
        })?;
        let (flags, keywords) = self.flags.unwrap_or_default();
        Ok(RawMessage {
            id: uid.to_string(),
            flags,
            keywords,
            envelope: self.envelope,
            body: self.body.map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }
}

fn fetch_prefix(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, _) = tag(UNTAGGED_PREFIX)(input)?;
    let (input, msn) = number(input)?;
    let (input, _) = tag(" FETCH (")(input)?;
    Ok((input, msn))
}

/// Parse one `* n FETCH (...)` record. Returns the input after it.
pub fn fetch_response(input: &[u8]) -> Result<(&[u8], FetchResponse<'_>)> {
    macro_rules! unexpected {
        ($what:literal, $at:expr) => {{
            log::debug!(
                concat!("Unexpected input while parsing FETCH response. ", $what, ": {}"),
                String::from_utf8_lossy(input)
            );
            return Err(parse_error(format!(
                concat!("Unexpected input while parsing FETCH response. ", $what, ": `{}`"),
                lossy_prefix($at)
            )));
        }};
    }

    let Ok((mut rest, message_sequence_number)) = fetch_prefix(input) else {
        unexpected!("Expected `* <n> FETCH (`", input)
    };
    let mut ret = FetchResponse {
        message_sequence_number,
        ..FetchResponse::default()
    };
    loop {
        rest = rest.ltrim();
        if let Some(r) = rest.strip_prefix(b")") {
            let r = r.strip_prefix(CRLF).unwrap_or(r);
            return Ok((r, ret));
        }
        if rest.is_empty() {
            unexpected!("Response ended before `)`", input)
        }
        if let Some(r) = rest.strip_prefix(b"UID ") {
            match number::<UID>(r) {
                Ok((r, uid)) => {
                    ret.uid = Some(uid);
                    rest = r;
                }
                Err(_) => unexpected!("Could not parse UID", r),
            }
        } else if let Some(r) = rest.strip_prefix(b"FLAGS ") {
            match delimited(tag("("), flags, tag(")"))(r) {
                Ok((r, f)) => {
                    ret.flags = Some(f);
                    rest = r;
                }
                Err(_) => unexpected!("Could not parse FLAGS", r),
            }
        } else if let Some(r) = rest
            .strip_prefix(b"BODY[] ")
            .or_else(|| rest.strip_prefix(b"RFC822 "))
        {
            match nstring_token(r) {
                Ok((r, body)) => {
                    ret.body = body;
                    rest = r;
                }
                Err(_) => unexpected!("Could not parse BODY[]", r),
            }
        } else if let Some(r) = rest.strip_prefix(b"ENVELOPE ") {
            match envelope(r) {
                Ok((r, env)) => {
                    ret.envelope = Some(env);
                    rest = r;
                }
                Err(_) => unexpected!("Could not parse ENVELOPE", r),
            }
        } else if let Some(r) = rest.strip_prefix(b"INTERNALDATE ") {
            match string_token(r) {
                Ok((r, _)) => rest = r,
                Err(_) => unexpected!("Could not parse INTERNALDATE", r),
            }
        } else if let Some(r) = rest.strip_prefix(b"RFC822.SIZE ") {
            match number::<usize>(r) {
                Ok((r, _)) => rest = r,
                Err(_) => unexpected!("Could not parse RFC822.SIZE", r),
            }
        } else if let Some(r) = rest.strip_prefix(b"MODSEQ ") {
            match delimited(tag("("), number::<u64>, tag(")"))(r) {
                Ok((r, _)) => rest = r,
                Err(_) => unexpected!("Could not parse MODSEQ", r),
            }
        } else {
            unexpected!("Got unexpected token", rest)
        }
    }
}

/// `* SEARCH 2 84 882` or an empty `* SEARCH`.
pub fn search_results(input: &[u8]) -> IResult<&[u8], Vec<UID>> {
    let (input, _) = tag("* SEARCH")(input)?;
    let (input, list) = opt(preceded(tag(" "), separated_list1(tag(" "), number)))(input)?;
    let (input, _) = opt(tag(" "))(input)?;
    let (input, _) = tag(CRLF)(input)?;
    Ok((input, list.unwrap_or_default()))
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SelectResponse {
    pub exists: usize,
    pub recent: usize,
    pub flags: (Flag, Vec<String>),
    pub first_unseen: Option<usize>,
    pub uidvalidity: UID,
    pub uidnext: UID,
    pub permanentflags: (Flag, Vec<String>),
    /// if `SELECT` returns `\*` we can set arbitrary flags permanently.
    pub can_create_flags: bool,
    pub read_only: bool,
}

/*
 *  Example: C: A142 SELECT INBOX
 *           S: * 172 EXISTS
 *           S: * 1 RECENT
 *           S: * OK [UNSEEN 12] Message 12 is first unseen
 *           S: * OK [UIDVALIDITY 3857529045] UIDs valid
 *           S: * OK [UIDNEXT 4392] Predicted next UID
 *           S: * FLAGS (\Answered \Flagged \Deleted \Seen \Draft)
 *           S: * OK [PERMANENTFLAGS (\Deleted \Seen \*)] Limited
 *           S: A142 OK [READ-WRITE] SELECT completed
 */

/// Collect the untagged data of a `SELECT`/`EXAMINE` exchange. `input` holds
/// every line up to and including the tagged completion.
pub fn select_response(input: &[u8]) -> Result<SelectResponse> {
    let mut ret = SelectResponse::default();
    let number_between = |l: &[u8], prefix: &[u8], suffix: &[u8]| -> Result<usize> {
        let end = l.find(suffix).unwrap_or(l.len());
        let s = l.get(prefix.len()..end).unwrap_or_default();
        Ok(usize::from_str(String::from_utf8_lossy(s).trim())?)
    };
    for l in input.split_rn() {
        if l.starts_with(UNTAGGED_PREFIX) && l.ends_with(b" EXISTS\r\n") {
            ret.exists = number_between(l, UNTAGGED_PREFIX, b" EXISTS")?;
        } else if l.starts_with(UNTAGGED_PREFIX) && l.ends_with(b" RECENT\r\n") {
            ret.recent = number_between(l, UNTAGGED_PREFIX, b" RECENT")?;
        } else if let Some(r) = l.strip_prefix(b"* FLAGS (") {
            ret.flags = flags(r).map(|(_, v)| v)?;
        } else if l.starts_with(b"* OK [UNSEEN ") {
            ret.first_unseen = Some(number_between(l, b"* OK [UNSEEN ", b"]")?);
        } else if l.starts_with(b"* OK [UIDVALIDITY ") {
            ret.uidvalidity = number_between(l, b"* OK [UIDVALIDITY ", b"]")? as UID;
        } else if l.starts_with(b"* OK [UIDNEXT ") {
            ret.uidnext = number_between(l, b"* OK [UIDNEXT ", b"]")? as UID;
        } else if let Some(r) = l.strip_prefix(b"* OK [PERMANENTFLAGS (") {
            ret.permanentflags = flags(r).map(|(_, v)| v)?;
            ret.can_create_flags = r.contains_subsequence(b"\\*");
        } else if l.contains_subsequence(b"OK [READ-WRITE]") {
            ret.read_only = false;
        } else if l.contains_subsequence(b"OK [READ-ONLY]") {
            ret.read_only = true;
        } else if !l.is_empty() {
            log::trace!("select response: {}", String::from_utf8_lossy(l));
        }
    }
    Ok(ret)
}

/// System flags and keywords of a parenthesized flag list, up to but not
/// including the closing `)`.
pub fn flags(input: &[u8]) -> IResult<&[u8], (Flag, Vec<String>)> {
    let mut ret = Flag::default();
    let mut keywords = Vec::new();

    let mut input = input;
    while !input.starts_with(b")") && !input.is_empty() {
        let is_system_flag = input.starts_with(b"\\");
        if is_system_flag {
            input = &input[1..];
        }
        let match_end = input
            .iter()
            .position(|&b| b == b' ' || b == b')')
            .unwrap_or(input.len());

        match (is_system_flag, &input[..match_end]) {
            (true, t) if t.eq_ignore_ascii_case(b"Answered") => {
                ret.set(Flag::REPLIED, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Flagged") => {
                ret.set(Flag::FLAGGED, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Deleted") => {
                ret.set(Flag::TRASHED, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Seen") => {
                ret.set(Flag::SEEN, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Draft") => {
                ret.set(Flag::DRAFT, true);
            }
            (true, t) if t.eq_ignore_ascii_case(b"Recent") || t == b"*" => { /* ignore */ }
            (_, f) => {
                keywords.push(String::from_utf8_lossy(f).into());
            }
        }
        input = &input[match_end..];
        input = input.strip_prefix(b" ").unwrap_or(input);
    }
    Ok((input, (ret, keywords)))
}

/*
 * The fields of the envelope structure are in the following
 * order: date, subject, from, sender, reply-to, to, cc, bcc,
 * in-reply-to, and message-id. The date, subject, in-reply-to,
 * and message-id fields are strings. The from, sender, reply-to,
 * to, cc, and bcc fields are parenthesized lists of address
 * structures.
 *
 *  ENVELOPE ("Wed, 17 Jul 1996 02:23:25 -0700 (PDT)"
 *  "IMAP4rev1 WG mtg summary and minutes"
 *  (("Terry Gray" NIL "gray" "cac.washington.edu"))
 *  (("Terry Gray" NIL "gray" "cac.washington.edu"))
 *  (("Terry Gray" NIL "gray" "cac.washington.edu"))
 *  ((NIL NIL "imap" "cac.washington.edu"))
 *  ((NIL NIL "minutes" "CNRI.Reston.VA.US")
 *  ("John Klensin" NIL "KLENSIN" "MIT.EDU")) NIL NIL
 *  "<B27397-0100000@cac.washington.edu>")
 */

pub fn envelope(input: &[u8]) -> IResult<&[u8], RawEnvelope> {
    let (input, _) = tag("(")(input)?;
    let (input, _) = sp(input)?;
    let (input, date) = nstring(input)?;
    let (input, _) = sp(input)?;
    let (input, subject) = nstring(input)?;
    let (input, _) = sp(input)?;
    let (input, from) = envelope_addresses(input)?;
    let (input, _) = sp(input)?;
    let (input, _sender) = envelope_addresses(input)?;
    let (input, _) = sp(input)?;
    let (input, _reply_to) = envelope_addresses(input)?;
    let (input, _) = sp(input)?;
    let (input, to) = envelope_addresses(input)?;
    let (input, _) = sp(input)?;
    let (input, cc) = envelope_addresses(input)?;
    let (input, _) = sp(input)?;
    let (input, _bcc) = envelope_addresses(input)?;
    let (input, _) = sp(input)?;
    let (input, in_reply_to) = nstring(input)?;
    let (input, _) = sp(input)?;
    let (input, message_id) = nstring(input)?;
    let (input, _) = sp(input)?;
    let (input, _) = tag(")")(input)?;
    let verbatim = |v: Vec<u8>| String::from_utf8_lossy(v.trim()).to_string();
    Ok((
        input,
        RawEnvelope {
            date: date.map(verbatim),
            subject: subject.map(|s| decode_phrase(&s)),
            from,
            to,
            cc,
            in_reply_to: in_reply_to.map(verbatim).filter(|s| !s.is_empty()),
            message_id: message_id.map(verbatim).filter(|s| !s.is_empty()),
        },
    ))
}

/// Decode RFC 2047 encoded words, falling back to the raw text.
fn decode_phrase(raw: &[u8]) -> String {
    match phrase(raw, false) {
        Ok((_, v)) => String::from_utf8_lossy(&v).to_string(),
        Err(_) => String::from_utf8_lossy(raw).to_string(),
    }
}

/// A list of address structures, or `NIL`. Group delimiters are dropped.
pub fn envelope_addresses(input: &[u8]) -> IResult<&[u8], Vec<Address>> {
    alt((
        map(tag("NIL"), |_| vec![]),
        map(tag("\"\""), |_| vec![]),
        address_structures,
    ))(input)
}

fn address_structures(input: &[u8]) -> IResult<&[u8], Vec<Address>> {
    let (input, _) = tag("(")(input)?;
    let (input, list) = many1(preceded(
        sp,
        delimited(tag("("), envelope_address, tag(")")),
    ))(input)?;
    let (input, _) = sp(input)?;
    let (input, _) = tag(")")(input)?;
    Ok((input, list.into_iter().flatten().collect()))
}

/// An address structure eg `("Terry Gray" NIL "gray" "cac.washington.edu")`.
/// Group markers, which lack a host, yield `None`.
pub fn envelope_address(input: &[u8]) -> IResult<&[u8], Option<Address>> {
    let (input, name) = nstring(input)?;
    let (input, _) = sp(input)?;
    let (input, _adl) = nstring(input)?;
    let (input, _) = sp(input)?;
    let (input, mailbox_name) = nstring(input)?;
    let (input, _) = sp(input)?;
    let (input, host_name) = nstring(input)?;
    let (Some(mailbox_name), Some(host_name)) = (mailbox_name, host_name) else {
        return Ok((input, None));
    };
    Ok((
        input,
        Some(Address::new(
            name.map(|n| decode_phrase(&n)).unwrap_or_default(),
            format!(
                "{}@{}",
                String::from_utf8_lossy(&mailbox_name),
                String::from_utf8_lossy(&host_name)
            ),
        )),
    ))
}

/// A byte sequence prefixed with its length in `{}`s.
pub fn literal(input: &[u8]) -> IResult<&[u8], &[u8]> {
    length_data(delimited(tag("{"), number::<usize>, tag("}\r\n")))(input)
}

/// A quoted string with its escapes resolved.
pub fn quoted(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    if input.first() != Some(&b'"') {
        return Err(nom::Err::Error((input, "quoted(): expected `\"`").into()));
    }
    let mut out = Vec::new();
    let mut escaped = false;
    for (i, &b) in input.iter().enumerate().skip(1) {
        match (b, escaped) {
            (b'\\', false) => escaped = true,
            (b'"', false) => return Ok((&input[i + 1..], out)),
            _ => {
                out.push(b);
                escaped = false;
            }
        }
    }
    Err(nom::Err::Error(
        (input, "quoted(): not a quoted string").into(),
    ))
}

// string = quoted / literal
pub fn string(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    alt((map(literal, <[u8]>::to_vec), quoted))(input)
}

// nstring = string / nil
pub fn nstring(input: &[u8]) -> IResult<&[u8], Option<Vec<u8>>> {
    alt((map(tag("NIL"), |_| None), map(string, Some)))(input)
}

/// Like [`nstring`] but borrows: literals are returned whole, quoted strings
/// without their quotes and with escapes left in place.
pub fn nstring_token(input: &[u8]) -> IResult<&[u8], Option<&[u8]>> {
    alt((map(tag("NIL"), |_| None), map(string_token, Some)))(input)
}

pub fn string_token(input: &[u8]) -> IResult<&[u8], &[u8]> {
    if let Ok((r, o)) = literal(input) {
        return Ok((r, o));
    }
    if input.first() != Some(&b'"') {
        return Err(nom::Err::Error((input, "string_token(): EOF").into()));
    }
    let mut escaped = false;
    for (i, &b) in input.iter().enumerate().skip(1) {
        match (b, escaped) {
            (b'\\', false) => escaped = true,
            (b'"', false) => return Ok((&input[i + 1..], &input[1..i])),
            _ => escaped = false,
        }
    }
    Err(nom::Err::Error(
        (input, "string_token(): not a quoted phrase").into(),
    ))
}

// mailbox = "INBOX" / astring
//           ; INBOX is case-insensitive. All case variants of
//           ; INBOX (e.g., "iNbOx") MUST be interpreted as INBOX
pub fn mailbox_token(input: &[u8]) -> IResult<&[u8], String> {
    let (input, astring) = astring_token(input)?;
    if astring.eq_ignore_ascii_case(b"INBOX") {
        return Ok((input, "INBOX".into()));
    }
    Ok((input, String::from_utf8_lossy(&astring).to_string()))
}

// astring = 1*ASTRING-CHAR / string
pub fn astring_token(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    alt((string, map(take_while1(is_astring_char), <[u8]>::to_vec)))(input)
}

// ATOM-CHAR = <any CHAR except atom-specials>
// atom-specials = "(" / ")" / "{" / SP / CTL / list-wildcards / quoted-specials
// / resp-specials
// ASTRING-CHAR = ATOM-CHAR / resp-specials
fn is_astring_char(b: u8) -> bool {
    !(b"(){ %*\"\\".contains(&b) || b < 0x20 || b == 0x7f)
}

/// Quote `s` as an IMAP `quoted` string.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
