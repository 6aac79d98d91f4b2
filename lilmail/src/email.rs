/*
 * lilmail - email module
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

/*!
 * Decoding of raw messages into normalized [`Message`] values.
 *
 * A [`RawMessage`] is what a retrieval hands over: the server identifier,
 * flags, the optional protocol envelope and the full RFC 5322 bytes.
 * [`Message::decode`] turns it into a [`Message`] with a plain-text body, a
 * sanitized HTML body, a flat attachment list and the threading headers.
 *
 * ```
 * use lilmail::{Message, RawMessage};
 *
 * let raw = RawMessage::new(
 *     "7",
 *     b"From: \"Some Name\" <some@example.com>\r\n\
 * Subject: =?utf-8?Q?encoded_subject?=\r\n\
 * Message-ID: <h2g7f@example.com>\r\n\r\nhello world\r\n"
 *         .to_vec(),
 * );
 * let message = Message::decode(&raw).expect("Could not decode message");
 * assert_eq!(message.subject, "encoded subject");
 * assert_eq!(message.from.address, "some@example.com");
 * assert_eq!(message.message_id, "<h2g7f@example.com>");
 * assert_eq!(message.text_body, "hello world\n");
 * ```
 */

pub mod address;
pub mod attachment_types;
pub mod attachments;
pub mod parser;
pub mod sanitize;

pub use address::Address;
pub use attachments::Attachment;

use crate::{
    email::{
        attachments::{DecodedBody, MimePart},
        parser::BytesExt,
    },
    error::{Result, ResultIntoError},
};

/// Seconds since the Unix epoch.
pub type UnixTimestamp = u64;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
    pub struct Flag: u8 {
        const REPLIED =  0b0000_0001;
        const SEEN    =  0b0000_0010;
        /// `\Deleted`
        const TRASHED =  0b0000_0100;
        const DRAFT   =  0b0000_1000;
        const FLAGGED =  0b0001_0000;
    }
}

macro_rules! flag_impl {
    (fn $name:ident, $val:expr) => {
        pub const fn $name(&self) -> bool {
            self.contains($val)
        }
    };
}

impl Flag {
    flag_impl!(fn is_seen, Flag::SEEN);
    flag_impl!(fn is_draft, Flag::DRAFT);
    flag_impl!(fn is_trashed, Flag::TRASHED);
    flag_impl!(fn is_replied, Flag::REPLIED);
    flag_impl!(fn is_flagged, Flag::FLAGGED);

    /// The IMAP system flag name.
    pub const fn imap_name(&self) -> &'static str {
        match *self {
            Self::REPLIED => "\\Answered",
            Self::SEEN => "\\Seen",
            Self::TRASHED => "\\Deleted",
            Self::DRAFT => "\\Draft",
            Self::FLAGGED => "\\Flagged",
            _ => "",
        }
    }
}

impl PartialEq<&str> for Flag {
    fn eq(&self, other: &&str) -> bool {
        (other.eq_ignore_ascii_case("replied") && self.contains(Self::REPLIED))
            || (other.eq_ignore_ascii_case("answered") && self.contains(Self::REPLIED))
            || (other.eq_ignore_ascii_case("seen") && self.contains(Self::SEEN))
            || (other.eq_ignore_ascii_case("read") && self.contains(Self::SEEN))
            || (other.eq_ignore_ascii_case("deleted") && self.contains(Self::TRASHED))
            || (other.eq_ignore_ascii_case("trashed") && self.contains(Self::TRASHED))
            || (other.eq_ignore_ascii_case("draft") && self.contains(Self::DRAFT))
            || (other.eq_ignore_ascii_case("flagged") && self.contains(Self::FLAGGED))
    }
}

/// Envelope fields as reported by the server, already decoded.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawEnvelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

/// One retrieved message before decoding.
#[derive(Clone, Debug, Default)]
pub struct RawMessage {
    /// Server identifier (an IMAP UID in decimal).
    pub id: String,
    pub flags: Flag,
    /// Flags that are not system flags.
    pub keywords: Vec<String>,
    pub envelope: Option<RawEnvelope>,
    pub body: Vec<u8>,
}

impl RawMessage {
    pub fn new<I: Into<String>>(id: I, body: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            body,
            ..Self::default()
        }
    }
}

/// A normalized message. Text fields are never missing, only empty.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Message {
    pub id: String,
    pub message_id: String,
    pub in_reply_to: String,
    pub references: Vec<String>,
    pub subject: String,
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub timestamp: UnixTimestamp,
    pub text_body: String,
    pub html_body: String,
    pub preview: String,
    pub attachments: Vec<Attachment>,
    pub flags: Flag,
    pub keywords: Vec<String>,
    pub has_attachments: bool,
}

fn header_text(headers: &[(&[u8], &[u8])], name: &str) -> Option<String> {
    let value = parser::headers::get(headers, name)?;
    let value = parser::headers::unfold(value);
    let decoded = parser::encodings::phrase(value.trim(), false)
        .map(|(_, v)| v)
        .unwrap_or_else(|_| value.trim().to_vec());
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

/// Raw header value with folding undone and outer whitespace removed.
fn header_verbatim(headers: &[(&[u8], &[u8])], name: &str) -> Option<String> {
    parser::headers::get(headers, name)
        .map(|v| String::from_utf8_lossy(parser::headers::unfold(v).trim()).into_owned())
        .filter(|v| !v.is_empty())
}

impl Message {
    /// Decode one message. Failures are scoped to this message.
    pub fn decode(raw: &RawMessage) -> Result<Self> {
        let (headers, body) = parser::mail(&raw.body)
            .chain_err_summary(|| format!("Could not decode message {}", raw.id))?;
        let envelope = raw.envelope.as_ref();

        let subject = envelope
            .and_then(|e| e.subject.clone())
            .or_else(|| header_text(&headers, "Subject"))
            .unwrap_or_default();
        let addresses = |from_envelope: Option<&Vec<Address>>, name: &str| -> Vec<Address> {
            match from_envelope {
                Some(list) if !list.is_empty() => list.clone(),
                _ => parser::headers::get(&headers, name)
                    .map(Address::list_try_from)
                    .unwrap_or_default(),
            }
        };
        let from = addresses(envelope.map(|e| &e.from), "From")
            .into_iter()
            .next()
            .unwrap_or_default();
        let to = addresses(envelope.map(|e| &e.to), "To");
        let cc = addresses(envelope.map(|e| &e.cc), "Cc");

        let date = envelope
            .and_then(|e| e.date.clone())
            .or_else(|| header_verbatim(&headers, "Date"));
        let timestamp = match date.as_deref().map(|d| parser::dates::rfc5322_date(d.as_bytes())) {
            Some(Ok(t)) => t,
            Some(Err(err)) => {
                log::debug!("message {}: {}", raw.id, err);
                0
            }
            None => 0,
        };

        let message_id = header_verbatim(&headers, "Message-ID")
            .or_else(|| envelope.and_then(|e| e.message_id.clone()))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| raw.id.clone());
        let in_reply_to = header_verbatim(&headers, "In-Reply-To")
            .or_else(|| envelope.and_then(|e| e.in_reply_to.clone()))
            .unwrap_or_default();
        let references = header_verbatim(&headers, "References")
            .map(|r| r.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let part = MimePart::new(&headers, body);
        let decoded = DecodedBody::from_part(&part)
            .chain_err_summary(|| format!("Could not decode body of message {}", raw.id))?;
        let html_body = decoded
            .html
            .as_deref()
            .map(sanitize::sanitize_html)
            .unwrap_or_default();
        let has_text = decoded.text.is_some();
        let text_body = decoded.text.unwrap_or_default();
        let preview = if has_text {
            sanitize::preview(&text_body)
        } else if !html_body.is_empty() {
            sanitize::preview(&sanitize::strip_tags(&html_body))
        } else {
            String::new()
        };

        Ok(Self {
            id: raw.id.clone(),
            message_id,
            in_reply_to,
            references,
            subject,
            from,
            to,
            cc,
            timestamp,
            text_body,
            html_body,
            preview,
            has_attachments: !decoded.attachments.is_empty(),
            attachments: decoded.attachments,
            flags: raw.flags,
            keywords: raw.keywords.clone(),
        })
    }

    pub fn is_seen(&self) -> bool {
        self.flags.is_seen()
    }

    /// Sender and recipient addresses, trimmed, in header order. Empty
    /// addresses are skipped.
    pub fn participants(&self) -> impl Iterator<Item = &str> {
        std::iter::once(&self.from)
            .chain(self.to.iter())
            .chain(self.cc.iter())
            .map(|a| a.address.trim())
            .filter(|a| !a.is_empty())
    }
}
