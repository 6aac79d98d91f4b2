/*
 * lilmail - attachments module
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

//! MIME entities and the depth-first walk that flattens them into bodies and
//! attachments.

use std::fmt;

use crate::{
    email::{
        attachment_types::{Charset, ContentDisposition, ContentTransferEncoding, ContentType},
        parser::{self, BytesExt},
    },
    error::{Error, ErrorKind, Result, ResultIntoError},
};

/// Multiparts nested deeper than this are rejected.
pub const MAX_NESTING: usize = 16;

/// A decoded attachment. `content` holds the transfer-decoded bytes and is
/// never serialized.
#[derive(Clone, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = if self.filename.is_empty() {
            "unnamed"
        } else {
            self.filename.as_str()
        };
        write!(f, "{} ({}, {} bytes)", name, self.content_type, self.size)
    }
}

/// Replace characters that would let a filename escape a directory or
/// confuse a terminal.
pub fn sanitize_filename(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// One MIME entity borrowed from a raw message.
#[derive(Clone, Debug)]
pub struct MimePart<'a> {
    pub content_type: ContentType,
    pub transfer_encoding: ContentTransferEncoding,
    pub disposition: Option<ContentDisposition>,
    pub body: &'a [u8],
}

impl<'a> MimePart<'a> {
    pub fn new(headers: &[(&[u8], &[u8])], body: &'a [u8]) -> Self {
        let content_type = parser::headers::get(headers, "Content-Type")
            .map(ContentType::from_header)
            .unwrap_or_default();
        let transfer_encoding = parser::headers::get(headers, "Content-Transfer-Encoding")
            .map(ContentTransferEncoding::from)
            .unwrap_or_default();
        let disposition = parser::headers::get(headers, "Content-Disposition")
            .filter(|v| !v.trim().is_empty())
            .map(ContentDisposition::from);
        Self {
            content_type,
            transfer_encoding,
            disposition,
            body,
        }
    }

    /// Parse a sub-part. A part whose header block cannot be parsed is
    /// treated as a header-less `text/plain` body.
    pub fn parse(raw: &'a [u8]) -> Self {
        match parser::attachments::attachment(raw) {
            Ok((_, (headers, body))) => Self::new(&headers, body),
            Err(err) => {
                log::trace!("part without parseable headers: {:?}", err);
                Self::new(&[], raw)
            }
        }
    }

    pub fn is_attachment(&self) -> bool {
        self.disposition
            .as_ref()
            .map(|d| d.kind.is_attachment())
            .unwrap_or(false)
    }

    /// Undo the content transfer encoding.
    pub fn decode(&self) -> Result<Vec<u8>> {
        match self.transfer_encoding {
            ContentTransferEncoding::Base64 => parser::encodings::base64(self.body)
                .chain_err_summary(|| "Invalid base64 in MIME part")
                .chain_err_kind(ErrorKind::Decode),
            ContentTransferEncoding::QuotedPrintable => {
                Ok(parser::encodings::quoted_printable_bytes(self.body)?.1)
            }
            ContentTransferEncoding::_7Bit
            | ContentTransferEncoding::_8Bit
            | ContentTransferEncoding::Other { .. } => Ok(self.body.to_vec()),
        }
    }

    /// Decoded text content converted to UTF-8, with CRLF line endings
    /// turned into LF.
    pub fn text(&self) -> Result<String> {
        let bytes = self.decode()?;
        Ok(decode_text(&bytes, self.content_type.charset()).replace("\r\n", "\n"))
    }

    pub fn subparts(&self) -> Result<Vec<MimePart<'a>>> {
        let ContentType::Multipart { ref boundary, .. } = self.content_type else {
            return Ok(vec![]);
        };
        if boundary.is_empty() {
            return Err(Error::new("Multipart message without a boundary parameter")
                .set_kind(ErrorKind::Decode));
        }
        let (_, parts) = parser::attachments::parts(self.body, boundary)
            .map_err(Error::from)
            .chain_err_summary(|| {
                format!(
                    "Could not split multipart body on boundary {:?}",
                    String::from_utf8_lossy(boundary)
                )
            })?;
        Ok(parts.into_iter().map(MimePart::parse).collect())
    }

    /// Filename from the disposition, falling back to the `name` content type
    /// parameter.
    pub fn filename(&self) -> String {
        self.disposition
            .as_ref()
            .and_then(|d| d.filename.as_deref())
            .or_else(|| self.content_type.name())
            .map(sanitize_filename)
            .unwrap_or_default()
    }

    pub fn to_attachment(&self) -> Result<Attachment> {
        let content = self.decode()?;
        Ok(Attachment {
            filename: self.filename(),
            content_type: self.content_type.to_string(),
            size: content.len(),
            content,
        })
    }
}

/// Lossy charset conversion: malformed sequences become U+FFFD.
pub fn decode_text(bytes: &[u8], charset: Charset) -> String {
    match parser::encodings::decode_charset(bytes, charset) {
        Ok(s) => s,
        Err(err) => {
            log::debug!("{}; using replacement characters", err);
            match charset {
                Charset::Encoding(enc) => enc.decode_without_bom_handling(bytes).0.into_owned(),
                Charset::UTF8 | Charset::Ascii => String::from_utf8_lossy(bytes).into_owned(),
            }
        }
    }
}

/// What a message body flattens into. `html` is not sanitized yet.
#[derive(Clone, Debug, Default)]
pub struct DecodedBody {
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl DecodedBody {
    /// Flatten the top level entity of a message. A body that is not
    /// multipart is taken as the plain-text body whatever its type.
    pub fn from_part(part: &MimePart<'_>) -> Result<Self> {
        let mut ret = Self::default();
        if part.content_type.is_multipart() {
            ret.walk(part, 0)?;
        } else {
            ret.text = Some(part.text()?);
        }
        Ok(ret)
    }

    fn walk(&mut self, part: &MimePart<'_>, depth: usize) -> Result<()> {
        if depth > MAX_NESTING {
            return Err(
                Error::new("MIME structure is nested too deeply").set_kind(ErrorKind::Decode)
            );
        }
        if part.content_type.is_multipart() {
            for sub in part.subparts()? {
                self.walk(&sub, depth + 1)?;
            }
        } else if part.is_attachment() || !part.content_type.is_text() {
            self.attachments.push(part.to_attachment()?);
        } else if part.content_type.is_text_plain() {
            if self.text.is_none() {
                self.text = Some(part.text()?);
            }
        } else if part.content_type.is_text_html() {
            if self.html.is_none() {
                self.html = Some(part.text()?);
            }
        } else {
            log::trace!("ignoring inline {} part", part.content_type);
        }
        Ok(())
    }
}
