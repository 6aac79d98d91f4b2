/*
 * lilmail - attachment_types.rs
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

use std::fmt::{Display, Formatter, Result as FmtResult};

use encoding_rs::Encoding;

use crate::email::parser::{self, BytesExt};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Charset {
    Ascii,
    #[default]
    UTF8,
    /// Anything `encoding_rs` knows a label for.
    Encoding(&'static Encoding),
}

impl<'a> From<&'a [u8]> for Charset {
    fn from(b: &'a [u8]) -> Self {
        let b = b.trim();
        let b = if b.is_quoted() { &b[1..b.len() - 1] } else { b };
        if b.eq_ignore_ascii_case(b"us-ascii") || b.eq_ignore_ascii_case(b"ascii") {
            return Self::Ascii;
        }
        match Encoding::for_label(b) {
            Some(enc) if enc == encoding_rs::UTF_8 => Self::UTF8,
            Some(enc) => Self::Encoding(enc),
            None => {
                log::debug!(
                    "unknown charset {:?}, assuming UTF-8",
                    String::from_utf8_lossy(b)
                );
                Self::UTF8
            }
        }
    }
}

impl From<&str> for Charset {
    fn from(s: &str) -> Self {
        Self::from(s.as_bytes())
    }
}

impl Display for Charset {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Ascii => write!(f, "us-ascii"),
            Self::UTF8 => write!(f, "utf-8"),
            Self::Encoding(enc) => write!(f, "{}", enc.name().to_ascii_lowercase()),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum MultipartType {
    Alternative,
    Digest,
    Encrypted,
    #[default]
    Mixed,
    Related,
    Signed,
    Other(String),
}

impl Display for MultipartType {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Alternative => write!(f, "multipart/alternative"),
            Self::Digest => write!(f, "multipart/digest"),
            Self::Encrypted => write!(f, "multipart/encrypted"),
            Self::Mixed => write!(f, "multipart/mixed"),
            Self::Related => write!(f, "multipart/related"),
            Self::Signed => write!(f, "multipart/signed"),
            Self::Other(t) => write!(f, "multipart/{}", t),
        }
    }
}

impl From<&[u8]> for MultipartType {
    fn from(val: &[u8]) -> Self {
        if val.eq_ignore_ascii_case(b"mixed") {
            Self::Mixed
        } else if val.eq_ignore_ascii_case(b"alternative") {
            Self::Alternative
        } else if val.eq_ignore_ascii_case(b"digest") {
            Self::Digest
        } else if val.eq_ignore_ascii_case(b"encrypted") {
            Self::Encrypted
        } else if val.eq_ignore_ascii_case(b"signed") {
            Self::Signed
        } else if val.eq_ignore_ascii_case(b"related") {
            Self::Related
        } else {
            Self::Other(String::from_utf8_lossy(val).to_ascii_lowercase())
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Text {
    #[default]
    Plain,
    Html,
    Other { tag: String },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContentType {
    Text {
        kind: Text,
        charset: Charset,
        name: Option<String>,
    },
    Multipart {
        boundary: Vec<u8>,
        kind: MultipartType,
    },
    MessageRfc822 {
        name: Option<String>,
    },
    Other {
        tag: String,
        name: Option<String>,
    },
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Text {
            kind: Text::Plain,
            charset: Charset::UTF8,
            name: None,
        }
    }
}

impl ContentType {
    /// Parse a `Content-Type` header value. Unparseable values fall back to
    /// `text/plain` as RFC 2045 asks.
    pub fn from_header(value: &[u8]) -> Self {
        let value = parser::headers::unfold(value);
        let Ok((_, (ty, subtype, params))) = parser::attachments::content_type(&value) else {
            return Self::default();
        };
        let mut name = None;
        let mut charset = Charset::default();
        let mut boundary = None;
        for (k, v) in &params {
            if k.eq_ignore_ascii_case(b"charset") {
                charset = Charset::from(*v);
            } else if k.eq_ignore_ascii_case(b"boundary") {
                boundary = Some(v.to_vec());
            } else if k.eq_ignore_ascii_case(b"name") || k.eq_ignore_ascii_case(b"name*") {
                name = Some(parser::attachments::parameter_value(k, v));
            }
        }
        if ty.eq_ignore_ascii_case(b"text") {
            let kind = if subtype.eq_ignore_ascii_case(b"plain") {
                Text::Plain
            } else if subtype.eq_ignore_ascii_case(b"html") {
                Text::Html
            } else {
                Text::Other {
                    tag: format!(
                        "text/{}",
                        String::from_utf8_lossy(subtype).to_ascii_lowercase()
                    ),
                }
            };
            Self::Text {
                kind,
                charset,
                name,
            }
        } else if ty.eq_ignore_ascii_case(b"multipart") {
            Self::Multipart {
                boundary: boundary.unwrap_or_default(),
                kind: MultipartType::from(subtype),
            }
        } else if ty.eq_ignore_ascii_case(b"message") && subtype.eq_ignore_ascii_case(b"rfc822") {
            Self::MessageRfc822 { name }
        } else {
            Self::Other {
                tag: format!(
                    "{}/{}",
                    String::from_utf8_lossy(ty),
                    String::from_utf8_lossy(subtype)
                )
                .to_ascii_lowercase(),
                name,
            }
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    pub fn is_text_plain(&self) -> bool {
        matches!(
            self,
            Self::Text {
                kind: Text::Plain,
                ..
            }
        )
    }

    pub fn is_text_html(&self) -> bool {
        matches!(
            self,
            Self::Text {
                kind: Text::Html,
                ..
            }
        )
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart { .. })
    }

    /// The `name` parameter, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Text { name, .. } | Self::MessageRfc822 { name } | Self::Other { name, .. } => {
                name.as_deref()
            }
            Self::Multipart { .. } => None,
        }
    }

    pub fn charset(&self) -> Charset {
        match self {
            Self::Text { charset, .. } => *charset,
            _ => Charset::UTF8,
        }
    }
}

impl Display for ContentType {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Text {
                kind: Text::Plain, ..
            } => write!(f, "text/plain"),
            Self::Text {
                kind: Text::Html, ..
            } => write!(f, "text/html"),
            Self::Text {
                kind: Text::Other { tag },
                ..
            } => write!(f, "{}", tag),
            Self::Multipart { kind, .. } => write!(f, "{}", kind),
            Self::MessageRfc822 { .. } => write!(f, "message/rfc822"),
            Self::Other { tag, .. } => write!(f, "{}", tag),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ContentTransferEncoding {
    #[default]
    _8Bit,
    _7Bit,
    Base64,
    QuotedPrintable,
    Other {
        tag: String,
    },
}

impl From<&[u8]> for ContentTransferEncoding {
    fn from(val: &[u8]) -> Self {
        let val = val.trim();
        if val.eq_ignore_ascii_case(b"base64") {
            Self::Base64
        } else if val.eq_ignore_ascii_case(b"7bit") {
            Self::_7Bit
        } else if val.eq_ignore_ascii_case(b"8bit") || val.eq_ignore_ascii_case(b"binary") {
            Self::_8Bit
        } else if val.eq_ignore_ascii_case(b"quoted-printable") {
            Self::QuotedPrintable
        } else {
            Self::Other {
                tag: String::from_utf8_lossy(val).to_ascii_lowercase(),
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ContentDispositionKind {
    #[default]
    Inline,
    Attachment,
}

impl ContentDispositionKind {
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline)
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self, Self::Attachment)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContentDisposition {
    pub kind: ContentDispositionKind,
    pub filename: Option<String>,
    pub size: Option<usize>,
}

impl From<&[u8]> for ContentDisposition {
    fn from(val: &[u8]) -> Self {
        let val = parser::headers::unfold(val);
        parser::attachments::content_disposition(&val)
            .map(|(_, v)| v)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_types_charset() {
        assert_eq!(Charset::from("UTF-8"), Charset::UTF8);
        assert_eq!(Charset::from("\"us-ascii\""), Charset::Ascii);
        assert_eq!(
            Charset::from("ISO-8859-7"),
            Charset::Encoding(encoding_rs::ISO_8859_7)
        );
        assert_eq!(Charset::from("gb2312").to_string(), "gbk");
        assert_eq!(Charset::from("x-no-such-charset"), Charset::UTF8);
    }

    #[test]
    fn test_attachment_types_content_type() {
        let ct = ContentType::from_header(b"text/HTML; charset=\"windows-1253\"");
        assert!(ct.is_text_html());
        assert_eq!(ct.charset(), Charset::Encoding(encoding_rs::WINDOWS_1253));
        assert_eq!(ct.to_string(), "text/html");

        let ct = ContentType::from_header(b"multipart/alternative;\r\n boundary=\"=_abc\"");
        assert_eq!(
            ct,
            ContentType::Multipart {
                boundary: b"=_abc".to_vec(),
                kind: MultipartType::Alternative,
            }
        );

        let ct = ContentType::from_header(b"Application/PDF; name=\"report.pdf\"");
        assert_eq!(ct.to_string(), "application/pdf");
        assert_eq!(ct.name(), Some("report.pdf"));

        assert_eq!(ContentType::from_header(b"garbage"), ContentType::default());
    }

    #[test]
    fn test_attachment_types_transfer_encoding() {
        assert_eq!(
            ContentTransferEncoding::from(&b" BASE64 "[..]),
            ContentTransferEncoding::Base64
        );
        assert_eq!(
            ContentTransferEncoding::from(&b"binary"[..]),
            ContentTransferEncoding::_8Bit
        );
        assert_eq!(
            ContentTransferEncoding::from(&b"x-uuencode"[..]),
            ContentTransferEncoding::Other {
                tag: "x-uuencode".to_string()
            }
        );
    }
}
