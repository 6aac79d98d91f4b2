/*
 * lilmail - parsing module
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

//! Parsers for email. See submodules.
#![allow(clippy::type_complexity)]

use std::borrow::Cow;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while},
    character::is_hex_digit,
    combinator::peek,
    error::ErrorKind,
    multi::many0,
    number::complete::le_u8,
    sequence::{delimited, pair, preceded, separated_pair, terminated},
};
use smallvec::SmallVec;

use crate::error::{Error, ErrorKind as LilErrorKind, Result, ResultIntoError};

#[derive(Eq, PartialEq)]
pub struct ParsingError<I> {
    pub input: I,
    pub error: Cow<'static, str>,
}

impl std::fmt::Debug for ParsingError<&'_ [u8]> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("ParsingError")
            .field("input", &String::from_utf8_lossy(self.input))
            .field("error", &self.error)
            .finish()
    }
}

pub type IResult<I, O, E = ParsingError<I>> = std::result::Result<(I, O), nom::Err<E>>;

impl<I> From<(I, &'static str)> for ParsingError<I> {
    fn from((input, error): (I, &'static str)) -> Self {
        Self {
            input,
            error: error.into(),
        }
    }
}

impl<I> From<(I, String)> for ParsingError<I> {
    fn from((input, error): (I, String)) -> Self {
        Self {
            input,
            error: error.into(),
        }
    }
}

impl<I> nom::error::ParseError<I> for ParsingError<I> {
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        Self {
            input,
            error: kind.description().to_string().into(),
        }
    }

    fn append(input: I, kind: ErrorKind, other: Self) -> Self {
        Self {
            input,
            error: format!("{}, {}", kind.description(), other.error).into(),
        }
    }
}

impl<I, E> nom::error::FromExternalError<I, E> for ParsingError<I> {
    fn from_external_error(input: I, kind: ErrorKind, _e: E) -> Self {
        Self {
            input,
            error: kind.description().to_string().into(),
        }
    }
}

impl<I> nom::error::ContextError<I> for ParsingError<I> {}

impl<'i> From<ParsingError<&'i [u8]>> for Error {
    fn from(val: ParsingError<&'i [u8]>) -> Self {
        Self::new("Parsing error")
            .set_details(format!(
                r#"In input: "{}...",
Error: {}"#,
                String::from_utf8_lossy(val.input)
                    .chars()
                    .take(30)
                    .collect::<String>(),
                val.error
            ))
            .set_kind(LilErrorKind::Decode)
    }
}

impl<'i> From<nom::Err<ParsingError<&'i [u8]>>> for Error {
    fn from(val: nom::Err<ParsingError<&'i [u8]>>) -> Self {
        match val {
            nom::Err::Incomplete(_) => {
                Self::new("Parsing Error: Incomplete").set_kind(LilErrorKind::Decode)
            }
            nom::Err::Error(err) | nom::Err::Failure(err) => err.into(),
        }
    }
}

macro_rules! is_ctl_or_space {
    ($var:ident) => {
        /* <any ASCII control character and DEL> */
        $var < 33 || $var == 127
    };
    ($var:expr) => {
        /* <any ASCII control character and DEL> */
        $var < 33 || $var == 127
    };
}

macro_rules! is_whitespace {
    ($var:ident) => {
        $var == b' ' || $var == b'\t' || $var == b'\n' || $var == b'\r'
    };
    ($var:expr) => {
        $var == b' ' || $var == b'\t' || $var == b'\n' || $var == b'\r'
    };
}

pub trait BytesExt {
    fn rtrim(&self) -> &Self;
    fn ltrim(&self) -> &Self;
    fn trim(&self) -> &Self;
    fn find<T: AsRef<[u8]>>(&self, needle: T) -> Option<usize>;
    fn contains_subsequence<T: AsRef<[u8]>>(&self, needle: T) -> bool {
        self.find(needle.as_ref()).is_some()
    }
    fn rfind<T: AsRef<[u8]>>(&self, needle: T) -> Option<usize>;
    fn is_quoted(&self) -> bool;
}

impl BytesExt for [u8] {
    fn rtrim(&self) -> &Self {
        if let Some(last) = self.iter().rposition(|b| !is_whitespace!(*b)) {
            &self[..=last]
        } else {
            &[]
        }
    }

    fn ltrim(&self) -> &Self {
        if let Some(first) = self.iter().position(|b| !is_whitespace!(*b)) {
            &self[first..]
        } else {
            &[]
        }
    }

    fn trim(&self) -> &[u8] {
        self.rtrim().ltrim()
    }

    fn find<T: AsRef<[u8]>>(&self, needle: T) -> Option<usize> {
        let needle = needle.as_ref();
        if needle.is_empty() || needle.len() > self.len() {
            return None;
        }
        self.windows(needle.len())
            .position(|window| window == needle)
    }

    fn rfind<T: AsRef<[u8]>>(&self, needle: T) -> Option<usize> {
        let needle = needle.as_ref();
        if needle.is_empty() || needle.len() > self.len() {
            return None;
        }
        self.windows(needle.len())
            .rposition(|window| window == needle)
    }

    fn is_quoted(&self) -> bool {
        self.starts_with(b"\"") && self.ends_with(b"\"") && self.len() > 1
    }
}

/// Split a message into its header list and its body.
pub fn mail(input: &[u8]) -> Result<(Vec<(&[u8], &[u8])>, &[u8])> {
    let (rest, result) = alt((
        separated_pair(
            headers::headers,
            alt((tag(b"\n"), tag(b"\r\n"))),
            take_while(|_| true),
        ),
        pair(headers::headers, generic::eof),
    ))(input)
    .chain_err_summary(|| "Could not parse mail")?;

    if !rest.is_empty() {
        return Err(Error::new("Got leftover bytes after parsing mail").set_kind(LilErrorKind::Decode));
    }

    Ok(result)
}

pub mod generic {
    //! Generally useful parser combinators.
    use super::*;

    pub fn eof(input: &[u8]) -> IResult<&[u8], &[u8]> {
        if input.is_empty() {
            Ok((input, input))
        } else {
            Err(nom::Err::Error((input, "expected EOF").into()))
        }
    }
}

pub mod dates {
    //! Date values in headers.
    use chrono::{DateTime, NaiveDateTime};

    use super::*;
    use crate::email::UnixTimestamp;

    /// Strip trailing comments such as `(UTC)` and squeeze runs of
    /// whitespace.
    fn normalize(input: &str) -> String {
        let mut ret = String::with_capacity(input.len());
        let mut depth = 0_usize;
        for c in input.chars() {
            match c {
                '(' => depth += 1,
                ')' if depth > 0 => depth -= 1,
                _ if depth > 0 => {}
                c if c.is_whitespace() => {
                    if !ret.ends_with(' ') && !ret.is_empty() {
                        ret.push(' ');
                    }
                }
                c => ret.push(c),
            }
        }
        let trimmed = ret.trim_end();
        for (zone, offset) in [(" UTC", " +0000"), (" Z", " +0000")] {
            if let Some(stripped) = trimmed.strip_suffix(zone) {
                return format!("{}{}", stripped, offset);
            }
        }
        trimmed.to_string()
    }

    /// Parse an RFC 5322 date. Dates before the epoch are clamped to `0`.
    pub fn rfc5322_date(input: &[u8]) -> Result<UnixTimestamp> {
        let (_, decoded) = encodings::phrase(input.trim(), false)?;
        let s = normalize(&String::from_utf8_lossy(&decoded));
        let clamp = |t: i64| -> UnixTimestamp { t.max(0) as UnixTimestamp };
        if let Ok(dt) = DateTime::parse_from_rfc2822(&s) {
            return Ok(clamp(dt.timestamp()));
        }
        // Day of week is optional and sometimes wrong, so try again without it.
        if let Some((_, without_dow)) = s.split_once(", ") {
            if let Ok(dt) = DateTime::parse_from_rfc2822(without_dow) {
                return Ok(clamp(dt.timestamp()));
            }
        }
        for fmt in ["%d %b %Y %H:%M:%S %z", "%a, %d %b %Y %H:%M %z"] {
            if let Ok(dt) = DateTime::parse_from_str(&s, fmt) {
                return Ok(clamp(dt.timestamp()));
            }
        }
        // mbox `From ` line style, no zone.
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, "%a %b %e %H:%M:%S %Y") {
            return Ok(clamp(dt.and_utc().timestamp()));
        }
        Err(Error::new(format!("Invalid date: {:?}", s)).set_kind(LilErrorKind::Decode))
    }

    #[test]
    fn test_date_new() {
        let s = b"Thu, 31 Aug 2017 13:43:37 +0000 (UTC)";
        let _s = b"Thu, 31 Aug 2017 13:43:37 +0000";
        let __s = b"=?utf-8?q?Thu=2C_31_Aug_2017_13=3A43=3A37_-0000?=";
        assert_eq!(rfc5322_date(s).unwrap(), rfc5322_date(_s).unwrap());
        assert_eq!(rfc5322_date(_s).unwrap(), rfc5322_date(__s).unwrap());
        assert_eq!(rfc5322_date(_s).unwrap(), 1504187017);
        let val = b"Fri, 23 Dec 0001 21:20:36 -0800 (PST)";
        assert_eq!(rfc5322_date(val).unwrap(), 0);
        let val = b"Wed Sep  9 00:27:54 2020";
        assert_eq!(rfc5322_date(val).unwrap(), 1599611274);
        let val = b"Mon, 2 Jan 2006 15:04:05 UTC";
        assert_eq!(rfc5322_date(val).unwrap(), 1136214245);
        assert!(rfc5322_date(b"yesterday").is_err());
    }
}

pub mod headers {
    //! Email headers.
    use super::*;

    pub fn headers(input: &[u8]) -> IResult<&[u8], Vec<(&[u8], &[u8])>> {
        nom::multi::many1(header)(input)
    }

    pub fn header(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
        alt((header_without_val, header_with_val))(input)
    }

    fn field_name(input: &[u8]) -> IResult<&[u8], &[u8]> {
        /* field-name  =  1*<any CHAR, excluding CTLs, SPACE, and ":"> */
        for (i, x) in input.iter().enumerate() {
            if *x == b':' {
                if i == 0 {
                    break;
                }
                return Ok((&input[i + 1..], &input[0..i]));
            } else if is_ctl_or_space!(*x) {
                return Err(nom::Err::Error(
                    (
                        &input[i..],
                        format!("field_name(): invalid character: {:?}", *x as char),
                    )
                        .into(),
                ));
            }
        }
        Err(nom::Err::Error(
            (input, "field_name(): expected a header name").into(),
        ))
    }

    /// A header with an empty value, such as `Cc:` followed directly by a new
    /// line.
    pub fn header_without_val(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
        let (rest, name) = field_name(input)?;
        let rest = &rest[rest.iter().take_while(|b| **b == b' ').count()..];
        let rest = if let Some(r) = rest.strip_prefix(b"\r\n") {
            r
        } else if let Some(r) = rest.strip_prefix(b"\n") {
            r
        } else {
            return Err(nom::Err::Error(
                (rest, "header_without_val(): expected new line").into(),
            ));
        };
        if rest.starts_with(b" ") || rest.starts_with(b"\t") {
            /* value is folded to the next line */
            return Err(nom::Err::Error(
                (rest, "header_without_val(): value continues on next line").into(),
            ));
        }
        Ok((rest, (name, b"")))
    }

    /* A header can span multiple lines, eg:
     *
     * Received: from -------------------- (-------------------------)
     * 	by --------------------- (--------------------- [------------------])
     * (-----------------------) 	with ESMTP id ------------ for
     * <------------------->; 	Tue,  5 Jan 2016 21:30:44 +0100 (CET)
     */

    pub fn header_value(input: &[u8]) -> IResult<&[u8], &[u8]> {
        let input_len = input.len();
        for (i, x) in input.iter().enumerate() {
            if *x == b'\n'
                && (((i + 1) < input_len && input[i + 1] != b' ' && input[i + 1] != b'\t')
                    || i + 1 == input_len)
            {
                let value = if i > 0 && input[i - 1] == b'\r' {
                    &input[0..i - 1]
                } else {
                    &input[0..i]
                };
                return Ok((&input[(i + 1)..], value));
            }
        }
        Err(nom::Err::Error(
            (
                input,
                "header_value(): expected new line after header value",
            )
                .into(),
        ))
    }

    /// Parse a single header as a `(name, value)` tuple.
    pub fn header_with_val(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
        if input.starts_with(b"\n") || input.starts_with(b"\r\n") {
            return Err(nom::Err::Error(
                (input, "header_with_val(): field name starts with new line").into(),
            ));
        }
        let (rest, name) = field_name(input)?;
        let rest = rest.ltrim_header_space();
        if rest.is_empty() {
            return Err(nom::Err::Error(
                (input, "header_with_val(): found EOF").into(),
            ));
        }
        header_value(rest).map(|(rest, value)| (rest, (name, value)))
    }

    trait HeaderSpace {
        fn ltrim_header_space(&self) -> &Self;
    }

    impl HeaderSpace for [u8] {
        /// Skip spaces and a folding line break right after the colon.
        fn ltrim_header_space(&self) -> &Self {
            let mut ptr = 0;
            while ptr < self.len() {
                match self[ptr] {
                    b' ' | b'\t' => ptr += 1,
                    b'\r' if self[ptr..].starts_with(b"\r\n ")
                        || self[ptr..].starts_with(b"\r\n\t") =>
                    {
                        ptr += 2
                    }
                    b'\n' if self[ptr..].starts_with(b"\n ") || self[ptr..].starts_with(b"\n\t") => {
                        ptr += 1
                    }
                    _ => break,
                }
            }
            &self[ptr..]
        }
    }

    /// Join folded lines of a header value.
    pub fn unfold(value: &[u8]) -> Cow<'_, [u8]> {
        if !value.contains(&b'\n') {
            return Cow::Borrowed(value);
        }
        let mut ret = Vec::with_capacity(value.len());
        let mut iter = value.iter().peekable();
        while let Some(&b) = iter.next() {
            match b {
                b'\r' if iter.peek() == Some(&&b'\n') => {}
                b'\n' => {
                    while matches!(iter.peek(), Some(b' ') | Some(b'\t')) {
                        iter.next();
                    }
                    ret.push(b' ');
                }
                b => ret.push(b),
            }
        }
        Cow::Owned(ret)
    }

    /// Case-insensitive header lookup; the first occurrence wins.
    pub fn get<'a>(headers: &[(&[u8], &'a [u8])], name: &str) -> Option<&'a [u8]> {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| *v)
    }
}

pub mod attachments {
    //! Email attachments.
    use super::*;
    use crate::email::attachment_types::{ContentDisposition, ContentDispositionKind};

    /// Split a MIME entity into its headers and its body.
    pub fn attachment(input: &[u8]) -> IResult<&[u8], (Vec<(&[u8], &[u8])>, &[u8])> {
        alt((
            separated_pair(
                many0(headers::header),
                alt((tag(b"\n"), tag(b"\r\n"))),
                take_while(|_| true),
            ),
            pair(headers::headers, generic::eof),
        ))(input)
    }

    /// Position of the next `--boundary` delimiter that starts a line.
    fn find_delimiter(input: &[u8], boundary: &[u8]) -> Option<usize> {
        let mut offset = 0;
        while let Some(pos) = input[offset..].find(boundary) {
            let pos = offset + pos;
            if pos >= 2 && &input[pos - 2..pos] == b"--" && (pos == 2 || input[pos - 3] == b'\n')
            {
                return Some(pos - 2);
            }
            offset = pos + 1;
        }
        None
    }

    fn parts_f(boundary: &[u8]) -> impl Fn(&[u8]) -> IResult<&[u8], Vec<&[u8]>> + '_ {
        move |input: &[u8]| -> IResult<&[u8], Vec<&[u8]>> {
            let mut ret: Vec<&[u8]> = Vec::new();
            if boundary.is_empty() {
                return Err(nom::Err::Error((input, "parts_f(): empty boundary").into()));
            }
            let Some(start) = find_delimiter(input, boundary) else {
                return Err(nom::Err::Error(
                    (input, "parts_f(): could not find starting boundary").into(),
                ));
            };
            /* skip preamble */
            let mut input = &input[start + 2 + boundary.len()..];
            if input.starts_with(b"--") {
                /* closing delimiter right away, no parts */
                return Ok((&input[2..], ret));
            }
            loop {
                /* skip transport padding and the line break of the delimiter line */
                match input.iter().position(|b| *b == b'\n') {
                    Some(i) => input = &input[i + 1..],
                    None => break,
                }
                if let Some(end) = find_delimiter(input, boundary) {
                    let mut part = &input[..end];
                    if part.ends_with(b"\r\n") {
                        part = &part[..part.len() - 2];
                    } else if part.ends_with(b"\n") {
                        part = &part[..part.len() - 1];
                    }
                    ret.push(part);
                    input = &input[end + 2 + boundary.len()..];
                    if input.starts_with(b"--") {
                        input = &input[2..];
                        break;
                    }
                } else {
                    /* missing closing delimiter; keep what we have */
                    ret.push(input);
                    input = &input[input.len()..];
                    break;
                }
            }
            Ok((input, ret))
        }
    }

    pub fn parts<'a>(input: &'a [u8], boundary: &[u8]) -> IResult<&'a [u8], Vec<&'a [u8]>> {
        parts_f(boundary)(input)
    }

    /// `; name=value` where value may be quoted.
    /// Caution: values should be passed through [`encodings::phrase`].
    pub fn content_type_parameter(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
        let (input, _) = tag(";")(input.ltrim())?;
        let (input, name) = terminated(take_until("="), tag("="))(input.ltrim())?;
        let (input, value) = alt((
            delimited(tag("\""), take_until("\""), tag("\"")),
            is_not(";"),
        ))(input.ltrim())?;

        Ok((input, (name.trim(), value.rtrim())))
    }

    pub fn content_type(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8], Vec<(&[u8], &[u8])>)> {
        let (input, _type) = take_until("/")(input.ltrim())?;
        let (input, _) = tag("/")(input)?;
        let (input, _subtype) = is_not(";")(input)?;
        let (input, parameters) = many0(content_type_parameter)(input)?;
        Ok((input, (_type.trim(), _subtype.trim(), parameters)))
    }

    /// Decode an RFC 2231 extended value: `charset'language'percent-encoded`.
    pub fn extended_value(value: &[u8]) -> String {
        let mut fields = value.splitn(3, |b| *b == b'\'');
        let (Some(charset), Some(_lang), Some(encoded)) = (fields.next(), fields.next(), fields.next())
        else {
            return String::from_utf8_lossy(value).into_owned();
        };
        let mut bytes = Vec::with_capacity(encoded.len());
        let mut i = 0;
        while i < encoded.len() {
            if encoded[i] == b'%'
                && i + 2 < encoded.len()
                && is_hex_digit(encoded[i + 1])
                && is_hex_digit(encoded[i + 2])
            {
                let hex = std::str::from_utf8(&encoded[i + 1..i + 3]).unwrap_or("3F");
                bytes.push(u8::from_str_radix(hex, 16).unwrap_or(b'?'));
                i += 3;
            } else {
                bytes.push(encoded[i]);
                i += 1;
            }
        }
        let charset = crate::email::attachment_types::Charset::from(charset);
        encodings::decode_charset(&bytes, charset)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode a parameter value, honoring both RFC 2231 (`name*=`) and RFC
    /// 2047 encoded words.
    pub fn parameter_value(name: &[u8], value: &[u8]) -> String {
        if name.ends_with(b"*") {
            extended_value(value)
        } else {
            encodings::phrase(value, false)
                .map(|(_, v)| String::from_utf8_lossy(&v).into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(value).into_owned())
        }
    }

    pub fn content_disposition_parameter(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
        content_type_parameter(input)
    }

    pub fn content_disposition(input: &[u8]) -> IResult<&[u8], ContentDisposition> {
        let (input, kind) = alt((take_until(";"), take_while(|_| true)))(input.trim())?;
        let mut ret = ContentDisposition {
            /* RFC2183 Content-Disposition: "Unrecognized disposition types should be treated as
             * `attachment'." */
            kind: if kind.trim().eq_ignore_ascii_case(b"inline") {
                ContentDispositionKind::Inline
            } else {
                ContentDispositionKind::Attachment
            },
            ..ContentDisposition::default()
        };
        if input.is_empty() {
            return Ok((input, ret));
        }
        let (input, parameters) = many0(content_disposition_parameter)(input.ltrim())?;
        for (k, v) in parameters {
            if k.eq_ignore_ascii_case(b"filename") || k.eq_ignore_ascii_case(b"filename*") {
                ret.filename = Some(parameter_value(k, v));
            } else if k.eq_ignore_ascii_case(b"size") {
                ret.size = std::str::from_utf8(v).ok().and_then(|s| s.parse().ok());
            }
        }
        Ok((input, ret))
    }
}

pub mod encodings {
    //! Email encodings (quoted printable, `MIME`).
    use data_encoding::BASE64_MIME;

    use super::*;
    use crate::email::attachment_types::Charset;

    pub fn quoted_printable_byte(input: &[u8]) -> IResult<&[u8], u8> {
        if input.len() < 3 {
            Err(nom::Err::Error(
                (
                    input,
                    "quoted_printable_byte(): input too short to be quoted_printable",
                )
                    .into(),
            ))
        } else if input[0] == b'=' && is_hex_digit(input[1]) && is_hex_digit(input[2]) {
            let a = if input[1] < b':' {
                input[1] - 48
            } else if input[1] < b'[' {
                input[1] - 55
            } else {
                input[1] - 87
            };
            let b = if input[2] < b':' {
                input[2] - 48
            } else if input[2] < b'[' {
                input[2] - 55
            } else {
                input[2] - 87
            };
            Ok((&input[3..], a * 16 + b))
        } else if input.starts_with(b"\r\n") {
            Ok((&input[2..], b'\n'))
        } else {
            Err(nom::Err::Error(
                (input, "quoted_printable_byte(): invalid input").into(),
            ))
        }
    }

    /// Decode base64 content, ignoring line breaks and other whitespace.
    pub fn base64(input: &[u8]) -> Result<Vec<u8>> {
        let filtered: Vec<u8> = input
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        Ok(BASE64_MIME.decode(&filtered)?)
    }

    /* Encoded words
     *"=?charset?encoding?encoded text?=".
     */
    fn encoded_word(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
        if input.is_empty() {
            return Ok((&[], Vec::with_capacity(0)));
        }
        if input.len() < 5 {
            return Err(nom::Err::Error(
                (input, "encoded_word(): input too short to be encoded_word").into(),
            ));
        } else if input[0] != b'=' || input[1] != b'?' {
            return Err(nom::Err::Error(
                (input, "encoded_word(): invalid input").into(),
            ));
        }
        /* find end of Charset tag:
         * =?charset?encoding?encoded text?=
         * ---------^
         */
        let Some(tag_end_idx) = input[2..].iter().position(|b| *b == b'?').map(|i| i + 2) else {
            return Err(nom::Err::Error(
                (input, "encoded_word(): expected end tag").into(),
            ));
        };

        if tag_end_idx + 2 >= input.len() || input[2 + tag_end_idx] != b'?' {
            return Err(nom::Err::Error(
                (input, "encoded_word(): expected valid end tag").into(),
            ));
        }
        /* See if input ends with "?=" and get ending index
         * =?charset?encoding?encoded text?=
         * -------------------------------^
         */
        let Some(encoded_end_idx) = ((3 + tag_end_idx)..input.len())
            .find(|&i| input[i] == b'?' && i + 1 < input.len() && input[i + 1] == b'=')
        else {
            return Err(nom::Err::Error(
                (input, "encoded_word(): expected input after end tag").into(),
            ));
        };
        let encoded_text = &input[3 + tag_end_idx..encoded_end_idx];

        let s: Vec<u8> = match input[tag_end_idx + 1] {
            b'b' | b'B' => BASE64_MIME
                .decode(encoded_text)
                .map_or_else(|_| encoded_text.to_vec(), |v| v),
            b'q' | b'Q' => match quoted_printable_bytes_header(encoded_text) {
                Ok((b"", s)) => s,
                _ => {
                    return Err(nom::Err::Error(
                        (input, "encoded_word(): invalid quoted_printable").into(),
                    ))
                }
            },
            _ => {
                return Err(nom::Err::Error(
                    (input, "encoded_word(): expected 'b|q'").into(),
                ))
            }
        };

        let charset = Charset::from(&input[2..tag_end_idx]);

        if Charset::UTF8 == charset {
            Ok((&input[encoded_end_idx + 2..], s))
        } else {
            decode_charset(&s, charset).map_or_else(
                |_| {
                    Err(nom::Err::Error(
                        (
                            input,
                            format!("encoded_word(): could not decode charset {}", charset),
                        )
                            .into(),
                    ))
                },
                |v| Ok((&input[encoded_end_idx + 2..], v.into_bytes())),
            )
        }
    }

    /// Convert `s` from `charset` to UTF-8. Fails on malformed input.
    pub fn decode_charset(s: &[u8], charset: Charset) -> Result<String> {
        match charset {
            Charset::UTF8 | Charset::Ascii => Ok(String::from_utf8_lossy(s).into_owned()),
            Charset::Encoding(encoding) => {
                let (ret, had_errors) = encoding.decode_without_bom_handling(s);
                if had_errors {
                    Err(Error::new(format!(
                        "Could not decode text as {}",
                        encoding.name()
                    ))
                    .set_kind(LilErrorKind::Decode))
                } else {
                    Ok(ret.into_owned())
                }
            }
        }
    }

    fn quoted_printable_soft_break(input: &[u8]) -> IResult<&[u8], u8> {
        if input.starts_with(b"=\n") {
            Ok((&input[2..], input[1]))
        } else if input.starts_with(b"=\r\n") {
            Ok((&input[3..], input[2]))
        } else {
            Err(nom::Err::Error(
                (input, "quoted_printable_soft_break(): invalid input").into(),
            ))
        }
    }

    pub fn qp_underscore_header(input: &[u8]) -> IResult<&[u8], u8> {
        let (rest, _) = tag(b"_")(input)?;
        Ok((rest, 0x20))
    }

    // With MIME, headers in quoted printable format can contain underscores that
    // represent spaces. In non-header context, an underscore is just a plain
    // underscore.
    pub fn quoted_printable_bytes_header(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
        many0(alt((quoted_printable_byte, qp_underscore_header, le_u8)))(input)
    }

    /// Decode a quoted-printable body. Soft line breaks are removed.
    pub fn quoted_printable_bytes(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
        let mut ret = Vec::with_capacity(input.len());
        let mut input = input;
        while !input.is_empty() {
            if let Ok((rest, _)) = quoted_printable_soft_break(input) {
                input = rest;
            } else if let Ok((rest, b)) = quoted_printable_byte(input) {
                ret.push(b);
                input = rest;
            } else {
                ret.push(input[0]);
                input = &input[1..];
            }
        }
        Ok((input, ret))
    }

    pub fn ascii_token(input: &[u8]) -> IResult<&[u8], SmallVec<[u8; 64]>> {
        let (input, word) = alt((
            terminated(take_until(" =?"), peek(preceded(tag(b" "), encoded_word))),
            take_while(|_| true),
        ))(input)?;
        Ok((input, SmallVec::from(word)))
    }

    /// Decode a header phrase that may contain RFC 2047 encoded words.
    /// Whitespace between adjacent encoded words is dropped.
    pub fn phrase(
        input: &[u8],
        multiline: /* preserve newlines */ bool,
    ) -> IResult<&[u8], Vec<u8>> {
        if input.is_empty() {
            return Ok((&[], Vec::with_capacity(0)));
        }

        let mut input = input.ltrim();
        let mut acc: Vec<u8> = Vec::new();
        let mut ptr = 0;

        while ptr < input.len() {
            let mut flag = false;
            // Check if word is encoded.
            while let Ok((rest, v)) = encoded_word(&input[ptr..]) {
                if rest.len() == input[ptr..].len() {
                    break;
                }
                flag = true;
                input = rest;
                ptr = 0;
                acc.extend(v);

                // consume whitespace
                while ptr < input.len() && (is_whitespace!(input[ptr])) {
                    ptr += 1;
                }

                if ptr >= input.len() {
                    break;
                }
            }
            if ptr >= input.len() {
                break;
            }
            if flag && ptr != 0 {
                acc.push(b' ');
            }
            let end = input[ptr..].find(b"=?");

            let end = end.unwrap_or(input.len() - ptr) + ptr;
            let ascii_s = ptr;
            let mut ascii_e = 0;

            while ptr < end && !(is_whitespace!(input[ptr])) {
                ptr += 1;
            }
            if !multiline {
                ascii_e = ptr;
            }

            while ptr < input.len() && (is_whitespace!(input[ptr])) {
                ptr += 1;
            }
            if multiline {
                ascii_e = ptr;
            }
            if ptr >= input.len() {
                acc.extend(ascii_token(&input[ascii_s..ascii_e])?.1);
                break;
            }
            if ascii_s >= ascii_e {
                /* We have the start of an encoded word but not the end, so parse it as ascii */
                ascii_e = input[ascii_s..]
                    .find(b" ")
                    .map(|i| i + ascii_s)
                    .unwrap_or(input.len());
                ptr = ascii_e;
            }
            if ascii_s >= ascii_e {
                return Err(nom::Err::Error(
                    (input, "phrase(): start of an encoded word but no end").into(),
                ));
            }

            acc.extend(ascii_token(&input[ascii_s..ascii_e])?.1);
            if ptr != ascii_e {
                acc.push(b' ');
            }
        }
        Ok((&input[ptr.min(input.len())..], acc))
    }
}

pub mod address {
    //! Parsing of address values and address-related headers.
    use super::*;
    use crate::email::address::Address;

    /// Split an address list on commas that are not inside quotes, comments or
    /// angle brackets.
    fn split_list(input: &[u8]) -> Vec<&[u8]> {
        let mut ret = vec![];
        let (mut in_quotes, mut comment_depth, mut in_angle) = (false, 0_usize, false);
        let mut escaped = false;
        let mut start = 0;
        for (i, b) in input.iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match *b {
                b'\\' if in_quotes => escaped = true,
                b'"' if comment_depth == 0 => in_quotes = !in_quotes,
                b'(' if !in_quotes => comment_depth += 1,
                b')' if !in_quotes && comment_depth > 0 => comment_depth -= 1,
                b'<' if !in_quotes && comment_depth == 0 => in_angle = true,
                b'>' if !in_quotes && comment_depth == 0 => in_angle = false,
                b',' | b';' if !in_quotes && comment_depth == 0 && !in_angle => {
                    ret.push(&input[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        ret.push(&input[start..]);
        ret
    }

    fn decode_display_name(raw: &[u8]) -> String {
        let raw = raw.trim();
        let raw = if raw.is_quoted() {
            &raw[1..raw.len() - 1]
        } else {
            raw
        };
        let decoded = encodings::phrase(raw, false)
            .map(|(_, v)| v)
            .unwrap_or_else(|_| raw.to_vec());
        String::from_utf8_lossy(&decoded)
            .replace("\\\"", "\"")
            .trim()
            .to_string()
    }

    fn mailbox(item: &[u8]) -> Option<Address> {
        let mut item = item.trim();
        /* group syntax: `display-name: mailbox-list;` */
        if let Some(colon) = item.iter().position(|b| *b == b':') {
            if !item[..colon].contains(&b'<') && !item[..colon].contains(&b'"') {
                item = item[colon + 1..].trim();
            }
        }
        if item.is_empty() {
            return None;
        }
        if let (Some(lt), Some(gt)) = (item.rfind(b"<"), item.rfind(b">")) {
            if lt < gt {
                let address = String::from_utf8_lossy(item[lt + 1..gt].trim()).into_owned();
                return Some(Address::new(decode_display_name(&item[..lt]), address));
            }
        }
        /* `user@example.com (Display Name)` */
        if let (Some(open), Some(close)) = (item.find(b"("), item.rfind(b")")) {
            if open < close {
                let address = String::from_utf8_lossy(item[..open].trim()).into_owned();
                return Some(Address::new(
                    decode_display_name(&item[open + 1..close]),
                    address,
                ));
            }
        }
        Some(Address::new(
            String::new(),
            String::from_utf8_lossy(item).into_owned(),
        ))
    }

    /// Parse a comma separated address list leniently. Entries that are empty
    /// are skipped.
    pub fn address_list(input: &[u8]) -> Vec<Address> {
        let input = headers::unfold(input);
        split_list(&input)
            .into_iter()
            .filter_map(mailbox)
            .filter(|a| !a.address.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_mail_headers_and_body() {
        let raw = b"From: a@b.c\r\nSubject: Hello\r\n there\r\nCc:\r\n\r\nbody\r\n";
        let (headers, body) = mail(raw).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers::get(&headers, "subject"), Some(&b"Hello\r\n there"[..]));
        assert_eq!(headers::unfold(headers::get(&headers, "subject").unwrap()).as_ref(), b"Hello there");
        assert_eq!(headers::get(&headers, "CC"), Some(&b""[..]));
        assert_eq!(body, b"body\r\n");
    }

    #[test]
    fn test_parser_mail_invalid() {
        let err = mail(b"not a header line at all").unwrap_err();
        assert_eq!(err.kind, LilErrorKind::Decode);
    }

    #[test]
    fn test_parser_parts() {
        let body = b"preamble\n--XYZ\nContent-Type: text/plain\n\nhi\n--XYZ\n\nsecond\r\n--XYZ--\nepilogue";
        let (_, parts) = attachments::parts(body, b"XYZ").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], b"Content-Type: text/plain\n\nhi");
        assert_eq!(parts[1], b"\nsecond");
        assert!(attachments::parts(b"no delimiters here", b"XYZ").is_err());
    }

    #[test]
    fn test_parser_content_type() {
        let (_, (t, s, params)) =
            attachments::content_type(b"multipart/mixed; boundary=\"abc def\"; charset=utf-8")
                .unwrap();
        assert_eq!(t, b"multipart");
        assert_eq!(s, b"mixed");
        assert_eq!(params, vec![(&b"boundary"[..], &b"abc def"[..]), (&b"charset"[..], &b"utf-8"[..])]);
    }

    #[test]
    fn test_parser_content_disposition() {
        let (_, d) = attachments::content_disposition(b"attachment; filename=\"a.txt\"").unwrap();
        assert!(d.kind.is_attachment());
        assert_eq!(d.filename.as_deref(), Some("a.txt"));
        let (_, d) =
            attachments::content_disposition(b"inline; filename*=utf-8''%E2%82%AC%20rates.txt")
                .unwrap();
        assert!(!d.kind.is_attachment());
        assert_eq!(d.filename.as_deref(), Some("\u{20ac} rates.txt"));
    }

    #[test]
    fn test_parser_encoded_words() {
        let (_, v) = encodings::phrase(b"=?UTF-8?B?w4lsb2RpZQ==?= <e@x.org>", false).unwrap();
        assert_eq!(String::from_utf8_lossy(&v), "\u{c9}lodie <e@x.org>");
        let (_, v) = encodings::phrase(b"=?iso-8859-1?q?caf=E9_au_lait?=", false).unwrap();
        assert_eq!(String::from_utf8_lossy(&v), "caf\u{e9} au lait");
        let (_, v) = encodings::phrase(b"plain words", false).unwrap();
        assert_eq!(v, b"plain words");
    }

    #[test]
    fn test_parser_quoted_printable() {
        let (_, v) = encodings::quoted_printable_bytes(b"caf=C3=A9 soft=\r\nbreak").unwrap();
        assert_eq!(String::from_utf8_lossy(&v), "caf\u{e9} softbreak");
        assert_eq!(encodings::base64(b"aGVs\r\nbG8=\r\n").unwrap(), b"hello");
        assert!(encodings::base64(b"!!!notbase64").is_err());
    }

    #[test]
    fn test_parser_address_list() {
        let list = address::address_list(
            b"\"Doe, John\" <john@example.com>, jane@example.com (Jane),\r\n =?UTF-8?Q?Ren=C3=A9?= <rene@example.com>, undisclosed-recipients:;",
        );
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].display_name, "Doe, John");
        assert_eq!(list[0].address, "john@example.com");
        assert_eq!(list[1].display_name, "Jane");
        assert_eq!(list[1].address, "jane@example.com");
        assert_eq!(list[2].display_name, "Ren\u{e9}");
    }
}
