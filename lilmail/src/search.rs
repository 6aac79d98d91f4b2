/*
 * lilmail - search.rs
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

//! Client-side filtering of already decoded messages.

use std::str::FromStr;

use chrono::NaiveDate;

use crate::{
    email::{Address, Message, UnixTimestamp},
    error::{Error, ErrorKind, Result},
    pagination::{FolderPage, PageSpec},
};

const DAY: UnixTimestamp = 60 * 60 * 24;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    #[default]
    All,
    From,
    To,
    Subject,
    Body,
}

impl FromStr for SearchField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "from" => Ok(Self::From),
            "to" => Ok(Self::To),
            "subject" => Ok(Self::Subject),
            "body" => Ok(Self::Body),
            other => Err(Error::new(format!("Unknown search field `{}`", other))
                .set_kind(ErrorKind::Validation)),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Case-insensitive substring. Empty matches everything.
    pub text: String,
    pub field: SearchField,
    pub has_attachment: Option<bool>,
    /// Inclusive lower bound.
    pub since: Option<UnixTimestamp>,
    /// Exclusive upper bound.
    pub before: Option<UnixTimestamp>,
}

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_day(s: &str) -> Result<UnixTimestamp> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|err| {
        Error::new(format!("Invalid date `{}`, expected YYYY-MM-DD", s))
            .set_details(err.to_string())
            .set_kind(ErrorKind::Validation)
    })?;
    let ts = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);
    Ok(ts.max(0) as UnixTimestamp)
}

impl SearchQuery {
    pub fn new<S: Into<String>>(text: S, field: SearchField) -> Self {
        Self {
            text: text.into(),
            field,
            ..Self::default()
        }
    }

    /// Restrict to messages dated from the start of `from` to the end of
    /// `to`, both `YYYY-MM-DD`. Empty strings leave that side open.
    pub fn with_date_range(mut self, from: &str, to: &str) -> Result<Self> {
        if !from.trim().is_empty() {
            self.since = Some(parse_day(from)?);
        }
        if !to.trim().is_empty() {
            self.before = Some(parse_day(to)? + DAY);
        }
        Ok(self)
    }

    pub fn with_attachment(mut self, has_attachment: bool) -> Self {
        self.has_attachment = Some(has_attachment);
        self
    }

    pub fn is_match(&self, message: &Message) -> bool {
        if let Some(wanted) = self.has_attachment {
            if message.has_attachments != wanted {
                return false;
            }
        }
        if self.since.is_some_and(|since| message.timestamp < since) {
            return false;
        }
        if self.before.is_some_and(|before| message.timestamp >= before) {
            return false;
        }
        let needle = self.text.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let contains = |haystack: &str| haystack.to_lowercase().contains(&needle);
        let any_address = |list: &[Address]| {
            list.iter()
                .any(|a| contains(&a.address) || contains(&a.display_name))
        };
        match self.field {
            SearchField::From => any_address(std::slice::from_ref(&message.from)),
            SearchField::To => any_address(&message.to) || any_address(&message.cc),
            SearchField::Subject => contains(&message.subject),
            SearchField::Body => contains(&message.text_body),
            SearchField::All => {
                contains(&message.subject)
                    || contains(&message.text_body)
                    || any_address(std::slice::from_ref(&message.from))
                    || any_address(&message.to)
                    || any_address(&message.cc)
            }
        }
    }
}

/// Messages matching `query`, in their original order.
pub fn filter(messages: Vec<Message>, query: &SearchQuery) -> Vec<Message> {
    messages.into_iter().filter(|m| query.is_match(m)).collect()
}

/// Page through `matches`, which are expected newest first.
pub fn paginate(mut matches: Vec<Message>, page: usize, page_size: usize) -> Result<FolderPage> {
    let spec = PageSpec::new(page, page_size, matches.len())?;
    let range = spec.slice_range();
    matches.truncate(range.end);
    let messages = matches.split_off(range.start);
    Ok(spec.into_page(messages))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, subject: &str, from: &str, body: &str, ts: UnixTimestamp) -> Message {
        Message {
            id: id.to_string(),
            subject: subject.to_string(),
            from: Address::new("Sender Name".into(), from.to_string()),
            to: vec![Address::new(String::new(), "team@example.com".into())],
            text_body: body.to_string(),
            timestamp: ts,
            ..Message::default()
        }
    }

    fn batch() -> Vec<Message> {
        vec![
            message("3", "Invoice March", "billing@shop.example", "Amount due", 1_710_000_000),
            message("2", "Lunch?", "friend@example.com", "Pizza at noon", 1_700_000_000),
            message("1", "Re: invoice", "me@example.com", "paid already", 1_690_000_000),
        ]
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_search_fields() {
        let q = SearchQuery::new("INVOICE", SearchField::Subject);
        assert_eq!(ids(&filter(batch(), &q)), vec!["3", "1"]);
        let q = SearchQuery::new("pizza", SearchField::Body);
        assert_eq!(ids(&filter(batch(), &q)), vec!["2"]);
        let q = SearchQuery::new("shop.example", SearchField::From);
        assert_eq!(ids(&filter(batch(), &q)), vec!["3"]);
        let q = SearchQuery::new("team@", SearchField::To);
        assert_eq!(filter(batch(), &q).len(), 3);
        let q = SearchQuery::new("sender name", SearchField::All);
        assert_eq!(filter(batch(), &q).len(), 3);
        let q = SearchQuery::new("nothing like this", SearchField::All);
        assert!(filter(batch(), &q).is_empty());
        assert_eq!(filter(batch(), &SearchQuery::default()).len(), 3);
    }

    #[test]
    fn test_search_dates_and_attachments() {
        /* 2023-11-14 is 1_699_920_000 */
        let q = SearchQuery::default()
            .with_date_range("2023-11-14", "2023-11-14")
            .unwrap();
        assert_eq!(ids(&filter(batch(), &q)), vec!["2"]);
        let q = SearchQuery::default().with_date_range("", "2023-11-13").unwrap();
        assert_eq!(ids(&filter(batch(), &q)), vec!["1"]);
        assert_eq!(
            SearchQuery::default()
                .with_date_range("14/11/2023", "")
                .unwrap_err()
                .kind,
            ErrorKind::Validation
        );

        let mut messages = batch();
        messages[1].has_attachments = true;
        let q = SearchQuery::default().with_attachment(true);
        assert_eq!(ids(&filter(messages.clone(), &q)), vec!["2"]);
        let q = SearchQuery::default().with_attachment(false);
        assert_eq!(ids(&filter(messages, &q)), vec!["3", "1"]);
    }

    #[test]
    fn test_search_field_from_str() {
        assert_eq!(SearchField::from_str("Subject").unwrap(), SearchField::Subject);
        assert_eq!(SearchField::from_str("").unwrap(), SearchField::All);
        assert!(SearchField::from_str("headers").is_err());
    }

    #[test]
    fn test_search_paginate() {
        let page = paginate(batch(), 2, 2).unwrap();
        assert_eq!(ids(&page.messages), vec!["1"]);
        assert_eq!(page.total_pages, 2);
        assert!(page.has_prev);
        assert!(!page.has_next);

        let page = paginate(batch(), 7, 2).unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(ids(&page.messages), vec!["1"]);

        let page = paginate(vec![], 1, 20).unwrap();
        assert_eq!(page.total_pages, 1);
        assert!(page.messages.is_empty());
        assert!(paginate(batch(), 1, 0).is_err());
    }
}
