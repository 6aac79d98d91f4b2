/*
 * lilmail - email/address.rs
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

//! Email addresses.

use std::fmt;

use super::parser;

/// A single mailbox: an optional display name and an `addr-spec`.
///
/// Two addresses are considered equal when their `addr-spec` parts match
/// case-insensitively; display names are ignored.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Address {
    pub display_name: String,
    pub address: String,
}

impl Address {
    pub fn new(display_name: String, address: String) -> Self {
        Self {
            display_name,
            address,
        }
    }

    /// Parse a comma separated list. Malformed entries are skipped.
    pub fn list_try_from<T: AsRef<[u8]>>(val: T) -> Vec<Self> {
        parser::address::address_list(val.as_ref())
    }

    pub fn get_email(&self) -> &str {
        &self.address
    }

    /// The display name, or the address when there is none.
    pub fn get_fqdn_or_address(&self) -> &str {
        if self.display_name.is_empty() {
            &self.address
        } else {
            &self.display_name
        }
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.to_ascii_lowercase().hash(state)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.address)
        } else if self
            .display_name
            .contains(|c: char| matches!(c, ',' | ';' | '<' | '>' | '"' | '@' | ':'))
        {
            write!(
                f,
                "\"{}\" <{}>",
                self.display_name.replace('"', "\\\""),
                self.address
            )
        } else {
            write!(f, "{} <{}>", self.display_name, self.address)
        }
    }
}
