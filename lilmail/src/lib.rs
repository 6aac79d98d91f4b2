/*
 * lilmail - lib.rs
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

#![deny(
    rustdoc::redundant_explicit_links,
    unsafe_op_in_unsafe_fn,
    /* groups */
    clippy::correctness,
    clippy::suspicious,
    clippy::complexity,
    clippy::perf,
    clippy::style,
    /* restriction */
    clippy::dbg_macro,
    clippy::rc_buffer,
    clippy::as_underscore,
    clippy::assertions_on_result_states,
    /* rustdoc */
    rustdoc::broken_intra_doc_links,
    /* pedantic */
    clippy::doc_markdown,
    clippy::expect_fun_call,
    clippy::or_fun_call,
    clippy::case_sensitive_file_extension_comparisons,
)]
#![allow(clippy::option_if_let_else, clippy::missing_const_for_fn)]
//! # lilmail
//!
//! The retrieval and threading engine of a small web mail client.
//!
//! - Speak IMAP over TLS to one mailbox server through a blocking
//!   [`ImapSession`](imap::ImapSession): folder listing and management,
//!   paginated and by-UID retrieval, flag mutation, move and delete. (see
//!   module [`imap`])
//! - Decode raw RFC 5322/MIME messages into normalized [`Message`] values
//!   with plain-text and sanitized HTML bodies and flat attachment lists.
//!   (see module [`email`])
//! - Build conversation threads out of a batch of messages via their
//!   `In-Reply-To` and `References` header values. (see module [`thread`])
//!
//! Other exports are
//! - Account configuration (see module [`conf`])
//! - Pagination envelopes (see module [`pagination`]) and client-side
//!   filtering (see module [`search`])

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod utils;
pub use utils::logging::{LogLevel, StderrLogger};

pub mod conf;
pub use conf::{AccountSettings, ImapServerConf};

pub mod email;
pub use email::{Address, Attachment, Flag, Message, RawMessage, UnixTimestamp};

pub mod imap;
pub use imap::{FolderInfo, FolderStatus, ImapSession, SessionState};

pub mod pagination;
pub use pagination::FolderPage;

pub mod search;

pub mod thread;
pub use thread::{SubjectPrefix, Thread, Threads};

#[macro_use]
extern crate serde_derive;
pub extern crate log;
/* parser */
extern crate data_encoding;
extern crate encoding_rs;
pub extern crate nom;

pub extern crate chrono;
pub extern crate indexmap;
pub extern crate smallvec;
pub extern crate uuid;
