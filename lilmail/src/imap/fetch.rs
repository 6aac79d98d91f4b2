/*
 * lilmail - imap/fetch.rs
 *
 * Copyright 2020 Manos Pitsidianakis
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

//! Streaming retrieval.
//!
//! A reader thread pulls FETCH records off the connection one at a time and
//! hands them over a bounded channel to the calling thread, which decodes
//! each record as it arrives. The channel bound caps how many raw messages
//! are held in memory at once.

use std::convert::TryFrom;

use crossbeam::channel::{bounded, Sender};

use super::{
    connection::ImapStream,
    protocol_parser::{self, ImapResponse},
};
use crate::{
    email::{parser::BytesExt, Message, RawMessage},
    error::{Error, ErrorKind, Result},
};

/// Data items requested for every retrieved message. `BODY.PEEK` leaves
/// `\Seen` alone.
pub const FETCH_ITEMS: &str = "(UID FLAGS ENVELOPE BODY.PEEK[])";

type FetchItem = (usize, Result<RawMessage>);

/// Outcome of one FETCH record.
#[derive(Debug)]
pub struct Fetched {
    pub message_sequence_number: usize,
    pub message: Result<Message>,
}

/// Send `command` and decode every message record of its response.
///
/// Per-record failures are returned in place. Failures of the exchange
/// itself (a `NO` completion, a dropped connection) are returned as `Err`
/// once the reader has stopped.
pub fn fetch_decoded(stream: &mut ImapStream, command: &str, capacity: usize) -> Result<Vec<Fetched>> {
    let (tx, rx) = bounded::<FetchItem>(capacity.max(1));
    let mut ret = Vec::new();
    let scope_result = crossbeam::scope(|scope| -> Result<()> {
        let reader = scope
            .builder()
            .name("lilmail-fetch".to_string())
            .spawn(move |_| read_records(stream, command, tx))?;
        for (message_sequence_number, raw) in rx.iter() {
            let message = raw.and_then(|raw| {
                Message::decode(&raw).map_err(|err| {
                    err.set_summary(format!("Could not decode message {}", raw.id))
                })
            });
            ret.push(Fetched {
                message_sequence_number,
                message,
            });
        }
        reader.join().unwrap_or_else(|_| {
            Err(Error::new("FETCH reader thread panicked.").set_kind(ErrorKind::Bug))
        })
    });
    match scope_result {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::new("FETCH reader thread panicked.").set_kind(ErrorKind::Bug));
        }
    }
    Ok(ret)
}

fn read_records(stream: &mut ImapStream, command: &str, tx: Sender<FetchItem>) -> Result<()> {
    stream.send_command(command.as_bytes())?;
    loop {
        let line = stream.read_line()?;
        if stream.is_completion(&line) {
            return ImapResponse::try_from(line.as_slice())?.into();
        }
        if !line.starts_with(protocol_parser::UNTAGGED_PREFIX)
            || !line.contains_subsequence(b" FETCH (")
        {
            imap_log!(
                trace,
                stream,
                "ignoring untagged response during fetch: {}",
                String::from_utf8_lossy(&line).trim()
            );
            continue;
        }
        let item = match protocol_parser::fetch_response(&line) {
            Ok((_, response)) if response.body.is_none() => {
                // Unsolicited flag update.
                imap_log!(
                    trace,
                    stream,
                    "ignoring FETCH without body for message {}",
                    response.message_sequence_number
                );
                continue;
            }
            Ok((_, response)) => (
                response.message_sequence_number,
                response.into_raw_message(),
            ),
            Err(err) => (0, Err(err)),
        };
        // The receiver is only gone if the caller panicked. Keep reading so
        // the stream ends on a command boundary.
        _ = tx.send(item);
    }
}

/// Keep the decoded messages, logging and dropping the rest.
pub fn skip_undecodable(fetched: Vec<Fetched>) -> Vec<(usize, Message)> {
    fetched
        .into_iter()
        .filter_map(|f| match f.message {
            Ok(message) => Some((f.message_sequence_number, message)),
            Err(err) => {
                log::warn!(
                    "Skipping message {}: {}",
                    f.message_sequence_number,
                    err.to_string().trim()
                );
                None
            }
        })
        .collect()
}
