/*
 * lilmail - IMAP session tests against a local server.
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

use std::time::Duration;

use lilmail::{
    error::{ErrorKind, ProtocolErrorKind},
    imap::{ImapSession, SessionState},
    search::{SearchField, SearchQuery},
    Flag, ImapServerConf,
};
use server::{mail, Server, ServerState};

pub mod server {
    //! A plaintext IMAP4rev1 server over an in-memory store, speaking just
    //! enough of the protocol for the session under test.

    use std::{
        io::{BufRead, BufReader, Write},
        net::{TcpListener, TcpStream},
        sync::{Arc, Mutex},
        thread,
    };

    use lilmail::{imap::UID, indexmap::IndexMap};

    pub const USERNAME: &str = "user@example.com";
    pub const PASSWORD: &str = "hunter2";

    #[derive(Clone, Debug)]
    pub struct Mail {
        pub uid: UID,
        pub flags: Vec<String>,
        pub body: Vec<u8>,
    }

    #[derive(Debug)]
    pub struct ServerState {
        pub folders: IndexMap<String, Vec<Mail>>,
        pub next_uid: UID,
        pub capabilities: String,
        /// Answer every expunge with `NO`.
        pub fail_expunge: bool,
        /// Answer `SELECT`/`EXAMINE` with `BYE` and hang up.
        pub bye_on_select: bool,
        /// Every command received, without its tag.
        pub log: Vec<String>,
    }

    impl Default for ServerState {
        fn default() -> Self {
            let mut folders = IndexMap::default();
            folders.insert("INBOX".to_string(), vec![]);
            folders.insert("Archive".to_string(), vec![]);
            folders.insert("Sent".to_string(), vec![]);
            Self {
                folders,
                next_uid: 1,
                capabilities: "IMAP4rev1 UIDPLUS".to_string(),
                fail_expunge: false,
                bye_on_select: false,
                log: vec![],
            }
        }
    }

    impl ServerState {
        pub fn insert(&mut self, folder: &str, body: Vec<u8>) -> UID {
            let uid = self.next_uid;
            self.next_uid += 1;
            self.folders
                .entry(folder.to_string())
                .or_default()
                .push(Mail {
                    uid,
                    flags: vec![],
                    body,
                });
            uid
        }

        pub fn uids(&self, folder: &str) -> Vec<UID> {
            self.folders
                .get(folder)
                .map(|f| f.iter().map(|m| m.uid).collect())
                .unwrap_or_default()
        }

        pub fn flags(&self, folder: &str, uid: UID) -> Vec<String> {
            self.folders[folder]
                .iter()
                .find(|m| m.uid == uid)
                .map(|m| m.flags.clone())
                .unwrap_or_default()
        }

        pub fn received(&self, verb: &str) -> bool {
            self.log.iter().any(|l| l.starts_with(verb))
        }
    }

    /// A minimal RFC 5322 message.
    pub fn mail(subject: &str, message_id: &str, references: &str, date: &str) -> Vec<u8> {
        let mut ret = format!(
            "From: Sender <sender@example.com>\r\nTo: rcpt@example.com\r\nSubject: {}\r\nMessage-ID: {}\r\nDate: {}\r\n",
            subject, message_id, date
        );
        if !references.is_empty() {
            ret.push_str(&format!(
                "References: {}\r\nIn-Reply-To: {}\r\n",
                references,
                references.split_whitespace().last().unwrap()
            ));
        }
        ret.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\nbody of ");
        ret.push_str(subject);
        ret.push_str("\r\n");
        ret.into_bytes()
    }

    pub struct Server {
        pub port: u16,
        pub state: Arc<Mutex<ServerState>>,
    }

    impl Server {
        pub fn start(state: ServerState) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let state = Arc::new(Mutex::new(state));
            let st = state.clone();
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else {
                        return;
                    };
                    let st = st.clone();
                    thread::spawn(move || serve(stream, st));
                }
            });
            Self { port, state }
        }
    }

    struct Reply {
        untagged: Vec<Vec<u8>>,
        /// `None` hangs up without a tagged completion.
        status: Option<String>,
        close: bool,
    }

    impl Reply {
        fn ok(status: &str) -> Self {
            Self {
                untagged: vec![],
                status: Some(status.to_string()),
                close: false,
            }
        }

        fn with(mut self, line: String) -> Self {
            self.untagged.push(line.into_bytes());
            self
        }
    }

    fn serve(stream: TcpStream, state: Arc<Mutex<ServerState>>) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let greeting = format!(
            "* OK [CAPABILITY {}] test server ready\r\n",
            state.lock().unwrap().capabilities
        );
        writer.write_all(greeting.as_bytes()).unwrap();
        let mut selected: Option<String> = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            let line = line.trim_end();
            let Some((tag, command)) = line.split_once(' ') else {
                return;
            };
            let reply = {
                let mut state = state.lock().unwrap();
                state.log.push(command.to_string());
                handle(&mut state, &mut selected, &tokenize(command))
            };
            for u in reply.untagged {
                writer.write_all(&u).unwrap();
                writer.write_all(b"\r\n").unwrap();
            }
            if let Some(status) = reply.status {
                writer
                    .write_all(format!("{} {}\r\n", tag, status).as_bytes())
                    .unwrap();
            }
            if reply.close {
                return;
            }
        }
    }

    /// Split on spaces, keeping quoted strings (unescaped) and parenthesized
    /// lists whole.
    fn tokenize(command: &str) -> Vec<String> {
        let mut ret = vec![];
        let mut chars = command.chars().peekable();
        while let Some(&c) = chars.peek() {
            match c {
                ' ' => {
                    chars.next();
                }
                '"' => {
                    chars.next();
                    let mut s = String::new();
                    while let Some(c) = chars.next() {
                        match c {
                            '\\' => s.extend(chars.next()),
                            '"' => break,
                            c => s.push(c),
                        }
                    }
                    ret.push(s);
                }
                '(' => {
                    let mut s = String::new();
                    for c in chars.by_ref() {
                        s.push(c);
                        if c == ')' {
                            break;
                        }
                    }
                    ret.push(s);
                }
                _ => {
                    let mut s = String::new();
                    while let Some(&c) = chars.peek() {
                        if c == ' ' {
                            break;
                        }
                        s.push(c);
                        chars.next();
                    }
                    ret.push(s);
                }
            }
        }
        ret
    }

    fn fetch_record(seq: usize, mail: &Mail) -> Vec<u8> {
        let mut ret = format!(
            "* {} FETCH (UID {} FLAGS ({}) BODY[] {{{}}}\r\n",
            seq,
            mail.uid,
            mail.flags.join(" "),
            mail.body.len()
        )
        .into_bytes();
        ret.extend_from_slice(&mail.body);
        ret.push(b')');
        ret
    }

    fn uid_set(set: &str) -> Vec<UID> {
        set.split(',').filter_map(|s| s.parse().ok()).collect()
    }

    fn handle(state: &mut ServerState, selected: &mut Option<String>, args: &[String]) -> Reply {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let caps = state.capabilities.clone();
        match args.as_slice() {
            ["CAPABILITY"] => Reply::ok("OK done").with(format!("* CAPABILITY {}", caps)),
            ["LOGIN", user, pass] if *user == USERNAME && *pass == PASSWORD => {
                Reply::ok(&format!("OK [CAPABILITY {}] Logged in", caps))
            }
            ["LOGIN", ..] => Reply::ok("NO [AUTHENTICATIONFAILED] Invalid credentials"),
            ["LOGOUT"] => Reply {
                close: true,
                ..Reply::ok("OK Logout completed").with("* BYE Logging out".to_string())
            },
            ["LIST", "", "*"] => {
                let mut reply = Reply::ok("OK List completed");
                for name in state.folders.keys() {
                    reply = reply.with(format!("* LIST (\\HasNoChildren) \"/\" \"{}\"", name));
                }
                reply
            }
            [verb @ ("SELECT" | "EXAMINE"), name] => {
                if state.bye_on_select {
                    return Reply {
                        untagged: vec![b"* BYE Server shutting down".to_vec()],
                        status: None,
                        close: true,
                    };
                }
                let Some(folder) = state.folders.get(*name) else {
                    *selected = None;
                    return Reply::ok("NO [NONEXISTENT] Unknown folder");
                };
                *selected = Some(name.to_string());
                let status = if *verb == "SELECT" {
                    "OK [READ-WRITE] SELECT completed"
                } else {
                    "OK [READ-ONLY] EXAMINE completed"
                };
                Reply::ok(status)
                    .with(format!("* {} EXISTS", folder.len()))
                    .with("* 0 RECENT".to_string())
                    .with("* OK [UIDVALIDITY 1] UIDs valid".to_string())
                    .with(format!("* OK [UIDNEXT {}] Predicted next UID", state.next_uid))
                    .with("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)".to_string())
                    .with("* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited".to_string())
            }
            ["FETCH", range, _items] => {
                let folder = &state.folders[selected.as_deref().unwrap()];
                let (start, end) = range.split_once(':').unwrap();
                let (start, end): (usize, usize) = (start.parse().unwrap(), end.parse().unwrap());
                let mut reply = Reply::ok("OK Fetch completed");
                for seq in start..=end.min(folder.len()) {
                    reply.untagged.push(fetch_record(seq, &folder[seq - 1]));
                }
                reply
            }
            ["UID", "FETCH", set, _items] => {
                let folder = &state.folders[selected.as_deref().unwrap()];
                let uids = uid_set(set);
                let mut reply = Reply::ok("OK Fetch completed");
                for (i, m) in folder.iter().enumerate() {
                    if uids.contains(&m.uid) {
                        reply.untagged.push(fetch_record(i + 1, m));
                    }
                }
                reply
            }
            ["UID", "SEARCH", "UID", uid] => {
                let uid: UID = uid.parse().unwrap();
                let found = state.folders[selected.as_deref().unwrap()]
                    .iter()
                    .any(|m| m.uid == uid);
                Reply::ok("OK Search completed").with(if found {
                    format!("* SEARCH {}", uid)
                } else {
                    "* SEARCH".to_string()
                })
            }
            ["UID", "STORE", uid, op, list] => {
                let uid: UID = uid.parse().unwrap();
                let flags: Vec<String> = list
                    .trim_matches(|c| c == '(' || c == ')')
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                let folder = state.folders.get_mut(selected.as_deref().unwrap()).unwrap();
                if let Some(m) = folder.iter_mut().find(|m| m.uid == uid) {
                    m.flags.retain(|f| !flags.contains(f));
                    if op.starts_with('+') {
                        m.flags.extend(flags);
                    }
                }
                Reply::ok("OK Store completed")
            }
            ["UID", "EXPUNGE", _] | ["EXPUNGE"] if state.fail_expunge => {
                Reply::ok("NO [EXPUNGEISSUED] Expunge failed")
            }
            ["UID", "EXPUNGE", uid] => {
                let uid: UID = uid.parse().unwrap();
                let folder = state.folders.get_mut(selected.as_deref().unwrap()).unwrap();
                let mut reply = Reply::ok("OK Expunge completed");
                if let Some(pos) = folder
                    .iter()
                    .position(|m| m.uid == uid && m.flags.iter().any(|f| f == "\\Deleted"))
                {
                    folder.remove(pos);
                    reply = reply.with(format!("* {} EXPUNGE", pos + 1));
                }
                reply
            }
            ["UID", "COPY", uid, target] => {
                let uid: UID = uid.parse().unwrap();
                if !state.folders.contains_key(*target) {
                    return Reply::ok("NO [TRYCREATE] No such folder");
                }
                let Some(mut m) = state.folders[selected.as_deref().unwrap()]
                    .iter()
                    .find(|m| m.uid == uid)
                    .cloned()
                else {
                    return Reply::ok("NO No such message");
                };
                m.uid = state.next_uid;
                state.next_uid += 1;
                let status = format!("OK [COPYUID 1 {} {}] Copy completed", uid, m.uid);
                state.folders.get_mut(*target).unwrap().push(m);
                Reply::ok(&status)
            }
            ["CREATE", name] => {
                if state.folders.contains_key(*name) {
                    return Reply::ok("NO [ALREADYEXISTS] Folder exists");
                }
                state.folders.insert(name.to_string(), vec![]);
                Reply::ok("OK Create completed")
            }
            ["DELETE", name] => match state.folders.shift_remove(*name) {
                Some(_) => Reply::ok("OK Delete completed"),
                None => Reply::ok("NO [NONEXISTENT] Unknown folder"),
            },
            ["RENAME", from, to] => match state.folders.shift_remove(*from) {
                Some(f) => {
                    state.folders.insert(to.to_string(), f);
                    Reply::ok("OK Rename completed")
                }
                None => Reply::ok("NO [NONEXISTENT] Unknown folder"),
            },
            _ => Reply::ok("BAD Unknown command"),
        }
    }
}

fn conf(port: u16, password: &str) -> ImapServerConf {
    ImapServerConf {
        server_hostname: "127.0.0.1".to_string(),
        server_username: server::USERNAME.to_string(),
        server_password: password.to_string(),
        server_port: port,
        use_tls: false,
        danger_accept_invalid_certs: false,
        timeout: Some(Duration::from_secs(5)),
        fetch_channel_capacity: 2,
    }
}

/// INBOX holds five messages with UIDs 1 to 5.
fn start() -> Server {
    let mut state = ServerState::default();
    for i in 1..=5 {
        state.insert(
            "INBOX",
            mail(
                &format!("message {}", i),
                &format!("<{}@example.com>", i),
                "",
                &format!("Mon, {} Jan 2024 10:00:00 +0000", i),
            ),
        );
    }
    Server::start(state)
}

fn open(server: &Server) -> ImapSession {
    ImapSession::open(conf(server.port, server::PASSWORD)).unwrap()
}

fn ids(messages: &[lilmail::Message]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}

#[test]
fn test_imap_login() {
    let server = start();
    let mut session = open(&server);
    assert_eq!(session.state(), SessionState::Authenticated);
    assert!(session
        .capabilities()
        .unwrap()
        .iter()
        .any(|c| &c[..] == b"UIDPLUS"));
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(server.state.lock().unwrap().received("LOGOUT"));

    let err = ImapSession::open(conf(server.port, "wrong")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);

    let err = ImapSession::open(conf(server.port, "")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = ImapSession::open(conf(port, server::PASSWORD)).unwrap_err();
    assert!(err.kind.is_network(), "{:?}", err);
    assert!(err.kind.is_retryable());
}

#[test]
fn test_imap_login_disabled() {
    let server = Server::start(ServerState {
        capabilities: "IMAP4rev1 LOGINDISABLED STARTTLS".to_string(),
        ..ServerState::default()
    });
    let err = ImapSession::open(conf(server.port, server::PASSWORD)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert!(!server.state.lock().unwrap().received("LOGIN"));
}

#[test]
fn test_imap_state_machine() {
    let server = start();
    let mut session = ImapSession::new(conf(server.port, server::PASSWORD));
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert_eq!(
        session.fetch_page("INBOX", 1, 20).unwrap_err().kind,
        ErrorKind::NotConnected
    );
    assert_eq!(
        session.list_folders().unwrap_err().kind,
        ErrorKind::NotConnected
    );

    session.connect().unwrap();
    session.connect().unwrap();
    assert!(session.is_authenticated());
    assert_eq!(session.select_folder("INBOX", false).unwrap().exists, 5);

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        session.fetch_recent("INBOX", 3).unwrap_err().kind,
        ErrorKind::NotConnected
    );
    assert_eq!(session.connect().unwrap_err().kind, ErrorKind::NotConnected);
}

#[test]
fn test_imap_bye_closes_session() {
    let server = Server::start(ServerState {
        bye_on_select: true,
        ..ServerState::default()
    });
    let mut session = open(&server);
    let err = session.select_folder("INBOX", true).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Protocol(ProtocolErrorKind::Disconnected));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        session.fetch_page("INBOX", 1, 1).unwrap_err().kind,
        ErrorKind::NotConnected
    );
    session.close();
}

#[test]
fn test_imap_list_and_select() {
    let server = start();
    let mut session = open(&server);
    let names = session
        .list_folders()
        .unwrap()
        .map(|f| f.unwrap().name)
        .collect::<Vec<String>>();
    assert_eq!(names, vec!["INBOX", "Archive", "Sent"]);

    {
        let mut folders = session.list_folders().unwrap();
        let first = folders.next().unwrap().unwrap();
        assert_eq!(first.delimiter, Some('/'));
        assert!(first.is_selectable());
        /* The rest is drained on drop. */
    }
    let status = session.select_folder("INBOX", true).unwrap();
    assert_eq!(status.name, "INBOX");
    assert_eq!(status.exists, 5);
    assert_eq!(status.uidnext, 6);
    assert!(status.read_only);
    assert!(status.permanent_flags.contains(Flag::SEEN | Flag::TRASHED));

    let err = session.select_folder("Nope", false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(session.is_authenticated());
    assert_eq!(
        session.select_folder(" ", false).unwrap_err().kind,
        ErrorKind::Validation
    );
}

#[test]
fn test_imap_fetch_page() {
    let server = start();
    let mut session = open(&server);

    let page = session.fetch_page("INBOX", 1, 2).unwrap();
    assert_eq!(ids(&page.messages), vec!["5", "4"]);
    assert_eq!(page.messages[0].subject, "message 5");
    assert_eq!(page.messages[0].text_body.trim(), "body of message 5");
    assert_eq!(page.total_messages, 5);
    assert_eq!(page.total_pages, 3);
    assert!(page.has_next);
    assert!(!page.has_prev);

    let page = session.fetch_page("INBOX", 9, 2).unwrap();
    assert_eq!(page.page, 3);
    assert_eq!(ids(&page.messages), vec!["1"]);
    assert!(!page.has_next);
    assert!(page.has_prev);

    assert_eq!(
        session.fetch_page("INBOX", 1, 0).unwrap_err().kind,
        ErrorKind::Validation
    );
    assert!(!server.state.lock().unwrap().received("FETCH 1:0"));

    let page = session.fetch_page("Archive", 1, 20).unwrap();
    assert_eq!(page.total_pages, 1);
    assert!(page.messages.is_empty());
    assert!(!page.has_next && !page.has_prev);

    assert_eq!(
        session.fetch_page("Nope", 1, 20).unwrap_err().kind,
        ErrorKind::NotFound
    );

    let recent = session.fetch_recent("INBOX", 3).unwrap();
    assert_eq!(ids(&recent), vec!["5", "4", "3"]);
    assert_eq!(session.fetch_recent("INBOX", 50).unwrap().len(), 5);

    /* Retrieval does not mark anything seen. */
    assert!(server.state.lock().unwrap().flags("INBOX", 5).is_empty());
}

#[test]
fn test_imap_fetch_skips_undecodable() {
    let mut state = ServerState::default();
    state.insert("INBOX", mail("good one", "<g1@x>", "", "Mon, 1 Jan 2024 10:00:00 +0000"));
    let broken = state.insert(
        "INBOX",
        b"Subject: broken\r\nContent-Type: multipart/mixed\r\n\r\nno boundary here\r\n".to_vec(),
    );
    state.insert("INBOX", mail("good two", "<g2@x>", "", "Mon, 2 Jan 2024 10:00:00 +0000"));
    let server = Server::start(state);
    let mut session = open(&server);

    let page = session.fetch_page("INBOX", 1, 10).unwrap();
    assert_eq!(ids(&page.messages), vec!["3", "1"]);
    assert_eq!(page.total_messages, 3);

    let err = session.fetch_by_id("INBOX", &broken.to_string()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Decode);
    assert!(err.kind.is_recoverable());

    let mut batch = session
        .fetch_batch("INBOX", &["1", "2", "3", "not-a-uid", "77"])
        .unwrap();
    batch.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(ids(&batch), vec!["1", "3"]);
    assert!(session.fetch_batch::<&str>("INBOX", &[]).unwrap().is_empty());
    assert!(session.is_authenticated());
}

#[test]
fn test_imap_fetch_by_id() {
    let server = start();
    let mut session = open(&server);
    let message = session.fetch_by_id("INBOX", "3").unwrap();
    assert_eq!(message.id, "3");
    assert_eq!(message.message_id, "<3@example.com>");
    assert_eq!(message.from.address, "sender@example.com");
    assert!(!message.is_seen());

    for id in ["99", "abc", "0", ""] {
        assert_eq!(
            session.fetch_by_id("INBOX", id).unwrap_err().kind,
            ErrorKind::NotFound,
            "{:?}",
            id
        );
    }
    assert_eq!(
        session.fetch_attachment("INBOX", "3", 0).unwrap_err().kind,
        ErrorKind::NotFound
    );
}

#[test]
fn test_imap_threads_and_search() {
    let mut state = ServerState::default();
    state.insert("INBOX", mail("Plans", "<a@x>", "", "Mon, 1 Jan 2024 10:00:00 +0000"));
    state.insert("INBOX", mail("Lunch", "<c@x>", "", "Tue, 2 Jan 2024 10:00:00 +0000"));
    state.insert("INBOX", mail("Re: Plans", "<b@x>", "<a@x>", "Wed, 3 Jan 2024 10:00:00 +0000"));
    let server = Server::start(state);
    let mut session = open(&server);

    let threads = session.fetch_threads("INBOX", 10).unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].id, "<a@x>");
    assert_eq!(threads[0].subject, "Plans");
    assert_eq!(threads[0].message_count, 2);
    assert!(threads[0].unread);
    assert_eq!(threads[1].id, "<c@x>");

    let found = session
        .search("INBOX", &SearchQuery::new("plans", SearchField::Subject), 10)
        .unwrap();
    assert_eq!(ids(&found), vec!["3", "1"]);
}

#[test]
fn test_imap_flags_and_delete() {
    let server = start();
    let mut session = open(&server);

    session.mark_read("INBOX", "2").unwrap();
    assert_eq!(server.state.lock().unwrap().flags("INBOX", 2), vec!["\\Seen"]);
    assert!(session.fetch_by_id("INBOX", "2").unwrap().is_seen());
    session.mark_unread("INBOX", "2").unwrap();
    assert!(server.state.lock().unwrap().flags("INBOX", 2).is_empty());

    session
        .set_flag("INBOX", "2", Flag::FLAGGED | Flag::REPLIED, true)
        .unwrap();
    let mut flags = server.state.lock().unwrap().flags("INBOX", 2);
    flags.sort();
    assert_eq!(flags, vec!["\\Answered", "\\Flagged"]);

    assert_eq!(
        session.set_flag("INBOX", "2", Flag::empty(), true).unwrap_err().kind,
        ErrorKind::Validation
    );
    assert_eq!(
        session.set_flag("INBOX", "99", Flag::SEEN, true).unwrap_err().kind,
        ErrorKind::NotFound
    );
    assert!(!server.state.lock().unwrap().received("UID STORE 99"));

    session.delete("INBOX", "1").unwrap();
    assert_eq!(server.state.lock().unwrap().uids("INBOX"), vec![2, 3, 4, 5]);
    assert!(server.state.lock().unwrap().received("UID EXPUNGE 1"));
    assert_eq!(
        session.delete("INBOX", "1").unwrap_err().kind,
        ErrorKind::NotFound
    );
}

#[test]
fn test_imap_move() {
    let server = start();
    let mut session = open(&server);

    session.move_message("INBOX", "Archive", "2").unwrap();
    {
        let state = server.state.lock().unwrap();
        assert_eq!(state.uids("INBOX"), vec![1, 3, 4, 5]);
        assert_eq!(state.uids("Archive").len(), 1);
    }

    let err = session.move_message("INBOX", "Missing", "3").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(server.state.lock().unwrap().uids("INBOX"), vec![1, 3, 4, 5]);

    assert_eq!(
        session.move_message("INBOX", "INBOX", "3").unwrap_err().kind,
        ErrorKind::Validation
    );
    assert_eq!(
        session.move_message("INBOX", "Archive", "42").unwrap_err().kind,
        ErrorKind::NotFound
    );

    server.state.lock().unwrap().fail_expunge = true;
    let err = session.move_message("INBOX", "Archive", "4").unwrap_err();
    assert_eq!(
        err.kind,
        ErrorKind::Protocol(ProtocolErrorKind::MovePurgeFailed)
    );
    {
        /* Copied but not removed. */
        let state = server.state.lock().unwrap();
        assert!(state.uids("INBOX").contains(&4));
        assert_eq!(state.uids("Archive").len(), 2);
    }
    assert!(session.is_authenticated());
}

#[test]
fn test_imap_folder_management() {
    let server = start();

    /* Rejected before any connection is needed. */
    let mut unconnected = ImapSession::new(conf(server.port, server::PASSWORD));
    assert_eq!(
        unconnected.delete_folder("Trash").unwrap_err().kind,
        ErrorKind::Validation
    );

    let mut session = open(&server);
    for name in ["INBOX", "inbox", "Sent", "Drafts", "Trash", "Spam"] {
        assert_eq!(
            session.delete_folder(name).unwrap_err().kind,
            ErrorKind::Validation,
            "{}",
            name
        );
        assert_eq!(
            session.rename_folder(name, "Other").unwrap_err().kind,
            ErrorKind::Validation,
            "{}",
            name
        );
    }
    assert_eq!(
        session.create_folder("").unwrap_err().kind,
        ErrorKind::Validation
    );
    {
        let state = server.state.lock().unwrap();
        assert!(!state.received("DELETE"));
        assert!(!state.received("RENAME"));
        assert!(!state.received("CREATE"));
    }

    session.create_folder("Projects").unwrap();
    session.rename_folder("Projects", "Done").unwrap();
    assert!(server.state.lock().unwrap().folders.contains_key("Done"));
    session.delete_folder("Done").unwrap();
    assert!(!server.state.lock().unwrap().folders.contains_key("Done"));

    let err = session.delete_folder("Done").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Protocol(ProtocolErrorKind::ServerResponse));
    assert!(err.details.is_some());
    assert!(session.is_authenticated());
}
