/*
 * lilmail - threading module.
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
 * This module implements the first two passes of Jamie Zawinski's
 * [threading algorithm](https://www.jwz.org/doc/threading.html). Quoted
 * comments (/* " .. " */) are taken almost verbatim from the algorithm.
 *
 * The entry point is [`Threads::new`], which links a batch of messages into
 * a forest of `ThreadNode`s kept in an arena, and [`Threads::into_threads`],
 * which turns every root into a [`Thread`]. Nodes refer to each other by
 * arena index only, and the Message-ID table maps threading keys to indices.
 * Both live only as long as one `Threads` value.
 *
 * Messages are linked in (date, Message-ID) order rather than input order,
 * so the same batch always produces the same forest.
 */

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use uuid::Uuid;

use crate::email::{Message, UnixTimestamp};

pub trait SubjectPrefix {
    const USUAL_PREFIXES: &'static [&'static str] = &["re:", "fwd:", "fw:"];

    fn is_a_reply(&self) -> bool;
    fn strip_prefixes(&mut self) -> &mut Self;
}

fn prefix_len(s: &str, prefixes: &[&str]) -> Option<usize> {
    prefixes
        .iter()
        .find(|p| s.get(..p.len()).is_some_and(|h| h.eq_ignore_ascii_case(p)))
        .map(|p| p.len())
}

impl SubjectPrefix for &str {
    fn is_a_reply(&self) -> bool {
        prefix_len(self.trim_start(), Self::USUAL_PREFIXES).is_some()
    }

    /// Remove any number of leading `Re:`, `Fwd:` and `Fw:` prefixes, in any
    /// case, along with surrounding whitespace.
    fn strip_prefixes(&mut self) -> &mut Self {
        let mut slice = self.trim();
        while let Some(len) = prefix_len(slice, Self::USUAL_PREFIXES) {
            slice = slice[len..].trim_start();
        }
        *self = slice;
        self
    }
}

/// A conversation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Thread {
    /// The root's Message-ID, or a UUID derived from the member Message-IDs
    /// when the root message was never fetched.
    pub id: String,
    pub subject: String,
    pub participants: Vec<String>,
    pub message_count: usize,
    pub last_date: UnixTimestamp,
    pub unread: bool,
    pub has_attachments: bool,
    /// Pre-order traversal of the thread tree.
    pub messages: Vec<Message>,
}

#[derive(Clone, Debug, Default)]
struct ThreadNode {
    /// Index into `Threads::messages`.
    message: Option<usize>,
    /// Message-ID this node is indexed by. Duplicates have none.
    key: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// The linked forest of one batch of messages.
#[derive(Debug, Default)]
pub struct Threads {
    nodes: Vec<ThreadNode>,
    message_ids: IndexMap<String, usize>,
    messages: Vec<Option<Message>>,
}

impl Threads {
    /// Link `messages` into a forest. Input order does not matter.
    pub fn new(mut messages: Vec<Message>) -> Self {
        messages.sort_by(|a, b| {
            (a.timestamp, &a.message_id, &a.id).cmp(&(b.timestamp, &b.message_id, &b.id))
        });
        let mut ret = Self {
            nodes: Vec::with_capacity(messages.len()),
            message_ids: IndexMap::with_capacity(messages.len()),
            messages: Vec::with_capacity(messages.len()),
        };
        for message in messages {
            ret.link_message(message);
        }
        ret
    }

    /// Number of nodes, placeholders included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The Message-ID of the node `message_id` was linked under, if any.
    pub fn parent_of(&self, message_id: &str) -> Option<&str> {
        let idx = *self.message_ids.get(message_id)?;
        let parent = self.nodes[idx].parent?;
        self.nodes[parent].key.as_deref()
    }

    fn node_for(&mut self, message_id: &str) -> usize {
        if let Some(&idx) = self.message_ids.get(message_id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(ThreadNode {
            key: Some(message_id.to_string()),
            ..ThreadNode::default()
        });
        self.message_ids.insert(message_id.to_string(), idx);
        idx
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    fn is_ancestor(&self, ancestor: usize, node: usize) -> bool {
        if ancestor != node && self.nodes[ancestor].children.is_empty() {
            return false;
        }
        let mut cur = Some(node);
        /* the walk is bounded by the node count even if a loop slipped in */
        for _ in 0..=self.nodes.len() {
            let Some(idx) = cur else {
                break;
            };
            if idx == ancestor {
                return true;
            }
            cur = self.nodes[idx].parent;
        }
        false
    }

    /// Make `parent` the parent of `child` unless `child` already has one or
    /// the link would close a loop.
    fn link(&mut self, parent: usize, child: usize) -> bool {
        if parent == child || self.nodes[child].parent.is_some() {
            return false;
        }
        /* "Do not add a link if adding that link would introduce a loop: that
         * is, before asserting A->B, search down the children of B to see if
         * A is reachable" */
        if self.is_ancestor(child, parent) {
            log::trace!(
                "refusing to link {:?} under {:?}: would create a loop",
                self.nodes[child].key,
                self.nodes[parent].key
            );
            return false;
        }
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        true
    }

    fn link_message(&mut self, message: Message) {
        let m_idx = self.messages.len();
        /* "If id_table contains an empty Container for this ID:
         *  Store this message in the Container's message slot.
         * Else:
         *  Create a new Container object holding this message;
         *  Index the Container by Message-ID in id_table." */
        let t_idx = match self.message_ids.get(&message.message_id) {
            Some(&idx) if self.nodes[idx].message.is_none() => {
                self.nodes[idx].message = Some(m_idx);
                idx
            }
            Some(_) => {
                /* duplicate Message-ID; keep the message in its own node */
                log::debug!(
                    "duplicate Message-ID {} for message {}",
                    message.message_id,
                    message.id
                );
                self.nodes.push(ThreadNode {
                    message: Some(m_idx),
                    ..ThreadNode::default()
                });
                self.nodes.len() - 1
            }
            None => {
                let idx = self.node_for(&message.message_id);
                self.nodes[idx].message = Some(m_idx);
                idx
            }
        };

        /* "For each element in the message's References field:
         *  Find a Container object for the given Message-ID. If there's one
         *  in id_table use that; otherwise, make (and index) one with a null
         *  Message.
         *  Link the References field's Containers together in the order
         *  implied by the References header." */
        let refs: Vec<usize> = message
            .references
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| self.node_for(r))
            .collect();
        for pair in refs.windows(2) {
            self.link(pair[0], pair[1]);
        }
        /* "Set the parent of this message to be the last element in
         * References." */
        if let Some(&last) = refs.last() {
            self.link(last, t_idx);
        }
        if !message.in_reply_to.is_empty() {
            let parent = self.node_for(&message.in_reply_to);
            self.link(parent, t_idx);
        }
        self.messages.push(Some(message));
    }

    fn message(&self, idx: usize) -> Option<&Message> {
        self.nodes[idx]
            .message
            .and_then(|m| self.messages[m].as_ref())
    }

    /// Earliest date of every subtree, used to order siblings. A node holding
    /// a message takes that message's date.
    fn subtree_dates(&self) -> Vec<UnixTimestamp> {
        let mut dates: Vec<UnixTimestamp> = (0..self.nodes.len())
            .map(|idx| self.message(idx).map_or(UnixTimestamp::MAX, |m| m.timestamp))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = vec![false; self.nodes.len()];
        for root in (0..self.nodes.len()).filter(|&idx| self.nodes[idx].parent.is_none()) {
            let mut stack = vec![root];
            while let Some(idx) = stack.pop() {
                if std::mem::replace(&mut visited[idx], true) {
                    continue;
                }
                order.push(idx);
                stack.extend(self.nodes[idx].children.iter().copied());
            }
        }
        // Reverse pre-order puts every child before its parent.
        for &idx in order.iter().rev() {
            if self.nodes[idx].message.is_some() {
                continue;
            }
            let earliest = self.nodes[idx]
                .children
                .iter()
                .map(|&c| dates[c])
                .min()
                .unwrap_or(UnixTimestamp::MAX);
            dates[idx] = earliest;
        }
        dates
    }

    /// Message indices of the subtree at `root`, in pre-order with siblings
    /// sorted by (date, Message-ID).
    fn pre_order(&self, root: usize, dates: &[UnixTimestamp]) -> Vec<usize> {
        let mut ret = vec![];
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                log::error!("thread node {} visited twice; the forest has a cycle", idx);
                continue;
            }
            if let Some(m) = self.nodes[idx].message {
                ret.push(m);
            }
            let mut children: Vec<(UnixTimestamp, &str, usize)> = self.nodes[idx]
                .children
                .iter()
                .map(|&c| {
                    let key = self.message(c).map_or_else(
                        || self.nodes[c].key.as_deref().unwrap_or_default(),
                        |m| m.message_id.as_str(),
                    );
                    (dates[c], key, c)
                })
                .collect();
            children.sort();
            stack.extend(children.into_iter().rev().map(|(_, _, c)| c));
        }
        ret
    }

    /// Group every root into a [`Thread`], newest conversation first.
    pub fn into_threads(mut self) -> Vec<Thread> {
        /* "Walk over the elements of id_table, and gather a list of the
         * Container objects that have no parents." */
        let roots: Vec<usize> = (0..self.nodes.len())
            .filter(|&idx| self.nodes[idx].parent.is_none())
            /* "If it is an empty container with no children, nuke it." */
            .filter(|&idx| {
                self.nodes[idx].message.is_some() || !self.nodes[idx].children.is_empty()
            })
            .collect();

        let dates = self.subtree_dates();
        let mut threads = Vec::with_capacity(roots.len());
        for root in roots {
            let order = self.pre_order(root, &dates);
            let messages: Vec<Message> = order
                .into_iter()
                .filter_map(|m| self.messages[m].take())
                .collect();
            if messages.is_empty() {
                continue;
            }
            let root_message_id = self.nodes[root]
                .message
                .map(|_| messages[0].message_id.clone());
            let mut subject: &str = messages[0].subject.as_str();
            let subject = subject.strip_prefixes().to_string();
            let participants: IndexSet<String> = messages
                .iter()
                .flat_map(Message::participants)
                .map(str::to_string)
                .collect();
            let id = root_message_id.unwrap_or_else(|| {
                let ids = messages
                    .iter()
                    .map(|m| m.message_id.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                Uuid::new_v5(&Uuid::NAMESPACE_OID, ids.as_bytes()).to_string()
            });
            threads.push(Thread {
                id,
                subject,
                participants: participants.into_iter().collect(),
                message_count: messages.len(),
                last_date: messages.iter().map(|m| m.timestamp).max().unwrap_or(0),
                unread: messages.iter().any(|m| !m.is_seen()),
                has_attachments: messages.iter().any(|m| m.has_attachments),
                messages,
            });
        }
        threads.sort_by(|a, b| b.last_date.cmp(&a.last_date).then_with(|| a.id.cmp(&b.id)));
        threads
    }
}

/// Thread a batch of messages.
pub fn build_threads(messages: Vec<Message>) -> Vec<Thread> {
    Threads::new(messages).into_threads()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{Address, Attachment, Flag};

    fn msg(id: &str, ts: UnixTimestamp, refs: &[&str], in_reply_to: &str) -> Message {
        Message {
            id: id.to_string(),
            message_id: format!("<{}>", id),
            in_reply_to: in_reply_to.to_string(),
            references: refs.iter().map(|r| r.to_string()).collect(),
            subject: format!("Re: subject {}", id),
            from: Address::new(String::new(), format!("{}@example.com", id)),
            timestamp: ts,
            flags: Flag::SEEN,
            ..Message::default()
        }
    }

    fn shape(threads: &[Thread]) -> Vec<(String, Vec<String>)> {
        let mut ret: Vec<(String, Vec<String>)> = threads
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    t.messages.iter().map(|m| m.message_id.clone()).collect(),
                )
            })
            .collect();
        ret.sort();
        ret
    }

    #[test]
    fn test_thread_subject_prefix() {
        let mut s = "Re: Re: Hello";
        assert_eq!(*s.strip_prefixes(), "Hello");
        let mut s = "FWD: Hi";
        assert_eq!(*s.strip_prefixes(), "Hi");
        let mut s = "  fw:RE:fwd:  Quarterly report ";
        assert_eq!(*s.strip_prefixes(), "Quarterly report");
        let mut s = "Reply hazy";
        assert_eq!(*s.strip_prefixes(), "Reply hazy");
        assert!("re: x".is_a_reply());
        assert!(!"Rex".is_a_reply());
        let mut s = "Ré: accent";
        assert_eq!(*s.strip_prefixes(), "Ré: accent");
    }

    #[test]
    fn test_thread_unreferenced_messages_are_roots() {
        let threads = Threads::new(vec![msg("a", 1, &[], ""), msg("b", 2, &[], "")]);
        assert_eq!(threads.parent_of("<a>"), None);
        assert_eq!(threads.parent_of("<b>"), None);
        let threads = threads.into_threads();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, "<b>");
        assert_eq!(threads[1].id, "<a>");
    }

    #[test]
    fn test_thread_reference_chain() {
        let threads = Threads::new(vec![
            msg("a", 1, &[], ""),
            msg("c", 3, &["<a>", "<b>"], ""),
        ]);
        /* b was never fetched: it becomes a placeholder between a and c */
        assert_eq!(threads.parent_of("<b>"), Some("<a>"));
        assert_eq!(threads.parent_of("<c>"), Some("<b>"));
        assert_eq!(threads.len(), 3);
        let threads = threads.into_threads();
        assert_eq!(threads.len(), 1);
        let t = &threads[0];
        assert_eq!(t.id, "<a>");
        assert_eq!(t.message_count, 2);
        assert_eq!(t.last_date, 3);
        assert_eq!(t.subject, "subject a");
        assert_eq!(t.participants, vec!["a@example.com", "c@example.com"]);
    }

    #[test]
    fn test_thread_first_writer_wins() {
        /* both claim a different parent for x; the earlier message wins */
        let threads = Threads::new(vec![
            msg("m2", 20, &["<q>", "<x>"], ""),
            msg("m1", 10, &["<p>", "<x>"], ""),
        ]);
        assert_eq!(threads.parent_of("<x>"), Some("<p>"));
        assert_eq!(threads.parent_of("<m1>"), Some("<x>"));
        assert_eq!(threads.parent_of("<m2>"), Some("<x>"));
        assert_eq!(threads.parent_of("<q>"), None);
        /* q is an empty placeholder without children and is dropped */
        let threads = threads.into_threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].message_count, 2);
    }

    #[test]
    fn test_thread_in_reply_to_only() {
        let threads = Threads::new(vec![msg("b", 2, &[], "<a>"), msg("a", 1, &[], "")]);
        assert_eq!(threads.parent_of("<b>"), Some("<a>"));
        let threads = threads.into_threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(
            threads[0]
                .messages
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_thread_self_reference_and_loops() {
        let threads = Threads::new(vec![
            msg("a", 1, &["<b>", "<a>"], "<a>"),
            msg("b", 2, &["<a>"], ""),
        ]);
        assert_eq!(threads.parent_of("<a>"), Some("<b>"));
        /* linking b under a would close a loop */
        assert_eq!(threads.parent_of("<b>"), None);
        let threads = threads.into_threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].message_count, 2);
    }

    #[test]
    fn test_thread_placeholder_root() {
        let batch = vec![
            msg("r1", 5, &["<gone>"], ""),
            msg("r2", 7, &["<gone>"], "<gone>"),
        ];
        let threads = build_threads(batch.clone());
        assert_eq!(threads.len(), 1);
        let t = &threads[0];
        assert_eq!(t.message_count, 2);
        assert_eq!(t.subject, "subject r1");
        assert!(Uuid::parse_str(&t.id).is_ok());
        /* the fallback id is stable */
        assert_eq!(build_threads(batch)[0].id, t.id);
    }

    #[test]
    fn test_thread_long_reference_chain() {
        const N: usize = 20_000;
        let refs: Vec<String> = (0..N).map(|i| format!("<ancestor{}>", i)).collect();
        let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
        let threads = Threads::new(vec![msg("leaf", 3, &refs, ""), msg("other", 1, &[], "")]);
        assert_eq!(threads.len(), N + 2);
        assert_eq!(threads.parent_of("<leaf>"), Some("<ancestor19999>"));
        assert_eq!(threads.parent_of("<ancestor1>"), Some("<ancestor0>"));

        let threads = threads.into_threads();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].message_count, 1);
        assert_eq!(threads[0].messages[0].message_id, "<leaf>");
        assert_eq!(threads[0].last_date, 3);
        assert!(Uuid::parse_str(&threads[0].id).is_ok());
        assert_eq!(threads[1].id, "<other>");
    }

    #[test]
    fn test_thread_duplicate_message_ids() {
        let mut dup = msg("a", 2, &[], "");
        dup.id = "a2".to_string();
        let threads = build_threads(vec![msg("a", 1, &[], ""), dup]);
        assert_eq!(threads.iter().map(|t| t.message_count).sum::<usize>(), 2);
    }

    #[test]
    fn test_thread_flags_and_sorting() {
        let mut unread = msg("b", 50, &["<a>"], "<a>");
        unread.flags = Flag::empty();
        let mut with_attachment = msg("d", 40, &[], "");
        with_attachment.has_attachments = true;
        with_attachment.attachments = vec![Attachment::default()];
        let threads = build_threads(vec![
            msg("a", 10, &[], ""),
            unread,
            msg("c", 40, &[], ""),
            with_attachment,
        ]);
        assert_eq!(
            threads.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["<a>", "<c>", "<d>"]
        );
        assert!(threads[0].unread);
        assert!(!threads[1].unread);
        assert!(threads[2].has_attachments);
        assert!(!threads[0].has_attachments);
        for pair in threads.windows(2) {
            assert!(pair[0].last_date >= pair[1].last_date);
        }
        for t in &threads {
            assert_eq!(t.message_count, t.messages.len());
            assert!(t.messages.iter().all(|m| m.timestamp <= t.last_date));
        }
    }

    #[test]
    fn test_thread_forest_is_order_independent() {
        let batch = vec![
            msg("a", 1, &[], ""),
            msg("b", 2, &["<a>"], "<a>"),
            msg("c", 3, &["<a>", "<b>"], "<b>"),
            msg("d", 4, &["<a>"], "<a>"),
            msg("e", 5, &["<x>", "<y>"], "<y>"),
            msg("f", 6, &["<x>"], ""),
            msg("g", 6, &[], ""),
            msg("h", 7, &["<z>", "<a>"], "<a>"),
        ];
        let expected = shape(&build_threads(batch.clone()));
        let n = batch.len();
        for rot in 0..n {
            let mut shuffled = batch.clone();
            shuffled.rotate_left(rot);
            assert_eq!(shape(&build_threads(shuffled.clone())), expected);
            shuffled.reverse();
            assert_eq!(shape(&build_threads(shuffled.clone())), expected);
            /* interleave halves */
            let (l, r) = shuffled.split_at(n / 2);
            let interleaved: Vec<Message> = l
                .iter()
                .zip(r.iter())
                .flat_map(|(a, b)| [b.clone(), a.clone()])
                .chain(r.iter().skip(l.len()).cloned())
                .collect();
            assert_eq!(shape(&build_threads(interleaved)), expected);
        }
        for key in ["<a>", "<b>", "<c>", "<d>", "<e>", "<f>", "<g>", "<h>", "<x>", "<y>", "<z>"] {
            let parents: HashSet<Option<String>> = (0..n)
                .map(|rot| {
                    let mut shuffled = batch.clone();
                    shuffled.rotate_right(rot);
                    Threads::new(shuffled).parent_of(key).map(str::to_string)
                })
                .collect();
            assert_eq!(parents.len(), 1, "{} got different parents", key);
        }
    }
}
