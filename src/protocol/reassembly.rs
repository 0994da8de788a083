// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound message reassembly.

use std::collections::HashMap;

use super::{Fragment, Message};

#[derive(Debug)]
struct Partial {
    topic: String,
    total_len: usize,
    buffer: Vec<u8>,
}

/// Combines fragments into complete messages.
///
/// Fragments of one message must arrive in order. A fragment that does not
/// continue exactly where the buffer ends, that overflows the advertised
/// length, or that belongs to no started message is dropped with a warning.
/// A dropped continuation also discards the partial message.
#[derive(Debug, Default)]
pub struct Reassembler {
    partials: HashMap<u32, Partial>,
}

impl Reassembler {
    /// Creates an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment. Returns the message once it is complete.
    pub fn push(&mut self, fragment: Fragment) -> Option<Message> {
        let Fragment {
            msg_id,
            topic,
            offset,
            total_len,
            data,
        } = fragment;

        if offset == 0 {
            let Some(topic) = topic else {
                tracing::warn!(msg_id, "First fragment without topic, dropping");
                return None;
            };
            if data.len() > total_len {
                tracing::warn!(msg_id, topic = %topic, "Fragment overflows message, dropping");
                return None;
            }
            if self.partials.remove(&msg_id).is_some() {
                tracing::warn!(msg_id, "Restarting incomplete message");
            }
            let mut buffer = Vec::with_capacity(total_len);
            buffer.extend_from_slice(&data);
            return self.complete_or_store(msg_id, Partial {
                topic,
                total_len,
                buffer,
            });
        }

        let Some(mut partial) = self.partials.remove(&msg_id) else {
            tracing::warn!(msg_id, offset, "Orphan fragment, dropping");
            return None;
        };

        if offset != partial.buffer.len() || total_len != partial.total_len {
            tracing::warn!(
                msg_id,
                offset,
                expected = partial.buffer.len(),
                topic = %partial.topic,
                "Out of order fragment, dropping message"
            );
            return None;
        }
        if offset + data.len() > partial.total_len {
            tracing::warn!(msg_id, topic = %partial.topic, "Fragment overflows message, dropping message");
            return None;
        }

        partial.buffer.extend_from_slice(&data);
        self.complete_or_store(msg_id, partial)
    }

    fn complete_or_store(&mut self, msg_id: u32, partial: Partial) -> Option<Message> {
        if partial.buffer.len() == partial.total_len {
            Some(Message {
                topic: partial.topic,
                payload: partial.buffer,
            })
        } else {
            self.partials.insert(msg_id, partial);
            None
        }
    }

    /// Returns the number of incomplete messages.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    /// Discards every incomplete message.
    pub fn clear(&mut self) {
        self.partials.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(msg_id: u32, topic: Option<&str>, offset: usize, total: usize, data: &[u8]) -> Fragment {
        Fragment {
            msg_id,
            topic: topic.map(str::to_string),
            offset,
            total_len: total,
            data: data.to_vec(),
        }
    }

    /// Splits `payload` into 1 to 32 byte pieces chosen from `seed`.
    fn split(msg_id: u32, topic: &str, payload: &[u8], mut seed: u64) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let step = 1 + usize::try_from(seed >> 59).unwrap();
            let end = (offset + step).min(payload.len());
            fragments.push(frag(
                msg_id,
                (offset == 0).then_some(topic),
                offset,
                payload.len(),
                &payload[offset..end],
            ));
            offset = end;
        }
        fragments
    }

    #[test]
    fn whole_message_completes_at_once() {
        let mut r = Reassembler::new();
        let msg = r.push(Fragment::whole(1, "a/b", b"hello".to_vec())).unwrap();
        assert_eq!(msg.topic, "a/b");
        assert_eq!(msg.payload, b"hello");
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn empty_message_completes() {
        let mut r = Reassembler::new();
        let msg = r.push(frag(1, Some("t"), 0, 0, b"")).unwrap();
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn random_splits_complete_exactly_once() {
        let payload: Vec<u8> = (0..200u8).collect();
        for seed in 0..50 {
            let mut r = Reassembler::new();
            let fragments = split(9, "node/x/command", &payload, seed);
            let last = fragments.len() - 1;
            let mut completed = Vec::new();
            for (i, f) in fragments.into_iter().enumerate() {
                match r.push(f) {
                    Some(msg) => completed.push((i, msg)),
                    None => assert!(i < last),
                }
            }
            assert_eq!(completed.len(), 1, "seed {seed}");
            assert_eq!(completed[0].0, last);
            assert_eq!(completed[0].1.payload, payload);
            assert_eq!(r.pending(), 0);
        }
    }

    #[test]
    fn interleaved_messages() {
        let mut r = Reassembler::new();
        assert!(r.push(frag(1, Some("a"), 0, 4, b"ab")).is_none());
        assert!(r.push(frag(2, Some("b"), 0, 2, b"x")).is_none());
        let a = r.push(frag(1, None, 2, 4, b"cd")).unwrap();
        let b = r.push(frag(2, None, 1, 2, b"y")).unwrap();
        assert_eq!((a.topic.as_str(), a.payload.as_slice()), ("a", &b"abcd"[..]));
        assert_eq!((b.topic.as_str(), b.payload.as_slice()), ("b", &b"xy"[..]));
    }

    #[test]
    fn orphan_fragment_is_dropped() {
        let mut r = Reassembler::new();
        assert!(r.push(frag(5, None, 3, 6, b"def")).is_none());
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn out_of_order_fragment_drops_message() {
        let mut r = Reassembler::new();
        assert!(r.push(frag(1, Some("a"), 0, 6, b"ab")).is_none());
        assert!(r.push(frag(1, None, 4, 6, b"ef")).is_none());
        assert_eq!(r.pending(), 0);
        assert!(r.push(frag(1, None, 2, 6, b"cd")).is_none());
    }

    #[test]
    fn overflowing_fragment_is_dropped() {
        let mut r = Reassembler::new();
        assert!(r.push(frag(1, Some("a"), 0, 2, b"abc")).is_none());
        assert!(r.push(frag(2, Some("a"), 0, 3, b"ab")).is_none());
        assert!(r.push(frag(2, None, 2, 3, b"cd")).is_none());
        assert_eq!(r.pending(), 0);
    }
}
