// Copyright 2026 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! The message envelope moved between publishers and subscribers.

use bytes::Bytes;

use crate::compression::{deflate_block, inflate_block, CompressionError};

/// Well-known meta keys set by the bus itself.
pub mod meta {
    /// Uuid of the publisher that sent the message.
    pub const PUBLISHER: &str = "pub";
    /// Uuid of the process the publisher lives in.
    pub const PROCESS: &str = "proc";
    /// Uuid of the host the publisher lives on.
    pub const HOST: &str = "host";
    /// Channel the message was published on.
    pub const CHANNEL: &str = "channel";
    /// Uuid of a single subscriber the message is addressed to. Other
    /// subscribers drop it on receipt.
    pub const SUBSCRIBER: &str = "sub";
    /// Present iff the payload is compressed; holds the original size.
    pub const COMPRESSED: &str = "compressed";
    /// Per-publisher send counter.
    pub const SEQUENCE: &str = "seq";
}

/// Whether a subscription to `subscribed` covers the channel `published`.
///
/// Channels form a dot-separated hierarchy: `"weather"` covers
/// `"weather"` and `"weather.eu"` but not `"weathervane"`.
pub fn channel_matches(subscribed: &str, published: &str) -> bool {
    published == subscribed
        || published
            .strip_prefix(subscribed)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// A payload plus ordered key/value meta fields.
///
/// Meta fields keep their insertion order on the wire; setting an existing
/// key replaces its value in place. Keys must not be empty and neither keys
/// nor values may contain NUL bytes, since the wire encoding is
/// NUL-terminated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    meta: Vec<(String, String)>,
    payload: Bytes,
}

impl Message {
    pub fn new() -> Self {
        Message::default()
    }

    pub fn with_payload(payload: impl Into<Bytes>) -> Self {
        Message {
            meta: Vec::new(),
            payload: payload.into(),
        }
    }

    /// Reassembles a message from decoded wire parts.
    pub fn from_parts(meta: Vec<(String, String)>, payload: Bytes) -> Self {
        Message { meta, payload }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Meta fields in insertion order.
    pub fn meta(&self) -> impl Iterator<Item = (&str, &str)> {
        self.meta.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(crate) fn meta_pairs(&self) -> &[(String, String)] {
        &self.meta
    }

    pub fn get_meta(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `key` to `value`, replacing an existing entry in place.
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.meta.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.meta.push((key, value)),
        }
    }

    /// Removes `key`, returning its previous value.
    pub fn clear_meta(&mut self, key: &str) -> Option<String> {
        let at = self.meta.iter().position(|(k, _)| k == key)?;
        Some(self.meta.remove(at).1)
    }

    pub fn is_compressed(&self) -> bool {
        self.get_meta(meta::COMPRESSED).is_some()
    }

    /// Deflates the payload in place and records the original size under the
    /// [`meta::COMPRESSED`] key. Compressing an already compressed message
    /// is a no-op.
    pub fn compress(&mut self, level: u32) -> Result<(), CompressionError> {
        if self.is_compressed() {
            return Ok(());
        }
        let original = self.payload.len();
        let block = deflate_block(&self.payload, level)?;
        self.payload = Bytes::from(block);
        self.set_meta(meta::COMPRESSED, original.to_string());
        Ok(())
    }

    /// Inflates the payload in place, refusing to grow past `ceiling` bytes,
    /// and clears the [`meta::COMPRESSED`] key.
    pub fn uncompress(&mut self, ceiling: usize) -> Result<(), CompressionError> {
        let advertised = self
            .get_meta(meta::COMPRESSED)
            .ok_or(CompressionError::NotCompressed)?
            .parse::<usize>()
            .map_err(|_| CompressionError::Corrupt)?;
        let restored = inflate_block(&self.payload, ceiling)?;
        if restored.len() != advertised {
            return Err(CompressionError::SizeMismatch {
                advertised,
                actual: restored.len(),
            });
        }
        self.payload = Bytes::from(restored);
        self.clear_meta(meta::COMPRESSED);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_meta_replaces_in_place() {
        let mut msg = Message::new();
        msg.set_meta("channel", "weather");
        msg.set_meta("seq", "1");
        msg.set_meta("channel", "weather.eu");
        let pairs: Vec<_> = msg.meta().collect();
        assert_eq!(pairs, vec![("channel", "weather.eu"), ("seq", "1")]);
    }

    #[test]
    fn clear_meta_returns_the_old_value() {
        let mut msg = Message::new();
        msg.set_meta("seq", "7");
        assert_eq!(msg.clear_meta("seq"), Some("7".to_string()));
        assert_eq!(msg.clear_meta("seq"), None);
        assert_eq!(msg.get_meta("seq"), None);
    }

    #[test]
    fn compress_round_trips_and_clears_the_marker() {
        let data = b"the quick brown fox ".repeat(64);
        let mut msg = Message::with_payload(data.clone());
        msg.compress(6).unwrap();
        assert!(msg.is_compressed());
        assert_eq!(
            msg.get_meta(meta::COMPRESSED),
            Some(data.len().to_string().as_str())
        );
        assert!(msg.payload().len() < data.len());

        msg.uncompress(1 << 20).unwrap();
        assert!(!msg.is_compressed());
        assert_eq!(msg.payload().as_ref(), &data[..]);
    }

    #[test]
    fn compressing_twice_is_a_no_op() {
        let mut msg = Message::with_payload(b"aaaaaaaaaaaaaaaa".to_vec());
        msg.compress(6).unwrap();
        let once = msg.clone();
        msg.compress(6).unwrap();
        assert_eq!(msg, once);
    }

    #[test]
    fn uncompress_requires_the_marker() {
        let mut msg = Message::with_payload(b"plain".to_vec());
        assert!(matches!(
            msg.uncompress(1 << 20),
            Err(CompressionError::NotCompressed)
        ));
    }

    #[test]
    fn uncompress_honors_the_ceiling() {
        let mut msg = Message::with_payload(vec![0u8; 1 << 16]);
        msg.compress(6).unwrap();
        assert!(matches!(
            msg.uncompress(128),
            Err(CompressionError::DecompressionTooLarge(128))
        ));
    }

    #[test]
    fn uncompress_rejects_a_lying_size_marker() {
        let mut msg = Message::with_payload(b"some payload data".to_vec());
        msg.compress(6).unwrap();
        msg.set_meta(meta::COMPRESSED, "3");
        assert!(matches!(
            msg.uncompress(1 << 20),
            Err(CompressionError::SizeMismatch { advertised: 3, .. })
        ));
    }

    #[test]
    fn channel_matching_follows_the_dot_hierarchy() {
        assert!(channel_matches("a", "a"));
        assert!(channel_matches("a", "a.b"));
        assert!(channel_matches("a", "a.b.c"));
        assert!(channel_matches("weather", "weather.eu"));
        assert!(!channel_matches("a", "ab"));
        assert!(!channel_matches("a.b", "a"));
        assert!(!channel_matches("weather", "weathervane"));
        assert!(!channel_matches("", "a"));
        assert!(channel_matches("", ""));
    }
}
