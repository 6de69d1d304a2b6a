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

//! Process-wide identity, created once and handed to every node.

use uuid::Uuid;

use crate::transport::memory::MemoryHub;

/// Identity stamped onto outgoing messages and the hub in-process nodes
/// sharing this context meet on.
///
/// A process creates one context and passes it, by clone, into the
/// configuration of each of its nodes. Clones share the hub, so nodes built
/// from the same context can reach each other without leaving the process.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// Fresh per process start.
    pub process_uuid: Uuid,
    /// Stable per host, derived from the host name.
    pub host_uuid: Uuid,
    pub hub: MemoryHub,
}

impl ProcessContext {
    pub fn new() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned());
        ProcessContext {
            process_uuid: Uuid::new_v4(),
            host_uuid: Uuid::new_v5(&Uuid::NAMESPACE_DNS, hostname.as_bytes()),
            hub: MemoryHub::new(),
        }
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        ProcessContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_keep_the_identity() {
        let context = ProcessContext::new();
        let clone = context.clone();
        assert_eq!(context.process_uuid, clone.process_uuid);
        assert_eq!(context.host_uuid, clone.host_uuid);
    }

    #[test]
    fn host_uuid_is_a_pure_function_of_the_host_name() {
        let a = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"lab-1");
        let b = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"lab-1");
        assert_eq!(a, b);
        assert_ne!(a, Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"lab-2"));
    }

    #[test]
    fn fresh_contexts_get_fresh_process_uuids() {
        assert_ne!(
            ProcessContext::new().process_uuid,
            ProcessContext::new().process_uuid
        );
    }
}
