// Purpose: Per-agent message counters rolled into a metrics snapshot.
// Architecture: Cross-cutting
// Dependencies: std::collections

use std::collections::HashMap;

use serde::Serialize;

use crate::message::Tag;

/// Tags excluded from the published-message counters — registration,
/// reporting, connection/disconnection, graph-edge and state-transition
/// chatter is not "work", mirroring the original ignore list exactly.
const IGNORED: &[Tag] = &[
    Tag::AgentRegistration,
    Tag::AddGraphEdge,
    Tag::RemoveGraphEdge,
    Tag::ValueSelected,
];

#[derive(Debug, Default)]
pub struct AgentMetricsCounter {
    messages_count: u64,
    per_tag: HashMap<Tag, u64>,
}

impl AgentMetricsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every outbound publish; a no-op for ignored tags.
    pub fn on_message_published(&mut self, tag: Tag) {
        if IGNORED.contains(&tag) {
            return;
        }
        self.messages_count += 1;
        *self.per_tag.entry(tag).or_insert(0) += 1;
    }

    pub fn clear(&mut self) {
        self.messages_count = 0;
        self.per_tag.clear();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_count: self.messages_count,
            per_tag: self
                .per_tag
                .iter()
                .map(|(tag, count)| (tag.as_wire_str().to_string(), *count))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages_count: u64,
    pub per_tag: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_tags_do_not_advance_the_counter() {
        let mut m = AgentMetricsCounter::new();
        m.on_message_published(Tag::AgentRegistration);
        m.on_message_published(Tag::ValueSelected);
        assert_eq!(m.snapshot().messages_count, 0);
    }

    #[test]
    fn counted_tags_advance_both_totals() {
        let mut m = AgentMetricsCounter::new();
        m.on_message_published(Tag::Util);
        m.on_message_published(Tag::Util);
        m.on_message_published(Tag::Value);
        let snap = m.snapshot();
        assert_eq!(snap.messages_count, 3);
        assert_eq!(snap.per_tag["UtilMessage"], 2);
        assert_eq!(snap.per_tag["ValueMessage"], 1);
    }
}
