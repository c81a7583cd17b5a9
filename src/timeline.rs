use crate::model::{Message, MessageId, MessageUpdate};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// What an upsert did to the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineChange {
    Inserted(MessageId),
    Replaced(MessageId),
    /// Same id, nothing new.
    Unchanged(MessageId),
    /// Fields for an id that cannot be shown yet. They are kept and applied
    /// once history or a fuller frame supplies the message.
    Held(MessageId),
    /// A frame without an id.
    Rejected,
}

impl TimelineChange {
    pub fn id(&self) -> Option<&MessageId> {
        match self {
            TimelineChange::Inserted(id)
            | TimelineChange::Replaced(id)
            | TimelineChange::Unchanged(id)
            | TimelineChange::Held(id) => Some(id),
            TimelineChange::Rejected => None,
        }
    }
}

/// Messages of one conversation, ordered by creation time with ties kept in
/// arrival order. No two entries share an id.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<Message>,
    /// Every field delivered outside of history, per id, exactly as carried.
    /// History entries are overlaid with these and nothing else.
    delivered: HashMap<MessageId, MessageUpdate>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries.iter().find(|m| &m.id == id)
    }

    /// Ids with delivered fields but no entry yet.
    pub fn held(&self) -> usize {
        self.delivered
            .keys()
            .filter(|id| self.position(id).is_none())
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.delivered.clear();
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|m| &m.id == id)
    }

    fn remember(&mut self, id: &MessageId, update: &MessageUpdate) {
        self.delivered
            .entry(id.clone())
            .or_insert_with(|| MessageUpdate {
                id: Some(id.clone()),
                ..Default::default()
            })
            .absorb(update);
    }

    /// Insert after every entry created at or before the new one, so a
    /// message that is newest (the common case) is simply appended.
    fn insert_sorted(&mut self, message: Message) {
        let at = self
            .entries
            .partition_point(|m| m.created_at <= message.created_at);
        self.entries.insert(at, message);
    }

    /// Replace by id in place, or insert a complete message.
    pub fn upsert(&mut self, message: Message) -> TimelineChange {
        let id = message.id.clone();
        self.remember(&id, &MessageUpdate::from(message.clone()));
        self.place(message)
    }

    /// Put `message` in the timeline with delivered fields laid over it.
    fn place(&mut self, mut message: Message) -> TimelineChange {
        if let Some(delivered) = self.delivered.get(&message.id) {
            message.apply(delivered);
        }
        let id = message.id.clone();
        match self.position(&id) {
            Some(idx) => {
                if self.entries[idx] == message {
                    return TimelineChange::Unchanged(id);
                }
                let moved = self.entries[idx].created_at != message.created_at;
                self.entries[idx] = message;
                if moved {
                    self.resort();
                }
                TimelineChange::Replaced(id)
            }
            None => {
                self.insert_sorted(message);
                TimelineChange::Inserted(id)
            }
        }
    }

    /// Apply a possibly partial live update. Known ids are patched in place.
    /// Unknown ids are inserted when everything delivered so far forms a
    /// message, and held otherwise.
    pub fn apply_update(&mut self, update: MessageUpdate, received_at: DateTime<Utc>) -> TimelineChange {
        let Some(id) = update.id.clone() else {
            return TimelineChange::Rejected;
        };
        self.remember(&id, &update);
        match self.position(&id) {
            Some(idx) => {
                let before = self.entries[idx].created_at;
                if !self.entries[idx].apply(&update) {
                    return TimelineChange::Unchanged(id);
                }
                if self.entries[idx].created_at != before {
                    self.resort();
                }
                TimelineChange::Replaced(id)
            }
            None => {
                let assembled = self
                    .delivered
                    .get(&id)
                    .cloned()
                    .and_then(|d| d.into_message(received_at));
                match assembled {
                    Some(message) => {
                        self.insert_sorted(message);
                        TimelineChange::Inserted(id)
                    }
                    None => TimelineChange::Held(id),
                }
            }
        }
    }

    /// Replace the contents with a fetched history while keeping anything
    /// already delivered live. History entries take only the fields live
    /// frames actually carried; arrival-time fallbacks never override them.
    pub fn merge_history(&mut self, history: Vec<Message>) {
        let earlier = std::mem::take(&mut self.entries);
        for message in history {
            self.place(message);
        }
        for message in earlier {
            if self.position(&message.id).is_none() {
                self.insert_sorted(message);
            }
        }
    }

    fn resort(&mut self) {
        self.entries.sort_by_key(|m| m.created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageType, Role};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn msg(id: &str, secs: i64, text: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "conv-1".into(),
            role: Role::Doctor,
            message_type: MessageType::Text,
            original_text: text.into(),
            original_language: "en".into(),
            translated_text: None,
            target_language: Some("es".into()),
            audio_file_path: None,
            audio_duration: None,
            tts_audio_path: None,
            created_at: at(secs),
        }
    }

    fn ids(t: &Timeline) -> Vec<&str> {
        t.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn upsert_appends_then_replaces_in_place() {
        let mut t = Timeline::new();
        assert_eq!(t.upsert(msg("a", 1, "one")), TimelineChange::Inserted("a".into()));
        t.upsert(msg("b", 2, "two"));
        let mut edited = msg("a", 1, "one");
        edited.translated_text = Some("uno".into());
        assert_eq!(t.upsert(edited.clone()), TimelineChange::Replaced("a".into()));
        assert_eq!(t.upsert(edited), TimelineChange::Unchanged("a".into()));
        assert_eq!(ids(&t), vec!["a", "b"]);
        assert_eq!(t.messages()[0].translated_text.as_deref(), Some("uno"));
    }

    #[test]
    fn out_of_order_insert_lands_by_timestamp() {
        let mut t = Timeline::new();
        t.upsert(msg("late", 10, "x"));
        t.upsert(msg("early", 5, "y"));
        t.upsert(msg("tie", 10, "z"));
        assert_eq!(ids(&t), vec!["early", "late", "tie"]);
    }

    fn partial(json: &str) -> MessageUpdate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn partial_update_for_unknown_id_is_held_until_history() {
        let mut t = Timeline::new();
        let change = t.apply_update(partial(r#"{"id":"m1","translated_text":"Hola"}"#), at(99));
        assert_eq!(change, TimelineChange::Held("m1".into()));
        assert!(t.is_empty());
        assert_eq!(t.held(), 1);

        t.merge_history(vec![msg("m1", 10, "Hello")]);
        assert_eq!(t.held(), 0);
        let m = &t.messages()[0];
        assert_eq!(m.original_text, "Hello");
        assert_eq!(m.translated_text.as_deref(), Some("Hola"));
        assert_eq!(m.created_at, at(10));
    }

    #[test]
    fn frame_without_id_is_rejected() {
        let mut t = Timeline::new();
        let change = t.apply_update(partial(r#"{"translated_text":"Hola"}"#), at(0));
        assert_eq!(change, TimelineChange::Rejected);
        assert!(t.is_empty());
    }

    #[test]
    fn role_bearing_partial_does_not_blank_history_fields() {
        let mut t = Timeline::new();
        let change = t.apply_update(
            partial(r#"{"id":"m1","role":"doctor","translated_text":"Hola"}"#),
            at(99),
        );
        assert_eq!(change, TimelineChange::Inserted("m1".into()));

        t.merge_history(vec![msg("m1", 10, "Hello")]);
        assert_eq!(t.len(), 1);
        let m = &t.messages()[0];
        assert_eq!(m.original_text, "Hello");
        assert_eq!(m.original_language, "en");
        assert_eq!(m.conversation_id, "conv-1");
        assert_eq!(m.translated_text.as_deref(), Some("Hola"));
    }

    #[test]
    fn arrival_time_never_overrides_history_timestamp() {
        let mut t = Timeline::new();
        t.apply_update(partial(r#"{"id":"m1","role":"doctor","original_text":"Hi"}"#), at(1000));

        t.merge_history(vec![msg("m1", 10, "Hi"), msg("m2", 5, "earlier")]);
        assert_eq!(ids(&t), vec!["m2", "m1"]);
        assert_eq!(t.get(&"m1".into()).map(|m| m.created_at), Some(at(10)));
    }

    #[test]
    fn partial_update_replaces_only_carried_fields_of_history_entry() {
        let mut t = Timeline::new();
        let mut first = msg("m1", 10, "Hello");
        first.target_language = Some("hi".into());
        t.merge_history(vec![first, msg("m2", 20, "Bye")]);

        let change = t.apply_update(
            partial(r#"{"id":"m1","translated_text":"नमस्ते","tts_audio_path":"tts_1.mp3"}"#),
            at(500),
        );
        assert_eq!(change, TimelineChange::Replaced("m1".into()));
        assert_eq!(ids(&t), vec!["m1", "m2"]);
        let m = &t.messages()[0];
        assert_eq!(m.original_text, "Hello");
        assert_eq!(m.target_language.as_deref(), Some("hi"));
        assert_eq!(m.created_at, at(10));
        assert_eq!(m.translated_text.as_deref(), Some("नमस्ते"));
        assert_eq!(m.tts_audio_path.as_deref(), Some("tts_1.mp3"));
    }

    #[test]
    fn history_merge_keeps_live_arrivals() {
        let mut t = Timeline::new();
        let mut live = msg("m2", 20, "live copy");
        live.translated_text = Some("traducido".into());
        t.upsert(live);
        t.upsert(msg("m3", 30, "only live"));

        t.merge_history(vec![msg("m1", 10, "first"), msg("m2", 20, "live copy")]);

        assert_eq!(ids(&t), vec!["m1", "m2", "m3"]);
        assert_eq!(t.messages()[1].translated_text.as_deref(), Some("traducido"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        History(Vec<(u8, i64)>),
        Live(u8, i64),
        Translation(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec((0u8..12, 0i64..50), 0..8).prop_map(Op::History),
            (0u8..12, 0i64..50).prop_map(|(id, ts)| Op::Live(id, ts)),
            (0u8..12).prop_map(Op::Translation),
        ]
    }

    proptest! {
        #[test]
        fn any_interleaving_yields_unique_sorted_entries(ops in prop::collection::vec(op(), 1..20)) {
            let mut t = Timeline::new();
            let mut seen = HashSet::new();
            let mut translated = HashSet::new();
            for op in ops {
                match op {
                    Op::History(items) => {
                        let history = items
                            .iter()
                            .map(|(id, ts)| msg(&format!("m{}", id), *ts, "h"))
                            .collect::<Vec<_>>();
                        seen.extend(items.iter().map(|(id, _)| format!("m{}", id)));
                        t.merge_history(history);
                    }
                    Op::Live(id, ts) => {
                        let m = msg(&format!("m{}", id), ts, "l");
                        seen.insert(format!("m{}", id));
                        t.apply_update(MessageUpdate::from(m), at(0));
                    }
                    Op::Translation(id) => {
                        let update = MessageUpdate {
                            id: Some(MessageId::from(format!("m{}", id).as_str())),
                            translated_text: Some("t".into()),
                            ..Default::default()
                        };
                        translated.insert(format!("m{}", id));
                        t.apply_update(update, at(1000));
                    }
                }
            }
            let unique: HashSet<&str> = t.messages().iter().map(|m| m.id.as_str()).collect();
            prop_assert_eq!(unique.len(), t.len());
            prop_assert_eq!(unique.len(), seen.len());
            prop_assert!(t.messages().windows(2).all(|w| w[0].created_at <= w[1].created_at));
            for m in t.messages() {
                prop_assert!(!m.original_text.is_empty());
                prop_assert!(m.created_at < at(1000));
                if translated.contains(m.id.as_str()) {
                    prop_assert_eq!(m.translated_text.as_deref(), Some("t"));
                }
            }
        }
    }
}
