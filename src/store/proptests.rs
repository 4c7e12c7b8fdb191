//! Property-based tests for the conversation store

use super::*;
use proptest::prelude::*;

proptest! {
    /// The window never exceeds the cap and always holds the most recent
    /// messages in arrival order.
    #[test]
    fn prop_history_is_capped_and_contiguous(
        cap in 1usize..30,
        count in 0usize..80,
    ) {
        let store = ConversationStore::new(cap);
        for i in 0..count {
            store.append("c", Role::User, &i.to_string());
            prop_assert!(store.message_count("c") <= cap);
        }

        let history: Vec<usize> = store
            .history("c")
            .into_iter()
            .map(|m| m.content.parse().unwrap())
            .collect();

        let expected: Vec<usize> = (count.saturating_sub(cap)..count).collect();
        prop_assert_eq!(history, expected);
    }

    /// Writes to one conversation never change another's window.
    #[test]
    fn prop_conversations_are_isolated(
        writes in prop::collection::vec((0usize..3, "[a-z]{1,8}"), 0..40),
    ) {
        let store = ConversationStore::new(100);
        let mut expected: [Vec<String>; 3] = Default::default();

        for (conv, text) in &writes {
            store.append(&format!("c{conv}"), Role::User, text);
            expected[*conv].push(text.clone());
        }

        for (conv, want) in expected.iter().enumerate() {
            let got: Vec<String> = store
                .history(&format!("c{conv}"))
                .into_iter()
                .map(|m| m.content)
                .collect();
            prop_assert_eq!(&got, want);
        }
    }

    /// Every index entry points at a conversation whose current record
    /// carries the same workflow id.
    #[test]
    fn prop_index_matches_current_records(
        starts in prop::collection::vec((0usize..4, 0usize..6), 0..30),
        clears in prop::collection::vec(0usize..4, 0..4),
    ) {
        let store = ConversationStore::default();
        for (i, (conv, wf)) in starts.iter().enumerate() {
            store.begin_escalation(
                &format!("c{conv}"),
                Escalation::new(format!("wf-{wf}-{i}"), None),
            );
        }
        for conv in &clears {
            store.clear(&format!("c{conv}"));
        }

        let inner = store.lock();
        for (wf, key) in &inner.workflow_index {
            let record = inner
                .conversations
                .get(key)
                .and_then(|c| c.escalation.as_ref());
            prop_assert_eq!(record.map(|e| e.workflow_execution_id.as_str()), Some(wf.as_str()));
        }
    }
}
