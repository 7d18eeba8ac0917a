//! Property-based tests for the session core

use super::*;
use crate::llm::HistoryRole;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// Text built from pieces of the marker, so partial and nested markers
/// show up often
fn arb_marker_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just(END_OF_ASSESSMENT.to_string()),
            Just("[[END_OF_".to_string()),
            Just("ASSESSMENT]]".to_string()),
            Just("[[".to_string()),
            "[a-zA-Z ,.]{0,12}",
        ],
        0..8,
    )
    .prop_map(|parts| parts.concat())
}

fn arb_turn() -> impl Strategy<Value = Turn> {
    (any::<bool>(), "[a-z ]{1,16}").prop_map(|(is_user, content)| {
        if is_user {
            Turn::user(content)
        } else {
            Turn::assistant(content)
        }
    })
}

fn arb_status() -> impl Strategy<Value = SessionStatus> {
    prop_oneof![
        Just(SessionStatus::NotStarted),
        Just(SessionStatus::Active),
        Just(SessionStatus::Finished),
    ]
}

fn arb_state() -> impl Strategy<Value = SessionState> {
    (arb_status(), "[A-Za-z]{0,8}").prop_map(|(status, user_name)| SessionState { status, user_name })
}

fn arb_event() -> impl Strategy<Value = SessionEvent> {
    prop_oneof![
        "[A-Za-z ]{0,8}".prop_map(|user_name| SessionEvent::Start { user_name }),
        Just(SessionEvent::UserMessage),
        any::<bool>().prop_map(|finished| SessionEvent::ReplyRecorded { finished }),
        Just(SessionEvent::Reset),
    ]
}

// ============================================================================
// Completion detector
// ============================================================================

proptest! {
    #[test]
    fn scan_removes_every_marker(text in arb_marker_text()) {
        let result = scan(&text);
        prop_assert!(!result.clean_text.contains(END_OF_ASSESSMENT));
        prop_assert_eq!(result.finished, text.contains(END_OF_ASSESSMENT));
    }

    #[test]
    fn scan_is_idempotent(text in arb_marker_text()) {
        let first = scan(&text);
        let second = scan(&first.clean_text);
        prop_assert_eq!(&second.clean_text, &first.clean_text);
        prop_assert!(!second.finished);
    }

    #[test]
    fn preview_is_prefix_free(text in arb_marker_text()) {
        let shown = preview(&text);
        prop_assert!(!shown.contains(END_OF_ASSESSMENT));
        prop_assert!(scan(&text).clean_text.starts_with(&shown));
    }
}

// ============================================================================
// History adapter
// ============================================================================

proptest! {
    #[test]
    fn derived_history_alternates(
        opening in prop::option::of("[a-z]{1,10}"),
        turns in prop::collection::vec(arb_turn(), 0..20),
    ) {
        let derived = HistoryAdapter::derive(opening.as_deref(), &turns);

        prop_assert_eq!(derived.len() % 2, 0);
        for (i, entry) in derived.iter().enumerate() {
            let expected = if i % 2 == 0 { HistoryRole::User } else { HistoryRole::Model };
            prop_assert_eq!(entry.role, expected);
        }

        let assistant_turns = turns.iter().filter(|t| t.role == Role::Assistant).count();
        prop_assert!(derived.len() / 2 <= assistant_turns);
    }

    #[test]
    fn appended_history_matches_derived(
        exchanges in prop::collection::vec(("[a-z]{1,10}", "[a-z]{1,10}"), 1..10),
    ) {
        let mut history = HistoryAdapter::new();
        let mut turns = Vec::new();
        let opening = exchanges[0].0.clone();

        for (i, (user_text, model_text)) in exchanges.iter().enumerate() {
            if i > 0 {
                turns.push(Turn::user(user_text.as_str()));
            }
            turns.push(Turn::assistant(model_text.as_str()));
            history.append(user_text, model_text);
        }

        let derived = HistoryAdapter::derive(Some(opening.as_str()), &turns);
        prop_assert_eq!(history.exchange_count(), exchanges.len());
        prop_assert_eq!(history.entries().len(), 2 * exchanges.len());
        prop_assert_eq!(history.entries(), derived.as_slice());
    }
}

// ============================================================================
// Transition function
// ============================================================================

proptest! {
    #[test]
    fn reset_always_returns_to_initial(state in arb_state()) {
        prop_assert_eq!(transition(&state, SessionEvent::Reset), Ok(SessionState::default()));
    }

    #[test]
    fn finished_only_leaves_through_reset(name in "[A-Za-z]{1,8}", event in arb_event()) {
        let finished = SessionState { status: SessionStatus::Finished, user_name: name };
        let is_reset = event == SessionEvent::Reset;
        let result = transition(&finished, event);
        if is_reset {
            prop_assert_eq!(result, Ok(SessionState::default()));
        } else {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn transition_is_deterministic(state in arb_state(), event in arb_event()) {
        prop_assert_eq!(
            transition(&state, event.clone()),
            transition(&state, event)
        );
    }

    #[test]
    fn started_sessions_always_have_a_name(events in prop::collection::vec(arb_event(), 0..12)) {
        let mut current = SessionState::default();
        for event in events {
            if let Ok(next) = transition(&current, event) {
                current = next;
            }
            if current.status == SessionStatus::NotStarted {
                prop_assert!(current.user_name.is_empty());
            } else {
                prop_assert!(!current.user_name.trim().is_empty());
            }
            prop_assert_eq!(current.accepts_input(), current.status == SessionStatus::Active);
        }
    }
}
