//! Folding raw backend events into a stable chat history.
//!
//! The coalescer is a pure transformation: no clocks, no ids it invents, no
//! side effects. That purity is what the resume path depends on — replaying
//! a persisted event sequence through [`fold`] must reproduce exactly the
//! history a live session would have built from the same events.

use serde::{Deserialize, Serialize};

use crate::agent::event::AgentEvent;

/// Who a coalesced message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Outcome half of a tool call, filled in when the paired result arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

/// One piece of a coalesced message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall {
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
        /// `None` while the call is pending; stays `None` forever if the
        /// stream was interrupted before the result arrived.
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<ToolOutcome>,
    },
}

/// A stable, displayable history entry.
///
/// Within one turn, streamed partial events of the same logical message
/// merge into a single entry; the merge key is turn identity, never event
/// adjacency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalescedMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
    pub turn_id: String,
}

impl CoalescedMessage {
    /// The user-role entry a session appends synchronously on `send`.
    pub fn user(turn_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::Text { text: text.into() }],
            turn_id: turn_id.into(),
        }
    }
}

/// Fold one event into a history, returning the new history.
pub fn fold(mut history: Vec<CoalescedMessage>, event: &AgentEvent) -> Vec<CoalescedMessage> {
    apply(&mut history, event);
    history
}

/// Rebuild a history from a stored event sequence.
pub fn replay(events: &[AgentEvent]) -> Vec<CoalescedMessage> {
    let mut history = Vec::new();
    for event in events {
        apply(&mut history, event);
    }
    history
}

/// Fold one event into `history` in place.
///
/// Returns the index of the entry that was created or changed, or `None`
/// when the event has no visible effect (`system_init`, `result_*`, an echo
/// matching the entry already present, an orphan tool result).
pub fn apply(history: &mut Vec<CoalescedMessage>, event: &AgentEvent) -> Option<usize> {
    match event {
        AgentEvent::SystemInit { .. }
        | AgentEvent::ResultSuccess { .. }
        | AgentEvent::ResultError { .. } => None,

        AgentEvent::UserEcho { turn_id, content } => {
            // The session already appended this entry synchronously on send;
            // the echo is authoritative but usually identical.
            if let Some(idx) = rfind(history, Role::User, turn_id) {
                let echoed = vec![ContentPart::Text {
                    text: content.clone(),
                }];
                if history[idx].parts == echoed {
                    return None;
                }
                history[idx].parts = echoed;
                Some(idx)
            } else {
                history.push(CoalescedMessage::user(turn_id.clone(), content.clone()));
                Some(history.len() - 1)
            }
        }

        AgentEvent::AssistantDelta { turn_id, text } => {
            if let Some(idx) = rfind(history, Role::Assistant, turn_id) {
                match history[idx].parts.last_mut() {
                    Some(ContentPart::Text { text: existing }) => existing.push_str(text),
                    _ => history[idx].parts.push(ContentPart::Text { text: text.clone() }),
                }
                Some(idx)
            } else {
                history.push(CoalescedMessage {
                    role: Role::Assistant,
                    parts: vec![ContentPart::Text { text: text.clone() }],
                    turn_id: turn_id.clone(),
                });
                Some(history.len() - 1)
            }
        }

        AgentEvent::ToolUse {
            turn_id,
            tool_use_id,
            name,
            input,
        } => {
            history.push(CoalescedMessage {
                role: Role::Tool,
                parts: vec![ContentPart::ToolCall {
                    tool_use_id: tool_use_id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                    outcome: None,
                }],
                turn_id: turn_id.clone(),
            });
            Some(history.len() - 1)
        }

        AgentEvent::ToolResult {
            tool_use_id,
            content,
            is_error,
            ..
        } => {
            for (idx, message) in history.iter_mut().enumerate().rev() {
                for part in &mut message.parts {
                    if let ContentPart::ToolCall {
                        tool_use_id: id,
                        outcome,
                        ..
                    } = part
                    {
                        if id == tool_use_id && outcome.is_none() {
                            *outcome = Some(ToolOutcome {
                                content: content.clone(),
                                is_error: *is_error,
                            });
                            return Some(idx);
                        }
                    }
                }
            }
            // Orphan result with no pending call; nothing to pair it with.
            None
        }
    }
}

fn rfind(history: &[CoalescedMessage], role: Role, turn_id: &str) -> Option<usize> {
    history
        .iter()
        .rposition(|m| m.role == role && m.turn_id == turn_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(turn: &str, text: &str) -> AgentEvent {
        AgentEvent::AssistantDelta {
            turn_id: turn.to_string(),
            text: text.to_string(),
        }
    }

    mod folding {
        use super::*;

        #[test]
        fn system_init_produces_no_message() {
            let event = AgentEvent::SystemInit {
                session_id: "abc".to_string(),
                model: None,
                cwd: None,
            };
            let history = fold(Vec::new(), &event);
            assert!(history.is_empty());
        }

        #[test]
        fn result_events_are_metadata_only() {
            let history = fold(
                Vec::new(),
                &AgentEvent::ResultSuccess {
                    turn_id: "t1".to_string(),
                    summary: Some("done".to_string()),
                    usage: None,
                },
            );
            assert!(history.is_empty());
        }

        #[test]
        fn same_turn_deltas_merge_into_one_message() {
            let mut history = Vec::new();
            apply(&mut history, &delta("t1", "Hel"));
            apply(&mut history, &delta("t1", "lo"));

            assert_eq!(history.len(), 1);
            assert_eq!(
                history[0].parts,
                vec![ContentPart::Text {
                    text: "Hello".to_string()
                }]
            );
        }

        #[test]
        fn deltas_from_different_turns_stay_separate() {
            let mut history = Vec::new();
            apply(&mut history, &delta("t1", "first"));
            apply(&mut history, &delta("t2", "second"));

            assert_eq!(history.len(), 2);
            assert_eq!(history[0].turn_id, "t1");
            assert_eq!(history[1].turn_id, "t2");
        }

        #[test]
        fn deltas_merge_by_turn_even_across_a_tool_call() {
            let mut history = Vec::new();
            apply(&mut history, &delta("t1", "Let me check"));
            apply(
                &mut history,
                &AgentEvent::ToolUse {
                    turn_id: "t1".to_string(),
                    tool_use_id: "tool-1".to_string(),
                    name: "Read".to_string(),
                    input: json!({"path": "a.txt"}),
                },
            );
            apply(&mut history, &delta("t1", ", found it"));

            // Merge key is turn identity, not adjacency
            assert_eq!(history.len(), 2);
            assert_eq!(
                history[0].parts,
                vec![ContentPart::Text {
                    text: "Let me check, found it".to_string()
                }]
            );
        }

        #[test]
        fn user_echo_does_not_duplicate_synchronous_append() {
            let mut history = vec![CoalescedMessage::user("t1", "Hello")];
            let changed = apply(
                &mut history,
                &AgentEvent::UserEcho {
                    turn_id: "t1".to_string(),
                    content: "Hello".to_string(),
                },
            );

            assert!(changed.is_none());
            assert_eq!(history.len(), 1);
        }

        #[test]
        fn user_echo_is_authoritative_when_content_differs() {
            let mut history = vec![CoalescedMessage::user("t1", "Hello ")];
            let changed = apply(
                &mut history,
                &AgentEvent::UserEcho {
                    turn_id: "t1".to_string(),
                    content: "Hello".to_string(),
                },
            );

            assert_eq!(changed, Some(0));
            assert_eq!(
                history[0].parts,
                vec![ContentPart::Text {
                    text: "Hello".to_string()
                }]
            );
        }

        #[test]
        fn user_echo_without_prior_entry_creates_one() {
            let mut history = Vec::new();
            apply(
                &mut history,
                &AgentEvent::UserEcho {
                    turn_id: "t1".to_string(),
                    content: "Hi".to_string(),
                },
            );

            assert_eq!(history.len(), 1);
            assert_eq!(history[0].role, Role::User);
        }
    }

    mod tool_pairing {
        use super::*;

        fn tool_use(turn: &str, id: &str) -> AgentEvent {
            AgentEvent::ToolUse {
                turn_id: turn.to_string(),
                tool_use_id: id.to_string(),
                name: "Bash".to_string(),
                input: json!({"command": "ls"}),
            }
        }

        #[test]
        fn result_merges_into_pending_call() {
            let mut history = Vec::new();
            apply(&mut history, &tool_use("t1", "tool-1"));
            apply(
                &mut history,
                &AgentEvent::ToolResult {
                    turn_id: "t1".to_string(),
                    tool_use_id: "tool-1".to_string(),
                    content: "file.txt".to_string(),
                    is_error: false,
                },
            );

            assert_eq!(history.len(), 1);
            match &history[0].parts[0] {
                ContentPart::ToolCall { outcome, .. } => {
                    let outcome = outcome.as_ref().expect("outcome paired");
                    assert_eq!(outcome.content, "file.txt");
                    assert!(!outcome.is_error);
                }
                _ => panic!("Expected ToolCall part"),
            }
        }

        #[test]
        fn unpaired_call_stays_pending() {
            let mut history = Vec::new();
            apply(&mut history, &tool_use("t1", "tool-1"));

            match &history[0].parts[0] {
                ContentPart::ToolCall { outcome, .. } => assert!(outcome.is_none()),
                _ => panic!("Expected ToolCall part"),
            }
        }

        #[test]
        fn orphan_result_is_dropped() {
            let mut history = Vec::new();
            let changed = apply(
                &mut history,
                &AgentEvent::ToolResult {
                    turn_id: "t1".to_string(),
                    tool_use_id: "ghost".to_string(),
                    content: "?".to_string(),
                    is_error: false,
                },
            );

            assert!(changed.is_none());
            assert!(history.is_empty());
        }

        #[test]
        fn result_pairs_with_matching_id_not_latest_call() {
            let mut history = Vec::new();
            apply(&mut history, &tool_use("t1", "tool-1"));
            apply(&mut history, &tool_use("t1", "tool-2"));
            apply(
                &mut history,
                &AgentEvent::ToolResult {
                    turn_id: "t1".to_string(),
                    tool_use_id: "tool-1".to_string(),
                    content: "done".to_string(),
                    is_error: false,
                },
            );

            match &history[0].parts[0] {
                ContentPart::ToolCall { outcome, .. } => assert!(outcome.is_some()),
                _ => panic!("Expected ToolCall part"),
            }
            match &history[1].parts[0] {
                ContentPart::ToolCall { outcome, .. } => assert!(outcome.is_none()),
                _ => panic!("Expected ToolCall part"),
            }
        }
    }

    mod replay_property {
        use super::*;

        #[test]
        fn replay_matches_live_fold() {
            let events = vec![
                AgentEvent::SystemInit {
                    session_id: "abc".to_string(),
                    model: None,
                    cwd: None,
                },
                AgentEvent::UserEcho {
                    turn_id: "t1".to_string(),
                    content: "list files".to_string(),
                },
                delta("t1", "Sure"),
                AgentEvent::ToolUse {
                    turn_id: "t1".to_string(),
                    tool_use_id: "tool-1".to_string(),
                    name: "Bash".to_string(),
                    input: json!({"command": "ls"}),
                },
                AgentEvent::ToolResult {
                    turn_id: "t1".to_string(),
                    tool_use_id: "tool-1".to_string(),
                    content: "a.txt".to_string(),
                    is_error: false,
                },
                delta("t1", ", done"),
                AgentEvent::ResultSuccess {
                    turn_id: "t1".to_string(),
                    summary: None,
                    usage: None,
                },
            ];

            // Live path: a session appends the user entry before the stream
            // echoes anything, then folds event by event.
            let mut live = vec![CoalescedMessage::user("t1", "list files")];
            for event in &events {
                apply(&mut live, event);
            }

            assert_eq!(replay(&events), live);
        }

        #[test]
        fn five_events_three_messages() {
            let events = vec![
                AgentEvent::UserEcho {
                    turn_id: "t1".to_string(),
                    content: "hi".to_string(),
                },
                delta("t1", "he"),
                delta("t1", "llo"),
                AgentEvent::ToolUse {
                    turn_id: "t1".to_string(),
                    tool_use_id: "tool-1".to_string(),
                    name: "Read".to_string(),
                    input: json!({}),
                },
                AgentEvent::ToolResult {
                    turn_id: "t1".to_string(),
                    tool_use_id: "tool-1".to_string(),
                    content: "ok".to_string(),
                    is_error: false,
                },
            ];

            let history = replay(&events);
            assert_eq!(history.len(), 3);
            assert_eq!(history[0].role, Role::User);
            assert_eq!(history[1].role, Role::Assistant);
            assert_eq!(history[2].role, Role::Tool);
        }
    }
}
