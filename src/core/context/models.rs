use crate::core::errors::RouterError;
use crate::core::intent::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The external call went through on this attempt (1-based).
    DispatchSucceeded { attempt: u32 },
    /// The external call was made and failed.
    DispatchFailed { attempt: u32 },
    /// Parameters failed validation; nothing was sent.
    Rejected,
    /// We asked the user a question instead of acting.
    ClarificationRequested,
    /// The pipeline failed before any dispatch (e.g. inference gave up).
    Failed,
}

impl TurnOutcome {
    pub fn dispatch_attempted(&self) -> bool {
        matches!(
            self,
            TurnOutcome::DispatchSucceeded { .. } | TurnOutcome::DispatchFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnError {
    pub kind: String,
    pub message: String,
}

impl From<&RouterError> for TurnError {
    fn from(err: &RouterError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// One request and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub request_text: String,
    pub resolved_intent: Option<Intent>,
    pub result_summary: Option<String>,
    pub error: Option<TurnError>,
    pub outcome: TurnOutcome,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn succeeded(
        request_text: &str,
        intent: &Intent,
        summary: String,
        attempt: u32,
    ) -> Self {
        Self {
            request_text: request_text.to_string(),
            resolved_intent: Some(intent.clone()),
            result_summary: Some(summary),
            error: None,
            outcome: TurnOutcome::DispatchSucceeded { attempt },
            timestamp: Utc::now(),
        }
    }

    pub fn dispatch_failed(
        request_text: &str,
        intent: &Intent,
        error: &RouterError,
        attempt: u32,
    ) -> Self {
        Self {
            request_text: request_text.to_string(),
            resolved_intent: Some(intent.clone()),
            result_summary: None,
            error: Some(error.into()),
            outcome: TurnOutcome::DispatchFailed { attempt },
            timestamp: Utc::now(),
        }
    }

    pub fn rejected(request_text: &str, intent: &Intent, error: &RouterError) -> Self {
        Self {
            request_text: request_text.to_string(),
            resolved_intent: Some(intent.clone()),
            result_summary: None,
            error: Some(error.into()),
            outcome: TurnOutcome::Rejected,
            timestamp: Utc::now(),
        }
    }

    pub fn clarification(request_text: &str, question: &str) -> Self {
        Self {
            request_text: request_text.to_string(),
            resolved_intent: None,
            result_summary: Some(question.to_string()),
            error: None,
            outcome: TurnOutcome::ClarificationRequested,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(request_text: &str, error: &RouterError) -> Self {
        Self {
            request_text: request_text.to_string(),
            resolved_intent: None,
            result_summary: None,
            error: Some(error.into()),
            outcome: TurnOutcome::Failed,
            timestamp: Utc::now(),
        }
    }

    /// Short text used when replaying this turn to the model.
    pub fn history_reply(&self) -> String {
        let mut reply = String::new();
        if let Some(intent) = &self.resolved_intent {
            reply.push_str(&format!("[{}] ", intent.label()));
        }
        match (&self.result_summary, &self.error) {
            (Some(summary), _) => reply.push_str(summary),
            (None, Some(error)) => reply.push_str(&format!("failed ({})", error.kind)),
            (None, None) => reply.push_str("no result"),
        }
        reply
    }
}

/// Per-conversation state. Owned by the context store; everyone else gets a
/// locked handle for the duration of a turn.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub turns: VecDeque<ConversationTurn>,
    pub entities: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_active: Instant,
    /// Set once archived turns have been loaded (or there is no archive).
    pub hydrated: bool,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: VecDeque::new(),
            entities: HashMap::new(),
            created_at: Utc::now(),
            last_active: Instant::now(),
            hydrated: false,
        }
    }

    /// Appends a turn, evicting the oldest ones past `max_turns`.
    /// Returns how many were evicted.
    pub fn push_turn(&mut self, turn: ConversationTurn, max_turns: usize) -> usize {
        self.turns.push_back(turn);
        let mut evicted = 0;
        while self.turns.len() > max_turns.max(1) {
            self.turns.pop_front();
            evicted += 1;
        }
        self.touch();
        evicted
    }

    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entities.insert(key.into(), value.into());
        self.touch();
    }

    pub fn recall(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }

    pub fn latest_turn(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    /// The last `count` turns, oldest first.
    pub fn recent_turns(&self, count: usize) -> impl Iterator<Item = &ConversationTurn> {
        let skip = self.turns.len().saturating_sub(count);
        self.turns.iter().skip(skip)
    }

    pub fn dispatch_attempts(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.outcome.dispatch_attempted())
            .count()
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_turn(text: &str) -> ConversationTurn {
        ConversationTurn::clarification(text, "which one?")
    }

    #[test]
    fn push_turn_evicts_oldest_first() {
        let mut session = Session::new("s");
        for i in 0..5 {
            session.push_turn(plain_turn(&format!("req {}", i)), 3);
        }
        let texts: Vec<&str> = session
            .turns
            .iter()
            .map(|t| t.request_text.as_str())
            .collect();
        assert_eq!(texts, vec!["req 2", "req 3", "req 4"]);
    }

    #[test]
    fn recent_turns_returns_tail_in_order() {
        let mut session = Session::new("s");
        for i in 0..4 {
            session.push_turn(plain_turn(&i.to_string()), 10);
        }
        let tail: Vec<&str> = session
            .recent_turns(2)
            .map(|t| t.request_text.as_str())
            .collect();
        assert_eq!(tail, vec!["2", "3"]);
        assert_eq!(session.recent_turns(10).count(), 4);
    }

    #[test]
    fn clarification_is_not_a_dispatch_attempt() {
        assert!(!TurnOutcome::ClarificationRequested.dispatch_attempted());
        assert!(!TurnOutcome::Rejected.dispatch_attempted());
        assert!(TurnOutcome::DispatchFailed { attempt: 1 }.dispatch_attempted());
    }

    #[test]
    fn turn_round_trips_through_json() {
        let turn = ConversationTurn::failed(
            "send it",
            &RouterError::External(crate::core::errors::ExternalError::permanent(
                "mail", "forbidden",
            )),
        );
        let json = serde_json::to_string(&turn).unwrap();
        let back: ConversationTurn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, turn);
        assert_eq!(
            back.error.map(|e| e.kind),
            Some("permanent_external_error".to_string())
        );
    }
}
