//! Session actions, server statuses and proof statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The session type, fixed at session creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Disclosing,
    Signing,
    Issuing,
    Redirect,
    Revoking,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Disclosing => "disclosing",
            Action::Signing => "signing",
            Action::Issuing => "issuing",
            Action::Redirect => "redirect",
            Action::Revoking => "revoking",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side status of a session.
///
/// The allowed transitions form a small machine: `Initialized` leads to
/// `Pairing` or `Connected`, `Pairing` leads to `Connected`, and every
/// non-terminal status may jump directly to one of the terminal statuses
/// (`Done`, `Cancelled`, `Timeout`). Terminal statuses never transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerStatus {
    /// The session has been started and is waiting for the client.
    Initialized,
    /// The client is waiting for the frontend to give permission to connect.
    Pairing,
    /// The client has retrieved the session request, we wait for its response.
    Connected,
    /// The session is cancelled, possibly due to an error.
    Cancelled,
    /// The session has completed successfully.
    Done,
    /// The session timed out.
    Timeout,
}

impl ServerStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerStatus::Done | ServerStatus::Cancelled | ServerStatus::Timeout
        )
    }

    /// Whether the state machine permits moving from this status to `next`.
    pub fn can_transition_to(&self, next: ServerStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        match (self, next) {
            (_, s) if s.is_terminal() => true,
            (ServerStatus::Initialized, ServerStatus::Pairing) => true,
            (ServerStatus::Initialized, ServerStatus::Connected) => true,
            (ServerStatus::Pairing, ServerStatus::Connected) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Initialized => "INITIALIZED",
            ServerStatus::Pairing => "PAIRING",
            ServerStatus::Connected => "CONNECTED",
            ServerStatus::Cancelled => "CANCELLED",
            ServerStatus::Done => "DONE",
            ServerStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of proof verification, reported to the requestor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofStatus {
    Valid,
    Invalid,
    Expired,
    MissingAttributes,
    UnmatchedRequest,
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProofStatus::Valid => "VALID",
            ProofStatus::Invalid => "INVALID",
            ProofStatus::Expired => "EXPIRED",
            ProofStatus::MissingAttributes => "MISSING_ATTRIBUTES",
            ProofStatus::UnmatchedRequest => "UNMATCHED_REQUEST",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ServerStatus::Done.is_terminal());
        assert!(ServerStatus::Cancelled.is_terminal());
        assert!(ServerStatus::Timeout.is_terminal());
        assert!(!ServerStatus::Initialized.is_terminal());
        assert!(!ServerStatus::Pairing.is_terminal());
        assert!(!ServerStatus::Connected.is_terminal());
    }

    #[test]
    fn test_transition_table() {
        use ServerStatus::*;

        assert!(Initialized.can_transition_to(Connected));
        assert!(Initialized.can_transition_to(Pairing));
        assert!(Pairing.can_transition_to(Connected));

        // Direct jumps to terminal states from any non-terminal state.
        for from in [Initialized, Pairing, Connected] {
            for to in [Done, Cancelled, Timeout] {
                assert!(from.can_transition_to(to), "{from} -> {to}");
            }
        }

        // The machine never regresses.
        assert!(!Connected.can_transition_to(Initialized));
        assert!(!Connected.can_transition_to(Pairing));
        assert!(!Pairing.can_transition_to(Initialized));

        // Terminal states are frozen.
        for from in [Done, Cancelled, Timeout] {
            for to in [Initialized, Pairing, Connected, Done, Cancelled, Timeout] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_wire_encoding() {
        assert_eq!(
            serde_json::to_string(&ServerStatus::Initialized).unwrap(),
            "\"INITIALIZED\""
        );
        assert_eq!(
            serde_json::to_string(&Action::Disclosing).unwrap(),
            "\"disclosing\""
        );
        assert_eq!(
            serde_json::to_string(&ProofStatus::MissingAttributes).unwrap(),
            "\"MISSING_ATTRIBUTES\""
        );
    }
}
