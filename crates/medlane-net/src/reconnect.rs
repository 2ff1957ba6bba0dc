//! Connection-lifecycle state machine.
//!
//! The transport task drives this machine and never sleeps-and-retries
//! outside of what it sanctions, which is what makes the bounded-retry
//! guarantee testable without sockets.  States mirror the public
//! [`ConnectionStatus`]; the machine additionally owns the retry counter.

use std::time::Duration;

use medlane_shared::constants::{RECONNECT_DELAY, RECONNECT_MAX_ATTEMPTS};
use medlane_shared::types::ConnectionStatus;

/// Bounds for reconnection after a transport drop.  The delay is fixed, not
/// exponential.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum dial attempts per outage before giving up.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            delay: RECONNECT_DELAY,
        }
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmInput {
    /// A fresh connect was requested (initial connect or after re-auth).
    ConnectRequested,
    /// The websocket handshake completed.
    HandshakeOk,
    /// The server rejected the credential.
    AuthRejected,
    /// The socket dropped or a dial attempt failed.
    Dropped,
}

/// Explicit transition table over `{disconnected, connecting, connected,
/// reconnecting, auth-failed}`.
///
/// Inputs that make no sense in the current state are ignored
/// (self-transition), so a late event from a dying socket cannot corrupt the
/// lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionFsm {
    policy: ReconnectPolicy,
    state: ConnectionStatus,
}

impl ConnectionFsm {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionStatus::Disconnected,
        }
    }

    /// Current state.
    pub fn state(&self) -> &ConnectionStatus {
        &self.state
    }

    /// Fixed delay to wait before the next dial attempt.
    pub fn next_delay(&self) -> Duration {
        self.policy.delay
    }

    /// Feed one input and return the resulting state.
    pub fn apply(&mut self, input: FsmInput) -> &ConnectionStatus {
        use ConnectionStatus::*;

        let next = match (&self.state, input) {
            (Disconnected | AuthFailed, FsmInput::ConnectRequested) => Connecting,

            (Connecting | Reconnecting { .. }, FsmInput::HandshakeOk) => Connected,

            (Connecting | Connected | Reconnecting { .. }, FsmInput::AuthRejected) => AuthFailed,

            // First failure of an outage.
            (Connecting | Connected, FsmInput::Dropped) => self.retry(1),
            // A dial attempt during an outage failed.
            (Reconnecting { attempt }, FsmInput::Dropped) => self.retry(attempt + 1),

            (current, _) => current.clone(),
        };

        self.state = next;
        &self.state
    }

    /// Attempt `n`, or terminal disconnect once the bound is exceeded.
    fn retry(&self, attempt: u32) -> ConnectionStatus {
        if attempt > self.policy.max_attempts {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Reconnecting { attempt }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsm(max_attempts: u32) -> ConnectionFsm {
        ConnectionFsm::new(ReconnectPolicy {
            max_attempts,
            delay: Duration::from_millis(5),
        })
    }

    #[test]
    fn test_initial_connect_path() {
        let mut fsm = fsm(5);
        assert_eq!(fsm.state(), &ConnectionStatus::Disconnected);

        assert_eq!(fsm.apply(FsmInput::ConnectRequested), &ConnectionStatus::Connecting);
        assert_eq!(fsm.apply(FsmInput::HandshakeOk), &ConnectionStatus::Connected);
    }

    #[test]
    fn test_retries_are_bounded_and_terminal() {
        let mut fsm = fsm(5);
        fsm.apply(FsmInput::ConnectRequested);
        fsm.apply(FsmInput::HandshakeOk);

        for expected in 1..=5u32 {
            assert_eq!(
                fsm.apply(FsmInput::Dropped),
                &ConnectionStatus::Reconnecting { attempt: expected }
            );
        }

        // Sixth failure exhausts the bound.
        assert_eq!(fsm.apply(FsmInput::Dropped), &ConnectionStatus::Disconnected);
        // Terminal until a fresh connect is requested.
        assert_eq!(fsm.apply(FsmInput::Dropped), &ConnectionStatus::Disconnected);
        assert_eq!(fsm.apply(FsmInput::HandshakeOk), &ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_successful_retry_resets_the_counter() {
        let mut fsm = fsm(5);
        fsm.apply(FsmInput::ConnectRequested);
        fsm.apply(FsmInput::Dropped);
        fsm.apply(FsmInput::Dropped);
        assert_eq!(fsm.state(), &ConnectionStatus::Reconnecting { attempt: 2 });

        fsm.apply(FsmInput::HandshakeOk);
        assert_eq!(
            fsm.apply(FsmInput::Dropped),
            &ConnectionStatus::Reconnecting { attempt: 1 }
        );
    }

    #[test]
    fn test_auth_rejection_stops_the_retry_loop() {
        let mut fsm = fsm(5);
        fsm.apply(FsmInput::ConnectRequested);
        fsm.apply(FsmInput::Dropped);
        assert_eq!(fsm.apply(FsmInput::AuthRejected), &ConnectionStatus::AuthFailed);

        // No retries out of auth failure.
        assert_eq!(fsm.apply(FsmInput::Dropped), &ConnectionStatus::AuthFailed);
        // A fresh connect after re-authentication is allowed.
        assert_eq!(fsm.apply(FsmInput::ConnectRequested), &ConnectionStatus::Connecting);
    }

    #[test]
    fn test_irrelevant_inputs_are_ignored() {
        let mut fsm = fsm(5);
        assert_eq!(fsm.apply(FsmInput::Dropped), &ConnectionStatus::Disconnected);
        assert_eq!(fsm.apply(FsmInput::AuthRejected), &ConnectionStatus::Disconnected);

        fsm.apply(FsmInput::ConnectRequested);
        assert_eq!(fsm.apply(FsmInput::ConnectRequested), &ConnectionStatus::Connecting);
    }

    #[test]
    fn test_zero_attempts_means_no_retry() {
        let mut fsm = fsm(0);
        fsm.apply(FsmInput::ConnectRequested);
        fsm.apply(FsmInput::HandshakeOk);
        assert_eq!(fsm.apply(FsmInput::Dropped), &ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_delay_is_fixed() {
        let mut fsm = fsm(5);
        fsm.apply(FsmInput::ConnectRequested);
        let first = fsm.next_delay();
        fsm.apply(FsmInput::Dropped);
        fsm.apply(FsmInput::Dropped);
        assert_eq!(fsm.next_delay(), first);
    }
}
