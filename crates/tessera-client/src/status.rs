//! Outbound status tracking.
//!
//! Every outgoing message starts `pending` and settles exactly once, to
//! `success` or `failed`. Later receipts (`delivered`, `read`) only move a
//! successful message forward.

use tessera_core::{LocalMessageId, MessageState};

/// Result of [`OutboundStatus::settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// State changed
    Applied,
    /// Already in the requested state; nothing to report
    Duplicate,
    /// Transition not allowed from the current state
    Rejected,
}

/// In-memory status of one outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundStatus {
    local_id: LocalMessageId,
    state: MessageState,
}

impl OutboundStatus {
    /// Tracker for a freshly persisted pending message.
    pub fn new(local_id: LocalMessageId) -> Self {
        Self { local_id, state: MessageState::Pending }
    }

    /// Local record id.
    pub fn local_id(&self) -> LocalMessageId {
        self.local_id
    }

    /// Current state.
    pub fn state(&self) -> MessageState {
        self.state
    }

    /// Move to `next` if the status lifecycle allows it.
    pub fn settle(&mut self, next: MessageState) -> Settle {
        if self.state == next {
            Settle::Duplicate
        } else if self.state.can_transition_to(next) {
            self.state = next;
            Settle::Applied
        } else {
            Settle::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const ALL: [MessageState; 6] = [
        MessageState::Pending,
        MessageState::Success,
        MessageState::Failed,
        MessageState::Delivered,
        MessageState::Read,
        MessageState::Received,
    ];

    #[test]
    fn settles_once() {
        let mut status = OutboundStatus::new(1);
        assert_eq!(status.settle(MessageState::Success), Settle::Applied);
        assert_eq!(status.settle(MessageState::Success), Settle::Duplicate);
        assert_eq!(status.settle(MessageState::Failed), Settle::Rejected);
        assert_eq!(status.state(), MessageState::Success);
    }

    #[test]
    fn failure_is_terminal() {
        let mut status = OutboundStatus::new(1);
        assert_eq!(status.settle(MessageState::Failed), Settle::Applied);
        for state in ALL {
            assert_ne!(status.settle(state), Settle::Applied);
        }
    }

    proptest! {
        /// INVARIANT: the observed states of an outgoing message are a prefix
        /// of pending → success → delivered → read, or pending → failed.
        #[test]
        fn observed_states_follow_lifecycle(steps in prop::collection::vec(0usize..6, 0..24)) {
            let mut status = OutboundStatus::new(7);
            let mut observed = vec![MessageState::Pending];
            for step in steps {
                if status.settle(ALL[step]) == Settle::Applied {
                    observed.push(status.state());
                }
            }

            let success = [
                MessageState::Pending,
                MessageState::Success,
                MessageState::Delivered,
                MessageState::Read,
            ];
            let failed = [MessageState::Pending, MessageState::Failed];
            let along = |path: &[MessageState]| {
                let mut rest = path.iter();
                observed.iter().all(|s| rest.any(|p| p == s))
            };
            prop_assert!(along(&success) || along(&failed), "observed {:?}", observed);
        }
    }
}
