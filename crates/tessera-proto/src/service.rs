//! Out-of-band control payloads for group sessions.

use serde::{Deserialize, Serialize};

use crate::{DecodeError, Identity, SessionId, envelope::MAX_ENVELOPE_SIZE};

/// What a service message asks the receiver to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServiceKind {
    /// Join a freshly bootstrapped or rotated group session
    NewSession,
    /// Apply a participant change to an existing group session
    ChangeMembers {
        /// Identities joining the group
        add: Vec<Identity>,
        /// Identities leaving the group
        remove: Vec<Identity>,
    },
}

/// Group session ticket sent to each member over their pairwise session.
///
/// Receivers look these up by (sender, session id, identifier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    /// Group channel the ticket belongs to
    pub group: Identity,
    /// Session the ticket creates or modifies
    pub session_id: SessionId,
    /// Distinguishes several tickets for one session (membership changes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Full member list after the ticket applies, creator included
    pub members: Vec<Identity>,
    /// Requested operation
    pub kind: ServiceKind,
    /// Opaque session provider ticket
    pub ticket: Vec<u8>,
}

impl ServiceMessage {
    /// Bootstrap or rotation ticket.
    pub fn new_session(
        group: Identity,
        session_id: SessionId,
        members: Vec<Identity>,
        ticket: Vec<u8>,
    ) -> Self {
        Self { group, session_id, identifier: None, members, kind: ServiceKind::NewSession, ticket }
    }

    /// Participant change ticket, tagged with a unique `identifier`.
    pub fn change_members(
        group: Identity,
        session_id: SessionId,
        identifier: String,
        members: Vec<Identity>,
        add: Vec<Identity>,
        remove: Vec<Identity>,
        ticket: Vec<u8>,
    ) -> Self {
        Self {
            group,
            session_id,
            identifier: Some(identifier),
            members,
            kind: ServiceKind::ChangeMembers { add, remove },
            ticket,
        }
    }

    /// Serialize for encryption under a pairwise session.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.ticket.len() + 128);
        let Ok(()) = ciborium::ser::into_writer(self, &mut buf) else {
            unreachable!("service message fields always serialize into a Vec");
        };
        buf
    }

    /// Parse decrypted bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_ENVELOPE_SIZE {
            return Err(DecodeError::TooLarge { size: bytes.len(), max: MAX_ENVELOPE_SIZE });
        }
        ciborium::de::from_reader(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}
