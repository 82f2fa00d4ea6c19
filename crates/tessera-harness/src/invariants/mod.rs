//! Invariant checks over simulated peers.
//!
//! Invariants are properties that must hold whenever the simulation is
//! quiescent, whatever sequence of sends, deliveries and failures led there.
//! A [`SystemSnapshot`] captures the observable state of every peer, and an
//! [`InvariantRegistry`] runs registered [`Invariant`]s against it.
//!
//! # Usage
//!
//! ```ignore
//! let snapshot = SystemSnapshot::capture(&[&alice, &bob]);
//! InvariantRegistry::standard().assert_all(&snapshot, "after delivery");
//! ```

use std::fmt;

mod checks;
mod snapshot;

pub use checks::{
    MembershipConsistency, NoSelfMembership, NotifiedIsPersisted, SettledOutgoing, UnreadCounts,
};
pub use snapshot::{PeerSnapshot, SystemSnapshot};

/// Outcome of one check.
pub type InvariantResult = Result<(), Violation>;

/// A failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Which invariant failed
    pub invariant: &'static str,
    /// Offending peer, channel or message
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of a quiescent simulation.
pub trait Invariant: Send + Sync {
    /// Short snake_case name.
    fn name(&self) -> &'static str;

    /// First violation found in `state`, if any.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Invariants checked together.
#[derive(Default)]
pub struct InvariantRegistry {
    checks: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// No invariants.
    pub fn new() -> Self {
        Self::default()
    }

    /// All of:
    ///
    /// - [`NoSelfMembership`]: channels never list the local identity
    /// - [`SettledOutgoing`]: no outgoing message is left pending
    /// - [`UnreadCounts`]: counters match the unread messages
    /// - [`NotifiedIsPersisted`]: every arrival notification has a record
    /// - [`MembershipConsistency`]: members of one session agree on the group
    pub fn standard() -> Self {
        Self::new()
            .with(NoSelfMembership)
            .with(SettledOutgoing)
            .with(UnreadCounts)
            .with(NotifiedIsPersisted)
            .with(MembershipConsistency)
    }

    /// Registry with `invariant` appended.
    #[must_use]
    pub fn with(mut self, invariant: impl Invariant + 'static) -> Self {
        self.add(invariant);
        self
    }

    /// Append `invariant`.
    pub fn add(&mut self, invariant: impl Invariant + 'static) {
        self.checks.push(Box::new(invariant));
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Every violation in `state`, one per failing invariant at most.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        for check in &self.checks {
            if let Err(violation) = check.check(state) {
                violations.push(violation);
            }
        }
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Panic listing every violation, labelled with `phase`.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, phase: &str) {
        let Err(violations) = self.check_all(state) else {
            return;
        };
        let mut report = format!("{} invariant(s) violated {phase}:", violations.len());
        for violation in &violations {
            report.push_str("\n  ");
            report.push_str(&violation.to_string());
        }
        panic!("{report}");
    }

    /// Number of invariants.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether there are none.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
