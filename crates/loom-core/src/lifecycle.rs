//! Lifecycle states, phases and the transition table
//!
//! Every component moves through four phases:
//! - Creation: CONCEPTION -> INITIALIZING -> CONFIGURING -> SPECIALIZING -> READY
//! - Operational: ACTIVE, WAITING, ADAPTING, STABLE
//! - Degradation: DEGRADED, MAINTAINING
//! - Termination: TERMINATING -> TERMINATED -> ARCHIVED
//!
//! Only the pairs listed in [`TRANSITIONS`] may be taken with an explicit
//! advance. Entry into TERMINATING is reserved to termination, which is
//! reachable from every non-terminal state.
//!
//! The table has 19 edges: the five-step creation chain, a round trip
//! between ACTIVE and each other operational state, one degradation edge
//! per operational state, the DEGRADED -> MAINTAINING -> ACTIVE repair
//! loop and the two termination steps. Operational sub-states only
//! connect through ACTIVE.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a component
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum LifecycleState {
    // Creation phase
    Conception = 0x01,
    Initializing = 0x02,
    Configuring = 0x03,
    Specializing = 0x04,
    Ready = 0x05,

    // Operational phase
    Active = 0x10,
    Waiting = 0x11,
    Adapting = 0x12,
    Stable = 0x13,

    // Degradation phase
    Degraded = 0x20,
    Maintaining = 0x21,

    // Termination phase
    Terminating = 0x30,
    Terminated = 0x31,
    Archived = 0x32,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 14] = [
        LifecycleState::Conception,
        LifecycleState::Initializing,
        LifecycleState::Configuring,
        LifecycleState::Specializing,
        LifecycleState::Ready,
        LifecycleState::Active,
        LifecycleState::Waiting,
        LifecycleState::Adapting,
        LifecycleState::Stable,
        LifecycleState::Degraded,
        LifecycleState::Maintaining,
        LifecycleState::Terminating,
        LifecycleState::Terminated,
        LifecycleState::Archived,
    ];

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(LifecycleState::Conception),
            0x02 => Some(LifecycleState::Initializing),
            0x03 => Some(LifecycleState::Configuring),
            0x04 => Some(LifecycleState::Specializing),
            0x05 => Some(LifecycleState::Ready),
            0x10 => Some(LifecycleState::Active),
            0x11 => Some(LifecycleState::Waiting),
            0x12 => Some(LifecycleState::Adapting),
            0x13 => Some(LifecycleState::Stable),
            0x20 => Some(LifecycleState::Degraded),
            0x21 => Some(LifecycleState::Maintaining),
            0x30 => Some(LifecycleState::Terminating),
            0x31 => Some(LifecycleState::Terminated),
            0x32 => Some(LifecycleState::Archived),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn phase(self) -> Phase {
        match self.to_byte() >> 4 {
            0x0 => Phase::Creation,
            0x1 => Phase::Operational,
            0x2 => Phase::Degradation,
            _ => Phase::Termination,
        }
    }

    #[inline]
    pub fn is_operational(self) -> bool {
        self.phase() == Phase::Operational
    }

    /// TERMINATED or ARCHIVED. No further work is accepted.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Terminated | LifecycleState::Archived)
    }

    /// True once termination has begun
    #[inline]
    pub fn is_terminating_or_terminal(self) -> bool {
        self.phase() == Phase::Termination
    }

    /// States reachable from `self` through an explicit advance
    pub fn successors(self) -> impl Iterator<Item = LifecycleState> {
        TRANSITIONS
            .iter()
            .filter(move |(from, _)| *from == self)
            .map(|(_, to)| *to)
    }

    /// Whether an operation is permitted while in this state
    pub fn allows(self, operation: Operation) -> bool {
        use LifecycleState::*;
        match operation {
            Operation::ProcessData => matches!(self, Active | Adapting | Stable | Degraded),
            Operation::QueryStatus => self != Conception,
            Operation::UpdateConfig => {
                matches!(self, Configuring | Specializing | Ready | Adapting | Maintaining)
            }
            Operation::EstablishConnection => {
                matches!(self, Ready | Active | Waiting | Adapting | Stable)
            }
            Operation::RunDiagnostics => {
                matches!(self.phase(), Phase::Operational | Phase::Degradation)
            }
            Operation::ResetConfig => self == Maintaining,
            Operation::AllocateResource => !self.is_terminating_or_terminal(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Conception => "CONCEPTION",
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::Configuring => "CONFIGURING",
            LifecycleState::Specializing => "SPECIALIZING",
            LifecycleState::Ready => "READY",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Waiting => "WAITING",
            LifecycleState::Adapting => "ADAPTING",
            LifecycleState::Stable => "STABLE",
            LifecycleState::Degraded => "DEGRADED",
            LifecycleState::Maintaining => "MAINTAINING",
            LifecycleState::Terminating => "TERMINATING",
            LifecycleState::Terminated => "TERMINATED",
            LifecycleState::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle phase grouping
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Creation,
    Operational,
    Degradation,
    Termination,
}

/// Every permitted explicit transition
pub const TRANSITIONS: &[(LifecycleState, LifecycleState)] = {
    use LifecycleState::*;
    &[
        // Creation
        (Conception, Initializing),
        (Initializing, Configuring),
        (Configuring, Specializing),
        (Specializing, Ready),
        (Ready, Active),
        // Operational
        (Active, Waiting),
        (Waiting, Active),
        (Active, Adapting),
        (Adapting, Active),
        (Active, Stable),
        (Stable, Active),
        // Degradation
        (Active, Degraded),
        (Waiting, Degraded),
        (Adapting, Degraded),
        (Stable, Degraded),
        (Degraded, Maintaining),
        (Maintaining, Active),
        // Termination
        (Terminating, Terminated),
        (Terminated, Archived),
    ]
};

/// Check a pair against [`TRANSITIONS`]
#[inline]
pub fn is_valid_transition(from: LifecycleState, to: LifecycleState) -> bool {
    TRANSITIONS.contains(&(from, to))
}

/// Operations gated by lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    ProcessData,
    QueryStatus,
    UpdateConfig,
    EstablishConnection,
    RunDiagnostics,
    ResetConfig,
    AllocateResource,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::ProcessData => "process_data",
            Operation::QueryStatus => "query_status",
            Operation::UpdateConfig => "update_config",
            Operation::EstablishConnection => "establish_connection",
            Operation::RunDiagnostics => "run_diagnostics",
            Operation::ResetConfig => "reset_config",
            Operation::AllocateResource => "allocate_resource",
        };
        f.write_str(name)
    }
}

/// Shared cell holding a component's current state.
///
/// The owning component is the only writer. Child identities keep a weak
/// reference to their parent's cell to observe whether it is still alive.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: LifecycleState) -> Self {
        StateCell(AtomicU8::new(state.to_byte()))
    }

    #[inline]
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_byte(self.0.load(Ordering::Acquire))
            .unwrap_or(LifecycleState::Terminated)
    }

    #[inline]
    pub(crate) fn set(&self, state: LifecycleState) {
        self.0.store(state.to_byte(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_byte_roundtrip() {
        for state in LifecycleState::ALL {
            assert_eq!(LifecycleState::from_byte(state.to_byte()), Some(state));
        }
        assert_eq!(LifecycleState::from_byte(0xff), None);
    }

    #[test]
    fn test_phases() {
        assert_eq!(LifecycleState::Specializing.phase(), Phase::Creation);
        assert_eq!(LifecycleState::Stable.phase(), Phase::Operational);
        assert_eq!(LifecycleState::Maintaining.phase(), Phase::Degradation);
        assert_eq!(LifecycleState::Archived.phase(), Phase::Termination);
    }

    #[test]
    fn test_creation_chain_is_linear() {
        let mut state = LifecycleState::Conception;
        let mut steps = 0;
        while state != LifecycleState::Ready {
            let next: Vec<_> = state.successors().collect();
            assert_eq!(next.len(), 1, "{state} must have a single successor");
            state = next[0];
            steps += 1;
        }
        assert_eq!(steps, 4);
    }

    #[test]
    fn test_terminal_states_have_no_exit_except_archive() {
        assert_eq!(
            LifecycleState::Terminated.successors().collect::<Vec<_>>(),
            vec![LifecycleState::Archived]
        );
        assert_eq!(LifecycleState::Archived.successors().count(), 0);
    }

    #[test]
    fn test_no_explicit_entry_into_terminating() {
        assert!(TRANSITIONS
            .iter()
            .all(|(_, to)| *to != LifecycleState::Terminating));
    }

    #[test]
    fn test_table_size_and_hub() {
        assert_eq!(TRANSITIONS.len(), 19);
        assert!(!is_valid_transition(LifecycleState::Waiting, LifecycleState::Adapting));
        assert!(!is_valid_transition(LifecycleState::Adapting, LifecycleState::Waiting));
        assert!(!is_valid_transition(LifecycleState::Maintaining, LifecycleState::Degraded));
        for state in [LifecycleState::Waiting, LifecycleState::Adapting, LifecycleState::Stable] {
            assert!(is_valid_transition(LifecycleState::Active, state));
            assert!(is_valid_transition(state, LifecycleState::Active));
            assert!(is_valid_transition(state, LifecycleState::Degraded));
        }
    }

    #[test]
    fn test_operation_gating() {
        assert!(LifecycleState::Active.allows(Operation::ProcessData));
        assert!(!LifecycleState::Ready.allows(Operation::ProcessData));
        assert!(LifecycleState::Maintaining.allows(Operation::ResetConfig));
        assert!(!LifecycleState::Active.allows(Operation::ResetConfig));
        assert!(!LifecycleState::Terminating.allows(Operation::AllocateResource));
        assert!(LifecycleState::Conception.allows(Operation::AllocateResource));
    }

    #[test]
    fn test_state_cell() {
        let cell = StateCell::new(LifecycleState::Conception);
        cell.set(LifecycleState::Active);
        assert_eq!(cell.get(), LifecycleState::Active);
    }

    fn any_state() -> impl Strategy<Value = LifecycleState> {
        (0..LifecycleState::ALL.len()).prop_map(|i| LifecycleState::ALL[i])
    }

    proptest! {
        #[test]
        fn test_successors_match_table(from in any_state(), to in any_state()) {
            let listed = from.successors().any(|s| s == to);
            prop_assert_eq!(listed, is_valid_transition(from, to));
        }

        #[test]
        fn test_terminal_never_processes(state in any_state()) {
            if state.is_terminating_or_terminal() {
                prop_assert!(!state.allows(Operation::ProcessData));
                prop_assert!(!state.allows(Operation::AllocateResource));
            }
        }
    }
}
