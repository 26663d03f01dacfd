// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The pledge and allocation state machines. Every transition used
//! anywhere in the crate must pass through `validate_pledge_transition` /
//! `validate_allocation_transition`, so any transition not in these two
//! tables is a bug.

use crate::ledger::models::{AllocationStatus, PledgeStatus};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid pledge transition: {from:?} -> {to:?}")]
    InvalidPledgeTransition {
        from: PledgeStatus,
        to: PledgeStatus,
    },
    #[error("invalid allocation transition: {from:?} -> {to:?}")]
    InvalidAllocationTransition {
        from: AllocationStatus,
        to: AllocationStatus,
    },
}

pub fn validate_pledge_transition(
    from: PledgeStatus,
    to: PledgeStatus,
) -> Result<(), StateError> {
    use PledgeStatus::*;
    let allowed: &[PledgeStatus] = match from {
        Pledged => &[PartialReceipt, ProofSubmitted, Cancelled],
        PartialReceipt => &[PartialReceipt, ProofSubmitted, Cancelled],
        ProofSubmitted => &[Verified, PartiallyAllocated, Rejected],
        Verified => &[PartiallyAllocated, FullyAllocated],
        PartiallyAllocated => &[FullyAllocated, Verified],
        FullyAllocated => &[Closed, PartiallyAllocated],
        Closed | Cancelled | Rejected => &[],
    };
    if from == to || allowed.contains(&to) {
        Ok(())
    } else {
        Err(StateError::InvalidPledgeTransition { from, to })
    }
}

pub fn validate_allocation_transition(
    from: AllocationStatus,
    to: AllocationStatus,
) -> Result<(), StateError> {
    use AllocationStatus::*;
    let allowed: &[AllocationStatus] = match from {
        PendingHostel => &[HostelVerified, HostelQuery, Cancelled],
        HostelQuery => &[PendingHostel, Cancelled],
        HostelVerified => &[Completed],
        Completed | Cancelled => &[],
    };
    if from == to || allowed.contains(&to) {
        Ok(())
    } else {
        Err(StateError::InvalidAllocationTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AllocationStatus::*;
    use PledgeStatus::*;

    #[test]
    fn pledge_happy_path_is_allowed() {
        assert!(validate_pledge_transition(Pledged, ProofSubmitted).is_ok());
        assert!(validate_pledge_transition(ProofSubmitted, Verified).is_ok());
        assert!(validate_pledge_transition(Verified, FullyAllocated).is_ok());
        assert!(validate_pledge_transition(FullyAllocated, Closed).is_ok());
    }

    #[test]
    fn pledge_terminal_states_reject_everything_but_self() {
        for terminal in [Closed, Cancelled, Rejected] {
            for target in [
                Pledged,
                PartialReceipt,
                ProofSubmitted,
                Verified,
                PartiallyAllocated,
                FullyAllocated,
                Closed,
                Cancelled,
                Rejected,
            ] {
                let result = validate_pledge_transition(terminal, target);
                if target == terminal {
                    assert!(result.is_ok());
                } else {
                    assert!(result.is_err());
                }
            }
        }
    }

    #[test]
    fn allocation_happy_path_is_allowed() {
        assert!(validate_allocation_transition(PendingHostel, HostelVerified).is_ok());
        assert!(validate_allocation_transition(HostelVerified, Completed).is_ok());
    }

    #[test]
    fn allocation_cannot_skip_hostel_verified() {
        assert!(validate_allocation_transition(PendingHostel, Completed).is_err());
    }

    #[test]
    fn allocation_query_round_trips_to_pending() {
        assert!(validate_allocation_transition(PendingHostel, HostelQuery).is_ok());
        assert!(validate_allocation_transition(HostelQuery, PendingHostel).is_ok());
    }
}
