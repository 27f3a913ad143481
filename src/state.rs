//! Deal record state machine.
//!
//! States are a closed enumeration; free-form strings coming over the wire
//! (or sitting in older rows) are normalized once at the boundary via
//! [`DealState::parse`] and never compared as strings inside the logic.
//! A legacy vocabulary (`provisional -> in_review -> definitive`, with
//! `rejected`) is carried alongside the current one; both graphs go through
//! the same transition-table lookup keyed by the current state.

use std::collections::HashSet;
use std::fmt;

use crate::access;
use crate::error::{LifecycleError, Result};
use crate::record::DealRecord;

/// Minimum trimmed length of the justification comment required when a deal
/// is cancelled or rejected.
pub const MIN_JUSTIFICATION_LEN: usize = 10;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cbor(index_only)]
pub enum DealState {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    InEdit,
    #[n(3)]
    Signed,
    #[n(4)]
    Cancelled,
    // legacy vocabulary, still accepted on the wire
    #[n(5)]
    Provisional,
    #[n(6)]
    InReview,
    #[n(7)]
    Definitive,
    #[n(8)]
    Rejected,
}

impl DealState {
    /// Normalize a free-form state string to its canonical form: trimmed,
    /// lowercased, separators collapsed to underscores.
    pub fn parse(raw: &str) -> Result<Self> {
        let canon: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();

        match canon.as_str() {
            "pending" => Ok(DealState::Pending),
            "approved" => Ok(DealState::Approved),
            "in_edit" => Ok(DealState::InEdit),
            "signed" => Ok(DealState::Signed),
            "cancelled" | "canceled" => Ok(DealState::Cancelled),
            "provisional" => Ok(DealState::Provisional),
            "in_review" => Ok(DealState::InReview),
            "definitive" => Ok(DealState::Definitive),
            "rejected" => Ok(DealState::Rejected),
            _ => Err(LifecycleError::InvalidState(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DealState::Pending => "pending",
            DealState::Approved => "approved",
            DealState::InEdit => "in_edit",
            DealState::Signed => "signed",
            DealState::Cancelled => "cancelled",
            DealState::Provisional => "provisional",
            DealState::InReview => "in_review",
            DealState::Definitive => "definitive",
            DealState::Rejected => "rejected",
        }
    }

    /// Allowed next states for this state. Terminal states return an empty
    /// slice.
    pub fn allowed_transitions(&self) -> &'static [DealState] {
        match self {
            DealState::Pending => &[DealState::Approved, DealState::Cancelled, DealState::InEdit],
            DealState::Approved => &[DealState::Signed, DealState::Cancelled, DealState::InEdit],
            DealState::InEdit => &[DealState::Pending],
            DealState::Signed | DealState::Cancelled => &[],
            DealState::Provisional => &[DealState::InReview, DealState::Rejected],
            DealState::InReview => &[
                DealState::Definitive,
                DealState::Rejected,
                DealState::Provisional,
            ],
            DealState::Definitive | DealState::Rejected => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Cancelling or rejecting a deal must be justified in writing.
    pub fn requires_justification(&self) -> bool {
        matches!(self, DealState::Cancelled | DealState::Rejected)
    }

    /// States that mark the deal as approved, across both vocabularies.
    pub fn is_approval_class(&self) -> bool {
        matches!(self, DealState::Approved | DealState::Definitive)
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate that `next` is reachable from `current` and that a justification
/// comment accompanies cancellations and rejections.
pub fn validate_transition(
    current: DealState,
    next: DealState,
    comment: Option<&str>,
) -> Result<()> {
    let allowed = current.allowed_transitions();
    if !allowed.contains(&next) {
        return Err(LifecycleError::InvalidTransition {
            from: current,
            to: next,
            allowed: allowed
                .iter()
                .map(DealState::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    if next.requires_justification() {
        let len = comment.map(|c| c.trim().chars().count()).unwrap_or(0);
        if len < MIN_JUSTIFICATION_LEN {
            return Err(LifecycleError::MissingJustification {
                min: MIN_JUSTIFICATION_LEN,
            });
        }
    }

    Ok(())
}

/// Entering the approval class requires either global admin or an approval
/// permission resolved from the requester's roles.
pub fn validate_approval_permission(
    next: DealState,
    permissions: &HashSet<String>,
    is_global_admin: bool,
) -> Result<()> {
    if !next.is_approval_class() {
        return Ok(());
    }
    if is_global_admin || permissions.contains(access::PERM_APPROVE) {
        return Ok(());
    }
    Err(LifecycleError::Forbidden(format!(
        "approval permission required to enter state '{next}'"
    )))
}

/// Units to release as a side effect of the transition. Only cancellation
/// touches inventory; signing does not currently mark units sold.
pub fn units_to_release(next: DealState, record: &DealRecord) -> Vec<String> {
    if next == DealState::Cancelled {
        record.payload.unit_ids.clone()
    } else {
        Vec::new()
    }
}
