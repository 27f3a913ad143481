//! Property-based tests for the deal state machine.
//!
//! The transition table is re-stated here independently of the
//! implementation, so these properties catch a drifting table as well as a
//! broken lookup.

use deal_lifecycle::error::LifecycleError;
use deal_lifecycle::state::{DealState, MIN_JUSTIFICATION_LEN, validate_transition};
use proptest::prelude::*;

const ALL_STATES: [DealState; 9] = [
    DealState::Pending,
    DealState::Approved,
    DealState::InEdit,
    DealState::Signed,
    DealState::Cancelled,
    DealState::Provisional,
    DealState::InReview,
    DealState::Definitive,
    DealState::Rejected,
];

/// The allowed transition pairs, restated from the lifecycle contract.
const TABLE: [(DealState, DealState); 10] = [
    (DealState::Pending, DealState::Approved),
    (DealState::Pending, DealState::Cancelled),
    (DealState::Pending, DealState::InEdit),
    (DealState::Approved, DealState::Signed),
    (DealState::Approved, DealState::Cancelled),
    (DealState::Approved, DealState::InEdit),
    (DealState::InEdit, DealState::Pending),
    (DealState::Provisional, DealState::InReview),
    (DealState::Provisional, DealState::Rejected),
    (DealState::InReview, DealState::Definitive),
];

// the legacy review loop rows, kept separate for readability
const LEGACY_EXTRA: [(DealState, DealState); 2] = [
    (DealState::InReview, DealState::Rejected),
    (DealState::InReview, DealState::Provisional),
];

fn in_table(from: DealState, to: DealState) -> bool {
    TABLE.contains(&(from, to)) || LEGACY_EXTRA.contains(&(from, to))
}

fn state_strategy() -> impl Strategy<Value = DealState> {
    (0usize..ALL_STATES.len()).prop_map(|i| ALL_STATES[i])
}

/// Strategy for comments of a controlled trimmed length, with random
/// whitespace padding that must not count toward the minimum.
fn padded_comment_strategy() -> impl Strategy<Value = (String, usize)> {
    (0usize..30, 0usize..4).prop_map(|(len, pad)| {
        let core = "x".repeat(len);
        let padding = " ".repeat(pad);
        (format!("{padding}{core}{padding}"), len)
    })
}

proptest! {
    /// Property: for every (current, next) pair, `validate_transition`
    /// succeeds exactly when the pair is in the transition table. The
    /// comment is always long enough, so the justification rule never
    /// interferes.
    #[test]
    fn prop_table_membership_decides_validity(
        from in state_strategy(),
        to in state_strategy(),
    ) {
        let result = validate_transition(from, to, Some("a sufficiently long justification"));
        if in_table(from, to) {
            prop_assert!(result.is_ok(), "{from} -> {to} should be allowed");
        } else {
            prop_assert!(
                matches!(result, Err(LifecycleError::InvalidTransition { .. })),
                "{from} -> {to} should fail with InvalidTransition, got {result:?}"
            );
        }
    }

    /// Property: transitions into cancelled/rejected succeed exactly when
    /// the trimmed comment reaches the minimum length; padding never counts.
    #[test]
    fn prop_justification_counts_trimmed_characters(
        (comment, trimmed_len) in padded_comment_strategy(),
        reject in prop::bool::ANY,
    ) {
        let (from, to) = if reject {
            (DealState::Provisional, DealState::Rejected)
        } else {
            (DealState::Pending, DealState::Cancelled)
        };

        let result = validate_transition(from, to, Some(&comment));
        if trimmed_len >= MIN_JUSTIFICATION_LEN {
            prop_assert!(result.is_ok(), "comment of {trimmed_len} chars should pass");
        } else {
            prop_assert!(
                matches!(result, Err(LifecycleError::MissingJustification { .. })),
                "comment of {trimmed_len} chars should fail, got {result:?}"
            );
        }
    }

    /// Property: a missing comment behaves like an empty one.
    #[test]
    fn prop_absent_comment_never_justifies(
        from in state_strategy(),
    ) {
        for to in [DealState::Cancelled, DealState::Rejected] {
            if in_table(from, to) {
                let result = validate_transition(from, to, None);
                prop_assert!(
                    matches!(result, Err(LifecycleError::MissingJustification { .. })),
                    "absent comment should fail, got {result:?}"
                );
            }
        }
    }

    /// Property: terminal states allow no exit whatsoever.
    #[test]
    fn prop_terminal_states_are_final(
        to in state_strategy(),
    ) {
        for terminal in [
            DealState::Signed,
            DealState::Cancelled,
            DealState::Definitive,
            DealState::Rejected,
        ] {
            let result = validate_transition(terminal, to, Some("a sufficiently long comment"));
            prop_assert!(result.is_err(), "{terminal} -> {to} must never validate");
        }
    }

    /// Property: the error names every allowed alternative so the caller can
    /// correct the request.
    #[test]
    fn prop_rejection_lists_the_alternatives(
        from in state_strategy(),
        to in state_strategy(),
    ) {
        if in_table(from, to) {
            return Ok(());
        }
        match validate_transition(from, to, Some("a sufficiently long comment")) {
            Err(LifecycleError::InvalidTransition { allowed, .. }) => {
                for next in from.allowed_transitions() {
                    prop_assert!(
                        allowed.contains(next.as_str()),
                        "allowed list '{allowed}' should mention '{next}'"
                    );
                }
            }
            other => prop_assert!(false, "expected InvalidTransition, got {other:?}"),
        }
    }
}
