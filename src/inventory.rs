//! Unit inventory side effects.
//!
//! Units are owned by catalog management elsewhere; this layer only flips
//! their commercial state as a side effect of deal transitions. Reservation
//! and release each run as a single sled transaction over the whole batch:
//! a unit believed reserved but actually free can be double-sold, so partial
//! failure is never swallowed.

use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tracing::{error, warn};

use crate::error::{LifecycleError, Result};
use crate::record::TimeStamp;
use crate::store::{DealStore, decode, encode};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
#[cbor(index_only)]
pub enum CommercialState {
    #[n(0)]
    Available,
    #[n(1)]
    Reserved,
    #[n(2)]
    Sold,
    #[n(3)]
    Unavailable,
}

/// A sellable inventory item.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone)]
pub struct Unit {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub commercial_state: CommercialState,
    #[n(2)]
    pub reserved_at: Option<TimeStamp<Utc>>,
    /// Reference to a client who showed interest, cleared on release.
    #[n(3)]
    pub interested_client: Option<String>,
}

impl Unit {
    pub fn available(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            commercial_state: CommercialState::Available,
            reserved_at: None,
            interested_client: None,
        }
    }
}

/// Mark a unit reserved, refreshing the timestamp when already reserved.
pub(crate) fn apply_reserve(unit: &mut Unit) {
    unit.commercial_state = CommercialState::Reserved;
    unit.reserved_at = Some(TimeStamp::now());
}

/// Mark a unit available again, clearing the reservation timestamp and the
/// interested-client reference.
pub(crate) fn apply_release(unit: &mut Unit) {
    unit.commercial_state = CommercialState::Available;
    unit.reserved_at = None;
    unit.interested_client = None;
}

pub struct InventoryCoordinator {
    units: sled::Tree,
}

impl InventoryCoordinator {
    pub fn new(store: &DealStore) -> Self {
        Self {
            units: store.units_tree(),
        }
    }

    /// Reserve every listed unit in one transaction. Idempotent per unit: a
    /// re-reservation refreshes the timestamp. A unit id with no stored unit
    /// fails the whole batch with `NotFound`.
    pub fn reserve(&self, unit_ids: &[String]) -> Result<()> {
        let result = self.units.transaction(|tx| {
            for unit_id in unit_ids {
                let raw = tx.get(unit_id.as_bytes())?.ok_or_else(|| {
                    ConflictableTransactionError::Abort(LifecycleError::NotFound(format!(
                        "unit '{unit_id}'"
                    )))
                })?;
                let mut unit: Unit = decode(&raw).map_err(ConflictableTransactionError::Abort)?;
                apply_reserve(&mut unit);
                let bytes = encode(&unit).map_err(ConflictableTransactionError::Abort)?;
                tx.insert(unit_id.as_bytes(), bytes)?;
            }
            Ok(())
        });

        self.finish("reserve", unit_ids, result)
    }

    /// Release every listed unit in one transaction. A missing unit is
    /// skipped with a warning rather than failing the batch.
    pub fn release(&self, unit_ids: &[String]) -> Result<()> {
        let result = self.units.transaction(|tx| {
            for unit_id in unit_ids {
                match tx.get(unit_id.as_bytes())? {
                    Some(raw) => {
                        let mut unit: Unit =
                            decode(&raw).map_err(ConflictableTransactionError::Abort)?;
                        apply_release(&mut unit);
                        let bytes =
                            encode(&unit).map_err(ConflictableTransactionError::Abort)?;
                        tx.insert(unit_id.as_bytes(), bytes)?;
                    }
                    None => warn!(unit = %unit_id, "release skipped, unit missing"),
                }
            }
            Ok(())
        });

        self.finish("release", unit_ids, result)
    }

    fn finish(
        &self,
        op: &str,
        unit_ids: &[String],
        result: std::result::Result<(), TransactionError<LifecycleError>>,
    ) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => {
                error!(op, units = ?unit_ids, err = %e, "inventory batch failed");
                Err(e)
            }
            Err(TransactionError::Storage(e)) => {
                error!(op, units = ?unit_ids, err = %e, "inventory batch failed");
                Err(e.into())
            }
        }
    }
}
