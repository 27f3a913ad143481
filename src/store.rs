//! Storage layer over an embedded sled database.
//!
//! One named tree per entity family. The only non-trivial write path is
//! [`DealStore::commit_update`]: a cross-tree transaction that checks the
//! optimistic-concurrency token and applies inventory releases atomically
//! with the record write, so a cancelled deal can never commit while its
//! units stay reserved.

use std::sync::Arc;

use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tracing::warn;

use crate::access::{DealFilter, PermissionProfile, ProfileSource, UserAssignments};
use crate::error::{LifecycleError, Result};
use crate::inventory::{self, Unit};
use crate::record::DealRecord;
use crate::utils;

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(LifecycleError::codec)
}

pub(crate) fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T> {
    minicbor::decode(bytes).map_err(LifecycleError::codec)
}

pub struct DealStore {
    deals: sled::Tree,
    units: sled::Tree,
    users: sled::Tree,
    projects: sled::Tree,
}

impl DealStore {
    pub fn open(db: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            deals: db.open_tree("deals")?,
            units: db.open_tree("units")?,
            users: db.open_tree("users")?,
            projects: db.open_tree("projects")?,
        })
    }

    /// The units tree, shared with the inventory coordinator.
    pub(crate) fn units_tree(&self) -> sled::Tree {
        self.units.clone()
    }

    // deal records

    pub fn insert_deal(&self, record: &DealRecord) -> Result<()> {
        let bytes = encode(record)?;
        self.deals.insert(record.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_deal(&self, id: &str) -> Result<Option<DealRecord>> {
        match self.deals.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn delete_deal(&self, id: &str) -> Result<bool> {
        Ok(self.deals.remove(id.as_bytes())?.is_some())
    }

    /// Scan deal records, applying the visibility predicate when present.
    pub fn list_deals(&self, filter: Option<&DealFilter>) -> Result<Vec<DealRecord>> {
        let mut out = Vec::new();
        for item in self.deals.iter() {
            let (_, raw) = item?;
            let record: DealRecord = decode(&raw)?;
            if filter.is_none_or(|f| f.matches(&record)) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Conditionally replace a deal record, matching `(id, expected_version)`
    /// and releasing `releases` in the same transaction. The store, not
    /// application logic, arbitrates concurrent writers: the loser observes
    /// `Conflict` here even when an earlier version check passed.
    pub fn commit_update(
        &self,
        expected_version: u64,
        record: &DealRecord,
        releases: &[String],
    ) -> Result<()> {
        let encoded = encode(record)?;
        let result = (&self.deals, &self.units).transaction(|(deals_tx, units_tx)| {
            let raw = deals_tx.get(record.id.as_bytes())?.ok_or_else(|| {
                ConflictableTransactionError::Abort(LifecycleError::NotFound(format!(
                    "deal record '{}'",
                    record.id
                )))
            })?;
            let stored: DealRecord =
                decode(&raw).map_err(ConflictableTransactionError::Abort)?;
            if stored.version != expected_version {
                return Err(ConflictableTransactionError::Abort(
                    LifecycleError::Conflict {
                        id: record.id.clone(),
                        reason: format!(
                            "expected version {expected_version}, found {}",
                            stored.version
                        ),
                    },
                ));
            }

            deals_tx.insert(record.id.as_bytes(), encoded.clone())?;

            for unit_id in releases {
                match units_tx.get(unit_id.as_bytes())? {
                    Some(raw) => {
                        let mut unit: Unit =
                            decode(&raw).map_err(ConflictableTransactionError::Abort)?;
                        inventory::apply_release(&mut unit);
                        let bytes =
                            encode(&unit).map_err(ConflictableTransactionError::Abort)?;
                        units_tx.insert(unit_id.as_bytes(), bytes)?;
                    }
                    // an absent unit cannot be double-sold; skip it
                    None => warn!(unit = %unit_id, deal = %record.id, "release skipped, unit missing"),
                }
            }

            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    // units

    pub fn put_unit(&self, unit: &Unit) -> Result<()> {
        let bytes = encode(unit)?;
        self.units.insert(unit.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_unit(&self, id: &str) -> Result<Option<Unit>> {
        match self.units.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    // users

    pub fn put_user_assignments(&self, user_id: &str, assignments: &UserAssignments) -> Result<()> {
        let bytes = encode(assignments)?;
        self.users.insert(user_id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_user_assignments(&self, user_id: &str) -> Result<Option<UserAssignments>> {
        match self.users.get(user_id.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    // projects

    /// Resolve a project scope by its code, creating it when unseen. Two
    /// concurrent creators race through compare-and-swap; the loser adopts
    /// the winner's id.
    pub fn resolve_or_create_project(&self, code: &str) -> Result<String> {
        if let Some(raw) = self.projects.get(code.as_bytes())? {
            return Ok(String::from_utf8_lossy(&raw).into_owned());
        }
        let id = utils::new_project_id()?;
        match self
            .projects
            .compare_and_swap(code.as_bytes(), None as Option<&[u8]>, Some(id.as_bytes()))?
        {
            Ok(()) => Ok(id),
            Err(cas) => {
                let raw = cas
                    .current
                    .ok_or_else(|| LifecycleError::Unavailable("project cas raced".into()))?;
                Ok(String::from_utf8_lossy(&raw).into_owned())
            }
        }
    }
}

impl ProfileSource for DealStore {
    fn resolve(&self, user_id: &str) -> Result<PermissionProfile> {
        let assignments = self
            .get_user_assignments(user_id)?
            .filter(|a| !(a.roles.is_empty() && a.project_ids.is_empty()))
            .ok_or_else(|| {
                LifecycleError::NotFound(format!("user '{user_id}' has no assignments"))
            })?;
        Ok(PermissionProfile::from_assignments(&assignments))
    }
}
