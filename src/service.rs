//! Service layer API for deal record workflow operations.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::access::{self, DealQuery, PermissionProfile, UserAssignments, build_filter};
use crate::audit::{AuditEntry, AuditSink};
use crate::cache::PermissionCache;
use crate::error::{LifecycleError, Result};
use crate::gateway::{DealEvent, Notifier};
use crate::inventory::InventoryCoordinator;
use crate::record::{DealDraft, DealPatch, DealRecord};
use crate::state::{self, DealState};
use crate::store::DealStore;
use crate::utils;

pub struct DealService {
    store: Arc<DealStore>,
    cache: Arc<PermissionCache>,
    inventory: InventoryCoordinator,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
}

impl DealService {
    pub fn new(
        store: Arc<DealStore>,
        cache: Arc<PermissionCache>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let inventory = InventoryCoordinator::new(&store);
        Self {
            store,
            cache,
            inventory,
            audit,
            notifier,
        }
    }

    fn profile(&self, user_id: &str) -> Result<PermissionProfile> {
        self.cache.get_or_fetch(user_id, self.store.as_ref())
    }

    /// Create a new deal record at `version = 1, state = pending`, reserving
    /// every unit the payload references.
    pub fn create(&self, draft: DealDraft, requester_id: &str) -> Result<DealRecord> {
        // the requester must at least resolve to a profile
        self.profile(requester_id)?;

        let project_id = match (&draft.project_id, &draft.payload.project_code) {
            (Some(id), _) => Some(id.clone()),
            (None, Some(code)) => Some(self.store.resolve_or_create_project(code)?),
            (None, None) => None,
        };

        let id = utils::new_deal_id()?;
        let record = DealRecord::new(id, requester_id.to_string(), project_id, draft);

        self.store.insert_deal(&record)?;
        if let Err(e) = self.inventory.reserve(&record.payload.unit_ids) {
            // the record is already persisted; surface the failure so the
            // caller can retry or abandon, never pretend the units are held
            error!(deal = %record.id, err = %e, "unit reservation failed after create");
            return Err(e);
        }

        info!(deal = %record.id, owner = %record.owner_id, "deal record created");
        self.audit_event(
            "deal.create",
            &record.id,
            requester_id,
            format!("created deal record in state '{}'", record.state),
        );
        self.notifier.publish(DealEvent::Created {
            deal_id: record.id.clone(),
            project_id: record.project_id.clone(),
        });
        Ok(record)
    }

    /// Update a deal record under optimistic concurrency. A state change
    /// runs the full transition pipeline; the cancel release commits in the
    /// same transaction as the conditional write.
    pub fn update(&self, id: &str, patch: DealPatch, requester_id: &str) -> Result<DealRecord> {
        let record = self
            .store
            .get_deal(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("deal record '{id}'")))?;
        let profile = self.profile(requester_id)?;

        // stale caller-supplied version fails before any other validation
        if let Some(v) = patch.version {
            if v != record.version {
                return Err(LifecycleError::Conflict {
                    id: id.to_string(),
                    reason: format!("submitted version {v}, current is {}", record.version),
                });
            }
        }

        self.authorize_edit(&record, requester_id, &profile)?;

        let mut next_state = None;
        if let Some(raw) = &patch.state {
            let requested = DealState::parse(raw)?;
            if requested != record.state {
                let comment = patch.comment.as_deref();
                state::validate_transition(record.state, requested, comment)?;
                state::validate_approval_permission(
                    requested,
                    &profile.permissions,
                    profile.is_global_admin(),
                )?;
                next_state = Some(requested);
            }
        }

        let releases = next_state
            .map(|s| state::units_to_release(s, &record))
            .unwrap_or_default();

        let updated = record.apply_patch(&patch, next_state);
        self.store
            .commit_update(record.version, &updated, &releases)?;

        info!(deal = %id, version = updated.version, "deal record updated");
        self.audit_event(
            "deal.update",
            id,
            requester_id,
            match next_state {
                Some(s) => format!("state '{}' -> '{s}'", record.state),
                None => format!("fields updated at version {}", updated.version),
            },
        );

        match next_state {
            Some(to) => self.notifier.publish(DealEvent::StateChanged {
                deal_id: updated.id.clone(),
                owner_id: updated.owner_id.clone(),
                from: record.state,
                to,
            }),
            None => self.notifier.publish(DealEvent::Updated {
                deal_id: updated.id.clone(),
                project_id: updated.project_id.clone(),
            }),
        }
        Ok(updated)
    }

    /// Physically delete a deal record. Removal bypasses state tracking but
    /// requires ownership or global-admin visibility, and is audited.
    pub fn remove(&self, id: &str, requester_id: &str) -> Result<()> {
        let record = self
            .store
            .get_deal(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("deal record '{id}'")))?;
        let profile = self.profile(requester_id)?;

        // read-path visibility first, then the stricter ownership rule
        let visible = build_filter(&DealQuery::default(), requester_id, &profile)
            .is_none_or(|f| f.matches(&record));
        if !visible {
            // indistinguishable from absence, so scope cannot be probed
            return Err(LifecycleError::NotFound(format!("deal record '{id}'")));
        }
        if !(record.owner_id == requester_id || profile.is_global_admin()) {
            return Err(LifecycleError::Forbidden(format!(
                "removal of '{id}' requires ownership or admin access"
            )));
        }

        self.store.delete_deal(id)?;
        info!(deal = %id, actor = %requester_id, "deal record removed");
        self.audit_event(
            "deal.remove",
            id,
            requester_id,
            "deal record permanently removed".to_string(),
        );
        Ok(())
    }

    /// List deal records visible to the requester, optionally narrowed by
    /// the query.
    pub fn list(&self, query: &DealQuery, requester_id: &str) -> Result<Vec<DealRecord>> {
        let profile = self.profile(requester_id)?;
        let filter = build_filter(query, requester_id, &profile);
        self.store.list_deals(filter.as_ref())
    }

    /// Fetch a single record, subject to the requester's visibility.
    pub fn get(&self, id: &str, requester_id: &str) -> Result<DealRecord> {
        let record = self
            .store
            .get_deal(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("deal record '{id}'")))?;
        let profile = self.profile(requester_id)?;
        let visible = build_filter(&DealQuery::default(), requester_id, &profile)
            .is_none_or(|f| f.matches(&record));
        if !visible {
            // indistinguishable from absence, so scope cannot be probed
            return Err(LifecycleError::NotFound(format!("deal record '{id}'")));
        }
        Ok(record)
    }

    /// Persist new role/project assignments and synchronously invalidate the
    /// cached profile so the change takes effect immediately.
    pub fn update_user_assignments(
        &self,
        user_id: &str,
        assignments: &UserAssignments,
    ) -> Result<()> {
        self.store.put_user_assignments(user_id, assignments)?;
        self.cache.invalidate(user_id);
        Ok(())
    }

    fn authorize_edit(
        &self,
        record: &DealRecord,
        requester_id: &str,
        profile: &PermissionProfile,
    ) -> Result<()> {
        // view-all is a read permission; it never widens the edit rule
        if record.owner_id == requester_id || profile.is_global_admin() {
            return Ok(());
        }
        let project_member = record
            .project_id
            .as_ref()
            .is_some_and(|p| profile.project_ids.contains(p));
        if project_member && profile.has(access::PERM_EDIT) {
            return Ok(());
        }
        Err(LifecycleError::Forbidden(format!(
            "'{requester_id}' may not edit deal record '{}'",
            record.id
        )))
    }

    fn audit_event(&self, action: &str, entity: &str, actor: &str, description: String) {
        let email = self
            .store
            .get_user_assignments(actor)
            .ok()
            .flatten()
            .and_then(|a| a.email);
        let entry = AuditEntry {
            action: action.to_string(),
            description,
            impact: "deal-records".to_string(),
            affected_entity: entity.to_string(),
            actor_id: actor.to_string(),
            actor_email: email,
        };
        if let Err(e) = self.audit.record(entry) {
            warn!(action, entity, err = %e, "audit sink failed, continuing");
        }
    }
}
