//! Permission resolution and query visibility.
//!
//! Every authorization decision in the command service and the notification
//! gateway consults [`PermissionProfile`]s produced here (through the cache),
//! never the store directly. The filter built by [`build_filter`] is a
//! passive predicate handed to the storage scan; this module performs no
//! storage calls itself.

use std::collections::HashSet;

use crate::error::Result;
use crate::record::DealRecord;
use crate::state::DealState;

pub const PERM_VIEW_ALL: &str = "deals:view-all";
pub const PERM_EDIT: &str = "deals:edit";
pub const PERM_SIGN: &str = "deals:sign";
pub const PERM_APPROVE: &str = "deals:approve";
pub const PERM_ADMIN: &str = "deals:admin";

/// Static role -> permission table. Role administration itself is an
/// external collaborator; this layer only maps role names to capabilities.
pub fn role_permissions(role: &str) -> &'static [&'static str] {
    match role {
        "admin" => &[PERM_ADMIN, PERM_VIEW_ALL, PERM_EDIT, PERM_SIGN, PERM_APPROVE],
        "director" => &[PERM_VIEW_ALL, PERM_APPROVE, PERM_EDIT],
        "manager" => &[PERM_EDIT, PERM_APPROVE],
        "agent" => &[PERM_EDIT],
        "notary" => &[PERM_SIGN],
        _ => &[],
    }
}

/// Role and project assignments as persisted per user.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default)]
pub struct UserAssignments {
    #[n(0)]
    pub roles: Vec<String>,
    #[n(1)]
    pub project_ids: Vec<String>,
    #[n(2)]
    pub email: Option<String>,
}

/// Derived view of a requester's effective access. Rebuilt from the store on
/// cache miss or expiry, never persisted on its own.
#[derive(Debug, Clone)]
pub struct PermissionProfile {
    pub permissions: HashSet<String>,
    pub project_ids: HashSet<String>,
    pub roles: HashSet<String>,
}

impl PermissionProfile {
    pub fn from_assignments(assignments: &UserAssignments) -> Self {
        let mut permissions = HashSet::new();
        for role in &assignments.roles {
            for perm in role_permissions(role) {
                permissions.insert((*perm).to_string());
            }
        }
        Self {
            permissions,
            project_ids: assignments.project_ids.iter().cloned().collect(),
            roles: assignments.roles.iter().cloned().collect(),
        }
    }

    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_global_admin(&self) -> bool {
        self.has(PERM_ADMIN)
    }
}

/// Source of truth behind the cache: resolves a user's profile from storage.
/// Fails with `NotFound` when the user has no role or project assignments.
pub trait ProfileSource: Send + Sync {
    fn resolve(&self, user_id: &str) -> Result<PermissionProfile>;
}

/// Narrowing a caller may request on a list/read query.
#[derive(Debug, Clone, Default)]
pub struct DealQuery {
    pub project_id: Option<String>,
    pub owner_id: Option<String>,
}

/// Visibility predicate over deal records. Handed to the storage scan
/// unmodified.
#[derive(Debug, Clone)]
pub enum DealFilter {
    /// Explicit narrowing on top of unrestricted visibility.
    Scoped {
        project_id: Option<String>,
        owner_id: Option<String>,
    },
    /// Signers see approved/signed deals plus their own.
    SignVisibility { requester_id: String },
    /// Project members see their own deals plus those in assigned projects.
    OwnerOrProjects {
        owner_id: String,
        project_ids: HashSet<String>,
    },
    /// Matches nothing. Produced when a query names a project outside the
    /// requester's scope; deliberately not an error.
    Nothing,
}

impl DealFilter {
    pub fn matches(&self, record: &DealRecord) -> bool {
        match self {
            DealFilter::Scoped {
                project_id,
                owner_id,
            } => {
                let project_ok = project_id
                    .as_ref()
                    .is_none_or(|p| record.project_id.as_ref() == Some(p));
                let owner_ok = owner_id.as_ref().is_none_or(|o| &record.owner_id == o);
                project_ok && owner_ok
            }
            DealFilter::SignVisibility { requester_id } => {
                matches!(record.state, DealState::Approved | DealState::Signed)
                    || record.owner_id == *requester_id
            }
            DealFilter::OwnerOrProjects {
                owner_id,
                project_ids,
            } => {
                record.owner_id == *owner_id
                    || record
                        .project_id
                        .as_ref()
                        .is_some_and(|p| project_ids.contains(p))
            }
            DealFilter::Nothing => false,
        }
    }
}

/// Build the visibility predicate for a requester. `None` means the query
/// runs unrestricted.
pub fn build_filter(
    query: &DealQuery,
    requester_id: &str,
    profile: &PermissionProfile,
) -> Option<DealFilter> {
    if profile.has(PERM_VIEW_ALL) || profile.is_global_admin() {
        if query.project_id.is_none() && query.owner_id.is_none() {
            return None;
        }
        return Some(DealFilter::Scoped {
            project_id: query.project_id.clone(),
            owner_id: query.owner_id.clone(),
        });
    }

    if profile.has(PERM_SIGN) {
        return Some(DealFilter::SignVisibility {
            requester_id: requester_id.to_string(),
        });
    }

    if let Some(project) = &query.project_id {
        if !profile.project_ids.contains(project) {
            return Some(DealFilter::Nothing);
        }
        // named project is in scope: narrow the whole query down to it
        return Some(DealFilter::Scoped {
            project_id: Some(project.clone()),
            owner_id: None,
        });
    }

    Some(DealFilter::OwnerOrProjects {
        owner_id: requester_id.to_string(),
        project_ids: profile.project_ids.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DealDraft, DealPayload};

    fn record(owner: &str, project: Option<&str>, state: DealState) -> DealRecord {
        let mut r = DealRecord::new(
            "deal_t".into(),
            owner.into(),
            project.map(str::to_string),
            DealDraft {
                payload: DealPayload::default(),
                ..Default::default()
            },
        );
        r.state = state;
        r
    }

    fn profile(roles: &[&str], projects: &[&str]) -> PermissionProfile {
        PermissionProfile::from_assignments(&UserAssignments {
            roles: roles.iter().map(|s| s.to_string()).collect(),
            project_ids: projects.iter().map(|s| s.to_string()).collect(),
            email: None,
        })
    }

    #[test]
    fn view_all_without_narrowing_is_unrestricted() {
        let p = profile(&["director"], &[]);
        assert!(build_filter(&DealQuery::default(), "user_a", &p).is_none());
    }

    #[test]
    fn view_all_honors_explicit_narrowing() {
        let p = profile(&["admin"], &[]);
        let q = DealQuery {
            project_id: Some("proj_1".into()),
            owner_id: None,
        };
        let f = build_filter(&q, "user_a", &p).unwrap();
        assert!(f.matches(&record("user_b", Some("proj_1"), DealState::Pending)));
        assert!(!f.matches(&record("user_b", Some("proj_2"), DealState::Pending)));
    }

    #[test]
    fn signers_see_approved_signed_and_their_own() {
        let p = profile(&["notary"], &[]);
        let f = build_filter(&DealQuery::default(), "user_n", &p).unwrap();

        assert!(f.matches(&record("user_b", None, DealState::Approved)));
        assert!(f.matches(&record("user_b", None, DealState::Signed)));
        assert!(f.matches(&record("user_n", None, DealState::Pending)));
        assert!(!f.matches(&record("user_b", None, DealState::Pending)));
    }

    #[test]
    fn project_members_are_scoped_to_their_projects() {
        let p = profile(&["agent"], &["proj_1"]);
        let f = build_filter(&DealQuery::default(), "user_a", &p).unwrap();

        assert!(f.matches(&record("user_a", None, DealState::Pending)));
        assert!(f.matches(&record("user_b", Some("proj_1"), DealState::Pending)));
        assert!(!f.matches(&record("user_b", Some("proj_2"), DealState::Pending)));
    }

    #[test]
    fn naming_a_foreign_project_yields_no_results_not_an_error() {
        let p = profile(&["agent"], &["proj_1"]);
        let q = DealQuery {
            project_id: Some("proj_9".into()),
            owner_id: None,
        };
        let f = build_filter(&q, "user_a", &p).unwrap();
        // even the requester's own records stay hidden under the named scope
        assert!(!f.matches(&record("user_a", Some("proj_9"), DealState::Pending)));
    }
}
