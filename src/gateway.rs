//! Real-time notification gateway.
//!
//! Rooms are the only broadcast scoping mechanism: a connection joins its
//! personal room at connect time, global admins additionally join the global
//! room, and project rooms are joined through an explicit request that is
//! re-authorized at join time against the permission cache. Transport
//! framing is out of scope; each connection receives events over a plain
//! mpsc channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::access::{self, ProfileSource};
use crate::cache::PermissionCache;
use crate::error::{LifecycleError, Result};
use crate::state::DealState;

/// Claims derived from a verified bearer credential. The gateway never
/// parses or verifies the credential itself.
#[derive(Debug, Clone)]
pub struct AccessClaims {
    pub user_id: String,
    pub is_global_admin: bool,
    pub role_claims: Vec<String>,
}

/// External collaborator verifying bearer credentials out-of-band.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, bearer: &str) -> Result<AccessClaims>;
}

/// Lifecycle events pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DealEvent {
    Created {
        deal_id: String,
        project_id: Option<String>,
    },
    Updated {
        deal_id: String,
        project_id: Option<String>,
    },
    /// Sent only to the owning user's personal room; state changes can carry
    /// information the wider admin pool should not see unfiltered.
    StateChanged {
        deal_id: String,
        owner_id: String,
        from: DealState,
        to: DealState,
    },
}

/// Seam between the command service and the gateway.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: DealEvent);
}

/// Notifier that drops everything; useful for embedders without a real-time
/// channel.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn publish(&self, _event: DealEvent) {}
}

pub type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RoomKey {
    Global,
    User(String),
    Project(String),
}

struct Connection {
    user_id: String,
    is_global_admin: bool,
    sender: Sender<DealEvent>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

impl Registry {
    fn join(&mut self, room: RoomKey, conn: ConnectionId) {
        self.rooms.entry(room).or_default().insert(conn);
    }

    fn leave_all(&mut self, conn: ConnectionId) {
        self.rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }
}

pub struct NotificationGateway {
    verifier: Arc<dyn TokenVerifier>,
    cache: Arc<PermissionCache>,
    profiles: Arc<dyn ProfileSource>,
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl NotificationGateway {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        cache: Arc<PermissionCache>,
        profiles: Arc<dyn ProfileSource>,
    ) -> Self {
        Self {
            verifier,
            cache,
            profiles,
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Handshake: verify the bearer credential, auto-join the personal room
    /// (and the global room for admins) and hand back the event channel.
    pub fn connect(&self, bearer: &str) -> Result<(ConnectionId, Receiver<DealEvent>)> {
        let claims = self.verifier.verify(bearer)?;
        let (sender, receiver) = channel();
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.registry.write();
        registry.join(RoomKey::User(claims.user_id.clone()), conn_id);
        if claims.is_global_admin {
            registry.join(RoomKey::Global, conn_id);
        }
        registry.connections.insert(
            conn_id,
            Connection {
                user_id: claims.user_id,
                is_global_admin: claims.is_global_admin,
                sender,
            },
        );
        Ok((conn_id, receiver))
    }

    /// Join a project-scoped room. Authorization is re-checked here, at join
    /// time, not just at connect time; an unauthorized attempt is logged and
    /// silently dropped so callers cannot probe which projects exist.
    pub fn join_project(&self, conn_id: ConnectionId, project_id: &str) -> Result<()> {
        let (user_id, is_admin) = {
            let registry = self.registry.read();
            let conn = registry.connections.get(&conn_id).ok_or_else(|| {
                LifecycleError::NotFound(format!("connection '{conn_id}'"))
            })?;
            (conn.user_id.clone(), conn.is_global_admin)
        };

        let authorized = if is_admin {
            // confirm the claim against current assignments
            self.cache
                .get_or_fetch(&user_id, self.profiles.as_ref())
                .map(|p| p.is_global_admin())
                .unwrap_or(false)
        } else {
            match self.cache.get_or_fetch(&user_id, self.profiles.as_ref()) {
                Ok(profile) => {
                    profile.is_global_admin()
                        || profile.has(access::PERM_VIEW_ALL)
                        || (profile.project_ids.contains(project_id)
                            && (profile.has(access::PERM_EDIT)
                                || profile.has(access::PERM_APPROVE)))
                }
                Err(_) => false,
            }
        };

        if !authorized {
            warn!(user = %user_id, project = %project_id, "unauthorized project room join dropped");
            return Ok(());
        }

        self.registry
            .write()
            .join(RoomKey::Project(project_id.to_string()), conn_id);
        Ok(())
    }

    /// Drop the connection and all of its room memberships immediately.
    pub fn disconnect(&self, conn_id: ConnectionId) {
        let mut registry = self.registry.write();
        registry.connections.remove(&conn_id);
        registry.leave_all(conn_id);
    }

    fn rooms_for(event: &DealEvent) -> Vec<RoomKey> {
        match event {
            DealEvent::Created { project_id, .. } | DealEvent::Updated { project_id, .. } => {
                let mut rooms = vec![RoomKey::Global];
                if let Some(p) = project_id {
                    rooms.push(RoomKey::Project(p.clone()));
                }
                rooms
            }
            DealEvent::StateChanged { owner_id, .. } => vec![RoomKey::User(owner_id.clone())],
        }
    }

    fn broadcast(&self, event: DealEvent) {
        // snapshot the recipients under the lock, send without it
        let senders: Vec<Sender<DealEvent>> = {
            let registry = self.registry.read();
            let mut targets: HashSet<ConnectionId> = HashSet::new();
            for room in Self::rooms_for(&event) {
                if let Some(members) = registry.rooms.get(&room) {
                    targets.extend(members.iter().copied());
                }
            }
            targets
                .into_iter()
                .filter_map(|id| registry.connections.get(&id))
                .map(|c| c.sender.clone())
                .collect()
        };

        for sender in senders {
            if sender.send(event.clone()).is_err() {
                debug!("dropping event for a disconnected receiver");
            }
        }
    }
}

impl Notifier for NotificationGateway {
    fn publish(&self, event: DealEvent) {
        self.broadcast(event);
    }
}
