//! Replica-set role tracking and the stepdown transfer latch.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::catalog::Namespace;

/// This node's current replica-set role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    Primary,
    Secondary,
}

/// Tracks the node's role and guards role transitions.
///
/// `transfer_latch` is the lock a role change must hold exclusively before it
/// commits. Writers that need a stable role across a short critical section
/// (the scrub log bridge) hold it shared; they never block each other, only
/// the transition itself.
pub struct ReplicationCoordinator {
    role: RwLock<MemberRole>,
    transfer: RwLock<()>,
}

impl ReplicationCoordinator {
    pub fn new(role: MemberRole) -> Self {
        Self {
            role: RwLock::new(role),
            transfer: RwLock::new(()),
        }
    }

    pub fn new_primary() -> Self {
        Self::new(MemberRole::Primary)
    }

    pub fn role(&self) -> MemberRole {
        // A poisoned lock reads as Secondary: fail toward not accepting writes.
        self.role.read().map(|g| *g).unwrap_or(MemberRole::Secondary)
    }

    /// Whether this node may currently write to `ns`.
    ///
    /// The unreplicated local database is always writable on its own node;
    /// every replicated namespace requires the primary role.
    pub fn can_accept_writes_for(&self, ns: &Namespace) -> bool {
        ns.is_local() || self.role() == MemberRole::Primary
    }

    /// Relinquish the primary role.
    ///
    /// Blocks until every shared holder of the transfer latch has released
    /// it, so the transition cannot commit inside another writer's critical
    /// section.
    pub fn step_down(&self) {
        let _transfer = self.transfer.write();
        if let Ok(mut role) = self.role.write() {
            *role = MemberRole::Secondary;
        }
        tracing::info!("stepped down to secondary");
    }

    /// Assume the primary role.
    pub fn step_up(&self) {
        let _transfer = self.transfer.write();
        if let Ok(mut role) = self.role.write() {
            *role = MemberRole::Primary;
        }
        tracing::info!("stepped up to primary");
    }

    /// The latch taken exclusively by role transitions.
    pub fn transfer_latch(&self) -> &RwLock<()> {
        &self.transfer
    }
}
