//! Agent registry
//!
//! Each registered agent lives in an `AgentSlot`: its profile, an atomic
//! status, and the agent itself behind an async mutex. Status reads never
//! wait on a running agent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use agent::{Agent, AgentDescriptor, AgentProfile, AgentRole, AgentStatus};

/// A registered agent
pub struct AgentSlot {
    profile: AgentProfile,
    status: AtomicU8,
    agent: Mutex<Box<dyn Agent>>,
}

impl AgentSlot {
    pub fn new(agent: Box<dyn Agent>) -> Self {
        Self {
            profile: agent.profile().clone(),
            status: AtomicU8::new(AgentStatus::Idle as u8),
            agent: Mutex::new(agent),
        }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor::from_profile(&self.profile, self.status())
    }

    /// The agent itself; only lock while holding a `BusyGuard`
    pub fn agent(&self) -> &Mutex<Box<dyn Agent>> {
        &self.agent
    }

    /// Set a non-busy status; refuses while the agent is busy
    pub fn set_status(&self, status: AgentStatus) -> bool {
        if status == AgentStatus::Busy {
            return false;
        }
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != AgentStatus::Busy as u8).then_some(status as u8)
            })
            .is_ok()
    }
}

/// Marks an agent busy for its lifetime; idle again on drop
pub struct BusyGuard {
    slot: Arc<AgentSlot>,
}

impl BusyGuard {
    /// Atomically move the slot from idle to busy
    pub fn try_acquire(slot: &Arc<AgentSlot>) -> Option<Self> {
        slot.status
            .compare_exchange(
                AgentStatus::Idle as u8,
                AgentStatus::Busy as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| Self { slot: slot.clone() })
    }

    pub fn slot(&self) -> &Arc<AgentSlot> {
        &self.slot
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.slot
            .status
            .store(AgentStatus::Idle as u8, Ordering::Release);
    }
}

/// Registered agents in registration order
#[derive(Default)]
pub struct AgentRegistry {
    slots: HashMap<String, Arc<AgentSlot>>,
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an agent; an existing id is replaced in place
    pub fn insert(&mut self, agent: Box<dyn Agent>) -> Arc<AgentSlot> {
        let slot = Arc::new(AgentSlot::new(agent));
        let id = slot.id().to_string();
        if self.slots.insert(id.clone(), slot.clone()).is_none() {
            self.order.push(id);
        }
        slot
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<AgentSlot>> {
        let slot = self.slots.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(slot)
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentSlot>> {
        self.slots.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Slots in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentSlot>> {
        self.order.iter().filter_map(|id| self.slots.get(id))
    }

    pub fn by_role(&self, role: AgentRole) -> Vec<Arc<AgentSlot>> {
        self.iter()
            .filter(|slot| slot.profile().role == role)
            .cloned()
            .collect()
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.iter().map(|slot| slot.descriptor()).collect()
    }
}
