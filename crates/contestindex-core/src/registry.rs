//! Contract registry — the dynamically growing set of monitored contracts.
//!
//! The factory contract is known at startup; contest contracts are
//! discovered at runtime from `ContestCreated` events. Registration is
//! append-only with read-your-writes semantics: only the orchestrator
//! inserts, while monitor tasks read concurrently. Entries are removed only
//! on explicit contest teardown.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::event::normalize_address;

/// What role a registered contract plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    /// The factory that spawns contest contracts.
    Factory,
    /// A per-contest proposal/vote contract.
    Contest,
}

/// A single registered contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredContract {
    /// Lower-cased `0x…` address.
    pub address: String,
    pub kind: ContractKind,
}

/// Shared, clone-cheap registry of monitored contracts.
#[derive(Clone, Default)]
pub struct ContractRegistry {
    inner: Arc<RwLock<HashMap<String, RegisteredContract>>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract. Idempotent: returns `false` (and changes
    /// nothing) if the address is already known.
    pub fn register(&self, address: &str, kind: ContractKind) -> bool {
        let address = normalize_address(address);
        let mut map = self.inner.write().unwrap();
        if map.contains_key(&address) {
            return false;
        }
        map.insert(
            address.clone(),
            RegisteredContract {
                address: address.clone(),
                kind,
            },
        );
        tracing::info!(%address, ?kind, "registered contract");
        true
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .contains_key(&normalize_address(address))
    }

    pub fn kind_of(&self, address: &str) -> Option<ContractKind> {
        self.inner
            .read()
            .unwrap()
            .get(&normalize_address(address))
            .map(|c| c.kind)
    }

    /// Addresses of all registered contest contracts (factory excluded).
    pub fn contest_addresses(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .values()
            .filter(|c| c.kind == ContractKind::Contest)
            .map(|c| c.address.clone())
            .collect()
    }

    /// Remove a contract. Only used on explicit contest teardown.
    pub fn remove(&self, address: &str) -> bool {
        self.inner
            .write()
            .unwrap()
            .remove(&normalize_address(address))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
