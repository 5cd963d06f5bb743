//! In-memory session store for tests and dry runs

use std::collections::HashMap;

use super::{attach, LoadSummary, Session, SessionStore};
use crate::registry::{DeviceRegistry, Eui64};

/// Keeps every appended record in order, like the log would.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    log: Vec<Session>,
    current: HashMap<Eui64, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the log as if these records had been written earlier.
    pub fn with_records(records: Vec<Session>) -> Self {
        Self {
            log: records,
            current: HashMap::new(),
        }
    }

    /// Every record appended or seeded so far
    pub fn records(&self) -> &[Session] {
        &self.log
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&mut self, registry: &DeviceRegistry) -> anyhow::Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        self.current.clear();
        for session in self.log.clone() {
            attach(&mut self.current, registry, session, &mut summary);
        }
        Ok(summary)
    }

    fn append(&mut self, session: &Session) -> anyhow::Result<()> {
        self.log.push(session.clone());
        self.current.insert(session.dev_eui, session.clone());
        Ok(())
    }

    fn lookup(&self, dev_eui: &Eui64) -> Option<&Session> {
        self.current.get(dev_eui)
    }
}
