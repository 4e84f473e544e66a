//! Run scoped record of the staging databases and roles created so far.
//! Append only; consulted by the cleanup path alone.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    StagingDatabase,
    Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Created {
        kind: ResourceKind,
        name: String,
        target: String,
    },
    /// The target's staging database now carries the production name.
    Promoted { target: String },
    /// The target's staging database holds the only complete copy left and
    /// must outlive the run.
    Retained { target: String },
}

#[derive(Debug, Default)]
pub struct ResourceLedger {
    events: Vec<LedgerEvent>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        ResourceLedger::default()
    }

    pub fn record_database(&mut self, name: &str, target: &str) {
        self.record(ResourceKind::StagingDatabase, name, target);
    }

    pub fn record_role(&mut self, name: &str, target: &str) {
        self.record(ResourceKind::Role, name, target);
    }

    fn record(&mut self, kind: ResourceKind, name: &str, target: &str) {
        self.events.push(LedgerEvent::Created {
            kind,
            name: name.to_string(),
            target: target.to_string(),
        });
    }

    pub fn mark_promoted(&mut self, target: &str) {
        self.events.push(LedgerEvent::Promoted {
            target: target.to_string(),
        });
    }

    pub fn retain(&mut self, target: &str) {
        self.events.push(LedgerEvent::Retained {
            target: target.to_string(),
        });
    }

    /// Whether cleanup must leave the target's resources alone.
    fn is_settled(&self, target: &str) -> bool {
        self.events.iter().any(|e| match e {
            LedgerEvent::Promoted { target: t } | LedgerEvent::Retained { target: t } => t == target,
            LedgerEvent::Created { .. } => false,
        })
    }

    pub fn is_promoted(&self, target: &str) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, LedgerEvent::Promoted { target: t } if t == target))
    }

    /// Resources of `kind` whose target was neither promoted nor retained,
    /// oldest first.
    pub fn pending(&self, kind: ResourceKind) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                LedgerEvent::Created {
                    kind: k,
                    name,
                    target,
                } if *k == kind && !self.is_settled(target) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn pending_databases(&self) -> Vec<String> {
        self.pending(ResourceKind::StagingDatabase)
    }

    pub fn pending_roles(&self) -> Vec<String> {
        self.pending(ResourceKind::Role)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
