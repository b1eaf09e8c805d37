use std::{collections::BTreeMap, sync::Arc};

use crate::host::{CodeUnit, HostRuntime, UnitId};

/// Outcome of committing a batch of replacements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    /// Units now running the new code
    pub redefined: Vec<UnitId>,
    /// Units the host refused to redefine; they keep their prior code
    pub failed: Vec<UnitId>,
}

impl SwapReport {
    /// Returns `true` if every replacement was committed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Commits code replacements into the live host.
pub struct RuntimeSwapper {
    host: Arc<dyn HostRuntime>,
}

impl RuntimeSwapper {
    /// Creates a swapper for a host.
    pub fn new(host: Arc<dyn HostRuntime>) -> Self {
        RuntimeSwapper { host }
    }

    /// Redefines each unit with its replacement.
    ///
    /// A refused substitution is logged and does not stop the batch.
    pub fn commit(&self, replacements: BTreeMap<UnitId, CodeUnit>) -> SwapReport {
        let mut report = SwapReport::default();
        if replacements.is_empty() {
            return report;
        }

        for (unit, code) in replacements {
            match self.host.redefine(unit, code) {
                Ok(()) => report.redefined.push(unit),
                Err(error) => {
                    log::warn!(
                        "Failed to redefine unit {}: {}. Ignoring and resuming",
                        unit,
                        error
                    );
                    report.failed.push(unit);
                }
            }
        }

        log::info!("Redefined {} units", report.redefined.len());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryHost, MethodBody, UnitBuilder};

    #[test]
    fn test_refusal_does_not_abort_batch() -> crate::Result<()> {
        let host = Arc::new(InMemoryHost::new());
        let a = host.load(UnitBuilder::new("com.app.A").method("run", &[], |b| b));
        let b = host.load(UnitBuilder::new("com.app.B").method("run", &[], |b| b));
        host.refuse_redefinition(a.id, true);

        let mut replacements = BTreeMap::new();
        for unit in [a.id, b.id] {
            let mut code = host.current_code(unit)?;
            code.bodies.insert("run()".to_string(), MethodBody::new().source("new()"));
            replacements.insert(unit, code);
        }

        let report = RuntimeSwapper::new(host.clone()).commit(replacements);
        assert_eq!(report.redefined, vec![b.id]);
        assert_eq!(report.failed, vec![a.id]);
        assert!(!report.is_complete());
        assert_eq!(host.redefinitions_of(a.id), 0);
        Ok(())
    }
}
