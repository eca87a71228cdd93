use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{ast::ProgramId, ChariotError, ChariotResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub program: ProgramId,
    pub statement: usize,
    pub enabled: bool,
    /// Source of a single expression, evaluated in the paused run's scope.
    pub condition: Option<String>,
}

/// Breakpoints by top-level statement, shared by every run of a program.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    entries: DashMap<(ProgramId, usize), Breakpoint>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the breakpoint at `statement`, enabled.
    pub fn set(&self, program: &ProgramId, statement: usize, condition: Option<String>) -> Breakpoint {
        let breakpoint = Breakpoint {
            program: program.clone(),
            statement,
            enabled: true,
            condition,
        };
        self.entries
            .insert((program.clone(), statement), breakpoint.clone());
        tracing::debug!(program = %program, statement, "breakpoint set");
        breakpoint
    }

    pub fn remove(&self, program: &ProgramId, statement: usize) -> bool {
        self.entries
            .remove(&(program.clone(), statement))
            .is_some()
    }

    pub fn enable(&self, program: &ProgramId, statement: usize, enabled: bool) -> ChariotResult<()> {
        let mut entry = self
            .entries
            .get_mut(&(program.clone(), statement))
            .ok_or_else(|| {
                ChariotError::DebugProtocol(format!(
                    "no breakpoint at {}:{}",
                    program, statement
                ))
            })?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn get(&self, program: &ProgramId, statement: usize) -> Option<Breakpoint> {
        self.entries
            .get(&(program.clone(), statement))
            .map(|entry| entry.clone())
    }

    /// Enabled breakpoint at `statement`, if any.
    pub fn active(&self, program: &ProgramId, statement: usize) -> Option<Breakpoint> {
        self.get(program, statement).filter(|b| b.enabled)
    }

    pub fn has_enabled(&self, program: &ProgramId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.key().0 == *program && entry.enabled)
    }

    pub fn list(&self, program: Option<&ProgramId>) -> Vec<Breakpoint> {
        let mut breakpoints: Vec<Breakpoint> = self
            .entries
            .iter()
            .filter(|entry| program.map_or(true, |p| entry.key().0 == *p))
            .map(|entry| entry.value().clone())
            .collect();
        breakpoints.sort_by(|a, b| (&a.program, a.statement).cmp(&(&b.program, b.statement)));
        breakpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_enable_remove() {
        let table = BreakpointTable::new();
        let program = ProgramId::named("main");
        let other = ProgramId::named("other");

        table.set(&program, 3, None);
        table.set(&program, 1, Some("equal(x, 2)".to_string()));
        table.set(&other, 0, None);
        assert!(table.has_enabled(&program));

        let listed: Vec<usize> = table.list(Some(&program)).iter().map(|b| b.statement).collect();
        assert_eq!(listed, vec![1, 3]);
        assert_eq!(table.list(None).len(), 3);

        table.enable(&program, 1, false).unwrap();
        table.enable(&program, 3, false).unwrap();
        assert!(table.active(&program, 1).is_none());
        assert!(!table.has_enabled(&program));
        assert_eq!(
            table.get(&program, 1).unwrap().condition.as_deref(),
            Some("equal(x, 2)")
        );

        assert!(table.remove(&program, 3));
        assert!(!table.remove(&program, 3));
        assert!(matches!(
            table.enable(&program, 3, true),
            Err(ChariotError::DebugProtocol(_))
        ));
    }
}
