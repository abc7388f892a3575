use std::fmt;

use indexmap::IndexMap;
use indexmap::map::Entry;

/// Location of a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointLocation {
    /// Function symbol (e.g., `main`, `-[AppDelegate applicationDidFinishLaunching:]`).
    Symbol(String),

    /// Source file and line.
    FileLine {
        /// Source file name or path.
        file: String,

        /// 1-based line number.
        line: u32,
    },

    /// Watched variable or address, with optional condition.
    Watch {
        /// Variable name or address expression.
        target: String,

        /// Condition under which the watchpoint triggers.
        condition: Option<String>,
    },
}

impl BreakpointLocation {
    /// Breakpoint on a function symbol.
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self::Symbol(symbol.into())
    }

    /// Breakpoint on a source line.
    pub fn file_line(file: impl Into<String>, line: u32) -> Self {
        Self::FileLine {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(symbol) => f.write_str(symbol),
            Self::FileLine { file, line } => write!(f, "{file}:{line}"),
            Self::Watch {
                target,
                condition: Some(condition),
            } => write!(f, "{target} if {condition}"),
            Self::Watch {
                target,
                condition: None,
            } => f.write_str(target),
        }
    }
}

/// Kind of a debugger-assigned stop point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind {
    /// Code breakpoint.
    Breakpoint,

    /// Data watchpoint.
    Watchpoint,
}

/// Breakpoint (or watchpoint) placed through a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// ID assigned by the debugger.
    pub id: u32,

    /// Kind of stop point.
    pub kind: BreakpointKind,

    /// Where it was placed.
    pub location: BreakpointLocation,

    /// Whether it is enabled.
    pub enabled: bool,
}

/// Breakpoints and watchpoints placed within a session.
///
/// Breakpoint and watchpoint IDs are assigned by the debugger from two
/// distinct counters, hence they are keyed by kind.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    entries: IndexMap<(BreakpointKind, u32), Breakpoint>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stop point, replacing any previous one with the same ID.
    pub fn insert(&mut self, kind: BreakpointKind, id: u32, location: BreakpointLocation) {
        let breakpoint = Breakpoint {
            id,
            kind,
            location,
            enabled: true,
        };

        match self.entries.entry((kind, id)) {
            Entry::Occupied(mut e) => {
                tracing::debug!(id, ?kind, "breakpoint id reused");
                e.insert(breakpoint);
            }
            Entry::Vacant(v) => {
                v.insert(breakpoint);
            }
        }
    }

    pub fn remove(&mut self, kind: BreakpointKind, id: u32) -> Option<Breakpoint> {
        self.entries.shift_remove(&(kind, id))
    }

    #[cfg(test)]
    pub fn get(&self, kind: BreakpointKind, id: u32) -> Option<&Breakpoint> {
        self.entries.get(&(kind, id))
    }

    pub fn set_condition(&mut self, id: u32, condition: String) {
        if let Some(Breakpoint {
            location: BreakpointLocation::Watch { condition: c, .. },
            ..
        }) = self.entries.get_mut(&(BreakpointKind::Watchpoint, id))
        {
            *c = Some(condition);
        }
    }

    /// Returns the recorded stop points, in placement order.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.values()
    }

    #[cfg(test)]
    pub fn ids(&self, kind: BreakpointKind) -> Vec<u32> {
        self.entries
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Forgets every stop point (they are invalid once detached).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{BreakpointKind, BreakpointLocation, BreakpointTable};

    #[test]
    fn breakpoints_and_watchpoints_have_distinct_ids() {
        let mut table = BreakpointTable::new();

        table.insert(
            BreakpointKind::Breakpoint,
            1,
            BreakpointLocation::symbol("main"),
        );
        table.insert(
            BreakpointKind::Watchpoint,
            1,
            BreakpointLocation::Watch {
                target: "counter".to_owned(),
                condition: None,
            },
        );
        table.insert(
            BreakpointKind::Breakpoint,
            2,
            BreakpointLocation::file_line("main.swift", 12),
        );

        assert_eq!(table.ids(BreakpointKind::Breakpoint), vec![1, 2]);
        assert_eq!(table.ids(BreakpointKind::Watchpoint), vec![1]);

        let removed = table.remove(BreakpointKind::Breakpoint, 1).expect("removed");
        assert_eq!(removed.location.to_string(), "main");
        assert!(table.remove(BreakpointKind::Breakpoint, 1).is_none());
        assert_eq!(table.ids(BreakpointKind::Breakpoint), vec![2]);
    }

    #[test]
    fn watchpoint_condition_is_recorded() {
        let mut table = BreakpointTable::new();
        table.insert(
            BreakpointKind::Watchpoint,
            3,
            BreakpointLocation::Watch {
                target: "self.count".to_owned(),
                condition: None,
            },
        );

        table.set_condition(3, "self.count > 10".to_owned());

        let watchpoint = table.get(BreakpointKind::Watchpoint, 3).expect("get");
        assert_eq!(watchpoint.location.to_string(), "self.count if self.count > 10");

        table.clear();
        assert_eq!(table.iter().count(), 0);
    }
}
