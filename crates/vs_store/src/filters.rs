//! Composable query filters for the inspection ledger. Each combinator
//! appends a parameterized `WHERE` fragment; `apply` assembles the final
//! statement.

use crate::InspectionState;

fn in_clause(column: &str, len: usize) -> String {
    let placeholders = vec!["?"; len].join(",");
    format!("{column} IN ({placeholders})")
}

/// Filter for `SELECT`s over `vm_inspection_status`.
#[derive(Default)]
pub struct InspectionQueryFilter {
    wheres: Vec<(String, Vec<String>)>,
    order_by_sequence: bool,
    limit: Option<usize>,
}

impl InspectionQueryFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given VM ids; an empty slice is a no-op.
    #[must_use]
    pub fn by_vm_ids<S: AsRef<str>>(mut self, vm_ids: &[S]) -> Self {
        if vm_ids.is_empty() {
            return self;
        }
        self.wheres.push((
            in_clause("vm_id", vm_ids.len()),
            vm_ids.iter().map(|s| s.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Restrict to rows in any of the given states; empty is a no-op.
    #[must_use]
    pub fn by_state(mut self, states: &[InspectionState]) -> Self {
        if states.is_empty() {
            return self;
        }
        self.wheres.push((
            in_clause("status", states.len()),
            states.iter().map(|s| s.as_str().to_string()).collect(),
        ));
        self
    }

    /// Exclude rows in the given state.
    #[must_use]
    pub fn by_state_not(mut self, state: InspectionState) -> Self {
        self.wheres
            .push(("status != ?".to_string(), vec![state.as_str().to_string()]));
        self
    }

    #[must_use]
    pub fn order_by_sequence(mut self) -> Self {
        self.order_by_sequence = true;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn apply(&self, base: &str) -> (String, Vec<String>) {
        let mut sql = base.to_string();
        let mut args = Vec::new();
        for (i, (clause, clause_args)) in self.wheres.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(clause);
            args.extend(clause_args.iter().cloned());
        }
        if self.order_by_sequence {
            sql.push_str(" ORDER BY sequence ASC");
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        (sql, args)
    }
}

/// Filter for `UPDATE`s over `vm_inspection_status`.
#[derive(Default)]
pub struct InspectionUpdateFilter {
    wheres: Vec<(String, Vec<String>)>,
}

impl InspectionUpdateFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given VM ids; an empty slice is a no-op.
    #[must_use]
    pub fn by_vm_ids<S: AsRef<str>>(mut self, vm_ids: &[S]) -> Self {
        if vm_ids.is_empty() {
            return self;
        }
        self.wheres.push((
            in_clause("vm_id", vm_ids.len()),
            vm_ids.iter().map(|s| s.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Restrict to rows in any of the given states; empty is a no-op.
    #[must_use]
    pub fn by_state(mut self, states: &[InspectionState]) -> Self {
        if states.is_empty() {
            return self;
        }
        self.wheres.push((
            in_clause("status", states.len()),
            states.iter().map(|s| s.as_str().to_string()).collect(),
        ));
        self
    }

    pub(crate) fn apply(&self, base: &str) -> (String, Vec<String>) {
        let mut sql = base.to_string();
        let mut args = Vec::new();
        for (i, (clause, clause_args)) in self.wheres.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(clause);
            args.extend(clause_args.iter().cloned());
        }
        (sql, args)
    }
}
