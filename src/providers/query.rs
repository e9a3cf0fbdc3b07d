//! Drive query construction
//!
//! Builds `q` expressions for files.list. Any user-supplied text is escaped
//! before it is embedded in a quoted literal so that a stray `'` can never
//! terminate the literal early.

/// Escape text for use inside a single-quoted query literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Small builder that joins clauses with `and`.
#[derive(Debug, Default, Clone)]
pub struct DriveQuery {
    clauses: Vec<String>,
}

impl DriveQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// `'<id>' in parents`
    pub fn in_parent(mut self, container_id: &str) -> Self {
        self.clauses
            .push(format!("'{}' in parents", escape_literal(container_id)));
        self
    }

    /// `trashed=<bool>`
    pub fn trashed(mut self, trashed: bool) -> Self {
        self.clauses.push(format!("trashed={}", trashed));
        self
    }

    /// `name contains '<text>'`
    pub fn name_contains(mut self, text: &str) -> Self {
        self.clauses
            .push(format!("name contains '{}'", escape_literal(text)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn build(self) -> String {
        self.clauses.join(" and ")
    }
}
