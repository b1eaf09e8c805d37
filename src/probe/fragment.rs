use serde::{Deserialize, Serialize};

use crate::probe::ProbeVariable;

/// A compiled fragment with its signature condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalFragment {
    /// Applies to signatures containing any of these substrings; empty means unconditional
    pub requires: Vec<String>,
    /// Rewritten statements
    pub statements: Vec<String>,
}

impl ConditionalFragment {
    /// Returns `true` if the fragment has no condition.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.requires.is_empty()
    }

    /// Returns `true` if the condition holds for `signature`.
    #[must_use]
    pub fn applies_to(&self, signature: &str) -> bool {
        self.requires.iter().any(|r| signature.contains(r.as_str()))
    }
}

/// All compiled fragments of one probe type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiFragment {
    /// Probe type name
    pub probe: String,
    /// Locals to declare at the target
    pub variables: Vec<ProbeVariable>,
    /// Before fragments in declaration order
    pub before: Vec<ConditionalFragment>,
    /// After fragments in declaration order
    pub after: Vec<ConditionalFragment>,
    /// Incremental fragment, still carrying the signature and scope placeholders
    pub incremental: Vec<String>,
}

impl MultiFragment {
    /// Selects the before statements for a target signature.
    ///
    /// The first conditional fragment whose condition holds wins, else the unconditional
    /// fragment, else nothing.
    #[must_use]
    pub fn before_part(&self, signature: &str) -> &[String] {
        select(&self.before, signature)
    }

    /// Selects the after statements for a target signature, like [`Self::before_part`].
    #[must_use]
    pub fn after_part(&self, signature: &str) -> &[String] {
        select(&self.after, signature)
    }

    /// Returns `true` if the probe carries an incremental fragment.
    #[must_use]
    pub fn has_incremental(&self) -> bool {
        !self.incremental.is_empty()
    }
}

fn select<'a>(fragments: &'a [ConditionalFragment], signature: &str) -> &'a [String] {
    fragments
        .iter()
        .find(|f| !f.is_default() && f.applies_to(signature))
        .or_else(|| fragments.iter().find(|f| f.is_default()))
        .map(|f| f.statements.as_slice())
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(requires: &[&str], statement: &str) -> ConditionalFragment {
        ConditionalFragment {
            requires: requires.iter().map(|r| (*r).to_string()).collect(),
            statements: vec![statement.to_string()],
        }
    }

    #[test]
    fn test_selection_order() {
        let multi = MultiFragment {
            probe: "P".into(),
            variables: vec![],
            before: vec![
                fragment(&[], "default()"),
                fragment(&["execute", "query"], "sql()"),
                fragment(&["executeBatch"], "batch()"),
            ],
            after: vec![fragment(&["commit"], "commit()")],
            incremental: vec![],
        };

        assert_eq!(multi.before_part("sql.Statement.executeBatch()"), ["sql()"]);
        assert_eq!(multi.before_part("sql.Statement.query(String)"), ["sql()"]);
        assert_eq!(multi.before_part("com.app.A.run()"), ["default()"]);
        assert_eq!(multi.after_part("sql.Connection.commit()"), ["commit()"]);
        assert!(multi.after_part("com.app.A.run()").is_empty());
        assert!(!multi.has_incremental());
    }
}
