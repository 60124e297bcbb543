//! SQL filter builder for LanceDB queries
//!
//! Every query against the memories table is scoped by one of these.
//! Conditions are combined with AND.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::memory::types::MemoryKind;

/// Whether superseded records are included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Liveness {
    /// Only records not yet replaced by a summary
    #[default]
    Live,
    /// Only records already replaced by a summary
    Superseded,
    /// Both
    Any,
}

/// Filter criteria for the memories table
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub user_id: Option<String>,
    pub kind: Option<MemoryKind>,
    /// Only records created strictly before this instant
    pub created_before: Option<DateTime<Utc>>,
    pub ids: Option<Vec<Uuid>>,
    pub liveness: Liveness,
}

impl MemoryFilter {
    /// Live records of every user
    pub fn new() -> Self {
        Self::default()
    }

    /// Live records of one user
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn created_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.created_before = Some(cutoff);
        self
    }

    pub fn with_ids(mut self, ids: &[Uuid]) -> Self {
        self.ids = Some(ids.to_vec());
        self
    }

    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    /// Build a SQL WHERE clause, or `None` if nothing is filtered
    pub fn to_sql_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        if let Some(ref user_id) = self.user_id {
            conditions.push(format!("user_id = {}", sql_quote(user_id)));
        }

        if let Some(kind) = self.kind {
            conditions.push(format!("kind = '{}'", kind.as_str()));
        }

        // created_at is stored as microseconds since epoch
        if let Some(ref cutoff) = self.created_before {
            conditions.push(format!("created_at < {}", cutoff.timestamp_micros()));
        }

        if let Some(ref ids) = self.ids {
            conditions.push(id_list_condition(ids));
        }

        match self.liveness {
            Liveness::Live => conditions.push("superseded_by IS NULL".to_string()),
            Liveness::Superseded => conditions.push("superseded_by IS NOT NULL".to_string()),
            Liveness::Any => {}
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }
}

/// Quote a string literal for a LanceDB filter, doubling single quotes
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `id = '<id>'` for one id, `id IN (...)` for several
pub fn id_list_condition(ids: &[Uuid]) -> String {
    match ids {
        [] => "false".to_string(),
        [id] => format!("id = '{id}'"),
        _ => {
            let list = ids
                .iter()
                .map(|id| format!("'{id}'"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("id IN ({list})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_hides_superseded() {
        let filter = MemoryFilter::new();
        assert_eq!(filter.to_sql_clause().unwrap(), "superseded_by IS NULL");
    }

    #[test]
    fn test_any_liveness_without_conditions() {
        let filter = MemoryFilter::new().with_liveness(Liveness::Any);
        assert!(filter.to_sql_clause().is_none());
    }

    #[test]
    fn test_user_and_kind_filter() {
        let filter = MemoryFilter::for_user("u1").with_kind(MemoryKind::Raw);
        assert_eq!(
            filter.to_sql_clause().unwrap(),
            "user_id = 'u1' AND kind = 'raw' AND superseded_by IS NULL"
        );
    }

    #[test]
    fn test_user_id_is_quoted() {
        let filter = MemoryFilter::for_user("o'brien").with_liveness(Liveness::Any);
        assert_eq!(filter.to_sql_clause().unwrap(), "user_id = 'o''brien'");
    }

    #[test]
    fn test_created_before_filter() {
        use chrono::TimeZone;
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let filter = MemoryFilter::new().created_before(cutoff);

        let sql = filter.to_sql_clause().unwrap();
        assert!(sql.contains(&format!("created_at < {}", cutoff.timestamp_micros())));
    }

    #[test]
    fn test_superseded_only() {
        let filter = MemoryFilter::for_user("u1").with_liveness(Liveness::Superseded);
        assert_eq!(
            filter.to_sql_clause().unwrap(),
            "user_id = 'u1' AND superseded_by IS NOT NULL"
        );
    }

    #[test]
    fn test_id_list_condition() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(id_list_condition(&[a]), format!("id = '{a}'"));
        assert_eq!(id_list_condition(&[a, b]), format!("id IN ('{a}', '{b}')"));
        assert_eq!(id_list_condition(&[]), "false");
    }
}
