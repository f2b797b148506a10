use crate::core::{EntityMap, SyncError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub key: String,
    pub error: String,
}

impl EntityFailure {
    pub fn new(key: &str, error: &SyncError) -> Self {
        Self {
            key: key.to_string(),
            error: error.to_string(),
        }
    }
}

/// Outcome of one upsert call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertOutcome {
    pub type_name: String,
    pub requested: usize,
    pub created: usize,
    pub updated: usize,
    /// Existing entities left alone because nothing changed. A repeated
    /// deployment of the same input lands every entity here.
    pub unchanged: usize,
    /// Existing entities left alone because updates were disabled.
    pub skipped: usize,
    pub renamed: Vec<(String, String)>,
    pub failed: Vec<EntityFailure>,
    /// Confirmed remote form of every created or updated entity.
    #[serde(skip)]
    pub confirmed: EntityMap,
}

impl UpsertOutcome {
    pub fn new(type_name: &str, requested: usize) -> Self {
        Self {
            type_name: type_name.to_string(),
            requested,
            ..Self::default()
        }
    }

    pub fn fail(&mut self, key: &str, error: &SyncError) {
        self.failed.push(EntityFailure::new(key, error));
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} new, {} updated, {} unchanged, {} skipped, {} failed",
            self.type_name,
            self.created,
            self.updated,
            self.unchanged,
            self.skipped,
            self.failed.len()
        )?;
        for (old, new) in &self.renamed {
            write!(f, "\n • renamed {old} -> {new}")?;
        }
        for failure in &self.failed {
            write!(f, "\n • {}: {}", failure.key, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteOutcome {
    pub type_name: String,
    pub deleted: Vec<String>,
    pub failed: Vec<EntityFailure>,
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} deleted, {} failed",
            self.type_name,
            self.deleted.len(),
            self.failed.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n • {}: {}", failure.key, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrieveOutcome {
    pub type_name: String,
    /// Portable entities that survived filtering, keyed by key field.
    pub items: EntityMap,
    /// Items dropped by include/exclude rules.
    pub filtered: usize,
    /// Items the API returned without a usable key.
    pub keyless: usize,
    pub failed: Vec<EntityFailure>,
}

impl fmt::Display for RetrieveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} retrieved, {} filtered, {} failed",
            self.type_name,
            self.items.len(),
            self.filtered,
            self.failed.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n • {}: {}", failure.key, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeReport {
    Retrieve(RetrieveOutcome),
    Upsert(UpsertOutcome),
    Delete(DeleteOutcome),
}

impl TypeReport {
    pub fn failures(&self) -> usize {
        match self {
            Self::Retrieve(o) => o.failed.len(),
            Self::Upsert(o) => o.failed.len(),
            Self::Delete(o) => o.failed.len(),
        }
    }
}

impl fmt::Display for TypeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieve(o) => fmt::Display::fmt(o, f),
            Self::Upsert(o) => fmt::Display::fmt(o, f),
            Self::Delete(o) => fmt::Display::fmt(o, f),
        }
    }
}

/// Summary of a whole command across types.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tenant: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub types: Vec<TypeReport>,
}

impl RunReport {
    pub fn start(tenant: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            types: Vec::new(),
        }
    }

    pub fn push(&mut self, report: TypeReport) {
        self.types.push(report);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn failures(&self) -> usize {
        self.types.iter().map(TypeReport::failures).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tenant {}", self.tenant)?;
        if let Some(finished) = self.finished_at {
            let elapsed = finished - self.started_at;
            write!(f, " ({} ms)", elapsed.num_milliseconds())?;
        }
        for report in &self.types {
            write!(f, "\n{report}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_summary_lines() {
        let mut outcome = UpsertOutcome::new("query", 3);
        outcome.created = 1;
        outcome.updated = 1;
        outcome.renamed.push(("a".into(), "b".into()));
        outcome.fail("c", &SyncError::Validation("key too long".into()));

        let text = outcome.to_string();
        assert!(text.starts_with("query: 1 new, 1 updated, 0 unchanged, 0 skipped, 1 failed"));
        assert!(text.contains("\n • renamed a -> b"));
        assert!(text.contains("\n • c: Validation error: key too long"));
    }

    #[test]
    fn test_run_report_counts_failures() {
        let mut report = RunReport::start("acme");
        let mut upsert = UpsertOutcome::new("query", 1);
        upsert.fail("x", &SyncError::Validation("bad".into()));
        report.push(TypeReport::Upsert(upsert));
        report.push(TypeReport::Delete(DeleteOutcome::default()));
        report.finish();

        assert_eq!(report.failures(), 1);
        assert!(report.finished_at.is_some());
        assert!(report.to_string().starts_with("tenant acme ("));
    }
}
