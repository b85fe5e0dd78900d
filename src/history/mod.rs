// src/history/mod.rs — Append-only config revision history
//
// Every config a run generates with is committed as an immutable revision.
// Revisions are content-addressed: the id is the SHA-256 of the revision's
// canonical JSON, so identical commits collapse and ids can't be forged.

pub mod fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::infra::errors::Result;

pub use fs::FsConfigHistory;

/// One committed change set on a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub parent: Option<String>,
    pub branch: String,
    pub message: String,
    pub changes: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Hash input for a revision. Field order is fixed by the struct.
#[derive(Serialize)]
struct RevisionBody<'a> {
    parent: &'a Option<String>,
    branch: &'a str,
    message: &'a str,
    changes: &'a BTreeMap<String, Value>,
    created_at: &'a DateTime<Utc>,
}

impl Revision {
    pub fn new(
        parent: Option<String>,
        branch: &str,
        message: &str,
        changes: BTreeMap<String, Value>,
    ) -> Result<Self> {
        let created_at = Utc::now();
        let body = RevisionBody {
            parent: &parent,
            branch,
            message,
            changes: &changes,
            created_at: &created_at,
        };
        let id = hex::encode(Sha256::digest(serde_json::to_vec(&body)?));
        Ok(Self {
            id,
            parent,
            branch: branch.to_string(),
            message: message.to_string(),
            changes,
            created_at,
        })
    }

    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

/// A field whose value differs between two revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Config-history collaborator.
pub trait ConfigHistory: Send + Sync {
    /// Create `name` if it does not exist. Idempotent.
    fn branch(&self, name: &str) -> Result<()>;

    /// Append a revision to the tip of `branch`; returns its id.
    fn commit(&self, branch: &str, message: &str, changes: &BTreeMap<String, Value>) -> Result<String>;

    /// Look up a revision by id (or unambiguous id prefix).
    fn get(&self, id: &str) -> Result<Revision>;

    /// Tip of `branch`, if it has any commits.
    fn head(&self, branch: &str) -> Result<Option<String>>;

    /// Revisions on `branch`, oldest first.
    fn log(&self, branch: &str) -> Result<Vec<Revision>> {
        let mut out = Vec::new();
        let mut cursor = self.head(branch)?;
        while let Some(id) = cursor {
            let rev = self.get(&id)?;
            cursor = rev.parent.clone();
            out.push(rev);
        }
        out.reverse();
        Ok(out)
    }

    /// Full field state at `id`: every change from the root folded in order.
    fn materialize(&self, id: &str) -> Result<BTreeMap<String, Value>> {
        let mut chain = Vec::new();
        let mut cursor = Some(self.get(id)?);
        while let Some(rev) = cursor {
            cursor = match &rev.parent {
                Some(p) => Some(self.get(p)?),
                None => None,
            };
            chain.push(rev);
        }
        let mut state = BTreeMap::new();
        for rev in chain.into_iter().rev() {
            state.extend(rev.changes);
        }
        Ok(state)
    }

    /// Fields whose materialized value differs between `a` and `b`.
    fn diff(&self, a: &str, b: &str) -> Result<Vec<FieldChange>> {
        let before = self.materialize(a)?;
        let after = self.materialize(b)?;
        let mut fields: Vec<&String> = before.keys().chain(after.keys()).collect();
        fields.sort();
        fields.dedup();
        Ok(fields
            .into_iter()
            .filter_map(|f| {
                let (x, y) = (before.get(f), after.get(f));
                (x != y).then(|| FieldChange {
                    field: f.clone(),
                    before: x.cloned(),
                    after: y.cloned(),
                })
            })
            .collect())
    }
}
