use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::model::{Record, User};
use crate::schema::FieldInfo;
use crate::tracker::{FileTracker, Transition};

/// Seed document for a new file store.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Seed {
    pub fields: Vec<FieldInfo>,
    /// project -> issue type -> create-meta `fields` object
    pub create_meta: BTreeMap<String, BTreeMap<String, Value>>,
    pub users: Vec<User>,
    pub transitions: Vec<Transition>,
    pub records: Vec<Record>,
}

impl Seed {
    pub fn apply(self, store: &FileTracker) -> Result<()> {
        store.set_fields(&self.fields)?;
        for (project, types) in self.create_meta {
            for (issue_type, fields) in types {
                store.set_create_meta(&project, &issue_type, fields)?;
            }
        }
        store.set_users(&self.users)?;
        store.set_transitions(&self.transitions)?;
        for record in &self.records {
            store.write(record)?;
        }
        info!(records = self.records.len(), "store seeded");
        Ok(())
    }
}

pub fn init(path: &Path, seed: Option<&Path>) -> Result<()> {
    let store = FileTracker::init(path)?;
    if let Some(seed_path) = seed {
        let seed: Seed = serde_json::from_str(&fs::read_to_string(seed_path)?)?;
        seed.apply(&store)?;
    }
    eprintln!("Initialized tracker store in {}", path.display());
    Ok(())
}
