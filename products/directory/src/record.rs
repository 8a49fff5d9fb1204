use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One row of the employee directory.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmployeeRecord {
    pub id: String,
    pub name: String,
    pub job_title: String,
    pub unit_short: String,
    pub unit_full: String,
}

/// Employee records keyed by id.
///
/// Iteration follows the order in which each id was first inserted. Inserting
/// an id that already exists replaces the record but keeps its position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directory {
    entries: IndexMap<String, EmployeeRecord>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = EmployeeRecord>) -> Self {
        let mut directory = Self::new();
        for record in records {
            directory.insert(record);
        }
        directory
    }

    pub(crate) fn insert(&mut self, record: EmployeeRecord) {
        self.entries.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<&EmployeeRecord> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EmployeeRecord)> {
        self.entries.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn records(&self) -> impl Iterator<Item = &EmployeeRecord> {
        self.entries.values()
    }
}
