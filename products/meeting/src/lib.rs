//! Details of the meeting currently open for registration.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MeetingError {
    #[error("meeting record {} unreadable: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("meeting record {} is not valid JSON: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("meeting field `{0}` is required")]
    Validation(&'static str),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MeetingDetails {
    pub topic: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub room: String,
    pub floor: String,
    pub building: String,
}

impl MeetingDetails {
    /// Copy of the record with every field trimmed.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.topic,
            &mut self.date,
            &mut self.start_time,
            &mut self.end_time,
            &mut self.room,
            &mut self.floor,
            &mut self.building,
        ] {
            *field = field.trim().to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), MeetingError> {
        let required = [
            ("topic", &self.topic),
            ("date", &self.date),
            ("start_time", &self.start_time),
            ("end_time", &self.end_time),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(MeetingError::Validation(*field)),
            None => Ok(()),
        }
    }
}

/// Single-record JSON store. Saves replace the whole file.
#[derive(Clone, Debug)]
pub struct MeetingStore {
    path: PathBuf,
}

impl MeetingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no meeting has been saved yet.
    pub fn load(&self) -> Result<Option<MeetingDetails>, MeetingError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| MeetingError::Format {
                path: self.path.clone(),
                source,
            })
    }

    pub fn save(&self, details: &MeetingDetails) -> Result<(), MeetingError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;

        let json = serde_json::to_vec_pretty(details).map_err(|source| MeetingError::Format {
            path: self.path.clone(),
            source,
        })?;
        let mut file = NamedTempFile::new_in(parent).map_err(|source| self.io_error(source))?;
        file.write_all(&json)
            .and_then(|_| file.as_file().sync_all())
            .map_err(|source| self.io_error(source))?;
        file.persist(&self.path)
            .map_err(|err| self.io_error(err.error))?;
        info!(path = %self.path.display(), topic = %details.topic, "meeting details saved");
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> MeetingError {
        MeetingError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
