//! Published dataset handle.
//!
//! A dataset is published by handing out the id of its root metadata block.
//! [`DatasetHandle`] records that id with a few facts about the dataset so a
//! reader can pick it up from a JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::block::BlockId;
use crate::generate::GeneratedDataset;
use crate::{Error, Result};

/// Root id of a published dataset plus descriptive fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub root: BlockId,
    #[serde(default, with = "system_time_serde")]
    pub generated_at: Option<SystemTime>,
    #[serde(default)]
    pub entry_count: u64,
    #[serde(default)]
    pub location_count: u64,
}

mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => {
                let duration = t.duration_since(UNIX_EPOCH).unwrap_or_default();
                Some(duration.as_secs()).serialize(serializer)
            }
            None => None::<u64>.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(|s| UNIX_EPOCH + Duration::from_secs(s)))
    }
}

impl DatasetHandle {
    /// Handle for a root id with nothing else known.
    pub fn new(root: BlockId) -> Self {
        Self {
            root,
            generated_at: None,
            entry_count: 0,
            location_count: 0,
        }
    }

    /// Handle for a dataset generated just now.
    pub fn from_dataset(dataset: &GeneratedDataset) -> Self {
        Self {
            root: dataset.root,
            generated_at: Some(SystemTime::now()),
            entry_count: dataset.metadata.entry_count,
            location_count: dataset.metadata.location_count,
        }
    }

    /// Load a handle from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let handle: Self =
            serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(handle)
    }

    /// Save the handle as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Whether the dataset is older than `max_age`.
    ///
    /// Returns `true` when the generation time is unknown.
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        match self.generated_at {
            None => true,
            Some(at) => {
                let elapsed = SystemTime::now().duration_since(at).unwrap_or(Duration::MAX);
                elapsed >= max_age
            }
        }
    }
}
