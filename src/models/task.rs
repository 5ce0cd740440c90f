use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const IN_PROCESS_TAG: &str = "local";
const DISTRIBUTED_TAG: &str = "queue";

/// Opaque reference returned at submission, used only to look a job up later.
///
/// Serialized as `local:<job uuid>` for in-process runs and `queue:<backend id>`
/// for runs handed to the distributed backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskHandle {
    InProcess(Uuid),
    Distributed(String),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TaskHandleError {
    #[error("task handle has no recognised tag: {0}")]
    Untagged(String),

    #[error("task handle carries an invalid job id: {0}")]
    InvalidJobId(String),

    #[error("task handle has an empty backend id")]
    EmptyBackendId,
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskHandle::InProcess(job_id) => write!(f, "{}:{}", IN_PROCESS_TAG, job_id),
            TaskHandle::Distributed(backend_id) => write!(f, "{}:{}", DISTRIBUTED_TAG, backend_id),
        }
    }
}

impl FromStr for TaskHandle {
    type Err = TaskHandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, rest) = s
            .split_once(':')
            .ok_or_else(|| TaskHandleError::Untagged(s.to_string()))?;

        match tag {
            IN_PROCESS_TAG => Uuid::parse_str(rest)
                .map(TaskHandle::InProcess)
                .map_err(|_| TaskHandleError::InvalidJobId(rest.to_string())),
            DISTRIBUTED_TAG if rest.is_empty() => Err(TaskHandleError::EmptyBackendId),
            DISTRIBUTED_TAG => Ok(TaskHandle::Distributed(rest.to_string())),
            _ => Err(TaskHandleError::Untagged(s.to_string())),
        }
    }
}

impl Serialize for TaskHandle {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskHandle {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
