//! Line-oriented JSON request/response envelope for external callers.
//!
//! Each request is one JSON object tagged by `op`; each answer is one object
//! with `ok` and, depending on the request, `hash`, `status`, `removed` or
//! `error`. `subscribe` is acknowledged here and streamed by the transport.

use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::scheduler::{SchedulerHandle, StatusSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Enqueue {
        url: String,
        #[serde(default)]
        alias: Option<String>,
    },
    Status,
    Pause,
    Resume,
    Cancel,
    Reorder {
        hashes: Vec<String>,
    },
    Remove {
        hash: String,
    },
    Promote {
        hash: String,
    },
    Demote {
        #[serde(default)]
        position: usize,
    },
    CleanCache,
    SetSpeedLimit {
        #[serde(default)]
        bytes_per_sec: Option<u64>,
    },
    Subscribe,
    Shutdown,
}

impl Request {
    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusSnapshot>,
    /// Entries deleted by `clean_cache`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn from_unit(res: Result<(), CommandError>) -> Self {
        match res {
            Ok(()) => Self::ok(),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Run one request against the scheduler.
pub async fn handle_request(handle: &SchedulerHandle, req: Request) -> Response {
    match req {
        Request::Enqueue { url, alias } => match handle.enqueue(&url, alias.as_deref()).await {
            Ok(hash) => Response {
                hash: Some(hash),
                ..Response::ok()
            },
            Err(e) => Response::error(e.to_string()),
        },
        Request::Status => match handle.get_status().await {
            Ok(status) => Response {
                status: Some(status),
                ..Response::ok()
            },
            Err(e) => Response::error(e.to_string()),
        },
        Request::Pause => Response::from_unit(handle.pause().await),
        Request::Resume => Response::from_unit(handle.resume().await),
        Request::Cancel => Response::from_unit(handle.cancel().await),
        Request::Reorder { hashes } => Response::from_unit(handle.reorder(hashes).await),
        Request::Remove { hash } => Response::from_unit(handle.remove(&hash).await),
        Request::Promote { hash } => Response::from_unit(handle.promote(&hash).await),
        Request::Demote { position } => Response::from_unit(handle.demote_active(position).await),
        Request::CleanCache => match handle.clean_cache().await {
            Ok(n) => Response {
                removed: Some(n),
                ..Response::ok()
            },
            Err(e) => Response::error(e.to_string()),
        },
        Request::SetSpeedLimit { bytes_per_sec } => {
            Response::from_unit(handle.set_speed_limit(bytes_per_sec).await)
        }
        Request::Subscribe => Response::ok(),
        Request::Shutdown => Response::from_unit(handle.shutdown().await),
    }
}
