//! Remote state-tag lookup.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One etag check for a folder's remote root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagRequest {
    pub alias: String,
    pub account_id: String,
    /// WebDAV base url of the account
    pub dav_url: String,
    pub remote_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagResponse {
    pub etag: String,
    pub fetched_at: DateTime<Utc>,
}

/// Fetches the etag of a remote folder root.
///
/// Implementations perform network I/O; the core never runs more than one
/// request at a time.
#[async_trait]
pub trait RemoteEtagFetcher: Send + Sync {
    async fn fetch_etag(&self, request: &EtagRequest) -> Result<EtagResponse>;
}
