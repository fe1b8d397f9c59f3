//! Remote root etag lookup over WebDAV

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    remote::{EtagRequest, EtagResponse, RemoteEtagFetcher},
    time::{Clock, SystemClock},
};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{header, Client, Method, StatusCode, Url};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:getetag/></d:prop></d:propfind>
"#;

/// Etag checks give up after this long.
pub const ETAG_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials attached to requests of one account.
#[derive(Clone)]
pub enum DavCredentials {
    Basic { user: String, password: String },
    Bearer(String),
}

impl std::fmt::Debug for DavCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DavCredentials::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .finish_non_exhaustive(),
            DavCredentials::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

/// `PROPFIND` with depth 0 on a folder's remote root asking for `getetag`.
///
/// Credentials are supplied by the embedding application per account; the
/// fetcher never acquires them itself.
pub struct DavEtagFetcher {
    client: Client,
    credentials: RwLock<HashMap<String, DavCredentials>>,
    clock: Arc<dyn Clock>,
}

impl DavEtagFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(ETAG_REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()
            .map_err(|e| BridgeError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            credentials: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn set_credentials(&self, account_id: &str, credentials: DavCredentials) {
        self.credentials
            .write()
            .await
            .insert(account_id.to_string(), credentials);
    }

    pub async fn clear_credentials(&self, account_id: &str) {
        self.credentials.write().await.remove(account_id);
    }
}

/// Appends the remote folder to the account's DAV url as a collection.
fn collection_url(dav_url: &str, remote_path: &str) -> Result<Url> {
    let mut url = Url::parse(dav_url)
        .map_err(|e| BridgeError::Network(format!("Invalid DAV url {}: {}", dav_url, e)))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| BridgeError::Network(format!("DAV url {} cannot take a path", dav_url)))?;
        segments.pop_if_empty();
        segments.extend(remote_path.split('/').filter(|s| !s.is_empty()));
        segments.push("");
    }
    Ok(url)
}

/// Strips quotes, the weak marker and the `-gzip` suffix some servers add.
pub(crate) fn normalize_etag(raw: &str) -> String {
    let etag = raw.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    let etag = etag.trim_matches('"');
    etag.strip_suffix("-gzip").unwrap_or(etag).to_string()
}

/// First non-empty `getetag` in a multistatus body.
pub(crate) fn parse_multistatus_etag(body: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);
    let mut in_etag = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"getetag" => in_etag = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"getetag" => in_etag = false,
            Ok(Event::Text(t)) if in_etag => {
                let text = t
                    .unescape()
                    .map_err(|e| BridgeError::Network(format!("Invalid PROPFIND reply: {}", e)))?;
                let etag = normalize_etag(&text);
                if !etag.is_empty() {
                    return Ok(Some(etag));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(e) => {
                return Err(BridgeError::Network(format!("Invalid PROPFIND reply: {}", e)));
            }
        }
    }
}

#[async_trait]
impl RemoteEtagFetcher for DavEtagFetcher {
    #[instrument(skip_all, fields(alias = %request.alias))]
    async fn fetch_etag(&self, request: &EtagRequest) -> Result<EtagResponse> {
        let url = collection_url(&request.dav_url, &request.remote_path)?;
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| BridgeError::Network(format!("Invalid method: {}", e)))?;

        let mut builder = self
            .client
            .request(method, url.clone())
            .header("Depth", "0")
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        match self.credentials.read().await.get(&request.account_id) {
            Some(DavCredentials::Basic { user, password }) => {
                builder = builder.basic_auth(user, Some(password));
            }
            Some(DavCredentials::Bearer(token)) => {
                builder = builder.bearer_auth(token);
            }
            None => {}
        }

        debug!(url = %url, "Requesting root etag");
        let response = builder
            .send()
            .await
            .map_err(|e| BridgeError::Network(format!("PROPFIND {} failed: {}", url, e)))?;

        let status = response.status();
        if status != StatusCode::MULTI_STATUS {
            warn!(url = %url, status = status.as_u16(), "Unexpected etag reply");
            return Err(BridgeError::Network(format!(
                "PROPFIND {} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }

        // Server time of the reply, falling back to ours
        let fetched_at = response
            .headers()
            .get(header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| self.clock.now());

        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Network(format!("Failed to read PROPFIND reply: {}", e)))?;
        let etag = parse_multistatus_etag(&body)?
            .ok_or_else(|| BridgeError::Network(format!("No etag in PROPFIND reply for {}", url)))?;

        debug!(etag = %etag, "Root etag retrieved");
        Ok(EtagResponse { etag, fetched_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::FixedClock;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const MULTISTATUS: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/dav/files/alice/work/</d:href>
    <d:propstat>
      <d:prop><d:getetag>&quot;5f3a9c1e2b-gzip&quot;</d:getetag></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn url_gets_remote_path_as_collection() {
        let url = collection_url("https://cloud.example/remote.php/dav/files/alice/", "/work/My Docs").unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.example/remote.php/dav/files/alice/work/My%20Docs/"
        );
        let root = collection_url("https://cloud.example/dav", "/").unwrap();
        assert_eq!(root.as_str(), "https://cloud.example/dav/");
        assert!(collection_url("not a url", "/").is_err());
    }

    #[test]
    fn etags_are_normalized() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("W/\"abc-gzip\""), "abc");
        assert_eq!(normalize_etag(" abc "), "abc");
    }

    #[test]
    fn multistatus_parsing() {
        assert_eq!(
            parse_multistatus_etag(MULTISTATUS).unwrap().as_deref(),
            Some("5f3a9c1e2b")
        );
        assert_eq!(
            parse_multistatus_etag("<d:multistatus xmlns:d=\"DAV:\"/>").unwrap(),
            None
        );
    }

    /// Serves one canned HTTP reply and returns the raw request it saw.
    async fn serve_once(reply: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 4096];
            while !String::from_utf8_lossy(&seen).contains("</d:propfind>") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&seen).into_owned()
        });
        (format!("http://{addr}/remote.php/dav/files/alice"), task)
    }

    fn request(dav_url: String) -> EtagRequest {
        EtagRequest {
            alias: "work".into(),
            account_id: "0".into(),
            dav_url,
            remote_path: "/work".into(),
        }
    }

    #[tokio::test]
    async fn fetches_etag_with_server_time() {
        let reply = format!(
            "HTTP/1.1 207 Multi-Status\r\nDate: Tue, 14 Nov 2023 22:13:20 GMT\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            MULTISTATUS.len(),
            MULTISTATUS
        );
        let (dav_url, server) = serve_once(reply).await;

        let fetcher = DavEtagFetcher::new("foldersync-tests").unwrap();
        fetcher
            .set_credentials("0", DavCredentials::Bearer("t0ken".into()))
            .await;
        let response = fetcher.fetch_etag(&request(dav_url)).await.unwrap();
        assert_eq!(response.etag, "5f3a9c1e2b");
        assert_eq!(response.fetched_at.timestamp(), 1_700_000_000);

        let seen = server.await.unwrap();
        assert!(seen.starts_with("PROPFIND /remote.php/dav/files/alice/work/ HTTP/1.1"));
        assert!(seen.to_ascii_lowercase().contains("depth: 0"));
        assert!(seen.contains("Bearer t0ken"));
    }

    #[tokio::test]
    async fn non_multistatus_reply_is_an_error() {
        let reply =
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
        let (dav_url, server) = serve_once(reply).await;

        let at = DateTime::from_timestamp(1_600_000_000, 0).unwrap();
        let fetcher = DavEtagFetcher::new("foldersync-tests")
            .unwrap()
            .with_clock(Arc::new(FixedClock(at)));
        let err = fetcher.fetch_etag(&request(dav_url)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Network(msg) if msg.contains("503")));
        server.await.unwrap();
    }
}
