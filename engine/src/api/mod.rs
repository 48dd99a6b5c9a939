//! Remote API gateway
//!
//! A logical operation ([`ApiRequest`]) goes in, the `data` document of the
//! station's response envelope comes out. Session handling, transport and
//! envelope decoding live behind the [`Gateway`] trait so the sync managers can
//! be driven by a scripted gateway in tests.

mod http;
pub mod payload;
pub mod requests;

pub use http::HttpGateway;

use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;

/// HTTP verb of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Where the parameters travel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// URL query string
    Query,
    /// `application/x-www-form-urlencoded` body
    Form,
    /// `multipart/form-data` body, required for file uploads
    Multipart,
}

/// Binary attachment sent with a multipart request
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub const TORRENT_MIME: &'static str = "application/x-bittorrent";

    pub fn torrent(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime: Self::TORRENT_MIME.to_string(),
            bytes,
        }
    }
}

/// One logical operation against the station's web API
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below `/webapi/`, e.g. `DownloadStation/task.cgi`
    pub path: &'static str,
    pub params: Vec<(String, String)>,
    pub encoding: Encoding,
    pub file: Option<FileUpload>,
}

impl ApiRequest {
    pub fn new(method: Method, path: &'static str) -> Self {
        let encoding = match method {
            Method::Get => Encoding::Query,
            Method::Post => Encoding::Form,
        };
        Self {
            method,
            path,
            params: Vec::new(),
            encoding,
            file: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn file(mut self, file: FileUpload) -> Self {
        self.file = Some(file);
        self.encoding = Encoding::Multipart;
        self
    }

    /// Value of a parameter, if set
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `api`/`method` pair, used to identify the operation in logs
    pub fn operation(&self) -> String {
        format!(
            "{}.{}",
            self.get("api").unwrap_or("?"),
            self.get("method").unwrap_or("?")
        )
    }
}

/// Executes authenticated requests against the station
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send `request` with the current session token.
    ///
    /// Fails with [`ApiError::SessionMissing`] without any network traffic
    /// when no session is held. Never retries.
    async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError>;
}
