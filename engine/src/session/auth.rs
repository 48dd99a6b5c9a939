//! Authentication handshake with the station

use super::{Session, StationAddress};
use crate::api::payload::decode_envelope;
use crate::config::StationSettings;
use crate::error::{ApiError, SessionError};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Opaque login service
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Open a session for `account`
    async fn login(
        &self,
        station: &StationAddress,
        account: &str,
        password: &str,
    ) -> Result<Session, SessionError>;

    /// Close `session` on the station
    async fn logout(&self, session: &Session) -> Result<(), SessionError>;

    /// Check that the station answers
    async fn ping(&self, station: &StationAddress) -> Result<(), SessionError>;
}

/// `SYNO.API.Auth` sid login
pub struct DsAuthenticator {
    client: reqwest::Client,
}

const SESSION_NAME: &str = "DownloadStation";

#[derive(Debug, Deserialize)]
struct LoginData {
    sid: String,
}

impl DsAuthenticator {
    pub fn new(settings: &StationSettings) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| SessionError::Auth(e.to_string()))?;
        Ok(Self { client })
    }

    async fn call(
        &self,
        station: &StationAddress,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, SessionError> {
        let url = station
            .endpoint(path)
            .map_err(|e| SessionError::Auth(e.to_string()))?;
        debug!("Auth request {} {}", url, redacted(params));

        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| ApiError::ConnectionUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SessionError::Auth(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::ConnectionUnreachable(e.to_string()))?;

        decode_envelope(&body)?
            .into_data()
            .map_err(|code| SessionError::Auth(describe_auth_code(code).to_string()))
    }
}

#[async_trait]
impl Authenticator for DsAuthenticator {
    async fn login(
        &self,
        station: &StationAddress,
        account: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        let data = self
            .call(
                station,
                "auth.cgi",
                &[
                    ("api", "SYNO.API.Auth"),
                    ("version", "2"),
                    ("method", "login"),
                    ("account", account),
                    ("passwd", password),
                    ("session", SESSION_NAME),
                    ("format", "sid"),
                ],
            )
            .await?;

        let login: LoginData = serde_json::from_value(data)
            .map_err(|e| ApiError::MalformedResponse(e.to_string()))?;
        Ok(Session::new(login.sid, account, station.clone()))
    }

    async fn logout(&self, session: &Session) -> Result<(), SessionError> {
        self.call(
            &session.station,
            "auth.cgi",
            &[
                ("api", "SYNO.API.Auth"),
                ("version", "1"),
                ("method", "logout"),
                ("session", SESSION_NAME),
                ("_sid", session.sid.as_str()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn ping(&self, station: &StationAddress) -> Result<(), SessionError> {
        self.call(
            station,
            "query.cgi",
            &[
                ("api", "SYNO.API.Info"),
                ("version", "1"),
                ("method", "query"),
                ("query", "SYNO.API.Auth"),
            ],
        )
        .await?;
        Ok(())
    }
}

/// Description of an auth error code
pub fn describe_auth_code(code: i64) -> &'static str {
    match code {
        400 => "No such account or incorrect password",
        401 => "Account disabled",
        402 => "Permission denied",
        403 => "2-step verification code required",
        404 => "Failed to authenticate 2-step verification code",
        other => crate::error::describe_code(other),
    }
}

/// Parameters as `k=v` pairs with secrets masked
pub(crate) fn redacted(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| match *k {
            "passwd" | "_sid" => format!("{}=***", k),
            _ => format!("{}={}", k, v),
        })
        .collect::<Vec<_>>()
        .join("&")
}
