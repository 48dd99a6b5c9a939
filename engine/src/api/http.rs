//! reqwest-backed gateway

use super::payload::decode_envelope;
use super::{ApiRequest, Encoding, Gateway, Method};
use crate::config::StationSettings;
use crate::error::{is_session_expiry_code, ApiError};
use crate::session::auth::redacted;
use crate::session::SessionState;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends requests to the station of the current session
pub struct HttpGateway {
    client: reqwest::Client,
    session: Arc<SessionState>,
}

impl HttpGateway {
    pub fn new(settings: &StationSettings, session: Arc<SessionState>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self { client, session })
    }
}

fn transport_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::ConnectionUnreachable(err.to_string())
}

fn log_params(params: &[(String, String)]) -> String {
    let pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    redacted(&pairs)
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let session = self.session.session().ok_or(ApiError::SessionMissing)?;
        let url = session.station.endpoint(request.path).map_err(transport_error)?;

        let mut params = request.params;
        params.push(("_sid".to_string(), session.sid.clone()));
        debug!(
            "Network call {:?} {} {}",
            request.method,
            url,
            log_params(&params)
        );

        let builder = match (request.method, request.encoding) {
            (_, Encoding::Multipart) => {
                let mut form = Form::new();
                for (key, value) in params {
                    form = form.text(key, value);
                }
                if let Some(file) = request.file {
                    let part = Part::bytes(file.bytes)
                        .file_name(file.filename)
                        .mime_str(&file.mime)
                        .map_err(|e| ApiError::Api {
                            code: 400,
                            message: e.to_string(),
                        })?;
                    form = form.part("file", part);
                }
                self.client.post(url).multipart(form)
            }
            (Method::Get, _) => self.client.get(url).query(&params),
            (Method::Post, Encoding::Query) => self.client.post(url).query(&params),
            (Method::Post, Encoding::Form) => self.client.post(url).form(&params),
        };

        let response = builder
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!("Station answered HTTP {}", status);
            return Err(ApiError::Api {
                code: i64::from(status.as_u16()),
                message: status.to_string(),
            });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        match decode_envelope(&body)?.into_data() {
            Ok(data) => Ok(data),
            Err(code) if is_session_expiry_code(code) => {
                self.session.expire_if_current(&session.sid);
                Err(ApiError::SessionExpired(code))
            }
            Err(code) => Err(ApiError::from_code(code)),
        }
    }
}
