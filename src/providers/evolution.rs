//! Evolution API adapter
//!
//! Drives a self-hosted Evolution API server. Instances are addressed by
//! name; authentication is a static `apikey` header.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::connection::Model as Connection;
use crate::providers::status::normalize;
use crate::providers::trait_::{
    CreateInstanceRequest, CreateInstanceResponse, HistoryRecovery, ProviderAdapter, ProviderError,
    StatusProbe, normalize_phone,
};

/// Adapter for the Evolution API provider.
pub struct EvolutionAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct EvolutionInstanceEnvelope {
    instance: Option<EvolutionInstance>,
    qrcode: Option<EvolutionQrCode>,
}

#[derive(Debug, Deserialize)]
struct EvolutionInstance {
    #[serde(rename = "instanceName")]
    instance_name: Option<String>,
    state: Option<String>,
    status: Option<String>,
    #[serde(rename = "ownerJid")]
    owner_jid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EvolutionQrCode {
    base64: Option<String>,
    code: Option<String>,
}

impl EvolutionAdapter {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into a structured error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.ok().filter(|b| !b.is_empty());
        Err(ProviderError::from_http(status.as_u16(), body))
    }

    fn qr_from_envelope(envelope: &EvolutionInstanceEnvelope) -> Option<String> {
        envelope
            .qrcode
            .as_ref()
            .and_then(|qr| qr.base64.clone().or_else(|| qr.code.clone()))
    }
}

#[async_trait]
impl ProviderAdapter for EvolutionAdapter {
    fn slug(&self) -> &'static str {
        "evolution"
    }

    async fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse, ProviderError> {
        let sync_full_history = !matches!(request.history_recovery, HistoryRecovery::None);
        let body = serde_json::json!({
            "instanceName": request.instance_name,
            "number": request.phone_number,
            "qrcode": true,
            "syncFullHistory": sync_full_history,
        });

        let response = self
            .client
            .post(self.url("/instance/create"))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let envelope: EvolutionInstanceEnvelope =
            response.json().await.map_err(|e| ProviderError::Malformed {
                details: format!("instance create payload: {}", e),
            })?;

        let qr_code = Self::qr_from_envelope(&envelope);
        let status = envelope
            .instance
            .as_ref()
            .and_then(|i| i.status.as_deref().or(i.state.as_deref()))
            .map(normalize);

        debug!(
            instance_name = %request.instance_name,
            has_qr = qr_code.is_some(),
            "Evolution instance created"
        );

        Ok(CreateInstanceResponse {
            external_id: envelope
                .instance
                .and_then(|i| i.instance_name)
                .or(Some(request.instance_name)),
            status,
            qr_code,
        })
    }

    async fn get_status(&self, connection: &Connection) -> Result<StatusProbe, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!(
                "/instance/connectionState/{}",
                connection.instance_name
            )))
            .header("apikey", &self.api_key)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let envelope: EvolutionInstanceEnvelope =
            response.json().await.map_err(|e| ProviderError::Malformed {
                details: format!("connection state payload: {}", e),
            })?;

        let instance = envelope.instance.ok_or_else(|| ProviderError::Malformed {
            details: "connection state payload missing instance".to_string(),
        })?;

        let raw = instance
            .state
            .as_deref()
            .or(instance.status.as_deref())
            .unwrap_or_default();

        Ok(StatusProbe {
            status: normalize(raw),
            phone_number: instance.owner_jid.as_deref().and_then(normalize_phone),
        })
    }

    async fn get_qr_code(&self, connection: &Connection) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/instance/connect/{}", connection.instance_name)))
            .header("apikey", &self.api_key)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let qr: EvolutionQrCode = response.json().await.map_err(|e| ProviderError::Malformed {
            details: format!("qr payload: {}", e),
        })?;

        qr.base64
            .or(qr.code)
            .ok_or_else(|| ProviderError::Malformed {
                details: "qr payload carried no pairing code".to_string(),
            })
    }

    async fn refresh_qr_code(&self, connection: &Connection) -> Result<String, ProviderError> {
        // The connect endpoint reissues a fresh code when called again.
        self.get_qr_code(connection).await
    }

    async fn disconnect(&self, connection: &Connection) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(self.url(&format!("/instance/logout/{}", connection.instance_name)))
            .header("apikey", &self.api_key)
            .send()
            .await?;

        match Self::check(response).await {
            Ok(_) => Ok(()),
            // Logging out an instance that is not connected is a success.
            Err(ProviderError::Http { status: 400, .. }) | Err(ProviderError::NotFound { .. }) => {
                warn!(
                    instance_name = %connection.instance_name,
                    "Evolution logout on an instance that was not connected"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_instance(&self, connection: &Connection) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(self.url(&format!("/instance/delete/{}", connection.instance_name)))
            .header("apikey", &self.api_key)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::status::ConnectionStatus;

    #[test]
    fn qr_prefers_base64_over_code() {
        let envelope = EvolutionInstanceEnvelope {
            instance: None,
            qrcode: Some(EvolutionQrCode {
                base64: Some("data:image/png;base64,AAA".to_string()),
                code: Some("pairing-code".to_string()),
            }),
        };
        assert_eq!(
            EvolutionAdapter::qr_from_envelope(&envelope).as_deref(),
            Some("data:image/png;base64,AAA")
        );
    }

    #[test]
    fn create_status_normalizes() {
        assert_eq!(normalize("created"), ConnectionStatus::Creating);
        assert_eq!(normalize("open"), ConnectionStatus::Connected);
    }
}
