//! Z-API adapter
//!
//! Drives the hosted Z-API platform. Instances are provisioned on demand
//! through the integrator account and afterwards addressed by an
//! `instanceId:token` pair, which the engine keeps in `external_id`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::models::connection::Model as Connection;
use crate::providers::status::normalize;
use crate::providers::trait_::{
    CreateInstanceRequest, CreateInstanceResponse, ProviderAdapter, ProviderError, StatusProbe,
    normalize_phone,
};

/// Adapter for the Z-API provider.
pub struct ZapiAdapter {
    client: reqwest::Client,
    base_url: String,
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct ZapiCreateResponse {
    id: Option<String>,
    token: Option<String>,
    status: Option<String>,
    #[serde(rename = "qrCode")]
    qr_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZapiStatusResponse {
    status: Option<String>,
    phone: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZapiQrResponse {
    value: Option<String>,
}

/// Instance address parsed out of `external_id`.
#[derive(Debug)]
struct InstanceAddress<'a> {
    id: &'a str,
    token: &'a str,
}

impl ZapiAdapter {
    pub fn new(base_url: String, client_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_token,
        }
    }

    fn address<'a>(&self, connection: &'a Connection) -> Result<InstanceAddress<'a>, ProviderError> {
        let external = connection
            .external_id
            .as_deref()
            .ok_or_else(|| ProviderError::NotFound {
                details: format!(
                    "connection '{}' has no provisioned Z-API instance",
                    connection.instance_name
                ),
            })?;
        let (id, token) = external.split_once(':').ok_or_else(|| ProviderError::Malformed {
            details: "external_id is not an instanceId:token pair".to_string(),
        })?;
        Ok(InstanceAddress { id, token })
    }

    fn instance_url(&self, address: &InstanceAddress<'_>, path: &str) -> String {
        format!(
            "{}/instances/{}/token/{}{}",
            self.base_url, address.id, address.token, path
        )
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.ok().filter(|b| !b.is_empty());
        Err(ProviderError::from_http(status.as_u16(), body))
    }
}

#[async_trait]
impl ProviderAdapter for ZapiAdapter {
    fn slug(&self) -> &'static str {
        "zapi"
    }

    async fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse, ProviderError> {
        let body = serde_json::json!({
            "name": request.instance_name,
            "deliveryCallbackEnabled": true,
        });

        let response = self
            .client
            .post(format!("{}/instances/integrator/on-demand", self.base_url))
            .header("Client-Token", &self.client_token)
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let created: ZapiCreateResponse =
            response.json().await.map_err(|e| ProviderError::Malformed {
                details: format!("on-demand create payload: {}", e),
            })?;

        let external_id = match (created.id, created.token) {
            (Some(id), Some(token)) => Some(format!("{}:{}", id, token)),
            _ => {
                return Err(ProviderError::Malformed {
                    details: "on-demand create payload missing id or token".to_string(),
                });
            }
        };

        debug!(
            instance_name = %request.instance_name,
            has_qr = created.qr_code.is_some(),
            "Z-API instance provisioned"
        );

        // Z-API usually configures itself through webhooks after creation and
        // returns no QR here; the pairing screen is only forced when one is
        // present.
        Ok(CreateInstanceResponse {
            external_id,
            status: created.status.as_deref().map(normalize),
            qr_code: created.qr_code,
        })
    }

    async fn get_status(&self, connection: &Connection) -> Result<StatusProbe, ProviderError> {
        let address = self.address(connection)?;
        let response = self
            .client
            .get(self.instance_url(&address, "/status"))
            .header("Client-Token", &self.client_token)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let payload: ZapiStatusResponse =
            response.json().await.map_err(|e| ProviderError::Malformed {
                details: format!("status payload: {}", e),
            })?;

        if let Some(error) = payload.error.as_deref()
            && error.eq_ignore_ascii_case("instance not found")
        {
            return Err(ProviderError::NotFound {
                details: error.to_string(),
            });
        }

        Ok(StatusProbe {
            status: normalize(payload.status.as_deref().unwrap_or_default()),
            phone_number: payload.phone.as_deref().and_then(normalize_phone),
        })
    }

    async fn get_qr_code(&self, connection: &Connection) -> Result<String, ProviderError> {
        let address = self.address(connection)?;
        let response = self
            .client
            .get(self.instance_url(&address, "/qr-code/image"))
            .header("Client-Token", &self.client_token)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let payload: ZapiQrResponse =
            response.json().await.map_err(|e| ProviderError::Malformed {
                details: format!("qr payload: {}", e),
            })?;

        payload.value.ok_or_else(|| ProviderError::Malformed {
            details: "qr payload carried no image".to_string(),
        })
    }

    async fn refresh_qr_code(&self, connection: &Connection) -> Result<String, ProviderError> {
        // Restarting the instance invalidates the stale code, then the
        // regular endpoint serves a fresh one.
        let address = self.address(connection)?;
        let response = self
            .client
            .get(self.instance_url(&address, "/restart"))
            .header("Client-Token", &self.client_token)
            .send()
            .await?;
        Self::check(response).await?;

        self.get_qr_code(connection).await
    }

    async fn disconnect(&self, connection: &Connection) -> Result<(), ProviderError> {
        let address = self.address(connection)?;
        let response = self
            .client
            .get(self.instance_url(&address, "/disconnect"))
            .header("Client-Token", &self.client_token)
            .send()
            .await?;

        match Self::check(response).await {
            Ok(_) => Ok(()),
            // Already disconnected reads as success.
            Err(ProviderError::Http { status: 400, .. }) | Err(ProviderError::NotFound { .. }) => {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_instance(&self, connection: &Connection) -> Result<(), ProviderError> {
        let address = self.address(connection)?;
        let response = self
            .client
            .delete(format!(
                "{}/instances/integrator/{}",
                self.base_url, address.id
            ))
            .header("Client-Token", &self.client_token)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }
}
