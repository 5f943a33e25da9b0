//! Provider registry
//!
//! Holds the configured adapters and resolves the concrete one for a
//! connection. Resolution happens once per operation at this boundary; the
//! resolved `Arc<dyn ProviderAdapter>` is what travels through the engine,
//! never the provider tag.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::models::connection::Model as Connection;
use crate::providers::{EvolutionAdapter, ProviderAdapter, ProviderKind, ZapiAdapter};

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{name}' is not configured for this deployment")]
    ProviderNotConfigured { name: String },
    #[error("unknown provider '{name}'")]
    UnknownProvider { name: String },
}

/// Registry of configured provider adapters
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration, registering each provider only
    /// when its credentials are present.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        match (&config.evolution_base_url, &config.evolution_api_key) {
            (Some(base_url), Some(api_key)) => {
                registry.register(
                    ProviderKind::Evolution,
                    Arc::new(EvolutionAdapter::new(base_url.clone(), api_key.clone())),
                );
            }
            _ => warn!("Evolution adapter not registered: missing base URL or API key"),
        }

        match (&config.zapi_base_url, &config.zapi_client_token) {
            (Some(base_url), Some(client_token)) => {
                registry.register(
                    ProviderKind::Zapi,
                    Arc::new(ZapiAdapter::new(base_url.clone(), client_token.clone())),
                );
            }
            _ => warn!("Z-API adapter not registered: missing base URL or client token"),
        }

        registry
    }

    pub fn register(&mut self, kind: ProviderKind, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    /// Resolve the adapter for a provider kind.
    pub fn resolve(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotConfigured {
                name: kind.as_str().to_string(),
            })
    }

    /// Resolve the adapter for a persisted connection row.
    pub fn resolve_for(
        &self,
        connection: &Connection,
    ) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        let kind = ProviderKind::parse(&connection.provider).ok_or_else(|| {
            RegistryError::UnknownProvider {
                name: connection.provider.clone(),
            }
        })?;
        self.resolve(kind)
    }

    /// Slugs of the providers currently configured, sorted for stable output.
    pub fn configured(&self) -> Vec<&'static str> {
        let mut slugs: Vec<_> = self.adapters.keys().map(|k| k.as_str()).collect();
        slugs.sort_unstable();
        slugs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::trait_::{
        CreateInstanceRequest, CreateInstanceResponse, ProviderError, StatusProbe,
    };
    use async_trait::async_trait;

    struct StubAdapter;

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn slug(&self) -> &'static str {
            "evolution"
        }

        async fn create_instance(
            &self,
            _request: CreateInstanceRequest,
        ) -> Result<CreateInstanceResponse, ProviderError> {
            Ok(CreateInstanceResponse {
                external_id: None,
                status: None,
                qr_code: None,
            })
        }

        async fn get_status(&self, _connection: &Connection) -> Result<StatusProbe, ProviderError> {
            Err(ProviderError::Unknown {
                details: "not implemented".to_string(),
            })
        }

        async fn get_qr_code(&self, _connection: &Connection) -> Result<String, ProviderError> {
            Err(ProviderError::Unknown {
                details: "not implemented".to_string(),
            })
        }

        async fn refresh_qr_code(&self, _connection: &Connection) -> Result<String, ProviderError> {
            Err(ProviderError::Unknown {
                details: "not implemented".to_string(),
            })
        }

        async fn disconnect(&self, _connection: &Connection) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn delete_instance(&self, _connection: &Connection) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn resolve_unconfigured_provider_fails() {
        let registry = ProviderRegistry::new();
        let result = registry.resolve(ProviderKind::Evolution);
        assert!(matches!(
            result,
            Err(RegistryError::ProviderNotConfigured { .. })
        ));
    }

    #[test]
    fn resolve_registered_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(ProviderKind::Evolution, std::sync::Arc::new(StubAdapter));

        assert!(registry.resolve(ProviderKind::Evolution).is_ok());
        assert!(registry.resolve(ProviderKind::Zapi).is_err());
        assert_eq!(registry.configured(), vec!["evolution"]);
    }

    #[test]
    fn resolve_for_rejects_unknown_slug() {
        let registry = ProviderRegistry::new();
        let connection = Connection {
            id: uuid::Uuid::new_v4(),
            workspace_id: uuid::Uuid::new_v4(),
            instance_name: "Suporte".to_string(),
            provider: "telegram".to_string(),
            external_id: None,
            status: "creating".to_string(),
            phone_number: None,
            qr_code: None,
            is_default: false,
            default_pipeline_id: None,
            default_column_id: None,
            queue_id: None,
            auto_create_crm_card: false,
            metadata: None,
            created_at: chrono::Utc::now().into(),
            updated_at: chrono::Utc::now().into(),
        };
        assert!(matches!(
            registry.resolve_for(&connection),
            Err(RegistryError::UnknownProvider { .. })
        ));
    }
}
