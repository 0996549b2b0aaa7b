//! Secrets loading into the process environment.
//!
//! `SECRETS_CONFIG` is a JSON object mapping environment variable names to
//! secret-store identifiers, e.g.
//! `{"LINKUP_API_KEY": "linkup/api-key", "TAVILY_API_KEY": "tavily/api-key"}`.
//! [`SecretsLoader`] fetches every entry once and memoizes the result.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::{DeepResearchError, SecretValue};

/// Loaded secrets keyed by the environment variable they were exported to.
pub type SecretsMap = BTreeMap<String, SecretValue>;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, secret_id: &str) -> Result<SecretValue, DeepResearchError>;
}

pub type DynSecretStore = Arc<dyn SecretStore>;

/// Memoized secrets loader with an initialize-once contract.
pub struct SecretsLoader {
    config_json: Option<String>,
    store: DynSecretStore,
    export_to_env: bool,
    cache: OnceCell<Arc<SecretsMap>>,
}

impl SecretsLoader {
    pub fn new(config_json: Option<String>, store: DynSecretStore) -> Self {
        Self {
            config_json,
            store,
            export_to_env: true,
            cache: OnceCell::new(),
        }
    }

    /// Keep loaded values out of the process environment.
    pub fn without_env_export(mut self) -> Self {
        self.export_to_env = false;
        self
    }

    /// Load every configured secret, or return the cached map.
    ///
    /// A failed load caches nothing, so a later call fetches again.
    pub async fn load(&self) -> Result<Arc<SecretsMap>, DeepResearchError> {
        self.cache
            .get_or_try_init(|| self.fetch_all())
            .await
            .map(Arc::clone)
    }

    /// The cached map, if [`SecretsLoader::load`] already succeeded.
    pub fn loaded(&self) -> Option<Arc<SecretsMap>> {
        self.cache.get().cloned()
    }

    async fn fetch_all(&self) -> Result<Arc<SecretsMap>, DeepResearchError> {
        let Some(raw) = self.config_json.as_deref() else {
            info!("no SECRETS_CONFIG found, skipping secrets loading");
            return Ok(Arc::new(SecretsMap::new()));
        };

        let entries = parse_secrets_config(raw)?;
        if entries.is_empty() {
            return Ok(Arc::new(SecretsMap::new()));
        }

        info!(count = entries.len(), "loading secrets from secret store");

        let mut loaded = SecretsMap::new();
        for (env_var, secret_id) in entries {
            let value = self.store.fetch(&secret_id).await.inspect_err(|err| {
                error!(secret = %secret_id, error = %err, "failed to load secret");
            })?;

            if self.export_to_env {
                // SAFETY: writes happen inside the initialize-once cell, so each
                // variable is written at most once per loader. Binaries that export
                // secrets call `load` before spawning request work (the runtime
                // server does so before it starts serving and exits when it
                // fails); later calls are cache hits and never reach this write. Within this crate, exported keys
                // are read from the returned map (`resolve_secret`), never from
                // the environment.
                unsafe {
                    std::env::set_var(&env_var, value.expose());
                }
            }
            info!(secret = %secret_id, env_var = %env_var, "loaded secret");
            loaded.insert(env_var, value);
        }

        Ok(Arc::new(loaded))
    }
}

fn parse_secrets_config(raw: &str) -> Result<BTreeMap<String, String>, DeepResearchError> {
    serde_json::from_str(raw).map_err(|err| {
        DeepResearchError::InvalidConfiguration(format!(
            "SECRETS_CONFIG must be a JSON object of strings: {err}"
        ))
    })
}

/// Look a key up in loaded secrets first, then in the process environment.
pub fn resolve_secret(
    secrets: &SecretsMap,
    env_var: &str,
) -> Result<SecretValue, DeepResearchError> {
    match secrets.get(env_var) {
        Some(value) => Ok(value.clone()),
        None => crate::security::require_env(env_var),
    }
}

/// In-memory secret store for offline runs and tests.
#[derive(Default)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
    fetches: AtomicUsize,
}

impl StaticSecretStore {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn fetch(&self, secret_id: &str) -> Result<SecretValue, DeepResearchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.values
            .get(secret_id)
            .map(|value| SecretValue::new(value.clone()))
            .ok_or_else(|| DeepResearchError::secret_fetch(secret_id, "secret not found"))
    }
}

/// Placeholder used when the crate is built without a secret-store backend.
pub struct UnavailableSecretStore;

#[async_trait]
impl SecretStore for UnavailableSecretStore {
    async fn fetch(&self, secret_id: &str) -> Result<SecretValue, DeepResearchError> {
        Err(DeepResearchError::secret_fetch(
            secret_id,
            "no secret store available; rebuild with --features aws",
        ))
    }
}

#[cfg(feature = "aws")]
pub use aws_store::SecretsManagerStore;

#[cfg(feature = "aws")]
mod aws_store {
    use super::*;
    use aws_sdk_secretsmanager::error::DisplayErrorContext;

    /// AWS Secrets Manager backed store (`GetSecretValue`).
    pub struct SecretsManagerStore {
        client: aws_sdk_secretsmanager::Client,
    }

    impl SecretsManagerStore {
        pub async fn new(region: Option<String>) -> Self {
            let config = crate::aws::sdk_config(region).await;
            Self {
                client: aws_sdk_secretsmanager::Client::new(&config),
            }
        }
    }

    #[async_trait]
    impl SecretStore for SecretsManagerStore {
        async fn fetch(&self, secret_id: &str) -> Result<SecretValue, DeepResearchError> {
            let response = self
                .client
                .get_secret_value()
                .secret_id(secret_id)
                .send()
                .await
                .map_err(|err| {
                    DeepResearchError::secret_fetch(secret_id, DisplayErrorContext(&err))
                })?;

            response
                .secret_string()
                .map(SecretValue::new)
                .ok_or_else(|| DeepResearchError::secret_fetch(secret_id, "secret has no string value"))
        }
    }
}

/// Pick the secret store matching the build features.
pub async fn default_secret_store(_region: Option<String>) -> DynSecretStore {
    #[cfg(feature = "aws")]
    {
        Arc::new(SecretsManagerStore::new(_region).await)
    }
    #[cfg(not(feature = "aws"))]
    {
        Arc::new(UnavailableSecretStore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<StaticSecretStore> {
        Arc::new(StaticSecretStore::new([
            ("linkup/api-key", "lk-value"),
            ("tavily/api-key", "tv-value"),
        ]))
    }

    #[tokio::test]
    async fn second_load_hits_the_cache() {
        let store = store();
        let loader = SecretsLoader::new(
            Some(r#"{"DR_TEST_LINKUP": "linkup/api-key", "DR_TEST_TAVILY": "tavily/api-key"}"#.into()),
            store.clone(),
        )
        .without_env_export();

        let first = loader.load().await.expect("first load");
        let second = loader.load().await.expect("second load");

        assert_eq!(store.fetch_count(), 2, "one fetch per secret");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first["DR_TEST_LINKUP"].expose(), "lk-value");
        assert_eq!(first["DR_TEST_TAVILY"].expose(), "tv-value");
    }

    #[tokio::test]
    async fn missing_config_is_a_noop() {
        let store = store();
        let loader = SecretsLoader::new(None, store.clone());

        let loaded = loader.load().await.expect("load");
        assert!(loaded.is_empty());
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_and_caches_nothing() {
        let store = store();
        let loader = SecretsLoader::new(
            Some(r#"{"DR_TEST_OK": "linkup/api-key", "DR_TEST_MISSING": "missing/secret"}"#.into()),
            store.clone(),
        )
        .without_env_export();

        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, DeepResearchError::SecretFetch { .. }));
        assert!(loader.loaded().is_none());
    }

    #[tokio::test]
    async fn exports_loaded_values_into_environment() {
        let loader = SecretsLoader::new(
            Some(r#"{"DR_TEST_EXPORTED_SECRET": "linkup/api-key"}"#.into()),
            store(),
        );

        loader.load().await.expect("load");
        assert_eq!(
            std::env::var("DR_TEST_EXPORTED_SECRET").as_deref(),
            Ok("lk-value")
        );
    }

    #[tokio::test]
    async fn malformed_config_is_rejected() {
        let loader = SecretsLoader::new(Some("not json".into()), store());
        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, DeepResearchError::InvalidConfiguration(_)));
    }

    #[test]
    fn resolve_secret_prefers_loaded_values() {
        let mut map = SecretsMap::new();
        map.insert("DR_TEST_RESOLVE".into(), SecretValue::new("from-store"));
        assert_eq!(
            resolve_secret(&map, "DR_TEST_RESOLVE").unwrap().expose(),
            "from-store"
        );
        assert!(resolve_secret(&map, "DR_TEST_RESOLVE_UNSET").is_err());
    }
}
