//! Runtime settings: the per-minute check rate and the probe user agent.
//!
//! Settings live in the store and are read fresh by every worker
//! invocation, so an update takes effect on the next delivery.

use async_trait::async_trait;
use tracing::{info, warn};

use linkcheck_state::{Settings, SettingsPatch, StateStore};

use crate::error::{EngineError, EngineResult};

/// Source of the settings a worker invocation runs with.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn current(&self) -> EngineResult<Settings>;
}

/// Settings backed by the state store, seeded with defaults on first read.
#[derive(Clone)]
pub struct StoreSettings {
    store: StateStore,
}

impl StoreSettings {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Read the stored settings, writing the defaults if none exist yet.
    pub fn load(&self) -> EngineResult<Settings> {
        let (settings, seeded) = self.store.settings_or_default()?;
        if seeded {
            info!(
                rate_per_minute = settings.rate_per_minute,
                user_agent = %settings.user_agent,
                "default settings stored"
            );
        }
        Ok(settings)
    }

    /// Merge a partial update into the stored settings.
    ///
    /// Fields absent from the patch are kept. Unrecognised fields are
    /// ignored with a warning. The merge happens inside one store
    /// transaction.
    pub fn update(&self, patch: &SettingsPatch) -> EngineResult<Settings> {
        for field in patch.unknown.keys() {
            warn!(%field, "ignoring unknown settings field");
        }
        if patch.rate_per_minute == Some(0) {
            return Err(EngineError::Validation(
                "rate_per_minute must be positive".to_string(),
            ));
        }

        let settings = self.store.merge_settings(patch)?;
        info!(
            rate_per_minute = settings.rate_per_minute,
            user_agent = %settings.user_agent,
            "settings updated"
        );
        Ok(settings)
    }
}

#[async_trait]
impl SettingsProvider for StoreSettings {
    async fn current(&self) -> EngineResult<Settings> {
        self.load()
    }
}
