//! Runtime settings: loaded once at startup, replaced only by `reload`.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::ports::{RepositoryResult, SettingsSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub refund_reason_min_len: usize,
    pub refund_reason_max_len: usize,
    pub refund_evidence_max_items: usize,
    pub stale_refund_after: Duration,
    pub dead_letter_unknown_orders: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            refund_reason_min_len: 10,
            refund_reason_max_len: 1000,
            refund_evidence_max_items: 10,
            stale_refund_after: Duration::from_secs(24 * 3600),
            dead_letter_unknown_orders: true,
        }
    }
}

impl RuntimeSettings {
    /// Overlays the stored key/value pairs on the defaults. Unknown keys are
    /// ignored, malformed values are an error.
    pub fn from_values(values: &HashMap<String, String>) -> anyhow::Result<Self> {
        let mut settings = Self::default();

        for (key, value) in values {
            let value = value.trim();
            match key.as_str() {
                "refund_reason_min_len" => settings.refund_reason_min_len = value.parse()?,
                "refund_reason_max_len" => settings.refund_reason_max_len = value.parse()?,
                "refund_evidence_max_items" => {
                    settings.refund_evidence_max_items = value.parse()?
                }
                "stale_refund_after_secs" => {
                    settings.stale_refund_after = Duration::from_secs(value.parse()?)
                }
                "dead_letter_unknown_orders" => {
                    settings.dead_letter_unknown_orders = value.parse()?
                }
                other => tracing::debug!(key = other, "Ignoring unknown setting"),
            }
        }

        if settings.refund_reason_min_len > settings.refund_reason_max_len {
            anyhow::bail!("refund_reason_min_len must not exceed refund_reason_max_len");
        }

        Ok(settings)
    }
}

/// Holds the current settings snapshot. Readers never block; `reload`
/// swaps the whole snapshot at once.
pub struct SettingsStore {
    source: Option<Arc<dyn SettingsSource>>,
    current: ArcSwap<RuntimeSettings>,
}

impl SettingsStore {
    pub async fn load(source: Arc<dyn SettingsSource>) -> anyhow::Result<Self> {
        let values = source.load().await?;
        let settings = RuntimeSettings::from_values(&values)?;
        tracing::info!(?settings, "Runtime settings loaded");

        Ok(Self {
            source: Some(source),
            current: ArcSwap::from_pointee(settings),
        })
    }

    /// A store pinned to `settings`; `reload` keeps returning the same values.
    pub fn fixed(settings: RuntimeSettings) -> Self {
        Self {
            source: None,
            current: ArcSwap::from_pointee(settings),
        }
    }

    pub fn current(&self) -> Arc<RuntimeSettings> {
        self.current.load_full()
    }

    /// Re-reads the source. On error the previous snapshot stays in place.
    pub async fn reload(&self) -> anyhow::Result<Arc<RuntimeSettings>> {
        let Some(source) = &self.source else {
            return Ok(self.current());
        };
        let values = source.load().await?;
        let settings = Arc::new(RuntimeSettings::from_values(&values)?);
        self.current.store(settings.clone());
        tracing::info!(settings = ?*settings, "Runtime settings reloaded");
        Ok(settings)
    }
}

/// Reads the `app_settings` table.
pub struct PostgresSettingsSource {
    pool: PgPool,
}

impl PostgresSettingsSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsSource for PostgresSettingsSource {
    async fn load(&self) -> RepositoryResult<HashMap<String, String>> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM app_settings")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

/// Key/value pairs held in memory.
#[derive(Default)]
pub struct StaticSettingsSource {
    values: std::sync::RwLock<HashMap<String, String>>,
}

impl StaticSettingsSource {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: std::sync::RwLock::new(values),
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

#[async_trait]
impl SettingsSource for StaticSettingsSource {
    async fn load(&self) -> RepositoryResult<HashMap<String, String>> {
        Ok(self
            .values
            .read()
            .map(|values| values.clone())
            .unwrap_or_default())
    }
}
