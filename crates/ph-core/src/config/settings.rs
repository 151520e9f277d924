use std::time::Duration;

use git2::Config;

use crate::error::CoreError;
use crate::storage::DataDir;

/// Tunables read from the `[ph]` section of `<data-dir>/config`
/// (git-config syntax).
#[derive(Debug, Clone)]
pub struct PhConfig {
    /// How long the index worker waits to batch records before committing.
    pub flush_interval: Duration,
    /// Bound of the index work queue; submitters block when it is full.
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub search_limit: usize,
    pub dimensions: usize,
    pub signature_name: String,
    pub signature_email: String,
}

impl Default for PhConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(250),
            queue_capacity: 64,
            batch_size: 32,
            search_limit: 5,
            dimensions: 384,
            signature_name: "ph".into(),
            signature_email: "ph@local".into(),
        }
    }
}

impl PhConfig {
    /// Read config values, falling back to defaults for missing keys.
    pub fn load(config: &Config) -> Result<Self, CoreError> {
        let defaults = Self::default();
        let flush_ms = read_positive(config, "ph.flushIntervalMs")?
            .unwrap_or(defaults.flush_interval.as_millis() as usize);
        Ok(Self {
            flush_interval: Duration::from_millis(flush_ms as u64),
            queue_capacity: read_positive(config, "ph.queueCapacity")?
                .unwrap_or(defaults.queue_capacity),
            batch_size: read_positive(config, "ph.batchSize")?.unwrap_or(defaults.batch_size),
            search_limit: read_positive(config, "ph.searchLimit")?
                .unwrap_or(defaults.search_limit),
            dimensions: read_positive(config, "ph.dimensions")?.unwrap_or(defaults.dimensions),
            signature_name: config
                .get_string("ph.signatureName")
                .unwrap_or(defaults.signature_name),
            signature_email: config
                .get_string("ph.signatureEmail")
                .unwrap_or(defaults.signature_email),
        })
    }

    /// Read `<data-dir>/config`, or defaults when it does not exist.
    pub fn load_from(data: &DataDir) -> Result<Self, CoreError> {
        let path = data.config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let config = Config::open(&path)?;
        Self::load(&config)
    }

    /// Write config to the `[ph]` section.
    pub fn save(&self, config: &mut Config) -> Result<(), CoreError> {
        config.set_i64("ph.flushIntervalMs", self.flush_interval.as_millis() as i64)?;
        config.set_i64("ph.queueCapacity", self.queue_capacity as i64)?;
        config.set_i64("ph.batchSize", self.batch_size as i64)?;
        config.set_i64("ph.searchLimit", self.search_limit as i64)?;
        config.set_i64("ph.dimensions", self.dimensions as i64)?;
        config.set_str("ph.signatureName", &self.signature_name)?;
        config.set_str("ph.signatureEmail", &self.signature_email)?;
        Ok(())
    }
}

fn read_positive(config: &Config, key: &str) -> Result<Option<usize>, CoreError> {
    match config.get_i64(key) {
        Ok(v) if v > 0 => Ok(Some(v as usize)),
        Ok(v) => Err(CoreError::Config(format!("{key} must be positive, got {v}"))),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(CoreError::Config(format!("{key}: {}", e.message()))),
    }
}
