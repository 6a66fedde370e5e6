use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn, Level};

use crate::filter_io::parse_filter_file;
use crate::matcher::FilterSet;
use crate::sortables::Sortable;
use crate::sorter::SortOrder;

const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// Settings a session starts from; config files layer onto the defaults.
#[derive(Debug)]
pub struct ViewOptions {
    pub order: SortOrder,
    pub filters: FilterSet,
}

impl Default for ViewOptions {
    fn default() -> Self {
        ViewOptions { order: SortOrder::default(), filters: FilterSet::new() }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub view: Option<ViewConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewConfig {
    /// Attribute names in grouping order, `divider` included.
    pub order: Option<Vec<String>>,
    /// Path to a persisted filter document loaded at startup.
    pub filter_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > MAX_CONFIG_BYTES {
                return Err(anyhow::anyhow!(
                    "config {} exceeds {} bytes",
                    path.display(),
                    MAX_CONFIG_BYTES
                ));
            }
        }
        let data = fs::read_to_string(path)?;
        Ok(toml::from_str::<Config>(&data)?)
    }

    pub fn apply(&self, opts: &mut ViewOptions) {
        let Some(view) = &self.view else {
            return;
        };
        if let Some(names) = &view.order {
            match parse_order(names) {
                Some(order) => {
                    info!(?names, "Config override sort order");
                    opts.order = order;
                }
                None => warn!(?names, "Invalid sort order in config"),
            }
        }
        if let Some(path) = view.filter_file.as_deref() {
            match parse_filter_file(Path::new(path)) {
                Ok(document) => opts.filters = document.into_filter_set(),
                Err(err) => {
                    warn!(error = %err, path, "Failed to load filter document");
                }
            }
        }
    }

    pub fn log_level(&self) -> Option<Level> {
        let level = self.logging.as_ref()?.level.as_deref()?;
        match level.to_lowercase().as_str() {
            "trace" => Some(Level::TRACE),
            "debug" => Some(Level::DEBUG),
            "info" => Some(Level::INFO),
            "warn" => Some(Level::WARN),
            "error" => Some(Level::ERROR),
            other => {
                warn!(value = other, "Invalid log level in config");
                None
            }
        }
    }
}

/// A valid order names known attributes, without repeats, with exactly one
/// divider.
fn parse_order(names: &[String]) -> Option<SortOrder> {
    let mut order = Vec::with_capacity(names.len());
    for name in names {
        let sortable = Sortable::from_name(name)?;
        if order.contains(&sortable) {
            return None;
        }
        order.push(sortable);
    }
    if order.iter().filter(|s| **s == Sortable::Divider).count() != 1 {
        return None;
    }
    Some(SortOrder::new(order))
}
