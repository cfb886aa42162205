use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::detector;
use crate::engine::Engine;
use crate::limits::*;
use crate::model::FloorLayout;
use crate::notify::NotifyHub;

/// Manages per-garage engines. Each garage gets its own Engine + WAL +
/// detector + compactor. A garage's floor layout comes from
/// `<name>.layout.json` in the data directory when present, otherwise the
/// manager's default layout.
pub struct GarageManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    default_layout: FloorLayout,
}

impl GarageManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self::with_layout(data_dir, compact_threshold, FloorLayout::default_grid())
    }

    pub fn with_layout(data_dir: PathBuf, compact_threshold: u64, layout: FloorLayout) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            default_layout: layout,
        }
    }

    /// Get or lazily create an engine for the given garage.
    pub fn get_or_create(&self, garage: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(garage) {
            return Ok(engine.value().clone());
        }
        if garage.len() > MAX_GARAGE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "garage name too long",
            ));
        }
        if self.engines.len() >= MAX_GARAGES {
            return Err(std::io::Error::other("too many garages"));
        }

        // Sanitize garage name to prevent path traversal
        let safe_name: String = garage
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty garage name",
            ));
        }

        let layout = self.load_layout(&safe_name)?;
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, layout, notify)?);

        // Spawn detector + compactor for this garage
        let detector_engine = engine.clone();
        tokio::spawn(async move {
            detector::run_detector(detector_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            detector::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(garage.to_string(), engine.clone());
        metrics::gauge!(crate::observability::GARAGES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    fn load_layout(&self, safe_name: &str) -> std::io::Result<FloorLayout> {
        let path = self.data_dir.join(format!("{safe_name}.layout.json"));
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(self.default_layout.clone())
            }
            Err(e) => Err(e),
        }
    }
}
