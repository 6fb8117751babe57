// ===============================
// src/snapshot.rs (engine persistence)
// ===============================
//
// One pretty-printed JSON file per instrument: `<dir>/<SYMBOL>.json`.
// Writes go to `<SYMBOL>.json.tmp` first and are renamed into place, so a
// crash mid-write leaves the previous snapshot intact.
//
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::domain::{Quote, TradingStatus};
use crate::grid::OscillationState;
use crate::orders::Order;
use crate::positions::Position;
use crate::stop::StopState;
use crate::zone::Zone;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot is for {found}, engine trades {expected}")]
    SymbolMismatch { expected: String, found: String },
    #[error("snapshot version {found} not supported (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("config rejected on restore: {0}")]
    Config(#[from] ConfigError),
}

/// Everything needed to resume an instrument and make the same decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub symbol: String,
    pub zone: Zone,
    /// Bumped on every zone transition.
    #[serde(default)]
    pub zone_epoch: u64,
    pub position: Position,
    #[serde(flatten)]
    pub oscillation: OscillationState,
    pub stop: StopState,
    pub orders: Vec<Order>,
    pub next_seq: u64,
    pub last_ts: Option<i64>,
    pub last_quote: Option<Quote>,
    pub trading: TradingStatus,
    #[serde(default)]
    pub halted: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    fn path_for(&self, symbol: &str) -> PathBuf { self.dir.join(format!("{symbol}.json")) }

    pub fn save(&self, snap: &EngineSnapshot) -> Result<(), SnapshotError> {
        let path = self.path_for(&snap.symbol);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snap)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!(symbol = %snap.symbol, path = %path.display(), "snapshot saved");
        Ok(())
    }

    /// `Ok(None)` when no snapshot exists yet.
    pub fn load(&self, symbol: &str) -> Result<Option<EngineSnapshot>, SnapshotError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        let snap: EngineSnapshot = serde_json::from_str(&json)?;
        info!(symbol, path = %path.display(), zone = snap.zone.as_str(), "snapshot loaded");
        Ok(Some(snap))
    }
}
