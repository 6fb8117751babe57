// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : swing_grid_bot — zone-based swing grid engine in Rust
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Streams market data (mock/Binance), tracks price zones, runs
          trailing grid oscillation inside the active zone, escalates order
          aggressiveness, exits on stop breach, exposes Prometheus metrics,
          records JSONL events and persists engine snapshots.
=============================================================================
*/
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use dotenvy::dotenv;
use thiserror::Error;

use crate::zone::Zone;

/// Market data source
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarketMode {
    Mock,
    BinanceSandbox,
    BinanceMainnet,
}

impl MarketMode {
    pub fn default_ws_url(&self) -> &'static str {
        match self {
            MarketMode::Mock            => "wss://testnet.binance.vision", // unused in mock
            MarketMode::BinanceSandbox  => "wss://testnet.binance.vision",
            MarketMode::BinanceMainnet  => "wss://stream.binance.com:9443",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Mock => "mock",
            MarketMode::BinanceSandbox => "binance_sandbox",
            MarketMode::BinanceMainnet => "binance_mainnet",
        }
    }
}

impl FromStr for MarketMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock"             => Ok(MarketMode::Mock),
            "binance_sandbox"  => Ok(MarketMode::BinanceSandbox),
            "binance_mainnet"  => Ok(MarketMode::BinanceMainnet),
            other => Err(format!("unknown market mode '{other}'")),
        }
    }
}

/// Runtime switches. Every flag falls back to an env var (and `.env`).
#[derive(Parser, Clone, Debug)]
#[command(name = "swing_grid_bot", about = "Zone-based swing grid engine")]
pub struct Args {
    /// Instruments to trade, one isolated engine each
    #[arg(long, env = "SYMBOLS", value_delimiter = ',', default_value = "BTCUSDT")]
    pub symbols: Vec<String>,

    #[arg(long, env = "FEED_MODE", default_value = "mock")]
    pub feed_mode: MarketMode,

    /// Override for the Binance public stream base URL
    #[arg(long, env = "BINANCE_WS_URL")]
    pub binance_ws_url: Option<String>,

    /// JSONL event log
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,

    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,

    /// Directory for engine snapshots; restore from it on start
    #[arg(long, env = "SNAPSHOT_DIR")]
    pub snapshot_dir: Option<PathBuf>,

    #[arg(long, env = "SNAPSHOT_EVERY_SECS", default_value_t = 30)]
    pub snapshot_every_secs: u64,

    /// Mock gateway: delay before a resting order fills
    #[arg(long, env = "MOCK_FILL_MS", default_value_t = 40)]
    pub mock_fill_ms: u64,

    /// Mock gateway: probability that a new order is rejected
    #[arg(long, env = "MOCK_REJECT_RATE", default_value_t = 0.0)]
    pub mock_reject_rate: f64,
}

impl Args {
    pub fn ws_url(&self) -> String {
        self.binance_ws_url
            .clone()
            .unwrap_or_else(|| self.feed_mode.default_ws_url().to_string())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(String),
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    #[error("swing high {high} must be above swing low {low}")]
    InvertedRange { low: i64, high: i64 },
    #[error("inner zone width {width} is narrower than one grid step {grid_step}")]
    ZoneTooNarrow { width: i64, grid_step: i64 },
    #[error("{0} must be within (0, 1)")]
    BadRatio(&'static str),
}

/// Static per-instrument parameters. Prices in ticks, quantities in lots,
/// money (stop thresholds) in ticks * lots.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneConfig {
    pub symbol: String,
    pub price_scale: i64,
    pub swing_high: i64,
    pub swing_low: i64,
    pub grid_step: i64,
    pub trail: i64,
    pub base_qty: i64,
    pub offset_qty: i64,
    pub n_grids: i64,
    pub payup_ticks: i64,
    pub stop_loss: i64,
    pub profit_take: i64,
    pub profit_trail_ratio: Option<f64>,
    pub stop_excursion: Option<i64>,
    pub max_position: Option<i64>,
    pub cancel_distance_grids: i64,
    pub start_zone: Option<Zone>,
    pub max_reject_retries: u32,
    pub patient_timeout_ms: Option<i64>,
    pub accelerated_timeout_ms: Option<i64>,
    pub urgent_timeout_ms: Option<i64>,
    pub cancel_timeout_ms: i64,
    /// Reprice a resting order one mode up once the market moves this many
    /// ticks away from it.
    pub reprice_ticks: Option<i64>,
    /// Give up on a grid order once the market is this many ticks past its
    /// intended price.
    pub max_slippage_ticks: Option<i64>,
}

impl ZoneConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_step <= 0 { return Err(ConfigError::NonPositive("GRID_STEP")); }
        if self.trail <= 0 { return Err(ConfigError::NonPositive("TRAIL")); }
        if self.swing_high <= self.swing_low {
            return Err(ConfigError::InvertedRange { low: self.swing_low, high: self.swing_high });
        }
        if self.price_scale <= 0 { return Err(ConfigError::NonPositive("PRICE_SCALE")); }
        if self.base_qty <= 0 { return Err(ConfigError::NonPositive("BASE_QTY")); }
        if self.offset_qty < 0 { return Err(ConfigError::NonPositive("OFFSET_QTY")); }
        if self.n_grids <= 0 { return Err(ConfigError::NonPositive("N_GRIDS")); }
        if self.payup_ticks < 0 { return Err(ConfigError::NonPositive("PAYUP_TICKS")); }
        if self.stop_loss <= 0 { return Err(ConfigError::NonPositive("STOP_LOSS")); }
        if self.profit_take <= 0 { return Err(ConfigError::NonPositive("PROFIT_TAKE")); }
        if self.cancel_distance_grids <= 0 { return Err(ConfigError::NonPositive("CANCEL_DISTANCE_GRIDS")); }
        if self.cancel_timeout_ms <= 0 { return Err(ConfigError::NonPositive("CANCEL_TIMEOUT_MS")); }
        if matches!(self.max_position, Some(q) if q <= 0) { return Err(ConfigError::NonPositive("MAX_POSITION")); }
        if matches!(self.stop_excursion, Some(e) if e <= 0) { return Err(ConfigError::NonPositive("STOP_EXCURSION")); }
        if matches!(self.profit_trail_ratio, Some(r) if !(r > 0.0 && r < 1.0)) {
            return Err(ConfigError::BadRatio("PROFIT_TRAIL_RATIO"));
        }
        let width = (self.swing_high - self.swing_low) / 3;
        if width < self.grid_step {
            return Err(ConfigError::ZoneTooNarrow { width, grid_step: self.grid_step });
        }
        Ok(())
    }

    /// P_H - P_L in ticks.
    pub fn swing_range(&self) -> i64 { self.swing_high - self.swing_low }

    /// Build from a key lookup. For every key `<SYMBOL>_<KEY>` wins over `<KEY>`,
    /// so several instruments can share one `.env`.
    pub fn from_lookup<F>(symbol: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            lookup(&format!("{}_{}", symbol.to_ascii_uppercase(), key))
                .or_else(|| lookup(key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parse_f64 = |key: &str| -> Result<Option<f64>, ConfigError> {
            match get(key) {
                None => Ok(None),
                Some(v) => v
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| ConfigError::Invalid { key: key.to_string(), value: v }),
            }
        };
        let parse_i64 = |key: &str| -> Result<Option<i64>, ConfigError> {
            match get(key) {
                None => Ok(None),
                Some(v) => v
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| ConfigError::Invalid { key: key.to_string(), value: v }),
            }
        };
        let required = |key: &str| -> Result<f64, ConfigError> {
            parse_f64(key)?.ok_or_else(|| ConfigError::Missing(key.to_string()))
        };

        let price_scale = parse_i64("PRICE_SCALE")?.unwrap_or(100);
        let scale = price_scale as f64;
        let ticks = |v: f64| (v * scale).round() as i64;

        let start_zone = match get("START_ZONE") {
            None => None,
            Some(v) => Some(Zone::parse(&v).ok_or(ConfigError::Invalid { key: "START_ZONE".into(), value: v })?),
        };

        let cfg = ZoneConfig {
            symbol: symbol.to_ascii_uppercase(),
            price_scale,
            swing_high: ticks(required("SWING_HIGH")?),
            swing_low: ticks(required("SWING_LOW")?),
            grid_step: ticks(required("GRID_STEP")?),
            trail: ticks(required("TRAIL")?),
            base_qty: parse_i64("BASE_QTY")?.unwrap_or(10),
            offset_qty: parse_i64("OFFSET_QTY")?.unwrap_or(2),
            n_grids: parse_i64("N_GRIDS")?.unwrap_or(8),
            payup_ticks: parse_i64("PAYUP_TICKS")?.unwrap_or(1),
            stop_loss: ticks(required("STOP_LOSS")?),
            profit_take: ticks(required("PROFIT_TAKE")?),
            profit_trail_ratio: parse_f64("PROFIT_TRAIL_RATIO")?,
            stop_excursion: parse_f64("STOP_EXCURSION")?.map(ticks),
            max_position: parse_i64("MAX_POSITION")?,
            cancel_distance_grids: parse_i64("CANCEL_DISTANCE_GRIDS")?.unwrap_or(12),
            start_zone,
            max_reject_retries: parse_i64("MAX_REJECT_RETRIES")?.unwrap_or(3).max(0) as u32,
            patient_timeout_ms: enabled(parse_i64("PATIENT_TIMEOUT_MS")?, 30_000),
            accelerated_timeout_ms: enabled(parse_i64("ACCELERATED_TIMEOUT_MS")?, 20_000),
            urgent_timeout_ms: enabled(parse_i64("URGENT_TIMEOUT_MS")?, 10_000),
            cancel_timeout_ms: parse_i64("CANCEL_TIMEOUT_MS")?.unwrap_or(5_000),
            reprice_ticks: enabled(parse_i64("REPRICE_TICKS")?, 3),
            max_slippage_ticks: enabled(parse_i64("MAX_SLIPPAGE_TICKS")?, 10),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

// 0 (or less) switches the rule off
fn enabled(v: Option<i64>, default: i64) -> Option<i64> {
    match v.unwrap_or(default) {
        x if x <= 0 => None,
        x => Some(x),
    }
}

/// Read `.env`, parse CLI/env args and the zone config of every symbol.
pub fn load() -> Result<(Args, Vec<ZoneConfig>), ConfigError> {
    let _ = dotenv();
    let args = Args::parse();
    let zones = args
        .symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| ZoneConfig::from_lookup(s, |k| env::var(k).ok()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((args, zones))
}

#[cfg(test)]
pub(crate) fn sample() -> ZoneConfig {
    ZoneConfig {
        symbol: "TEST".into(),
        price_scale: 1,
        swing_high: 190,
        swing_low: 100,
        grid_step: 2,
        trail: 1,
        base_qty: 10,
        offset_qty: 2,
        n_grids: 8,
        payup_ticks: 1,
        stop_loss: 5_000,
        profit_take: 5_000,
        profit_trail_ratio: None,
        stop_excursion: None,
        max_position: None,
        cancel_distance_grids: 12,
        start_zone: None,
        max_reject_retries: 2,
        patient_timeout_ms: Some(30_000),
        accelerated_timeout_ms: Some(20_000),
        urgent_timeout_ms: Some(10_000),
        cancel_timeout_ms: 5_000,
        reprice_ticks: None,
        max_slippage_ticks: None,
    }
}
