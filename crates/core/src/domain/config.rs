//! Configuration management for GAPE
//!
//! This module provides:
//! - The tagged effect configuration message and its parameter bounds
//! - Stream and prefilter settings
//! - Preset files with TOML serialization
//! - Hot-reload support via file system watcher

use crate::domain::audio::{AudioError, StreamConfig};
use crate::domain::dsp::{params, BandGains, DelayMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

// ============================================================================
// EFFECT CONFIGURATION
// ============================================================================

/// Which effect a configuration selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Delay,
    Compressor,
    Equalizer,
}

impl EffectKind {
    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Delay => "delay",
            EffectKind::Compressor => "compressor",
            EffectKind::Equalizer => "equalizer",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Echo parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Delay time in seconds, (0, 0.5]
    pub time_s: f32,
    /// Gain of the delayed tap, [0, 1]
    pub gain: f32,
    #[serde(default)]
    pub mode: DelayMode,
}

impl DelayConfig {
    fn validate(&self) -> Result<()> {
        if !(self.time_s > 0.0 && self.time_s <= params::MAX_DELAY_S) {
            return Err(ConfigError::Invalid(format!(
                "delay time {} s outside (0, {}] s",
                self.time_s,
                params::MAX_DELAY_S
            )));
        }
        if !(0.0..=params::MAX_DELAY_GAIN).contains(&self.gain) {
            return Err(ConfigError::Invalid(format!(
                "delay gain {} outside [0, {}]",
                self.gain,
                params::MAX_DELAY_GAIN
            )));
        }
        Ok(())
    }
}

/// Compressor parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorConfig {
    /// RMS threshold in dB, at most 6
    pub threshold_db: f32,
    /// Attenuation ratio, strictly positive
    pub ratio: f32,
    /// RMS window in samples; defaults to 100 blocks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
}

impl CompressorConfig {
    /// Effective RMS window for a stream with `block_size`
    pub fn window_size_for(&self, block_size: usize) -> Result<usize> {
        match self.window_size {
            Some(window) => Ok(window),
            None => params::DEFAULT_RMS_WINDOW_BLOCKS
                .checked_mul(block_size)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "default RMS window of {} blocks of {} samples overflows",
                        params::DEFAULT_RMS_WINDOW_BLOCKS,
                        block_size
                    ))
                }),
        }
    }

    fn validate(&self, block_size: usize) -> Result<()> {
        if !(self.threshold_db.is_finite() && self.threshold_db <= params::MAX_THRESHOLD_DB) {
            return Err(ConfigError::Invalid(format!(
                "compressor threshold {} dB above {} dB",
                self.threshold_db,
                params::MAX_THRESHOLD_DB
            )));
        }
        if !(self.ratio.is_finite() && self.ratio > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "compressor ratio {} must be positive",
                self.ratio
            )));
        }
        let window = self.window_size_for(block_size)?;
        if window < 2 {
            return Err(ConfigError::Invalid(format!(
                "RMS window of {} samples is too short (minimum 2)",
                window
            )));
        }
        Ok(())
    }
}

fn default_low_cutoff() -> f32 {
    params::DEFAULT_LOW_CUTOFF_HZ
}

fn default_mid_cutoff() -> f32 {
    params::DEFAULT_MID_CUTOFF_HZ
}

fn default_eq_taps() -> usize {
    params::DEFAULT_EQ_TAPS
}

/// Three-band equalizer parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerConfig {
    pub low_db: f32,
    pub mid_db: f32,
    pub high_db: f32,
    #[serde(default = "default_low_cutoff")]
    pub low_cutoff_hz: f32,
    #[serde(default = "default_mid_cutoff")]
    pub mid_cutoff_hz: f32,
    /// Taps per crossover lowpass, at least 3
    #[serde(default = "default_eq_taps")]
    pub taps: usize,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            low_db: 0.0,
            mid_db: 0.0,
            high_db: 0.0,
            low_cutoff_hz: params::DEFAULT_LOW_CUTOFF_HZ,
            mid_cutoff_hz: params::DEFAULT_MID_CUTOFF_HZ,
            taps: params::DEFAULT_EQ_TAPS,
        }
    }
}

impl EqualizerConfig {
    /// Flat crossover with the given band gains
    pub fn with_gains(low_db: f32, mid_db: f32, high_db: f32) -> Self {
        Self {
            low_db,
            mid_db,
            high_db,
            ..Default::default()
        }
    }

    pub fn gains(&self) -> BandGains {
        BandGains::new(self.low_db, self.mid_db, self.high_db)
    }

    fn validate(&self, sample_rate: u32) -> Result<()> {
        self.gains()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let nyquist = sample_rate as f32 / 2.0;
        for (name, hz) in [("low", self.low_cutoff_hz), ("mid", self.mid_cutoff_hz)] {
            if !(hz > 0.0 && hz < nyquist) {
                return Err(ConfigError::Invalid(format!(
                    "{} crossover {} Hz outside (0, {}) Hz",
                    name, hz, nyquist
                )));
            }
        }
        if self.low_cutoff_hz >= self.mid_cutoff_hz {
            return Err(ConfigError::Invalid(format!(
                "low crossover {} Hz must be below mid crossover {} Hz",
                self.low_cutoff_hz, self.mid_cutoff_hz
            )));
        }
        if self.taps < 3 {
            return Err(ConfigError::Invalid(format!(
                "equalizer needs at least 3 taps, got {}",
                self.taps
            )));
        }
        Ok(())
    }
}

/// Tagged configuration message selecting exactly one effect
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectConfig {
    Delay(DelayConfig),
    Compressor(CompressorConfig),
    Equalizer(EqualizerConfig),
}

impl EffectConfig {
    pub fn kind(&self) -> EffectKind {
        match self {
            EffectConfig::Delay(_) => EffectKind::Delay,
            EffectConfig::Compressor(_) => EffectKind::Compressor,
            EffectConfig::Equalizer(_) => EffectKind::Equalizer,
        }
    }

    /// Check every parameter against its documented bounds
    pub fn validate(&self, stream: &StreamConfig) -> Result<()> {
        match self {
            EffectConfig::Delay(delay) => delay.validate(),
            EffectConfig::Compressor(comp) => comp.validate(stream.block_size),
            EffectConfig::Equalizer(eq) => eq.validate(stream.sample_rate),
        }
    }
}

impl Default for EffectConfig {
    fn default() -> Self {
        EffectConfig::Equalizer(EqualizerConfig::default())
    }
}

/// Input-conditioning lowpass ahead of the effect
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrefilterConfig {
    pub enabled: bool,
    pub cutoff_hz: f32,
    pub taps: usize,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cutoff_hz: params::DEFAULT_PREFILTER_CUTOFF_HZ,
            taps: params::DEFAULT_PREFILTER_TAPS,
        }
    }
}

impl PrefilterConfig {
    fn validate(&self, sample_rate: u32) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let nyquist = sample_rate as f32 / 2.0;
        if !(self.cutoff_hz > 0.0 && self.cutoff_hz < nyquist) {
            return Err(ConfigError::Invalid(format!(
                "prefilter cutoff {} Hz outside (0, {}) Hz",
                self.cutoff_hz, nyquist
            )));
        }
        if self.taps == 0 {
            return Err(ConfigError::Invalid(
                "prefilter needs at least one tap".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// COMPLETE CONFIGURATION
// ============================================================================

/// Complete GAPE configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GapeConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub prefilter: PrefilterConfig,
    pub effect: EffectConfig,
}

impl GapeConfig {
    /// Default stream and prefilter around `effect`
    pub fn with_effect(effect: EffectConfig) -> Self {
        Self {
            effect,
            ..Default::default()
        }
    }

    /// Validate stream, prefilter and effect parameters
    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        self.prefilter.validate(self.stream.sample_rate)?;
        self.effect.validate(&self.stream)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&contents)?;

        debug!(effect = %config.effect.kind(), "Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(path, self.to_toml_string()?).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Create factory default configuration (flat equalizer)
    pub fn factory_default() -> Self {
        Self::default()
    }

    /// Run at `sample_rate` instead of the configured rate
    ///
    /// A prefilter cutoff at or above the new Nyquist frequency is pulled
    /// down to a fixed fraction of it. Returns `true` when that happened.
    /// The result is not validated.
    pub fn retarget_sample_rate(&mut self, sample_rate: u32) -> bool {
        self.stream.sample_rate = sample_rate;

        let nyquist = sample_rate as f32 / 2.0;
        if !self.prefilter.enabled || self.prefilter.cutoff_hz < nyquist {
            return false;
        }

        let cutoff_hz = nyquist * params::PREFILTER_NYQUIST_FRACTION;
        warn!(
            sample_rate,
            from = self.prefilter.cutoff_hz,
            to = cutoff_hz,
            "Prefilter cutoff lowered below Nyquist"
        );
        self.prefilter.cutoff_hz = cutoff_hz;
        true
    }
}

// ============================================================================
// FILES
// ============================================================================

/// File system watcher for hot-reload
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    config_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Watch `dir` for created or modified `.toml` files
    pub async fn new(dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (config_tx, _config_rx) = broadcast::channel(32);

        fs::create_dir_all(&dir).await?;

        let tx_clone = config_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                    ) {
                        for path in event.paths {
                            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                                // No subscribers is not an error
                                let _ = tx_clone.send(path);
                            }
                        }
                    }
                }
                Err(e) => error!("Config watch error: {}", e),
            }
        })?;

        watcher.watch(&dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %dir.display(), "Config watcher started");

        Ok(Self {
            _watcher: watcher,
            config_tx,
        })
    }

    /// Subscribe to config change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.config_tx.subscribe()
    }
}

/// Named presets stored as `<name>.toml` in one directory
pub struct PresetManager {
    preset_dir: PathBuf,
}

impl PresetManager {
    pub fn new(preset_dir: PathBuf) -> Self {
        Self { preset_dir }
    }

    pub fn preset_dir(&self) -> &Path {
        &self.preset_dir
    }

    fn preset_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ConfigError::Invalid(format!("invalid preset name '{}'", name)));
        }
        Ok(self.preset_dir.join(format!("{}.toml", name)))
    }

    /// List all available presets; a missing directory lists nothing
    #[instrument(skip(self))]
    pub async fn list_presets(&self) -> Result<Vec<String>> {
        let mut presets = Vec::new();

        let mut entries = match fs::read_dir(&self.preset_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(presets),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                    presets.push(name.to_string());
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Listed presets");
        Ok(presets)
    }

    #[instrument(skip(self))]
    pub async fn load_preset(&self, name: &str) -> Result<GapeConfig> {
        let path = self.preset_path(name)?;

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        GapeConfig::load_from_file(&path).await
    }

    #[instrument(skip(self, config))]
    pub async fn save_preset(&self, name: &str, config: &GapeConfig) -> Result<()> {
        let path = self.preset_path(name)?;
        config.save_to_file(&path).await
    }

    #[instrument(skip(self))]
    pub async fn delete_preset(&self, name: &str) -> Result<()> {
        let path = self.preset_path(name)?;

        if !path.exists() {
            return Err(ConfigError::PresetNotFound(name.to_string()));
        }

        fs::remove_file(&path).await?;
        info!(name, "Preset deleted");
        Ok(())
    }

    pub async fn preset_exists(&self, name: &str) -> bool {
        self.preset_path(name).map(|p| p.exists()).unwrap_or(false)
    }
}

/// Owner of the main configuration file, `<config dir>/gape/config.toml`
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// Platform configuration directory for GAPE
    ///
    /// `~/.config/gape` on Linux, the `Application Support` folder on macOS,
    /// `%APPDATA%\gape` on Windows.
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("gape"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Directory holding user presets
    pub fn preset_dir(&self) -> PathBuf {
        self.config_dir.join("presets")
    }

    /// Load the configuration file
    ///
    /// A missing file yields (and writes) the factory default. A file that
    /// does not parse is copied to `config.toml.corrupt` and replaced by the
    /// factory default. A file whose stream and prefilter are usable but
    /// whose effect is out of range keeps its stream and prefilter and falls
    /// back to the factory effect, also keeping a `.corrupt` copy.
    #[instrument(skip(self))]
    pub async fn load(&self) -> GapeConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = GapeConfig::factory_default();

            if let Err(e) = self.save(&config).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }

            return config;
        }

        let parsed = match fs::read_to_string(&self.config_path).await {
            Ok(contents) => toml::from_str::<GapeConfig>(&contents).map_err(ConfigError::from),
            Err(e) => Err(ConfigError::from(e)),
        };

        let config = match parsed {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to read config, using factory default"
                );
                self.backup_corrupt().await;
                return GapeConfig::factory_default();
            }
        };

        match config.validate() {
            Ok(()) => {
                info!(
                    effect = %config.effect.kind(),
                    sample_rate = config.stream.sample_rate,
                    block_size = config.stream.block_size,
                    prefilter = config.prefilter.enabled,
                    "Configuration loaded"
                );
                config
            }
            Err(e) => {
                self.backup_corrupt().await;

                let fallback = GapeConfig {
                    effect: EffectConfig::default(),
                    ..config
                };
                if fallback.validate().is_ok() {
                    warn!(
                        effect = %config.effect.kind(),
                        error = %e,
                        "Stored effect out of range, using a flat equalizer"
                    );
                    fallback
                } else {
                    error!(error = %e, "Stored stream settings invalid, using factory default");
                    GapeConfig::factory_default()
                }
            }
        }
    }

    async fn backup_corrupt(&self) {
        let backup_path = self.config_path.with_extension("toml.corrupt");
        if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
            error!(
                path = %backup_path.display(),
                error = %copy_err,
                "Failed to backup corrupt config"
            );
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &GapeConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the configuration file
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(path = %self.config_path.display(), "Configuration cleared");
        }

        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
