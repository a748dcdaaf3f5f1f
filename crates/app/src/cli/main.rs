//! GAPE command-line application
//!
//! Runs the effect pipeline over WAV files or live audio devices, decodes
//! control frames and manages presets.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use gape_core::domain::config::{ConfigManager, GapeConfig, PresetManager};
use gape_core::domain::dsp::EffectPipeline;
use gape_core::domain::{BuiltinPreset, ControlFrame, PinState};
use gape_infra::audio::{
    EngineStats, LiveInput, LiveOutput, ProcessingEngine, WavSink, WavSource,
    DEFAULT_QUEUE_BLOCKS,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gape")]
#[command(about = "Real-time guitar effects: echo, compressor and 3-band equalizer", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Where the effect settings come from, applied in order
#[derive(clap::Args, Debug, Default)]
struct EffectSource {
    /// Configuration file to use instead of the stored configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Built-in preset (name or number 1-11) or saved preset name
    #[arg(long, value_name = "NAME|N")]
    preset: Option<String>,

    /// Control frame overriding the effect
    #[arg(long, value_name = "B0,B1,B2,B3")]
    frame: Option<ControlFrame>,
}

#[derive(Subcommand)]
enum Command {
    /// Process a WAV file offline
    Process {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        source: EffectSource,
    },
    /// Process the default input device to the default output until Ctrl-C
    Live {
        #[command(flatten)]
        source: EffectSource,
        /// Rebuild the pipeline when the configuration file changes
        ///
        /// The file is the only source of settings while watching, so
        /// `--preset` and `--frame` are refused.
        #[arg(long, conflicts_with_all = ["preset", "frame"])]
        watch: bool,
    },
    /// Decode a control frame or a pin state
    #[command(group(ArgGroup::new("message").required(true).args(["frame", "pins"])))]
    Decode {
        #[arg(long, value_name = "B0,B1,B2,B3")]
        frame: Option<ControlFrame>,
        /// Pin byte, decimal, 0x hex or 0b binary
        #[arg(long, value_name = "BYTE")]
        pins: Option<PinState>,
        /// Print JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
    /// Manage presets
    Presets {
        #[command(subcommand)]
        action: PresetAction,
    },
    /// Write the factory-default configuration
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PresetAction {
    /// List built-in and saved presets
    List,
    /// Print a preset's configuration
    Show { name: String },
    /// Save the resolved configuration as a user preset
    Save {
        name: String,
        #[command(flatten)]
        source: EffectSource,
    },
    /// Delete a user preset
    Delete { name: String },
}

#[derive(Serialize)]
struct Decoded {
    #[serde(skip_serializing_if = "Option::is_none")]
    preset: Option<&'static str>,
    #[serde(flatten)]
    config: GapeConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir()?,
    };
    let manager = ConfigManager::new(config_dir);
    debug!(dir = %manager.config_dir().display(), "Using configuration directory");

    match cli.command {
        Command::Process {
            input,
            output,
            source,
        } => {
            let config = resolve_config(&manager, &source).await?;
            let stats = process_file(config, &input, &output).await?;
            println!(
                "Processed {} blocks ({} samples) into {}",
                stats.blocks,
                stats.samples,
                output.display()
            );
        }
        Command::Live { source, watch } => {
            let config = resolve_config(&manager, &source).await?;
            let watched = watch.then(|| {
                source
                    .config
                    .clone()
                    .unwrap_or_else(|| manager.config_path().to_path_buf())
            });
            let stats = run_live(config, watched).await?;
            println!(
                "Stopped after {} blocks ({} reloads)",
                stats.blocks, stats.reloads
            );
        }
        Command::Decode { frame, pins, json } => {
            let decoded = decode_message(frame, pins)?;
            print_decoded(&decoded, json)?;
        }
        Command::Presets { action } => presets_command(&manager, action).await?,
        Command::Init { force } => {
            if manager.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    manager.config_path().display()
                );
            }
            manager.save(&GapeConfig::factory_default()).await?;
            println!("Wrote {}", manager.config_path().display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Base configuration, then preset, then control frame
async fn resolve_config(manager: &ConfigManager, source: &EffectSource) -> Result<GapeConfig> {
    let mut config = match &source.config {
        Some(path) => GapeConfig::load_from_file(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => manager.load().await,
    };

    if let Some(name) = &source.preset {
        config = apply_preset(manager, config, name).await?;
    }

    if let Some(frame) = source.frame {
        config.effect = frame
            .decode()
            .with_context(|| format!("decoding frame {}", frame))?;
        info!(effect = %config.effect.kind(), "Effect set from control frame");
    }

    config.validate()?;
    Ok(config)
}

async fn apply_preset(
    manager: &ConfigManager,
    mut config: GapeConfig,
    name: &str,
) -> Result<GapeConfig> {
    if let Some(preset) = BuiltinPreset::lookup(name) {
        info!(preset = preset.name(), "Using built-in preset");
        config.effect = preset.effect_config();
        return Ok(config);
    }

    let presets = PresetManager::new(manager.preset_dir());
    let saved = presets
        .load_preset(name)
        .await
        .with_context(|| format!("no built-in or saved preset named '{}'", name))?;
    info!(preset = name, "Using saved preset");
    Ok(saved)
}

// ============================================================================
// PROCESSING
// ============================================================================

async fn process_file(mut config: GapeConfig, input: &Path, output: &Path) -> Result<EngineStats> {
    let source = WavSource::open(input, config.stream.block_size)
        .with_context(|| format!("opening {}", input.display()))?;

    let file_rate = source.sample_rate();
    if file_rate != config.stream.sample_rate {
        info!(
            from = config.stream.sample_rate,
            to = file_rate,
            "Using the input file's sample rate"
        );
        config.retarget_sample_rate(file_rate);
        config
            .validate()
            .with_context(|| format!("settings do not fit the {} Hz rate of {}", file_rate, input.display()))?;
    }

    let pipeline = EffectPipeline::new(&config)?;
    let channels = config.stream.layout.channels() as u16;
    let sink = WavSink::create(output, config.stream.sample_rate, channels, pipeline.output_len())
        .with_context(|| format!("creating {}", output.display()))?;

    let mut engine = ProcessingEngine::new(pipeline, Box::new(source), Box::new(sink))?;
    let stats = tokio::task::spawn_blocking(move || engine.run()).await??;
    Ok(stats)
}

async fn run_live(config: GapeConfig, watched: Option<PathBuf>) -> Result<EngineStats> {
    let stop = Arc::new(AtomicBool::new(false));

    let (input, source) = LiveInput::open(&config.stream, DEFAULT_QUEUE_BLOCKS)?;
    let (output, sink) = LiveOutput::open(
        &config.stream,
        config.stream.layout.channels(),
        DEFAULT_QUEUE_BLOCKS,
    )?;
    info!(input = input.device(), output = output.device(), "Live processing started, press Ctrl-C to stop");

    let pipeline = EffectPipeline::new(&config)?;
    let mut engine = ProcessingEngine::new(
        pipeline,
        Box::new(source.with_stop(Arc::clone(&stop))),
        Box::new(sink),
    )?
    .with_stop(Arc::clone(&stop));

    if let Some(path) = watched {
        let (reload_tx, reload_rx) = crossbeam::channel::unbounded();
        engine = engine.with_reload(reload_rx);
        spawn_reloader(path, config, reload_tx).await?;
    }

    let mut handle = tokio::task::spawn_blocking(move || engine.run());

    let stats = tokio::select! {
        joined = &mut handle => joined??,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Stopping");
            stop.store(true, Ordering::Relaxed);
            handle.await??
        }
    };

    if input.overruns() > 0 {
        warn!(overruns = input.overruns(), "Processing fell behind the input device");
    }
    Ok(stats)
}

/// Rebuild the pipeline whenever `path` changes on disk
async fn spawn_reloader(
    path: PathBuf,
    current: GapeConfig,
    reload_tx: crossbeam::channel::Sender<EffectPipeline>,
) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path.file_name().map(|n| n.to_os_string());

    let watcher = gape_core::domain::config::ConfigWatcher::new(dir).await?;
    let mut events = watcher.subscribe();

    tokio::spawn(async move {
        let _watcher = watcher;
        loop {
            let changed = match events.recv().await {
                Ok(changed) => changed,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            if changed.file_name().map(|n| n.to_os_string()) != file_name {
                continue;
            }

            let config = match GapeConfig::load_from_file(&path).await {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring invalid configuration");
                    continue;
                }
            };
            if config.stream != current.stream {
                warn!("Stream settings changed, restart to apply them");
                continue;
            }

            match EffectPipeline::new(&config) {
                Ok(pipeline) => {
                    if reload_tx.send(pipeline).is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "Failed to build pipeline"),
            }
        }
        debug!("Config reloader stopped");
    });

    Ok(())
}

// ============================================================================
// DECODING
// ============================================================================

fn decode_message(frame: Option<ControlFrame>, pins: Option<PinState>) -> Result<Decoded> {
    if let Some(frame) = frame {
        let effect = frame
            .decode()
            .with_context(|| format!("decoding frame {}", frame))?;
        return Ok(Decoded {
            preset: None,
            config: GapeConfig::with_effect(effect),
        });
    }

    if let Some(pins) = pins {
        let preset = pins
            .decode()
            .with_context(|| format!("decoding pins {:#010b}", pins.0))?;
        return Ok(Decoded {
            preset: Some(preset.name()),
            config: GapeConfig::with_effect(preset.effect_config()),
        });
    }

    bail!("either --frame or --pins is required")
}

fn print_decoded(decoded: &Decoded, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(decoded)?);
        return Ok(());
    }

    if let Some(preset) = decoded.preset {
        println!("# {}", preset);
    }
    print!("{}", decoded.config.to_toml_string()?);
    Ok(())
}

// ============================================================================
// PRESETS
// ============================================================================

async fn presets_command(manager: &ConfigManager, action: PresetAction) -> Result<()> {
    let presets = PresetManager::new(manager.preset_dir());

    match action {
        PresetAction::List => {
            println!("Built-in:");
            for preset in BuiltinPreset::ALL {
                println!("  {:>2}  {}", preset.number(), preset.name());
            }
            let saved = presets.list_presets().await?;
            if !saved.is_empty() {
                println!("Saved ({}):", presets.preset_dir().display());
                for name in saved {
                    println!("      {}", name);
                }
            }
        }
        PresetAction::Show { name } => {
            let config = apply_preset(manager, GapeConfig::default(), &name).await?;
            print!("{}", config.to_toml_string()?);
        }
        PresetAction::Save { name, source } => {
            let config = resolve_config(manager, &source).await?;
            presets.save_preset(&name, &config).await?;
            println!("Saved preset '{}'", name);
        }
        PresetAction::Delete { name } => {
            presets.delete_preset(&name).await?;
            println!("Deleted preset '{}'", name);
        }
    }

    Ok(())
}
