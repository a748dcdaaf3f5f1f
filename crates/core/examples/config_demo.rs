//! Example demonstrating configuration, presets and control decoding
//!
//! Run with: cargo run --package gape-core --example config_demo

use gape_core::domain::config::{GapeConfig, PresetManager};
use gape_core::domain::dsp::EffectPipeline;
use gape_core::domain::{BuiltinPreset, ControlFrame};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("gape_core=debug,info")
        .init();

    println!("=== GAPE Configuration Demo ===\n");

    // 1. Built-in presets and their control encodings
    println!("1. Built-in presets:");
    for preset in BuiltinPreset::ALL {
        let frame = ControlFrame::encode(&preset.effect_config())?;
        println!(
            "   {:>2}. {:<22} pins {:#010b}  frame {}",
            preset.number(),
            preset.name(),
            preset.pins().0,
            frame
        );
    }

    // 2. Decode a serial frame into a configuration
    println!("\n2. Decoding frame 2,188,2,0...");
    let frame: ControlFrame = "2,188,2,0".parse()?;
    let config = GapeConfig::with_effect(frame.decode()?);
    println!("{}", config.to_toml_string()?);

    // 3. Presets on disk
    println!("3. Preset management:");
    let preset_dir = std::path::PathBuf::from("demo_presets");
    let preset_manager = PresetManager::new(preset_dir.clone());

    preset_manager.save_preset("coffee_shop", &config).await?;
    for name in preset_manager.list_presets().await? {
        println!("   - {}", name);
    }
    let loaded = preset_manager.load_preset("coffee_shop").await?;

    // 4. Build and run the pipeline for one block
    println!("\n4. Processing one block...");
    let mut pipeline = EffectPipeline::new(&loaded)?;
    let input = vec![0.8f32; pipeline.block_size()];
    let mut output = vec![0.0f32; pipeline.output_len()];
    pipeline.process(&input, &mut output)?;
    println!(
        "   {} processed {} samples, first output {:.4}",
        pipeline.effect_name(),
        input.len(),
        output[0]
    );

    println!("\n=== Demo Complete ===");

    std::fs::remove_dir_all(preset_dir)?;

    Ok(())
}
