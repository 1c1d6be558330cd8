use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use libscansync::config::Config;
use libscansync::constants::DEFAULT_STABLE_TOLERANCE;
use libscansync::sync::SyncEngine;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn run(config: &Config) -> Result<(), libscansync::error::SyncError> {
    let mut engine = SyncEngine::with_encoder_units_per_turn(config.encoder_units_per_turn);

    if let Ok(meta) = std::fs::metadata(&config.tiff_path) {
        log::info!(
            "Image file size: {}",
            human_bytes::human_bytes(meta.len() as f64)
        );
    }
    engine.open_tiff_reader(&config.tiff_path)?;
    engine.set_channel(config.channel);
    log::info!("Found {} channel(s)", engine.n_channels());

    if let Some(log_path) = &config.log_path {
        if !engine.open_position_log(log_path)? {
            log::warn!("Position log has no acquisition trigger; synchronization will fail");
        }
    }
    if let Some(rotary_path) = &config.rotary_path {
        if !engine.open_rotary_log(rotary_path)? {
            log::warn!("Rotary log has no acquisition trigger; synchronization will fail");
        }
    }

    log::info!("Synchronizing frames against log samples...");
    engine.interpolate_indices(0)?;

    let n_records = engine.transforms().map_or(0, |t| t.len());
    log::info!("Built {} per-frame records", n_records);
    if let Some(epoch) = engine.get_epoch_time() {
        log::info!("Acquisition epoch: {}", epoch);
    }
    if let Some(trigger) = engine.get_log_trigger_time() {
        log::info!("Position log trigger: {}", trigger);
    }
    if let Some(trigger) = engine.get_rotary_trigger_time() {
        log::info!("Rotary log trigger: {}", trigger);
    }
    if let Some(lut) = engine.channel_lut() {
        log::info!("Channel {} LUT: [{} {}]", engine.channel(), lut.0, lut.1);
    }

    let stable = engine.find_stable_frames(100, DEFAULT_STABLE_TOLERANCE);
    log::info!(
        "Found {} stable interval(s) of more than 100 frames",
        stable.len()
    );
    for (start, end) in &stable {
        log::info!("  stable frames {start}..{end}");
    }

    if let Some(n) = config.tail_frames {
        let out = engine.save_tiff_tail(n, config.tail_path.as_deref())?;
        log::info!("Frame tail written to {}", out.to_string_lossy());
    }
    Ok(())
}

fn main() {
    // Create a cli
    let matches = Command::new("scansync_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Image Path: {}", config.tiff_path.to_string_lossy());
    if let Some(p) = &config.log_path {
        log::info!("Position Log Path: {}", p.to_string_lossy());
    }
    if let Some(p) = &config.rotary_path {
        log::info!("Rotary Log Path: {}", p.to_string_lossy());
    }
    log::info!("Channel: {}", config.channel);
    log::info!("Encoder units per turn: {}", config.encoder_units_per_turn);

    let spinner = pb_manager.add(ProgressBar::new_spinner());
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("valid progress template"),
    );
    spinner.set_message("Synchronizing...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    match run(&config) {
        Ok(()) => {
            spinner.finish_with_message("Done");
            log::info!("Successfully synchronized data!");
        }
        Err(e) => {
            spinner.finish_with_message("Failed");
            log::error!("Synchronization failed with error: {e}");
        }
    }
}
