use std::error::Error;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use geist_map::{Config, MapRenderer, generate_world};
use geist_runtime::LogProgress;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

#[derive(Parser)]
#[command(
    name = "geist-map",
    version,
    about = "Render voxel worlds into incrementally updated web map tiles"
)]
struct Cli {
    /// off, error, warn, info, debug or trace
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,
    /// Also append the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render every map in a configuration file
    Render {
        /// TOML configuration file
        #[arg(long, short)]
        config: PathBuf,
        /// Ignore tile records from previous runs and render every visible tile
        #[arg(long)]
        no_cache: bool,
        /// Render at most this many changed base tiles per layer (0 = all)
        #[arg(long)]
        max_tiles: Option<usize>,
        /// Image writer threads (0 writes on the render thread)
        #[arg(long)]
        threads: Option<usize>,
        /// Output directory, overriding the configuration
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Write a synthetic noise world as region files
    Generate {
        /// Directory receiving the region files
        #[arg(long, short)]
        output: PathBuf,
        #[arg(long, default_value_t = 1337, allow_hyphen_values = true)]
        seed: i32,
        /// Half extent of the world in chunks
        #[arg(long, default_value_t = 64)]
        radius: i32,
    },
}

fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Off)
        .build();
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = File::options().create(true).append(true).open(path)?;
        loggers.push(WriteLogger::new(level, config, file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

fn render(
    config_path: &Path,
    no_cache: bool,
    max_tiles: Option<usize>,
    threads: Option<usize>,
    output: Option<PathBuf>,
) -> Result<bool, Box<dyn Error>> {
    let mut config = Config::load(config_path)?;
    if no_cache {
        config.use_cache = false;
    }
    if let Some(max) = max_tiles {
        config.max_tiles = max;
    }
    if let Some(threads) = threads {
        config.writer_threads = threads;
    }
    if let Some(output) = output {
        config.output_dir = output;
    }
    log::info!(
        "rendering {} map(s) into {} (cache {})",
        config.maps.len(),
        config.output_dir.display(),
        if config.use_cache { "on" } else { "off" }
    );

    let mut renderer = MapRenderer::new(config)?;
    let summary = renderer.run(&mut LogProgress::new())?;
    Ok(summary.maps_failed == 0)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_level, cli.log_file.as_deref()) {
        eprintln!("failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Render {
            config,
            no_cache,
            max_tiles,
            threads,
            output,
        } => render(&config, no_cache, max_tiles, threads, output).map(|ok| {
            if !ok {
                log::warn!("some maps failed; see the log above");
            }
        }),
        Command::Generate {
            output,
            seed,
            radius,
        } => generate_world(&output, seed, radius)
            .map(|(regions, chunks)| log::info!("wrote {chunks} chunks in {regions} regions"))
            .map_err(Into::into),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
