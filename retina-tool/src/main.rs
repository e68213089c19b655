use anyhow::{Context, Result};
use bbox::HW;
use retina_tool::{commands, config::Config};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
/// Generate anchors and targets, and post-process RetinaNet outputs.
struct Args {
    #[structopt(long, default_value = "retina.json5")]
    /// configuration file
    pub config_file: PathBuf,
    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, StructOpt)]
enum Command {
    /// Print the pyramid levels for an input shape.
    Info {
        #[structopt(long)]
        height: usize,
        #[structopt(long)]
        width: usize,
    },
    /// Dump the anchors for an input shape.
    Anchors {
        #[structopt(long)]
        height: usize,
        #[structopt(long)]
        width: usize,
        /// output JSON file, stdout if omitted
        #[structopt(long)]
        output_file: Option<PathBuf>,
    },
    /// Assign anchor targets for a dataset file.
    Targets {
        /// dataset file
        dataset_file: PathBuf,
        /// output JSON file, stdout if omitted
        #[structopt(long)]
        output_file: Option<PathBuf>,
    },
    /// Turn concatenated head outputs into detections.
    Detect {
        /// JSON file with classification and regression outputs
        input_file: PathBuf,
        /// output JSON file, stdout if omitted
        #[structopt(long)]
        output_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let mut logger = pretty_env_logger::formatted_builder();
    logger.filter_level(log::LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    let Args {
        config_file,
        command,
    } = Args::from_args();
    let config = Config::open(&config_file)
        .with_context(|| format!("failed to load config file '{}'", config_file.display()))?;

    match command {
        Command::Info { height, width } => {
            let image_size = HW::try_from_hw([height, width])?;
            commands::info(&config, &image_size)?;
        }
        Command::Anchors {
            height,
            width,
            output_file,
        } => {
            let image_size = HW::try_from_hw([height, width])?;
            commands::anchors(&config, &image_size, output_file.as_deref())?;
        }
        Command::Targets {
            dataset_file,
            output_file,
        } => {
            commands::targets(&config, &dataset_file, output_file.as_deref())?;
        }
        Command::Detect {
            input_file,
            output_file,
        } => {
            commands::detect(&config, &input_file, output_file.as_deref())?;
        }
    }

    Ok(())
}
