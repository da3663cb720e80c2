use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use vesla_rollup::render::{self, RenderFormat};
use vesla_rollup::{Result, ToolError};

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging().and_then(|()| run(cli)) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ToolError::Logging(err.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Render(args) => {
            require_input(&args.input)?;
            render::render_manifest(&args.input, &args.output, args.format.into())?;
            Ok(())
        }
        Command::Check(args) => {
            require_input(&args.input)?;
            let model = render::check_manifest(&args.input)?;
            println!(
                "ok: {} sheets, {} cells, {} formulas",
                model.sheets.len(),
                model.cell_count(),
                model.formula_count()
            );
            Ok(())
        }
    }
}

fn require_input(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ToolError::MissingInput(path.to_path_buf()))
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Assemble formula-linked spreadsheet models from JSON manifests."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a manifest and write the workbook.
    Render(RenderArgs),
    /// Assemble a manifest and report structural errors without writing.
    Check(CheckArgs),
}

#[derive(clap::Args)]
struct RenderArgs {
    /// Manifest file path.
    #[arg(long)]
    input: PathBuf,

    /// Output file path.
    #[arg(long)]
    output: PathBuf,

    /// Output representation.
    #[arg(long, value_enum, default_value_t = OutputFormat::Xlsx)]
    format: OutputFormat,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Manifest file path.
    #[arg(long)]
    input: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Xlsx,
    Json,
}

impl From<OutputFormat> for RenderFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Xlsx => RenderFormat::Xlsx,
            OutputFormat::Json => RenderFormat::Json,
        }
    }
}
