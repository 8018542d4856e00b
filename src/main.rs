use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use sitepipe::{Config, Layout, Mode};
use tracing::level_filters::LevelFilter;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Subcommand, Debug, Clone, Copy)]
enum Pipeline {
    /// Build, then serve with live reload and rebuild on change.
    Dev,
    /// Build the output tree once.
    Build,
    /// Build, then package the output tree into `<root-name>.zip`.
    #[command(name = "deploy-zip", alias = "deployZip")]
    DeployZip,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    pipeline: Pipeline,

    /// Production mode: compress images, prefix stylesheets, minify scripts.
    #[arg(long, global = true)]
    build: bool,

    /// Project root containing `src/`.
    #[arg(long, global = true, default_value = ".")]
    root: Utf8PathBuf,

    /// Port of the development HTTP server.
    #[arg(long, global = true, default_value_t = Config::DEFAULT_PORT)]
    port: u16,

    /// Name or path of the esbuild executable.
    #[arg(long, global = true, default_value = "esbuild")]
    esbuild: String,

    /// More output, repeat for more.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mode = if args.build {
        Mode::Production
    } else {
        Mode::Development
    };

    let layout = Layout::new(&args.root)?;
    let config = Config::new(layout, mode)
        .with_port(args.port)
        .with_esbuild(args.esbuild);

    match args.pipeline {
        Pipeline::Dev => sitepipe::dev(&config)?,
        Pipeline::Build => {
            sitepipe::build(&config)?;
        }
        Pipeline::DeployZip => {
            let archive = sitepipe::deploy_zip(&config)?;
            tracing::info!("wrote {archive}");
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();
}
