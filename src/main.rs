use clap::{Parser, Subcommand};
use ghg_cluster_map::clustering::ClusterIndex;
use ghg_cluster_map::config::AppConfig;
use ghg_cluster_map::overlay::EjOverlay;
use ghg_cluster_map::{data, render, server};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the per-category point tiles
    Tiles {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Render the configured views as SVG snapshots with cluster donut markers
    Snapshot {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Serve clusters, donut icons and tiles
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

fn load_overlay(config: &AppConfig) -> anyhow::Result<Option<EjOverlay>> {
    config.input.ej_areas.as_deref().map(EjOverlay::load).transpose()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Tiles { config } => {
            info!("Generating tiles with config: {:?}", config);
            let app_config = AppConfig::load_from_file(config)?;
            let buildings = data::load_buildings(&app_config.input)?;
            render::generate_tiles(&app_config, &buildings)?;
            info!("Tile generation complete");
        }
        Commands::Snapshot { config } => {
            info!("Rendering snapshots with config: {:?}", config);
            let app_config = AppConfig::load_from_file(config)?;
            let buildings = data::load_buildings(&app_config.input)?;
            let overlay = load_overlay(&app_config)?;
            let index = ClusterIndex::build(&app_config.clustering, &buildings);
            let written = render::render_snapshots(&app_config, &index, &buildings, overlay.as_ref())?;
            info!("Wrote {} snapshots to {:?}", written.len(), app_config.output.snapshot_dir);
        }
        Commands::Serve { config } => {
            info!("Serving map with config: {:?}", config);
            let app_config = AppConfig::load_from_file(config)?;
            let buildings = data::load_buildings(&app_config.input)?;
            let overlay = load_overlay(&app_config)?;
            server::start_server(app_config, buildings, overlay).await?;
        }
    }

    Ok(())
}
