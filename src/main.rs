// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use osmpack::osm::{Importer, Settings};

#[derive(Parser)]
#[command(about = "Imports OpenStreetMap XML into binary routing artifacts")]
struct Cli {
    /// The path to the OSM XML file, optionally gzip- or bzip2-compressed
    osm_file: PathBuf,

    /// Directory where the intermediate files and artifacts are written
    output_directory: PathBuf,

    /// Treat every way as bidirectional
    #[arg(long)]
    ignore_oneway: bool,

    /// Discard all maxspeed tags
    #[arg(long)]
    ignore_maxspeed: bool,

    /// Seconds added per traffic signal on a segment endpoint
    #[arg(long, default_value_t = 0.0)]
    traffic_light_penalty: f64,

    /// Do not slow untagged segments down inside settlements
    #[arg(long)]
    no_default_city_speed: bool,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = Settings::new(&cli.osm_file);
    settings.ignore_oneway = cli.ignore_oneway;
    settings.ignore_maxspeed = cli.ignore_maxspeed;
    settings.traffic_light_penalty = cli.traffic_light_penalty;
    settings.default_city_speed = !cli.no_default_city_speed;

    let mut importer = Importer::new(settings, &cli.output_directory);
    importer.preprocess()?;

    let statistics = importer.statistics();
    println!(
        "imported {} nodes, {} ways, {} edges, {} places",
        statistics.nodes, statistics.ways, statistics.edges, statistics.places,
    );

    Ok(())
}
