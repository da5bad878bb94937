use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use testbeam_cuts::analysis::Analysis;
use testbeam_cuts::config::AnalysisConfig;
use testbeam_cuts::cuts::{CutRegistry, Selection};
use testbeam_cuts::space::PlaneId;

/// Apply the track and device cuts to a test-beam run and report what passes.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Run store: a directory of parquet/csv tables or a .json file
    path: PathBuf,

    /// Run number, used to key the cut cache
    #[arg(short, long, default_value_t = 0)]
    run: u32,

    /// Plane of the device under test
    #[arg(short, long)]
    dut: PlaneId,

    /// Analysis configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recompute every cut instead of reusing cached masks
    #[arg(long)]
    redo: bool,

    /// Use the surface fiducial region
    #[arg(long)]
    surface: bool,

    #[arg(long)]
    no_cache: bool,

    /// Print the groups and fields of the store
    #[arg(long)]
    structure: bool,
}

fn print_report(title: &str, registry: &CutRegistry) -> anyhow::Result<()> {
    println!("{title} ({} space)", registry.native());
    for row in registry.report() {
        println!("  {row}");
    }
    let combined = registry.combined()?;
    println!("  all cuts: {}/{}", combined.count(), combined.len());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if args.no_cache {
        config.cache.enabled = false;
    }

    let mut analysis = Analysis::open(&args.path, args.run, args.dut, config, args.redo)?;
    if args.structure {
        println!("{}", analysis.run().structure());
    }
    if args.surface {
        analysis.cuts_mut().activate_surface(true)?;
    }

    print_report("track cuts", &analysis.tracks())?;
    print_report(&format!("plane {} cuts", args.dut), analysis.cuts())?;

    match analysis.ph(&Selection::Active)? {
        Some(ph) => println!("pulse height: {ph}"),
        None => println!("no clusters pass the cuts"),
    }
    Ok(())
}
