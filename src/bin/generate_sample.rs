use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;

use testbeam_cuts::run::{clusters_group, plane_tracks_group, EVENT_GROUP, TRACK_GROUP};

/// Write a synthetic test-beam run as a directory of Parquet tables.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Output directory
    #[arg(short, long, default_value = "sample_run")]
    output: PathBuf,

    #[arg(long, default_value_t = 10_000)]
    events: usize,

    /// Planes that record clusters
    #[arg(long, value_delimiter = ',', default_value = "2,6")]
    planes: Vec<u16>,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

// Sensor geometry: 52 columns x 80 rows of 150 x 100 um pixels.
const COLUMNS: f64 = 52.0;
const ROWS: f64 = 80.0;
const PITCH_U: f64 = 0.15;
const PITCH_V: f64 = 0.10;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn below(&mut self, n: u64) -> i64 {
        (self.next_u64() % n) as i64
    }
}

#[derive(Default)]
struct PlaneTables {
    // one entry per track
    track_x: Vec<f64>,
    track_y: Vec<f64>,
    track_u: Vec<f64>,
    track_v: Vec<f64>,
    // one entry per cluster
    x: Vec<f64>,
    y: Vec<f64>,
    u: Vec<f64>,
    v: Vec<f64>,
    charge: Vec<f64>,
    size: Vec<i64>,
    track: Vec<i64>,
}

fn floats(values: Vec<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

fn ints(values: Vec<i64>) -> ArrayRef {
    Arc::new(Int64Array::from(values))
}

fn write_table(
    root: &Path,
    group: &str,
    name: &str,
    columns: Vec<(&str, ArrayRef)>,
) -> Result<()> {
    let dir = root.join(group);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|(field, array)| Field::new(*field, array.data_type().clone(), false))
            .collect::<Vec<_>>(),
    ));
    let batch = RecordBatch::try_new(
        schema.clone(),
        columns.into_iter().map(|(_, array)| array).collect(),
    )?;

    let path = dir.join(format!("{name}.parquet"));
    let file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let mut args = Args::parse();
    args.planes.sort_unstable();
    args.planes.dedup();
    let mut rng = SimpleRng::new(args.seed);

    let mut time = Vec::with_capacity(args.events);
    let mut trigger_phase = Vec::with_capacity(args.events);
    let mut n_tracks = Vec::with_capacity(args.events);
    let mut size = Vec::new();
    let mut chi2 = Vec::new();
    let mut planes: Vec<PlaneTables> = args.planes.iter().map(|_| PlaneTables::default()).collect();

    for event in 0..args.events {
        // ~1 kHz trigger rate
        time.push(event as f64 * 1e-3 + rng.next_f64() * 1e-4);
        trigger_phase.push(rng.below(10));

        let tracks: i64 = match rng.next_f64() {
            r if r < 0.1 => 0,
            r if r < 0.9 => 1,
            _ => 2,
        };
        n_tracks.push(tracks);

        for _ in 0..tracks {
            let track = size.len() as i64;
            size.push(6);
            chi2.push((0..4).map(|_| rng.gauss(0.0, 1.0).powi(2)).sum::<f64>());

            let col = rng.next_f64() * COLUMNS;
            let row = rng.next_f64() * ROWS;
            for plane in &mut planes {
                let (col, row) = (col + rng.gauss(0.0, 0.2), row + rng.gauss(0.0, 0.2));
                plane.track_x.push(col);
                plane.track_y.push(row);
                plane.track_u.push((col - COLUMNS / 2.0) * PITCH_U);
                plane.track_v.push((row - ROWS / 2.0) * PITCH_V);

                // 95% efficiency
                if rng.next_f64() > 0.95 {
                    continue;
                }
                let u = (col - COLUMNS / 2.0) * PITCH_U + rng.gauss(0.0, 0.02);
                let v = (row - ROWS / 2.0) * PITCH_V + rng.gauss(0.0, 0.02);
                plane.u.push(u);
                plane.v.push(v);
                plane.x.push(u / PITCH_U + COLUMNS / 2.0);
                plane.y.push(v / PITCH_V + ROWS / 2.0);
                // Landau-like: gaussian core with an exponential tail
                let tail = -40.0 * rng.next_f64().max(1e-15).ln();
                plane.charge.push(rng.gauss(180.0, 20.0).max(0.0) + tail);
                plane.size.push(1 + rng.below(3));
                plane.track.push(track);
            }
        }
    }

    let root = &args.output;
    let n_total = size.len();
    write_table(root, EVENT_GROUP, "events", vec![
        ("Time", floats(time)),
        ("TriggerPhase", ints(trigger_phase)),
    ])?;
    write_table(root, TRACK_GROUP, "counts", vec![("NTracks", ints(n_tracks))])?;
    write_table(root, TRACK_GROUP, "tracks", vec![
        ("Size", ints(size)),
        ("Chi2", floats(chi2)),
    ])?;
    for (&id, plane) in args.planes.iter().zip(planes) {
        let n_clusters = plane.track.len();
        write_table(root, &plane_tracks_group(id), "tracks", vec![
            ("X", floats(plane.track_x)),
            ("Y", floats(plane.track_y)),
            ("U", floats(plane.track_u)),
            ("V", floats(plane.track_v)),
        ])?;
        write_table(root, &clusters_group(id), "clusters", vec![
            ("X", floats(plane.x)),
            ("Y", floats(plane.y)),
            ("U", floats(plane.u)),
            ("V", floats(plane.v)),
            ("Charge", floats(plane.charge)),
            ("Size", ints(plane.size)),
            ("Track", ints(plane.track)),
        ])?;
        println!("plane {id}: {n_clusters} clusters");
    }

    println!(
        "Wrote {} events with {n_total} tracks to {}",
        args.events,
        root.display()
    );
    Ok(())
}
