use std::path::PathBuf;
use std::time::{Duration, Instant};

use selection_log::{Simulation, WeightTable};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, fmt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("selections.log"));

    let table = WeightTable::new([(1, 50.0), (2, 25.0), (3, 15.0), (4, 5.0), (5, 5.0)])?;
    let sim = Simulation::builder(table)
        .producers(5)
        .window_capacity(100)
        .run_duration(Duration::from_secs(5))
        .sample_interval(Duration::from_millis(1))
        .flush_every(256)
        .build()?;

    let ends = Instant::now() + sim.config().run_duration;
    let handle = sim.start(std::io::BufWriter::new(
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?,
    ))?;
    while Instant::now() < ends && !handle.is_finished() {
        let remaining = ends.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(Duration::from_secs(1)));
        let live = handle.frequencies();
        tracing::info!(
            pending = handle.pending(),
            window = live.window_len,
            entries = ?live.entries,
            "live frequencies"
        );
    }
    let report = handle.wait().into_result()?;

    for (label, share) in &report.frequencies.entries {
        println!("{label}: {share:.2}");
    }

    let audit = selection_log::audit_path(&path)?;
    if audit.is_monotonic() {
        println!(
            "{}: {} records, no gaps ({} unparseable lines)",
            path.display(),
            audit.records,
            audit.parse_issues.len()
        );
    } else {
        for gap in &audit.gaps {
            println!("line {}: {} > {}", gap.line, gap.previous, gap.current);
        }
    }
    Ok(())
}
