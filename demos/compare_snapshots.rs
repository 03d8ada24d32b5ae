//! `cargo run --example compare_snapshots -- baseline.json run.json [policy.json]`

use std::{env, fs, process::ExitCode};

use allocmap::harness::{AnomalyPolicy, MapSnapshot};
use log::error;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (baseline, run, policy) = match args.as_slice() {
        [baseline, run] => (baseline, run, None),
        [baseline, run, policy] => (baseline, run, Some(policy)),
        _ => {
            eprintln!("usage: compare_snapshots <baseline.json> <run.json> [policy.json]");
            return ExitCode::FAILURE;
        }
    };

    let policy = match policy.map(fs::read_to_string) {
        None => AnomalyPolicy::default(),
        Some(Ok(json)) => match serde_json::from_str(&json) {
            Ok(policy) => policy,
            Err(e) => {
                error!("bad policy: {e}");
                return ExitCode::FAILURE;
            }
        },
        Some(Err(e)) => {
            error!("could not read policy: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (baseline, run) = match (MapSnapshot::from_file(baseline), MapSnapshot::from_file(run)) {
        (Ok(baseline), Ok(run)) => (baseline, run),
        (Err(e), _) | (_, Err(e)) => {
            error!("could not load snapshot: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    let anomalies = run.anomalies(&baseline, &policy);
    for anomaly in &anomalies {
        println!(
            "slot {:#06x}: {} -> {} bytes",
            anomaly.index, anomaly.baseline, anomaly.observed
        );
    }
    if anomalies.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
