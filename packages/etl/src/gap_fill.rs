//! Repairs missing weather descriptors from neighboring days.
//!
//! A pass scans the days in order and reads only the snapshot taken before
//! the pass, so a repaired value never propagates further within the same
//! pass:
//!
//! - the first day copies the next day's value;
//! - the last day copies the previous day's value;
//! - an interior day takes the previous value if present, otherwise the
//!   next.
//!
//! An interior run of missing days shrinks from both ends each pass.

use crime_warehouse_etl_models::{DailyClimate, GapFillSummary};

use crate::config::{GapFillConfig, GapFillMode};

/// Runs one pass over `values`. Returns `true` if any value changed.
pub fn fill_pass(values: &mut [String], missing: &str) -> bool {
    let len = values.len();
    if len < 2 {
        return false;
    }

    let snapshot = values.to_vec();
    let mut changed = false;

    for (i, current) in snapshot.iter().enumerate() {
        if current != missing {
            continue;
        }

        let replacement = if i == 0 {
            &snapshot[1]
        } else if i == len - 1 {
            &snapshot[i - 1]
        } else if snapshot[i - 1] != missing {
            &snapshot[i - 1]
        } else {
            &snapshot[i + 1]
        };

        if replacement != missing {
            values[i].clone_from(replacement);
            changed = true;
        }
    }

    changed
}

/// Fills missing descriptors in `days` (which must be in date order).
#[must_use]
pub fn fill_gaps(
    days: &mut [DailyClimate],
    missing: &str,
    config: &GapFillConfig,
) -> GapFillSummary {
    let mut values: Vec<String> = days.iter().map(|d| d.weather.clone()).collect();
    let missing_before = values.iter().filter(|v| *v == missing).count();
    let mut passes = 0;

    match config.mode {
        GapFillMode::FixedPasses => {
            for _ in 0..config.passes {
                fill_pass(&mut values, missing);
                passes += 1;
            }
        }
        GapFillMode::FixedPoint => {
            while passes < config.max_passes {
                passes += 1;
                if !fill_pass(&mut values, missing) {
                    break;
                }
            }
        }
    }

    for (day, value) in days.iter_mut().zip(values) {
        day.weather = value;
    }

    let missing_after = days.iter().filter(|d| d.weather == missing).count();
    if missing_after > 0 {
        log::warn!("{missing_after} days still have no weather after {passes} gap-fill passes");
    }
    log::info!(
        "Gap filling repaired {} of {missing_before} days in {passes} passes",
        missing_before - missing_after
    );

    GapFillSummary {
        missing_before,
        passes,
        missing_after,
    }
}
