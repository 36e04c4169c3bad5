//! Timed progress messages around analysis stages.
//!
//! Verbose sessions report at `info`, quiet ones at `debug`, so the
//! subscriber filter decides what reaches the terminal.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::Result;

macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

/// Human-readable elapsed time.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 1.0 {
        format!("{} milliseconds", elapsed.as_millis())
    } else if secs < 60.0 {
        format!("{:.2} seconds", secs)
    } else {
        let mins = (secs / 60.0).floor();
        format!("{} minutes and {:.2} seconds", mins as u64, secs - 60.0 * mins)
    }
}

/// Run `f` between "session starts" and "session ends" banners.
pub fn session_block<T>(name: &str, verbose: bool, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    progress!(verbose, " {} session starts ", name);
    let out = f();
    let elapsed = start.elapsed().as_secs_f64();
    match &out {
        Ok(_) => progress!(verbose, " {} session ends in {:.2} seconds ", name, elapsed),
        Err(e) => progress!(verbose, " {} session fails in {:.2} seconds: {} ", name, elapsed, e),
    }
    out
}

/// Run `f` and report `desc` followed by "done" or "failed" with the elapsed time.
pub fn session_line<T>(desc: &str, verbose: bool, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let out = f();
    let elapsed = format_elapsed(start.elapsed());
    match &out {
        Ok(_) => progress!(verbose, "{}done ({}).", desc, elapsed),
        Err(_) => progress!(verbose, "{}failed ({}).", desc, elapsed),
    }
    out
}
