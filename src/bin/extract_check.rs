//! Prints what the time extractor reads from each stdin line

use reelsync::time_extract;
use std::io::{self, BufRead};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    for line in io::stdin().lock().lines() {
        let line = line?;
        match time_extract::extract(&line) {
            Ok(time) => println!("{:?} -> {} ({}s)", line, time, time.total_seconds()),
            Err(e) => println!("{:?} -> {} ({})", line, e.reason(), e),
        }
    }
    Ok(())
}
