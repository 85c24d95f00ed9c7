//! Interactive console over USB
//!
//! Reads commands from stdin and prints each response.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use usbcon::{DeviceFilter, Prompt, Session, SessionConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let filter: DeviceFilter = std::env::var("USBCON_FILTER")
        .unwrap_or_else(|_| "14be".to_string())
        .parse()
        .context("invalid USBCON_FILTER")?;

    let prompt: Prompt = std::env::var("USBCON_PROMPT")
        .unwrap_or_else(|_| ">".to_string())
        .parse()
        .context("invalid USBCON_PROMPT")?;

    let config = SessionConfig::default()
        .with_prompt(prompt)
        .with_read_timeout(Duration::from_millis(500));

    let mut session = Session::with_filter(&filter)?.with_config(config)?;
    session.open()?;

    eprintln!("Connected to {} (Ctrl-D to quit)", session.device());

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;

        if !session.test_session() {
            eprintln!("Session lost, reopening...");
            session.open()?;
        }

        match session.invoke(&line) {
            Ok(response) => {
                stdout.write_all(response.as_bytes())?;
                stdout.flush()?;
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    session.exit();
    Ok(())
}
