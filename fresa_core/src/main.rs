//! Fresa firmware running against the virtual MCU.
//!
//! Bridges stdin/stdout to the serial byte path and drives the
//! supervisor loop. Useful with any Grbl-speaking sender pointed at the
//! process, or interactively:
//!
//! ```text
//! $ fresa --config machine.toml
//! Fresa 0.1.0 ['$' for help]
//! G1X10F600
//! ok
//! ```

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use fresa_common::settings::Settings;
use fresa_core::cnc::Cnc;
use fresa_hal::VirtualMcu;

#[derive(Parser)]
#[command(name = "fresa", about = "Fresa CNC motion core on a virtual MCU")]
struct Args {
    /// Machine settings TOML; seeds the virtual EEPROM.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose diagnostics (same as RUST_LOG=debug).
    #[arg(long, short)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(if args.verbose { "debug" } else { "warn" })
        });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut mcu = VirtualMcu::new();

    // A config file seeds the EEPROM record the core boots from.
    if let Some(path) = &args.config {
        match Settings::load_toml(path) {
            Ok(settings) => {
                settings.save(&mut mcu);
                info!(path = %path.display(), "settings seeded from config");
            }
            Err(e) => {
                error!(error = %e, "config rejected, using defaults");
            }
        }
    }

    let mut cnc = Cnc::new(mcu, Settings::default());

    // Stdin bytes flow to the RX interrupt from a reader thread.
    let (tx, rx) = mpsc::channel::<u8>();
    std::thread::spawn(move || {
        let mut buffer = [0u8; 64];
        let mut stdin = std::io::stdin().lock();
        while let Ok(n) = stdin.read(&mut buffer) {
            if n == 0 {
                break;
            }
            for byte in &buffer[..n] {
                if tx.send(*byte).is_err() {
                    return;
                }
            }
        }
    });

    loop {
        cnc.run(|cnc| {
            while let Ok(byte) = rx.try_recv() {
                cnc.rx_isr(byte);
            }
            let out = cnc.mcu_mut().take_uart_output();
            if !out.is_empty() {
                print!("{out}");
                std::io::stdout().flush().ok();
            }
            // Pace the simulation; the step timer advances one period
            // per event-pump cycle.
            std::thread::sleep(Duration::from_micros(20));
        });
        // An abort fell through: reset and keep serving.
    }
}
