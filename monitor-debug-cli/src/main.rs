mod board;
mod config;
mod logging;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use monitor_debug::monitor::mode;
use monitor_debug::shell::ShellContext;
use monitor_debug::{CharSource, ConsoleBuffer};

use crate::board::Board;
use crate::logging::LevelFilter;

/// How long the receiver waits after end of input before giving up on a held breakpoint.
const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Poll interval of the foreground loop, the simulated idle time between received characters.
const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(clap::Parser)]
#[clap(
    name = "monitor-debug",
    about = "Debug console of a simulated Cortex-M with monitor mode debugging",
    version
)]
struct Cli {
    /// Configuration file
    ///
    /// Without this, `monitor-debug.toml` in the working directory is used if it exists.
    #[clap(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file and RUST_LOG
    #[clap(long, value_enum, help_heading = "LOG CONFIGURATION")]
    log_level: Option<LevelFilter>,

    /// Leave monitor mode disabled at boot, regardless of the configuration
    #[clap(long)]
    no_monitor: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::setup_logging(cli.log_level.or(config.log_level))?;

    let console = Arc::new(ConsoleBuffer::new());
    let mut board = Board::new(&config, console.clone());

    tracing::info!("==Booted==");

    if config.monitor_on_boot && !cli.no_monitor {
        if let Err(error) = mode::enable(board.machine_mut().bus_mut()) {
            tracing::warn!("{}", error);
        }
    }

    let input_closed = spawn_receiver(console.clone());

    let mut shell = board::shell();
    let mut stdout = std::io::stdout().lock();
    shell.prompt(&mut stdout)?;

    loop {
        match console.receive_next_char() {
            Some(c) => shell.receive_char(
                c,
                &mut ShellContext {
                    target: &mut board,
                    out: &mut stdout,
                },
            )?,
            None if input_closed.load(Ordering::Acquire) => break,
            None => std::thread::sleep(IDLE_POLL),
        }
    }

    writeln!(stdout)?;
    Ok(())
}

/// Feed stdin into the console buffer from a separate thread, the way the UART
/// receive interrupt fills it on the device.
///
/// The returned flag is set once stdin is exhausted and every byte was pushed.
fn spawn_receiver(console: Arc<ConsoleBuffer>) -> Arc<AtomicBool> {
    let closed = Arc::new(AtomicBool::new(false));

    let flag = closed.clone();
    std::thread::spawn(move || {
        for byte in std::io::stdin().lock().bytes() {
            let byte = match byte {
                Ok(byte) => byte,
                Err(error) => {
                    tracing::warn!("Failed to read input: {}", error);
                    break;
                }
            };

            // Input is not paced like a UART, wait for room instead of dropping.
            while !console.push_from_isr(byte) {
                std::thread::sleep(IDLE_POLL);
            }
        }

        flag.store(true, Ordering::Release);

        // The foreground loop ends the process once the buffer is drained. It can
        // only still be running here if a breakpoint waits for input that never comes.
        std::thread::sleep(EXIT_GRACE_PERIOD);
        while !console.is_empty() {
            std::thread::sleep(EXIT_GRACE_PERIOD);
        }
        std::thread::sleep(EXIT_GRACE_PERIOD);

        tracing::warn!("Input closed while a breakpoint is held, exiting");
        std::process::exit(1);
    });

    closed
}
