//! catflash CLI - Command-line tool for flashing Caterina bootloader boards.
//!
//! ## Features
//!
//! - Write raw binary images to flash (with optional EEPROM image)
//! - Read firmware back from flash
//! - Verify a local image against the device
//! - Serial port auto-detection for known Caterina board vendors

use anyhow::{Context, Result, bail};
use catflash::{CaterinaFlasher, DEFAULT_BAUD, KnownVendor, PortInfo, list_ports};
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// catflash - flash, read and verify Caterina bootloader boards.
///
/// Environment variables:
///   CATFLASH_PORT   - Default serial port
///   CATFLASH_BAUD   - Default baud rate (default: 57600)
#[derive(Parser)]
#[command(name = "catflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "CATFLASH_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, default_value_t = DEFAULT_BAUD, env = "CATFLASH_BAUD")]
    baud: u32,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a raw binary image to flash (erase + write + verify).
    Write {
        /// Flash image file (raw binary, not Intel HEX).
        firmware: PathBuf,

        /// Optional EEPROM image file to write after the flash image.
        #[arg(long)]
        eeprom: Option<PathBuf>,
    },

    /// Read firmware back from flash into a file.
    Read {
        /// Output file for the read-back image.
        output: PathBuf,

        /// Number of bytes to read (0 = full flash).
        #[arg(long, default_value_t = 0)]
        size: usize,
    },

    /// Verify a local image against the device flash.
    Verify {
        /// Flash image file to compare.
        firmware: PathBuf,
    },

    /// List available serial ports.
    ListPorts,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(None)
        .init();

    debug!("catflash v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Write { firmware, eeprom } => cmd_write(&cli, firmware, eeprom.as_deref()),
        Commands::Read { output, size } => cmd_read(&cli, output, *size),
        Commands::Verify { firmware } => cmd_verify(&cli, firmware),
        Commands::ListPorts => cmd_list_ports(),
    }
}

/// Progress rendering shared by all device operations.
///
/// Single-character markers arrive once per transferred block and advance
/// the spinner; longer strings are status lines.
struct Progress {
    bar: ProgressBar,
}

impl Progress {
    fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            #[allow(clippy::unwrap_used)] // Static template string
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} ({pos} blocks)")
                    .unwrap(),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { bar }
    }

    fn sink(&self) -> impl FnMut(&str) {
        let bar = self.bar.clone();
        move |msg: &str| {
            if msg.len() == 1 {
                bar.inc(1);
            } else {
                bar.println(msg.to_string());
                bar.set_message(msg.to_string());
            }
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Pick the serial port: explicit flag first, then vendor-based detection.
fn resolve_port(cli: &Cli) -> Result<String> {
    if let Some(ref port) = cli.port {
        return Ok(port.clone());
    }

    let ports = list_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        bail!("No serial ports found. Connect the board and reset it.");
    }

    let known: Vec<&PortInfo> = ports
        .iter()
        .filter(|p| p.vendor().is_known())
        .collect();

    match known.as_slice() {
        [single] => {
            debug!("Auto-detected {} ({:?})", single.name, single.vendor());
            Ok(single.name.clone())
        },
        [] if ports.len() == 1 => Ok(ports[0].name.clone()),
        [] => bail!(
            "No known Caterina board found among {} ports; pass --port explicitly \
             (see `catflash list-ports`)",
            ports.len()
        ),
        _ => bail!(
            "Multiple candidate boards found; pass --port explicitly \
             (see `catflash list-ports`)"
        ),
    }
}

fn connect(cli: &Cli) -> Result<CaterinaFlasher<catflash::NativePort>> {
    let port = resolve_port(cli)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).bold(),
            cli.baud
        );
        eprintln!(
            "{} Reset the board now; Caterina listens for a few seconds after reset.",
            style("⏳").yellow()
        );
    }
    CaterinaFlasher::open(&port, cli.baud)
        .with_context(|| format!("Failed to open serial port {port}"))
}

fn load_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read image file {}", path.display()))
}

fn cmd_write(cli: &Cli, firmware: &Path, eeprom: Option<&Path>) -> Result<()> {
    let flash = load_image(firmware)?;
    let eeprom = eeprom.map(load_image).transpose()?;
    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("📦").cyan(),
            firmware.display(),
            flash.len()
        );
    }

    let flasher = connect(cli)?;
    let progress = Progress::new(cli.quiet);
    let result = flasher.write_firmware(&flash, eeprom.as_deref(), &mut progress.sink());
    progress.finish();
    result?;

    if !cli.quiet {
        eprintln!("{} Flash complete", style("✓").green());
    }
    Ok(())
}

fn cmd_read(cli: &Cli, output: &Path, size: usize) -> Result<()> {
    let flasher = connect(cli)?;
    let progress = Progress::new(cli.quiet);
    let result = flasher.read_firmware(size, &mut progress.sink());
    progress.finish();
    let image = result?;

    fs::write(output, &image)
        .with_context(|| format!("Failed to write output file {}", output.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Read {} bytes into {}",
            style("✓").green(),
            image.len(),
            output.display()
        );
    }
    Ok(())
}

fn cmd_verify(cli: &Cli, firmware: &Path) -> Result<()> {
    let flash = load_image(firmware)?;

    let flasher = connect(cli)?;
    let progress = Progress::new(cli.quiet);
    let result = flasher.verify_firmware(&flash, &mut progress.sink());
    progress.finish();
    result?;

    if !cli.quiet {
        eprintln!("{} Verify OK ({} bytes)", style("✓").green(), flash.len());
    }
    Ok(())
}

fn cmd_list_ports() -> Result<()> {
    let ports = list_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        eprintln!("No serial ports found");
        return Ok(());
    }

    for port in ports {
        let ids = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!("{vid:04x}:{pid:04x}"),
            _ => "-".to_string(),
        };
        let product = port.product.as_deref().unwrap_or("");
        let marker = if port.vendor() != KnownVendor::Unknown {
            format!(" {}", style("(likely Caterina board)").green())
        } else {
            String::new()
        };
        println!("{:<20} {ids:<10} {product}{marker}", port.name);
    }
    Ok(())
}
