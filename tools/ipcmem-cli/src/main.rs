use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ipcmem::{Config, IpcMemory, MappingConfig, NodeRegistry, RegionLocator, Transfer};
use ipcmem_locator::blob::memory_window_blob;
use ipcmem_locator::{FixedRegion, DEFAULT_COMPATIBLE};
use ipcmem_window::SliceSource;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const DUMP_WIDTH: usize = 16;

#[derive(Debug, Parser)]
#[command(name = "ipcmem")]
#[command(about = "Inspect and exercise a shared memory window described by a devicetree")]
struct Cli {
    #[command(flatten)]
    region: RegionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct RegionArgs {
    /// TOML config file; the flags below override its settings.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Flattened devicetree blob describing the region.
    #[arg(long, global = true, value_name = "PATH", conflicts_with_all = ["base", "size"])]
    dtb: Option<PathBuf>,

    /// Compatible string of the devicetree node.
    #[arg(long, global = true)]
    compatible: Option<String>,

    /// Physical base address of a fixed region (instead of --dtb).
    #[arg(long, global = true, value_parser = parse_u64)]
    base: Option<u64>,

    /// Size of a fixed region in bytes.
    #[arg(long, global = true, value_parser = parse_u64)]
    size: Option<u64>,

    /// File or device node to map; the region's base is used as the file offset.
    #[arg(long, global = true, value_name = "PATH", conflicts_with = "anonymous")]
    device: Option<PathBuf>,

    /// Back the window with zeroed process memory instead of a device.
    #[arg(long, global = true)]
    anonymous: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the region and print it.
    Locate {
        #[arg(long)]
        json: bool,
    },
    /// Read bytes from the window.
    Read {
        #[arg(long, value_parser = parse_u64)]
        offset: u64,

        #[arg(long, value_parser = parse_u64)]
        len: u64,

        /// Write the raw bytes here instead of printing a hex dump.
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Write bytes into the window.
    Write {
        #[arg(long, value_parser = parse_u64)]
        offset: u64,

        /// Bytes as hex, e.g. "deadbeef" or "de ad be ef".
        #[arg(long, conflicts_with = "input", required_unless_present = "input")]
        hex: Option<String>,

        /// File whose contents are written.
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,
    },
    /// Issue a control request.
    Control {
        #[arg(long, value_parser = parse_u32)]
        command: u32,

        #[arg(long, value_parser = parse_u64, default_value = "0")]
        arg: u64,
    },
    /// Write a devicetree blob describing a single shared memory node at --base/--size.
    MakeDtb {
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct LocateReport<'a> {
    node: &'a str,
    base: u64,
    size: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Locate { json } => {
            let config = load_config(&cli.region)?;
            let region = config.locator()?.locate()?;
            if json {
                let report = LocateReport {
                    node: &region.node,
                    base: region.base,
                    size: region.size,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{region}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Read {
            offset,
            len,
            output,
        } => with_window(&cli.region, |mem| {
            let handle = mem.node().open();
            let mut data = Vec::new();
            let transfer = handle.read_at(offset, len, &mut data)?;
            handle.close();

            match output {
                Some(path) => fs::write(&path, &data)
                    .with_context(|| format!("write {}", path.display()))?,
                None => hex_dump(&mut io::stdout().lock(), offset, &data)?,
            }
            Ok(transfer)
        }),
        Command::Write { offset, hex, input } => {
            let data = match (hex, input) {
                (Some(text), _) => decode_hex(&text)?,
                (None, Some(path)) => {
                    fs::read(&path).with_context(|| format!("read {}", path.display()))?
                }
                (None, None) => bail!("one of --hex or --input is required"),
            };
            with_window(&cli.region, |mem| {
                let handle = mem.node().open();
                let transfer =
                    handle.write_at(offset, data.len() as u64, &mut SliceSource::new(&data))?;
                handle.close();
                println!("wrote {} bytes at 0x{offset:x}", transfer.bytes());
                Ok(transfer)
            })
        }
        Command::Control { command, arg } => with_window(&cli.region, |mem| {
            let handle = mem.node().open();
            let transfer = handle.control(command, arg)?;
            handle.close();
            println!("control 0x{command:x} (arg 0x{arg:x}): {} bytes", transfer.bytes());
            Ok(transfer)
        }),
        Command::MakeDtb { output } => {
            let (Some(base), Some(size)) = (cli.region.base, cli.region.size) else {
                bail!("make-dtb needs --base and --size");
            };
            FixedRegion { base, size }.locate()?;
            let compatible = cli.region.compatible.as_deref().unwrap_or(DEFAULT_COMPATIBLE);
            let blob = memory_window_blob(compatible, base, size)?;
            fs::write(&output, &blob).with_context(|| format!("write {}", output.display()))?;
            println!("wrote {} ({} bytes)", output.display(), blob.len());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Builds the effective config: the file (if any) with command-line overrides applied.
fn load_config(args: &RegionArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            Config::from_path(path).with_context(|| format!("load {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(dtb) = &args.dtb {
        config.region.dtb = Some(dtb.clone());
        config.region.base = None;
        config.region.size = None;
    }
    if args.base.is_some() || args.size.is_some() {
        config.region.dtb = None;
        config.region.base = args.base.or(config.region.base);
        config.region.size = args.size.or(config.region.size);
    }
    if let Some(compatible) = &args.compatible {
        config.region.compatible = compatible.clone();
    }
    if let Some(path) = &args.device {
        config.mapping = MappingConfig::Device {
            path: path.clone(),
            offset: None,
        };
    }
    if args.anonymous {
        config.mapping = MappingConfig::Anonymous;
    }

    config.validate()?;
    Ok(config)
}

/// Probes the window, runs `op` against it and removes it again.
fn with_window(
    args: &RegionArgs,
    op: impl FnOnce(&IpcMemory) -> Result<Transfer>,
) -> Result<ExitCode> {
    let config = load_config(args)?;
    let registry = NodeRegistry::new();
    let mem = ipcmem::probe(&config, &registry)?;
    let region = mem.region();
    tracing::debug!(
        "window {} ready: 0x{:x}..0x{:x}",
        region.node,
        region.base,
        region.base + region.size
    );

    let result = op(&mem);
    mem.remove(&registry)?;

    let transfer = result?;
    if transfer.is_partial() {
        tracing::warn!(
            requested = transfer.requested,
            transferred = transfer.transferred,
            "partial transfer"
        );
        eprintln!(
            "warning: partial transfer: {} of {} bytes",
            transfer.transferred, transfer.requested
        );
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn hex_dump(out: &mut impl Write, offset: u64, data: &[u8]) -> io::Result<()> {
    for (i, line) in data.chunks(DUMP_WIDTH).enumerate() {
        let addr = offset + (i * DUMP_WIDTH) as u64;
        let bytes: Vec<String> = line.iter().map(|b| format!("{b:02x}")).collect();
        writeln!(out, "{addr:08x}: {}", bytes.join(" "))?;
    }
    Ok(())
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    hex::decode(digits).with_context(|| format!("invalid hex bytes {text:?}"))
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("{s:?} is not a number: {err}"))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let v = parse_u64(s)?;
    u32::try_from(v).map_err(|_| format!("{v:#x} does not fit in 32 bits"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_u64("0x4000_0000"), Ok(0x4000_0000));
        assert_eq!(parse_u64("0X10"), Ok(16));
        assert_eq!(parse_u64("4096"), Ok(4096));
        assert!(parse_u64("0xzz").is_err());
        assert!(parse_u32("0x1_0000_0000").is_err());
    }

    #[test]
    fn hex_dump_lines_carry_addresses() {
        let mut out = Vec::new();
        let data: Vec<u8> = (0..20).collect();
        hex_dump(&mut out, 0x10, &data).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "00000010: 00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f"
        );
        assert_eq!(lines[1], "00000020: 10 11 12 13");
    }

    #[test]
    fn hex_input_ignores_spacing() {
        assert_eq!(decode_hex("de ad\tbe ef").unwrap(), [0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(decode_hex("0x0102").unwrap(), [1, 2]);
        assert!(decode_hex("abc").is_err());
    }
}
