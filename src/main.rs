#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::convert::TryFrom;
use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use uc3_dfu::usb::UsbTransport;
use uc3_dfu::{parse_u32, Cancellable, DeviceCommandSet, Element, Options, Programmer, TransferFlags};

fn parse_u16(s: &str) -> Result<u16, String> {
    let v = parse_u32(s).map_err(|e| e.to_string())?;
    u16::try_from(v).map_err(|e| e.to_string())
}

fn parse_usize(s: &str) -> Result<usize, std::num::ParseIntError> {
    parse_u32(s).map(|v| v as usize)
}

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// USB vendor ID
    #[structopt(long, default_value = "0x03eb", parse(try_from_str = parse_u16))]
    vid: u16,

    /// USB product ID
    #[structopt(long, default_value = "0x2ff6", parse(try_from_str = parse_u16))]
    pid: u16,

    /// DFU interface number
    #[structopt(long, default_value = "0")]
    interface: u8,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Command {
    /// Erase all device memory
    Erase,

    /// Leave the bootloader and start the application
    Attach {
        /// Jump to the application without resetting the device
        #[structopt(long)]
        no_reset: bool,
    },

    /// Read device memory
    Read {
        /// Start address
        #[structopt(long, parse(try_from_str = parse_u32))]
        address: u32,

        /// Number of bytes to read
        #[structopt(long, parse(try_from_str = parse_usize))]
        size: usize,

        /// Upper limit on the number of bytes read, defaults to size
        #[structopt(long, parse(try_from_str = parse_usize))]
        maximum: Option<usize>,

        /// File to write, prints a hex dump when omitted
        #[structopt(long)]
        output: Option<PathBuf>,
    },

    /// Write a binary image to device memory
    Write {
        /// Start address
        #[structopt(long, parse(try_from_str = parse_u32))]
        address: u32,

        /// Binary image to write
        #[structopt(long)]
        input: PathBuf,

        #[structopt(flatten)]
        flags: TransferFlags,
    },
}

fn progress_bar(p: &mut Programmer<UsbTransport>, total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            .progress_chars("##-"),
    );

    let b = bar.clone();
    p.set_progress(move |done, _total| b.set_position(done as u64));

    bar
}

fn run(o: Args) -> Result<()> {
    info!("Connecting to device {:04x}:{:04x}", o.vid, o.pid);

    let mut p = Programmer::usb(o.vid, o.pid, o.interface, o.options.clone())
        .context("Error connecting to device")?;

    info!("Device connected!");

    let cancel = Cancellable::new();

    match o.command {
        Command::Erase => {
            p.mass_erase(&cancel)?;
            info!("Erase complete");
        }
        Command::Attach { no_reset } => {
            p.attach(!no_reset, &cancel)?;
            info!("Application started");
        }
        Command::Read {
            address,
            size,
            maximum,
            output,
        } => {
            let bar = progress_bar(&mut p, size);
            let e = p.upload_element(address, size, maximum.unwrap_or(size), &cancel)?;
            bar.finish();

            info!("Read {}", bytefmt::format(e.data.len() as u64));

            match output {
                Some(path) => std::fs::write(&path, &e.data)
                    .with_context(|| format!("Error writing {}", path.display()))?,
                None => {
                    for (i, line) in e.data.chunks(16).enumerate() {
                        println!("{:08x}: {}", address as usize + i * 16, hex::encode(line));
                    }
                }
            }
        }
        Command::Write {
            address,
            input,
            flags,
        } => {
            let data = std::fs::read(&input).with_context(|| format!("Error reading {}", input.display()))?;
            let e = Element::new(address, data);

            info!("Writing {} from {}", bytefmt::format(e.data.len() as u64), input.display());

            let bar = progress_bar(&mut p, e.data.len());
            p.download_element(&e, flags, &cancel)?;
            bar.finish();

            info!("Write complete");
        }
    }

    Ok(())
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = run(o) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
