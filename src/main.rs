use anyhow::{Context as _, Result};
use clap::{CommandFactory, Parser};
use log::{debug, error, info, warn};
use midex_update::observer::LogObserver;
use midex_update::usb::{RusbBus, UsbMonitor};
use midex_update::watch::Watcher;
use midex_update::{capture, payload};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const PROGRAM_DESC: &str = "Steinberg MIDEX product id updater";

#[derive(Parser, Debug)]
#[command(name = "midex-update", version, about = PROGRAM_DESC)]
struct Opt {
    /// Firmware payload file (JSON) to flash onto legacy devices as they are plugged in
    #[arg(short, long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Generate a payload file from a capture (-i) into a new file (-o)
    #[arg(short, long)]
    generate: bool,

    /// Wireshark JSON export of the official updater's USB traffic
    #[arg(short, long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Payload file to write in generate mode
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Every message is also appended to this file
    #[arg(short, long, value_name = "PATH", default_value = "midex-update.log")]
    log: PathBuf,
}

enum Mode<'a> {
    Generate { input: &'a Path, output: &'a Path },
    Watch { file: &'a Path },
    /// Watch mode without the rights to flash anything.
    Unprivileged,
}

impl Mode<'_> {
    /// Where messages are appended besides stderr. A run that can't do anything leaves no file
    /// behind.
    fn log_file<'p>(&self, path: &'p Path) -> Option<&'p Path> {
        match self {
            Mode::Unprivileged => None,
            _ => Some(path),
        }
    }
}

fn main() -> ExitCode {
    let opt = Opt::parse();

    let mode = match (&opt.file, opt.generate, &opt.input, &opt.output) {
        (_, true, Some(input), Some(output)) => Mode::Generate { input, output },
        (Some(_), false, _, _) if !is_privileged() => Mode::Unprivileged,
        (Some(file), false, _, _) => Mode::Watch { file },
        _ => {
            // Printing help is not a failure.
            if let Err(e) = Opt::command().print_help() {
                eprintln!("{e}");
            }
            return ExitCode::SUCCESS;
        }
    };

    init_logging(mode.log_file(&opt.log));
    install_interrupt_handler();

    let result = match mode {
        Mode::Generate { input, output } => generate(input, output),
        Mode::Watch { file } => watch(file),
        Mode::Unprivileged => {
            warn!("Flashing needs root privileges; run this again as root");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn generate(input: &Path, output: &Path) -> Result<()> {
    let file = File::open(input).with_context(|| format!("can't open capture {input:?}"))?;
    let fw = capture::read(BufReader::new(file))
        .with_context(|| format!("can't extract firmware from {input:?}"))?;

    info!(
        "Extracted {} transfers ({} data bytes, checksum {:#010x}) from {input:?}",
        fw.len(),
        fw.data_len(),
        fw.checksum()
    );

    payload::save(&fw, output)?;
    info!("New payload written to {output:?}");

    Ok(())
}

fn watch(path: &Path) -> Result<()> {
    let fw = payload::load(path)?;

    info!("{PROGRAM_DESC}");
    info!(
        "Loaded {} transfers from {path:?} (checksum {:#010x})",
        fw.len(),
        fw.checksum()
    );

    let context = rusb::Context::new().context("can't initialize libusb")?;
    let monitor =
        UsbMonitor::new(context.clone()).context("can't watch for USB hotplug events")?;
    let mut watcher = Watcher::new(RusbBus::new(context), fw, LogObserver);

    info!("Running...");
    watcher.sweep();
    watcher.run(monitor);

    Ok(())
}

fn init_logging(path: Option<&Path>) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("MIDEX_UPDATE_LOG", "info")
            .write_style("MIDEX_UPDATE_LOG_STYLE"),
    );

    let Some(path) = path else {
        builder.init();
        return;
    };

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(Tee(file))));
            builder.init();
        }
        Err(e) => {
            builder.init();
            warn!("Can't open log file {path:?} ({e}); logging to console only");
        }
    }
}

/// Ctrl-C ends the process right away, in any mode, even halfway through a flash.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        info!("Closed by user");
        std::process::exit(0);
    });

    match result {
        Ok(()) => debug!("Interrupt handler installed"),
        Err(e) => warn!("Can't install interrupt handler ({e}); Ctrl-C exits without a message"),
    }
}

/// Copies everything written to it to stderr and a log file.
struct Tee(File);

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.0.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.0.flush()
    }
}

#[cfg(unix)]
fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_privileged() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprivileged_run_writes_no_log_file() {
        let log = Path::new("midex-update.log");
        let file = Path::new("fw.json");

        assert_eq!(Mode::Unprivileged.log_file(log), None);
        assert_eq!(Mode::Watch { file }.log_file(log), Some(log));
        assert_eq!(
            Mode::Generate {
                input: file,
                output: file
            }
            .log_file(log),
            Some(log)
        );
    }
}
