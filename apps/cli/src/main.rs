use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fastboot_core::engine::Engine;
use fastboot_core::events::{FlashEvent, FlashObserver};
use fastboot_core::transport::{TransportFactory, UsbFactory};
use fastboot_core::wire;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "fbflash",
    author,
    version,
    about = "Fastboot flashing tool",
    long_about = "A fastboot protocol client with support for compound \
                  (multi-zip / large-zip) update containers."
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Seconds to wait for a device to appear
    #[arg(long, default_value = "60")]
    wait: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a bootloader variable
    Getvar { variable: String },
    /// Write an image to a partition
    Flash { partition: String, image: PathBuf },
    /// Erase a partition
    Erase { partition: String },
    /// Select the active slot
    SetActive { slot: String },
    /// Reboot the device
    Reboot,
    /// Execute a raw OEM command
    Oem { command: Vec<String> },
    /// Flash a multi-zip update container
    FlashMultizip { image: PathBuf },
    /// Flash a large-zip update container
    FlashLargezip { image: PathBuf },
}

/// Observer rendering classic fastboot console output on stderr.
struct ConsoleObserver;

impl FlashObserver for ConsoleObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::ActionStarted { message } => {
                eprintln!("{message}...");
            }
            FlashEvent::ActionOkay { elapsed } => {
                eprintln!("OKAY [{:7.3}s]", elapsed.as_secs_f64());
            }
            FlashEvent::ActionFailed { reason } => {
                eprintln!("FAILED ({reason})");
            }
            FlashEvent::ActionIgnored {
                product,
                required,
                elapsed,
            } => {
                eprintln!(
                    "IGNORE, product is {product} required only for {required} [{:7.3}s]",
                    elapsed.as_secs_f64()
                );
            }
            FlashEvent::BootloaderInfo { text } => {
                eprintln!("(bootloader) {text}");
            }
            FlashEvent::Notice { text } => {
                eprintln!("{text}");
            }
            FlashEvent::VarDisplayed { label, value } => {
                println!("{label}: {value}");
            }
            FlashEvent::RequirementMismatch {
                variable,
                actual,
                acceptable,
                reject,
            } => {
                eprintln!();
                eprintln!("Device {variable} is '{actual}'.");
                let verb = if *reject { "rejects" } else { "requires" };
                let values = acceptable
                    .iter()
                    .map(|v| format!("'{v}'"))
                    .collect::<Vec<_>>()
                    .join(" or ");
                eprintln!("Update {verb} {values}.");
                eprintln!();
            }
            FlashEvent::TransportRestarted => {
                eprintln!("< waiting for device to return >");
            }
            FlashEvent::QueueFinished { elapsed } => {
                eprintln!("finished. total time: {:.3}s", elapsed.as_secs_f64());
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let image_data = match &args.command {
        Command::Flash { image, .. } => std::fs::read(image)
            .with_context(|| format!("cannot read image '{}'", image.display()))?,
        _ => Vec::new(),
    };

    let observer = Arc::new(ConsoleObserver);
    let mut factory = UsbFactory::new(Duration::from_secs(args.wait));
    let mut transport = factory.reopen().context("no fastboot device found")?;

    let mut engine = Engine::with_observer(observer.clone());
    if let Ok(product) = wire::getvar(transport.as_mut(), "product", observer.as_ref()) {
        info!(product = %product, "device product");
        engine.set_product(Some(product));
    }

    match &args.command {
        Command::Getvar { variable } => {
            engine.queue_display(variable, variable)?;
        }
        Command::Flash { partition, .. } => {
            engine.queue_flash(partition, &image_data)?;
        }
        Command::Erase { partition } => {
            engine.queue_erase(partition)?;
        }
        Command::SetActive { slot } => {
            engine.queue_set_active(slot)?;
        }
        Command::Reboot => {
            engine.queue_reboot();
        }
        Command::Oem { command } => {
            let cmd = format!("oem {}", command.join(" "));
            engine.queue_command(&cmd, &format!("executing '{cmd}'"))?;
        }
        Command::FlashMultizip { image } => {
            engine.queue_flash_multizip(image)?;
        }
        Command::FlashLargezip { image } => {
            engine.queue_flash_largezip(image)?;
        }
    }

    engine.execute(transport, &mut factory)?;
    Ok(())
}
