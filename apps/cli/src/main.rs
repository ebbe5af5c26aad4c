mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use odin_core::{
    CancelToken, ChannelObserver, DeviceMonitor, DeviceOps, FlashOrchestrator, OdinEvent,
    OdinObserver, PartitionName, PartitionRegistry, ProcessDispatcher, RebootOutcome,
    RebootTarget, SessionState, ToolConfig, TracingObserver,
};
use tracing::{error, info, warn};

use prompt::TerminalCollaborator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Samsung download-mode and adb/fastboot flashing tool", long_about = None)]
struct Args {
    /// TOML tool configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect the connected device once
    Devices {
        /// Print the raw adb listing instead
        #[arg(long)]
        raw: bool,
    },
    /// Follow device connection changes
    Watch {
        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
        /// Stop after this many changes
        #[arg(long)]
        count: Option<usize>,
    },
    /// Flash partition images in download mode
    Flash {
        #[arg(long)]
        bl: Option<PathBuf>,
        #[arg(long)]
        ap: Option<PathBuf>,
        #[arg(long)]
        cp: Option<PathBuf>,
        #[arg(long)]
        csc: Option<PathBuf>,
        #[arg(long = "home-csc")]
        home_csc: Option<PathBuf>,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
        /// Stay in download mode after flashing
        #[arg(long)]
        no_reboot: bool,
    },
    /// Reboot an adb or fastboot device
    Reboot {
        #[arg(value_enum)]
        target: Target,
    },
    /// Sideload an OTA package over adb
    Sideload {
        package: PathBuf,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration
    Init { path: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Target {
    Bootloader,
    Recovery,
}

impl From<Target> for RebootTarget {
    fn from(target: Target) -> Self {
        match target {
            Target::Bootloader => RebootTarget::Bootloader,
            Target::Recovery => RebootTarget::Recovery,
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
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = match &args.config {
        Some(path) => ToolConfig::load_from_file(path)?,
        None => ToolConfig::default(),
    };

    match args.command {
        Command::Devices { raw } => devices(config, raw),
        Command::Watch { interval, count } => watch(config, interval, count),
        Command::Flash {
            bl,
            ap,
            cp,
            csc,
            home_csc,
            yes,
            no_reboot,
        } => {
            let images = [
                (PartitionName::Bl, bl),
                (PartitionName::Ap, ap),
                (PartitionName::Cp, cp),
                (PartitionName::Csc, csc),
                (PartitionName::HomeCsc, home_csc),
            ];
            flash(config, images, yes, no_reboot)
        }
        Command::Reboot { target } => reboot(config, target.into()),
        Command::Sideload { package, yes } => sideload(config, package, yes),
        Command::Config {
            action: ConfigAction::Init { path },
        } => {
            ToolConfig::default().save_to_file(&path)?;
            info!(path = %path.display(), "Wrote default configuration");
            Ok(())
        }
    }
}

/// Poll once so the snapshot is populated before any command reads it.
fn detect(config: &ToolConfig, dispatcher: Arc<ProcessDispatcher>) -> DeviceMonitor {
    let mut monitor = DeviceMonitor::from_config(dispatcher, config, Arc::new(TracingObserver));
    monitor.poll_once();
    monitor
}

fn devices(config: ToolConfig, raw: bool) -> Result<()> {
    let dispatcher = Arc::new(ProcessDispatcher::new());
    let monitor = detect(&config, Arc::clone(&dispatcher));

    if raw {
        let ops = DeviceOps::new(dispatcher, monitor.snapshot(), Arc::new(TracingObserver), config);
        print!("{}", ops.check_device()?);
    } else {
        println!("{}", monitor.snapshot().current());
    }
    Ok(())
}

fn watch(mut config: ToolConfig, interval: Option<u64>, count: Option<usize>) -> Result<()> {
    if let Some(secs) = interval {
        config.poll_interval_ms = secs.saturating_mul(1000);
    }
    let (observer, events) = ChannelObserver::new();
    let monitor = DeviceMonitor::from_config(
        Arc::new(ProcessDispatcher::new()),
        &config,
        Arc::new(observer),
    );
    let handle = monitor.spawn();
    info!(interval_ms = config.poll_interval_ms, "Watching for devices");

    let mut seen = 0;
    for event in events.iter() {
        if let OdinEvent::DeviceStateChanged { to, device, .. } = &event {
            TracingObserver.on_event(&event);
            println!("{to}: {device}");
            seen += 1;
            if count.is_some_and(|limit| seen >= limit) {
                break;
            }
        }
    }
    handle.stop();
    Ok(())
}

fn flash(
    mut config: ToolConfig,
    images: [(PartitionName, Option<PathBuf>); 5],
    yes: bool,
    no_reboot: bool,
) -> Result<()> {
    if no_reboot {
        config.reboot_after_flash = false;
    }
    let collaborator = TerminalCollaborator::new(yes);
    let registry = PartitionRegistry::new();

    let given = images.iter().any(|(_, path)| path.is_some());
    for (name, path) in images {
        let result = match path {
            Some(path) => registry.select(name, path),
            None if !given => registry.select_from(name, &collaborator).map(|_| ()),
            None => continue,
        };
        if let Err(e) = result {
            bail!("{name}: {e}");
        }
    }
    for slot in registry.selected() {
        info!("{}", slot.label());
    }

    let dispatcher = Arc::new(ProcessDispatcher::new());
    let monitor = detect(&config, Arc::clone(&dispatcher)).spawn();
    let orchestrator = FlashOrchestrator::new(
        dispatcher,
        monitor.snapshot(),
        Arc::new(TracingObserver),
        config,
    );

    let outcome = orchestrator.run_confirmed(&registry, &collaborator, &CancelToken::new());
    monitor.stop();

    let Some(session) = outcome? else {
        warn!("Nothing flashed");
        return Ok(());
    };

    for result in session.results() {
        println!(
            "{:<9} {:>8.1}s  {}",
            result.partition.to_string(),
            result.duration.as_secs_f64(),
            if result.succeeded() { "OK" } else { "FAILED" }
        );
    }
    match session.reboot() {
        Some(RebootOutcome::Failed { detail, .. }) => warn!(detail = %detail, "Reboot failed; reboot the device manually"),
        Some(RebootOutcome::Skipped) => info!("Device left in download mode"),
        _ => {}
    }

    match session.state() {
        SessionState::Completed => {
            println!("Flash completed");
            Ok(())
        }
        state => {
            error!(state = %state, "Flash did not complete");
            bail!("flash session ended: {state}")
        }
    }
}

fn reboot(config: ToolConfig, target: RebootTarget) -> Result<()> {
    let dispatcher = Arc::new(ProcessDispatcher::new());
    let monitor = detect(&config, Arc::clone(&dispatcher));
    let ops = DeviceOps::new(dispatcher, monitor.snapshot(), Arc::new(TracingObserver), config);
    ops.reboot(target)?;
    Ok(())
}

fn sideload(config: ToolConfig, package: PathBuf, yes: bool) -> Result<()> {
    let dispatcher = Arc::new(ProcessDispatcher::new());
    let monitor = detect(&config, Arc::clone(&dispatcher));
    let ops = DeviceOps::new(dispatcher, monitor.snapshot(), Arc::new(TracingObserver), config);
    if !ops.sideload(&package, &TerminalCollaborator::new(yes))? {
        warn!("Sideload cancelled");
    }
    Ok(())
}
