use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use configfs_gadget::config::ConfigStore;
use configfs_gadget::otg::{list_udcs, Function, FunctionKind, GadgetManager};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// configfs-gadget command line arguments
#[derive(Parser, Debug)]
#[command(name = "configfs-gadget")]
#[command(version, about = "Declarative USB gadget setup through configfs", long_about = None)]
struct CliArgs {
    /// Gadget configuration file (default: $GADGET_CONFIG or /etc/configfs-gadget/gadget.json)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// configfs usb_gadget directory (overrides config file and $GADGET_CONFIGFS_ROOT)
    #[arg(long, value_name = "DIR")]
    configfs_root: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the compiled creation steps
    Plan,
    /// Print the compiled removal steps
    TeardownPlan,
    /// Create the gadget
    Create,
    /// Unbind and remove the gadget
    Remove,
    /// Bind to a UDC (first available if omitted)
    Bind { udc: Option<String> },
    /// Unbind from the UDC
    Unbind,
    /// List available UDCs
    Udcs,
    /// Add a function to a live gadget
    AddFunction {
        /// Target configuration (e.g. c.1)
        #[arg(long, value_name = "NAME")]
        config_name: String,
        /// Instance name
        #[arg(long)]
        name: String,
        /// Function type (hid, mass_storage)
        #[arg(long = "type", value_name = "TYPE")]
        kind: String,
    },
    /// Remove a function from a live gadget
    RemoveFunction { name: String },
    /// Show gadget state
    Status,
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    let mut store = ConfigStore::open(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let mut config = store.get().clone();
    if let Ok(root) = std::env::var("GADGET_CONFIGFS_ROOT") {
        config.env.configfs_root = PathBuf::from(root);
    }
    if let Some(root) = args.configfs_root {
        config.env.configfs_root = root;
    }
    tracing::debug!("configfs root: {}", config.env.configfs_root.display());

    let mut manager = GadgetManager::new(config.env.clone(), config.gadget.clone());

    match args.command {
        Command::Plan => print!("{}", manager.create_steps()),
        Command::TeardownPlan => print!("{}", manager.gadget().removal_steps(manager.env())),
        Command::Create => manager.create()?,
        Command::Remove => manager.remove()?,
        Command::Bind { udc } => {
            manager.bind(udc.as_deref().unwrap_or(""))?;
            let udc = manager.gadget().udc.clone();
            store.update(|c| c.gadget.udc = udc)?;
        }
        Command::Unbind => {
            manager.unbind()?;
            store.update(|c| c.gadget.udc = None)?;
        }
        Command::Udcs => {
            for udc in list_udcs(&config.env.udc_class_path)? {
                println!("{}", udc);
            }
        }
        Command::AddFunction {
            config_name,
            name,
            kind,
        } => {
            let kind: FunctionKind = kind.parse()?;
            manager.add_function(&config_name, &name, Function::from_kind(kind))?;
            let gadget = manager.gadget().clone();
            store.update(|c| c.gadget = gadget)?;
        }
        Command::RemoveFunction { name } => {
            manager.remove_function(&name)?;
            let gadget = manager.gadget().clone();
            store.update(|c| c.gadget = gadget)?;
        }
        Command::Status => {
            println!("gadget:  {}", manager.gadget_path().display());
            println!("exists:  {}", manager.exists());
            println!("bound:   {}", manager.is_bound());
            for (config_name, meta) in manager.active_functions() {
                println!("  {}/{}  {}", config_name, meta.name, meta.description);
            }
        }
    }

    Ok(())
}

/// Initialize logging
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "configfs_gadget=error",
        LogLevel::Warn => "configfs_gadget=warn",
        LogLevel::Info => "configfs_gadget=info",
        LogLevel::Debug => "configfs_gadget=debug",
        LogLevel::Trace => "configfs_gadget=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("GADGET_CONFIG") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/configfs-gadget/gadget.json")
}
