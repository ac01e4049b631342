use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use wildwatch::{WildwatchConfig, WildwatchService};

#[derive(Parser, Debug)]
#[command(name = "wildwatch")]
#[command(about = "Wildlife risk monitoring with multi-camera detection, alerting and recording")]
#[command(version)]
#[command(long_about = "Watches one or more camera feeds, classifies detected animals and \
people into danger tiers, estimates their distance and alerts the site owner and the local \
authority by SMS and email when risk thresholds are crossed. Recordings can be started on \
demand or automatically on detection activity.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "wildwatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - assemble the service but don't start cameras
    #[arg(long, help = "Perform dry run - build the service but don't start cameras")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily-rolling files in this directory
    #[arg(long, value_name = "DIR", help = "Directory for daily-rolling log files")]
    log_dir: Option<String>,

    /// Start this camera in addition to the autostart entries
    #[arg(long = "camera", value_name = "ID", help = "Camera id to start (repeatable)")]
    cameras: Vec<u32>,

    /// Analyze a single image and print the result as JSON
    #[arg(long, value_name = "IMAGE", help = "Classify one image file and exit")]
    analyze: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting Wildwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match WildwatchConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut service = WildwatchService::builder(config)
        .build()
        .await
        .map_err(|e| {
            error!("Failed to build service: {}", e);
            e
        })?;

    if let Some(path) = &args.analyze {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image {}", path))?;
        let result = service.analyze_image(&bytes).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if args.dry_run {
        info!("Dry run mode - service assembled but no cameras started");
        println!("✓ Dry run completed successfully - service assembled");
        return Ok(());
    }

    let started = service.start(&args.cameras).await;
    info!("{} cameras running", started.len());

    let exit_code = service.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Wildwatch exited with code: {}", exit_code);

    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wildwatch={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wildwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Wildwatch Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Add cameras with [[cameras]] tables: id, name, source, autostart");
    println!();

    let default_config = toml::to_string_pretty(&WildwatchConfig::default())
        .context("Failed to serialize default configuration")?;
    println!("{}", default_config);
    Ok(())
}
