use aslglove::prelude::*;

use bluetooth::{BtleLink, Target};
use clap::{Parser, Subcommand};
use csvlog::CsvSink;
use handler::NotificationHandler;
use log::{debug, info, warn, LevelFilter};
use session::{ExitReason, Session};
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Display more information on the console. Can be used multiple times.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Seconds to wait when scanning for bluetooth devices
    #[arg(
        short,
        long,
        value_name = "SECONDS",
        value_parser = parse_scantime,
        default_value_t = firmware::SCAN_TIMEOUT.as_secs_f32()
    )]
    scantime: f32,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn parse_scantime(arg: &str) -> Result<f32, String> {
    let seconds: f32 = arg.parse().map_err(|e| format!("{e}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("expected a non-negative number of seconds, got {arg}"));
    }
    Ok(seconds)
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List nearby Bluetooth LE devices
    Scan {},

    /// Find the glove by name and print its frames to the console
    Print {
        /// Advertised name of the glove
        #[arg(short, long, default_value = firmware::DEVICE_NAME)]
        name: String,
    },

    /// Connect to the glove by address and append its frames to a CSV file
    Log {
        /// Hardware address of the glove
        #[arg(short, long, default_value = firmware::DEVICE_ADDRESS)]
        address: String,

        /// CSV file to append to
        #[arg(short, long, value_name = "FILE", default_value = firmware::LOG_PATH)]
        output: PathBuf,
    },

    /// Read the glove's current frame once
    Read {
        /// Hardware address of the glove
        #[arg(short, long, default_value = firmware::DEVICE_ADDRESS)]
        address: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .parse_default_env()
        .init();
    if cli.verbose > 1 {
        dbg!(&cli);
    }

    let conf = App {
        verbose: cli.verbose,
        scantime: cli.scantime,
    };

    let result = match &cli.command {
        Some(Commands::Scan {}) => bluetooth::scan(conf, firmware::DEVICE_NAME).await,
        Some(Commands::Print { name }) => {
            let target = Target::Name(name.clone());
            stream(conf, &target, NotificationHandler::live()).await
        }
        Some(Commands::Log { address, output }) => {
            log_to(conf, &Target::Address(address.clone()), CsvSink::new(output)).await
        }
        Some(Commands::Read { address }) => read(conf, &Target::Address(address.clone())).await,
        None => {
            <Cli as clap::CommandFactory>::command().print_help()?;
            Ok(())
        }
    };

    // Session failures end the program normally; the message is all there is.
    if let Err(e) = result {
        eprintln!("{e}");
    }
    Ok(())
}

async fn stream(
    conf: App,
    target: &Target,
    mut handler: NotificationHandler,
) -> Result<(), GloveError> {
    let device = bluetooth::find_peripheral(conf, target).await?;
    let (link, events) =
        BtleLink::connect(device, firmware::SENSOR_CHARACTERISTIC_UUID, firmware::CONNECT_TIMEOUT)
            .await?;

    let mut session = Session::new(
        link,
        events,
        firmware::SENSOR_CHARACTERISTIC_UUID,
        firmware::POLL_INTERVAL,
        firmware::SERVICE_DISCOVERY_DELAY,
    );
    let reason = session.run(&mut handler, interrupted()).await?;

    let stats = handler.stats();
    info!("Session ended ({reason:?}): {stats:?}");
    if conf.verbose > 0 {
        println!(
            "{} notifications, {} rejected, {} displayed, {} logged",
            stats.received, stats.rejected, stats.displayed, stats.logged
        );
    }
    match reason {
        ExitReason::Interrupted => Ok(()),
        ExitReason::Disconnected => Err(GloveError::UnexpectedDisconnect),
    }
}

async fn log_to(conf: App, target: &Target, sink: CsvSink) -> Result<(), GloveError> {
    if sink.ensure_header().await? {
        info!("Wrote CSV header to {}", sink.path().display());
    }
    println!("Logging to {}", sink.path().display());
    stream(conf, target, NotificationHandler::logger(sink)).await
}

async fn read(conf: App, target: &Target) -> Result<(), GloveError> {
    let device = bluetooth::find_peripheral(conf, target).await?;
    let (link, _events) =
        BtleLink::connect(device, firmware::SENSOR_CHARACTERISTIC_UUID, firmware::CONNECT_TIMEOUT)
            .await?;

    let data = link.read(firmware::SENSOR_CHARACTERISTIC_UUID).await;
    if let Err(e) = session::Link::disconnect(&link).await {
        debug!("Disconnect after read failed: {e}");
    }
    let data = data?;

    match protocol::decode_glove(&data) {
        Ok(frame) => println!("{}", handler::format_glove(&frame)),
        Err(e) => {
            println!("{}", handler::format_rejected(&data));
            return Err(e.into());
        }
    }
    Ok(())
}

/// Resolves on Ctrl+C. Never resolves if the handler can't be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Can't listen for Ctrl+C: {e}");
        futures::future::pending::<()>().await;
    }
}
