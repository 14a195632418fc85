use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::Colorize;
use toshibaac::{
    config::{init_logging, parse_devices},
    correlator::{CommandCorrelator, CorrelationResult, DeviceDirectory},
    pretty,
    protocol::{ids::{DeviceId, DeviceUniqueId}, state::DeviceState, types::*},
    transport::{SocketTransport, Transport},
};
use url::Url;


/// Control Toshiba air conditioners over the device message channel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the message channel to connect to
    ///
    /// only tcp+json://host:port URLs are supported
    #[arg(long, env = "TAC_URL", default_value = "tcp+json://localhost:7001")]
    url: Url,

    /// Id this client sends messages as
    #[arg(long, env = "TAC_DEVICE_ID", default_value = "toshibaac-cli")]
    device_id: String,

    /// Known units, as NAME=UNIQUE_ID (repeatable, or comma separated)
    #[arg(long = "device", env = "TAC_DEVICES", value_name = "NAME=UNIQUE_ID")]
    devices: Vec<String>,

    /// Log filter (overrides RUST_LOG), e.g. "toshibaac=debug"
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print events from the units as they arrive
    Status {
        /// Stop listening after this many seconds (default: until interrupted)
        #[arg(long, value_name = "SECS")]
        listen_for: Option<u64>,

        /// Also print settings that are at their usual value
        #[arg(long)]
        print_defaults: bool,
    },

    /// Change settings of one or more units and wait for them to confirm
    Set {
        /// Name of a unit to change (repeatable)
        #[arg(short = 'n', long = "name", required = true)]
        names: Vec<String>,

        #[command(flatten)]
        state: StateArgs,

        /// Seconds to wait for confirmations
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// Also print settings that are at their usual value
        #[arg(long)]
        print_defaults: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct StateArgs {
    /// Target status
    #[arg(long)]
    status: Option<AcStatus>,

    /// Target mode
    #[arg(long)]
    mode: Option<AcMode>,

    /// Target temperature in Celsius, or "default"
    #[arg(long, allow_hyphen_values = true)]
    temperature: Option<Temperature>,

    /// Target fan mode
    #[arg(long)]
    fan: Option<FanMode>,

    /// Target swing mode
    #[arg(long)]
    swing: Option<SwingMode>,

    /// Target power limit (50, 75 or 100)
    #[arg(long)]
    power: Option<PowerMode>,

    /// Target merit A mode
    #[arg(long)]
    merit_a: Option<MeritAMode>,

    /// Target merit B mode
    #[arg(long)]
    merit_b: Option<MeritBMode>,

    /// Target pure ion mode
    #[arg(long)]
    ion: Option<PureIonMode>,

    /// Target self cleaning mode
    #[arg(long)]
    self_cleaning: Option<SelfCleaningMode>,
}

impl From<StateArgs> for DeviceState {
    fn from(args: StateArgs) -> Self {
        DeviceState {
            status: args.status,
            mode: args.mode,
            temperature: args.temperature,
            fan: args.fan,
            swing: args.swing,
            power: args.power,
            merit_b: args.merit_b,
            merit_a: args.merit_a,
            ionizer: args.ion,
            indoor_temperature: None,
            outdoor_temperature: None,
            self_cleaning: args.self_cleaning,
        }
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_level.as_deref())?;

    let directory: DeviceDirectory = parse_devices(args.devices.iter().map(String::as_str))?
        .into_iter()
        .collect();

    let transport = SocketTransport::connect(&args.url, DeviceId::new(args.device_id)).await?;

    match args.command {
        Command::Status { listen_for, print_defaults } => {
            status(&transport, &directory, listen_for.map(Duration::from_secs), print_defaults).await
        },
        Command::Set { names, state, timeout, print_defaults } => {
            let state = DeviceState::from(state);

            if state == DeviceState::default() {
                bail!("nothing to set, pass at least one setting (see --help)");
            }

            let correlator = CommandCorrelator::new(transport, directory);
            let result = correlator.apply(names.as_slice(), state, Duration::from_secs(timeout)).await?;

            report(correlator.directory(), &result, print_defaults)
        },
    }
}

fn device_label(directory: &DeviceDirectory, id: &DeviceUniqueId) -> String {
    match directory.name_of(id) {
        Some(name) => name.to_string(),
        None => id.to_string(),
    }
}

async fn status(transport: &SocketTransport, directory: &DeviceDirectory, listen_for: Option<Duration>, print_defaults: bool) -> Result<()> {
    let mut events = transport.subscribe();

    let deadline = async {
        match listen_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        let event = tokio::select! {
            _ = &mut deadline => return Ok(()),
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => event,
        };

        let Some(event) = event else {
            bail!("connection closed");
        };

        let heading = format!("{} {} {}", event.timestamp, device_label(directory, &event.source_id), pretty::kind_name(&event));
        println!("{}", heading.bold());

        for line in pretty::event_lines(&event, print_defaults) {
            println!("    {line}");
        }
    }
}

fn report(directory: &DeviceDirectory, result: &CorrelationResult, print_defaults: bool) -> Result<()> {
    for id in &result.confirmed {
        println!("{} {}", "confirmed".green(), device_label(directory, id));

        if let Some(state) = result.reported.get(id) {
            for line in pretty::state_lines(state, print_defaults) {
                println!("    {line}");
            }
        }
    }

    for id in &result.unexpected {
        tracing::warn!("received confirmation from unknown device {id}");
    }

    for id in &result.outstanding {
        println!("{} {}", "no response".red(), device_label(directory, id));
    }

    if !result.is_complete() {
        bail!("{} of {} devices did not confirm", result.outstanding.len(), result.outstanding.len() + result.confirmed.len());
    }

    Ok(())
}
