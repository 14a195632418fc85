use std::{collections::BTreeMap, time::Duration};

use anyhow::Result;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::time::{interval, sleep, MissedTickBehavior};
use toshibaac::{
    config::{init_logging, Port, PortStream},
    protocol::{
        codec::RxMessage,
        ids::{CorrelationId, DeviceId, DeviceUniqueId},
        messages::*,
        state::DeviceState,
        types::*,
    },
};
use url::Url;

/// Emulator for Toshiba air conditioners
///
/// Answers CMD_FCU_TO_AC commands addressed to its units with CMD_FCU_FROM_AC
/// confirmations, and sends periodic heartbeats.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the message channel to connect to
    #[arg(env = "TAC_URL", default_value = "tcp+json://localhost:7001")]
    url: Url,

    /// Unique id of an emulated unit (repeatable)
    #[arg(long = "unit", required = true)]
    units: Vec<String>,

    /// Longest delay before confirming a command, in milliseconds
    #[arg(long, default_value_t = 1500)]
    max_delay_ms: u64,

    /// Probability (0..1) that a unit ignores a command
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Probability (0..1) that a confirmation is sent twice
    #[arg(long, default_value_t = 0.0)]
    duplicate_rate: f64,

    /// Seconds between heartbeats, 0 to disable
    #[arg(long, default_value_t = 30)]
    heartbeat: u64,

    /// Log filter (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_level.as_deref())?;

    let framed = Port::open(&args.url).await?.framed();

    ac_emulator(&args, framed).await
}


fn initial_state() -> DeviceState {
    DeviceState {
        status: Some(AcStatus::Off),
        mode: Some(AcMode::Cool),
        temperature: Temperature::new(22).ok(),
        fan: Some(FanMode::Auto),
        swing: Some(SwingMode::Off),
        power: Some(PowerMode::Power100),
        merit_b: Some(MeritBMode::Off),
        merit_a: Some(MeritAMode::Off),
        ionizer: Some(PureIonMode::Off),
        indoor_temperature: Temperature::new(24).ok(),
        outdoor_temperature: Temperature::new(15).ok(),
        self_cleaning: Some(SelfCleaningMode::Off),
    }
}

fn reply<T: Command + serde::Serialize>(unit: &DeviceUniqueId, message_id: CorrelationId, to: &[DeviceUniqueId], payload: &T) -> Result<Envelope> {
    Ok(Envelope::pack(&DeviceId::new(unit.as_str()), message_id, to, payload)?)
}

fn heartbeat(state: &DeviceState) -> HeartbeatPayload {
    let hex = |t: Option<Temperature>| Some(format!("{:02x}", Temperature::to_byte(t)));
    let fan_rpm = match state.status {
        Some(AcStatus::On) => "1200",
        _ => "0",
    };

    HeartbeatPayload {
        i_temp: hex(state.indoor_temperature),
        o_temp: hex(state.outdoor_temperature),
        fcu_fan_rpm: Some(fan_rpm.to_string()),
        cdu_comp_hz: Some("0".to_string()),
        ..Default::default()
    }
}

async fn ac_emulator(args: &Args, mut port: Box<dyn PortStream>) -> Result<()> {
    let mut units: BTreeMap<DeviceUniqueId, DeviceState> = args.units.iter()
        .map(|id| (DeviceUniqueId::new(id.as_str()), initial_state()))
        .collect();

    tracing::info!("emulating {} units", units.len());

    let mut heartbeats = interval(Duration::from_secs(args.heartbeat.max(1)));
    heartbeats.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            _ = heartbeats.tick(), if args.heartbeat > 0 => {
                for (unit, state) in &units {
                    port.send(reply(unit, CorrelationId::random(), &[], &heartbeat(state))?).await?;
                }
                continue;
            },
            message = port.next() => message,
        };

        let envelope = match message.transpose()? {
            Some(RxMessage::Envelope(envelope)) => envelope,
            Some(RxMessage::Corrupted { line, .. }) => {
                tracing::warn!(%line, "ignoring corrupted line");
                continue;
            },
            // stream reached the end
            None => return Ok(()),
        };

        if !envelope.is::<FcuToAcPayload>() {
            continue;
        }

        let delta = match envelope.unpack_as::<FcuToAcPayload>().map_err(anyhow::Error::from)
            .and_then(|payload| Ok(DeviceState::from_hex(&payload.data)?))
        {
            Ok(delta) => delta,
            Err(err) => {
                tracing::warn!(message_id = %envelope.message_id, "ignoring bad command: {err:#}");
                continue;
            }
        };

        let sender = [DeviceUniqueId::new(envelope.source_id.as_str())];

        for target in &envelope.target_id {
            let target = DeviceUniqueId::new(target.as_str());
            let Some(state) = units.get_mut(&target) else { continue };

            let (ignore, duplicate, delay) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen_bool(args.drop_rate.clamp(0.0, 1.0)),
                    rng.gen_bool(args.duplicate_rate.clamp(0.0, 1.0)),
                    rng.gen_range(0..=args.max_delay_ms),
                )
            };

            if ignore {
                tracing::info!(unit = %target, message_id = %envelope.message_id, "dropping command");
                continue;
            }

            state.apply(&delta);

            sleep(Duration::from_millis(delay)).await;

            let confirmation = reply(&target, envelope.message_id.clone(), &sender, &FcuFromAcPayload { data: state.to_hex() })?;

            tracing::info!(unit = %target, message_id = %envelope.message_id, state = %confirmation.payload["data"], "confirming");

            if duplicate {
                port.send(confirmation.clone()).await?;
            }
            port.send(confirmation).await?;
        }
    }
}
