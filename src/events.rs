use thiserror::Error;

use crate::protocol::{
    ids::{CorrelationId, DeviceId, DeviceUniqueId},
    messages::*,
    schedule::{DayProgram, Weekday, WeeklyProgram, SLOTS_PER_DAY},
    state::DeviceState,
    types::{DecodeError, Temperature},
};


#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("unrecognized message tag {tag:?}")]
    UnknownTag {
        tag: String
    },
    #[error("malformed {tag} payload: {source}")]
    Payload {
        tag: &'static str,
        source: serde_json::Error
    },
    #[error("failed to decode {tag} payload: {source}")]
    Decode {
        tag: &'static str,
        source: DecodeError
    },
}

impl ClassifyError {
    pub fn decode_error(&self) -> Option<&DecodeError> {
        match self {
            ClassifyError::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}


/// Sensor telemetry from a `CMD_HEARTBEAT`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub indoor_temperature: Option<Temperature>,
    pub outdoor_temperature: Option<Temperature>,
    pub fcu_tc_temperature: Option<Temperature>,
    pub fcu_tcj_temperature: Option<Temperature>,
    pub fcu_fan_rpm: Option<String>,
    pub cdu_td_temperature: Option<Temperature>,
    pub cdu_ts_temperature: Option<Temperature>,
    pub cdu_te_temperature: Option<Temperature>,
    pub cdu_compressor_hz: Option<String>,
    pub cdu_fan_rpm: Option<String>,
    pub cdu_pmv_pulse: Option<String>,
    pub cdu_iac: Option<String>,
}

impl TryFrom<HeartbeatPayload> for Heartbeat {
    type Error = DecodeError;

    fn try_from(raw: HeartbeatPayload) -> Result<Self, Self::Error> {
        let temperature = |field, raw: &Option<String>| Temperature::from_hex_str(field, raw.as_deref());

        Ok(Self {
            indoor_temperature: temperature("iTemp", &raw.i_temp)?,
            outdoor_temperature: temperature("oTemp", &raw.o_temp)?,
            fcu_tc_temperature: temperature("fcuTcTemp", &raw.fcu_tc_temp)?,
            fcu_tcj_temperature: temperature("fcuTcjTemp", &raw.fcu_tcj_temp)?,
            cdu_td_temperature: temperature("cduTdTemp", &raw.cdu_td_temp)?,
            cdu_ts_temperature: temperature("cduTsTemp", &raw.cdu_ts_temp)?,
            cdu_te_temperature: temperature("cduTeTemp", &raw.cdu_te_temp)?,
            fcu_fan_rpm: raw.fcu_fan_rpm,
            cdu_compressor_hz: raw.cdu_comp_hz,
            cdu_fan_rpm: raw.cdu_fan_rpm,
            cdu_pmv_pulse: raw.cdu_pmv_pulse,
            cdu_iac: raw.cdu_iac,
        })
    }
}


/// A decoded `CMD_SET_SCHEDULE_FROM_AC`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleReport {
    pub program: WeeklyProgram,
    pub scheduler_status: String,
    pub dst_status: String,
    pub dst: DstSetting,
}

fn decode_day(raw: &RawDayProgram) -> Result<DayProgram, DecodeError> {
    DayProgram::from_slots((1..=SLOTS_PER_DAY).map(|n| raw.get(&format!("p{n}")).map(String::as_str)))
}

impl TryFrom<ScheduleFromAcPayload> for ScheduleReport {
    type Error = DecodeError;

    fn try_from(raw: ScheduleFromAcPayload) -> Result<Self, Self::Error> {
        let setting = &raw.program_setting;
        let mut program = WeeklyProgram::default();

        for (day, slots) in [
            (Weekday::Sunday, &setting.sunday),
            (Weekday::Monday, &setting.monday),
            (Weekday::Tuesday, &setting.tuesday),
            (Weekday::Wednesday, &setting.wednesday),
            (Weekday::Thursday, &setting.thursday),
            (Weekday::Friday, &setting.friday),
            (Weekday::Saturday, &setting.saturday),
        ] {
            program[day] = decode_day(slots)?;
        }

        Ok(Self {
            program,
            scheduler_status: raw.scheduler_status,
            dst_status: raw.dst_status,
            dst: raw.dst,
        })
    }
}


#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Heartbeat(Heartbeat),

    /// A unit reporting its own state, either spontaneously or confirming a command.
    DeviceStateReport(DeviceState),

    ScheduleReport(ScheduleReport),
}

/// A classified inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingEvent {
    pub source_id: DeviceUniqueId,
    pub message_id: CorrelationId,
    pub target_ids: Vec<DeviceId>,
    pub timestamp: String,
    pub kind: EventKind,
}

impl IncomingEvent {
    /// The reported state, if this event is a `DeviceStateReport`.
    pub fn device_state(&self) -> Option<&DeviceState> {
        match &self.kind {
            EventKind::DeviceStateReport(state) => Some(state),
            _ => None,
        }
    }
}


fn payload<T: Command + serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, ClassifyError> {
    envelope.unpack_as::<T>()
        .map_err(|source| ClassifyError::Payload { tag: T::TAG, source })
}

fn decoded<T, U>(raw: T, tag: &'static str) -> Result<U, ClassifyError> where
    U: TryFrom<T, Error = DecodeError>
{
    U::try_from(raw).map_err(|source| ClassifyError::Decode { tag, source })
}

/// Turn a raw envelope into an [IncomingEvent], decoding any embedded frames.
pub fn classify(envelope: &Envelope) -> Result<IncomingEvent, ClassifyError> {
    let kind = match envelope.cmd.as_str() {
        HeartbeatPayload::TAG => {
            EventKind::Heartbeat(decoded(payload::<HeartbeatPayload>(envelope)?, HeartbeatPayload::TAG)?)
        },
        FcuFromAcPayload::TAG => {
            let raw = payload::<FcuFromAcPayload>(envelope)?;
            let state = DeviceState::from_hex(&raw.data)
                .map_err(|source| ClassifyError::Decode { tag: FcuFromAcPayload::TAG, source })?;

            EventKind::DeviceStateReport(state)
        },
        ScheduleFromAcPayload::TAG => {
            EventKind::ScheduleReport(decoded(payload::<ScheduleFromAcPayload>(envelope)?, ScheduleFromAcPayload::TAG)?)
        },
        other => {
            return Err(ClassifyError::UnknownTag { tag: other.to_string() })
        }
    };

    Ok(IncomingEvent {
        source_id: DeviceUniqueId::new(envelope.source_id.as_str()),
        message_id: envelope.message_id.clone(),
        target_ids: envelope.target_id.iter().map(|id| DeviceId::new(id.as_str())).collect(),
        timestamp: envelope.time_stamp.clone(),
        kind,
    })
}
