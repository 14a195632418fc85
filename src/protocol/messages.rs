use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::ids::{CorrelationId, DeviceId, DeviceUniqueId};


/*
    Message tags seen on the device channel:

    CMD_HEARTBEAT             AC -> clients, periodic sensor telemetry
    CMD_FCU_FROM_AC           AC -> clients, current state (also the confirmation of a CMD_FCU_TO_AC)
    CMD_SET_SCHEDULE_FROM_AC  AC -> clients, weekly program
    CMD_FCU_TO_AC             client -> ACs, state delta
*/

/// A message payload with a fixed discriminator tag.
pub trait Command {
    const TAG: &'static str;
}


/// The JSON envelope every message on the channel is wrapped in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub source_id: String,
    pub message_id: CorrelationId,
    #[serde(default)]
    pub target_id: Vec<String>,
    pub cmd: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub time_stamp: String,

    // sent by the cloud, unused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcu_time: Option<serde_json::Value>,
}

impl Envelope {
    /// Wrap a `Command` payload into a new `Envelope` stamped with the current time.
    pub fn pack<T>(source: &DeviceId, message_id: CorrelationId, targets: &[DeviceUniqueId], payload: &T) -> serde_json::Result<Self> where
        T: Command + Serialize
    {
        Ok(Self {
            source_id: source.to_string(),
            message_id,
            target_id: targets.iter().map(ToString::to_string).collect(),
            cmd: T::TAG.to_string(),
            payload: serde_json::to_value(payload)?,
            time_stamp: now(),
            time_zone: None,
            fcu_time: None,
        })
    }

    /// Unpack the payload as a `Command`. The caller is expected to have checked the tag.
    pub fn unpack_as<T>(&self) -> serde_json::Result<T> where
        T: Command + DeserializeOwned
    {
        debug_assert_eq!(self.cmd, T::TAG);

        T::deserialize(&self.payload)
    }

    pub fn is<T: Command>(&self) -> bool {
        self.cmd == T::TAG
    }
}

pub fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}


/// `CMD_HEARTBEAT`
///
/// Temperatures are hex byte strings, everything else is free-form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub i_temp: Option<String>,
    pub o_temp: Option<String>,
    #[serde(alias = "fcuTemp")]
    pub fcu_tc_temp: Option<String>,
    pub fcu_tcj_temp: Option<String>,
    pub fcu_fan_rpm: Option<String>,
    pub cdu_td_temp: Option<String>,
    pub cdu_ts_temp: Option<String>,
    pub cdu_te_temp: Option<String>,
    pub cdu_comp_hz: Option<String>,
    pub cdu_fan_rpm: Option<String>,
    pub cdu_pmv_pulse: Option<String>,
    pub cdu_iac: Option<String>,
}

impl Command for HeartbeatPayload {
    const TAG: &'static str = "CMD_HEARTBEAT";
}


/// `CMD_FCU_FROM_AC`: a unit reporting its state as a hex state frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FcuFromAcPayload {
    pub data: String,
}

impl Command for FcuFromAcPayload {
    const TAG: &'static str = "CMD_FCU_FROM_AC";
}


/// `CMD_FCU_TO_AC`: a state delta sent to one or more units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FcuToAcPayload {
    pub data: String,
}

impl Command for FcuToAcPayload {
    const TAG: &'static str = "CMD_FCU_TO_AC";
}


/// Slot name (`p1`..`p10`) to hex schedule entry frame.
pub type RawDayProgram = BTreeMap<String, String>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawProgramSetting {
    #[serde(default)]
    pub sunday: RawDayProgram,
    #[serde(default)]
    pub monday: RawDayProgram,
    #[serde(default)]
    pub tuesday: RawDayProgram,
    #[serde(default)]
    pub wednesday: RawDayProgram,
    #[serde(default)]
    pub thursday: RawDayProgram,
    #[serde(default)]
    pub friday: RawDayProgram,
    #[serde(default)]
    pub saturday: RawDayProgram,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DstSetting {
    pub time: String,
    pub status: String,
}

/// `CMD_SET_SCHEDULE_FROM_AC`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleFromAcPayload {
    pub program_setting: RawProgramSetting,
    pub scheduler_status: String,
    pub dst_status: String,
    #[serde(default)]
    pub dst: DstSetting,
}

impl Command for ScheduleFromAcPayload {
    const TAG: &'static str = "CMD_SET_SCHEDULE_FROM_AC";
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_pack_outgoing() {
        let envelope = Envelope::pack(
            &DeviceId::new("mobile-1"),
            CorrelationId::new("abc"),
            &[DeviceUniqueId::new("ac-1"), DeviceUniqueId::new("ac-2")],
            &FcuToAcPayload { data: "30ff".into() }
        ).unwrap();

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["sourceId"], "mobile-1");
        assert_eq!(value["messageId"], "abc");
        assert_eq!(value["targetId"], json!(["ac-1", "ac-2"]));
        assert_eq!(value["cmd"], "CMD_FCU_TO_AC");
        assert_eq!(value["payload"], json!({ "data": "30ff" }));
        assert!(value.get("timeZone").is_none());
        assert!(!envelope.time_stamp.is_empty());
    }

    #[test]
    fn test_unpack_incoming() {
        let envelope: Envelope = serde_json::from_value(json!({
            "sourceId": "ac-1",
            "messageId": "m-1",
            "targetId": ["mobile-1"],
            "cmd": "CMD_HEARTBEAT",
            "payload": { "iTemp": "16", "fcuTemp": "14", "cduIac": "0" },
            "timeStamp": "2024-01-01T00:00:00Z",
            "timeZone": "+01:00",
            "fcuTime": null
        })).unwrap();

        assert!(envelope.is::<HeartbeatPayload>());
        assert!(!envelope.is::<FcuFromAcPayload>());

        let heartbeat = envelope.unpack_as::<HeartbeatPayload>().unwrap();
        assert_eq!(heartbeat.i_temp.as_deref(), Some("16"));
        assert_eq!(heartbeat.fcu_tc_temp.as_deref(), Some("14"));
        assert_eq!(heartbeat.o_temp, None);
    }

    #[test]
    fn test_schedule_payload_shape() {
        let payload: ScheduleFromAcPayload = serde_json::from_value(json!({
            "programSetting": {
                "Sunday": { "p1": "", "p2": "invalid", "p3": "", "p4": "" },
                "Monday": { "p1": "06303043153203ff" }
            },
            "schedulerStatus": "00",
            "dstStatus": "01",
            "dst": { "Time": "0", "Status": "00" }
        })).unwrap();

        assert_eq!(payload.program_setting.sunday.len(), 4);
        assert_eq!(payload.program_setting.monday["p1"], "06303043153203ff");
        assert!(payload.program_setting.saturday.is_empty());
        assert_eq!(payload.dst.status, "00");
    }
}
