use packed_struct::prelude::*;

use super::types::*;

pub(crate) const STATUS: FieldSpec = FieldSpec::new(Field::Status, &[0xff, 0x02]);
pub(crate) const MODE: FieldSpec = FieldSpec::new(Field::Mode, &[0xff, 0x00]);
pub(crate) const FAN: FieldSpec = FieldSpec::new(Field::Fan, &[0xff, 0x00]);
pub(crate) const SWING: FieldSpec = FieldSpec::new(Field::Swing, &[0xff, 0x00]);
const POWER: FieldSpec = FieldSpec::new(Field::PowerLimit, &[0xff]);
const IONIZER: FieldSpec = FieldSpec::new(Field::Ionizer, &[0xff]);
const SELF_CLEANING: FieldSpec = FieldSpec::new(Field::SelfCleaning, &[0xff]);

const RESERVED: [u8; 4] = [0xff; 4];

pub const STATE_FRAME_SIZE: usize = 19;


/// Raw layout of the 19 byte device state frame.
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering="msb0")]
pub struct StateFrame {
    #[packed_field(bytes="0")]
    pub status: u8,

    #[packed_field(bytes="1")]
    pub mode: u8,

    /// Target temperature
    #[packed_field(bytes="2")]
    pub temperature: u8,

    #[packed_field(bytes="3")]
    pub fan: u8,

    #[packed_field(bytes="4")]
    pub swing: u8,

    /// Compressor power limit
    #[packed_field(bytes="5")]
    pub power: u8,

    /// high nibble: merit B, low nibble: merit A
    #[packed_field(bytes="6")]
    pub merit: u8,

    /// Pure ion
    #[packed_field(bytes="7")]
    pub ionizer: u8,

    #[packed_field(bytes="8")]
    pub indoor_temperature: u8,

    #[packed_field(bytes="9")]
    pub outdoor_temperature: u8,

    /// Unknown. Timer settings live somewhere in here.
    #[packed_field(bytes="10..=13")]
    pub reserved_10: [u8; 4],

    #[packed_field(bytes="14")]
    pub self_cleaning: u8,

    /// Unknown. Includes scheduler status and the off-timer.
    #[packed_field(bytes="15..=18")]
    pub reserved_15: [u8; 4],
}


/// Full configuration/telemetry snapshot of one unit.
///
/// Every field is optional: `None` means the unit reported (or the command
/// leaves) the field absent/unknown, which is distinct from "off" or zero.
/// The same type doubles as a delta when sent in a command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub status: Option<AcStatus>,
    pub mode: Option<AcMode>,
    pub temperature: Option<Temperature>,
    pub fan: Option<FanMode>,
    pub swing: Option<SwingMode>,
    pub power: Option<PowerMode>,
    pub merit_b: Option<MeritBMode>,
    pub merit_a: Option<MeritAMode>,
    pub ionizer: Option<PureIonMode>,

    /// Read-only telemetry
    pub indoor_temperature: Option<Temperature>,

    /// Read-only telemetry
    pub outdoor_temperature: Option<Temperature>,

    pub self_cleaning: Option<SelfCleaningMode>,
}

impl DeviceState {
    pub const FRAME_SIZE: usize = STATE_FRAME_SIZE;

    pub fn decode(frame: &[u8; STATE_FRAME_SIZE]) -> Result<Self, DecodeError> {
        let raw = StateFrame::unpack(frame)
            .unwrap_or_else(|_| unreachable!("state frame fields are whole bytes"));

        let (merit_b, merit_a) = unpack_merit(raw.merit)?;

        Ok(Self {
            status: STATUS.decode(raw.status)?,
            mode: MODE.decode(raw.mode)?,
            temperature: Temperature::from_byte(raw.temperature),
            fan: FAN.decode(raw.fan)?,
            swing: SWING.decode(raw.swing)?,
            power: POWER.decode(raw.power)?,
            merit_b,
            merit_a,
            ionizer: IONIZER.decode(raw.ionizer)?,
            indoor_temperature: Temperature::from_byte(raw.indoor_temperature),
            outdoor_temperature: Temperature::from_byte(raw.outdoor_temperature),
            self_cleaning: SELF_CLEANING.decode(raw.self_cleaning)?,
        })
    }

    pub fn frame(&self) -> StateFrame {
        StateFrame {
            status: STATUS.encode(self.status),
            mode: MODE.encode(self.mode),
            temperature: Temperature::to_byte(self.temperature),
            fan: FAN.encode(self.fan),
            swing: SWING.encode(self.swing),
            power: POWER.encode(self.power),
            merit: pack_merit(self.merit_b, self.merit_a),
            ionizer: IONIZER.encode(self.ionizer),
            indoor_temperature: Temperature::to_byte(self.indoor_temperature),
            outdoor_temperature: Temperature::to_byte(self.outdoor_temperature),
            reserved_10: RESERVED,
            self_cleaning: SELF_CLEANING.encode(self.self_cleaning),
            reserved_15: RESERVED,
        }
    }

    pub fn encode(&self) -> [u8; STATE_FRAME_SIZE] {
        self.frame()
            .pack()
            .unwrap_or_else(|_| unreachable!("state frame fields are whole bytes"))
    }

    /// Decode the 38 character hex form used in message payloads.
    pub fn from_hex(hex: &str) -> Result<Self, DecodeError> {
        Self::decode(&decode_hex_frame(hex)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Overwrite every field that is present in `delta`.
    pub fn apply(&mut self, delta: &DeviceState) {
        fn merge<T: Copy>(field: &mut Option<T>, delta: Option<T>) {
            if delta.is_some() {
                *field = delta;
            }
        }

        merge(&mut self.status, delta.status);
        merge(&mut self.mode, delta.mode);
        merge(&mut self.temperature, delta.temperature);
        merge(&mut self.fan, delta.fan);
        merge(&mut self.swing, delta.swing);
        merge(&mut self.power, delta.power);
        merge(&mut self.merit_b, delta.merit_b);
        merge(&mut self.merit_a, delta.merit_a);
        merge(&mut self.ionizer, delta.ionizer);
        merge(&mut self.indoor_temperature, delta.indoor_temperature);
        merge(&mut self.outdoor_temperature, delta.outdoor_temperature);
        merge(&mut self.self_cleaning, delta.self_cleaning);
    }
}

pub(crate) fn decode_hex_frame<const S: usize>(hex: &str) -> Result<[u8; S], DecodeError> {
    let bytes = hex::decode(hex.trim())?;
    let actual = bytes.len();

    bytes.try_into()
        .map_err(|_| DecodeError::InvalidLength { expected: S, actual })
}
