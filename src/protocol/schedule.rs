use std::{fmt::{self, Display}, ops::{Index, IndexMut}};

use packed_struct::prelude::*;
use strum_macros::{Display, EnumIter};

use super::{state::{decode_hex_frame, FAN, MODE, SWING}, types::*};

/// Slot strings the cloud uses for "nothing scheduled here".
const EMPTY_SLOT: &str = "";
const INVALID_SLOT: &str = "invalid";

pub const SLOTS_PER_DAY: usize = 10;

pub const ENTRY_FRAME_SIZE: usize = 8;


/// Raw layout of the 8 byte schedule entry frame.
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering="msb0")]
pub struct EntryFrame {
    /// BCD
    #[packed_field(bytes="0")]
    pub hour: u8,

    /// BCD
    #[packed_field(bytes="1")]
    pub minute: u8,

    #[packed_field(bytes="2")]
    pub status: u8,

    #[packed_field(bytes="3")]
    pub mode: u8,

    #[packed_field(bytes="4")]
    pub temperature: u8,

    #[packed_field(bytes="5")]
    pub fan: u8,

    #[packed_field(bytes="6")]
    pub merit: u8,

    #[packed_field(bytes="7")]
    pub swing: u8,
}


/// Time of day at which a scheduled action fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

impl Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

fn bcd_decode(field: Field, byte: u8, max: u8) -> Result<u8, DecodeError> {
    let (tens, ones) = (byte >> 4, byte & 0x0f);

    if tens > 9 || ones > 9 || tens * 10 + ones > max {
        return Err(DecodeError::InvalidByte { field, byte })
    }

    Ok(tens * 10 + ones)
}

fn bcd_encode(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}


/// One scheduled action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub time: ClockTime,
    pub status: AcStatus,
    pub mode: Option<AcMode>,
    pub temperature: Option<Temperature>,
    pub fan: Option<FanMode>,
    pub merit_b: Option<MeritBMode>,
    pub merit_a: Option<MeritAMode>,
    pub swing: Option<SwingMode>,
}

impl ScheduleEntry {
    pub const FRAME_SIZE: usize = ENTRY_FRAME_SIZE;

    pub fn new(time: ClockTime, status: AcStatus) -> Self {
        Self {
            time,
            status,
            mode: None,
            temperature: None,
            fan: None,
            merit_b: None,
            merit_a: None,
            swing: None,
        }
    }

    pub fn decode(frame: &[u8; ENTRY_FRAME_SIZE]) -> Result<Self, DecodeError> {
        let raw = EntryFrame::unpack(frame)
            .unwrap_or_else(|_| unreachable!("entry frame fields are whole bytes"));

        let hour = bcd_decode(Field::Hour, raw.hour, 23)?;
        let minute = bcd_decode(Field::Minute, raw.minute, 59)?;
        let (merit_b, merit_a) = unpack_merit(raw.merit)?;

        Ok(Self {
            time: ClockTime { hour, minute },
            status: decode_required(Field::Status, raw.status)?,
            mode: MODE.decode(raw.mode)?,
            temperature: Temperature::from_byte(raw.temperature),
            fan: FAN.decode(raw.fan)?,
            merit_b,
            merit_a,
            swing: SWING.decode(raw.swing)?,
        })
    }

    pub fn frame(&self) -> EntryFrame {
        EntryFrame {
            hour: bcd_encode(self.time.hour),
            minute: bcd_encode(self.time.minute),
            status: self.status.to_byte(),
            mode: MODE.encode(self.mode),
            temperature: Temperature::to_byte(self.temperature),
            fan: FAN.encode(self.fan),
            merit: pack_merit(self.merit_b, self.merit_a),
            swing: SWING.encode(self.swing),
        }
    }

    pub fn encode(&self) -> [u8; ENTRY_FRAME_SIZE] {
        self.frame()
            .pack()
            .unwrap_or_else(|_| unreachable!("entry frame fields are whole bytes"))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Decode one program slot string.
    ///
    /// An empty slot or the literal `"invalid"` is "no entry", not an error.
    pub fn from_slot(slot: &str) -> Result<Option<Self>, DecodeError> {
        match slot.trim() {
            EMPTY_SLOT | INVALID_SLOT => Ok(None),
            hex => Self::decode(&decode_hex_frame(hex)?).map(Some),
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

/// The ordered program slots of one day.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DayProgram {
    slots: [Option<ScheduleEntry>; SLOTS_PER_DAY],
}

impl DayProgram {
    /// Decode up to [SLOTS_PER_DAY] slot strings in order. A missing string is "no entry".
    pub fn from_slots<'a, I>(slots: I) -> Result<Self, DecodeError> where
        I: IntoIterator<Item = Option<&'a str>>
    {
        let mut day = Self::default();

        for (slot, raw) in day.slots.iter_mut().zip(slots) {
            *slot = match raw {
                Some(raw) => ScheduleEntry::from_slot(raw)?,
                None => None,
            };
        }

        Ok(day)
    }

    pub fn slot(&self, index: usize) -> Option<&ScheduleEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn set_slot(&mut self, index: usize, entry: Option<ScheduleEntry>) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = entry;
        }
    }

    pub fn slots(&self) -> &[Option<ScheduleEntry>] {
        &self.slots
    }

    /// Scheduled entries in slot order, skipping empty slots.
    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.slots.iter().flatten()
    }
}

/// A week's schedule, one [DayProgram] per weekday.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeeklyProgram {
    days: [DayProgram; 7],
}

impl WeeklyProgram {
    pub fn days(&self) -> impl Iterator<Item = (Weekday, &DayProgram)> {
        use strum::IntoEnumIterator;

        Weekday::iter().zip(self.days.iter())
    }
}

impl Index<Weekday> for WeeklyProgram {
    type Output = DayProgram;

    fn index(&self, day: Weekday) -> &Self::Output {
        &self.days[day as usize]
    }
}

impl IndexMut<Weekday> for WeeklyProgram {
    fn index_mut(&mut self, day: Weekday) -> &mut Self::Output {
        &mut self.days[day as usize]
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn morning_heat() -> ScheduleEntry {
        ScheduleEntry {
            mode: Some(AcMode::Heat),
            temperature: Temperature::new(21).ok(),
            fan: Some(FanMode::Low),
            merit_b: Some(MeritBMode::Off),
            merit_a: Some(MeritAMode::Eco),
            swing: None,
            ..ScheduleEntry::new(ClockTime::new(6, 30).unwrap(), AcStatus::On)
        }
    }

    #[test]
    fn test_encode_entry() {
        assert_eq!(morning_heat().encode(), [0x06, 0x30, 0x30, 0x43, 0x15, 0x32, 0x03, 0xff]);
        assert_eq!(morning_heat().to_hex(), "06303043153203ff");
    }

    #[test]
    fn test_decode_entry() {
        let entry = ScheduleEntry::from_slot("06303043153203ff").unwrap();
        assert_eq!(entry, Some(morning_heat()));

        let evening = ScheduleEntry::from_slot("2245310000ff0000").unwrap().unwrap();
        assert_eq!(evening.time, ClockTime::new(22, 45).unwrap());
        assert_eq!(evening.status, AcStatus::Off);
        assert_eq!(evening.mode, None);
        assert_eq!(evening.temperature, Some(Temperature::new(0).unwrap()));
        assert_eq!(evening.fan, None);
        assert_eq!(evening.merit_b, Some(MeritBMode::Off));
        assert_eq!(evening.merit_a, Some(MeritAMode::Off));
        assert_eq!(evening.swing, None);
    }

    #[test]
    fn test_empty_slots_are_no_entry() {
        assert_eq!(ScheduleEntry::from_slot(""), Ok(None));
        assert_eq!(ScheduleEntry::from_slot("invalid"), Ok(None));
    }

    #[test]
    fn test_invalid_entry_bytes() {
        // status has no absent form in a schedule entry
        assert_eq!(
            ScheduleEntry::from_slot("0630ff43153203ff").unwrap_err().field(),
            Some(Field::Status)
        );
        assert_eq!(ScheduleEntry::from_slot("24303043153203ff").unwrap_err().field(), Some(Field::Hour));
        assert_eq!(ScheduleEntry::from_slot("0a303043153203ff").unwrap_err().field(), Some(Field::Hour));
        assert_eq!(ScheduleEntry::from_slot("06603043153203ff").unwrap_err().field(), Some(Field::Minute));
        assert_eq!(ScheduleEntry::from_slot("06303046153203ff").unwrap_err().field(), Some(Field::Mode));
        assert_eq!(ScheduleEntry::from_slot("0630304315320bff").unwrap_err().field(), Some(Field::MeritA));
        assert_eq!(
            ScheduleEntry::from_slot("0630"),
            Err(DecodeError::InvalidLength { expected: 8, actual: 2 })
        );
    }

    #[test]
    fn test_day_program() {
        let entry = morning_heat().to_hex();
        let day = DayProgram::from_slots([Some(""), Some(entry.as_str()), Some("invalid"), None]).unwrap();

        assert_eq!(day.slot(0), None);
        assert_eq!(day.slot(1), Some(&morning_heat()));
        assert_eq!(day.slot(2), None);
        assert_eq!(day.slots().len(), SLOTS_PER_DAY);
        assert_eq!(day.entries().count(), 1);
    }

    #[test]
    fn test_weekly_program_index() {
        let mut week = WeeklyProgram::default();
        week[Weekday::Wednesday].set_slot(3, Some(morning_heat()));

        assert_eq!(week[Weekday::Wednesday].slot(3), Some(&morning_heat()));
        assert_eq!(week[Weekday::Thursday].entries().count(), 0);

        let days: Vec<_> = week.days().map(|(day, _)| day).collect();
        assert_eq!(days.first(), Some(&Weekday::Sunday));
        assert_eq!(days.len(), 7);
    }
}
