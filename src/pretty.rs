//! Human readable rendering of decoded states, schedules and telemetry.

use std::fmt::Display;

use crate::{
    events::{EventKind, Heartbeat, IncomingEvent, ScheduleReport},
    protocol::{schedule::{ScheduleEntry, WeeklyProgram}, state::DeviceState, types::*},
};


fn push<T: Display>(lines: &mut Vec<String>, label: &str, value: Option<T>) {
    if let Some(value) = value {
        lines.push(format!("{label}: {value}"));
    }
}

/// Like [push], but `default` values are skipped unless `print_defaults` is set.
fn push_unless<T: Display + PartialEq>(lines: &mut Vec<String>, label: &str, value: Option<T>, default: T, print_defaults: bool) {
    push(lines, label, value.filter(|v| print_defaults || *v != default));
}

/// One line per known field of `state`.
///
/// Settings that are at their usual value (fan auto, swing off, full power, merits, ion and
/// self-cleaning off) are left out unless `print_defaults` is set.
pub fn state_lines(state: &DeviceState, print_defaults: bool) -> Vec<String> {
    let mut lines = Vec::new();

    push(&mut lines, "Status", state.status);
    push(&mut lines, "Mode", state.mode);
    push_unless(&mut lines, "Fan mode", state.fan, FanMode::Auto, print_defaults);
    push_unless(&mut lines, "Swing mode", state.swing, SwingMode::Off, print_defaults);
    push_unless(&mut lines, "Power mode", state.power, PowerMode::Power100, print_defaults);
    push(&mut lines, "Target temperature", state.temperature);
    push(&mut lines, "Indoor temperature", state.indoor_temperature);
    push(&mut lines, "Outdoor temperature", state.outdoor_temperature);
    push_unless(&mut lines, "Merit A mode", state.merit_a, MeritAMode::Off, print_defaults);
    push_unless(&mut lines, "Merit B mode", state.merit_b, MeritBMode::Off, print_defaults);
    push_unless(&mut lines, "Pure ion mode", state.ionizer, PureIonMode::Off, print_defaults);
    push_unless(&mut lines, "Self cleaning mode", state.self_cleaning, SelfCleaningMode::Off, print_defaults);

    lines
}

pub fn entry_line(entry: &ScheduleEntry) -> String {
    let mut line = format!("{} -> {}", entry.time, entry.status);

    let mut field = |label: &str, value: Option<String>| {
        if let Some(value) = value {
            line.push_str(&format!(" {label}: {value}"));
        }
    };

    field("Mode", entry.mode.map(|v| v.to_string()));
    field("Target temperature", entry.temperature.map(|v| v.to_string()));
    field("Fan mode", entry.fan.map(|v| v.to_string()));
    field("Merit A mode", entry.merit_a.map(|v| v.to_string()));
    field("Merit B mode", entry.merit_b.map(|v| v.to_string()));
    field("Swing mode", entry.swing.map(|v| v.to_string()));

    line
}

/// Each day followed by its entries, indented.
pub fn program_lines(program: &WeeklyProgram) -> Vec<String> {
    let mut lines = Vec::new();

    for (day, slots) in program.days() {
        lines.push(format!("{day}:"));
        lines.extend(slots.entries().map(|entry| format!("  {}", entry_line(entry))));
    }

    lines
}

pub fn schedule_lines(report: &ScheduleReport) -> Vec<String> {
    let mut lines = vec![
        format!("Scheduler status: {}", report.scheduler_status),
        format!("DST status: {} (time {}, status {})", report.dst_status, report.dst.time, report.dst.status),
    ];

    lines.extend(program_lines(&report.program));
    lines
}

pub fn heartbeat_lines(heartbeat: &Heartbeat) -> Vec<String> {
    let mut lines = Vec::new();

    push(&mut lines, "Indoor temperature", heartbeat.indoor_temperature);
    push(&mut lines, "Outdoor temperature", heartbeat.outdoor_temperature);
    push(&mut lines, "FCU TC temperature", heartbeat.fcu_tc_temperature);
    push(&mut lines, "FCU TCJ temperature", heartbeat.fcu_tcj_temperature);
    push(&mut lines, "FCU fan rpm", heartbeat.fcu_fan_rpm.as_deref());
    push(&mut lines, "CDU TD temperature", heartbeat.cdu_td_temperature);
    push(&mut lines, "CDU TS temperature", heartbeat.cdu_ts_temperature);
    push(&mut lines, "CDU TE temperature", heartbeat.cdu_te_temperature);
    push(&mut lines, "CDU compressor Hz", heartbeat.cdu_compressor_hz.as_deref());
    push(&mut lines, "CDU fan rpm", heartbeat.cdu_fan_rpm.as_deref());
    push(&mut lines, "CDU PMV pulse", heartbeat.cdu_pmv_pulse.as_deref());
    push(&mut lines, "CDU IAC", heartbeat.cdu_iac.as_deref());

    lines
}

/// Short name of the event kind, for headings.
pub fn kind_name(event: &IncomingEvent) -> &'static str {
    match event.kind {
        EventKind::Heartbeat(_) => "heartbeat",
        EventKind::DeviceStateReport(_) => "state",
        EventKind::ScheduleReport(_) => "schedule",
    }
}

pub fn event_lines(event: &IncomingEvent, print_defaults: bool) -> Vec<String> {
    match &event.kind {
        EventKind::Heartbeat(heartbeat) => heartbeat_lines(heartbeat),
        EventKind::DeviceStateReport(state) => state_lines(state, print_defaults),
        EventKind::ScheduleReport(report) => schedule_lines(report),
    }
}


#[cfg(test)]
mod tests {
    use crate::protocol::schedule::{ClockTime, Weekday};

    use super::*;

    fn cooling() -> DeviceState {
        DeviceState {
            status: Some(AcStatus::On),
            mode: Some(AcMode::Cool),
            temperature: Temperature::new(22).ok(),
            fan: Some(FanMode::Auto),
            swing: Some(SwingMode::Vertical),
            power: Some(PowerMode::Power100),
            merit_a: Some(MeritAMode::Off),
            ionizer: Some(PureIonMode::Off),
            ..Default::default()
        }
    }

    #[test]
    fn test_state_lines_skip_defaults() {
        assert_eq!(state_lines(&cooling(), false), vec![
            "Status: on",
            "Mode: cool",
            "Swing mode: vertical",
            "Target temperature: 22°C",
        ]);
    }

    #[test]
    fn test_state_lines_with_defaults() {
        let lines = state_lines(&cooling(), true);

        assert!(lines.contains(&"Fan mode: auto".to_string()));
        assert!(lines.contains(&"Power mode: 100".to_string()));
        assert!(lines.contains(&"Pure ion mode: off".to_string()));
        // absent fields are never printed
        assert!(!lines.iter().any(|l| l.starts_with("Merit B")));
    }

    #[test]
    fn test_program_lines() {
        let mut program = WeeklyProgram::default();
        program[Weekday::Monday].set_slot(0, Some(ScheduleEntry {
            mode: Some(AcMode::Heat),
            temperature: Temperature::new(21).ok(),
            ..ScheduleEntry::new(ClockTime::new(6, 5).unwrap(), AcStatus::On)
        }));

        let lines = program_lines(&program);
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "Sunday:");
        assert_eq!(lines[1], "Monday:");
        assert_eq!(lines[2], "  06:05 -> on Mode: heat Target temperature: 21°C");
    }
}
