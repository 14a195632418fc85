use anyhow::Result;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use toshibaac::{
    events::classify,
    pretty,
    protocol::{messages::Envelope, schedule::ScheduleEntry, state::DeviceState},
};


#[derive(ValueEnum, Clone, Copy, Debug)]
enum Input {
    /// JSON message envelopes, as captured from the channel
    Envelope,
    /// 38 character hex state frames
    State,
    /// 16 character hex schedule entries
    Entry,
}

/// Decode captured messages and frames
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// What the inputs are
    #[arg(long, value_enum, default_value = "envelope")]
    input: Input,

    /// Also print settings that are at their usual value
    #[arg(long)]
    print_defaults: bool,

    /// Inputs to decode. Read from stdin, one per line, when none are given.
    inputs: Vec<String>,
}


fn decode(args: &Args, input: &str) -> Result<Vec<String>> {
    let lines = match args.input {
        Input::Envelope => {
            let envelope: Envelope = serde_json::from_str(input)?;
            let event = classify(&envelope)?;

            let mut lines = vec![format!("{} from {} ({})", pretty::kind_name(&event), event.source_id, event.message_id)];
            lines.extend(pretty::event_lines(&event, args.print_defaults).into_iter().map(|l| format!("    {l}")));
            lines
        },
        Input::State => {
            pretty::state_lines(&DeviceState::from_hex(input)?, args.print_defaults)
        },
        Input::Entry => {
            match ScheduleEntry::from_slot(input)? {
                Some(entry) => vec![pretty::entry_line(&entry)],
                None => vec!["no entry".to_string()],
            }
        },
    };

    Ok(lines)
}

fn print(args: &Args, input: &str) {
    let input = input.trim();
    if input.is_empty() {
        return
    }

    match decode(args, input) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
        },
        Err(err) => {
            println!("{}", format!("corrupted input {input:?}: {err:#}").on_red().bright_white());
        }
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.inputs.is_empty() {
        for input in &args.inputs {
            print(&args, input);
        }

        return Ok(())
    }

    let mut lines = BufReader::new(stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        print(&args, &line);
    }

    Ok(())
}
