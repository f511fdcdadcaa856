//! Line-oriented console presenter
//!
//! Reads one command per line and prints the station's answers.

use super::station::{CaptureStation, RecordingToggle};
use super::view::SessionInfo;
use crate::capture::traits::{ParseResolutionError, Resolution};
use crate::utils::error::ErrorResponse;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub const HELP: &str = "commands: record | stop | shot | res WxH | fps N | audio ID | reset | status | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Record,
    Stop,
    Shot,
    Resolution(Resolution),
    Framerate(u32),
    Audio(String),
    Reset,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FromStr for ConsoleCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let command = parts.next().ok_or(ParseCommandError::Empty)?;
        let arg = parts.next();

        let command = match command.to_ascii_lowercase().as_str() {
            "record" => Self::Record,
            "stop" => Self::Stop,
            "shot" | "screenshot" => Self::Shot,
            "res" => {
                let arg = arg.ok_or(ParseCommandError::MissingArgument("res"))?;
                let res: Resolution = arg
                    .parse()
                    .map_err(|e: ParseResolutionError| ParseCommandError::InvalidArgument(e.to_string()))?;
                Self::Resolution(res)
            }
            "fps" => {
                let arg = arg.ok_or(ParseCommandError::MissingArgument("fps"))?;
                match arg.parse::<u32>() {
                    Ok(fps) if fps > 0 => Self::Framerate(fps),
                    _ => return Err(ParseCommandError::InvalidArgument(arg.to_string())),
                }
            }
            "audio" => {
                let arg = arg.ok_or(ParseCommandError::MissingArgument("audio"))?;
                Self::Audio(arg.to_string())
            }
            "reset" => Self::Reset,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(ParseCommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Run one command; `false` once the user asked to quit
pub async fn execute(station: &CaptureStation, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Record => match station.start_recording().await {
            Ok(()) => println!("recording"),
            Err(e) => println!("error [{}]: {}", e.code, e.message),
        },
        ConsoleCommand::Stop => match station.stop_recording().await {
            Ok(RecordingToggle::Stopped {
                artifact: Some(artifact),
                duration_fixed,
            }) => {
                println!("saved {} ({} bytes)", artifact.location, artifact.bytes);
                if !duration_fixed {
                    println!("warning: duration metadata could not be written");
                }
            }
            Ok(_) => println!("not recording"),
            Err(e) => println!("error [{}]: {}", e.code, e.message),
        },
        ConsoleCommand::Shot => match station.take_screenshot().await {
            Ok(artifact) => println!("saved {}", artifact.location),
            Err(e) => println!("error [{}]: {}", e.code, e.message),
        },
        ConsoleCommand::Resolution(res) => report(station.select_resolution(res).await),
        ConsoleCommand::Framerate(fps) => report(station.select_framerate(fps).await),
        ConsoleCommand::Audio(id) => report(station.select_audio_device(&id).await),
        ConsoleCommand::Reset => match station.reset().await {
            Ok(()) => println!("settings cleared; restart to run setup again"),
            Err(e) => println!("error [{}]: {}", e.code, e.message),
        },
        ConsoleCommand::Status => print_status(station).await,
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return false,
    }
    true
}

fn report(result: Result<SessionInfo, ErrorResponse>) {
    match result {
        Ok(info) => println!(
            "live: {} @ {}fps (video {}, audio {})",
            info.resolution, info.framerate, info.video_device_id, info.audio_device_id
        ),
        Err(e) => println!("error [{}]: {}", e.code, e.message),
    }
}

async fn print_status(station: &CaptureStation) {
    let status = station.recording_status().await;
    let view = match station.view().await {
        Ok(view) => view,
        Err(e) => {
            println!("error [{}]: {}", e.code, e.message);
            return;
        }
    };

    let resolutions: Vec<String> = view.resolutions.iter().map(ToString::to_string).collect();
    let framerates: Vec<String> = view.framerates.iter().map(ToString::to_string).collect();
    println!("resolutions: {}", resolutions.join(", "));
    println!("framerates:  {}", framerates.join(", "));
    println!(
        "selected:    {} @ {}fps",
        view.selected_resolution, view.selected_framerate
    );
    for option in &view.audio_options {
        let marker = if option.selected { "*" } else { " " };
        println!("  {} {} ({})", marker, option.label, option.value);
    }
    match &view.session {
        Some(session) => println!("session:     {} since {}", session.id, session.opened_at),
        None => println!("session:     none"),
    }
    println!(
        "recording:   {:?} {}ms, {} chunks",
        status.state, status.duration_ms, status.chunk_count
    );
}

/// Read commands until EOF or `quit`
pub async fn run_console<R>(station: &CaptureStation, input: R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    println!("{}", HELP);
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        station.pump().await;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(command) => {
                if !execute(station, command).await {
                    break;
                }
            }
            Err(e) => println!("{} ({})", e, HELP),
        }
    }
    Ok(())
}
