//! Line-oriented operator console
//!
//! One command per line. Words and the numeric shortcuts shown by `help`
//! are accepted in any case.

use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;

use crate::error::ModeError;
use crate::mode::{ModeController, ModeSnapshot};

pub const HELP: &str = "\
Commands:
  1 | normal            start normal operation (wake / keep-alive frames)
  2 | polling           send the arm request for the polling dwell
  3 | auto | auto-test  run the unattended normal/polling/quiet cycle
  start <mode>          same as the mode word alone (also: run <mode>)
  0 | stop              stop all frames
  override <job>        send the job's override frames
  status                show mode and per-job progress
  help                  show this text
  q | exit              stop everything and quit";

/// Operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Normal,
    Polling,
    AutoTest,
    Stop,
    Override(String),
    Status,
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (type 'help')")]
    Unknown(String),

    #[error("'override' needs a job name")]
    MissingJob,
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let Some(word) = words.next() else {
            return Err(ParseCommandError::Empty);
        };

        let word = word.to_lowercase();
        if let Some(mode) = mode_command(&word) {
            return Ok(mode);
        }

        match word.as_str() {
            "start" | "run" => words
                .next()
                .and_then(|mode| mode_command(&mode.to_lowercase()))
                .ok_or_else(|| ParseCommandError::Unknown(s.trim().to_string())),
            "0" | "stop" => Ok(Command::Stop),
            "override" => words
                .next()
                .map(|job| Command::Override(job.to_string()))
                .ok_or(ParseCommandError::MissingJob),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "q" | "quit" | "exit" => Ok(Command::Exit),
            _ => Err(ParseCommandError::Unknown(s.trim().to_string())),
        }
    }
}

/// Words that switch the operating mode, with or without a leading `start`
fn mode_command(word: &str) -> Option<Command> {
    match word {
        "1" | "normal" => Some(Command::Normal),
        "2" | "polling" | "poll" => Some(Command::Polling),
        "3" | "auto" | "autotest" | "auto-test" => Some(Command::AutoTest),
        _ => None,
    }
}

/// What the console loop should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Print this and read the next line
    Continue(String),
    /// Controller is terminated; leave the loop
    Exit,
}

/// Run one command against the controller
pub async fn execute(controller: &ModeController, command: Command) -> Result<Reply, ModeError> {
    let message = match command {
        Command::Normal => {
            controller.normal().await?;
            "Normal operation started".to_string()
        }
        Command::Polling => {
            controller.polling().await?;
            "Polling request started".to_string()
        }
        Command::AutoTest => {
            controller.auto_test().await?;
            "Auto-test cycle started".to_string()
        }
        Command::Stop => {
            controller.stop().await?;
            "All frames stopped".to_string()
        }
        Command::Override(job) => {
            controller.trigger_override(&job).await?;
            format!("Override sent on '{}'", job)
        }
        Command::Status => format_status(&controller.snapshot()),
        Command::Help => HELP.to_string(),
        Command::Exit => {
            controller.terminate().await;
            return Ok(Reply::Exit);
        }
    };
    Ok(Reply::Continue(message))
}

pub fn format_status(snapshot: &ModeSnapshot) -> String {
    let mut out = format!("Mode: {}  cycles: {}", snapshot.mode, snapshot.cycles);
    for (name, job) in &snapshot.jobs {
        let _ = write!(
            out,
            "\n  {:<12} {:<8} frames={:<6} phase={}{}",
            name,
            if job.running { "running" } else { "stopped" },
            job.frames_sent,
            job.phase_index,
            if job.override_active { " (override)" } else { "" },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeState;
    use crate::schedule::JobSnapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("1", Command::Normal)]
    #[case("Normal", Command::Normal)]
    #[case("2", Command::Polling)]
    #[case("  poll ", Command::Polling)]
    #[case("3", Command::AutoTest)]
    #[case("0", Command::Stop)]
    #[case("STOP", Command::Stop)]
    #[case("override nm_state", Command::Override("nm_state".to_string()))]
    #[case("status", Command::Status)]
    #[case("?", Command::Help)]
    #[case("q", Command::Exit)]
    #[case("exit", Command::Exit)]
    #[case("auto-test", Command::AutoTest)]
    #[case("start normal", Command::Normal)]
    #[case("start polling", Command::Polling)]
    #[case("run auto-test", Command::AutoTest)]
    #[case("Start 3", Command::AutoTest)]
    fn test_parse_command(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(line.parse::<Command>(), Ok(expected));
    }

    #[rstest]
    #[case("", ParseCommandError::Empty)]
    #[case("   ", ParseCommandError::Empty)]
    #[case("override", ParseCommandError::MissingJob)]
    #[case("launch rocket", ParseCommandError::Unknown("launch rocket".to_string()))]
    #[case("start", ParseCommandError::Unknown("start".to_string()))]
    #[case("run status", ParseCommandError::Unknown("run status".to_string()))]
    fn test_parse_errors(#[case] line: &str, #[case] expected: ParseCommandError) {
        assert_eq!(line.parse::<Command>(), Err(expected));
    }

    #[test]
    fn test_format_status() {
        let snapshot = ModeSnapshot {
            mode: ModeState::Normal,
            cycles: 2,
            jobs: vec![(
                "nm_wake".to_string(),
                JobSnapshot {
                    running: true,
                    frames_sent: 12,
                    phase_index: 1,
                    override_active: false,
                },
            )],
        };
        let status = format_status(&snapshot);
        assert!(status.starts_with("Mode: normal  cycles: 2"));
        assert!(status.contains("nm_wake"));
        assert!(status.contains("frames=12"));
        assert!(status.contains("phase=1"));
    }
}
