// src/host/command.rs - text commands for the interactive front-end

use std::path::PathBuf;

use swivel_shared::{RotatorId, StructureEvent};

use super::HostError;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Rotate { rotator: RotatorId, angle: f64, speed: Option<f64> },
    Clockwise(RotatorId),
    Counterclockwise(RotatorId),
    Snap { rotator: RotatorId, snap: f64 },
    Deploy(RotatorId),
    Target { rotator: RotatorId, angle: f64 },
    Airspeed(Option<f64>),
    Stop(RotatorId),
    Status,
    Notify(StructureEvent),
    Save(PathBuf),
    Load(PathBuf),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  rotate <rotator> <angle> [speed]   relative rotation, angle in degrees
  cw <rotator> | ccw <rotator>       one configured step
  snap <rotator> [step]              rotate to the nearest multiple of step
  deploy <rotator>                   swing the full travel out or back
  target <rotator> <angle>           move to an angle of travel
  airspeed <m/s>|off                 feed speed-controlled rotators
  stop <rotator>                     brake
  status                             vessel status as JSON
  rails on|off                       go on / off rails
  save <path> | load <path>          persist or restore the vessel
  quit";

fn rotator_arg(arg: Option<&str>) -> Result<RotatorId, HostError> {
    let arg = arg.ok_or_else(|| HostError::Parse("missing rotator".to_string()))?;
    let digits = arg.strip_prefix(|c: char| c.eq_ignore_ascii_case(&'r')).unwrap_or(arg);
    digits
        .parse::<u32>()
        .map(RotatorId)
        .map_err(|_| HostError::Parse(format!("bad rotator '{}'", arg)))
}

fn number_arg(arg: Option<&str>, what: &str) -> Result<Option<f64>, HostError> {
    match arg {
        None => Ok(None),
        Some(s) => match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(HostError::Parse(format!("bad {} '{}'", what, s))),
        },
    }
}

fn path_arg(arg: Option<&str>) -> Result<PathBuf, HostError> {
    arg.map(PathBuf::from)
        .ok_or_else(|| HostError::Parse("missing path".to_string()))
}

/// Parse one line of input. Blank lines are an error; the caller skips them.
pub fn parse_command(line: &str) -> Result<Command, HostError> {
    let mut words = line.split_whitespace();
    let verb = words
        .next()
        .ok_or_else(|| HostError::Parse("empty command".to_string()))?
        .to_ascii_lowercase();
    let cmd = match verb.as_str() {
        "rotate" | "r" => {
            let rotator = rotator_arg(words.next())?;
            let angle = number_arg(words.next(), "angle")?
                .ok_or_else(|| HostError::Parse("missing angle".to_string()))?;
            let speed = number_arg(words.next(), "speed")?;
            Command::Rotate { rotator, angle, speed }
        }
        "cw" => Command::Clockwise(rotator_arg(words.next())?),
        "ccw" => Command::Counterclockwise(rotator_arg(words.next())?),
        "snap" => {
            let rotator = rotator_arg(words.next())?;
            let snap = number_arg(words.next(), "step")?.unwrap_or(0.0);
            Command::Snap { rotator, snap }
        }
        "deploy" => Command::Deploy(rotator_arg(words.next())?),
        "target" => {
            let rotator = rotator_arg(words.next())?;
            let angle = number_arg(words.next(), "angle")?
                .ok_or_else(|| HostError::Parse("missing angle".to_string()))?;
            Command::Target { rotator, angle }
        }
        "airspeed" => match words.next() {
            Some("off") => Command::Airspeed(None),
            other => Command::Airspeed(Some(
                number_arg(other, "airspeed")?.ok_or_else(|| HostError::Parse("missing airspeed".to_string()))?,
            )),
        },
        "stop" => Command::Stop(rotator_arg(words.next())?),
        "status" | "s" => Command::Status,
        "rails" => match words.next() {
            Some("on") => Command::Notify(StructureEvent::GoOnRails),
            Some("off") => Command::Notify(StructureEvent::GoOffRails),
            other => return Err(HostError::Parse(format!("rails expects on|off, got {:?}", other))),
        },
        "save" => Command::Save(path_arg(words.next())?),
        "load" => Command::Load(path_arg(words.next())?),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(HostError::Parse(format!("unknown command '{}'", other))),
    };
    if let Some(extra) = words.next() {
        return Err(HostError::Parse(format!("unexpected argument '{}'", extra)));
    }
    Ok(cmd)
}
