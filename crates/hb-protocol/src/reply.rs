//! Line parser: classifies a single logical line from the controller into
//! zero or more typed [`Reply`] records.
//!
//! Grammar (case-sensitive, `#` suffix optional on
//! `RGS`/`VGS`/`RLB`/`RGB`):
//!
//! - `SW m s b v`; push event; a single line may carry several of these
//!   back to back, so [`parse_line`] returns a `Vec`.
//! - `RGS[#] m s b v` / `VGS[#] m s b v`; switch reply.
//! - `RLB[#] m e mod load level [fade]`; load reply, fade optional.
//! - `RGB[#] m e mod load level`; load reply, no fade.
//! - A line that is exactly `0` or `1` (after trimming); bare state reply.
//!
//! A malformed line is never fatal to the caller: the reader loop counts
//! [`ParseError`] and moves on.

use crate::address::{LoadAddr, SwitchAddr};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    SwitchReply {
        addr: SwitchAddr,
        value: bool,
        /// The wire command that produced this reply: `"RGS"` or `"VGS"`.
        command: &'static str,
        raw: String,
    },
    LoadReply {
        addr: LoadAddr,
        level: u8,
        fade: Option<f64>,
        /// `"RLB"` or `"RGB"`.
        command: &'static str,
        raw: String,
    },
    PushEvent {
        addr: SwitchAddr,
        value: bool,
    },
    BareState {
        value: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed line: {0}")]
    Malformed(String),
    #[error("invalid field {0:?}")]
    InvalidField(String),
}

/// Parse one logical line (no line-ending bytes) into zero or more replies.
pub fn parse_line(line: &str) -> Result<Vec<Reply>, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    if trimmed == "0" || trimmed == "1" {
        return Ok(vec![Reply::BareState {
            value: trimmed == "1",
        }]);
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    match tokens[0] {
        "SW" => parse_push_events(&tokens),
        "RGS" | "RGS#" => parse_switch_reply(&tokens[1..], "RGS", trimmed),
        "VGS" | "VGS#" => parse_switch_reply(&tokens[1..], "VGS", trimmed),
        "RLB" | "RLB#" => parse_load_reply(&tokens[1..], "RLB", trimmed, true),
        "RGB" | "RGB#" => parse_load_reply(&tokens[1..], "RGB", trimmed, false),
        other => Err(ParseError::UnknownCommand(other.to_owned())),
    }
}

fn parse_push_events(tokens: &[&str]) -> Result<Vec<Reply>, ParseError> {
    let mut events = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] != "SW" {
            return Err(ParseError::Malformed(format!(
                "expected SW at offset {i}"
            )));
        }
        if i + 4 >= tokens.len() {
            return Err(ParseError::Malformed("truncated SW event".to_owned()));
        }
        let m = parse_u32(tokens[i + 1])?;
        let s = parse_u32(tokens[i + 2])?;
        let b = parse_u32(tokens[i + 3])?;
        let v = parse_bit(tokens[i + 4])?;
        events.push(Reply::PushEvent {
            addr: SwitchAddr::new(m, s, b),
            value: v,
        });
        i += 5;
    }
    Ok(events)
}

fn parse_switch_reply(rest: &[&str], command: &'static str, raw: &str) -> Result<Vec<Reply>, ParseError> {
    if rest.len() != 4 {
        return Err(ParseError::Malformed(format!(
            "{command}: expected 4 fields, got {}",
            rest.len()
        )));
    }
    let m = parse_u32(rest[0])?;
    let s = parse_u32(rest[1])?;
    let b = parse_u32(rest[2])?;
    let v = parse_u32(rest[3])?;
    Ok(vec![Reply::SwitchReply {
        addr: SwitchAddr::new(m, s, b),
        value: v != 0,
        command,
        raw: raw.to_owned(),
    }])
}

fn parse_load_reply(
    rest: &[&str],
    command: &'static str,
    raw: &str,
    fade_allowed: bool,
) -> Result<Vec<Reply>, ParseError> {
    let ok_len = if fade_allowed {
        rest.len() == 5 || rest.len() == 6
    } else {
        rest.len() == 5
    };
    if !ok_len {
        return Err(ParseError::Malformed(format!(
            "{command}: unexpected field count {}",
            rest.len()
        )));
    }
    let m = parse_u32(rest[0])?;
    let e = parse_u32(rest[1])?;
    let module = parse_u32(rest[2])?;
    let load = parse_u32(rest[3])?;
    let level: u32 = parse_u32(rest[4])?;
    if level > 100 {
        return Err(ParseError::InvalidField(format!("level {level} out of range")));
    }
    let fade = if rest.len() == 6 {
        Some(parse_f64(rest[5])?)
    } else {
        None
    };
    Ok(vec![Reply::LoadReply {
        addr: LoadAddr::new(m, e, module, load),
        level: level as u8,
        fade,
        command,
        raw: raw.to_owned(),
    }])
}

fn parse_u32(s: &str) -> Result<u32, ParseError> {
    s.parse::<u32>()
        .map_err(|_| ParseError::InvalidField(s.to_owned()))
}

fn parse_bit(s: &str) -> Result<bool, ParseError> {
    match s {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ParseError::InvalidField(other.to_owned())),
    }
}

fn parse_f64(s: &str) -> Result<f64, ParseError> {
    s.parse::<f64>()
        .map_err(|_| ParseError::InvalidField(s.to_owned()))
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::SwitchReply { addr, value, command, .. } => {
                write!(f, "{command} {addr} = {}", *value as u8)
            }
            Reply::LoadReply { addr, level, fade, command, .. } => {
                write!(f, "{command} {addr} level={level} fade={fade:?}")
            }
            Reply::PushEvent { addr, value } => write!(f, "SW {addr} = {}", *value as u8),
            Reply::BareState { value } => write!(f, "bare {}", *value as u8),
        }
    }
}
