//! The textual command grammar spoken over the link while in command mode.
//!
//! Commands are newline-terminated ASCII, one per line. The chip tolerates
//! unknown commands, so anything that does not look like a known free-form
//! pattern is forwarded verbatim. Malformed `read reg`/`write reg`
//! commands are rejected locally and never transmitted.

use nom::{
    bytes::complete::tag,
    character::complete::one_of,
    combinator::{all_consuming, map},
    error::Error,
    multi::count,
    sequence::preceded,
    Finish, IResult,
};

use std::fmt;
use std::str::FromStr;

/// A validated device command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Begin streaming; flips the link into streaming mode.
    Start,
    /// End streaming; flips the link back into command mode.
    Stop,
    /// `read reg NN` — NN is exactly two decimal digits.
    ReadReg(u8),
    /// `write reg NN HHHH` — HHHH is exactly four lowercase hex digits.
    WriteReg(u8, u16),
    /// Anything else, forwarded verbatim.
    Raw(String),
}

impl DeviceCommand {
    /// Renders the command the way it goes on the wire: the command text,
    /// a trailing space, and a newline.
    pub fn wire_line(&self) -> String {
        format!("{} \n", self)
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceCommand::Start => write!(f, "start"),
            DeviceCommand::Stop => write!(f, "stop"),
            DeviceCommand::ReadReg(reg) => write!(f, "read reg {:02}", reg),
            DeviceCommand::WriteReg(reg, val) => write!(f, "write reg {:02} {:04x}", reg, val),
            DeviceCommand::Raw(text) => write!(f, "{}", text),
        }
    }
}

/// Returned when a command matches the shape of `read reg`/`write reg`
/// but fails the grammar; such commands are rejected before transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFormatError {
    /// The offending command text.
    pub input: String,
}

impl fmt::Display for CommandFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "malformed command {:?}: expected \"read reg NN\" or \"write reg NN HHHH\" \
             (NN two decimal digits, HHHH four lowercase hex digits)",
            self.input
        )
    }
}

impl std::error::Error for CommandFormatError {}

fn parse_reg_num(s: &str) -> IResult<&str, u8> {
    map(count(one_of("0123456789"), 2), |ds: Vec<char>| {
        ds.into_iter().collect::<String>().parse().expect("two digits")
    })(s)
}

fn parse_hex_word(s: &str) -> IResult<&str, u16> {
    map(count(one_of("0123456789abcdef"), 4), |cs: Vec<char>| {
        let word: String = cs.into_iter().collect();
        u16::from_str_radix(&word, 16).expect("four hex digits")
    })(s)
}

fn parse_read_reg(s: &str) -> IResult<&str, DeviceCommand> {
    map(
        all_consuming(preceded(tag("read reg "), parse_reg_num)),
        DeviceCommand::ReadReg,
    )(s)
}

fn parse_write_reg(s: &str) -> IResult<&str, DeviceCommand> {
    map(
        all_consuming(preceded(
            tag("write reg "),
            nom::sequence::separated_pair(parse_reg_num, tag(" "), parse_hex_word),
        )),
        |(reg, val)| DeviceCommand::WriteReg(reg, val),
    )(s)
}

impl FromStr for DeviceCommand {
    type Err = CommandFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "start" => return Ok(DeviceCommand::Start),
            "stop" => return Ok(DeviceCommand::Stop),
            _ => {}
        }

        if s.starts_with("read reg") {
            return match parse_read_reg(s).finish() {
                Ok((_, cmd)) => Ok(cmd),
                Err(Error { .. }) => Err(CommandFormatError {
                    input: s.to_owned(),
                }),
            };
        }

        if s.starts_with("write reg") {
            return match parse_write_reg(s).finish() {
                Ok((_, cmd)) => Ok(cmd),
                Err(Error { .. }) => Err(CommandFormatError {
                    input: s.to_owned(),
                }),
            };
        }

        Ok(DeviceCommand::Raw(s.to_owned()))
    }
}
