//! Keyboard commands read from the console

use shared::Intent;

/// One thing the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Move(Intent),
    Quit,
}

/// Maps a single typed token to a command.
///
/// `w` moves up the screen, which is toward smaller `y`.
pub fn parse_command(token: &str) -> Option<Command> {
    match token.trim() {
        "d" => Some(Command::Move(Intent::XPlus)),
        "a" => Some(Command::Move(Intent::XMinus)),
        "w" => Some(Command::Move(Intent::YMinus)),
        "s" => Some(Command::Move(Intent::YPlus)),
        "0" | "q" => Some(Command::Quit),
        _ => None,
    }
}

/// Splits a typed line into commands. Unrecognised tokens come back as `Err`
/// so the caller can report them.
pub fn parse_line(line: &str) -> Vec<Result<Command, String>> {
    line.split_whitespace()
        .map(|token| parse_command(token).ok_or_else(|| token.to_string()))
        .collect()
}

pub const PROMPT: &str = "Enter command (w: y-, s: y+, a: x-, d: x+, 0: exit): ";
