use teloxide::utils::command::BotCommands;

use crate::scheduler::delayed::MAX_DELAY_SECS;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Available commands:")]
pub enum Command {
    #[command(description = "register and show the menu")]
    Start,
    #[command(description = "send a message to every user")]
    Write(String),
    #[command(description = "send the staged message file to every user")]
    Broadcast,
    #[command(description = "show the number of users")]
    Stats,
    #[command(description = "send a message to every user after a delay: <seconds> <message>")]
    SetTimer(String),
    #[command(description = "list every known user")]
    Users,
}

impl Command {
    /// Everything except `/start` is for the administrator only
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::Start)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimerArgsError {
    #[error("expected a delay and a message")]
    Missing,
    #[error("delay must be a whole number of seconds, at most one year")]
    InvalidDelay,
    #[error("expected a message after the delay")]
    MissingBody,
}

/// Split `/set_timer` arguments into `(delay_seconds, body)`.
pub fn parse_timer_args(args: &str) -> Result<(u64, String), TimerArgsError> {
    let mut parts = args.split_whitespace();
    let Some(delay) = parts.next() else {
        return Err(TimerArgsError::Missing);
    };
    let Some(first_word) = parts.next() else {
        return Err(TimerArgsError::MissingBody);
    };

    let delay = delay
        .parse::<u64>()
        .ok()
        .filter(|&secs| secs <= MAX_DELAY_SECS)
        .ok_or(TimerArgsError::InvalidDelay)?;

    let body = std::iter::once(first_word)
        .chain(parts)
        .collect::<Vec<_>>()
        .join(" ");
    Ok((delay, body))
}
