use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::connection::{ConnectionManager, LinkAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outbound {
    On,
    Off,
    Ping,
}

impl Outbound {
    pub fn as_frame(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Ping => "PING",
        }
    }

    pub fn for_switch(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    State(bool),
    Pong,
    Unknown,
}

impl Inbound {
    pub fn parse(frame: &str) -> Self {
        match frame.trim() {
            "STATE:ON" => Self::State(true),
            "STATE:OFF" => Self::State(false),
            "PONG" => Self::Pong,
            _ => Self::Unknown,
        }
    }
}

/// Intents produced by the external voice/NL collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    TurnOn,
    TurnOff,
    Reconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown intent `{0}`")]
pub struct UnknownIntent(pub String);

impl FromStr for Intent {
    type Err = UnknownIntent;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on" | "turn_on" | "turnon" => Ok(Self::TurnOn),
            "off" | "turn_off" | "turnoff" => Ok(Self::TurnOff),
            "reconnect" | "connect" => Ok(Self::Reconnect),
            other => Err(UnknownIntent(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "frame")]
pub enum CommandOutcome {
    Sent(Outbound),
    NotConnected,
    AlreadyInState,
    Connecting,
}

/// Switch protocol on top of the connection manager. The local switch state
/// only follows `STATE:*` pushes from the peer; commands never flip it.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    link: ConnectionManager,
}

impl CommandChannel {
    pub fn new(link: ConnectionManager) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &ConnectionManager {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut ConnectionManager {
        &mut self.link
    }

    pub fn toggle(&mut self) -> (CommandOutcome, Vec<LinkAction>) {
        let frame = Outbound::for_switch(!self.link.switch_on());
        match self.link.send(frame) {
            Some(action) => (CommandOutcome::Sent(frame), vec![action]),
            None => (CommandOutcome::NotConnected, Vec::new()),
        }
    }

    pub fn dispatch(&mut self, intent: Intent, now_ms: u64) -> (CommandOutcome, Vec<LinkAction>) {
        match intent {
            Intent::TurnOn | Intent::TurnOff => {
                if !self.link.is_connected() {
                    return (CommandOutcome::NotConnected, Vec::new());
                }
                let wanted = intent == Intent::TurnOn;
                if self.link.switch_on() == wanted {
                    return (CommandOutcome::AlreadyInState, Vec::new());
                }
                self.toggle()
            }
            Intent::Reconnect => {
                let actions = self.link.connect(now_ms);
                if actions.is_empty() {
                    (CommandOutcome::AlreadyInState, actions)
                } else {
                    (CommandOutcome::Connecting, actions)
                }
            }
        }
    }
}
