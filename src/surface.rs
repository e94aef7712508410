//! The embedded game is a black box. The controller can only listen for its
//! best-effort messages, push synthetic input into it, and ask it for focus.
//! None of these are guaranteed to work.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("game surface is not attached")]
    Detached,
    #[error("game surface rejected {action}: {reason}")]
    Rejected { action: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Input translation adapter in front of the embedded surface.
pub trait GameSurface: Send + Sync {
    fn focus(&self) -> Result<(), SurfaceError>;
    fn send_directional(&self, direction: Direction, pressed: bool) -> Result<(), SurfaceError>;
    fn send_primary(&self, pressed: bool) -> Result<(), SurfaceError>;
    fn send_secondary(&self, pressed: bool) -> Result<(), SurfaceError>;
}

/// Surface for headless use: accepts everything, does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl GameSurface for NullSurface {
    fn focus(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn send_directional(&self, _direction: Direction, _pressed: bool) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn send_primary(&self, _pressed: bool) -> Result<(), SurfaceError> {
        Ok(())
    }

    fn send_secondary(&self, _pressed: bool) -> Result<(), SurfaceError> {
        Ok(())
    }
}

/// On-screen touch control, translated into surface input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "control", rename_all = "camelCase")]
pub enum TouchControl {
    Direction { direction: Direction, pressed: bool },
    Primary { pressed: bool },
    Secondary { pressed: bool },
}

impl TouchControl {
    pub fn dispatch(&self, surface: &dyn GameSurface) -> Result<(), SurfaceError> {
        match *self {
            TouchControl::Direction { direction, pressed } => {
                surface.send_directional(direction, pressed)
            }
            TouchControl::Primary { pressed } => surface.send_primary(pressed),
            TouchControl::Secondary { pressed } => surface.send_secondary(pressed),
        }
    }
}

/// Messages the embedded game posts across the frame boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SurfaceMessage {
    Activity,
    GameOver,
    Kill {
        #[serde(default = "one")]
        count: u64,
    },
    Score { delta: u64 },
    Collect {
        #[serde(default = "one")]
        count: u64,
    },
}

fn one() -> u64 {
    1
}

impl SurfaceMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
