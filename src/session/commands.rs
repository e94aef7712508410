use thiserror::Error;

use crate::{
    db::Database,
    settings::SettingsStore,
    sink::CurrentUser,
    surface::{Direction, TouchControl},
};

use super::{controller::SessionSnapshot, GameProfile, RewardConfig, SessionController};

pub const HELP: &str = "\
commands:
  start                     begin a session
  input                     any qualifying activity
  key <dir|a|b> [up]        touch control (dir: up, down, left, right)
  msg <json>                raw message from the game surface
  kill [n] | score <n> | collect [n]
  cashout | gameover | restart
  dismiss                   close the current result or finished ad
  status                    print the current snapshot
  history [n]               recent sessions from the ledger
  login <user-id> | logout  who earned rewards are credited to
  profile <json>            save a reward config override for this game
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Input,
    Key(TouchControl),
    Message(String),
    Kill(u64),
    Score(u64),
    Collect(u64),
    CashOut,
    GameOver,
    Restart,
    Dismiss,
    Status,
    History(usize),
    Login(String),
    Logout,
    Profile(String),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("{command}: {reason}")]
    InvalidArgument {
        command: &'static str,
        reason: String,
    },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        match head.to_ascii_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            "start" => Ok(Command::Start),
            "input" | "tap" => Ok(Command::Input),
            "key" => parse_key(rest).map(Command::Key),
            "msg" => required_text("msg", rest, "expected a JSON message").map(Command::Message),
            "login" => {
                if rest.split_whitespace().count() == 1 {
                    Ok(Command::Login(rest.to_string()))
                } else {
                    Err(CommandError::InvalidArgument {
                        command: "login",
                        reason: "expected a single user id".into(),
                    })
                }
            }
            "logout" => Ok(Command::Logout),
            "profile" => {
                required_text("profile", rest, "expected a JSON reward config").map(Command::Profile)
            }
            "kill" => parse_count("kill", rest, 1).map(Command::Kill),
            "score" => parse_required("score", rest).map(Command::Score),
            "collect" => parse_count("collect", rest, 1).map(Command::Collect),
            "cashout" | "cash-out" => Ok(Command::CashOut),
            "gameover" | "game-over" => Ok(Command::GameOver),
            "restart" => Ok(Command::Restart),
            "dismiss" => Ok(Command::Dismiss),
            "status" => Ok(Command::Status),
            "history" => parse_count("history", rest, 10).map(|n| Command::History(n as usize)),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_key(rest: &str) -> Result<TouchControl, CommandError> {
    let mut parts = rest.split_whitespace();
    let Some(button) = parts.next() else {
        return Err(CommandError::InvalidArgument {
            command: "key",
            reason: "expected a direction, 'a' or 'b'".into(),
        });
    };
    let pressed = match parts.next() {
        None | Some("down") => true,
        Some("up") => false,
        Some(other) => {
            return Err(CommandError::InvalidArgument {
                command: "key",
                reason: format!("expected 'up' or 'down', got '{other}'"),
            })
        }
    };

    let control = match button.to_ascii_lowercase().as_str() {
        "a" => TouchControl::Primary { pressed },
        "b" => TouchControl::Secondary { pressed },
        "up" => TouchControl::Direction {
            direction: Direction::Up,
            pressed,
        },
        "down" => TouchControl::Direction {
            direction: Direction::Down,
            pressed,
        },
        "left" => TouchControl::Direction {
            direction: Direction::Left,
            pressed,
        },
        "right" => TouchControl::Direction {
            direction: Direction::Right,
            pressed,
        },
        other => {
            return Err(CommandError::InvalidArgument {
                command: "key",
                reason: format!("unknown button '{other}'"),
            })
        }
    };
    Ok(control)
}

fn required_text(
    command: &'static str,
    rest: &str,
    reason: &str,
) -> Result<String, CommandError> {
    if rest.is_empty() {
        Err(CommandError::InvalidArgument {
            command,
            reason: reason.into(),
        })
    } else {
        Ok(rest.to_string())
    }
}

fn parse_count(command: &'static str, rest: &str, default: u64) -> Result<u64, CommandError> {
    if rest.is_empty() {
        return Ok(default);
    }
    parse_required(command, rest)
}

fn parse_required(command: &'static str, rest: &str) -> Result<u64, CommandError> {
    rest.parse().map_err(|_| CommandError::InvalidArgument {
        command,
        reason: format!("expected a non-negative number, got '{rest}'"),
    })
}

/// What the terminal should print after a command.
#[derive(Debug)]
pub enum Reply {
    Snapshot(Box<SessionSnapshot>),
    Text(String),
    Quit,
}

pub async fn run_command(
    controller: &SessionController,
    ledger: Option<&Database>,
    settings: Option<&SettingsStore>,
    command: Command,
) -> Result<Reply, String> {
    match command {
        Command::Start => controller
            .start()
            .await
            .map(|snapshot| Reply::Snapshot(Box::new(snapshot)))
            .map_err(|e| e.to_string()),
        Command::Input => {
            let outcome = controller.record_activity().await;
            Ok(Reply::Text(format!("{outcome:?}")))
        }
        Command::Key(control) => {
            let outcome = controller.handle_input(control).await;
            Ok(Reply::Text(format!("{outcome:?}")))
        }
        Command::Message(raw) => {
            controller.handle_surface_message(&raw).await;
            Ok(Reply::Snapshot(Box::new(controller.snapshot().await)))
        }
        Command::Kill(count) => controller
            .record_event(count)
            .await
            .map(|hit| Reply::Text(describe_hit(hit)))
            .map_err(|e| e.to_string()),
        Command::Score(delta) => controller
            .record_score(delta)
            .await
            .map(|hit| Reply::Text(describe_hit(hit)))
            .map_err(|e| e.to_string()),
        Command::Collect(count) => controller
            .record_collected(count)
            .await
            .map(|total| Reply::Text(format!("{total} collected")))
            .map_err(|e| e.to_string()),
        Command::CashOut => controller
            .cash_out()
            .await
            .map(|snapshot| Reply::Snapshot(Box::new(snapshot)))
            .map_err(|e| e.to_string()),
        Command::GameOver => controller
            .game_over()
            .await
            .map(|snapshot| Reply::Snapshot(Box::new(snapshot)))
            .map_err(|e| e.to_string()),
        Command::Restart => controller
            .restart()
            .await
            .map(|snapshot| Reply::Snapshot(Box::new(snapshot)))
            .map_err(|e| e.to_string()),
        Command::Dismiss => controller
            .dismiss()
            .await
            .map(|_| Reply::Text("dismissed".into()))
            .map_err(|e| e.to_string()),
        Command::Status => Ok(Reply::Snapshot(Box::new(controller.snapshot().await))),
        Command::History(limit) => {
            let Some(db) = ledger else {
                return Err("no session ledger configured".into());
            };
            let sessions = db
                .list_sessions_paginated(limit, 0)
                .await
                .map_err(|e| e.to_string())?;
            let lines: Vec<String> = sessions
                .iter()
                .map(|s| {
                    format!(
                        "{} {} {:<10} {}s {} pts flush={}",
                        s.started_at.format("%Y-%m-%d %H:%M"),
                        s.game,
                        s.status.as_str(),
                        s.elapsed_active_secs,
                        s.pending_reward,
                        s.flush_status.as_str()
                    )
                })
                .collect();
            Ok(Reply::Text(if lines.is_empty() {
                "no sessions yet".into()
            } else {
                lines.join("\n")
            }))
        }
        Command::Login(user_id) => {
            if let Some(settings) = settings {
                settings
                    .update_user_id(Some(user_id.clone()))
                    .map_err(|e| e.to_string())?;
            }
            controller
                .set_user(Some(CurrentUser::new(user_id.clone())))
                .await;
            Ok(Reply::Text(format!("signed in as {user_id}")))
        }
        Command::Logout => {
            if let Some(settings) = settings {
                settings.update_user_id(None).map_err(|e| e.to_string())?;
            }
            controller.set_user(None).await;
            Ok(Reply::Text("signed out; playing as guest".into()))
        }
        Command::Profile(raw) => {
            let Some(settings) = settings else {
                return Err("no settings store configured".into());
            };
            let profile = GameProfile::parse(&controller.config().game).map_err(|e| e.to_string())?;
            let mut config: RewardConfig = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
            config.game = profile.as_str().to_string();
            settings
                .update_profile(profile, config)
                .map_err(|e| e.to_string())?;
            Ok(Reply::Text(format!(
                "saved {} profile; it applies from the next launch",
                profile.as_str()
            )))
        }
        Command::Help => Ok(Reply::Text(HELP.into())),
        Command::Quit => Ok(Reply::Quit),
    }
}

fn describe_hit(hit: Option<super::accrual::MilestoneHit>) -> String {
    match hit {
        Some(hit) if hit.truncated() => format!(
            "milestone: +{} of {} (cap reached, {} pending)",
            hit.granted, hit.requested, hit.pending
        ),
        Some(hit) => format!("milestone: +{} ({} pending)", hit.granted, hit.pending),
        None => "ok".into(),
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc, time::Duration};

    use super::*;
    use crate::{events::EventBus, sink::HttpRewardSink, surface::NullSurface};

    #[test]
    fn parses_simple_commands() {
        assert_eq!(Command::parse("start"), Ok(Command::Start));
        assert_eq!(Command::parse("  CashOut "), Ok(Command::CashOut));
        assert_eq!(Command::parse("game-over"), Ok(Command::GameOver));
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
        assert_eq!(Command::parse(""), Err(CommandError::Empty));
        assert!(matches!(
            Command::parse("jump"),
            Err(CommandError::Unknown(name)) if name == "jump"
        ));
    }

    #[test]
    fn parses_counts_with_defaults() {
        assert_eq!(Command::parse("kill"), Ok(Command::Kill(1)));
        assert_eq!(Command::parse("kill 3"), Ok(Command::Kill(3)));
        assert_eq!(Command::parse("collect 12"), Ok(Command::Collect(12)));
        assert_eq!(Command::parse("history"), Ok(Command::History(10)));
        assert_eq!(Command::parse("score 100"), Ok(Command::Score(100)));
        assert!(Command::parse("score").is_err());
        assert!(Command::parse("kill -2").is_err());
    }

    #[test]
    fn parses_touch_controls() {
        assert_eq!(
            Command::parse("key left"),
            Ok(Command::Key(TouchControl::Direction {
                direction: Direction::Left,
                pressed: true
            }))
        );
        assert_eq!(
            Command::parse("key a up"),
            Ok(Command::Key(TouchControl::Primary { pressed: false }))
        );
        assert_eq!(
            Command::parse("key B"),
            Ok(Command::Key(TouchControl::Secondary { pressed: true }))
        );
        assert!(Command::parse("key").is_err());
        assert!(Command::parse("key z").is_err());
        assert!(Command::parse("key a sideways").is_err());
    }

    #[test]
    fn parses_account_commands() {
        assert_eq!(Command::parse("login u-7"), Ok(Command::Login("u-7".into())));
        assert_eq!(Command::parse("logout"), Ok(Command::Logout));
        assert!(Command::parse("login").is_err());
        assert!(Command::parse("login a b").is_err());
        assert!(Command::parse("profile").is_err());
    }

    fn guest_controller() -> SessionController {
        let sink = HttpRewardSink::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        SessionController::new(
            GameProfile::Mario.reward_config(),
            None,
            Arc::new(sink),
            Arc::new(NullSurface),
            EventBus::new(),
        )
        .unwrap()
    }

    fn temp_settings() -> (SettingsStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("arcade-rewards-cmd-{}", uuid::Uuid::new_v4()));
        let store = SettingsStore::new(dir.join("settings.json")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn login_persists_and_applies_to_the_controller() {
        let controller = guest_controller();
        let (settings, dir) = temp_settings();

        run_command(&controller, None, Some(&settings), Command::Login("u-7".into()))
            .await
            .unwrap();
        assert_eq!(controller.user().await, Some(CurrentUser::new("u-7")));
        assert_eq!(settings.user_id().as_deref(), Some("u-7"));

        run_command(&controller, None, Some(&settings), Command::Logout)
            .await
            .unwrap();
        assert_eq!(controller.user().await, None);
        assert_eq!(settings.user_id(), None);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn profile_override_is_validated_and_saved_for_the_current_game() {
        let controller = guest_controller();
        let (settings, dir) = temp_settings();

        let raw = r#"{"game":"ignored","afkThresholdSecs":20,"milestone":{"kind":"time","everySecs":60,"reward":1}}"#;
        run_command(&controller, None, Some(&settings), Command::Profile(raw.into()))
            .await
            .unwrap();
        let saved = settings.reward_config(GameProfile::Mario);
        assert_eq!(saved.game, "mario");
        assert_eq!(saved.afk_threshold_secs, 20);

        let too_long = r#"{"game":"mario","afkThresholdSecs":20,"endingSecs":18446744073709551615,"milestone":{"kind":"time","everySecs":60,"reward":1}}"#;
        assert!(
            run_command(&controller, None, Some(&settings), Command::Profile(too_long.into()))
                .await
                .is_err()
        );
        assert!(run_command(&controller, None, None, Command::Profile(raw.into()))
            .await
            .is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn message_keeps_raw_json() {
        assert_eq!(
            Command::parse(r#"msg {"type":"score","delta":100}"#),
            Ok(Command::Message(r#"{"type":"score","delta":100}"#.into()))
        );
        assert!(Command::parse("msg").is_err());
    }
}
