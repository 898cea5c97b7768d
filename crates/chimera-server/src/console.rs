//! Line-oriented console transport.
//!
//! One command per line, one JSON reply per command:
//!
//! ```text
//! modules
//! toggle <module_id>
//! logs [limit]
//! publish <json event request>
//! frame <base64 frame>
//! ```

use std::str::FromStr;
use std::sync::Arc;

use chimera_protocol::{Event, EventRequest};
use serde_json::{json, Value};

use crate::control::ControlPlane;
use crate::error::ChimeraError;
use crate::modules::{DetectionOutcome, EyeModule};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Modules,
    Toggle(String),
    Logs(Option<usize>),
    Publish(String),
    Frame(String),
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        match name {
            "modules" => Ok(Command::Modules),
            "toggle" if !rest.is_empty() => Ok(Command::Toggle(rest.to_string())),
            "toggle" => Err("usage: toggle <module_id>".to_string()),
            "logs" if rest.is_empty() => Ok(Command::Logs(None)),
            "logs" => rest
                .parse()
                .map(|limit| Command::Logs(Some(limit)))
                .map_err(|_| format!("invalid limit '{}'", rest)),
            "publish" if !rest.is_empty() => Ok(Command::Publish(rest.to_string())),
            "publish" => Err("usage: publish <json>".to_string()),
            "frame" if !rest.is_empty() => Ok(Command::Frame(rest.to_string())),
            "frame" => Err("usage: frame <base64>".to_string()),
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}

pub struct Console {
    control: ControlPlane,
    eye: Arc<EyeModule>,
}

impl Console {
    pub fn new(control: ControlPlane, eye: Arc<EyeModule>) -> Self {
        Self { control, eye }
    }

    /// Execute one command and render its reply.
    pub async fn execute(&self, command: Command) -> Value {
        match command {
            Command::Modules => json!({ "modules": self.control.list_modules() }),
            Command::Toggle(id) => match self.control.toggle_module(&id).await {
                Ok(module) => json!({ "module": module }),
                Err(e) => error_reply(&e),
            },
            Command::Logs(limit) => match self.control.recent_events(limit) {
                Ok(events) => {
                    let events: Vec<&Event> = events.iter().map(|e| e.as_ref()).collect();
                    json!({ "events": events })
                }
                Err(e) => error_reply(&e),
            },
            Command::Publish(body) => {
                let request: EventRequest = match serde_json::from_str(&body) {
                    Ok(request) => request,
                    Err(e) => {
                        return json!({
                            "error": { "type": "validation", "message": format!("Invalid JSON: {}", e) }
                        })
                    }
                };
                match self.control.publish(request).await {
                    Ok(event) => json!({ "published": event }),
                    Err(e) => error_reply(&e),
                }
            }
            Command::Frame(frame) => match self.eye.process_frame(&frame).await {
                DetectionOutcome::Disabled => json!({ "frame": "dropped", "reason": "eye disabled" }),
                DetectionOutcome::Published(result) => json!({ "frame": "published", "result": result }),
                DetectionOutcome::Suppressed(result) => json!({ "frame": "suppressed", "result": result }),
                DetectionOutcome::Degraded(error_type) => json!({ "frame": "degraded", "error_type": error_type }),
            },
            Command::Help => json!({
                "commands": ["modules", "toggle <id>", "logs [limit]", "publish <json>", "frame <base64>", "quit"]
            }),
            Command::Quit => json!({ "bye": true }),
        }
    }
}

fn error_reply(e: &ChimeraError) -> Value {
    json!({ "error": { "type": e.error_type(), "message": e.to_string() } })
}
