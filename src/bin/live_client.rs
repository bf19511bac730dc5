//! Live Session Client
//!
//! Talks to the model from the terminal: microphone and speaker through cpal,
//! typed lines as text turns, an optional still image as the camera.
//!
//! Usage: `live-client [config.toml] [--image <path>]`

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_media_session::{
    audio::device::list_devices,
    config::AppConfig,
    error::ToolError,
    session::{DeviceKind, Session, SessionDeps, SessionEvent, SessionHandle, SessionOptions},
    tools::ToolDispatcher,
    video::StillImageSource,
};

struct Args {
    config: Option<PathBuf>,
    image: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        image: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--image" => {
                let path = iter.next().context("--image needs a path")?;
                args.image = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            path => args.config = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

/// Parameter names a declaration marks as required
fn required_params(decl: &Value) -> Vec<String> {
    decl.pointer("/parameters/required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Answer every declared function with its own arguments plus a status.
/// Calls missing a required parameter are answered with an error.
fn register_ack_handlers(tools: &ToolDispatcher, declarations: &[Value]) {
    for decl in declarations {
        let Some(name) = decl.get("name").and_then(Value::as_str) else {
            continue;
        };
        let tool = name.to_string();
        let required = required_params(decl);
        tools.register_fn(name, move |mut args| {
            let tool = tool.clone();
            let missing: Vec<String> = required
                .iter()
                .filter(|param| !args.contains_key(param.as_str()))
                .cloned()
                .collect();
            async move {
                if !missing.is_empty() {
                    return Err(ToolError::InvalidArguments(format!(
                        "missing {}",
                        missing.join(", ")
                    )));
                }
                tracing::info!("Tool '{}' called with {:?}", tool, args);
                args.insert("status".into(), Value::from("acknowledged"));
                Ok(Value::Object(args))
            }
        });
    }
}

fn print_devices() {
    println!("\n=== Audio Devices ===");
    for device in list_devices() {
        let kind = if device.is_input { "in " } else { "out" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  [{}] {}{}", kind, device.name, default_marker);
        println!("        ID: {}", device.id);
        println!("        Sample rates: {:?}", device.sample_rates);
        println!("        Channels: {:?}", device.channels);
    }
    println!();
}

/// Capture state as last reported by the session
#[derive(Debug, Default)]
struct CaptureState {
    mic_on: bool,
    cam_on: bool,
}

impl CaptureState {
    fn observe(&mut self, event: &SessionEvent) {
        if let SessionEvent::CaptureChanged { device, active } = event {
            match device {
                DeviceKind::Microphone => self.mic_on = *active,
                DeviceKind::Camera => self.cam_on = *active,
                DeviceKind::Speaker => {}
            }
        }
    }
}

/// Returns false when the user asked to quit
fn handle_line(line: &str, session: &SessionHandle, capture: &CaptureState) -> Result<bool> {
    let line = line.trim();
    match line {
        "" => {}
        "/quit" => return Ok(false),
        "/mic" if capture.mic_on => session.stop_microphone()?,
        "/mic" => session.start_microphone()?,
        "/cam" if capture.cam_on => session.stop_camera()?,
        "/cam" => session.start_camera()?,
        _ if line.starts_with("/volume ") => {
            let volume: f32 = line["/volume ".len()..]
                .trim()
                .parse()
                .context("volume must be a number between 0 and 1")?;
            session.set_volume(volume)?;
        }
        _ if line.starts_with('/') => {
            println!("Commands: /mic, /cam, /volume <0..1>, /quit");
        }
        text => session.send_text(text, true)?,
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting live session client");

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };
    let url = config.endpoint_url()?;

    print_devices();

    let mut deps = SessionDeps::from_config(&config);
    register_ack_handlers(&deps.tools, &config.session.setup.function_declarations);
    if let Some(path) = &args.image {
        deps.video = Some(Arc::new(StillImageSource::open(path)?));
    }

    let options = SessionOptions::from_config(&config, url);
    let mut capture = CaptureState::default();
    let (session, mut events) = Session::connect(options, deps);

    println!("Type a message and press Enter. Commands: /mic, /cam, /volume <0..1>, /quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            notification = events.recv() => {
                let Some(notification) = notification else { break };
                capture.observe(&notification.event);
                match notification.event {
                    SessionEvent::Text { text } => println!("model: {}", text),
                    SessionEvent::TurnComplete => println!("--- turn complete ---"),
                    SessionEvent::Interrupted => println!("--- interrupted ---"),
                    SessionEvent::SetupComplete => println!("Connected."),
                    SessionEvent::ToolCall { invocations } => {
                        for call in invocations {
                            println!("tool call: {} {:?}", call.name, call.args);
                        }
                    }
                    SessionEvent::CaptureChanged { device, active } => {
                        println!("{} {}", device, if active { "on" } else { "off" });
                    }
                    SessionEvent::DeviceError { device, message } => {
                        println!("{} error: {}", device, message);
                    }
                    SessionEvent::ProtocolError { message } => {
                        tracing::warn!("Protocol error: {}", message);
                    }
                    SessionEvent::Disconnected { reason } => {
                        println!("{}", reason);
                        break;
                    }
                    other => tracing::debug!("{:?}", other),
                }
            }

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    match handle_line(&line, &session, &capture) {
                        Ok(true) => {}
                        Ok(false) => {
                            let _ = session.disconnect();
                        }
                        Err(e) => println!("{}", e),
                    }
                }
                Ok(None) => {
                    stdin_open = false;
                    let _ = session.disconnect();
                }
                Err(e) => {
                    tracing::error!("stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    session.closed().await;
    tracing::info!("Client stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_media_session::protocol::ToolInvocation;
    use serde_json::json;

    #[test]
    fn test_capture_flags_follow_session_reports() {
        let mut capture = CaptureState::default();

        // A failed start never reports the device as on
        capture.observe(&SessionEvent::DeviceError {
            device: DeviceKind::Microphone,
            message: "busy".into(),
        });
        assert!(!capture.mic_on);

        capture.observe(&SessionEvent::CaptureChanged {
            device: DeviceKind::Microphone,
            active: true,
        });
        // A stream error while running leaves it on
        capture.observe(&SessionEvent::DeviceError {
            device: DeviceKind::Microphone,
            message: "overrun".into(),
        });
        assert!(capture.mic_on);
        assert!(!capture.cam_on);

        capture.observe(&SessionEvent::CaptureChanged {
            device: DeviceKind::Microphone,
            active: false,
        });
        assert!(!capture.mic_on);
    }

    #[tokio::test]
    async fn test_ack_handler_checks_required_params() {
        let tools = ToolDispatcher::default();
        let decl = json!({
            "name": "get_distance",
            "parameters": {"type": "object", "required": ["target"]}
        });
        register_ack_handlers(&tools, &[decl]);

        let call = |id: &str, args: Value| ToolInvocation {
            id: id.to_string(),
            name: "get_distance".to_string(),
            args: args.as_object().cloned().unwrap_or_default(),
        };
        let results = tools
            .dispatch(vec![call("1", json!({"target": "door"})), call("2", json!({}))])
            .await;

        assert_eq!(results[0].output["status"], "acknowledged");
        assert_eq!(results[0].output["target"], "door");
        assert_eq!(results[1].output["status"], "error");
        assert!(results[1].output["error"]
            .as_str()
            .unwrap()
            .contains("missing target"));
    }
}
