use std::sync::Arc;

use chimera::config::Settings;
use chimera::console::{Command, Console};
use chimera::detector::ReportDetector;
use chimera::event_bus::EventBus;
use chimera::modules::{BrainModule, EyeModule};
use chimera::reasoner::OpenAiReasoner;
use chimera::{ControlPlane, ModuleRegistry};
use chimera_protocol::EventKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Chimera");

    let settings = Settings::new().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let bus = Arc::new(EventBus::with_capacity(settings.bus.log_capacity));
    let registry = Arc::new(ModuleRegistry::default());
    let control = ControlPlane::new(bus.clone(), registry.clone(), &settings.bus);

    let eye = EyeModule::new(bus.clone(), registry.clone(), ReportDetector, &settings.eye);
    eye.start();

    match OpenAiReasoner::new(&settings.brain) {
        Some(reasoner) => {
            let interests = settings.brain.interests.iter().filter_map(|kind| {
                kind.parse::<EventKind>()
                    .map_err(|e| warn!(kind = %kind, error = %e, "ignoring brain interest"))
                    .ok()
            });
            let brain = BrainModule::new(bus.clone(), registry.clone(), Arc::new(reasoner))
                .with_interests(interests);
            Arc::new(brain).start();
        }
        None => warn!("Brain not started: no OpenAI API key configured"),
    }

    // Print every new event as one JSON line
    let mut feed = control.feed();
    tokio::spawn(async move {
        loop {
            for event in feed.recv(100).await {
                match serde_json::to_string(event.as_ref()) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!(error = %e, "failed to serialize event"),
                }
            }
        }
    });

    for module_id in &settings.startup.enabled_modules {
        if let Err(e) = control.enable_module(module_id).await {
            warn!(module_id = %module_id, error = %e, "cannot enable start-up module");
        }
    }

    info!(
        modules = registry.len(),
        subscribers = bus.subscriber_count(),
        "Chimera ready, reading commands from stdin"
    );

    let console = Console::new(control, eye);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => console.execute(command).await,
                    Err(message) => serde_json::json!({ "error": { "type": "validation", "message": message } }),
                };
                println!("{}", reply);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                break;
            }
        }
    }

    info!(events_published = bus.events_published(), "Chimera stopped");
    Ok(())
}
