use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::task::JoinHandle;

use whitetail_core::api::v1::{self, ApiState, CommandStatus};
use whitetail_core::env::ProcessEnv;
use whitetail_core::geo::{parse_path, parse_point};
use whitetail_core::media::to_data_url;
use whitetail_core::models::{ChatMessage, MapBounds, Role};
use whitetail_core::session::{ChatController, SWITCH_WARNING};

const HELP: &str = "\
Type a message to chat with Dr. Whitetail.
  /provider [id]              list providers or switch (gemini, openai, claude)
  /think [on|off]             toggle deep analysis
  /predict                    score the latest plan
  /image <path> [prompt]      send a photo with an optional prompt
  /location <lat,lng>|clear   set or clear your location
  /boundary <lat,lng;...>|clear
                              draw or clear a property boundary
  /map [toggle|show|view N,S,E,W]
                              deer density overlay
  /events [n]                 recent diagnostics
  /help                       this text
  /quit                       exit";

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let state = ApiState::from_env(&ProcessEnv).context("failed to initialise Whitetail")?;
    log::info!(
        target: "app",
        "Whitetail ready with {} provider(s)",
        state.list_providers().len()
    );
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    for message in state.active_session().messages {
        print_message(&message);
    }
    println!("(/help for commands)");

    loop {
        prompt(&format!("{}> ", state.active_session().active_provider)).await?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        let result = match command {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/provider" => provider(&state, rest, &mut input).await,
            "/think" => think(&state, rest),
            "/predict" => predict(&state).await,
            "/image" => image(&state, rest).await,
            "/location" => location(&state, rest),
            "/boundary" => boundary(&state, rest),
            "/map" => map(&state, rest).await,
            "/events" => events(&state, rest),
            other if other.starts_with('/') => Err(anyhow!("unknown command {other}, try /help")),
            _ => send(&state, line, None).await,
        };
        if let Err(err) = result {
            eprintln!("error: {err:#}");
        }
    }
    Ok(())
}

async fn prompt(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

fn print_message(message: &ChatMessage) {
    let who = match message.role {
        Role::User => "you",
        Role::Model => "Dr. Whitetail",
        Role::System => "system",
    };
    let marker = if message.is_error { " (!)" } else { "" };
    println!("\n[{who}{marker}] {}", message.text);
    for source in message.sources.iter().flatten() {
        println!("  source: {} <{}>", source.title, source.uri);
    }
    if let Some(prediction) = &message.prediction {
        println!(
            "  success: {:.0}% ({:?} confidence) {}",
            prediction.probability, prediction.confidence, prediction.reasoning
        );
    }
    println!();
}

/// Echo loading-status changes while a request is in flight.
fn watch_status(controller: Arc<ChatController>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = String::new();
        let mut ticker = tokio::time::interval(Duration::from_millis(150));
        loop {
            ticker.tick().await;
            let current = controller.loading_message();
            if !current.is_empty() && current != last {
                println!("  ... {current}");
            }
            last = current;
        }
    })
}

async fn send(state: &ApiState, text: &str, image: Option<String>) -> Result<()> {
    let status = watch_status(state.controller.clone());
    let output = state
        .send_message(v1::SendMessageInput {
            prompt: text.to_string(),
            image,
        })
        .await;
    status.abort();
    match (output.status, output.message) {
        (CommandStatus::Empty, _) => println!("Nothing to send."),
        (CommandStatus::Busy, _) => println!("Still working on the previous request."),
        (_, Some(message)) => print_message(&message),
        (_, None) => {}
    }
    Ok(())
}

async fn provider(state: &ApiState, rest: &str, input: &mut Input) -> Result<()> {
    let active = state.active_session().active_provider;
    if rest.is_empty() {
        for info in state.list_providers() {
            let marker = if info.id == active { "*" } else { " " };
            let key = if info.has_credentials { "" } else { " (no API key)" };
            println!(
                "{marker} {:<7} {} [{} / {}]{key}",
                info.id.id(),
                info.display_name,
                info.models.fast,
                info.models.thinking
            );
        }
        return Ok(());
    }
    let Some(next) = state.switch_target(rest).map_err(|e| anyhow!(e))? else {
        println!("{} is already active.", active.label());
        return Ok(());
    };

    println!("{SWITCH_WARNING}");
    prompt("Continue? [y/N] ").await?;
    let answer = input.next_line().await?.unwrap_or_default();
    let confirmed = matches!(answer.trim().to_lowercase().as_str(), "y" | "yes");
    let snapshot = state
        .switch_provider(v1::SwitchProviderInput {
            provider: next.id().to_string(),
            confirmed,
        })
        .map_err(|e| anyhow!(e))?;
    if snapshot.active_provider == active {
        println!("Staying with {}.", active.label());
        return Ok(());
    }
    println!("Now talking to {}.", snapshot.provider_label);
    for message in &snapshot.messages {
        print_message(message);
    }
    Ok(())
}

fn think(state: &ApiState, rest: &str) -> Result<()> {
    let enabled = match rest {
        "" => !state.active_session().thinking_mode,
        "on" => true,
        "off" => false,
        other => return Err(anyhow!("expected on or off, got {other}")),
    };
    let enabled = state.set_thinking_mode(enabled);
    println!("Deep analysis {}.", if enabled { "on" } else { "off" });
    Ok(())
}

async fn predict(state: &ApiState) -> Result<()> {
    let session = state.active_session();
    let target = session
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Model && !m.is_error)
        .ok_or_else(|| anyhow!("no plan to score yet"))?;
    let output = state
        .request_prediction(v1::PredictionInput {
            message_id: target.id.clone(),
            plan: target.text.clone(),
        })
        .await;
    match (output.status, output.prediction, output.message) {
        (CommandStatus::Busy, _, _) => println!("Still working on the previous request."),
        (_, Some(p), _) => println!(
            "Success probability {:.0}% ({:?} confidence)\n{}",
            p.probability, p.confidence, p.reasoning
        ),
        (_, None, Some(message)) => print_message(&message),
        _ => {}
    }
    Ok(())
}

fn mime_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        other => Err(anyhow!("unsupported image type `{other}`")),
    }
}

async fn image(state: &ApiState, rest: &str) -> Result<()> {
    let (path, text) = match rest.split_once(char::is_whitespace) {
        Some((path, text)) => (path, text.trim()),
        None => (rest, ""),
    };
    if path.is_empty() {
        return Err(anyhow!("usage: /image <path> [prompt]"));
    }
    let path = Path::new(path);
    let mime = mime_for(path)?;
    let bytes = std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
    send(state, text, Some(to_data_url(mime, &bytes))).await
}

fn location(state: &ApiState, rest: &str) -> Result<()> {
    let location = match rest {
        "" => return Err(anyhow!("usage: /location <lat,lng>|clear")),
        "clear" => None,
        point => Some(parse_point(point)?),
    };
    state
        .set_location(v1::SetLocationInput {
            location,
            error: None,
        })
        .map_err(|e| anyhow!(e))?;
    println!("Location saved; it applies to conversations started from now on.");
    Ok(())
}

fn boundary(state: &ApiState, rest: &str) -> Result<()> {
    let path = match rest {
        "" => return Err(anyhow!("usage: /boundary <lat,lng;lat,lng;...>|clear")),
        "clear" => None,
        path => Some(parse_path(path)?),
    };
    match state.update_boundary(path).map_err(|e| anyhow!(e))? {
        Some(boundary) => println!("Boundary saved: {:.2} acres.", boundary.area_acres),
        None => println!("Boundary cleared."),
    }
    Ok(())
}

fn parse_bounds(input: &str) -> Result<MapBounds> {
    let values = input
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .context("bounds must be four numbers: north,south,east,west")?;
    let [north, south, east, west] = values[..] else {
        return Err(anyhow!("bounds must be four numbers: north,south,east,west"));
    };
    Ok(MapBounds {
        north,
        south,
        east,
        west,
    })
}

async fn map(state: &ApiState, rest: &str) -> Result<()> {
    let (action, args) = match rest.split_once(char::is_whitespace) {
        Some((action, args)) => (action, args.trim()),
        None => (rest, ""),
    };
    match action {
        "toggle" => {
            let view = state.toggle_deer_layer().await;
            println!("Deer layer {}.", if view.visible { "visible" } else { "hidden" });
        }
        "view" => {
            state.viewport_idle(parse_bounds(args)?).map_err(|e| anyhow!(e))?;
            println!("Viewport updated.");
        }
        "" | "show" => {
            let view = state.layer_view();
            println!(
                "Deer layer ({}, {}): {} hotspots, {} corridors{}",
                view.provider.label(),
                if view.visible { "visible" } else { "hidden" },
                view.data.hotspots.len(),
                view.data.corridors.len(),
                if view.loading { ", loading" } else { "" }
            );
            for spot in &view.data.hotspots {
                println!("  hotspot {:.5}, {:.5} weight {:.1}", spot.lat, spot.lng, spot.weight);
            }
        }
        other => return Err(anyhow!("unknown map action {other}")),
    }
    Ok(())
}

fn events(state: &ApiState, rest: &str) -> Result<()> {
    let limit = if rest.is_empty() { None } else { Some(rest.parse()?) };
    for event in state.list_events(limit) {
        let data = event
            .data
            .as_ref()
            .map(serde_json::Value::to_string)
            .unwrap_or_default();
        println!(
            "{} {:?} {} [{}] {} {data}",
            event.ts,
            event.level,
            event.module,
            event.code.as_deref().unwrap_or("-"),
            event.message
        );
    }
    Ok(())
}
