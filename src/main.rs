use clap::Parser;
use std::io;
use tracing_subscriber::EnvFilter;

use diwan_chat::analysis::RestAnalysisClient;
use diwan_chat::catalog::{POETS, TOPICS};
use diwan_chat::channel::{event_queue, WsConnector};
use diwan_chat::cli::Args;
use diwan_chat::config::Endpoints;
use diwan_chat::render::{render_failures, render_phase, LivePrinter};
use diwan_chat::session::{ChatPhase, SessionController};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if args.list_poets || args.list_topics {
        if args.list_poets {
            POETS.iter().for_each(|p| println!("{p}"));
        }
        if args.list_topics {
            TOPICS.iter().for_each(|t| println!("{t}"));
        }
        return Ok(());
    }

    let endpoints = Endpoints::load(args.config.as_deref())?;
    let (events_tx, mut events_rx) = event_queue();
    let connector = WsConnector::new(events_tx.clone());
    let analysis = RestAnalysisClient::new(&endpoints, events_tx);
    let mut controller = SessionController::new(endpoints, connector, analysis);

    let category = args.category;
    for choice in args.unlisted_choices() {
        tracing::warn!(%category, "{choice} is not in the catalog; sending anyway");
    }
    let dispatched = controller.send_message(args.to_request())?;
    tracing::debug!(?dispatched, "request dispatched");

    let mut printer = LivePrinter::new();
    let mut stdout = io::stdout();
    if !args.json {
        printer.update(controller.messages(category), &mut stdout)?;
    }

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    while controller.phase(category).is_busy() {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                if controller.handle_event(event) && !args.json {
                    printer.update(controller.messages(category), &mut stdout)?;
                }
            }
            _ = &mut interrupt => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    controller.cleanup();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&controller.snapshot(category))?);
    } else {
        printer.update(controller.messages(category), &mut stdout)?;
        println!();
        let failures = render_failures(controller.messages(category));
        if !failures.is_empty() {
            eprintln!("{failures}");
        }
        let status = render_phase(controller.phase(category), controller.error(category));
        if !status.is_empty() {
            eprintln!("{status}");
        }
    }

    if controller.phase(category) == ChatPhase::Error {
        let reason = controller.error(category).unwrap_or("request failed").to_string();
        return Err(reason.into());
    }
    Ok(())
}
