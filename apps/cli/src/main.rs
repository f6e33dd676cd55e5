use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{load_settings, WorkflowController, WorkflowEvent, WorkflowState};
use shared::domain::Step;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ShellCommand, HELP};

#[derive(Parser, Debug)]
#[command(about = "Subscribe to office availability alerts for a postal code")]
struct Args {
    /// Base URL of the subscription API; overrides sepecheck.toml and API_URL.
    #[arg(long)]
    api_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings().context("failed to load settings")?;
    if let Some(api_url) = args.api_url {
        settings.api_url = Some(api_url);
    }
    let base = settings.api_base().context("invalid configuration")?;
    let controller =
        Arc::new(WorkflowController::connect(&base).context("failed to set up API clients")?);
    tracing::info!(api_url = %base.as_url(), "session started");

    spawn_event_printer(&controller);
    println!("{HELP}");
    print_state(&controller.state());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let command = match commands::parse(&line) {
            Ok(command) => command,
            Err(commands::ParseError::Empty) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }
        run_command(&controller, command).await;
    }

    Ok(())
}

/// Prints controller notifications as they arrive.
fn spawn_event_printer(controller: &WorkflowController) {
    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkflowEvent::PostalCodesLoaded { count }) => {
                    println!("loaded {count} postal codes");
                }
                Ok(WorkflowEvent::StepChanged { from, to }) => {
                    println!("step: {from} -> {to}");
                }
                Ok(WorkflowEvent::ActionSucceeded { action, detail }) => {
                    println!("{action}: {detail}");
                }
                Ok(WorkflowEvent::ActionFailed { action, message }) => {
                    println!("{action} failed: {message}");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn run_command(controller: &WorkflowController, command: ShellCommand) {
    // Failures are already reported through the event stream.
    let _ = match command {
        ShellCommand::Postals => controller.load_postal_codes().await.map(|codes| {
            let listed: Vec<&str> = codes.iter().map(|postal| postal.code.as_str()).collect();
            println!("postal codes: {}", listed.join(", "));
        }),
        ShellCommand::Postal { code } => controller
            .select_postal(&code)
            .map(|postal| println!("selected postal code {postal}")),
        ShellCommand::Email { address } => controller
            .select_email(&address)
            .map(|()| println!("email set to {address}")),
        ShellCommand::Submit => controller.submit().await.map(|token| {
            println!("validation token (redacted): {token}");
        }),
        ShellCommand::Validate => controller.validate().await,
        ShellCommand::Remove => controller.remove().await,
        ShellCommand::Back => controller.go_back(),
        ShellCommand::Status => {
            print_state(&controller.state());
            Ok(())
        }
        ShellCommand::Help => {
            println!("{HELP}");
            Ok(())
        }
        ShellCommand::Quit => Ok(()),
    };
}

fn print_state(state: &WorkflowState) {
    let postal = state
        .selected_postal
        .as_ref()
        .map(|postal| postal.code.as_str())
        .unwrap_or("-");
    let email = if state.selected_email.is_empty() {
        "-"
    } else {
        state.selected_email.as_str()
    };
    println!("step: {}  postal: {postal}  email: {email}", state.step);
    if let Some(token) = &state.token {
        let expiry = state
            .token_expires_at
            .map(|at| format!(" (expires around {})", at.format("%Y-%m-%d %H:%M UTC")))
            .unwrap_or_default();
        println!("token: {token}{expiry}");
    }
    if state.step == Step::Request && state.token.is_some() {
        println!("an earlier subscription is still held; submitting replaces it locally");
    }
    if state.is_submitting {
        println!("submitting...");
    }
}
