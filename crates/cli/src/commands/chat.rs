//! `stockchat chat`: interactive or single-message chat mode.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use stockchat_agent::{Orchestrator, RunOutcome, TerminalState};
use stockchat_core::message::Message;
use stockchat_providers::{ProviderKind, build_from_config};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{build_registry, load_config, open_store};

pub async fn run(
    config_path: Option<&Path>,
    message: Option<String>,
    provider: Option<String>,
    max_turns: Option<u32>,
    json: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let router = build_from_config(&config)?;
    let kind = match provider {
        Some(name) => name.parse::<ProviderKind>()?,
        None => router.default_kind(),
    };

    // Fail early with setup instructions rather than on the first turn
    let model = match router.resolve(kind) {
        Ok((_, model)) => model,
        Err(e) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Set one of these environment variables:");
            eprintln!("    OPENAI_API_KEY     = 'sk-...'      (OpenAI)");
            eprintln!("    ANTHROPIC_API_KEY  = 'sk-ant-...'  (Anthropic)");
            eprintln!("    STOCKCHAT_API_KEY  = '...'         (shared)");
            eprintln!("  or select the local backend with --provider ollama");
            eprintln!();
            eprintln!("  Config file: {}", stockchat_config::AppConfig::config_path().display());
            return Ok(ExitCode::FAILURE);
        }
    };

    let store = open_store(&config).await?;
    let registry = Arc::new(build_registry(store, &config));
    let orchestrator = Orchestrator::from_config(Arc::new(router), Arc::clone(&registry), &config);
    let max_turns = max_turns.unwrap_or(config.chat.max_turns);

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let outcome = orchestrator.run(vec![Message::user(msg)], kind, max_turns).await;
        eprint!("\r              \r");

        if json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        } else {
            print_outcome(&outcome, "");
        }
        return Ok(ExitCode::from(exit_status(&outcome.terminal_state)));
    }

    // Interactive mode
    println!();
    println!("  stockchat - interactive mode");
    println!();
    println!("  Provider:  {kind}");
    println!("  Model:     {model}");
    println!("  Tools:     {}", registry.names().join(", "));
    println!("  Max turns: {max_turns}");
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or 'quit' to leave.");
    println!();

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let mut messages = history.clone();
        messages.push(Message::user(input));

        eprint!("  ...");
        let outcome = orchestrator.run(messages, kind, max_turns).await;
        eprint!("\r     \r");
        println!();
        print_outcome(&outcome, "  Assistant > ");
        println!();

        // Keep only the question and its final answer between runs
        if let (true, Some(answer)) = (outcome.is_done(), &outcome.final_content) {
            history.push(Message::user(input));
            history.push(Message::assistant(answer.clone()));
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(ExitCode::SUCCESS)
}

/// Exit status of a single-message run. The failure itself has already
/// been printed.
fn exit_status(state: &TerminalState) -> u8 {
    match state {
        TerminalState::Failed { .. } => 1,
        TerminalState::Done | TerminalState::BudgetExhausted => 0,
    }
}

fn print_outcome(outcome: &RunOutcome, prefix: &str) {
    let content = outcome.final_content.as_deref().unwrap_or_default();
    match &outcome.terminal_state {
        TerminalState::Done => {
            for line in content.lines() {
                println!("{prefix}{line}");
            }
        }
        TerminalState::BudgetExhausted => {
            for line in content.lines() {
                println!("{prefix}{line}");
            }
            eprintln!(
                "  [Stopped after {} turns without a final answer; try a narrower question or raise --max-turns]",
                outcome.turns_used
            );
        }
        TerminalState::Failed { reason, retryable, .. } => {
            eprintln!("  [Error] {reason}");
            if *retryable {
                eprintln!("  [This may be temporary; check the connection or credentials and retry]");
            }
        }
    }
}
