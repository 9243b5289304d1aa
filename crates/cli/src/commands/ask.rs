//! `deepcritic ask` — Research a question to an accepted answer.

use deepcritic_agent::{AgentError, AgentEvent, Orchestrator, RunOutcome};
use std::io::Write;
use tokio_stream::StreamExt;

/// Returns whether an accepted answer was printed.
///
/// A failed run is reported once, through [`AgentError::user_message`], and
/// is not returned as an error.
pub async fn run(
    query: &str,
    stream: bool,
    max_iterations: Option<u32>,
) -> Result<bool, Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let (mut orchestrator, _) = super::build_orchestrator(&config)?;
    if let Some(max) = max_iterations {
        orchestrator = orchestrator.with_max_iterations(max);
    }

    let result = if stream {
        stream_run(&orchestrator, query).await?
    } else {
        eprint!("  Researching...");
        let result = orchestrator.run(query).await;
        eprint!("\r                \r");
        result
    };

    Ok(report(result, stream))
}

/// Run with every event printed to stdout as one JSON line.
async fn stream_run(
    orchestrator: &Orchestrator,
    query: &str,
) -> Result<Result<RunOutcome, AgentError>, Box<dyn std::error::Error>> {
    let (mut events, task) = orchestrator.run_stream(query).into_stream();
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        writeln!(stdout, "{}", event_line(&event)?)?;
        stdout.flush()?;
    }
    Ok(task.finish().await)
}

fn event_line(event: &AgentEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

fn report(result: Result<RunOutcome, AgentError>, stream: bool) -> bool {
    match result {
        Ok(outcome) => {
            if stream {
                let summary = serde_json::json!({
                    "type": "result",
                    "answer": outcome.answer,
                    "score": outcome.critique.score,
                    "agent_invocations": outcome.agent_invocations,
                });
                println!("{summary}");
            } else {
                println!("{}", outcome.answer);
                eprintln!();
                eprintln!(
                    "  Critic score: {}/5 after {} pass(es)",
                    outcome.critique.score, outcome.agent_invocations
                );
            }
            true
        }
        Err(e) => {
            eprintln!("  {}", e.user_message());
            false
        }
    }
}
