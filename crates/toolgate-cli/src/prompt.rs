//! Consent prompts on the controlling terminal

use async_trait::async_trait;
use std::io::{BufRead, Write};
use toolgate_core::{ConsentDecision, ConsentGate, ConsentRequest};
use tracing::warn;

/// Asks on stdin/stderr whether a directory may be accessed
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConsentGate;

#[async_trait]
impl ConsentGate for TerminalConsentGate {
    async fn request_access(&self, request: ConsentRequest) -> ConsentDecision {
        let answer = tokio::task::spawn_blocking(move || ask(&request)).await;
        match answer {
            Ok(Ok(line)) => parse_answer(&line),
            Ok(Err(e)) => {
                warn!("Could not read consent answer: {}", e);
                ConsentDecision::Denied
            }
            Err(e) => {
                warn!("Consent prompt task failed: {}", e);
                ConsentDecision::Denied
            }
        }
    }
}

fn ask(request: &ConsentRequest) -> std::io::Result<String> {
    let mut stderr = std::io::stderr().lock();
    writeln!(
        stderr,
        "Allow {} access to {}?",
        request.operation,
        request.directory.display()
    )?;
    if let Some(reason) = &request.reason {
        writeln!(stderr, "  Reason: {}", reason)?;
    }
    if let Some(source) = &request.source {
        writeln!(stderr, "  Requested by: {}", source)?;
    }
    write!(stderr, "[o]nce / [a]lways / [y]es (24h) / [n]o: ")?;
    stderr.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

/// Map a typed answer to a decision; anything unrecognised denies
pub fn parse_answer(answer: &str) -> ConsentDecision {
    match answer.trim().to_lowercase().as_str() {
        "o" | "once" => ConsentDecision::AllowOnce,
        "a" | "always" => ConsentDecision::AllowRemember,
        "y" | "yes" => ConsentDecision::Allow,
        _ => ConsentDecision::Denied,
    }
}
