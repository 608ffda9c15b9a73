//! Fan-out request command handler.

use super::{CommandResult, Session};
use anyhow::{anyhow, bail};
use corrctl_fpga::{dispatch, Dispatch};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct RequestRow<'a> {
    device: &'a str,
    request: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<u64>,
    replied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    reply: &'a [String],
    informs: &'a [Vec<String>],
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct RequestSummary<'a> {
    all_completed: bool,
    elapsed_ms: f64,
    results: Vec<RequestRow<'a>>,
}

/// Send a request to every device and print the replies
///
/// Fails when any device did not reply within the budget.
pub async fn request(
    session: &Session,
    name: &str,
    args: &[String],
    timeout: Option<f64>,
) -> CommandResult {
    let timeout = match timeout {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|_| anyhow!("Invalid timeout: {secs}"))?,
        None => session.fleet.timeout(),
    };

    let out = dispatch(&session.devices, name, args, timeout).await?;
    if session.json {
        session.print_json(&summary(&out))?;
    } else {
        print_text(&out);
    }

    if !out.all_completed {
        bail!(
            "{}: {} of {} devices did not complete",
            name,
            out.missing().count(),
            out.results.len()
        );
    }
    Ok(())
}

fn summary(out: &Dispatch) -> RequestSummary<'_> {
    let results = out
        .results
        .iter()
        .map(|(device, r)| RequestRow {
            device: device.as_str(),
            request: &r.request,
            request_id: r.request_id.map(|id| id.0),
            replied: r.replied(),
            status: r.status(),
            reply: r.reply().map(|rep| rep.arguments.as_slice()).unwrap_or(&[]),
            informs: r.informs(),
            latency_ms: r.latency.map(|d| d.as_secs_f64() * 1000.0),
            error: r.outcome.as_ref().err().map(|e| e.to_string()),
        })
        .collect();

    RequestSummary {
        all_completed: out.all_completed,
        elapsed_ms: out.elapsed.as_secs_f64() * 1000.0,
        results,
    }
}

fn print_text(out: &Dispatch) {
    for (device, result) in &out.results {
        for inform in result.informs() {
            println!("{:<16} #{}", device, inform.join(" "));
        }
        match &result.outcome {
            Ok(reply) => println!(
                "{:<16} !{} {}",
                device,
                result.request,
                reply.arguments.join(" ")
            ),
            Err(e) => println!("{device:<16} {e}"),
        }
    }
    println!(
        "{}/{} replied in {:.1} ms",
        out.results.values().filter(|r| r.replied()).count(),
        out.results.len(),
        out.elapsed.as_secs_f64() * 1000.0
    );
}
