//! Human-readable rendering of daemon responses.

use anyhow::{Result, bail};

use tug_common::policy::TraceEntry;
use tug_common::protocol::Response;

/// Render a response for a terminal. Errors from the daemon become process
/// failures so scripts can branch on the exit code.
pub fn render(response: &Response) -> Result<()> {
    match response {
        Response::Status(info) => {
            println!("tugd v{} (pid {})", info.version, info.pid);
            println!("  uptime:          {}s", info.uptime_secs);
            println!("  containers:      {}", info.containers);
            println!("  pending updates: {}", info.pending_updates);
            println!("  running jobs:    {}", info.running_jobs);
        }
        Response::Containers { containers } => {
            if containers.is_empty() {
                println!("no containers monitored yet (run `tug check`)");
                return Ok(());
            }
            println!(
                "{:<20} {:<28} {:<14} {:<8} {:<8} WINDOW",
                "NAME", "IMAGE", "TAG", "POLICY", "SCOPE"
            );
            for c in containers {
                println!(
                    "{:<20} {:<28} {:<14} {:<8} {:<8} {}",
                    c.id,
                    c.image,
                    c.current_tag,
                    c.policy,
                    c.scope,
                    c.maintenance_window.as_deref().unwrap_or("-")
                );
                if let Some(blocked) = &c.latest_major_tag {
                    println!("  {:<18} out-of-scope candidate: {}", "", blocked);
                }
            }
        }
        Response::Updates { updates } => {
            if updates.is_empty() {
                println!("no updates");
                return Ok(());
            }
            println!(
                "{:<36} {:<16} {:<12} {:<12} {:<9} {:<4} REASON",
                "ID", "CONTAINER", "FROM", "TO", "STATUS", "VER"
            );
            for u in updates {
                println!(
                    "{:<36} {:<16} {:<12} {:<12} {:<9} {:<4} {:?}",
                    u.id, u.container, u.from_tag, u.to_tag, u.status, u.version, u.reason
                );
                if let Some(error) = &u.last_error {
                    println!("  {:<34} last error: {}", "", error);
                }
            }
        }
        Response::Update { update } => {
            println!(
                "update {} is now {} (version {})",
                update.id, update.status, update.version
            );
        }
        Response::JobStarted { id, already_running } => {
            if *already_running {
                println!("job {id} is already running");
            } else {
                println!("started job {id}");
            }
        }
        Response::Jobs { jobs } => {
            if jobs.is_empty() {
                println!("no jobs");
                return Ok(());
            }
            println!(
                "{:<36} {:<16} {:<10} {:>5} {:>7} {:>6} TRIGGERED BY",
                "ID", "KIND", "STATUS", "PROG", "FOUND", "ERRORS"
            );
            for j in jobs {
                println!(
                    "{:<36} {:<16} {:<10} {:>4}% {:>7} {:>6} {}",
                    j.id,
                    j.kind,
                    j.status,
                    j.progress_percent(),
                    j.found_count,
                    j.errors_count,
                    j.triggered_by
                );
                if let Some(error) = &j.error_message {
                    println!("  {:<34} {}", "", error);
                }
            }
        }
        Response::CancelRequested { id } => {
            println!("cancellation requested for job {id} (takes effect at its next checkpoint)");
        }
        Response::History { entries } => {
            if entries.is_empty() {
                println!("no history");
                return Ok(());
            }
            println!(
                "{:<20} {:<16} {:<12} {:<12} {:<11} {:>8} ROLLBACK",
                "WHEN", "CONTAINER", "FROM", "TO", "STATUS", "TOOK"
            );
            for h in entries {
                println!(
                    "{:<20} {:<16} {:<12} {:<12} {:<11} {:>6}ms {}",
                    h.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    h.container,
                    h.from_tag,
                    h.to_tag,
                    format!("{:?}", h.status).to_lowercase(),
                    h.duration_ms,
                    if h.can_rollback { "yes" } else { "no" }
                );
                if let Some(error) = &h.error {
                    println!("  {:<18} {}", "", error);
                }
            }
        }
        Response::Trace { entries } => {
            if entries.is_empty() {
                println!("no decision trace recorded");
                return Ok(());
            }
            for (idx, entry) in entries.iter().enumerate() {
                println!("{:>3}. {}", idx + 1, describe(entry));
            }
        }
        Response::Sweep { report } => {
            println!(
                "sweep: {} applied, {} failed, {} retrying, {} deferred, {} conflicts",
                report.applied, report.failed, report.retried, report.deferred, report.conflicts
            );
            for excluded in &report.excluded {
                println!("  excluded by dependency cycle: {excluded}");
            }
        }
        Response::Error { code, message } => {
            bail!("{code}: {message}");
        }
    }
    Ok(())
}

fn describe(entry: &TraceEntry) -> String {
    match entry {
        TraceEntry::PolicyCheck { policy, outcome } => {
            format!("policy check: {policy} -> {outcome:?}")
        }
        TraceEntry::IgnoreCheck {
            rule_value,
            candidate,
            matched,
        } => format!(
            "ignore check: {rule_value} vs {candidate} -> {}",
            if *matched { "ignored" } else { "not ignored" }
        ),
        TraceEntry::ScopeCheck {
            scope,
            change,
            candidate,
            outcome,
        } => format!(
            "scope check: {candidate} ({}) against scope {scope} -> {outcome:?}",
            change.map_or("no change".to_string(), |c| c.to_string())
        ),
        TraceEntry::WindowCheck {
            window,
            mode,
            inside,
            outcome,
        } => format!(
            "window check: `{window}` ({mode:?}) inside={inside} -> {outcome:?}"
        ),
        TraceEntry::WindowInvalid { window, error } => {
            format!("window invalid: `{window}` ({error})")
        }
        TraceEntry::Reconciled {
            previous_target,
            new_target,
        } => format!("reconciled: {previous_target} -> {new_target}"),
    }
}
