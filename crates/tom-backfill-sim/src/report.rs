use serde::Serialize;
use std::io::Write;

/// Result of one simulated session.
#[derive(Debug, Serialize)]
pub struct SimReport {
    pub event: &'static str,
    pub scenario: String,
    pub session_id: String,
    /// `committed` or `aborted`.
    pub outcome: String,
    /// Error text when aborted.
    pub error: Option<String>,
    pub expected: String,
    pub matched: bool,
    pub keys: usize,
    pub chunks_applied: usize,
    pub cancels_received: usize,
    pub elapsed_ms: f64,
}

/// One JSON line on stdout, flushed for piped output.
pub fn emit_json(report: &SimReport) -> anyhow::Result<()> {
    let json = serde_json::to_string(report)?;
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    writeln!(lock, "{json}")?;
    lock.flush()?;
    Ok(())
}

pub fn print(report: &SimReport) {
    println!("scenario:          {}", report.scenario);
    println!("session:           {}", report.session_id);
    match &report.error {
        Some(err) => println!("outcome:           {} ({err})", report.outcome),
        None => println!("outcome:           {}", report.outcome),
    }
    println!("expected:          {}", report.expected);
    println!("chunks applied:    {}/{}", report.chunks_applied, report.keys);
    println!("cancels received:  {}", report.cancels_received);
    println!("elapsed:           {:.1} ms", report.elapsed_ms);
    println!("{}", if report.matched { "PASS" } else { "FAIL" });
}
