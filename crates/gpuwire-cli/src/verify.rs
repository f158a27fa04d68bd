use serde::Serialize;

use gpuwire_client::ClientError;
use gpuwire_core::config::{BackendKind, ChannelConfig, TransportMode, WireConfig};
use gpuwire_protocol::ProtocolViolation;

use crate::demo::{run_direct, run_scenario, Harness};

const SCENARIO_FRAMES: u32 = 3;

// ── Check result types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.to_string(),
            details: Vec::new(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    fn skip(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Skip, message)
    }

    fn detail(mut self, detail: &str) -> Self {
        self.details.push(detail.to_string());
        self
    }
}

// ── Main entry point ────────────────────────────────────────────────────────

/// Exercise a full session in-process and report what held.
pub async fn run_verify(config_path: &str, json: bool) -> anyhow::Result<()> {
    let mut results: Vec<CheckResult> = Vec::new();

    let config = check_config(config_path, &mut results);
    let channel = config.as_ref().map(|c| c.channel.clone()).unwrap_or_default();
    let backend = config.as_ref().map(|c| c.backend.kind).unwrap_or_default();

    check_backend(backend, &mut results);
    for inject_error in [false, true] {
        results.push(outcome("Replay equivalence", check_replay_equivalence(inject_error).await));
    }

    for transport in [TransportMode::Memory, TransportMode::Stream] {
        results.push(outcome("Scenario", check_scenario(transport, &channel).await));
    }
    results.push(outcome("Error reporting", check_error_reporting(&channel).await));
    results.push(outcome("Capacity bound", check_capacity_bound()));

    if json {
        println!("{}", serde_json::to_string(&results)?);
    } else {
        print_results_pretty(&results);
    }

    if results
        .iter()
        .any(|r| matches!(r.status, CheckStatus::Fail))
    {
        std::process::exit(1);
    }

    Ok(())
}

/// A check that could not even run counts as failed.
fn outcome(name: &str, result: anyhow::Result<CheckResult>) -> CheckResult {
    result.unwrap_or_else(|e| CheckResult::fail(name, &format!("aborted: {:#}", e)))
}

// ── Configuration ───────────────────────────────────────────────────────────

fn check_config(config_path: &str, results: &mut Vec<CheckResult>) -> Option<WireConfig> {
    if !std::path::Path::new(config_path).exists() {
        results.push(
            CheckResult::warn(
                "Configuration",
                &format!("Config file not found: {}", config_path),
            )
            .detail("Using default configuration"),
        );
        return None;
    }

    match WireConfig::load(config_path) {
        Ok(config) => {
            results.push(
                CheckResult::pass("Configuration", &format!("Loaded from {}", config_path))
                    .detail(&format!("Channel capacity: {} bytes", config.channel.capacity))
                    .detail(&format!(
                        "Compression threshold: {} bytes",
                        config.channel.compression_threshold
                    ))
                    .detail(&format!("Backend: {}", config.backend.kind))
                    .detail(&format!("Transport: {:?}", config.transport.mode)),
            );
            Some(config)
        }
        Err(e) => {
            results.push(CheckResult::fail(
                "Configuration",
                &format!("Failed to load {}: {}", config_path, e),
            ));
            None
        }
    }
}

fn check_backend(kind: BackendKind, results: &mut Vec<CheckResult>) {
    if kind == BackendKind::Null {
        results.push(CheckResult::pass("Backend", "null backend available"));
    } else {
        results.push(
            CheckResult::skip(
                "Backend",
                &format!("'{}' is not available in this build", kind),
            )
            .detail("Session checks below run on the null backend"),
        );
    }
}

// ── Replay equivalence ──────────────────────────────────────────────────────

/// The sample scenario run once through the wire and once by calling the
/// backend directly. The call logs must be identical.
async fn check_replay_equivalence(inject_error: bool) -> anyhow::Result<CheckResult> {
    let name = if inject_error {
        "Replay equivalence (invalid depth)"
    } else {
        "Replay equivalence"
    };
    let mut h = Harness::new(BackendKind::Null, TransportMode::Memory, &ChannelConfig::default())?;
    run_scenario(&mut h, SCENARIO_FRAMES, inject_error).await?;
    h.server.teardown();
    let direct = run_direct(SCENARIO_FRAMES, inject_error);

    let replayed = h.server.backend().calls();
    if replayed == direct.calls.as_slice() {
        return Ok(CheckResult::pass(
            name,
            &format!("{} backend calls match direct use", replayed.len()),
        ));
    }

    let mut result = CheckResult::fail(name, "replayed calls differ from direct use");
    for (i, (got, want)) in replayed.iter().zip(&direct.calls).enumerate() {
        if got != want {
            result = result.detail(&format!("call {}: got `{}`, expected `{}`", i, got, want));
            break;
        }
    }
    Ok(result.detail(&format!(
        "{} replayed vs {} direct",
        replayed.len(),
        direct.calls.len()
    )))
}

// ── Sample scenario ─────────────────────────────────────────────────────────

async fn check_scenario(transport: TransportMode, channel: &ChannelConfig) -> anyhow::Result<CheckResult> {
    let name = format!("Scenario ({:?})", transport).to_lowercase();
    let mut h = Harness::new(BackendKind::Null, transport, channel)?;
    let outcome = run_scenario(&mut h, SCENARIO_FRAMES, false).await?;
    h.server.teardown();

    let errors = h.error_messages();
    let expected: Vec<Option<u32>> = (0..SCENARIO_FRAMES).map(|i| Some(i % 3)).collect();
    let live = h.server.backend().inner().live_objects();
    let stale = h.server.backend().inner().stale_releases();

    let result = if !errors.is_empty() {
        errors.iter().fold(
            CheckResult::fail(&name, &format!("{} unexpected error(s)", errors.len())),
            |r, e| r.detail(e),
        )
    } else if outcome.backbuffers != expected {
        CheckResult::fail(&name, &format!("backbuffer sequence {:?}", outcome.backbuffers))
    } else if live != 0 || stale != 0 {
        CheckResult::fail(
            &name,
            &format!("{} object(s) leaked, {} stale release(s)", live, stale),
        )
    } else {
        CheckResult::pass(&name, &format!("{} frames presented", SCENARIO_FRAMES))
    };

    let metrics = h.server.metrics();
    Ok(result
        .detail(&format!("Records replayed: {}", metrics.records_replayed))
        .detail(&format!("Bytes received: {}", metrics.bytes_received)))
}

async fn check_error_reporting(channel: &ChannelConfig) -> anyhow::Result<CheckResult> {
    let name = "Error reporting";
    let mut h = Harness::new(BackendKind::Null, TransportMode::Memory, channel)?;
    let outcome = run_scenario(&mut h, SCENARIO_FRAMES, true).await?;

    let errors = h.error_messages();
    // The depth texture, the FreezeUsage on it, then one per framebuffer
    // built on its view.
    let expected = 2 + SCENARIO_FRAMES as usize;
    let result = if !outcome.depth_poisoned {
        CheckResult::fail(name, "depth texture was not poisoned")
    } else if errors.len() != expected || outcome.poisoned_framebuffers != SCENARIO_FRAMES {
        CheckResult::fail(
            name,
            &format!(
                "{} error(s) and {} poisoned framebuffer(s), expected {} and {}",
                errors.len(),
                outcome.poisoned_framebuffers,
                expected,
                SCENARIO_FRAMES
            ),
        )
    } else {
        CheckResult::pass(name, "invalid depth texture reported and propagated")
    };
    Ok(errors.iter().take(1).fold(result, |r, e| r.detail(e)))
}

// ── Capacity ────────────────────────────────────────────────────────────────

/// A record bigger than the channel must fail the client and never reach
/// the server.
fn check_capacity_bound() -> anyhow::Result<CheckResult> {
    let name = "Capacity bound";
    let channel = ChannelConfig {
        capacity: 4096,
        ..ChannelConfig::default()
    };
    let mut h = Harness::new(BackendKind::Null, TransportMode::Memory, &channel)?;

    // Incompressible words so LZ4 cannot shrink the record under the bound.
    let mut seed = 0x2545_f491u32;
    let source: Vec<u32> = (0..channel.capacity)
        .map(|_| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            seed
        })
        .collect();

    let mut builder = h.device.create_shader_module_builder()?;
    let result = match builder.set_source(&source) {
        Err(ClientError::Protocol(ProtocolViolation::CapacityExceeded { size, capacity, .. })) => {
            h.server.handle_commands()?;
            if !h.device.is_terminated() {
                CheckResult::fail(name, "client session survived a capacity error")
            } else if h.server.metrics().records_replayed != 0 {
                CheckResult::fail(name, "server replayed records from a failed batch")
            } else {
                CheckResult::pass(
                    name,
                    &format!("{}-byte record refused by a {}-byte channel", size, capacity),
                )
            }
        }
        Err(e) => CheckResult::fail(name, &format!("unexpected error: {}", e)),
        Ok(()) => CheckResult::fail(name, "oversized record was accepted"),
    };
    Ok(result)
}

// ── Output ──────────────────────────────────────────────────────────────────

fn print_results_pretty(results: &[CheckResult]) {
    println!();
    println!("gpuwire verify");
    println!("-------------------------------");

    let mut pass_count = 0u32;
    let mut fail_count = 0u32;
    let mut warn_count = 0u32;

    for result in results {
        let (icon, color_start, color_end) = match result.status {
            CheckStatus::Pass => {
                pass_count += 1;
                ("[PASS]", "\x1b[32m", "\x1b[0m")
            }
            CheckStatus::Fail => {
                fail_count += 1;
                ("[FAIL]", "\x1b[31m", "\x1b[0m")
            }
            CheckStatus::Warn => {
                warn_count += 1;
                ("[WARN]", "\x1b[33m", "\x1b[0m")
            }
            CheckStatus::Skip => ("[SKIP]", "\x1b[90m", "\x1b[0m"),
        };

        println!(
            "  {}{}{} {} - {}",
            color_start, icon, color_end, result.name, result.message
        );

        for detail in &result.details {
            println!("         {}", detail);
        }
        println!();
    }

    println!("-------------------------------");
    println!(
        "  {} passed, {} failed, {} warnings",
        pass_count, fail_count, warn_count
    );
    println!();
}
