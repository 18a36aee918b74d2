use std::sync::Arc;
use std::time::{Duration, Instant};

use armdiff::config::DEFAULT_SCRIPT;
use armdiff::{
    ChannelConfig, ChannelId, Error, Orchestrator, ReportSink, Session, SessionConfig,
    SessionState,
};
use libtest_mimic::{Arguments, Failed, Trial};

mod test_utils;

use test_utils::{Fixtures, SharedBuffer, process_gone};

const POLL: Duration = Duration::from_millis(50);
const TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    let mut args = Arguments::from_args();
    test_utils::cap_threads(&mut args);

    let fixtures = match Fixtures::create() {
        Ok(fixtures) => Arc::new(fixtures),
        Err(e) => {
            eprintln!("failed to create fixtures: {e}");
            std::process::exit(1);
        }
    };

    let trial = |name: &str, f: fn(&Fixtures) -> Result<(), Failed>| {
        let fixtures = Arc::clone(&fixtures);
        Trial::test(name, move || f(&fixtures))
    };
    let trials = vec![
        trial("script_reports_register_mismatch", run_register_mismatch),
        trial("script_reports_missing_flag", run_missing_flag),
        trial("script_identical_simulators", run_identical),
        trial("broadcast_survives_dead_channel", run_dead_channel),
        trial("silent_channel_does_not_delay_peer", run_silent_peer),
        trial("silent_channel_times_out_beside_chatty_peer", run_chatty_peer),
        trial("late_response_is_not_taken_for_next", run_late_response),
        trial("quit_terminates_both", run_quit_terminates_both),
        trial("interactive_compares_each_command", run_interactive),
        trial("start_requires_input", run_missing_input),
    ];

    libtest_mimic::run(&args, trials).exit();
}

fn config() -> SessionConfig {
    SessionConfig {
        poll_interval: POLL,
        response_timeout: TIMEOUT,
        ..SessionConfig::default()
    }
}

fn start(
    fixtures: &Fixtures,
    candidate: &str,
    reference: &str,
    sink: ReportSink,
) -> Result<Session, Failed> {
    Session::start(
        &fixtures.paths(candidate, reference),
        &fixtures.input(),
        config(),
        sink,
    )
    .map_err(|e| Failed::from(format!("start: {e}")))
}

fn run_register_mismatch(fixtures: &Fixtures) -> Result<(), Failed> {
    let mut session = start(fixtures, "sim_x0", "ref_sim", ReportSink::silent())?;
    let outcome = session
        .run_script(&DEFAULT_SCRIPT)
        .map_err(|e| Failed::from(e.to_string()))?;

    let lines: Vec<String> = outcome.report.iter().map(ToString::to_string).collect();
    if lines != ["X0: 0x5 vs 0x6"] {
        return Err(format!("unexpected report: {lines:?}").into());
    }
    if !outcome.timed_out.is_empty() || !outcome.lost.is_empty() {
        return Err(format!(
            "unexpected failures: {:?} {:?}",
            outcome.timed_out, outcome.lost
        )
        .into());
    }
    if !outcome.transcript_diff.contains("-X0: 0x5") || !outcome.transcript_diff.contains("+X0: 0x6")
    {
        return Err(format!("transcript diff missing X0: {}", outcome.transcript_diff).into());
    }
    if session.state() != SessionState::Closed {
        return Err("session still open after script".into());
    }
    Ok(())
}

fn run_missing_flag(fixtures: &Fixtures) -> Result<(), Failed> {
    let mut session = start(fixtures, "sim_flag", "ref_sim", ReportSink::silent())?;
    let outcome = session
        .run_script(&DEFAULT_SCRIPT)
        .map_err(|e| Failed::from(e.to_string()))?;

    let lines: Vec<String> = outcome.report.iter().map(ToString::to_string).collect();
    if lines != ["FLAG_N: not present vs 0"] {
        return Err(format!("unexpected report: {lines:?}").into());
    }
    if outcome.is_match() {
        return Err("divergent run reported as a match".into());
    }
    Ok(())
}

fn run_identical(fixtures: &Fixtures) -> Result<(), Failed> {
    let mut session = start(fixtures, "sim_same", "ref_sim", ReportSink::silent())?;
    let outcome = session
        .run_script(&["go", "rdump", "bogus", "rdump", "quit"])
        .map_err(|e| Failed::from(e.to_string()))?;

    if !outcome.is_match() {
        return Err(format!("expected a match, got {}", outcome.report).into());
    }
    if !outcome.transcript_diff.is_empty() {
        return Err(format!("transcripts differ:\n{}", outcome.transcript_diff).into());
    }
    if outcome.reference.len() != 3 {
        return Err(format!("expected PC, X0, FLAG_Z, got {}", outcome.reference).into());
    }
    if !outcome.candidate_transcript.contains("Unknown command: bogus") {
        return Err("unknown command output missing from transcript".into());
    }
    Ok(())
}

fn run_dead_channel(fixtures: &Fixtures) -> Result<(), Failed> {
    let buffer = SharedBuffer::default();
    let mut orchestrator = Orchestrator::launch(
        &fixtures.paths("crash", "ref_sim"),
        &fixtures.input(),
        &ChannelConfig::default(),
        ReportSink::new(buffer.clone()),
    )
    .map_err(|e| Failed::from(e.to_string()))?;

    let banner = orchestrator.drain_responses("<startup>", POLL, TIMEOUT);
    if banner.get(ChannelId::Reference).is_none() {
        return Err("reference banner missing".into());
    }
    if orchestrator.is_accepting(ChannelId::Candidate) || !orchestrator.is_degraded() {
        return Err("crashed candidate still marked live".into());
    }

    let report = orchestrator.broadcast("go");
    if report.delivered != [ChannelId::Reference] {
        return Err(format!("unexpected delivery: {report:?}").into());
    }
    let responses = orchestrator.drain_responses("go", POLL, TIMEOUT);
    match responses.get(ChannelId::Reference) {
        Some(block) if block.contains("Simulating...") => {}
        other => return Err(format!("reference did not answer: {other:?}").into()),
    }
    if responses.get(ChannelId::Candidate).is_some() || !responses.timed_out.is_empty() {
        return Err(format!("unexpected responses: {responses:?}").into());
    }

    orchestrator.shutdown();
    let output = buffer.contents();
    if !output.contains("continuing single-sided with the reference simulator only") {
        return Err(format!("no degradation notice in output:\n{output}").into());
    }
    if !output.contains("=== REFERENCE SIMULATOR OUTPUT ===") {
        return Err(format!("reference output not labeled:\n{output}").into());
    }
    Ok(())
}

fn launch(
    fixtures: &Fixtures,
    candidate: &str,
    reference: &str,
    buffer: &SharedBuffer,
) -> Result<Orchestrator, Failed> {
    let mut orchestrator = Orchestrator::launch(
        &fixtures.paths(candidate, reference),
        &fixtures.input(),
        &ChannelConfig::default(),
        ReportSink::new(buffer.clone()),
    )
    .map_err(|e| Failed::from(e.to_string()))?;
    let banner = orchestrator.drain_responses("<startup>", POLL, TIMEOUT);
    if !banner.complete() {
        return Err(format!("banners incomplete: {banner:?}").into());
    }
    Ok(orchestrator)
}

fn run_silent_peer(fixtures: &Fixtures) -> Result<(), Failed> {
    let buffer = SharedBuffer::default();
    let mut orchestrator = launch(fixtures, "stall", "ref_sim", &buffer)?;

    let timeout = Duration::from_millis(800);
    orchestrator.broadcast("rdump");
    let sent = Instant::now();
    let responses = orchestrator.drain_responses("rdump", POLL, timeout);
    let elapsed = sent.elapsed();

    if responses.timed_out != [ChannelId::Candidate] {
        return Err(format!("expected candidate timeout, got {responses:?}").into());
    }
    match responses.get(ChannelId::Reference) {
        Some(block) if block.contains("X0: 0x5") => {}
        other => return Err(format!("reference dump missing: {other:?}").into()),
    }

    let shown = buffer.written_at("X0: 0x5").ok_or("reference block never shown")?;
    let notice = buffer
        .written_at("no prompt within 800 ms after `rdump`")
        .ok_or("no timeout notice")?;
    if shown.duration_since(sent) > Duration::from_millis(500) || shown > notice {
        return Err(format!(
            "reference block shown after {:?}, timeout notice after {:?}",
            shown.duration_since(sent),
            notice.duration_since(sent)
        )
        .into());
    }
    if elapsed > Duration::from_secs(2) {
        return Err(format!("drain took {elapsed:?}").into());
    }
    orchestrator.shutdown();
    Ok(())
}

fn run_chatty_peer(fixtures: &Fixtures) -> Result<(), Failed> {
    let buffer = SharedBuffer::default();
    let mut orchestrator = launch(fixtures, "stall", "chatty", &buffer)?;

    orchestrator.broadcast("rdump");
    let sent = Instant::now();
    let responses = orchestrator.drain_responses("rdump", POLL, Duration::from_millis(500));

    if responses.timed_out != [ChannelId::Candidate] {
        return Err(format!("expected candidate timeout, got {responses:?}").into());
    }
    match responses.get(ChannelId::Reference) {
        Some(block) if block.contains("trace 29") && block.contains("PC: 0x400008") => {}
        other => return Err(format!("reference dump missing: {other:?}").into()),
    }

    // The candidate's timeout is reported on its own deadline, while the
    // reference is still printing trace lines.
    let notice = buffer
        .written_at("no prompt within 500 ms after `rdump`")
        .ok_or("no timeout notice")?;
    let dump = buffer
        .written_at("PC: 0x400008")
        .ok_or("reference block never shown")?;
    if notice.duration_since(sent) > Duration::from_millis(1500) || notice > dump {
        return Err(format!(
            "timeout notice after {:?}, reference block after {:?}",
            notice.duration_since(sent),
            dump.duration_since(sent)
        )
        .into());
    }
    if orchestrator.owed(ChannelId::Candidate) != ["rdump"] {
        return Err("timed-out command not recorded as owed".into());
    }
    orchestrator.shutdown();
    Ok(())
}

fn run_late_response(fixtures: &Fixtures) -> Result<(), Failed> {
    let buffer = SharedBuffer::default();
    let mut session = Session::start(
        &fixtures.paths("sim_slow_go", "ref_sim"),
        &fixtures.input(),
        SessionConfig {
            response_timeout: Duration::from_millis(500),
            ..config()
        },
        ReportSink::new(buffer.clone()),
    )
    .map_err(|e| Failed::from(format!("start: {e}")))?;
    session
        .await_banner()
        .map_err(|e| Failed::from(e.to_string()))?;

    let go = session
        .execute("go")
        .map_err(|e| Failed::from(e.to_string()))?
        .ok_or("go returned no responses")?;
    if go.timed_out != [ChannelId::Candidate] || go.get(ChannelId::Candidate).is_some() {
        return Err(format!("expected slow go to time out: {go:?}").into());
    }

    let report = session
        .diff_now()
        .map_err(|e| Failed::from(e.to_string()))?
        .ok_or("rdump not answered by both")?;
    if !report.is_empty() {
        return Err(format!("late go output compared as state:\n{report}").into());
    }
    let output = buffer.contents();
    if !output.contains("late response to `go`") {
        return Err(format!("late output not labeled:\n{output}").into());
    }
    session.close();
    Ok(())
}

fn run_quit_terminates_both(fixtures: &Fixtures) -> Result<(), Failed> {
    let buffer = SharedBuffer::default();
    let mut session = start(fixtures, "sim_same", "ref_sim", ReportSink::new(buffer.clone()))?;
    session
        .await_banner()
        .map_err(|e| Failed::from(e.to_string()))?;

    let pids: Vec<u32> = ChannelId::ALL
        .into_iter()
        .map(|id| session.orchestrator_mut().channel_mut(id).pid())
        .collect();

    let responses = session
        .execute("go")
        .map_err(|e| Failed::from(e.to_string()))?
        .ok_or("forwarded command returned no responses")?;
    if !responses.complete() {
        return Err(format!("incomplete responses: {responses:?}").into());
    }
    if !buffer.contents().contains("outputs are identical") {
        return Err(format!("no comparison in output:\n{}", buffer.contents()).into());
    }

    let quit = session
        .execute("  QUIT ")
        .map_err(|e| Failed::from(e.to_string()))?;
    if quit.is_some() || session.state() != SessionState::Closed {
        return Err("quit did not close the session".into());
    }
    for pid in pids {
        if !process_gone(pid) {
            return Err(format!("simulator {pid} outlived the session").into());
        }
    }
    match session.execute("go") {
        Err(Error::AllChannelsDead) => Ok(()),
        other => Err(format!("expected closed session, got {other:?}").into()),
    }
}

fn run_interactive(fixtures: &Fixtures) -> Result<(), Failed> {
    let buffer = SharedBuffer::default();
    let mut session = start(fixtures, "sim_x0", "ref_sim", ReportSink::new(buffer.clone()))?;

    let (tx, rx) = crossbeam_channel::unbounded();
    for line in ["rdump", ":diff", "quit"] {
        tx.send(line.to_string())
            .map_err(|e| Failed::from(e.to_string()))?;
    }
    session
        .run_interactive(&rx)
        .map_err(|e| Failed::from(e.to_string()))?;

    let output = buffer.contents();
    for needle in [
        "=== YOUR SIMULATOR OUTPUT ===",
        "=== REFERENCE SIMULATOR OUTPUT ===",
        "outputs differ",
        "-X0: 0x5",
        "+X0: 0x6",
        "X0: 0x5 vs 0x6",
    ] {
        if !output.contains(needle) {
            return Err(format!("missing {needle:?} in output:\n{output}").into());
        }
    }
    if session.state() != SessionState::Closed {
        return Err("session still open after quit".into());
    }
    Ok(())
}

fn run_missing_input(fixtures: &Fixtures) -> Result<(), Failed> {
    let result = Session::start(
        &fixtures.paths("sim_same", "ref_sim"),
        &fixtures.sim("missing.x"),
        config(),
        ReportSink::silent(),
    );
    match result {
        Err(Error::InputMissing(path)) if path.ends_with("missing.x") => Ok(()),
        Err(e) => Err(format!("unexpected error: {e}").into()),
        Ok(_) => Err("started without an input program".into()),
    }
}
