//! End-to-end protocol tests: a real `tamarin-dap` process driven over
//! stdio with framed DAP JSON.


use dap_client::{write_fixture, DapSession};
use serde_json::{json, Value};
use serial_test::serial;
use std::path::Path;

fn assert_response(response: &Value, request_seq: i64, success: bool) {
    assert_eq!(
        response.get("type").and_then(Value::as_str),
        Some("response"),
        "not a response: {response}"
    );
    assert_eq!(
        response.get("request_seq").and_then(Value::as_i64),
        Some(request_seq),
        "wrong request_seq: {response}"
    );
    assert_eq!(
        response.get("success").and_then(Value::as_bool),
        Some(success),
        "wrong success flag: {response}"
    );
}

fn initialize(session: &mut DapSession) -> anyhow::Result<()> {
    let seq = session
        .client
        .send_request("initialize", json!({ "adapterID": "tamarin" }))?;

    // The `initialized` event precedes the response on the wire.
    let first = session.client.read_any()?;
    assert_eq!(first.get("type").and_then(Value::as_str), Some("event"));
    assert_eq!(
        first.get("event").and_then(Value::as_str),
        Some("initialized")
    );

    let response = session.client.read_any()?;
    assert_response(&response, seq, true);
    let capabilities = &response["body"];
    assert_eq!(
        capabilities
            .get("supportsConfigurationDoneRequest")
            .and_then(Value::as_bool),
        Some(true)
    );
    assert_eq!(
        capabilities
            .get("supportsExceptionInfoRequest")
            .and_then(Value::as_bool),
        Some(true)
    );
    Ok(())
}

fn launch(session: &mut DapSession, program: &Path) -> anyhow::Result<()> {
    let seq = session
        .client
        .send_request("launch", json!({ "program": program }))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    Ok(())
}

fn set_breakpoints(
    session: &mut DapSession,
    program: &Path,
    lines: &[i64],
) -> anyhow::Result<Value> {
    let breakpoints: Vec<Value> = lines.iter().map(|line| json!({ "line": line })).collect();
    let seq = session.client.send_request(
        "setBreakpoints",
        json!({
            "source": { "path": program },
            "breakpoints": breakpoints,
        }),
    )?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    Ok(response)
}

fn configuration_done(session: &mut DapSession) -> anyhow::Result<()> {
    let seq = session
        .client
        .send_request("configurationDone", json!({}))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    Ok(())
}

/// initialize + launch + breakpoints + configurationDone, returning the
/// first stopped event.
fn launch_to_first_stop(
    session: &mut DapSession,
    program: &Path,
    lines: &[i64],
) -> anyhow::Result<Value> {
    initialize(session)?;
    launch(session, program)?;
    set_breakpoints(session, program, lines)?;
    configuration_done(session)?;
    session.client.wait_for_event("stopped")
}

fn stack_frames(session: &mut DapSession) -> anyhow::Result<Vec<Value>> {
    let seq = session
        .client
        .send_request("stackTrace", json!({ "threadId": 1 }))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    let frames = response["body"]["stackFrames"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    Ok(frames)
}

fn step(session: &mut DapSession, command: &str) -> anyhow::Result<Value> {
    let seq = session
        .client
        .send_request(command, json!({ "threadId": 1 }))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    session.client.read_event()
}

#[test]
#[serial]
fn initialize_reports_capabilities_and_event_order() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn threads_reports_the_single_main_thread() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    let seq = session.client.send_request("threads", json!({}))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    let threads = response["body"]["threads"].as_array().cloned().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0]["id"].as_i64(), Some(1));
    assert_eq!(threads[0]["name"].as_str(), Some("main"));
    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn breakpoint_stop_stack_scopes_and_variables() -> anyhow::Result<()> {
    let program = write_fixture(
        "
let square = fn(x) {
	return x * x
}
let z = square(2)
let y = square(3)",
    )?;
    let mut session = DapSession::start()?;
    let stopped = launch_to_first_stop(&mut session, &program, &[3])?;
    let body = &stopped["body"];
    assert_eq!(body["reason"].as_str(), Some("breakpoint"));
    assert_eq!(body["threadId"].as_i64(), Some(1));
    assert_eq!(body["allThreadsStopped"].as_bool(), Some(true));

    // Innermost frame first.
    let frames = stack_frames(&mut session)?;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["name"].as_str(), Some("square"));
    assert_eq!(frames[0]["line"].as_i64(), Some(3));
    assert_eq!(frames[1]["name"].as_str(), Some("main"));
    assert_eq!(frames[1]["line"].as_i64(), Some(5));

    // Scopes for the inner frame: Local (ref = frame id + 1) and Global.
    let frame_id = frames[0]["id"].as_i64().unwrap();
    let seq = session
        .client
        .send_request("scopes", json!({ "frameId": frame_id }))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    let scopes = response["body"]["scopes"].as_array().cloned().unwrap();
    assert_eq!(scopes.len(), 2);
    assert_eq!(scopes[0]["name"].as_str(), Some("Local"));
    assert_eq!(
        scopes[0]["variablesReference"].as_i64(),
        Some(frame_id + 1)
    );
    assert_eq!(scopes[1]["name"].as_str(), Some("Global"));
    assert_eq!(scopes[1]["variablesReference"].as_i64(), Some(1));

    // The callee's parameter.
    let seq = session
        .client
        .send_request("variables", json!({ "variablesReference": frame_id + 1 }))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    let vars = response["body"]["variables"].as_array().cloned().unwrap();
    let x = vars
        .iter()
        .find(|v| v["name"].as_str() == Some("x"))
        .expect("parameter x");
    assert_eq!(x["value"].as_str(), Some("2"));
    assert_eq!(x["type"].as_str(), Some("INTEGER"));

    // Globals: the function shows as the literal string `function`, and
    // `z` is not live yet.
    let seq = session
        .client
        .send_request("variables", json!({ "variablesReference": 1 }))?;
    let response = session.client.read_response(seq)?;
    let vars = response["body"]["variables"].as_array().cloned().unwrap();
    let square = vars
        .iter()
        .find(|v| v["name"].as_str() == Some("square"))
        .expect("global square");
    assert_eq!(square["value"].as_str(), Some("function"));
    assert!(!vars.iter().any(|v| v["name"].as_str() == Some("z")));

    // Second call hits the same line, then the program terminates.
    let event = step(&mut session, "continue")?;
    assert_eq!(event["event"].as_str(), Some("stopped"));
    assert_eq!(event["body"]["reason"].as_str(), Some("breakpoint"));
    let event = step(&mut session, "continue")?;
    assert_eq!(event["event"].as_str(), Some("terminated"));

    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn breakpoints_are_verified_at_their_resolved_lines() -> anyhow::Result<()> {
    let program = write_fixture(
        "
let square = fn(x) {
	return x * x
}
let z = square(2)",
    )?;
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    launch(&mut session, &program)?;
    // Line 1 is blank and line 4 is a closing brace: both snap forward.
    let response = set_breakpoints(&mut session, &program, &[1, 4])?;
    let breakpoints = response["body"]["breakpoints"].as_array().cloned().unwrap();
    assert_eq!(breakpoints.len(), 2);
    assert!(breakpoints.iter().all(|bp| bp["verified"].as_bool() == Some(true)));
    assert_eq!(breakpoints[0]["line"].as_i64(), Some(2));
    assert_eq!(breakpoints[1]["line"].as_i64(), Some(5));
    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn stepping_emits_step_stops_and_walks_the_program() -> anyhow::Result<()> {
    let program = write_fixture(
        "
let func = fn(a) { a }
let res = func(4)
let res2 = func(4)",
    )?;
    let mut session = DapSession::start()?;
    let stopped = launch_to_first_stop(&mut session, &program, &[3])?;
    assert_eq!(stopped["body"]["reason"].as_str(), Some("breakpoint"));

    // next: the call on line 3 is skipped over.
    let event = step(&mut session, "next")?;
    assert_eq!(event["event"].as_str(), Some("stopped"));
    assert_eq!(event["body"]["reason"].as_str(), Some("step"));
    let frames = stack_frames(&mut session)?;
    assert_eq!(frames[0]["name"].as_str(), Some("main"));
    assert_eq!(frames[0]["line"].as_i64(), Some(4));

    // stepIn: enters the callee body on line 2.
    let event = step(&mut session, "stepIn")?;
    assert_eq!(event["body"]["reason"].as_str(), Some("step"));
    let frames = stack_frames(&mut session)?;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["name"].as_str(), Some("func"));
    assert_eq!(frames[0]["line"].as_i64(), Some(2));

    // stepOut: back in main on the call line.
    let event = step(&mut session, "stepOut")?;
    assert_eq!(event["body"]["reason"].as_str(), Some("step"));
    let frames = stack_frames(&mut session)?;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["line"].as_i64(), Some(4));

    // next at the last statement: the program completes.
    let event = step(&mut session, "next")?;
    assert_eq!(event["event"].as_str(), Some("terminated"));

    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn compiler_error_surfaces_as_exception_then_terminates() -> anyhow::Result<()> {
    let program = write_fixture("let x = a;")?;
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    launch(&mut session, &program)?;
    configuration_done(&mut session)?;

    let stopped = session.client.wait_for_event("stopped")?;
    let body = &stopped["body"];
    assert_eq!(body["reason"].as_str(), Some("exception"));
    assert_eq!(body["description"].as_str(), Some("COMPILER_ERROR"));

    // One synthetic frame at the fault location.
    let frames = stack_frames(&mut session)?;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["name"].as_str(), Some("Compiler Error"));
    assert_eq!(frames[0]["line"].as_i64(), Some(1));

    let seq = session
        .client
        .send_request("exceptionInfo", json!({ "threadId": 1 }))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, true);
    let description = response["body"]["description"].as_str().unwrap_or_default();
    assert!(
        description.contains("undefined variable"),
        "unexpected description: {description}"
    );

    // The next step terminates instead of resuming.
    let event = step(&mut session, "next")?;
    assert_eq!(event["event"].as_str(), Some("terminated"));

    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn runtime_error_keeps_the_failing_stack() -> anyhow::Result<()> {
    let program = write_fixture(
        "
let x = 4;
let y = x();
let d = 3;",
    )?;
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    launch(&mut session, &program)?;
    configuration_done(&mut session)?;

    let stopped = session.client.wait_for_event("stopped")?;
    assert_eq!(stopped["body"]["reason"].as_str(), Some("exception"));
    assert_eq!(
        stopped["body"]["description"].as_str(),
        Some("RUNTIME_ERROR")
    );

    let frames = stack_frames(&mut session)?;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["name"].as_str(), Some("main"));
    assert_eq!(frames[0]["line"].as_i64(), Some(3));

    let seq = session
        .client
        .send_request("exceptionInfo", json!({ "threadId": 1 }))?;
    let response = session.client.read_response(seq)?;
    let description = response["body"]["description"].as_str().unwrap_or_default();
    assert!(
        description.contains("calling non-function"),
        "unexpected description: {description}"
    );

    let event = step(&mut session, "continue")?;
    assert_eq!(event["event"].as_str(), Some("terminated"));

    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn program_output_arrives_as_output_events() -> anyhow::Result<()> {
    let program = write_fixture(
        "
puts(40 + 2)
let done = 0",
    )?;
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    launch(&mut session, &program)?;
    configuration_done(&mut session)?;

    let output = session.client.wait_for_event("output")?;
    assert_eq!(output["body"]["output"].as_str(), Some("42\n"));
    assert_eq!(output["body"]["category"].as_str(), Some("stdout"));
    let event = session.client.wait_for_event("terminated")?;
    assert_eq!(event["event"].as_str(), Some("terminated"));

    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn configuration_done_reports_the_started_thread() -> anyhow::Result<()> {
    let program = write_fixture("let x = 1")?;
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    launch(&mut session, &program)?;
    configuration_done(&mut session)?;
    let thread = session.client.wait_for_event("thread")?;
    assert_eq!(thread["body"]["reason"].as_str(), Some("started"));
    assert_eq!(thread["body"]["threadId"].as_i64(), Some(1));
    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn unsupported_requests_get_a_structured_error() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    let seq = session
        .client
        .send_request("evaluate", json!({ "expression": "x" }))?;
    let response = session.client.read_response(seq)?;
    assert_response(&response, seq, false);
    assert_eq!(response["message"].as_str(), Some("unsupported"));
    session.shutdown();
    Ok(())
}

#[test]
#[serial]
fn disconnect_ends_the_session_cleanly() -> anyhow::Result<()> {
    let mut session = DapSession::start()?;
    initialize(&mut session)?;
    let response = session.disconnect()?;
    assert_eq!(response["success"].as_bool(), Some(true));
    session.shutdown();
    Ok(())
}
