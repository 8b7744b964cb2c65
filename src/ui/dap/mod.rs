//! DAP session: a sequential poll/dispatch loop over stdio (or any byte
//! stream), a shared serialized writer for events, and one worker thread
//! that performs the launch-time initial run.
//!
//! Request routing follows the protocol contract: every supported request
//! maps to at most one driver call plus one response, and execution-driving
//! requests additionally emit a single stopped/terminated event derived
//! from the driver state afterwards.

mod server;

pub use server::DapServer;

use crate::debugger::error::Fault;
use crate::debugger::{DebugVar, Driver, DriverState};
use anyhow::anyhow;
use dap::events::{Event, OutputEventBody, StoppedEventBody, ThreadEventBody};
use dap::requests::{Command, Request};
use dap::responses::{
    ContinueResponse, ExceptionInfoResponse, ResponseBody, ScopesResponse,
    SetBreakpointsResponse, SetExceptionBreakpointsResponse, StackTraceResponse, ThreadsResponse,
    VariablesResponse,
};
use dap::types::{
    Breakpoint, Capabilities, ExceptionBreakMode, ExceptionDetails, OutputEventCategory, Scope,
    Source, StackFrame, StoppedEventReason, Thread, ThreadEventReason, Variable,
};
use itertools::Itertools;
use serde::Deserialize;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

/// The debuggee is single threaded; this is the one thread ever reported.
const THREAD_ID: i64 = 1;

/// Run a DAP session over stdin/stdout until the client disconnects or the
/// stream ends.
pub fn run_stdio() -> anyhow::Result<()> {
    DapSession::new(std::io::stdin(), std::io::stdout()).run()
}

pub struct DapSession<R: Read, W: Write + Send + 'static> {
    server: DapServer<R, W>,
    driver: Arc<Mutex<Driver>>,
    source: Option<Source>,
    /// Raised on disconnect; scopes/variables handlers observe it and
    /// return without responding.
    stop_debug: Arc<AtomicBool>,
    /// Set after an exception stop event; the next step or continue emits
    /// `terminated` instead of resuming.
    terminate_next: Arc<AtomicBool>,
    config_done: Option<mpsc::Sender<()>>,
    launch_worker: Option<JoinHandle<()>>,
}

impl<R: Read, W: Write + Send + 'static> DapSession<R, W> {
    pub fn new(input: R, output: W) -> DapSession<R, W> {
        DapSession {
            server: DapServer::new(input, output),
            driver: Arc::new(Mutex::new(Driver::new())),
            source: None,
            stop_debug: Arc::new(AtomicBool::new(false)),
            terminate_next: Arc::new(AtomicBool::new(false)),
            config_done: None,
            launch_worker: None,
        }
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        loop {
            let req = match self.server.poll_request() {
                Ok(Some(req)) => req,
                Ok(None) => {
                    log::debug!(target: "dap", "end of input stream");
                    break;
                }
                Err(err) => {
                    self.shutdown();
                    return Err(anyhow!("transport failure: {err}"));
                }
            };

            match self.handle_request(req) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    self.shutdown();
                    return Err(err);
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.stop_debug.store(true, Ordering::SeqCst);
        self.config_done = None;
        if let Some(worker) = self.launch_worker.take() {
            let _ = worker.join();
        }
    }

    /// Returns `Ok(false)` when the session should end.
    fn handle_request(&mut self, req: Request) -> anyhow::Result<bool> {
        match req.command {
            Command::Initialize(_) => {
                // The client must observe `initialized` before it sends
                // `configurationDone`, so the event goes out first.
                self.server.send_event(Event::Initialized)?;
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Initialize(Capabilities {
                        supports_configuration_done_request: Some(true),
                        supports_exception_info_request: Some(true),
                        ..Default::default()
                    }),
                )?;
            }

            Command::Launch(ref args) => {
                #[derive(Deserialize, Debug, Default)]
                #[serde(rename_all = "camelCase")]
                struct LaunchArgs {
                    program: Option<PathBuf>,
                }

                let launch_args: LaunchArgs = args
                    .additional_data
                    .clone()
                    .and_then(|data| serde_json::from_value(data).ok())
                    .unwrap_or_default();
                let program = launch_args.program.or_else(|| {
                    self.source
                        .as_ref()
                        .and_then(|source| source.path.as_ref().map(PathBuf::from))
                });
                let Some(path) = program else {
                    self.server
                        .respond_error(req.seq, "missing launch argument `program`")?;
                    return Ok(true);
                };
                let code = match std::fs::read_to_string(&path) {
                    Ok(code) => code,
                    Err(err) => {
                        self.server.respond_error(
                            req.seq,
                            format!("could not read {}: {err}", path.display()),
                        )?;
                        return Ok(true);
                    }
                };
                if self.source.is_none() {
                    self.source = Some(Source {
                        name: path
                            .file_name()
                            .map(|name| name.to_string_lossy().into_owned()),
                        path: Some(path.display().to_string()),
                        ..Default::default()
                    });
                }
                {
                    let mut driver = lock(&self.driver);
                    driver.source_path = Some(path);
                    if let Err(fault) = driver.start(&code) {
                        log::warn!(target: "dap", "could not start vm: {fault}");
                    }
                }
                self.server.respond_success(req.seq, ResponseBody::Launch)?;
                self.spawn_initial_run();
            }

            Command::SetBreakpoints(ref args) => {
                let lines = args
                    .breakpoints
                    .iter()
                    .flatten()
                    .map(|bp| bp.line.max(0) as u32)
                    .collect_vec();
                let resolved = lock(&self.driver).set_breakpoints(&lines);
                self.source = Some(args.source.clone());
                let breakpoints = resolved
                    .iter()
                    .map(|&line| Breakpoint {
                        verified: true,
                        line: Some(line as i64),
                        source: Some(args.source.clone()),
                        ..Default::default()
                    })
                    .collect_vec();
                self.server.respond_success(
                    req.seq,
                    ResponseBody::SetBreakpoints(SetBreakpointsResponse { breakpoints }),
                )?;
            }

            Command::SetExceptionBreakpoints(_) => {
                self.server.respond_success(
                    req.seq,
                    ResponseBody::SetExceptionBreakpoints(SetExceptionBreakpointsResponse {
                        breakpoints: None,
                    }),
                )?;
            }

            Command::ConfigurationDone => {
                self.server
                    .respond_success(req.seq, ResponseBody::ConfigurationDone)?;
                self.server.send_event(Event::Thread(ThreadEventBody {
                    reason: ThreadEventReason::Started,
                    thread_id: THREAD_ID,
                }))?;
                if let Some(ready) = self.config_done.take() {
                    let _ = ready.send(());
                }
            }

            Command::Continue(_) => {
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Continue(ContinueResponse {
                        all_threads_continued: Some(true),
                    }),
                )?;
                self.run_driver_op(|driver| driver.continue_run())?;
            }
            Command::Next(_) => {
                self.server.respond_success(req.seq, ResponseBody::Next)?;
                self.run_driver_op(|driver| driver.step_over())?;
            }
            Command::StepIn(_) => {
                self.server.respond_success(req.seq, ResponseBody::StepIn)?;
                self.run_driver_op(|driver| driver.step_into())?;
            }
            Command::StepOut(_) => {
                self.server.respond_success(req.seq, ResponseBody::StepOut)?;
                self.run_driver_op(|driver| driver.step_out())?;
            }

            Command::Threads => {
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Threads(ThreadsResponse {
                        threads: vec![Thread {
                            id: THREAD_ID,
                            name: "main".to_string(),
                        }],
                    }),
                )?;
            }

            Command::StackTrace(_) => {
                let body = {
                    let mut driver = lock(&self.driver);
                    if driver.state() == DriverState::CompilerError {
                        // No frames exist; synthesize one at the fault.
                        let (line, column) = driver
                            .errors()
                            .first()
                            .map(|fault| (fault.line() as i64, fault.col() as i64))
                            .unwrap_or((0, 0));
                        StackTraceResponse {
                            stack_frames: vec![StackFrame {
                                id: 0,
                                name: "Compiler Error".to_string(),
                                source: self.source.clone(),
                                line,
                                column,
                                ..Default::default()
                            }],
                            total_frames: Some(1),
                        }
                    } else {
                        let frames = driver.collect_frames();
                        // Innermost frame first, matching DAP.
                        let stack_frames = frames
                            .iter()
                            .rev()
                            .map(|frame| StackFrame {
                                id: frame.id as i64,
                                name: frame.name.clone(),
                                source: self.source.clone(),
                                line: frame.line as i64,
                                column: frame.column as i64,
                                ..Default::default()
                            })
                            .collect_vec();
                        StackTraceResponse {
                            total_frames: Some(stack_frames.len() as i64),
                            stack_frames,
                        }
                    }
                };
                self.server
                    .respond_success(req.seq, ResponseBody::StackTrace(body))?;
            }

            Command::Scopes(ref args) => {
                if self.stop_debug.load(Ordering::SeqCst) {
                    return Ok(true);
                }
                let mut scopes = Vec::with_capacity(2);
                if args.frame_id > 0 {
                    scopes.push(Scope {
                        name: "Local".to_string(),
                        variables_reference: args.frame_id + 1,
                        expensive: false,
                        ..Default::default()
                    });
                }
                scopes.push(Scope {
                    name: "Global".to_string(),
                    variables_reference: 1,
                    expensive: false,
                    ..Default::default()
                });
                self.server
                    .respond_success(req.seq, ResponseBody::Scopes(ScopesResponse { scopes }))?;
            }

            Command::Variables(ref args) => {
                if self.stop_debug.load(Ordering::SeqCst) {
                    return Ok(true);
                }
                let index = (args.variables_reference - 1).max(0) as usize;
                let vars = lock(&self.driver)
                    .frames()
                    .get(index)
                    .map(|frame| frame.vars.clone())
                    .unwrap_or_default();
                self.server.respond_success(
                    req.seq,
                    ResponseBody::Variables(VariablesResponse {
                        variables: vars.iter().map(to_dap_variable).collect_vec(),
                    }),
                )?;
            }

            Command::ExceptionInfo(_) => {
                let (state, fault) = {
                    let driver = lock(&self.driver);
                    (driver.state(), driver.errors().first().cloned())
                };
                match fault {
                    Some(fault) => {
                        let message = fault.to_string();
                        self.server.respond_success(
                            req.seq,
                            ResponseBody::ExceptionInfo(ExceptionInfoResponse {
                                exception_id: state.to_string(),
                                description: Some(message.clone()),
                                break_mode: ExceptionBreakMode::Always,
                                details: Some(ExceptionDetails {
                                    message: Some(message),
                                    type_name: None,
                                    full_type_name: None,
                                    evaluate_name: None,
                                    stack_trace: None,
                                    inner_exception: None,
                                }),
                            }),
                        )?;
                    }
                    None => {
                        self.server.respond_error(req.seq, "no exception recorded")?;
                    }
                }
            }

            Command::Disconnect(_) => {
                self.stop_debug.store(true, Ordering::SeqCst);
                self.config_done = None;
                self.server
                    .respond_success(req.seq, ResponseBody::Disconnect)?;
                return Ok(false);
            }

            _ => {
                log::warn!(target: "dap", "unsupported command: {:?}", req.command);
                self.server.respond_error(req.seq, "unsupported")?;
            }
        }

        Ok(true)
    }

    /// Execute one driver operation under the session mutex and emit the
    /// program output plus the stop/terminated event it produced.
    fn run_driver_op(
        &mut self,
        op: fn(&mut Driver) -> Result<bool, Fault>,
    ) -> anyhow::Result<()> {
        let (lines, event) = {
            let mut driver = lock(&self.driver);
            if let Err(fault) = op(&mut driver) {
                log::warn!(target: "dap", "execution fault: {fault}");
            }
            let event = stop_event(
                driver.state(),
                driver.stopped_on_breakpoint(),
                &self.terminate_next,
            );
            (driver.take_output(), event)
        };
        for line in lines {
            self.server.send_event(output_event(line))?;
        }
        if let Some(event) = event {
            self.server.send_event(event)?;
        }
        Ok(())
    }

    /// The initial run starts only once the client ends the configuration
    /// sequence, so breakpoints submitted between `launch` and
    /// `configurationDone` are installed before the program first moves.
    fn spawn_initial_run(&mut self) {
        let (ready, wait) = mpsc::channel();
        self.config_done = Some(ready);
        let driver = Arc::clone(&self.driver);
        let output = self.server.output();
        let terminate_next = Arc::clone(&self.terminate_next);
        self.launch_worker = Some(thread::spawn(move || {
            if wait.recv().is_err() {
                return;
            }
            let (lines, event) = {
                let mut driver = match driver.lock() {
                    Ok(driver) => driver,
                    Err(_) => return,
                };
                if driver.state() == DriverState::Stopped {
                    if let Err(fault) = driver.continue_run() {
                        log::warn!(target: "dap", "error running vm: {fault}");
                    }
                }
                let event = stop_event(
                    driver.state(),
                    driver.stopped_on_breakpoint(),
                    &terminate_next,
                );
                (driver.take_output(), event)
            };
            let Ok(mut output) = output.lock() else {
                return;
            };
            for line in lines {
                if output.send_event(output_event(line)).is_err() {
                    return;
                }
            }
            if let Some(event) = event {
                if let Err(err) = output.send_event(event) {
                    log::warn!(target: "dap", "could not send stop event: {err}");
                }
            }
        }));
    }
}

fn lock(driver: &Arc<Mutex<Driver>>) -> std::sync::MutexGuard<'_, Driver> {
    driver.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One stop/terminated event for the driver state reached by the last
/// operation. After an exception stop, every later call terminates.
fn stop_event(
    state: DriverState,
    on_breakpoint: bool,
    terminate_next: &AtomicBool,
) -> Option<Event> {
    if terminate_next.load(Ordering::SeqCst) {
        return Some(Event::Terminated(None));
    }
    match state {
        DriverState::Stopped => Some(Event::Stopped(StoppedEventBody {
            reason: if on_breakpoint {
                StoppedEventReason::Breakpoint
            } else {
                StoppedEventReason::Step
            },
            description: None,
            thread_id: Some(THREAD_ID),
            preserve_focus_hint: Some(false),
            text: None,
            all_threads_stopped: Some(true),
            hit_breakpoint_ids: None,
        })),
        DriverState::CompilerError | DriverState::RuntimeError => {
            terminate_next.store(true, Ordering::SeqCst);
            Some(Event::Stopped(StoppedEventBody {
                reason: StoppedEventReason::Exception,
                description: Some(state.to_string()),
                thread_id: Some(THREAD_ID),
                preserve_focus_hint: Some(false),
                text: None,
                all_threads_stopped: Some(true),
                hit_breakpoint_ids: None,
            }))
        }
        DriverState::Done => Some(Event::Terminated(None)),
        DriverState::Off => None,
    }
}

fn output_event(line: String) -> Event {
    Event::Output(OutputEventBody {
        category: Some(OutputEventCategory::Stdout),
        output: format!("{line}\n"),
        ..Default::default()
    })
}

fn to_dap_variable(var: &DebugVar) -> Variable {
    Variable {
        name: var.name.clone(),
        value: var.value.clone(),
        type_field: Some(var.kind.clone()),
        variables_reference: var.reference,
        ..Default::default()
    }
}
