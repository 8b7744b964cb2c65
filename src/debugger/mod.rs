//! The debug driver: translates source-line commands (breakpoints, step
//! over/into/out, continue) into instruction-level stop conditions over the
//! VM's predicate-driven execution.

pub mod error;

use crate::compile;
use crate::debugger::error::Fault;
use crate::lang::parser;
use crate::vm::object::Object;
use crate::vm::{RunOutcome, RuntimeError, Vm, VmState};
use std::fmt;
use std::path::PathBuf;

/// Session-level state of the debuggee, as reported to the client.
/// A driver that has faulted never returns to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Off,
    Stopped,
    Done,
    CompilerError,
    RuntimeError,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverState::Off => "OFF",
            DriverState::Stopped => "STOPPED",
            DriverState::Done => "DONE",
            DriverState::CompilerError => "COMPILER_ERROR",
            DriverState::RuntimeError => "RUNTIME_ERROR",
        };
        f.write_str(s)
    }
}

/// A displayable variable within a [`DebugFrame`]. Function-like values
/// show the literal string `function`; everything else shows the VM's
/// inspection string and object kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugVar {
    pub name: String,
    pub value: String,
    pub kind: String,
    pub reference: i64,
}

/// A collected call-stack entry. `id` counts from the outermost frame
/// (0 = `main`) inward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugFrame {
    pub id: usize,
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub vars: Vec<DebugVar>,
}

/// Stateful debug controller owning the active VM, the breakpoint set and
/// the fault log.
#[derive(Default)]
pub struct Driver {
    vm: Option<Vm>,
    breakpoints: Vec<u32>,
    pub source_path: Option<PathBuf>,
    stopped_on_breakpoint: bool,
    frames: Vec<DebugFrame>,
    errors: Vec<Fault>,
}

impl Driver {
    pub fn new() -> Self {
        Driver::default()
    }

    /// Parse, compile and instantiate a fresh VM positioned at the first
    /// instruction. Parser faults are recorded in full; the first one is
    /// returned. A compile fault is recorded and returned likewise.
    pub fn start(&mut self, source: &str) -> Result<(), Fault> {
        self.vm = None;
        self.errors.clear();
        self.frames.clear();
        self.stopped_on_breakpoint = false;

        let (program, parse_errors) = parser::parse(source);
        if !parse_errors.is_empty() {
            self.errors
                .extend(parse_errors.into_iter().map(Fault::Parse));
            return Err(self.errors[0].clone());
        }
        let compiled = match compile::compile(&program) {
            Ok(compiled) => compiled,
            Err(err) => {
                let fault = Fault::Compile(err);
                self.errors.push(fault.clone());
                return Err(fault);
            }
        };

        log::debug!(target: "driver", "program compiled, vm ready at ip 0");
        self.vm = Some(Vm::new(compiled));
        // Re-resolve any breakpoints submitted before the program existed.
        if !self.breakpoints.is_empty() {
            let lines = self.breakpoints.clone();
            self.set_breakpoints(&lines);
        }
        Ok(())
    }

    /// Replace the breakpoint set. Lines without executable instructions
    /// snap forward to the next mapped line; the per-input resolved lines
    /// are returned so the client can be told where each one landed.
    pub fn set_breakpoints(&mut self, lines: &[u32]) -> Vec<u32> {
        let resolved: Vec<u32> = lines
            .iter()
            .map(|&line| match &self.vm {
                Some(vm) => vm.resolve_line(line),
                None => line,
            })
            .collect();
        let mut set = resolved.clone();
        set.sort_unstable();
        set.dedup();
        log::debug!(target: "driver", "breakpoints replaced: {set:?}");
        self.breakpoints = set;
        resolved
    }

    pub fn breakpoints(&self) -> &[u32] {
        &self.breakpoints
    }

    pub fn state(&self) -> DriverState {
        if let Some(first) = self.errors.first() {
            return match first {
                Fault::Runtime(_) => DriverState::RuntimeError,
                _ => DriverState::CompilerError,
            };
        }
        match &self.vm {
            None => DriverState::Off,
            Some(vm) => match vm.state() {
                VmState::Stopped => DriverState::Stopped,
                VmState::Done => DriverState::Done,
            },
        }
    }

    pub fn errors(&self) -> &[Fault] {
        &self.errors
    }

    /// True iff the last pause was produced by a breakpoint predicate.
    /// Cleared by every step.
    pub fn stopped_on_breakpoint(&self) -> bool {
        self.stopped_on_breakpoint
    }

    /// Line of the instruction the VM executes next, while stopped.
    pub fn current_line(&self) -> Option<u32> {
        self.vm
            .as_ref()?
            .source_location()
            .map(|loc| loc.range.start.line)
    }

    pub fn call_depth(&self) -> Option<usize> {
        self.vm.as_ref().map(Vm::call_depth)
    }

    /// Program output produced by `puts` since the last drain.
    pub fn take_output(&mut self) -> Vec<String> {
        self.vm.as_mut().map(Vm::take_output).unwrap_or_default()
    }

    /// Resume the VM until a breakpoint line is reached or the program
    /// completes. Returns whether a breakpoint fired. Pausing on a
    /// breakpoint and resuming would re-fire at the same instruction, so a
    /// continue that starts on a breakpoint first steps over one line.
    pub fn continue_run(&mut self) -> Result<bool, Fault> {
        if self.state() != DriverState::Stopped {
            return Ok(false);
        }
        if self.stopped_on_breakpoint {
            self.step_over()?;
            if self.state() != DriverState::Stopped {
                return Ok(false);
            }
        }
        let lines = self.breakpoints.clone();
        let Some(vm) = self.vm.as_mut() else {
            return Ok(false);
        };
        let outcome = vm.run_with_condition(&mut |vm| {
            vm.source_location()
                .map(|loc| lines.contains(&loc.range.start.line))
                .unwrap_or(false)
        });
        match self.finish_run(outcome) {
            Ok(fired) => {
                self.stopped_on_breakpoint = fired;
                Ok(fired)
            }
            Err(fault) => Err(fault),
        }
    }

    /// Run until execution reaches a different line at the same or a
    /// shallower call depth.
    pub fn step_over(&mut self) -> Result<bool, Fault> {
        self.step(|line, depth| {
            move |vm: &Vm| {
                vm.source_location()
                    .map(|loc| loc.range.start.line != line && vm.call_depth() <= depth)
                    .unwrap_or(false)
            }
        })
    }

    /// Like [`Driver::step_over`], but also fires on the first instruction
    /// of a callee's body, so a call on the current line is entered.
    pub fn step_into(&mut self) -> Result<bool, Fault> {
        self.step(|line, depth| {
            move |vm: &Vm| {
                if vm.call_depth() > depth {
                    return true;
                }
                vm.source_location()
                    .map(|loc| loc.range.start.line != line && vm.call_depth() <= depth)
                    .unwrap_or(false)
            }
        })
    }

    /// Run until the current frame returns. At the outermost frame this
    /// runs the program to completion.
    pub fn step_out(&mut self) -> Result<bool, Fault> {
        self.step(|_line, depth| move |vm: &Vm| vm.call_depth() < depth)
    }

    fn step<P, F>(&mut self, make_pred: F) -> Result<bool, Fault>
    where
        F: FnOnce(u32, usize) -> P,
        P: FnMut(&Vm) -> bool,
    {
        self.stopped_on_breakpoint = false;
        if self.state() != DriverState::Stopped {
            return Ok(false);
        }
        let Some(vm) = self.vm.as_mut() else {
            return Ok(false);
        };
        let Some(start) = vm.source_location() else {
            return Ok(false);
        };
        let mut pred = make_pred(start.range.start.line, vm.call_depth());
        let outcome = vm.run_with_condition(&mut pred);
        self.finish_run(outcome)
    }

    fn finish_run(&mut self, outcome: Result<RunOutcome, RuntimeError>) -> Result<bool, Fault> {
        match outcome {
            Ok(RunOutcome::PredicateFired) => Ok(true),
            Ok(RunOutcome::Completed) => Ok(false),
            Err(err) => {
                let fault = Fault::Runtime(err);
                self.errors.push(fault.clone());
                Err(fault)
            }
        }
    }

    /// Walk the VM's call stack from outermost to innermost, reading each
    /// frame's own source location and live variables. The outermost frame
    /// is relabeled `main`. The result is cached for the `variables`
    /// request and recomputed on every call.
    pub fn collect_frames(&mut self) -> Vec<DebugFrame> {
        let Some(vm) = &self.vm else {
            self.frames.clear();
            return Vec::new();
        };
        let mut frames = Vec::with_capacity(vm.frames_index());
        for index in 0..vm.frames_index() {
            let (line, column) = vm
                .source_location_in_frame(index)
                .map(|loc| (loc.range.start.line, loc.range.start.col))
                .unwrap_or((0, 0));
            let name = if index == 0 {
                "main".to_string()
            } else {
                vm.frames()[index].name().to_string()
            };
            let vars = vm
                .active_objects(index)
                .into_iter()
                .map(|(name, object)| debug_var(name, &object))
                .collect();
            frames.push(DebugFrame {
                id: index,
                name,
                line,
                column,
                vars,
            });
        }
        self.frames = frames.clone();
        frames
    }

    /// The frames cached by the last [`Driver::collect_frames`] call.
    pub fn frames(&self) -> &[DebugFrame] {
        &self.frames
    }
}

fn debug_var(name: String, object: &Object) -> DebugVar {
    if object.is_callable() {
        DebugVar {
            name,
            value: "function".to_string(),
            kind: "function".to_string(),
            reference: 0,
        }
    } else {
        DebugVar {
            name,
            value: object.inspect(),
            kind: object.kind().to_string(),
            reference: 0,
        }
    }
}
