//! Applications and their lifecycle.
//!
//! An application is a [`Library`] bundle of five routines plus a state
//! machine: INIT --load--> READY --start--> RUNNING --stop--> STOPPED
//! --unload--> gone. Hooks report an integer status; non-zero surfaces as a
//! typed application fault. The process routine runs on every port worker
//! concurrently with no serialization; flow tables are the only shared
//! mutable state an application may touch from it.

use crate::context::Context;
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use std::sync::Arc;

/// A lifecycle hook: load, unload, start, or stop.
pub type HookFn = Arc<dyn Fn(&Dataplane) -> i32 + Send + Sync>;

/// The per-packet entry point.
pub type ProcessFn = Arc<dyn Fn(&Dataplane, &mut Context) -> i32 + Send + Sync>;

/// The five routines an application binds to the runtime. Loading mechanics
/// live with the embedder; the runtime only sees the function references.
#[derive(Clone)]
pub struct Library {
    pub load: HookFn,
    pub unload: HookFn,
    pub start: HookFn,
    pub stop: HookFn,
    pub process: ProcessFn,
}

impl Library {
    pub fn new<L, U, S, T, P>(load: L, unload: U, start: S, stop: T, process: P) -> Self
    where
        L: Fn(&Dataplane) -> i32 + Send + Sync + 'static,
        U: Fn(&Dataplane) -> i32 + Send + Sync + 'static,
        S: Fn(&Dataplane) -> i32 + Send + Sync + 'static,
        T: Fn(&Dataplane) -> i32 + Send + Sync + 'static,
        P: Fn(&Dataplane, &mut Context) -> i32 + Send + Sync + 'static,
    {
        Self {
            load: Arc::new(load),
            unload: Arc::new(unload),
            start: Arc::new(start),
            stop: Arc::new(stop),
            process: Arc::new(process),
        }
    }

    /// A library whose hooks all succeed and whose process routine leaves
    /// the context untouched.
    pub fn inert() -> Self {
        Self::new(|_| 0, |_| 0, |_| 0, |_| 0, |_, _| 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Init,
    Ready,
    Running,
    Stopped,
}

impl AppState {
    pub(crate) fn name(self) -> &'static str {
        match self {
            AppState::Init => "init",
            AppState::Ready => "ready",
            AppState::Running => "running",
            AppState::Stopped => "stopped",
        }
    }
}

/// A library bound to a dataplane, with its lifecycle state.
pub struct Application {
    lib: Library,
    state: AppState,
}

impl Application {
    pub fn new(lib: Library) -> Self {
        Self {
            lib,
            state: AppState::Init,
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn library(&self) -> &Library {
        &self.lib
    }

    fn run_hook(hook: &HookFn, dp: &Dataplane) -> Result<()> {
        match hook.as_ref()(dp) {
            0 => Ok(()),
            status => Err(Error::AppFault(status)),
        }
    }

    /// INIT -> READY. The hook typically creates tables and installs flows.
    pub fn load(&mut self, dp: &Dataplane) -> Result<()> {
        if self.state != AppState::Init {
            return Err(Error::BadState {
                op: "load",
                state: self.state.name(),
            });
        }
        Self::run_hook(&self.lib.load, dp)?;
        self.state = AppState::Ready;
        Ok(())
    }

    /// READY -> RUNNING. A failed hook leaves the application READY, so a
    /// following stop is a no-op.
    pub fn start(&mut self, dp: &Dataplane) -> Result<()> {
        if self.state != AppState::Ready {
            return Err(Error::BadState {
                op: "start",
                state: self.state.name(),
            });
        }
        Self::run_hook(&self.lib.start, dp)?;
        self.state = AppState::Running;
        Ok(())
    }

    /// RUNNING -> STOPPED. Stopping an application that never reached
    /// RUNNING is a no-op rather than an error.
    pub fn stop(&mut self, dp: &Dataplane) -> Result<()> {
        match self.state {
            AppState::Running => {
                Self::run_hook(&self.lib.stop, dp)?;
                self.state = AppState::Stopped;
                Ok(())
            }
            AppState::Init | AppState::Ready | AppState::Stopped => Ok(()),
        }
    }

    /// Final transition; the owner drops the application afterwards. Valid
    /// from STOPPED, or from READY when the application never started.
    pub fn unload(&mut self, dp: &Dataplane) -> Result<()> {
        match self.state {
            AppState::Stopped | AppState::Ready => Self::run_hook(&self.lib.unload, dp),
            AppState::Init => Ok(()),
            AppState::Running => Err(Error::BadState {
                op: "unload",
                state: self.state.name(),
            }),
        }
    }

    /// Runs the per-packet routine. Returns the application's raw status.
    pub fn process(&self, dp: &Dataplane, ctx: &mut Context) -> i32 {
        self.lib.process.as_ref()(dp, ctx)
    }
}
