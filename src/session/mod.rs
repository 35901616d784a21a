// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared control state of a calibration run.
//!
//! A [`CalSession`] holds the worker registry, the command queue and the
//! result queue that the controller and its workers use to coordinate. Every
//! operation is a transaction: it either applies completely or not at all.
//! If the session was created with a file, each transaction is also written to
//! that file before it's made visible, so a session can be reopened (e.g. by
//! `distcal session-show`). Reading a command isn't a transaction; where a
//! worker is up to is saved along with the next change.

mod error;

pub use error::SessionError;

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::grid::Axis;

#[derive(
    Debug, Display, EnumIter, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum SessionState {
    #[default]
    #[strum(serialize = "waiting for control")]
    WaitingForControl,

    #[strum(serialize = "waiting for workers")]
    WaitingForWorkers,

    #[strum(serialize = "initialising")]
    Initializing,

    #[strum(serialize = "processing")]
    Processing,

    #[strum(serialize = "done")]
    Done,

    #[strum(serialize = "failed")]
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    /// The state that normally follows this one.
    pub fn next(self) -> Option<SessionState> {
        match self {
            SessionState::WaitingForControl => Some(SessionState::WaitingForWorkers),
            SessionState::WaitingForWorkers => Some(SessionState::Initializing),
            SessionState::Initializing => Some(SessionState::Processing),
            SessionState::Processing => Some(SessionState::Done),
            SessionState::Done | SessionState::Failed => None,
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerType {
    #[strum(serialize = "kernel")]
    Kernel,

    #[strum(serialize = "solver")]
    Solver,
}

/// Where a worker can be found and what it covers. Kernels describe their
/// data; solvers their port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub port: Option<u16>,
    pub filesystem: Option<String>,
    pub path: Option<PathBuf>,
    pub freq_range: Option<(f64, f64)>,
    pub time_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub process_id: String,
    pub worker_type: WorkerType,

    /// The position of this worker among the workers of its type. Never
    /// changes once assigned.
    pub index: usize,

    pub info: WorkerInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: u64,

    /// `None` addresses every worker.
    pub addressee: Option<WorkerType>,

    pub command: serde_json::Value,
}

impl CommandRecord {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_value(self.command.clone())?)
    }

    fn is_for(&self, worker_type: WorkerType) -> bool {
        self.addressee.map(|a| a == worker_type).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub command_id: u64,
    pub process_id: String,
    pub result: serde_json::Value,
}

impl ResultRecord {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_value(self.result.clone())?)
    }
}

/// Everything a session knows. This is also the layout of session files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,

    /// Why the session failed, if it did.
    pub failure: Option<String>,

    /// The process controlling the session.
    pub control: Option<String>,

    pub time_axis: Option<Axis>,
    pub workers: Vec<WorkerRegistration>,
    pub commands: Vec<CommandRecord>,
    pub results: Vec<ResultRecord>,

    /// The id of the last command each worker has read.
    pub cursors: BTreeMap<String, u64>,
}

impl SessionSnapshot {
    fn worker(&self, process_id: &str) -> Result<&WorkerRegistration, SessionError> {
        self.workers
            .iter()
            .find(|w| w.process_id == process_id)
            .ok_or_else(|| SessionError::UnknownProcess {
                process_id: process_id.to_string(),
            })
    }

    fn next_command_for(&self, process_id: &str) -> Result<Option<&CommandRecord>, SessionError> {
        let worker_type = self.worker(process_id)?.worker_type;
        let cursor = self.cursors.get(process_id).copied().unwrap_or(0);
        Ok(self
            .commands
            .iter()
            .find(|c| c.id > cursor && c.is_for(worker_type)))
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: impl Fn(SessionState) -> bool,
    ) -> Result<(), SessionError> {
        if allowed(self.state) {
            Ok(())
        } else {
            Err(SessionError::WrongState {
                operation,
                state: self.state,
            })
        }
    }
}

struct Shared {
    data: Mutex<SessionSnapshot>,
    changed: Condvar,
    file: Option<PathBuf>,
}

/// A handle to a session. Clones share the same session.
#[derive(Clone)]
pub struct CalSession {
    shared: Arc<Shared>,
}

impl Default for CalSession {
    fn default() -> Self {
        CalSession::new()
    }
}

impl CalSession {
    /// A session that only lives in memory.
    pub fn new() -> CalSession {
        CalSession::from_snapshot(SessionSnapshot::default(), None)
    }

    /// A new session that's written to `file` after every change.
    pub fn create<P: AsRef<Path>>(file: P) -> Result<CalSession, SessionError> {
        let file = file.as_ref().to_path_buf();
        let snapshot = SessionSnapshot::default();
        write_snapshot(&file, &snapshot)?;
        debug!("Created session file {}", file.display());
        Ok(CalSession::from_snapshot(snapshot, Some(file)))
    }

    /// Reopen a session written by [`CalSession::create`]. Further changes
    /// are written to the same file.
    pub fn open<P: AsRef<Path>>(file: P) -> Result<CalSession, SessionError> {
        let file = file.as_ref().to_path_buf();
        let snapshot = read_snapshot(&file)?;
        debug!("Opened session file {} ({})", file.display(), snapshot.state);
        Ok(CalSession::from_snapshot(snapshot, Some(file)))
    }

    /// Read a session file without taking part in the session.
    pub fn read_snapshot<P: AsRef<Path>>(file: P) -> Result<SessionSnapshot, SessionError> {
        read_snapshot(file.as_ref())
    }

    fn from_snapshot(snapshot: SessionSnapshot, file: Option<PathBuf>) -> CalSession {
        CalSession {
            shared: Arc::new(Shared {
                data: Mutex::new(snapshot),
                changed: Condvar::new(),
                file,
            }),
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.shared.file.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Apply `f` to the session. `f` must check everything before it changes
    /// anything. A session with a file is saved afterwards; if that fails, the
    /// change is undone. Waiters are only woken up by successful changes.
    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut SessionSnapshot) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut guard = self.lock();
        let out = match &self.shared.file {
            None => f(&mut guard)?,
            Some(file) => {
                let saved = guard.clone();
                let out = f(&mut guard)?;
                if let Err(e) = write_snapshot(file, &guard) {
                    *guard = saved;
                    return Err(e);
                }
                out
            }
        };
        self.shared.changed.notify_all();
        Ok(out)
    }

    fn lock(&self) -> MutexGuard<SessionSnapshot> {
        self.shared.data.lock().unwrap()
    }

    /// Wait until `f` returns something, the session ends or `timeout`
    /// expires.
    fn wait_for<T>(
        &self,
        timeout: Duration,
        mut f: impl FnMut(&SessionSnapshot) -> Result<Option<T>, SessionError>,
    ) -> Result<Option<T>, SessionError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if let Some(out) = f(&guard)? {
                return Ok(Some(out));
            }
            if guard.state.is_terminal() {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            guard = self
                .shared
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap()
                .0;
        }
    }

    /// Take control of the session. Only one process may do so.
    pub fn register_control(&self, process_id: &str) -> Result<(), SessionError> {
        self.transaction(|data| {
            if let Some(control) = &data.control {
                return Err(SessionError::ControlAlreadyRegistered {
                    process_id: control.clone(),
                });
            }
            data.expect_state("register a controller", |s| {
                s == SessionState::WaitingForControl
            })?;
            data.control = Some(process_id.to_string());
            data.state = SessionState::WaitingForWorkers;
            Ok(())
        })
    }

    pub fn register_kernel(&self, process_id: &str, info: WorkerInfo) -> Result<usize, SessionError> {
        self.register_worker(process_id, WorkerType::Kernel, info)
    }

    pub fn register_solver(&self, process_id: &str, info: WorkerInfo) -> Result<usize, SessionError> {
        self.register_worker(process_id, WorkerType::Solver, info)
    }

    /// Add a worker to the registry, returning its index among workers of its
    /// type.
    fn register_worker(
        &self,
        process_id: &str,
        worker_type: WorkerType,
        info: WorkerInfo,
    ) -> Result<usize, SessionError> {
        let index = self.transaction(|data| {
            data.expect_state("register a worker", |s| s < SessionState::Processing)?;
            if data.workers.iter().any(|w| w.process_id == process_id)
                || data.control.as_deref() == Some(process_id)
            {
                return Err(SessionError::DuplicateProcess {
                    process_id: process_id.to_string(),
                });
            }
            let index = data
                .workers
                .iter()
                .filter(|w| w.worker_type == worker_type)
                .count();
            data.workers.push(WorkerRegistration {
                process_id: process_id.to_string(),
                worker_type,
                index,
                info,
            });
            Ok(index)
        })?;
        debug!("Registered {worker_type} {index}: '{process_id}'");
        Ok(index)
    }

    /// The registered workers of a type, by index.
    pub fn workers(&self, worker_type: WorkerType) -> Vec<WorkerRegistration> {
        self.lock()
            .workers
            .iter()
            .filter(|w| w.worker_type == worker_type)
            .cloned()
            .collect()
    }

    /// Move the session to `state`, which must follow the current state.
    pub fn set_state(&self, state: SessionState) -> Result<(), SessionError> {
        if state == SessionState::Failed {
            return self.fail("no reason given");
        }
        self.transaction(|data| {
            if data.state.next() != Some(state) {
                return Err(SessionError::BadTransition {
                    from: data.state,
                    to: state,
                });
            }
            data.state = state;
            Ok(())
        })?;
        debug!("Session is now {state}");
        Ok(())
    }

    /// Mark the session as failed. Only possible before the session ended.
    pub fn fail(&self, reason: &str) -> Result<(), SessionError> {
        self.transaction(|data| {
            if data.state.is_terminal() {
                return Err(SessionError::BadTransition {
                    from: data.state,
                    to: SessionState::Failed,
                });
            }
            data.state = SessionState::Failed;
            data.failure = Some(reason.to_string());
            Ok(())
        })?;
        warn!("Session failed: {reason}");
        Ok(())
    }

    pub fn set_time_axis(&self, axis: Axis) -> Result<(), SessionError> {
        self.transaction(|data| {
            data.expect_state("set the time axis", |s| !s.is_terminal())?;
            data.time_axis = Some(axis);
            Ok(())
        })
    }

    pub fn time_axis(&self) -> Option<Axis> {
        self.lock().time_axis.clone()
    }

    /// Queue a command for every worker of a type (or every worker if
    /// `addressee` is `None`), returning the command's id.
    pub fn post_command<T: Serialize>(
        &self,
        addressee: Option<WorkerType>,
        command: &T,
    ) -> Result<u64, SessionError> {
        let command = serde_json::to_value(command)?;
        let id = self.transaction(|data| {
            data.expect_state("post a command", |s| !s.is_terminal())?;
            let id = data.commands.last().map(|c| c.id + 1).unwrap_or(1);
            data.commands.push(CommandRecord {
                id,
                addressee,
                command,
            });
            Ok(id)
        })?;
        trace!("Posted command {id}");
        Ok(id)
    }

    /// Take the next unread command for a worker, if there is one. Cursors
    /// only move in memory; a session file gets them with the next change.
    pub fn next_command(&self, process_id: &str) -> Result<Option<CommandRecord>, SessionError> {
        let mut guard = self.lock();
        let command = guard.next_command_for(process_id)?.cloned();
        if let Some(c) = &command {
            guard.cursors.insert(process_id.to_string(), c.id);
        }
        Ok(command)
    }

    /// As [`CalSession::next_command`], but wait up to `timeout` for one to
    /// be posted. `None` means nothing arrived in time, or the session has
    /// ended.
    pub fn wait_for_command(
        &self,
        process_id: &str,
        timeout: Duration,
    ) -> Result<Option<CommandRecord>, SessionError> {
        let available = self.wait_for(timeout, |data| {
            Ok(data.next_command_for(process_id)?.map(|_| ()))
        })?;
        match available {
            Some(()) => self.next_command(process_id),
            None => Ok(None),
        }
    }

    /// Store a worker's result for a command.
    pub fn post_result<T: Serialize>(
        &self,
        command_id: u64,
        process_id: &str,
        result: &T,
    ) -> Result<(), SessionError> {
        let result = serde_json::to_value(result)?;
        self.transaction(|data| {
            data.expect_state("post a result", |s| !s.is_terminal())?;
            data.worker(process_id)?;
            if !data.commands.iter().any(|c| c.id == command_id) {
                return Err(SessionError::UnknownCommand { id: command_id });
            }
            if data
                .results
                .iter()
                .any(|r| r.command_id == command_id && r.process_id == process_id)
            {
                return Err(SessionError::DuplicateResult {
                    command_id,
                    process_id: process_id.to_string(),
                });
            }
            data.results.push(ResultRecord {
                command_id,
                process_id: process_id.to_string(),
                result,
            });
            Ok(())
        })
    }

    /// Every result posted for a command so far.
    pub fn results(&self, command_id: u64) -> Vec<ResultRecord> {
        self.lock()
            .results
            .iter()
            .filter(|r| r.command_id == command_id)
            .cloned()
            .collect()
    }

    /// Wait up to `timeout` for at least `num_results` results for a command.
    /// `None` means they didn't arrive in time (or the session ended first).
    pub fn wait_for_result(
        &self,
        command_id: u64,
        num_results: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<ResultRecord>>, SessionError> {
        self.wait_for(timeout, |data| {
            let results: Vec<ResultRecord> = data
                .results
                .iter()
                .filter(|r| r.command_id == command_id)
                .cloned()
                .collect();
            Ok((results.len() >= num_results).then_some(results))
        })
    }
}

fn read_snapshot(file: &Path) -> Result<SessionSnapshot, SessionError> {
    let reader = BufReader::new(File::open(file)?);
    serde_json::from_reader(reader).map_err(|err| SessionError::BadSnapshot {
        file: file.to_path_buf(),
        err,
    })
}

/// Write to a temporary file first, so that readers never see a partial
/// session.
fn write_snapshot(file: &Path, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
    let mut tmp = file.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, file)?;
    Ok(())
}
