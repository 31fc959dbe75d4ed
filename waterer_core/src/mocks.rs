//! Test and helper fakes for waterer_core collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use waterer_traits::{BoxError, HaltCallback, Maintenance, Recorder, Transport};

use crate::datalog::{DataSink, TickRecord};
use crate::error::Result;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
struct Script {
    once: HashMap<String, VecDeque<Vec<String>>>,
    always: Vec<(String, Vec<String>)>,
    outbox: VecDeque<String>,
    sent: Vec<String>,
}

/// Transport that replays canned replies.
///
/// `reply(cmd, lines)` queues a one-shot answer for an exact command;
/// `always(prefix, lines)` answers any command starting with `prefix` once the
/// one-shot queue for it is empty. Unscripted commands get no reply at all.
/// Clones share state, so a clone kept by the test can inspect what was sent.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, cmd: &str, lines: &[&str]) -> Self {
        lock(&self.inner)
            .once
            .entry(cmd.to_owned())
            .or_default()
            .push_back(lines.iter().map(|l| (*l).to_owned()).collect());
        self
    }

    pub fn always(self, prefix: &str, lines: &[&str]) -> Self {
        lock(&self.inner)
            .always
            .push((prefix.to_owned(), lines.iter().map(|l| (*l).to_owned()).collect()));
        self
    }

    /// Commands written so far.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.inner).sent.clone()
    }
}

impl Transport for ScriptedTransport {
    fn write_line(&mut self, line: &str) -> std::result::Result<(), BoxError> {
        let mut s = lock(&self.inner);
        let cmd = line.trim().to_owned();
        s.sent.push(cmd.clone());
        let scripted = s.once.get_mut(&cmd).and_then(VecDeque::pop_front);
        let lines = scripted.or_else(|| {
            s.always
                .iter()
                .find(|(p, _)| cmd.starts_with(p.as_str()))
                .map(|(_, l)| l.clone())
        });
        if let Some(lines) = lines {
            s.outbox.extend(lines);
        }
        Ok(())
    }

    fn read_line(&mut self) -> std::result::Result<Option<String>, BoxError> {
        Ok(lock(&self.inner).outbox.pop_front())
    }

    fn clear(&mut self) -> std::result::Result<(), BoxError> {
        lock(&self.inner).outbox.clear();
        Ok(())
    }

    fn bytes_waiting(&mut self) -> std::result::Result<usize, BoxError> {
        Ok(lock(&self.inner).outbox.iter().map(|l| l.len() + 1).sum())
    }
}

/// Data sink that keeps rows in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<TickRecord>>>,
}

impl MemorySink {
    pub fn rows(&self) -> Vec<TickRecord> {
        lock(&self.rows).clone()
    }
}

impl DataSink for MemorySink {
    fn add_entry(&mut self, record: &TickRecord) -> Result<()> {
        lock(&self.rows).push(record.clone());
        Ok(())
    }
}

/// Recorder that only counts calls.
#[derive(Clone, Default)]
pub struct CountingRecorder {
    pub starts: Arc<Mutex<u32>>,
    pub stops: Arc<Mutex<Vec<Duration>>>,
}

impl Recorder for CountingRecorder {
    fn start_recording(&mut self) -> std::result::Result<(), BoxError> {
        *lock(&self.starts) += 1;
        Ok(())
    }

    fn schedule_stop_recording(&mut self, delay: Duration) -> std::result::Result<(), BoxError> {
        lock(&self.stops).push(delay);
        Ok(())
    }
}

/// Maintenance trigger fired by hand from tests.
#[derive(Default)]
pub struct ManualMaintenance {
    begin: Vec<HaltCallback>,
    end: Vec<HaltCallback>,
}

impl ManualMaintenance {
    pub fn press(&self) {
        self.begin.iter().for_each(|cb| cb());
    }

    pub fn release(&self) {
        self.end.iter().for_each(|cb| cb());
    }
}

impl Maintenance for ManualMaintenance {
    fn on_halt_begin(&mut self, callback: HaltCallback) {
        self.begin.push(callback);
    }

    fn on_halt_end(&mut self, callback: HaltCallback) {
        self.end.push(callback);
    }
}
