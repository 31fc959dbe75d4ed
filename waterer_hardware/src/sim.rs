//! In-process stand-in for a rig controller board.
//!
//! Speaks the same line protocol as the firmware: load-cell and DHT reads
//! answer with an `rcv` sentinel followed by a JSON payload, actuation
//! commands answer `OK`, bad arguments answer `ERROR: ...`. Pumping adds
//! water to whichever pot sits under the nozzle, every load-cell read
//! evaporates a little.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use waterer_traits::{BoxError, Transport};

/// Raw counts per gram reported by simulated load cells.
pub const SIM_COUNTS_PER_GRAM: f64 = 20.0;
/// Raw reading of an empty simulated load cell 0; each further cell adds 100.
pub const SIM_BASE_COUNTS: f64 = 8000.0;

#[derive(Debug, Clone)]
struct SimState {
    weights: Vec<f64>,
    positions: Vec<i64>,
    stepper: i64,
    servo: u8,
    stepper_attached: bool,
    servo_attached: bool,
    flow_g_per_s: f64,
    evaporation_g: f64,
    humidity: f64,
    temperature: f64,
    reads: u64,
    outbox: VecDeque<String>,
    commands: Vec<String>,
    faults: Vec<(String, u32)>,
}

/// Shared view into a [`SimulatedRig`] for scripting and inspection.
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

/// Transport that answers rig commands from an in-memory model.
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Arc<Mutex<SimState>>) -> MutexGuard<'_, SimState> {
    // A panicked test thread must not take the simulator down with it.
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl SimulatedRig {
    /// A rig with one pot per entry in `weights` (grams).
    pub fn new(weights: Vec<f64>) -> Self {
        let n = weights.len();
        Self {
            state: Arc::new(Mutex::new(SimState {
                weights,
                positions: vec![i64::MIN; n],
                stepper: 0,
                servo: 90,
                stepper_attached: false,
                servo_attached: false,
                flow_g_per_s: 10.0,
                evaporation_g: 0.0,
                humidity: 55.0,
                temperature: 21.5,
                reads: 0,
                outbox: VecDeque::new(),
                commands: Vec::new(),
                faults: Vec::new(),
            })),
        }
    }

    /// Stepper position under which each pot sits, so pumped water lands in it.
    pub fn with_positions(self, positions: Vec<i64>) -> Self {
        lock(&self.state).positions = positions;
        self
    }

    pub fn with_flow(self, grams_per_second: f64) -> Self {
        lock(&self.state).flow_g_per_s = grams_per_second;
        self
    }

    pub fn with_evaporation(self, grams_per_read: f64) -> Self {
        lock(&self.state).evaporation_g = grams_per_read;
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl SimHandle {
    /// Every command line received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).commands.clear();
    }

    pub fn weight(&self, channel: usize) -> Option<f64> {
        lock(&self.state).weights.get(channel).copied()
    }

    pub fn set_weight(&self, channel: usize, grams: f64) {
        if let Some(w) = lock(&self.state).weights.get_mut(channel) {
            *w = grams;
        }
    }

    pub fn stepper_position(&self) -> i64 {
        lock(&self.state).stepper
    }

    pub fn servo_angle(&self) -> u8 {
        lock(&self.state).servo
    }

    /// Make the next `times` commands starting with `prefix` answer `ERROR`.
    pub fn fail_next(&self, prefix: &str, times: u32) {
        lock(&self.state).faults.push((prefix.to_owned(), times));
    }
}

/// Raw counts reported for `grams` on load cell `channel`.
pub fn sim_raw_counts(channel: usize, grams: f64) -> f64 {
    SIM_BASE_COUNTS + 100.0 * channel as f64 + SIM_COUNTS_PER_GRAM * grams
}

impl SimState {
    fn take_fault(&mut self, cmd: &str) -> bool {
        if let Some(slot) = self
            .faults
            .iter_mut()
            .find(|(p, left)| *left > 0 && cmd.starts_with(p.as_str()))
        {
            slot.1 -= 1;
            return true;
        }
        false
    }

    fn noise(&self, channel: usize) -> f64 {
        let k = (self.reads * 37 + channel as u64 * 11) % 7;
        (k as f64 - 3.0) * 0.5
    }

    fn read_cells(&mut self) -> String {
        self.reads += 1;
        let evaporation = self.evaporation_g;
        if evaporation > 0.0 {
            for w in &mut self.weights {
                *w = (*w - evaporation).max(0.0);
            }
        }
        let raw: Vec<f64> = (0..self.weights.len())
            .map(|i| sim_raw_counts(i, self.weights[i]) + self.noise(i))
            .collect();
        serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_owned())
    }

    fn pump(&mut self, ms: u64, pct: u8) {
        let grams = ms as f64 / 1000.0 * self.flow_g_per_s * f64::from(pct) / 100.0;
        match self.positions.iter().position(|p| *p == self.stepper) {
            Some(i) => self.weights[i] += grams,
            None => tracing::trace!(stepper = self.stepper, grams, "sim pump spilled"),
        }
    }

    fn respond(&mut self, cmd: &str) -> Vec<String> {
        let mut parts = cmd.split_whitespace();
        let name = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();
        let ok = || vec!["OK".to_owned()];
        let err = |why: &str| vec![format!("ERROR: {why}")];
        match (name, args.as_slice()) {
            ("ok", []) => ok(),
            ("hx", [n]) if n.parse::<u32>().is_ok() => vec!["rcv".to_owned(), self.read_cells()],
            ("hx_n", []) => vec![self.weights.len().to_string()],
            ("dht", []) => vec![
                "rcv".to_owned(),
                format!("{{\"hum\": {}, \"temp\": {}}}", self.humidity, self.temperature),
            ],
            ("stepper", []) => vec![self.stepper.to_string()],
            ("stepper", [steps, rest @ ..]) => match steps.parse::<i64>() {
                Ok(s) => {
                    self.stepper += s;
                    self.stepper_attached = rest.first() != Some(&"1");
                    ok()
                }
                Err(_) => err("bad steps"),
            },
            ("servo", []) => vec![self.servo.to_string()],
            ("servo", [angle]) => match angle.parse::<u8>() {
                Ok(a) if (1..=179).contains(&a) => {
                    self.servo = a;
                    self.servo_attached = true;
                    vec![a.to_string()]
                }
                _ => err("angle out of range"),
            },
            ("pump", [ms, pct]) => match (ms.parse::<u64>(), pct.parse::<u8>()) {
                (Ok(ms), Ok(pct)) if pct <= 100 => {
                    self.pump(ms, pct);
                    ok()
                }
                _ => err("bad pump arguments"),
            },
            ("stepper_attach", [b]) => {
                self.stepper_attached = *b == "1";
                ok()
            }
            ("servo_attach", [b]) => {
                self.servo_attached = *b == "1";
                ok()
            }
            _ => err("unknown command"),
        }
    }
}

impl Transport for SimulatedRig {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        let mut st = lock(&self.state);
        let cmd = line.trim().to_owned();
        st.commands.push(cmd.clone());
        let replies = if st.take_fault(&cmd) {
            vec!["ERROR: injected fault".to_owned()]
        } else {
            st.respond(&cmd)
        };
        st.outbox.extend(replies);
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, BoxError> {
        Ok(lock(&self.state).outbox.pop_front())
    }

    fn clear(&mut self) -> Result<(), BoxError> {
        lock(&self.state).outbox.clear();
        Ok(())
    }

    fn bytes_waiting(&mut self) -> Result<usize, BoxError> {
        Ok(lock(&self.state).outbox.iter().map(|l| l.len() + 1).sum())
    }
}
