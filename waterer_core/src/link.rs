//! Request/response protocol to a rig controller board over a line transport.
//!
//! Each logical command is resent up to `n_retries` times. One attempt is:
//! clear buffers, write the line, wait `delay`, read one line. Reads that
//! take long on the board (`hx`, `dht`) first answer with the `rcv`
//! sentinel; the real payload is then awaited for up to `long_timeout`.
//! Empty replies and replies containing `ERROR` fail the attempt.
//!
//! Only those two reply kinds and transport failures are retried. A
//! well-formed reply with the wrong content (anything but `OK`, an unparsable
//! payload, a servo echo of another angle) fails the command at once with
//! [`LinkError::Unexpected`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use waterer_traits::{Clock, Transport};

use crate::error::LinkError;
use crate::hw_error::map_transport_error;

/// Reply sent by the board before a slow payload.
pub const RCV_SENTINEL: &str = "rcv";
/// Servo angles outside this range stall the horn against its end stops.
pub const SERVO_RANGE: std::ops::RangeInclusive<u8> = 1..=179;
/// Floor on the sentinel polling interval so a zero delay cannot spin.
const MIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct LinkCfg {
    pub delay: Duration,
    pub long_timeout: Duration,
    pub n_retries: u32,
    pub hx_n_ttl: Duration,
}

impl Default for LinkCfg {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            long_timeout: Duration::from_secs(30),
            n_retries: 3,
            hx_n_ttl: Duration::from_secs(300),
        }
    }
}

/// Ambient reading from the board's DHT sensor.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Dht {
    #[serde(rename = "hum")]
    pub humidity: f64,
    #[serde(rename = "temp")]
    pub temperature: f64,
}

pub struct SerialLink<T: Transport> {
    transport: T,
    cfg: LinkCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    hx_n_cache: Option<(usize, Instant)>,
}

impl<T: Transport> core::fmt::Debug for SerialLink<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SerialLink")
            .field("cfg", &self.cfg)
            .field("hx_n_cache", &self.hx_n_cache.map(|(n, _)| n))
            .finish()
    }
}

impl<T: Transport> SerialLink<T> {
    pub fn new(transport: T, cfg: LinkCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            transport,
            cfg,
            clock,
            hx_n_cache: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn exchange(&mut self, cmd: &str) -> Result<String, LinkError> {
        let io = |e: Box<dyn std::error::Error + Send + Sync>| map_transport_error(cmd, &*e);

        self.transport.clear().map_err(io)?;
        self.transport.write_line(cmd).map_err(io)?;
        self.clock.sleep(self.cfg.delay);

        let mut reply = self.transport.read_line().map_err(io)?;
        if reply.as_deref().map(str::trim) == Some(RCV_SENTINEL) {
            let poll = self.cfg.delay.max(MIN_POLL);
            let started = self.clock.now();
            while self.transport.bytes_waiting().map_err(io)? == 0
                && self.clock.now().saturating_duration_since(started) < self.cfg.long_timeout
            {
                self.clock.sleep(poll);
            }
            reply = self.transport.read_line().map_err(io)?;
        }

        let reply = reply.map(|r| r.trim().to_owned()).unwrap_or_default();
        if reply.is_empty() {
            return Err(LinkError::NoResponse {
                command: cmd.to_owned(),
            });
        }
        if reply.contains("ERROR") {
            return Err(LinkError::Device {
                command: cmd.to_owned(),
                response: reply,
            });
        }
        tracing::trace!(command = cmd, reply = %reply, "serial exchange");
        Ok(reply)
    }

    /// Send one command, resending on failure, and return the trimmed reply.
    pub fn send(&mut self, cmd: &str) -> Result<String, LinkError> {
        let attempts = self.cfg.n_retries.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self.exchange(cmd) {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    tracing::warn!(command = cmd, attempt, attempts, error = %e, "serial command failed");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or(LinkError::NoResponse {
            command: cmd.to_owned(),
        }))
    }

    fn expect_ok(&mut self, cmd: &str) -> Result<(), LinkError> {
        let reply = self.send(cmd)?;
        if reply == "OK" {
            Ok(())
        } else {
            Err(LinkError::Unexpected {
                command: cmd.to_owned(),
                response: reply,
            })
        }
    }

    /// Liveness handshake.
    pub fn cmd_ok(&mut self) -> Result<(), LinkError> {
        self.expect_ok("ok")
    }

    /// One raw reading per load cell, each averaged over `n` board samples.
    pub fn cmd_hx(&mut self, n: u32) -> Result<Vec<f64>, LinkError> {
        let cmd = format!("hx {n}");
        let reply = self.send(&cmd)?;
        serde_json::from_str::<Vec<f64>>(&reply).map_err(|_| LinkError::Unexpected {
            command: cmd,
            response: reply,
        })
    }

    /// Number of load cells on the board. Cached for `hx_n_ttl`.
    pub fn cmd_hx_n(&mut self) -> Result<usize, LinkError> {
        if let Some((n, at)) = self.hx_n_cache
            && self.clock.now().saturating_duration_since(at) < self.cfg.hx_n_ttl
        {
            return Ok(n);
        }
        let reply = self.send("hx_n")?;
        let n = reply
            .parse::<usize>()
            .map_err(|_| LinkError::Unexpected {
                command: "hx_n".to_owned(),
                response: reply,
            })?;
        self.hx_n_cache = Some((n, self.clock.now()));
        Ok(n)
    }

    pub fn cmd_dht(&mut self) -> Result<Dht, LinkError> {
        let reply = self.send("dht")?;
        serde_json::from_str::<Dht>(&reply).map_err(|_| LinkError::Unexpected {
            command: "dht".to_owned(),
            response: reply,
        })
    }

    /// Move the stepper by a relative number of steps, optionally releasing
    /// the coils afterwards.
    pub fn cmd_stepper(&mut self, steps: i64, detach: bool) -> Result<(), LinkError> {
        let cmd = if detach {
            format!("stepper {steps} 1")
        } else {
            format!("stepper {steps}")
        };
        self.expect_ok(&cmd)
    }

    pub fn cmd_servo(&mut self, angle: u8) -> Result<(), LinkError> {
        let cmd = format!("servo {angle}");
        if !SERVO_RANGE.contains(&angle) {
            return Err(LinkError::BadArgument {
                command: cmd,
                reason: format!("angle must be in [1, 179], got {angle}"),
            });
        }
        let reply = self.send(&cmd)?;
        if reply.parse::<u8>().ok() == Some(angle) {
            Ok(())
        } else {
            Err(LinkError::Unexpected {
                command: cmd,
                response: reply,
            })
        }
    }

    /// Run the pump for `ms` milliseconds at `pct` percent duty.
    pub fn cmd_pump(&mut self, ms: u64, pct: u8) -> Result<(), LinkError> {
        let cmd = format!("pump {ms} {pct}");
        if pct > 100 {
            return Err(LinkError::BadArgument {
                command: cmd,
                reason: format!("power must be <= 100, got {pct}"),
            });
        }
        self.expect_ok(&cmd)
    }

    pub fn stepper_attach(&mut self, attach: bool) -> Result<(), LinkError> {
        self.send(&format!("stepper_attach {}", u8::from(attach)))
            .map(|_| ())
    }

    pub fn servo_attach(&mut self, attach: bool) -> Result<(), LinkError> {
        self.send(&format!("servo_attach {}", u8::from(attach)))
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedTransport;
    use waterer_traits::clock::test_clock::TestClock;

    fn link(t: ScriptedTransport) -> (SerialLink<ScriptedTransport>, TestClock) {
        let clock = TestClock::new();
        let cfg = LinkCfg {
            delay: Duration::from_millis(5),
            long_timeout: Duration::from_millis(200),
            n_retries: 3,
            hx_n_ttl: Duration::from_secs(60),
        };
        (SerialLink::new(t, cfg, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn sentinel_then_payload() {
        let t = ScriptedTransport::new().reply("hx 10", &["rcv", "[1.5, 2.5]"]);
        let (mut l, _) = link(t);
        assert_eq!(l.cmd_hx(10).unwrap(), vec![1.5, 2.5]);
    }

    #[test]
    fn sentinel_without_payload_times_out_then_retries() {
        let t = ScriptedTransport::new()
            .reply("dht", &["rcv"])
            .reply("dht", &["rcv", r#"{"hum": 40.0, "temp": 20.0}"#]);
        let (mut l, clock) = link(t);
        let t0 = clock.now();
        let dht = l.cmd_dht().unwrap();
        assert_eq!(dht.humidity, 40.0);
        // first attempt waited out the long timeout on the test clock only
        assert!(clock.ms_since(t0) >= 200);
        assert_eq!(l.transport().sent(), vec!["dht", "dht"]);
    }

    #[test]
    fn error_replies_exhaust_retries() {
        let t = ScriptedTransport::new()
            .reply("ok", &["ERROR: busy"])
            .reply("ok", &["ERROR: busy"])
            .reply("ok", &["ERROR: busy"])
            .reply("ok", &["OK"]);
        let (mut l, _) = link(t);
        let err = l.cmd_ok().unwrap_err();
        assert!(matches!(err, LinkError::Device { .. }));
        assert_eq!(l.transport().sent().len(), 3);
    }

    #[test]
    fn empty_reply_is_a_failure() {
        let t = ScriptedTransport::new()
            .reply("ok", &["  "])
            .reply("ok", &["OK"]);
        let (mut l, _) = link(t);
        l.cmd_ok().unwrap();
        assert_eq!(l.transport().sent().len(), 2);
    }

    #[test]
    fn wrong_reply_is_not_resent() {
        let t = ScriptedTransport::new()
            .reply("ok", &["READY"])
            .reply("ok", &["OK"]);
        let (mut l, _) = link(t);
        let err = l.cmd_ok().unwrap_err();
        assert!(matches!(err, LinkError::Unexpected { ref response, .. } if response == "READY"));
        assert_eq!(l.transport().sent(), vec!["ok"]);
    }

    #[test]
    fn hx_n_is_cached_until_ttl() {
        let t = ScriptedTransport::new()
            .reply("hx_n", &["4"])
            .reply("hx_n", &["5"]);
        let (mut l, clock) = link(t);
        assert_eq!(l.cmd_hx_n().unwrap(), 4);
        assert_eq!(l.cmd_hx_n().unwrap(), 4);
        clock.advance(Duration::from_secs(61));
        assert_eq!(l.cmd_hx_n().unwrap(), 5);
    }

    #[test]
    fn servo_checks_range_and_echo() {
        let t = ScriptedTransport::new()
            .reply("servo 45", &["44"])
            .reply("servo 45", &["44"])
            .reply("servo 45", &["44"]);
        let (mut l, _) = link(t);
        assert!(matches!(
            l.cmd_servo(0),
            Err(LinkError::BadArgument { .. })
        ));
        assert!(l.transport().sent().is_empty());
        assert!(matches!(
            l.cmd_servo(45),
            Err(LinkError::Unexpected { .. })
        ));
    }

    #[test]
    fn pump_rejects_power_above_100() {
        let (mut l, _) = link(ScriptedTransport::new());
        assert!(matches!(
            l.cmd_pump(1000, 101),
            Err(LinkError::BadArgument { .. })
        ));
    }

    #[test]
    fn stepper_detach_flag_is_appended() {
        let t = ScriptedTransport::new()
            .reply("stepper -120 1", &["OK"])
            .reply("stepper 5", &["OK"]);
        let (mut l, _) = link(t);
        l.cmd_stepper(-120, true).unwrap();
        l.cmd_stepper(5, false).unwrap();
    }
}
