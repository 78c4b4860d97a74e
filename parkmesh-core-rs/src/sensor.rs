//! Ultrasonic distance sampling
//!
//! A measurement is a single trigger/echo exchange:
//! 1. drive the trigger low, settle, pulse it high for 10 µs, drive it low
//! 2. wait for the echo line to rise (bounded by the echo timeout)
//! 3. time how long the echo line stays high (bounded by the same timeout)
//! 4. convert the pulse width to centimeters
//!
//! Pin access goes through [`EchoPins`] so the same sampler runs against real
//! `embedded-hal` pins or the virtual-clock [`SimulatedEcho`].

use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use thiserror::Error;
use tracing::debug;

/// Centimeters per microsecond of echo, round trip already halved
pub const CM_PER_US: f32 = 0.01715;

/// Default bound on each echo edge
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_millis(30);

const TRIGGER_SETTLE_US: u32 = 2;
const TRIGGER_PULSE_US: u32 = 10;

/// Measurement failures. Both are transient.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SensorError {
    #[error("no echo within timeout")]
    NoEcho,

    #[error("echo pulse exceeded timeout")]
    EchoTooLong,
}

/// Timed pin access needed by the sampler
pub trait EchoPins {
    /// Drive the trigger output
    fn set_trigger(&mut self, high: bool);

    /// Sample the echo input
    fn echo_is_high(&mut self) -> bool;

    /// Monotonic time in microseconds
    fn now_us(&self) -> u64;

    /// Busy-wait delay
    fn delay_us(&mut self, us: u32);
}

/// Single-shot ultrasonic range finder
pub struct SensorSampler<P> {
    pins: P,
    timeout_us: u64,
}

impl<P: EchoPins> SensorSampler<P> {
    pub fn new(mut pins: P, echo_timeout: Duration) -> Self {
        pins.set_trigger(false);

        Self {
            pins,
            timeout_us: echo_timeout.as_micros() as u64,
        }
    }

    /// Take one measurement. Never retries; at most two echo timeouts long.
    pub fn measure(&mut self) -> Result<f32, SensorError> {
        self.pins.set_trigger(false);
        self.pins.delay_us(TRIGGER_SETTLE_US);
        self.pins.set_trigger(true);
        self.pins.delay_us(TRIGGER_PULSE_US);
        self.pins.set_trigger(false);

        let wait_start = self.pins.now_us();
        while !self.pins.echo_is_high() {
            if self.pins.now_us().saturating_sub(wait_start) > self.timeout_us {
                return Err(SensorError::NoEcho);
            }
        }

        let echo_start = self.pins.now_us();
        while self.pins.echo_is_high() {
            if self.pins.now_us().saturating_sub(echo_start) > self.timeout_us {
                return Err(SensorError::EchoTooLong);
            }
        }
        let pulse_us = self.pins.now_us().saturating_sub(echo_start);

        let distance_cm = pulse_us as f32 * CM_PER_US;
        debug!("Echo pulse {} us -> {:.1} cm", pulse_us, distance_cm);
        Ok(distance_cm)
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }
}

/// [`EchoPins`] over `embedded-hal` 1.0 pins.
///
/// The clock is any monotonic microsecond source (a hardware timer read,
/// `Instant::elapsed`, ...). A failed echo read counts as low, so a broken
/// input surfaces as [`SensorError::NoEcho`].
pub struct HalEchoPins<T, E, D, C> {
    trigger: T,
    echo: E,
    delay: D,
    clock: C,
}

impl<T, E, D, C> HalEchoPins<T, E, D, C>
where
    T: OutputPin,
    E: InputPin,
    D: DelayNs,
    C: Fn() -> u64,
{
    pub fn new(trigger: T, echo: E, delay: D, clock: C) -> Self {
        Self {
            trigger,
            echo,
            delay,
            clock,
        }
    }
}

impl<T, E, D, C> EchoPins for HalEchoPins<T, E, D, C>
where
    T: OutputPin,
    E: InputPin,
    D: DelayNs,
    C: Fn() -> u64,
{
    fn set_trigger(&mut self, high: bool) {
        let result = if high {
            self.trigger.set_high()
        } else {
            self.trigger.set_low()
        };
        if result.is_err() {
            debug!("Trigger pin write failed");
        }
    }

    fn echo_is_high(&mut self) -> bool {
        self.echo.is_high().unwrap_or(false)
    }

    fn now_us(&self) -> u64 {
        (self.clock)()
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}

// ============================================================================
// Simulated sensor (host runs and tests)
// ============================================================================

/// Time between the trigger falling edge and the echo rising edge
const SIM_ECHO_LATENCY_US: u64 = 100;

/// What the simulated target does
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoBehavior {
    /// Reflect from an object this far away
    Distance(f32),
    /// Nothing comes back
    Silent,
    /// Echo line rises and never falls
    StuckHigh,
}

/// Virtual-clock ultrasonic sensor.
///
/// Every echo poll advances the clock by one microsecond, so a measurement
/// completes instantly in wall time while timing out exactly as hardware would.
#[derive(Debug, Clone)]
pub struct SimulatedEcho {
    behavior: EchoBehavior,
    now: u64,
    trigger_high: bool,
    echo_window: Option<(u64, u64)>,
    triggers: u32,
}

impl SimulatedEcho {
    pub fn new(behavior: EchoBehavior) -> Self {
        Self {
            behavior,
            now: 0,
            trigger_high: false,
            echo_window: None,
            triggers: 0,
        }
    }

    pub fn at_distance(distance_cm: f32) -> Self {
        Self::new(EchoBehavior::Distance(distance_cm))
    }

    pub fn silent() -> Self {
        Self::new(EchoBehavior::Silent)
    }

    pub fn stuck_high() -> Self {
        Self::new(EchoBehavior::StuckHigh)
    }

    /// Change the target for the next measurement
    pub fn set_behavior(&mut self, behavior: EchoBehavior) {
        self.behavior = behavior;
    }

    /// Number of completed trigger pulses
    pub fn trigger_count(&self) -> u32 {
        self.triggers
    }

    fn on_trigger_fall(&mut self) {
        self.triggers += 1;
        let rise = self.now + SIM_ECHO_LATENCY_US;
        self.echo_window = match self.behavior {
            EchoBehavior::Distance(cm) => {
                let width = (cm.max(0.0) / CM_PER_US).round() as u64;
                Some((rise, rise.saturating_add(width)))
            }
            EchoBehavior::Silent => None,
            EchoBehavior::StuckHigh => Some((rise, u64::MAX)),
        };
    }
}

impl EchoPins for SimulatedEcho {
    fn set_trigger(&mut self, high: bool) {
        if self.trigger_high && !high {
            self.on_trigger_fall();
        }
        self.trigger_high = high;
    }

    fn echo_is_high(&mut self) -> bool {
        self.now += 1;
        match self.echo_window {
            Some((rise, fall)) => self.now >= rise && self.now < fall,
            None => false,
        }
    }

    fn now_us(&self) -> u64 {
        self.now
    }

    fn delay_us(&mut self, us: u32) {
        self.now += us as u64;
    }
}
