// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Software model of a clock device.
//!
//! [`SimulatedDevice`] keeps a register file and derives the output waveforms
//! of the digital lines from the generator registers, on a virtual core timer
//! that advances with wall-clock time. Streaming samples those waveforms at
//! the scan ticks and paces reads in real time, so a whole recording session
//! runs against it exactly like against hardware.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::device_traits::DeviceTraits;
use crate::error::{Error, Result};
use crate::registers::{
    ClockRegisters, Handle, IntervalTimer, LineRegisters, RegisterInterface, SKIPPED_SAMPLE,
    StreamRead,
};
use crate::timebase::NANOSECONDS_PER_SECOND;

const FIRST_STREAM_ADDRESS: u32 = 1000;

/// One stretch of time during which an output line was running.
#[derive(Debug, Clone)]
struct RunSegment {
    start_tick: u64,
    stop_tick: Option<u64>,
    divisor: u64,
    roll_value: u64,
    duty_cycle: u64,
    pulses: Option<u64>,
}

impl RunSegment {
    fn covers(&self, tick: u64) -> bool {
        tick >= self.start_tick && self.stop_tick.is_none_or(|stop| tick < stop)
    }

    /// Generator cycle and phase within the cycle at `tick`.
    fn cycle_at(&self, tick: u64, traits: &DeviceTraits) -> (u64, u64) {
        let elapsed = (tick - self.start_tick) as u128;
        let generator_counts = elapsed * traits.base_clock_frequency_hz as u128
            / (traits.core_timer_frequency_hz as u128 * self.divisor as u128);
        let roll = self.roll_value as u128;
        ((generator_counts / roll) as u64, (generator_counts % roll) as u64)
    }

    fn level_at(&self, tick: u64, traits: &DeviceTraits) -> bool {
        let (cycle, phase) = self.cycle_at(tick, traits);
        if self.pulses.is_some_and(|pulses| cycle >= pulses) {
            return false;
        }
        phase < self.duty_cycle
    }

    fn completed_pulses_at(&self, tick: u64, traits: &DeviceTraits) -> u64 {
        let pulses = self.pulses.unwrap_or(0);
        let (cycle, phase) = self.cycle_at(tick, traits);
        let completed = cycle + u64::from(phase >= self.duty_cycle);
        completed.min(pulses)
    }
}

#[derive(Debug)]
struct ActiveStream {
    columns: Vec<String>,
    scans_per_read: u32,
    ticks_per_scan: u64,
    start_tick: u64,
    next_scan: u64,
    reads: usize,
}

#[derive(Debug, Default)]
struct DeviceState {
    next_handle: i32,
    open_handles: HashSet<i32>,
    registers: HashMap<String, f64>,
    line_history: HashMap<String, Vec<RunSegment>>,
    /// Scripted input levels as (tick, level), ascending.
    inputs: HashMap<String, Vec<(u64, f64)>>,
    addresses: HashMap<String, u32>,
    stream: Option<ActiveStream>,
    pending_dropped_scans: usize,
    fail_read_after: Option<usize>,
}

/// Register interface backed by a software model of the device.
#[derive(Debug)]
pub struct SimulatedDevice {
    traits: &'static DeviceTraits,
    epoch: Instant,
    initial_tick: u64,
    call_latency: Duration,
    has_interval_timer: bool,
    state: Mutex<DeviceState>,
    stream_stop_calls: AtomicUsize,
}

impl SimulatedDevice {
    pub fn new(traits: &'static DeviceTraits) -> Self {
        SimulatedDevice {
            traits,
            epoch: Instant::now(),
            initial_tick: 0,
            call_latency: Duration::ZERO,
            has_interval_timer: true,
            state: Mutex::new(DeviceState {
                next_handle: 1,
                ..Default::default()
            }),
            stream_stop_calls: AtomicUsize::new(0),
        }
    }

    /// Start the core timer at `tick` instead of zero.
    pub fn with_initial_tick(mut self, tick: u32) -> Self {
        self.initial_tick = tick as u64;
        self
    }

    /// Delay every register access and stream read by `latency`.
    pub fn with_call_latency(mut self, latency: Duration) -> Self {
        self.call_latency = latency;
        self
    }

    /// Behave like a driver without a hardware interval timer.
    pub fn without_interval_timer(mut self) -> Self {
        self.has_interval_timer = false;
        self
    }

    /// Shared handle to pass wherever a driver is expected.
    pub fn as_interface(self: &Arc<Self>) -> Arc<dyn RegisterInterface> {
        Arc::<Self>::clone(self)
    }

    pub fn traits(&self) -> &'static DeviceTraits {
        self.traits
    }

    /// Current value of a register in the register file.
    pub fn register(&self, name: &str) -> Option<f64> {
        self.state.lock().registers.get(name).copied()
    }

    /// Script the level of an input line. Offsets are relative to now.
    pub fn script_input(&self, channel: &str, levels: &[(Duration, f64)]) {
        let now = self.current_tick();
        let mut script: Vec<(u64, f64)> = levels
            .iter()
            .map(|(offset, level)| (now + self.duration_to_ticks(*offset), *level))
            .collect();
        script.sort_by_key(|(tick, _)| *tick);
        self.state.lock().inputs.insert(channel.to_string(), script);
    }

    /// Mark the last `scans` scans of the next stream read as skipped.
    pub fn inject_dropped_scans(&self, scans: usize) {
        self.state.lock().pending_dropped_scans += scans;
    }

    /// Fail the stream read following `successful_reads` reads.
    pub fn fail_stream_read_after(&self, successful_reads: usize) {
        self.state.lock().fail_read_after = Some(successful_reads);
    }

    pub fn stream_stop_calls(&self) -> usize {
        self.stream_stop_calls.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().stream.is_some()
    }

    fn current_tick(&self) -> u64 {
        self.tick_at(Instant::now())
    }

    fn tick_at(&self, instant: Instant) -> u64 {
        let elapsed = instant.saturating_duration_since(self.epoch);
        self.initial_tick + self.duration_to_ticks(elapsed)
    }

    fn duration_to_ticks(&self, duration: Duration) -> u64 {
        (duration.as_nanos() * self.traits.core_timer_frequency_hz as u128
            / NANOSECONDS_PER_SECOND as u128) as u64
    }

    fn instant_of(&self, tick: u64) -> Instant {
        let ticks = tick.saturating_sub(self.initial_tick) as u128;
        let nanos = ticks * NANOSECONDS_PER_SECOND as u128 / self.traits.core_timer_frequency_hz as u128;
        self.epoch + Duration::from_nanos(nanos as u64)
    }

    fn simulate_latency(&self) {
        if !self.call_latency.is_zero() {
            thread::sleep(self.call_latency);
        }
    }

    fn check_handle(state: &DeviceState, handle: Handle) -> Result<()> {
        if state.open_handles.contains(&handle.0) {
            Ok(())
        } else {
            Err(Error::driver(format!("Invalid handle {}", handle.0)))
        }
    }

    fn register_value(registers: &HashMap<String, f64>, name: &str) -> f64 {
        registers.get(name).copied().unwrap_or(0.0)
    }

    /// Open or close run segments after the register file changed.
    fn update_lines(&self, state: &mut DeviceState, tick: u64) {
        for channel in self.traits.output_clock_channels {
            let line = LineRegisters::new(channel);
            let registers = &state.registers;
            let clock_id = Self::register_value(registers, &line.clock_source()) as u8;
            let clock = ClockRegisters::new(clock_id);
            let roll_value = Self::register_value(registers, &clock.roll_value()) as u64;
            let running = Self::register_value(registers, &line.enable()) >= 0.5
                && Self::register_value(registers, &clock.enable()) >= 0.5
                && roll_value > 0;

            let history = state.line_history.entry(channel.to_string()).or_default();
            let is_open = history.last().is_some_and(|segment| segment.stop_tick.is_none());
            match (running, is_open) {
                (true, false) => {
                    let pulse_out =
                        Self::register_value(registers, &line.feature_index()) as i64 == 2;
                    history.push(RunSegment {
                        start_tick: tick,
                        stop_tick: None,
                        divisor: (Self::register_value(registers, &clock.divisor()) as u64).max(1),
                        roll_value,
                        duty_cycle: Self::register_value(registers, &line.config_a()) as u64,
                        pulses: pulse_out
                            .then(|| Self::register_value(registers, &line.config_c()) as u64),
                    });
                }
                (false, true) => {
                    if let Some(segment) = history.last_mut() {
                        segment.stop_tick = Some(tick);
                    }
                }
                _ => {}
            }
        }
    }

    fn line_level(&self, state: &DeviceState, channel: &str, tick: u64) -> Option<f64> {
        let history = state.line_history.get(channel)?;
        let level = history
            .iter()
            .rev()
            .find(|segment| segment.covers(tick))
            .is_some_and(|segment| segment.level_at(tick, self.traits));
        Some(f64::from(u8::from(level)))
    }

    fn input_level(state: &DeviceState, channel: &str, tick: u64) -> Option<f64> {
        let script = state.inputs.get(channel)?;
        Some(
            script
                .iter()
                .take_while(|(at, _)| *at <= tick)
                .last()
                .map_or(0.0, |(_, level)| *level),
        )
    }

    /// Completed pulse count of the most recent run of `channel`.
    fn completed_pulses(&self, state: &DeviceState, channel: &str, tick: u64) -> Option<f64> {
        let segment = state.line_history.get(channel)?.last()?;
        if segment.pulses.is_none() {
            return None;
        }
        let tick = segment.stop_tick.map_or(tick, |stop| tick.min(stop));
        Some(segment.completed_pulses_at(tick, self.traits) as f64)
    }

    fn target_pulses(state: &DeviceState, channel: &str) -> Option<f64> {
        let segment = state.line_history.get(channel)?.last()?;
        segment.pulses.map(|pulses| pulses as f64)
    }

    fn sample(&self, state: &DeviceState, name: &str, tick: u64) -> f64 {
        let timer = tick % (1 << 32);
        if name == self.traits.core_timer_register {
            if self.traits.core_timer_high_register.is_some() {
                return (timer & 0xFFFF) as f64;
            }
            return timer as f64;
        }
        if Some(name) == self.traits.core_timer_high_register {
            return (timer >> 16) as f64;
        }
        self.line_level(state, name, tick)
            .or_else(|| Self::input_level(state, name, tick))
            .unwrap_or_else(|| Self::register_value(&state.registers, name))
    }

    fn read_register(&self, state: &DeviceState, name: &str, tick: u64) -> f64 {
        if let Some(channel) = name.strip_suffix("_EF_READ_A")
            && let Some(completed) = self.completed_pulses(state, channel, tick)
        {
            return completed;
        }
        if let Some(channel) = name.strip_suffix("_EF_READ_B")
            && let Some(target) = Self::target_pulses(state, channel)
        {
            return target;
        }
        if name == self.traits.core_timer_register {
            return (tick % (1 << 32)) as f64;
        }
        self.line_level(state, name, tick)
            .or_else(|| Self::input_level(state, name, tick))
            .unwrap_or_else(|| Self::register_value(&state.registers, name))
    }
}

impl RegisterInterface for SimulatedDevice {
    fn open(&self) -> Result<Handle> {
        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.open_handles.insert(handle);
        xclock_log::debug!("Opened simulated device '{}' as handle {}", self.traits.name, handle);
        Ok(Handle(handle))
    }

    fn close(&self, handle: Handle) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open_handles.remove(&handle.0) {
            return Err(Error::driver(format!("Invalid handle {}", handle.0)));
        }
        Ok(())
    }

    fn write_named(&self, handle: Handle, name: &str, value: f64) -> Result<()> {
        self.write_named_batch(handle, &[(name.to_string(), value)])
    }

    fn write_named_batch(&self, handle: Handle, values: &[(String, f64)]) -> Result<()> {
        self.simulate_latency();
        let mut state = self.state.lock();
        Self::check_handle(&state, handle)?;
        let tick = self.current_tick();
        for (name, value) in values {
            state.registers.insert(name.clone(), *value);
        }
        self.update_lines(&mut state, tick);
        Ok(())
    }

    fn read_named(&self, handle: Handle, name: &str) -> Result<f64> {
        self.simulate_latency();
        let state = self.state.lock();
        Self::check_handle(&state, handle)?;
        Ok(self.read_register(&state, name, self.current_tick()))
    }

    fn read_named_batch(&self, handle: Handle, names: &[String]) -> Result<Vec<f64>> {
        self.simulate_latency();
        let state = self.state.lock();
        Self::check_handle(&state, handle)?;
        let tick = self.current_tick();
        Ok(names
            .iter()
            .map(|name| self.read_register(&state, name, tick))
            .collect())
    }

    fn resolve_addresses(&self, names: &[String]) -> Result<Vec<u32>> {
        let mut state = self.state.lock();
        Ok(names
            .iter()
            .map(|name| {
                let next = FIRST_STREAM_ADDRESS + 2 * state.addresses.len() as u32;
                *state.addresses.entry(name.clone()).or_insert(next)
            })
            .collect())
    }

    fn stream_start(
        &self,
        handle: Handle,
        scan_list: &[u32],
        scan_rate_hz: f64,
        scans_per_read: u32,
    ) -> Result<f64> {
        let mut state = self.state.lock();
        Self::check_handle(&state, handle)?;
        if state.stream.is_some() {
            return Err(Error::driver("Stream is already active"));
        }
        if scan_rate_hz <= 0.0 || scans_per_read == 0 {
            return Err(Error::driver(format!(
                "Invalid stream configuration: {scan_rate_hz} Hz, {scans_per_read} scans per read"
            )));
        }
        let columns = scan_list
            .iter()
            .map(|address| {
                state
                    .addresses
                    .iter()
                    .find(|(_, candidate)| *candidate == address)
                    .map(|(name, _)| name.clone())
                    .ok_or_else(|| Error::driver(format!("Unknown stream address {address}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let ticks_per_scan =
            (self.traits.core_timer_frequency_hz as f64 / scan_rate_hz).round() as u64;
        let ticks_per_scan = ticks_per_scan.max(1);
        let actual_scan_rate = self.traits.core_timer_frequency_hz as f64 / ticks_per_scan as f64;
        state.stream = Some(ActiveStream {
            columns,
            scans_per_read,
            ticks_per_scan,
            start_tick: self.current_tick(),
            next_scan: 0,
            reads: 0,
        });
        Ok(actual_scan_rate)
    }

    fn stream_read(&self, handle: Handle) -> Result<StreamRead> {
        self.simulate_latency();
        let last_scan_at = {
            let mut state = self.state.lock();
            Self::check_handle(&state, handle)?;
            let fail_after = state.fail_read_after;
            let stream = state
                .stream
                .as_mut()
                .ok_or_else(|| Error::driver("Stream is not running"))?;
            if fail_after.is_some_and(|reads| stream.reads >= reads) {
                return Err(Error::driver("Simulated stream read failure"));
            }
            let last_scan = stream.next_scan + stream.scans_per_read as u64 - 1;
            self.instant_of(stream.start_tick + last_scan * stream.ticks_per_scan)
        };
        let now = Instant::now();
        if last_scan_at > now {
            thread::sleep(last_scan_at - now);
        }

        let mut state = self.state.lock();
        let dropped = std::mem::take(&mut state.pending_dropped_scans);
        let (columns, scans, first_tick, ticks_per_scan) = {
            let stream = state
                .stream
                .as_ref()
                .ok_or_else(|| Error::driver("Stream is not running"))?;
            (
                stream.columns.clone(),
                stream.scans_per_read as usize,
                stream.start_tick + stream.next_scan * stream.ticks_per_scan,
                stream.ticks_per_scan,
            )
        };
        let mut samples = Vec::with_capacity(scans * columns.len());
        for scan in 0..scans {
            if scan >= scans.saturating_sub(dropped) {
                samples.extend(std::iter::repeat_n(SKIPPED_SAMPLE, columns.len()));
                continue;
            }
            let tick = first_tick + scan as u64 * ticks_per_scan;
            samples.extend(columns.iter().map(|name| self.sample(&state, name, tick)));
        }
        if let Some(stream) = state.stream.as_mut() {
            stream.next_scan += scans as u64;
            stream.reads += 1;
        }
        Ok(StreamRead {
            samples,
            device_backlog: 0,
            host_backlog: 0,
        })
    }

    fn stream_stop(&self, handle: Handle) -> Result<()> {
        self.stream_stop_calls.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state.lock();
        Self::check_handle(&state, handle)?;
        match state.stream.take() {
            Some(_) => Ok(()),
            None => Err(Error::driver("Stream is not running")),
        }
    }

    fn interval_timer(&self, period: Duration) -> Option<Box<dyn IntervalTimer>> {
        self.has_interval_timer
            .then(|| Box::new(DeadlineTimer::new(period)) as Box<dyn IntervalTimer>)
    }
}

/// Interval timer on absolute deadlines, so waits do not accumulate drift.
#[derive(Debug)]
pub struct DeadlineTimer {
    period: Duration,
    next_deadline: Instant,
}

impl DeadlineTimer {
    pub fn new(period: Duration) -> Self {
        DeadlineTimer {
            period,
            next_deadline: Instant::now() + period,
        }
    }
}

impl IntervalTimer for DeadlineTimer {
    fn wait_for_next_interval(&mut self) -> Result<u32> {
        if self.period.is_zero() {
            return Ok(0);
        }
        let now = Instant::now();
        let mut skipped = 0;
        while self.next_deadline + self.period <= now {
            self.next_deadline += self.period;
            skipped += 1;
        }
        if self.next_deadline > now {
            thread::sleep(self.next_deadline - now);
        }
        self.next_deadline += self.period;
        Ok(skipped)
    }
}
