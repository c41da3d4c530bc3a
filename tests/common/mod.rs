//! Hardware doubles for the host tests

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use embedded_io::{ErrorKind, ErrorType, Read, ReadReady, Write};
use feeder_rs::Clock;
use feeder_rs::ble_handler::{AtSerial, BleHandler};
use feeder_rs::panel::{ActivitySink, Component};
use smart_leds::{RGBW, SmartLedsWrite};

/// Simulated time: advances only when something delays
#[derive(Clone, Default)]
pub struct SimTimer {
    micros: Rc<Cell<u64>>,
}

impl SimTimer {
    pub fn advance_ms(&self, ms: u64) {
        self.micros.set(self.micros.get() + ms * 1000);
    }

    pub fn elapsed_ms(&self, since: Instant) -> u64 {
        (self.now() - since).as_millis()
    }
}

impl Clock for SimTimer {
    fn now(&self) -> Instant {
        Instant::from_micros(self.micros.get())
    }
}

impl DelayNs for SimTimer {
    fn delay_ns(&mut self, ns: u32) {
        self.micros.set(self.micros.get() + (ns as u64).div_ceil(1000));
    }
}

/// Part of a reply released once the clock reaches `after_ms` past the command
#[derive(Clone)]
struct Chunk {
    after_ms: u64,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct SerialState {
    baud: u32,
    answer_baud: u32,
    clock: Option<SimTimer>,
    rx: VecDeque<u8>,
    scheduled: Vec<(Instant, Vec<u8>)>,
    line: Vec<u8>,
    script: VecDeque<(String, Vec<Chunk>)>,
    commands: Vec<String>,
    written: Vec<u8>,
    fail_writes: bool,
}

/// Module double answering scripted commands in order
///
/// The module only answers while the link runs at `answer_baud`. A command
/// that does not match the head of the script gets no reply. Timed replies
/// need a clock, see [`ScriptedSerial::attach_clock`].
#[derive(Clone)]
pub struct ScriptedSerial {
    state: Rc<RefCell<SerialState>>,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        Self::at_baud(9600)
    }

    pub fn at_baud(answer_baud: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(SerialState {
                baud: 9600,
                answer_baud,
                ..SerialState::default()
            })),
        }
    }

    /// Answer `command` (without terminator) with `reply`
    pub fn expect(&self, command: &str, reply: &[u8]) -> &Self {
        self.expect_timed(command, &[(0, reply)])
    }

    /// Answer `command` in pieces, each `(ms after the command, bytes)`
    pub fn expect_timed(&self, command: &str, chunks: &[(u64, &[u8])]) -> &Self {
        let chunks = chunks
            .iter()
            .map(|&(after_ms, bytes)| Chunk {
                after_ms,
                bytes: bytes.to_vec(),
            })
            .collect();
        self.state
            .borrow_mut()
            .script
            .push_back((command.to_string(), chunks));
        self
    }

    pub fn attach_clock(&self, clock: SimTimer) {
        self.state.borrow_mut().clock = Some(clock);
    }

    /// Reply bytes scheduled but not yet delivered
    pub fn undelivered(&self) -> usize {
        self.state
            .borrow()
            .scheduled
            .iter()
            .map(|(_, bytes)| bytes.len())
            .sum()
    }

    /// Bytes already waiting before the next command
    pub fn preload(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes);
    }

    pub fn fail_writes(&self) {
        self.state.borrow_mut().fail_writes = true;
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn baud(&self) -> u32 {
        self.state.borrow().baud
    }

    pub fn pending_script(&self) -> usize {
        self.state.borrow().script.len()
    }
}

impl SerialState {
    fn now(&self) -> Instant {
        self.clock.as_ref().map_or(Instant::from_ticks(0), |clock| clock.now())
    }

    /// Move every chunk that is due into the receive queue
    fn release_due(&mut self) {
        let now = self.now();
        let mut pending = Vec::new();
        for (due, bytes) in self.scheduled.drain(..) {
            if due <= now {
                self.rx.extend(bytes);
            } else {
                pending.push((due, bytes));
            }
        }
        self.scheduled = pending;
    }
}

impl ErrorType for ScriptedSerial {
    type Error = ErrorKind;
}

impl Read for ScriptedSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        state.release_due();
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl ReadReady for ScriptedSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        let mut state = self.state.borrow_mut();
        state.release_due();
        Ok(!state.rx.is_empty())
    }
}

impl Write for ScriptedSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(ErrorKind::BrokenPipe);
        }
        state.written.extend_from_slice(buf);

        for &byte in buf {
            state.line.push(byte);
            if !state.line.ends_with(b"\r\n") {
                continue;
            }
            let line = String::from_utf8_lossy(&state.line[..state.line.len() - 2]).into_owned();
            state.line.clear();
            state.commands.push(line.clone());

            if state.baud != state.answer_baud {
                continue;
            }
            if state.script.front().is_some_and(|(command, _)| *command == line) {
                if let Some((_, chunks)) = state.script.pop_front() {
                    let now = state.now();
                    for chunk in chunks {
                        let due = now + embassy_time::Duration::from_millis(chunk.after_ms);
                        state.scheduled.push((due, chunk.bytes));
                    }
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl AtSerial for ScriptedSerial {
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.baud = baud;
        state.line.clear();
        Ok(())
    }
}

/// Digital pin backed by a shared level
#[derive(Clone, Default)]
pub struct SharedPin {
    high: Rc<Cell<bool>>,
}

impl SharedPin {
    pub fn is_set(&self) -> bool {
        self.high.get()
    }

    pub fn set(&self, high: bool) {
        self.high.set(high);
    }
}

impl embedded_hal::digital::ErrorType for SharedPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for SharedPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high.set(true);
        Ok(())
    }
}

impl embedded_hal::digital::InputPin for SharedPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.high.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.high.get())
    }
}

/// Signal sent to the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Activity(Component, bool),
    Gauge(Component, u8),
    Enable(Component),
    Disable(Component),
}

#[derive(Default)]
pub struct RecordingSink {
    pub signals: Vec<Signal>,
}

impl RecordingSink {
    pub fn gauges(&self) -> Vec<u8> {
        self.signals
            .iter()
            .filter_map(|signal| match signal {
                Signal::Gauge(_, count) => Some(*count),
                _ => None,
            })
            .collect()
    }
}

impl ActivitySink for RecordingSink {
    fn activity(&mut self, component: Component, active: bool) {
        self.signals.push(Signal::Activity(component, active));
    }

    fn data_transmission(&mut self, component: Component, byte_count: u8) {
        self.signals.push(Signal::Gauge(component, byte_count));
    }

    fn enable(&mut self, component: Component) {
        self.signals.push(Signal::Enable(component));
    }

    fn disable(&mut self, component: Component) {
        self.signals.push(Signal::Disable(component));
    }
}

/// Strip double keeping every frame it was sent
#[derive(Default)]
pub struct FrameLog {
    pub frames: Vec<Vec<RGBW<u8>>>,
}

impl SmartLedsWrite for FrameLog {
    type Error = ();
    type Color = RGBW<u8>;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        self.frames.push(iterator.into_iter().map(Into::into).collect());
        Ok(())
    }
}

pub type TestHandler<A> = BleHandler<ScriptedSerial, SimTimer, A, SharedPin, SharedPin>;

pub struct Rig {
    pub serial: ScriptedSerial,
    pub timer: SimTimer,
    pub enable_pin: SharedPin,
    pub state_pin: SharedPin,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_serial(ScriptedSerial::new())
    }

    pub fn with_serial(serial: ScriptedSerial) -> Self {
        let timer = SimTimer::default();
        serial.attach_clock(timer.clone());
        Self {
            serial,
            timer,
            enable_pin: SharedPin::default(),
            state_pin: SharedPin::default(),
        }
    }

    pub fn handler<A: ActivitySink>(&self, sink: A) -> TestHandler<A> {
        BleHandler::new(
            self.serial.clone(),
            self.timer.clone(),
            sink,
            self.enable_pin.clone(),
            self.state_pin.clone(),
            9600,
        )
    }
}
