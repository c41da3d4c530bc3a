//! Status panel multiplexing one RGBW strip into component indicators
//!
//! The strip is folded in a U: the bottom row (`0..BOTTOM_LENGTH`) carries one
//! node per component, the top row (`TOP_START..STRIP_LENGTH`) is wired in
//! reverse and shows byte-count gauges above the component that moved the
//! data. Short activity pings and gauge pixels live in the transient region
//! of the command buffer and expire on their own.

use crate::colour::Colour;
use crate::command_buffer::{CommandBuffer, CommandSlot};
use crate::config::{
    BOTTOM_LENGTH, CLOCK_INTERVAL_MS, CLOCK_STEP, COMPONENT_DISABLE_ON_COMPLETE,
    COMPONENT_INTERVAL_MS, COMPONENT_SPACING, COMPONENT_STEP, GAUGE_DURATION_MS, LED_BRIGHTNESS,
    MAX_GAUGE_LEDS, PING_DURATION_MS, STRIP_LENGTH, TOP_START,
};
use crate::status_node::{StatusNode, TickTimer};
use crate::{Clock, FeederError};
use core::cell::RefCell;
use embassy_time::Duration;
use log::{debug, error, info, warn};
use smart_leds::{RGBW, SmartLedsWrite};

/// Logical subsystems shown on the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Clock,
    WifiStatus,
    MotorLeft,
    MotorRight,
    Bluetooth,
    Server,
    Error,
}

impl Component {
    pub const COUNT: usize = 7;

    pub const ALL: [Component; Self::COUNT] = [
        Component::Clock,
        Component::WifiStatus,
        Component::MotorLeft,
        Component::MotorRight,
        Component::Bluetooth,
        Component::Server,
        Component::Error,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Default indicator colour
    pub const fn colour(self) -> Colour {
        match self {
            Component::Clock => Colour::YELLOW,
            Component::WifiStatus => Colour::GREEN,
            Component::MotorLeft => Colour::AQUA,
            Component::MotorRight => Colour::DARK_MAGENTA,
            Component::Bluetooth => Colour::DARK_BLUE,
            Component::Server => Colour::LIME_GREEN,
            Component::Error => Colour::RED,
        }
    }
}

/// Signals other subsystems send to the panel
///
/// This is the only way the protocol engine (and the motor, Wi-Fi and HTTP
/// collaborators) reach the display.
pub trait ActivitySink {
    /// Flash a ping next to the component when `active` is set
    fn activity(&mut self, component: Component, active: bool);
    /// Paint a byte-count gauge above the component
    fn data_transmission(&mut self, component: Component, byte_count: u8);
    fn enable(&mut self, component: Component);
    fn disable(&mut self, component: Component);
}

impl<T: ActivitySink> ActivitySink for &RefCell<T> {
    fn activity(&mut self, component: Component, active: bool) {
        self.borrow_mut().activity(component, active);
    }

    fn data_transmission(&mut self, component: Component, byte_count: u8) {
        self.borrow_mut().data_transmission(component, byte_count);
    }

    fn enable(&mut self, component: Component) {
        self.borrow_mut().enable(component);
    }

    fn disable(&mut self, component: Component) {
        self.borrow_mut().disable(component);
    }
}

/// Top-row pixel above bottom position `bottom`
///
/// The top row runs in the opposite direction: bottom 0 sits under the last
/// pixel of the strip, bottom `BOTTOM_LENGTH - 1` under `TOP_START`.
pub const fn top_row_above(bottom: usize) -> usize {
    TOP_START + (BOTTOM_LENGTH - 1 - bottom)
}

/// Status display multiplexer
pub struct Panel<W, C> {
    strip: W,
    clock: C,
    nodes: [StatusNode; Component::COUNT],
    commands: CommandBuffer,
    pixels: [Colour; STRIP_LENGTH],
    background: Colour,
    next_component_position: u16,
}

impl<W, C> Panel<W, C>
where
    W: SmartLedsWrite<Color = RGBW<u8>>,
    C: Clock,
{
    /// Create a panel with a black base frame and every node hidden at its default colour
    pub fn new(strip: W, clock: C) -> Self {
        let mut nodes = [StatusNode::new(0, Colour::BLACK); Component::COUNT];
        for component in Component::ALL {
            nodes[component.index()] = StatusNode::new(component.index() as u16, component.colour());
        }

        let mut panel = Self {
            strip,
            clock,
            nodes,
            commands: CommandBuffer::new(),
            pixels: [Colour::BLACK; STRIP_LENGTH],
            background: Colour::BLACK,
            next_component_position: 0,
        };
        panel.build_base_frame();
        panel
    }

    /// Reset every base slot to the background colour
    pub fn build_base_frame(&mut self) {
        self.commands.build_base_frame(self.background);
    }

    pub fn set_background(&mut self, colour: Colour) {
        self.background = colour;
        self.build_base_frame();
    }

    pub fn background(&self) -> Colour {
        self.background
    }

    /// Clock node: sweeps the whole strip one pixel per tick
    pub fn initialize_clock(&mut self) {
        let node = self.node_mut(Component::Clock);
        node.position = 0;
        node.colour = Component::Clock.colour();
        node.step = CLOCK_STEP;
        node.disable_on_complete = false;
        node.enabled = true;
        node.timer = TickTimer::new(Duration::from_millis(CLOCK_INTERVAL_MS));
    }

    /// Place a component node on the next free bottom position
    pub fn initialize_component(&mut self, component: Component, visible: bool) {
        let position = self.next_component_position;
        let node = self.node_mut(component);
        node.position = position;
        node.step = COMPONENT_STEP;
        node.disable_on_complete = COMPONENT_DISABLE_ON_COMPLETE;
        node.enabled = visible;
        node.timer = TickTimer::new(Duration::from_millis(COMPONENT_INTERVAL_MS));
        self.next_component_position += COMPONENT_SPACING;
    }

    /// Boot sequence: lay out every node while showing a progress bar
    pub fn initialise(&mut self) -> Result<(), FeederError> {
        const LAYOUT: [Component; 6] = [
            Component::WifiStatus,
            Component::Bluetooth,
            Component::MotorLeft,
            Component::MotorRight,
            Component::Server,
            Component::Error,
        ];
        let total_steps = LAYOUT.len() + 1;

        self.build_base_frame();
        self.show_progress(Colour::GREEN, Colour::DARK_BLUE, 0, total_steps)?;

        self.initialize_clock();
        self.show_progress(Colour::GREEN, Colour::DARK_BLUE, 1, total_steps)?;
        debug!("[PANEL] Clock animation set up");

        self.next_component_position = 0;
        for (i, component) in LAYOUT.into_iter().enumerate() {
            self.initialize_component(component, false);
            self.show_progress(Colour::GREEN, Colour::DARK_BLUE, i + 2, total_steps)?;
            debug!("[PANEL] {:?} node set up", component);
        }

        self.build_base_frame();
        self.render()?;
        info!("[PANEL] Active components initialized");
        Ok(())
    }

    /// Light `current / max` of the strip in `fg`, the rest in `bg`, straight to hardware
    pub fn show_progress(
        &mut self,
        fg: Colour,
        bg: Colour,
        current: usize,
        max: usize,
    ) -> Result<(), FeederError> {
        let lit = if max == 0 {
            0
        } else {
            (current.min(max) * STRIP_LENGTH) / max
        };
        let frame = (0..STRIP_LENGTH).map(|i| if i < lit { fg } else { bg });
        self.strip
            .write(frame.map(|c| RGBW::from(c.scaled(LED_BRIGHTNESS))))
            .map_err(|_| FeederError::LedError)
    }

    pub fn node(&self, component: Component) -> &StatusNode {
        &self.nodes[component.index()]
    }

    pub fn node_mut(&mut self, component: Component) -> &mut StatusNode {
        &mut self.nodes[component.index()]
    }

    pub fn set_colour(&mut self, component: Component, colour: Colour) {
        self.node_mut(component).colour = colour;
    }

    pub fn set_position(&mut self, component: Component, position: u16) {
        self.node_mut(component).position = position;
    }

    pub fn set_step(&mut self, component: Component, step: i16) {
        self.node_mut(component).step = step;
    }

    pub fn commands(&self) -> &CommandBuffer {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut CommandBuffer {
        &mut self.commands
    }

    /// Last composited frame
    pub fn pixels(&self) -> &[Colour; STRIP_LENGTH] {
        &self.pixels
    }

    pub fn strip(&self) -> &W {
        &self.strip
    }

    /// Advance every enabled node's animation
    pub fn tick(&mut self) {
        let now = self.clock.now();
        for node in self.nodes.iter_mut() {
            node.tick(now, STRIP_LENGTH);
        }
    }

    /// Composite base frame, nodes and transient commands, then flush once
    pub fn render(&mut self) -> Result<(), FeederError> {
        let now = self.clock.now();

        for (pixel, slot) in self.pixels.iter_mut().zip(self.commands.base()) {
            *pixel = slot.colour;
        }

        // Nodes are drawn for this frame only, the base frame stays untouched.
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.enabled {
                continue;
            }
            match self.pixels.get_mut(node.position as usize) {
                Some(pixel) => *pixel = node.colour,
                None => error!(
                    "[PANEL] Node[{}] position out of bounds: {}",
                    i, node.position
                ),
            }
        }

        for slot in self.commands.transient_mut() {
            if !slot.active {
                continue;
            }
            if slot.is_expired(now) {
                slot.active = false;
                continue;
            }
            match self.pixels.get_mut(slot.position as usize) {
                Some(pixel) => *pixel = slot.colour,
                None => {
                    error!("[PANEL] Command position out of bounds: {}", slot.position);
                    slot.active = false;
                }
            }
        }

        self.strip
            .write(self.pixels.iter().map(|c| RGBW::from(c.scaled(LED_BRIGHTNESS))))
            .map_err(|_| FeederError::LedError)
    }

    /// Claim a transient slot (see [`CommandBuffer::allocate`])
    pub fn allocate_slot(&mut self) -> Result<&mut CommandSlot, FeederError> {
        let now = self.clock.now();
        self.commands.allocate(now)
    }

    fn ping(&mut self, component: Component) {
        let node = *self.node(component);
        let mut position = node.position as usize + 1;
        if position >= STRIP_LENGTH {
            position = 0;
        }

        let now = self.clock.now();
        match self.commands.allocate(now) {
            Ok(slot) => {
                slot.set(
                    position as u16,
                    node.colour,
                    Duration::from_millis(PING_DURATION_MS),
                    now,
                );
                debug!("[PANEL] {:?} activity at LED {}", component, position);
            }
            Err(_) => warn!("[PANEL] LED command buffer full, dropping {:?} ping", component),
        }
    }

    fn gauge(&mut self, component: Component, byte_count: u8) {
        let node = *self.node(component);
        let bottom = node.position as usize;
        if bottom >= BOTTOM_LENGTH {
            error!(
                "[PANEL] {:?} position {} not on the bottom row",
                component, bottom
            );
            return;
        }

        let top_start = top_row_above(bottom);
        let shown = (byte_count as usize).min(MAX_GAUGE_LEDS);
        let now = self.clock.now();

        // a new gauge replaces the one still showing in this column
        let column = top_start.saturating_sub(MAX_GAUGE_LEDS - 1).max(TOP_START)..=top_start;
        for slot in self.commands.transient_mut() {
            if slot.active && column.contains(&(slot.position as usize)) {
                slot.active = false;
            }
        }

        for i in 0..MAX_GAUGE_LEDS {
            let Some(position) = top_start.checked_sub(i) else {
                break;
            };
            if !(TOP_START..STRIP_LENGTH).contains(&position) {
                break;
            }

            let colour = if i < shown { node.colour } else { self.background };
            match self.commands.allocate(now) {
                Ok(slot) => slot.set(
                    position as u16,
                    colour,
                    Duration::from_millis(GAUGE_DURATION_MS),
                    now,
                ),
                Err(_) => {
                    warn!("[PANEL] LED command buffer full in data_transmission");
                    return;
                }
            }
        }
    }

    /// Debug summary of the command buffer
    pub fn log_commands(&self) {
        let now = self.clock.now();
        info!("[PANEL] === LED command buffer ===");
        info!(
            "[PANEL] Base frame (0-{}): {}/{} active",
            STRIP_LENGTH - 1,
            self.commands.active_base(),
            STRIP_LENGTH
        );
        info!(
            "[PANEL] Transient ({}-{}): {}/{} active",
            STRIP_LENGTH,
            STRIP_LENGTH + self.commands.transient().len() - 1,
            self.commands.active_transient(now),
            self.commands.transient().len()
        );
    }
}

impl<W, C> ActivitySink for Panel<W, C>
where
    W: SmartLedsWrite<Color = RGBW<u8>>,
    C: Clock,
{
    fn activity(&mut self, component: Component, active: bool) {
        if active {
            self.ping(component);
        }
    }

    fn data_transmission(&mut self, component: Component, byte_count: u8) {
        self.gauge(component, byte_count);
    }

    fn enable(&mut self, component: Component) {
        self.node_mut(component).enabled = true;
    }

    fn disable(&mut self, component: Component) {
        self.node_mut(component).enabled = false;
    }
}
