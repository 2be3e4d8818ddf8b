//! The G-code virtual machine: a deterministic modal-state interpreter.

use crate::line::GcodeLine;
use crate::units::Units;
use std::collections::HashMap;

/// An axis-indexed pair of bounds, `None` until the axis has moved.
pub type AxisBounds = Vec<(Option<f64>, Option<f64>)>;

/// Coolant state bitmask: bit 0 = mist (M7), bit 1 = flood (M8).
pub const COOLANT_MIST: u8 = 0b01;
/// Flood coolant bit, set by M8.
pub const COOLANT_FLOOD: u8 = 0b10;

/// The VM's modal state, mirrored to/from a live controller and
/// replayable back out as G-code via [`GcodeVM::sync_machine_to_state`].
#[derive(Debug, Clone)]
pub struct VMState {
    /// Ordered, lowercase axis letters this machine exposes.
    pub axis_labels: Vec<char>,
    /// Work-coordinate position, indexed as `axis_labels`.
    pub pos: Vec<f64>,
    /// Machine-coordinate position, indexed as `axis_labels`.
    pub mpos: Vec<f64>,
    /// Active work coordinate system, 0..=5 for G54..G59, `None` under G53.
    pub active_coord_sys: Option<u8>,
    /// Per-system offset vectors, indexed `[system][axis]`.
    pub coord_sys_offsets: Vec<Vec<f64>>,
    /// G92 offset vector, indexed as `axis_labels`.
    pub offset: Vec<f64>,
    /// Whether the G92 offset is currently applied.
    pub offset_enabled: bool,
    /// G28 (slot 0) and G30 (slot 1) stored machine positions.
    pub stored_positions: [Vec<f64>; 2],
    /// Linear unit mode (G20/G21).
    pub units: Units,
    /// Commanded feed rate, units/minute.
    pub feed: f64,
    /// Incremental (G91) vs absolute (G90) positioning.
    pub incremental: bool,
    /// Inverse-time feed mode (G93) vs units-per-minute (G94).
    pub inverse_feed: bool,
    /// Remembered motion mode, `"G0"`.."G3"`, or `None` after G80.
    pub motion_mode: Option<String>,
    /// Arc plane: 0 = XY (G17), 1 = XZ (G18), 2 = YZ (G19).
    pub arc_plane: u8,
    /// Spindle on/off.
    pub spindle: bool,
    /// Spindle direction: +1 (M3) or -1 (M4).
    pub spindle_direction: i8,
    /// Spindle speed, RPM, if ever set.
    pub spindle_speed: Option<f64>,
    /// Coolant bitmask: 0 off, 1 mist, 2 flood, 3 both.
    pub coolant: u8,
    /// Current line number (from `N` words).
    pub line: u32,
    /// Number of `run` calls so far.
    pub line_counter: u64,
    /// Cumulative estimated program time, seconds.
    pub total_time: f64,
    /// Work-coordinate travel envelope per axis.
    pub bounds: AxisBounds,
    /// Machine-coordinate travel envelope per axis.
    pub mbounds: AxisBounds,
    /// Whether each axis has made a definite absolute move.
    pub has_moved_to_axes: Vec<bool>,

    prev_axis_feed: Vec<f64>,
}

impl VMState {
    /// A fresh state for the given axis set, all positions at the origin.
    pub fn new(axis_labels: Vec<char>) -> Self {
        let n = axis_labels.len();
        Self {
            axis_labels,
            pos: vec![0.0; n],
            mpos: vec![0.0; n],
            active_coord_sys: Some(0),
            coord_sys_offsets: vec![vec![0.0; n]; 6],
            offset: vec![0.0; n],
            offset_enabled: false,
            stored_positions: [vec![0.0; n], vec![0.0; n]],
            units: Units::Mm,
            feed: 0.0,
            incremental: false,
            inverse_feed: false,
            motion_mode: None,
            arc_plane: 0,
            spindle: false,
            spindle_direction: 1,
            spindle_speed: None,
            coolant: 0,
            line: 0,
            line_counter: 0,
            total_time: 0.0,
            bounds: vec![(None, None); n],
            mbounds: vec![(None, None); n],
            has_moved_to_axes: vec![false; n],
            prev_axis_feed: vec![0.0; n],
        }
    }

    fn axis_index(&self, letter: char) -> Option<usize> {
        self.axis_labels.iter().position(|&a| a == letter)
    }
}

/// Result of running one line through the VM.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    /// Whether this line caused motion.
    pub is_motion: bool,
    /// The motion code dispatched, if any (`"G0"`.."G3"`).
    pub motion_code: Option<String>,
    /// Whether a coordinate-system offset changed (G10/G92 family).
    pub changed_coord_offsets: bool,
}

/// Tunable parameters for the move-time estimator.
#[derive(Debug, Clone)]
pub struct VMConfig {
    /// Feed rate used for G0 rapids.
    pub max_feed: f64,
    /// Acceleration used by the trapezoidal time estimate.
    pub acceleration: f64,
    /// Floor applied to every computed move time.
    pub min_move_time: f64,
}

impl Default for VMConfig {
    fn default() -> Self {
        Self {
            max_feed: 3000.0,
            acceleration: 500.0,
            min_move_time: 0.0,
        }
    }
}

/// The G-code virtual machine.
pub struct GcodeVM {
    /// Current state.
    pub state: VMState,
    /// Estimator tuning parameters.
    pub config: VMConfig,
}

impl GcodeVM {
    /// A new VM over the given axes with default config.
    pub fn new(axis_labels: Vec<char>) -> Self {
        Self {
            state: VMState::new(axis_labels),
            config: VMConfig::default(),
        }
    }

    /// A new VM with explicit config.
    pub fn with_config(axis_labels: Vec<char>, config: VMConfig) -> Self {
        Self {
            state: VMState::new(axis_labels),
            config,
        }
    }

    /// Advance the VM state by one line.
    pub fn run(&mut self, line: &GcodeLine) -> RunResult {
        self.state.line_counter += 1;
        let mut result = RunResult::default();

        if let Some(n) = line.get('N') {
            self.state.line = n as u32;
        }
        if let Some(f) = line.get('F') {
            self.state.feed = f;
        }

        let g_words: Vec<f64> = line.words().iter().filter(|w| w.letter == 'G').map(|w| w.value).collect();
        let m_words: Vec<f64> = line.words().iter().filter(|w| w.letter == 'M').map(|w| w.value).collect();
        let is_g53 = g_words.iter().any(|&g| approx(g, 53.0));

        let axis_words: HashMap<char, f64> = self
            .state
            .axis_labels
            .clone()
            .into_iter()
            .filter_map(|a| line.get(a.to_ascii_uppercase()).map(|v| (a, v)))
            .collect();

        for &g in &g_words {
            if approx(g, 17.0) {
                self.state.arc_plane = 0;
            } else if approx(g, 18.0) {
                self.state.arc_plane = 1;
            } else if approx(g, 19.0) {
                self.state.arc_plane = 2;
            } else if approx(g, 20.0) {
                self.state.units = Units::In;
            } else if approx(g, 21.0) {
                self.state.units = Units::Mm;
            } else if (54.0..=59.0).contains(&g) && g.fract() == 0.0 {
                self.state.active_coord_sys = Some((g - 54.0) as u8);
            } else if approx(g, 90.0) {
                self.state.incremental = false;
            } else if approx(g, 91.0) {
                self.state.incremental = true;
            } else if approx(g, 93.0) {
                self.state.inverse_feed = true;
            } else if approx(g, 94.0) {
                self.state.inverse_feed = false;
            } else if approx(g, 80.0) {
                self.state.motion_mode = None;
            }
        }

        for &m in &m_words {
            if approx(m, 2.0) || approx(m, 30.0) {
                self.state.motion_mode = None;
                self.state.spindle = false;
                self.state.coolant = 0;
            } else if approx(m, 3.0) {
                self.state.spindle = true;
                self.state.spindle_direction = 1;
                if let Some(s) = line.get('S') {
                    self.state.spindle_speed = Some(s);
                }
            } else if approx(m, 4.0) {
                self.state.spindle = true;
                self.state.spindle_direction = -1;
                if let Some(s) = line.get('S') {
                    self.state.spindle_speed = Some(s);
                }
            } else if approx(m, 5.0) {
                self.state.spindle = false;
            } else if approx(m, 7.0) {
                self.state.coolant |= COOLANT_MIST;
            } else if approx(m, 8.0) {
                self.state.coolant |= COOLANT_FLOOD;
            } else if approx(m, 9.0) {
                self.state.coolant = 0;
            }
        }

        if let Some(&g) = g_words.iter().find(|&&g| approx(g, 92.0)) {
            let _ = g;
            for (&axis, &v) in &axis_words {
                if let Some(i) = self.state.axis_index(axis) {
                    self.state.offset[i] = self.state.pos[i] - v;
                    self.state.pos[i] = v;
                }
            }
            self.state.offset_enabled = true;
            result.changed_coord_offsets = true;
        } else if g_words.iter().any(|&g| approx(g, 92.1)) {
            self.state.offset = vec![0.0; self.state.axis_labels.len()];
            self.state.offset_enabled = false;
            self.recompute_pos();
            result.changed_coord_offsets = true;
        } else if g_words.iter().any(|&g| approx(g, 92.2)) {
            self.state.offset_enabled = false;
            self.recompute_pos();
            result.changed_coord_offsets = true;
        } else if g_words.iter().any(|&g| approx(g, 92.3)) {
            self.state.offset_enabled = true;
            self.recompute_pos();
            result.changed_coord_offsets = true;
        } else if g_words.iter().any(|&g| approx(g, 10.0)) {
            if let (Some(2.0), Some(p)) = (line.get('L'), line.get('P')) {
                let sys = (p as i64 - 1).max(0) as usize;
                if sys < self.state.coord_sys_offsets.len() {
                    for (&axis, &v) in &axis_words {
                        if let Some(i) = self.state.axis_index(axis) {
                            self.state.coord_sys_offsets[sys][i] = v;
                        }
                    }
                    self.recompute_pos();
                    result.changed_coord_offsets = true;
                }
            }
        }

        if let Some(t) = g_words.iter().find(|&&g| approx(g, 4.0)).and(line.get('P')) {
            self.state.total_time += t;
        }

        let explicit_motion = g_words.iter().find_map(|&g| {
            if approx(g, 0.0) {
                Some("G0")
            } else if approx(g, 1.0) {
                Some("G1")
            } else if approx(g, 2.0) {
                Some("G2")
            } else if approx(g, 3.0) {
                Some("G3")
            } else {
                None
            }
        });

        if let Some(code) = explicit_motion {
            self.state.motion_mode = Some(code.to_string());
        }

        if g_words.iter().any(|&g| approx(g, 28.1)) {
            self.store_position(0);
        } else if g_words.iter().any(|&g| approx(g, 30.1)) {
            self.store_position(1);
        } else if g_words.iter().any(|&g| approx(g, 28.2) || approx(g, 28.3)) {
            for (&axis, _) in &axis_words {
                if let Some(i) = self.state.axis_index(axis) {
                    self.state.mpos[i] = 0.0;
                }
            }
            self.recompute_pos();
            self.extend_bounds(axis_words.keys().copied());
        } else if g_words.iter().any(|&g| approx(g, 28.0)) && !axis_words.is_empty() {
            self.process_move(&axis_words, self.state.feed, is_g53);
            let home: HashMap<char, f64> = self
                .state
                .axis_labels
                .iter()
                .enumerate()
                .map(|(i, &a)| (a, self.state.stored_positions[0][i]))
                .collect();
            self.process_move(&home, self.config.max_feed, true);
            result.is_motion = true;
            result.motion_code = Some("G28".to_string());
        } else if g_words.iter().any(|&g| approx(g, 30.0)) && !axis_words.is_empty() {
            self.process_move(&axis_words, self.state.feed, is_g53);
            let home: HashMap<char, f64> = self
                .state
                .axis_labels
                .iter()
                .enumerate()
                .map(|(i, &a)| (a, self.state.stored_positions[1][i]))
                .collect();
            self.process_move(&home, self.config.max_feed, true);
            result.is_motion = true;
            result.motion_code = Some("G30".to_string());
        } else if !axis_words.is_empty() {
            let mode = explicit_motion
                .map(|s| s.to_string())
                .or_else(|| {
                    if g_words.is_empty() && m_words.is_empty() {
                        Some(self.state.motion_mode.clone().unwrap_or_else(|| "G0".to_string()))
                    } else {
                        None
                    }
                });
            if let Some(mode) = mode {
                let feed = if mode == "G0" {
                    self.config.max_feed
                } else {
                    self.state.feed
                };
                self.process_move(&axis_words, feed, is_g53);
                result.is_motion = true;
                result.motion_code = Some(mode);
            }
        }

        result
    }

    fn store_position(&mut self, slot: usize) {
        self.state.stored_positions[slot] = self.state.mpos.clone();
    }

    fn recompute_pos(&mut self) {
        let sys = self.state.active_coord_sys.unwrap_or(0) as usize;
        for i in 0..self.state.axis_labels.len() {
            let coord_offset = self.state.coord_sys_offsets[sys][i];
            let g92 = if self.state.offset_enabled { self.state.offset[i] } else { 0.0 };
            self.state.pos[i] = self.state.mpos[i] - coord_offset - g92;
        }
    }

    fn extend_bounds<I: Iterator<Item = char>>(&mut self, axes: I) {
        for axis in axes {
            if let Some(i) = self.state.axis_index(axis) {
                extend(&mut self.state.bounds[i], self.state.pos[i]);
                extend(&mut self.state.mbounds[i], self.state.mpos[i]);
            }
        }
    }

    /// The move-time estimator described in spec §4.2's `_process_move`.
    fn process_move(&mut self, target_words: &HashMap<char, f64>, feed: f64, is_machine_coords: bool) {
        let n = self.state.axis_labels.len();
        let sys = self.state.active_coord_sys.unwrap_or(0) as usize;
        let mut target_pos = self.state.pos.clone();
        let mut changed = vec![false; n];

        for (&axis, &value) in target_words {
            if let Some(i) = self.state.axis_index(axis) {
                changed[i] = true;
                let mut v = value;
                if self.state.incremental {
                    v += self.state.pos[i];
                }
                target_pos[i] = v;
            }
        }

        let mut target_mpos = target_pos.clone();
        if is_machine_coords {
            for (&axis, &value) in target_words {
                if let Some(i) = self.state.axis_index(axis) {
                    let mut v = value;
                    if self.state.incremental {
                        v += self.state.mpos[i];
                    }
                    target_mpos[i] = v;
                }
            }
            for i in 0..n {
                let coord_offset = self.state.coord_sys_offsets[sys][i];
                let g92 = if self.state.offset_enabled { self.state.offset[i] } else { 0.0 };
                target_pos[i] = target_mpos[i] - coord_offset - g92;
            }
        } else {
            for i in 0..n {
                let coord_offset = self.state.coord_sys_offsets[sys][i];
                let g92 = if self.state.offset_enabled { self.state.offset[i] } else { 0.0 };
                target_mpos[i] = target_pos[i] + coord_offset + g92;
            }
        }

        let travel = changed
            .iter()
            .enumerate()
            .filter(|(_, &c)| c)
            .map(|(i, _)| (target_pos[i] - self.state.pos[i]).powi(2))
            .sum::<f64>()
            .sqrt();

        let move_time_s = if travel <= 0.0 {
            0.0
        } else if self.state.inverse_feed {
            feed.max(travel / self.config.max_feed) * 60.0
        } else {
            let mut max_penalty: f64 = 0.0;
            for i in 0..n {
                if !changed[i] {
                    continue;
                }
                let axis_diff = target_pos[i] - self.state.pos[i];
                let axis_feed = axis_diff / travel * feed;
                let penalty = (axis_feed - self.state.prev_axis_feed[i]).abs() / self.config.acceleration;
                max_penalty = max_penalty.max(penalty);
                self.state.prev_axis_feed[i] = axis_feed;
            }
            let accel_dist = (feed * 0.5 * self.config.acceleration * max_penalty.powi(2)).min(travel);
            let move_time_min = (travel - accel_dist) / feed.max(f64::EPSILON) + max_penalty;
            (move_time_min * 60.0).max(0.0)
        };

        let move_time_s = move_time_s.max(self.config.min_move_time);
        self.state.total_time += move_time_s;

        self.state.pos = target_pos;
        self.state.mpos = target_mpos;
        self.extend_bounds(changed.iter().enumerate().filter(|(_, &c)| c).map(|(i, _)| self.state.axis_labels[i]));
        if !self.state.incremental {
            for i in 0..n {
                if changed[i] {
                    self.state.has_moved_to_axes[i] = true;
                }
            }
        }
    }

    /// Copy a whitelist of fields from a live controller snapshot into
    /// this VM's state. `include`/`exclude` name fields by their
    /// `VMState` identifier; when both are `None`, everything copyable is
    /// copied.
    pub fn sync_state_from_controller(
        &mut self,
        controller: &VMState,
        include: Option<&[&str]>,
        exclude: Option<&[&str]>,
    ) {
        let allow = |name: &str| {
            let included = include.map(|l| l.contains(&name)).unwrap_or(true);
            let excluded = exclude.map(|l| l.contains(&name)).unwrap_or(false);
            included && !excluded
        };
        if allow("mpos") {
            self.state.mpos = controller.mpos.clone();
        }
        if allow("pos") {
            self.state.pos = controller.pos.clone();
        }
        if allow("feed") {
            self.state.feed = controller.feed;
        }
        if allow("units") {
            self.state.units = controller.units;
        }
        if allow("incremental") {
            self.state.incremental = controller.incremental;
        }
        if allow("spindle") {
            self.state.spindle = controller.spindle;
            self.state.spindle_direction = controller.spindle_direction;
            self.state.spindle_speed = controller.spindle_speed;
        }
        if allow("coolant") {
            self.state.coolant = controller.coolant;
        }
        if allow("line") {
            self.state.line = controller.line;
        }
    }

    /// Emit the minimal sequence of G-code lines needed to impose this
    /// VM's modal state on a physical machine, in the fixed order: motion
    /// mode, feed, arc plane, incremental, inverse feed, units, spindle,
    /// coolant.
    pub fn sync_machine_to_state(
        &self,
        include: Option<&[&str]>,
        exclude: Option<&[&str]>,
    ) -> Vec<GcodeLine> {
        let allow = |name: &str| {
            let included = include.map(|l| l.contains(&name)).unwrap_or(true);
            let excluded = exclude.map(|l| l.contains(&name)).unwrap_or(false);
            included && !excluded
        };
        let mut lines = Vec::new();

        if allow("motion_mode") {
            if let Some(mode) = &self.state.motion_mode {
                if let Ok(n) = mode.trim_start_matches('G').parse::<f64>() {
                    let mut l = GcodeLine::empty();
                    l.set('G', n);
                    lines.push(l);
                }
            }
        }
        if allow("feed") {
            let mut l = GcodeLine::empty();
            l.set('F', self.state.feed);
            lines.push(l);
        }
        if allow("arc_plane") {
            let mut l = GcodeLine::empty();
            l.set('G', [17.0, 18.0, 19.0][self.state.arc_plane as usize]);
            lines.push(l);
        }
        if allow("incremental") {
            let mut l = GcodeLine::empty();
            l.set('G', if self.state.incremental { 91.0 } else { 90.0 });
            lines.push(l);
        }
        if allow("inverse_feed") {
            let mut l = GcodeLine::empty();
            l.set('G', if self.state.inverse_feed { 93.0 } else { 94.0 });
            lines.push(l);
        }
        if allow("units") {
            let mut l = GcodeLine::empty();
            l.set('G', if matches!(self.state.units, Units::In) { 20.0 } else { 21.0 });
            lines.push(l);
        }
        if allow("spindle") {
            let mut l = GcodeLine::empty();
            if self.state.spindle {
                l.set('M', if self.state.spindle_direction >= 0 { 3.0 } else { 4.0 });
                if let Some(s) = self.state.spindle_speed {
                    l.set('S', s);
                }
            } else {
                l.set('M', 5.0);
            }
            lines.push(l);
        }
        if allow("coolant") {
            let mut l = GcodeLine::empty();
            match self.state.coolant {
                0 => l.set('M', 9.0),
                c if c & COOLANT_MIST != 0 => l.set('M', 7.0),
                _ => l.set('M', 8.0),
            }
            lines.push(l);
        }

        lines
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn extend(bound: &mut (Option<f64>, Option<f64>), value: f64) {
    bound.0 = Some(bound.0.map_or(value, |v| v.min(value)));
    bound.1 = Some(bound.1.map_or(value, |v| v.max(value)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> GcodeLine {
        GcodeLine::parse(1, s).unwrap()
    }

    #[test]
    fn scenario_one_basic_motion() {
        let mut vm = GcodeVM::new(vec!['x', 'y', 'z']);
        for s in ["G21", "G0 X10 Y0", "G1 X10 Y10 F100", "M2"] {
            vm.run(&parse(s));
        }
        assert_eq!(vm.state.pos, vec![10.0, 10.0, 0.0]);
        assert!(matches!(vm.state.units, Units::Mm));
        assert!(vm.state.total_time > 0.0);
        assert_eq!(vm.state.bounds[0], (Some(0.0), Some(10.0)));
        assert_eq!(vm.state.bounds[1], (Some(0.0), Some(10.0)));
        assert_eq!(vm.state.bounds[2], (None, None));
    }

    #[test]
    fn scenario_two_g92_offset() {
        let mut vm = GcodeVM::new(vec!['x', 'y', 'z']);
        for s in ["G90", "G0 X0 Y0 Z5", "G92 X1", "G0 X5", "G92.1"] {
            vm.run(&parse(s));
            if s == "G92 X1" {
                assert!(vm.state.offset_enabled);
            }
        }
        assert_eq!(vm.state.pos[0], 4.0);
    }

    #[test]
    fn line_counter_increments_every_call() {
        let mut vm = GcodeVM::new(vec!['x']);
        let before = vm.state.line_counter;
        vm.run(&parse("G4 P0"));
        assert_eq!(vm.state.line_counter, before + 1);
    }

    #[test]
    fn dwell_adds_total_time() {
        let mut vm = GcodeVM::new(vec!['x']);
        vm.run(&parse("G4 P2.5"));
        assert_eq!(vm.state.total_time, 2.5);
    }

    #[test]
    fn has_moved_flag_is_monotone() {
        let mut vm = GcodeVM::new(vec!['x', 'y']);
        assert!(!vm.state.has_moved_to_axes[0]);
        vm.run(&parse("G0 X5"));
        assert!(vm.state.has_moved_to_axes[0]);
        assert!(!vm.state.has_moved_to_axes[1]);
    }

    #[test]
    fn sync_machine_to_state_round_trips_modals() {
        let mut vm = GcodeVM::new(vec!['x']);
        vm.run(&parse("G91"));
        vm.run(&parse("M3 S1000"));
        let lines = vm.sync_machine_to_state(None, None);

        let mut fresh = GcodeVM::new(vec!['x']);
        for l in &lines {
            fresh.run(l);
        }
        assert_eq!(fresh.state.incremental, vm.state.incremental);
        assert_eq!(fresh.state.spindle, vm.state.spindle);
        assert_eq!(fresh.state.spindle_direction, vm.state.spindle_direction);
    }
}
