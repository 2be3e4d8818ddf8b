//! Intercepts tool-change and program-pause codes, coordinating the
//! spindle, a pre/post macro pair, and an operator resume signal before
//! letting the program continue.

use crate::processor::Processor;
use gcodekit4_core::{GcodeLine, GcodeVM, Result};
use std::collections::HashMap;

/// Controller-side effects a tool change needs, injected so this crate
/// never depends directly on the communication crate's session type.
pub trait ToolChangeController: Send {
    /// Block until the planner queue has drained.
    fn wait_sync(&mut self) -> Result<()>;
    /// Stop the spindle and coolant ahead of the macro sequence.
    fn pause_spindle_and_coolant(&mut self) -> Result<()>;
    /// Restore spindle/coolant state captured before the pause.
    fn restore_spindle_and_coolant(&mut self) -> Result<()>;
    /// Block until the operator signals the tool change is complete.
    fn await_resume(&mut self) -> Result<()>;
}

/// A controller stub used for dry-run copies: every effect is a no-op.
#[derive(Default)]
pub struct NullToolChangeController;

impl ToolChangeController for NullToolChangeController {
    fn wait_sync(&mut self) -> Result<()> {
        Ok(())
    }
    fn pause_spindle_and_coolant(&mut self) -> Result<()> {
        Ok(())
    }
    fn restore_spindle_and_coolant(&mut self) -> Result<()> {
        Ok(())
    }
    fn await_resume(&mut self) -> Result<()> {
        Ok(())
    }
}

/// G-code run before and after the operator performs the physical tool
/// change, one line of text per entry.
#[derive(Debug, Clone, Default)]
pub struct ToolChangeMacros {
    pub pre: Vec<String>,
    pub post: Vec<String>,
}

/// Intercepts `T`, `M6`, `M0`, `M1`, `M60` and runs the pause/macro/resume
/// sequence described in the processor's design. Adds `current_tool_offset`
/// to subsequent `Z` values, except on lines carrying `G53`.
pub struct ToolChange {
    controller: Box<dyn ToolChangeController>,
    macros: ToolChangeMacros,
    tool_offsets: HashMap<u32, f64>,
    current_tool_offset: f64,
    vm: GcodeVM,
    max_dwell: f64,
    dry_run: bool,
}

impl ToolChange {
    /// A tool-change processor driven by `controller`, running `macros`
    /// around the pause, with per-tool Z offsets from `tool_offsets`.
    pub fn new(
        controller: Box<dyn ToolChangeController>,
        macros: ToolChangeMacros,
        tool_offsets: HashMap<u32, f64>,
    ) -> Self {
        Self {
            controller,
            macros,
            tool_offsets,
            current_tool_offset: 0.0,
            vm: GcodeVM::new(vec!['x', 'y', 'z']),
            max_dwell: 0.0,
            dry_run: false,
        }
    }

    fn is_trigger(line: &GcodeLine) -> bool {
        line.has('T') || matches!(line.get('M'), Some(m) if [6.0, 0.0, 1.0, 60.0].contains(&m))
    }
}

impl Processor for ToolChange {
    fn name(&self) -> &str {
        "tool_change"
    }

    fn copy(&self) -> Box<dyn Processor> {
        Box::new(Self::new(
            Box::new(NullToolChangeController),
            self.macros.clone(),
            self.tool_offsets.clone(),
        ))
    }

    fn process(&mut self, line: GcodeLine, push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        if let Some(p) = line.get('P') {
            if line.get('G') == Some(4.0) {
                self.max_dwell = self.max_dwell.max(p);
            }
        }
        let is_g53 = line.get('G') == Some(53.0);
        let tool = line.get('T');
        self.vm.run(&line);

        if Self::is_trigger(&line) {
            push(line);

            if !self.dry_run {
                self.controller.wait_sync()?;
                self.controller.pause_spindle_and_coolant()?;

                for raw in &self.macros.pre {
                    if let Ok(l) = GcodeLine::parse(0, raw) {
                        push(l);
                    }
                }

                self.controller.await_resume()?;

                for raw in &self.macros.post {
                    if let Ok(l) = GcodeLine::parse(0, raw) {
                        push(l);
                    }
                }

                self.controller.restore_spindle_and_coolant()?;

                for l in self.vm.sync_machine_to_state(Some(&["spindle", "coolant"]), None) {
                    push(l);
                }

                let mut dwell = GcodeLine::empty();
                dwell.set('G', 4.0);
                dwell.set('P', self.max_dwell);
                push(dwell);

                let mut back = GcodeLine::empty();
                back.set('G', 0.0);
                for (i, &axis) in self.vm.state.axis_labels.iter().enumerate() {
                    back.set(axis.to_ascii_uppercase(), self.vm.state.pos[i]);
                }
                push(back);
            }

            if let Some(t) = tool {
                self.current_tool_offset = *self.tool_offsets.get(&(t as u32)).unwrap_or(&0.0);
            }
            return Ok(());
        }

        if !is_g53 && self.current_tool_offset != 0.0 {
            if let Some(z) = line.get('Z') {
                let mut l = line;
                l.set('Z', z + self.current_tool_offset);
                push(l);
                return Ok(());
            }
        }

        push(line);
        Ok(())
    }

    fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn m6_runs_macro_sequence_and_moves_back() {
        let macros = ToolChangeMacros {
            pre: vec!["M5".to_string()],
            post: vec!["M3 S1000".to_string()],
        };
        let mut change = ToolChange::new(Box::new(NullToolChangeController), macros, HashMap::new());
        let mut out = Vec::new();
        let mut push = |l: GcodeLine| out.push(l);
        change
            .process(GcodeLine::parse(1, "G0 X5 Y5").unwrap(), &mut push)
            .unwrap();
        change
            .process(GcodeLine::parse(2, "M6 T1").unwrap(), &mut push)
            .unwrap();
        assert!(out.iter().any(|l| l.get('M') == Some(5.0)));
        assert!(out.iter().any(|l| l.get('M') == Some(3.0)));
        let back = out.last().unwrap();
        assert_eq!(back.get('X'), Some(5.0));
        assert_eq!(back.get('Y'), Some(5.0));
    }

    #[test]
    fn applies_tool_offset_to_subsequent_z() {
        let mut offsets = HashMap::new();
        offsets.insert(2, 1.5);
        let mut change = ToolChange::new(Box::new(NullToolChangeController), ToolChangeMacros::default(), offsets);
        {
            let mut out = Vec::new();
            let mut push = |l: GcodeLine| out.push(l);
            change.process(GcodeLine::parse(1, "M6 T2").unwrap(), &mut push).unwrap();
        }
        let mut out = Vec::new();
        let mut push = |l: GcodeLine| out.push(l);
        change.process(GcodeLine::parse(2, "G1 Z1").unwrap(), &mut push).unwrap();
        assert_eq!(out[0].get('Z'), Some(2.5));
    }

    #[test]
    fn g53_line_skips_tool_offset() {
        let mut offsets = HashMap::new();
        offsets.insert(2, 1.5);
        let mut change = ToolChange::new(Box::new(NullToolChangeController), ToolChangeMacros::default(), offsets);
        {
            let mut out = Vec::new();
            let mut push = |l: GcodeLine| out.push(l);
            change.process(GcodeLine::parse(1, "M6 T2").unwrap(), &mut push).unwrap();
        }
        let mut out = Vec::new();
        let mut push = |l: GcodeLine| out.push(l);
        change.process(GcodeLine::parse(2, "G53 G1 Z1").unwrap(), &mut push).unwrap();
        assert_eq!(out[0].get('Z'), Some(1.0));
    }
}
