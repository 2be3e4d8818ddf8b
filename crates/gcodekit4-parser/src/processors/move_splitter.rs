//! Splits long absolute G0/G1 moves into sub-segments no longer than a
//! configured maximum.

use crate::processor::Processor;
use gcodekit4_core::{GcodeLine, Result, Word};
use std::collections::HashMap;

const AXES: [char; 3] = ['X', 'Y', 'Z'];

/// Splits absolute `G0`/`G1` moves longer than `max_len` into several
/// shorter sub-moves. Never splits incremental moves or lines that
/// change the active coordinate system.
pub struct MoveSplitter {
    max_len: f64,
    position: HashMap<char, f64>,
    incremental: bool,
    dry_run: bool,
}

impl MoveSplitter {
    /// A splitter emitting sub-segments no longer than `max_len`.
    pub fn new(max_len: f64) -> Self {
        Self {
            max_len,
            position: HashMap::new(),
            incremental: false,
            dry_run: false,
        }
    }
}

impl Processor for MoveSplitter {
    fn name(&self) -> &str {
        "move_splitter"
    }

    fn copy(&self) -> Box<dyn Processor> {
        Box::new(Self::new(self.max_len))
    }

    fn process(&mut self, line: GcodeLine, push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        let Some(g) = line.get('G') else {
            for &axis in &AXES {
                if let Some(v) = line.get(axis) {
                    if !self.incremental {
                        self.position.insert(axis, v);
                    }
                }
            }
            push(line);
            return Ok(());
        };

        if g == 90.0 {
            self.incremental = false;
        } else if g == 91.0 {
            self.incremental = true;
        }

        let is_coord_change = (54.0..=59.0).contains(&g);
        let is_splittable_move = g == 0.0 || g == 1.0;

        if !is_splittable_move || is_coord_change || self.incremental {
            push(line);
            return Ok(());
        }

        let moved_axes: Vec<char> = AXES.iter().copied().filter(|&a| line.has(a)).collect();
        if moved_axes.is_empty() {
            push(line);
            return Ok(());
        }

        let start: Vec<f64> = moved_axes
            .iter()
            .map(|a| *self.position.get(a).unwrap_or(&0.0))
            .collect();
        let end: Vec<f64> = moved_axes.iter().map(|&a| line.get(a).unwrap()).collect();
        let travel = start
            .iter()
            .zip(&end)
            .map(|(s, e)| (e - s).powi(2))
            .sum::<f64>()
            .sqrt();

        if travel > self.max_len && self.max_len > 0.0 {
            let preamble_words: Vec<Word> = line
                .words()
                .iter()
                .filter(|w| !AXES.contains(&w.letter))
                .copied()
                .collect();
            let segments = (travel / self.max_len).ceil() as u32;
            let mut preamble = GcodeLine::from_words(preamble_words);
            preamble.add_comment(format!("move split into {segments} segments"));
            push(preamble);

            for i in 1..=segments {
                let t = f64::from(i) / f64::from(segments);
                let mut seg = GcodeLine::empty();
                seg.set('G', g);
                for (idx, &axis) in moved_axes.iter().enumerate() {
                    seg.set(axis, start[idx] + (end[idx] - start[idx]) * t);
                }
                push(seg);
            }
        } else {
            push(line);
        }

        for (idx, &axis) in moved_axes.iter().enumerate() {
            self.position.insert(axis, end[idx]);
        }
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

    fn collect(splitter: &mut MoveSplitter, line: &str) -> Vec<GcodeLine> {
        let mut out = Vec::new();
        let mut push = |l: GcodeLine| out.push(l);
        splitter
            .process(GcodeLine::parse(1, line).unwrap(), &mut push)
            .unwrap();
        out
    }

    #[test]
    fn splits_long_move_into_sub_segments() {
        let mut splitter = MoveSplitter::new(2.0);
        let out = collect(&mut splitter, "G1 X10");
        assert_eq!(out.len(), 6);
        assert!(out[0].comment().is_some());
        let xs: Vec<f64> = out[1..].iter().map(|l| l.get('X').unwrap()).collect();
        assert_eq!(xs, vec![2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn leaves_short_move_untouched() {
        let mut splitter = MoveSplitter::new(20.0);
        let out = collect(&mut splitter, "G1 X10");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get('X'), Some(10.0));
    }

    #[test]
    fn never_splits_incremental_moves() {
        let mut splitter = MoveSplitter::new(2.0);
        collect(&mut splitter, "G91");
        let out = collect(&mut splitter, "G1 X10");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn never_splits_coord_system_changes() {
        let mut splitter = MoveSplitter::new(2.0);
        let out = collect(&mut splitter, "G54");
        assert_eq!(out.len(), 1);
    }
}
