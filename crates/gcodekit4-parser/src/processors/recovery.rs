//! Crash-recovery state tracking and job-resume replay.

use crate::processor::Processor;
use gcodekit4_core::{Error, GcodeLine, GcodeVM, LineHookKind, Result, VMState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// The atomically-persisted recovery snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    #[serde(rename = "jobOptions")]
    pub job_options: serde_json::Value,
    #[serde(rename = "lineCountOffset")]
    pub line_count_offset: u64,
    #[serde(rename = "predictedTimeOffset")]
    pub predicted_time_offset: f64,
}

/// Tracks job progress and periodically persists a [`RecoverySnapshot`]
/// so a crashed job can resume. Each line hooks `executed` to advance
/// the snapshot to the most recently *actually executed* line rather
/// than the most recently emitted one.
pub struct RecoveryTracker {
    path: PathBuf,
    save_interval: Duration,
    last_save: Option<Instant>,
    vm: GcodeVM,
    line_count: u64,
    job_options: serde_json::Value,
    dry_run: bool,
}

impl RecoveryTracker {
    /// A tracker writing to `path` at most once every `save_interval_s`
    /// seconds (plus once eagerly on the very first line).
    pub fn new(path: impl Into<PathBuf>, save_interval_s: u64, job_options: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            save_interval: Duration::from_secs(save_interval_s),
            last_save: None,
            vm: GcodeVM::new(vec!['x', 'y', 'z']),
            line_count: 0,
            job_options,
            dry_run: false,
        }
    }

    fn snapshot(&self) -> RecoverySnapshot {
        RecoverySnapshot {
            job_options: self.job_options.clone(),
            line_count_offset: self.line_count,
            predicted_time_offset: self.vm.state.total_time,
        }
    }

    fn write(snapshot: &RecoverySnapshot, path: &std::path::Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Delete the recovery file on successful job completion.
    pub fn complete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Processor for RecoveryTracker {
    fn name(&self) -> &str {
        "recovery_tracker"
    }

    fn copy(&self) -> Box<dyn Processor> {
        Box::new(Self {
            path: self.path.clone(),
            save_interval: self.save_interval,
            last_save: None,
            vm: GcodeVM::with_config(self.vm.state.axis_labels.clone(), self.vm.config.clone()),
            line_count: 0,
            job_options: self.job_options.clone(),
            dry_run: false,
        })
    }

    fn process(&mut self, line: GcodeLine, push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        self.vm.run(&line);
        self.line_count += 1;

        if !self.dry_run {
            let due = self.last_save.map_or(true, |t| t.elapsed() >= self.save_interval);
            if due {
                Self::write(&self.snapshot(), &self.path)?;
                self.last_save = Some(Instant::now());
            }

            let path = self.path.clone();
            let snapshot = self.snapshot();
            line.hook_sync(LineHookKind::Executed, move || {
                let _ = Self::write(&snapshot, &path);
            });
        }

        push(line);
        Ok(())
    }

    fn flush(&mut self, _push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        if !self.dry_run {
            self.complete()?;
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

/// Configured macros substituted into the clearance/workpiece moves
/// [`RecoveryReplay`] emits when it resumes a job.
#[derive(Debug, Clone)]
pub struct RecoveryMacros {
    /// Emitted first, with the pre-pause axis coordinates substituted.
    pub move_to_clearance: String,
    /// Emitted last, before resuming buffered lines.
    pub move_to_workpiece: String,
}

/// Silently replays a crashed job up to its last recorded checkpoint,
/// then resumes streaming from the buffered tail.
pub struct RecoveryReplay {
    snapshot: RecoverySnapshot,
    back_up_lines: usize,
    macros: RecoveryMacros,
    vm: GcodeVM,
    ring: Vec<(VMState, VMState, GcodeLine)>,
    max_dwell: f64,
    resumed: bool,
    dry_run: bool,
}

impl RecoveryReplay {
    /// Build a replay processor from an already-loaded snapshot.
    pub fn new(snapshot: RecoverySnapshot, back_up_lines: usize, macros: RecoveryMacros) -> Self {
        Self {
            snapshot,
            back_up_lines,
            macros,
            vm: GcodeVM::new(vec!['x', 'y', 'z']),
            ring: Vec::new(),
            max_dwell: 0.0,
            resumed: false,
            dry_run: false,
        }
    }

    /// Load a snapshot from disk and build a replay processor from it.
    pub fn load(path: &std::path::Path, back_up_lines: usize, macros: RecoveryMacros) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::internal(format!("recovery file unreadable: {e}")))?;
        let snapshot: RecoverySnapshot = serde_json::from_str(&text)?;
        Ok(Self::new(snapshot, back_up_lines, macros))
    }

    fn flush_resume(&mut self, push: &mut dyn FnMut(GcodeLine)) {
        let Some((pre, _, _)) = self.ring.first().cloned() else {
            self.resumed = true;
            return;
        };

        let mut clearance = GcodeLine::parse(0, &self.macros.move_to_clearance).unwrap_or_else(|_| GcodeLine::empty());
        for (i, &axis) in pre.axis_labels.iter().enumerate() {
            clearance.set(axis.to_ascii_uppercase(), pre.pos[i]);
        }
        push(clearance);

        for l in self.vm.sync_machine_to_state(None, None) {
            push(l);
        }

        let mut dwell = GcodeLine::empty();
        dwell.set('G', 4.0);
        dwell.set('P', self.max_dwell);
        push(dwell);

        if let Ok(workpiece) = GcodeLine::parse(0, &self.macros.move_to_workpiece) {
            push(workpiece);
        }

        for (_, _, line) in self.ring.drain(..) {
            push(line);
        }
        self.resumed = true;
    }
}

impl Processor for RecoveryReplay {
    fn name(&self) -> &str {
        "recovery_replay"
    }

    fn copy(&self) -> Box<dyn Processor> {
        Box::new(Self::new(
            self.snapshot.clone(),
            self.back_up_lines,
            self.macros.clone(),
        ))
    }

    fn process(&mut self, line: GcodeLine, push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        if self.resumed {
            push(line);
            return Ok(());
        }

        let pre = self.vm.state.clone();
        if let Some(dwell) = line.get('P') {
            if line.get('G') == Some(4.0) {
                self.max_dwell = self.max_dwell.max(dwell);
            }
        }
        self.vm.run(&line);
        let post = self.vm.state.clone();

        line.call_all_line_hooks();

        self.ring.push((pre, post, line));
        if self.ring.len() > self.back_up_lines {
            self.ring.remove(0);
        }

        if self.vm.state.total_time >= self.snapshot.predicted_time_offset {
            self.flush_resume(push);
        }
        Ok(())
    }

    fn flush(&mut self, push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        if !self.resumed {
            self.flush_resume(push);
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

    #[test]
    fn tracker_writes_and_deletes_recovery_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.json");
        let mut tracker = RecoveryTracker::new(&path, 0, serde_json::json!({}));
        let mut sink = Vec::new();
        let mut push = |l: GcodeLine| sink.push(l);
        tracker
            .process(GcodeLine::parse(1, "G0 X1").unwrap(), &mut push)
            .unwrap();
        assert!(path.exists());
        tracker.flush(&mut push).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn replay_passes_through_once_resumed() {
        let snapshot = RecoverySnapshot {
            job_options: serde_json::json!({}),
            line_count_offset: 0,
            predicted_time_offset: 0.0,
        };
        let macros = RecoveryMacros {
            move_to_clearance: "G0 Z5".to_string(),
            move_to_workpiece: "G0 Z0".to_string(),
        };
        let mut replay = RecoveryReplay::new(snapshot, 4, macros);
        let mut out = Vec::new();
        let mut push = |l: GcodeLine| out.push(l);
        replay
            .process(GcodeLine::parse(1, "G4 P0").unwrap(), &mut push)
            .unwrap();
        assert!(replay.resumed);
        assert!(out.iter().any(|l| l.get('G') == Some(4.0) && l.get('P').is_some()));
    }
}
