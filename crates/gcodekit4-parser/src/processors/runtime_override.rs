//! Live feed-rate override and outstanding-line flow control.

use crate::processor::Processor;
use gcodekit4_core::{GcodeLine, LineHookKind, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// A handle an operator-facing caller can use to change the feed
/// multiplier applied by a running [`RuntimeOverride`].
#[derive(Clone)]
pub struct RuntimeOverrideHandle {
    feed_multiplier: Arc<Mutex<f64>>,
}

impl RuntimeOverrideHandle {
    /// Set the live feed multiplier (clamped to non-negative).
    pub fn set_feed_multiplier(&self, multiplier: f64) {
        *self.feed_multiplier.lock() = multiplier.max(0.0);
    }

    /// The currently applied feed multiplier.
    pub fn feed_multiplier(&self) -> f64 {
        *self.feed_multiplier.lock()
    }
}

/// Scales `F` words by a live-adjustable multiplier and bounds the
/// number of lines outstanding (emitted but not yet reported `executed`)
/// to `max_buffered`, blocking `process` until a slot frees up.
pub struct RuntimeOverride {
    feed_multiplier: Arc<Mutex<f64>>,
    max_buffered: usize,
    outstanding: Arc<Mutex<usize>>,
    signal: Arc<Condvar>,
    dry_run: bool,
}

impl RuntimeOverride {
    /// An override processor holding at most `max_buffered` outstanding
    /// lines at a time, with an initial feed multiplier of `1.0`.
    pub fn new(max_buffered: usize) -> Self {
        Self {
            feed_multiplier: Arc::new(Mutex::new(1.0)),
            max_buffered,
            outstanding: Arc::new(Mutex::new(0)),
            signal: Arc::new(Condvar::new()),
            dry_run: false,
        }
    }

    /// A cloneable handle for adjusting the feed multiplier live.
    pub fn handle(&self) -> RuntimeOverrideHandle {
        RuntimeOverrideHandle {
            feed_multiplier: self.feed_multiplier.clone(),
        }
    }
}

impl Processor for RuntimeOverride {
    fn name(&self) -> &str {
        "runtime_override"
    }

    fn copy(&self) -> Box<dyn Processor> {
        Box::new(Self::new(self.max_buffered))
    }

    fn process(&mut self, mut line: GcodeLine, push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        if let Some(f) = line.get('F') {
            let multiplier = *self.feed_multiplier.lock();
            line.set('F', f * multiplier);
        }

        if !self.dry_run {
            let mut count = self.outstanding.lock();
            while *count >= self.max_buffered {
                self.signal.wait(&mut count);
            }
            *count += 1;
            drop(count);

            let outstanding = self.outstanding.clone();
            let signal = self.signal.clone();
            line.hook_sync(LineHookKind::Executed, move || {
                let mut count = outstanding.lock();
                *count = count.saturating_sub(1);
                signal.notify_one();
            });
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
    fn applies_live_feed_multiplier() {
        let mut ro = RuntimeOverride::new(20);
        let handle = ro.handle();
        handle.set_feed_multiplier(0.5);
        let mut out = Vec::new();
        let mut push = |l: GcodeLine| out.push(l);
        ro.process(GcodeLine::parse(1, "G1 X1 F100").unwrap(), &mut push)
            .unwrap();
        assert_eq!(out[0].get('F'), Some(50.0));
    }

    #[test]
    fn executed_hook_frees_outstanding_slot() {
        let mut ro = RuntimeOverride::new(1);
        let mut out = Vec::new();
        {
            let mut push = |l: GcodeLine| out.push(l);
            ro.process(GcodeLine::parse(1, "G1 X1").unwrap(), &mut push)
                .unwrap();
        }
        assert_eq!(*ro.outstanding.lock(), 1);
        let first = out.pop().unwrap();
        first.trigger_sync(LineHookKind::Executed);
        assert_eq!(*ro.outstanding.lock(), 0);
    }
}
