//! The processor abstraction and the chain that wires processors together.

use crate::source::GcodeSource;
use gcodekit4_core::{GcodeLine, Result};
use serde_json::Value;
use std::collections::HashMap;

/// One stage of the transform pipeline between a raw source and the
/// controller session. A processor consumes lines one at a time and
/// produces zero, one, or many lines in response, pushed through the
/// `push` callback as soon as they're ready rather than batched into a
/// return value.
pub trait Processor: Send {
    /// Stable, human-readable name, also used as the default id.
    fn name(&self) -> &str;

    /// Identifier used to look a processor up in a built chain. Defaults
    /// to `name()`; override if a chain can hold more than one instance
    /// of the same processor type.
    fn id(&self) -> &str {
        self.name()
    }

    /// Inserts this processor into the chain being built, in whatever
    /// position and quantity it needs. Most processors just append
    /// themselves; a processor that depends on another running
    /// immediately ahead of it (autoleveling needs a move splitter so it
    /// levels densely rather than interpolating linearly between
    /// endpoints) pushes that dependency first. Overriding gives a
    /// processor the full chain-construction contract — conditional
    /// insertion, appending after, or reading what's already in `chain` —
    /// not just a fixed prepend list.
    fn add_to_chain(self: Box<Self>, chain: &mut Vec<Box<dyn Processor>>)
    where
        Self: 'static,
    {
        chain.push(self);
    }

    /// Called once while the chain is being built, after every
    /// processor ahead of this one in the chain has been wired up.
    /// `preprocess` replays the entire source through dry-run copies of
    /// the processors ahead of this one and returns their combined
    /// output — used by processors that need to see the whole program
    /// up front (surface mapping, autoleveling).
    fn init(&mut self, _preprocess: &mut dyn FnMut() -> Result<Vec<GcodeLine>>) -> Result<()> {
        Ok(())
    }

    /// An independent copy of this processor's configuration and algorithm
    /// state, reset to its initial runtime state. Used to build the
    /// dry-run copies driving `preprocess`.
    fn copy(&self) -> Box<dyn Processor>;

    /// Handle one incoming line, pushing zero or more output lines.
    fn process(&mut self, line: GcodeLine, push: &mut dyn FnMut(GcodeLine)) -> Result<()>;

    /// Called once after the source is exhausted, to flush any lines a
    /// processor was holding back (e.g. a pending tool-change sequence).
    fn flush(&mut self, _push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
        Ok(())
    }

    /// Optional diagnostic snapshot surfaced to callers (e.g. surface
    /// map bounds, recovery progress).
    fn status(&self) -> Option<Value> {
        None
    }

    /// Dry-run processors execute their transform logic but must not
    /// perform side effects outside of the line stream (no file writes,
    /// no hardware access).
    fn set_dry_run(&mut self, dry_run: bool);

    /// Whether this processor is currently in dry-run mode.
    fn is_dry_run(&self) -> bool;
}

/// A built, ready-to-drive chain of processors.
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
    index: HashMap<String, usize>,
}

impl ProcessorChain {
    /// Run one line through every stage of the chain in order, returning
    /// the lines that emerged from the far end.
    pub fn process_line(&mut self, line: GcodeLine) -> Result<Vec<GcodeLine>> {
        let mut stage = vec![line];
        for processor in self.processors.iter_mut() {
            let mut next = Vec::new();
            for l in stage.drain(..) {
                let mut push = |l: GcodeLine| next.push(l);
                processor.process(l, &mut push)?;
            }
            stage = next;
        }
        Ok(stage)
    }

    /// Flush every stage in order, draining any lines a processor held
    /// back until end of input.
    pub fn flush(&mut self) -> Result<Vec<GcodeLine>> {
        let mut stage = Vec::new();
        for processor in self.processors.iter_mut() {
            let mut flushed = Vec::new();
            {
                let mut push = |l: GcodeLine| flushed.push(l);
                processor.flush(&mut push)?;
            }
            stage.extend(flushed);
            let mut next = Vec::new();
            for l in stage.drain(..) {
                let mut push = |l: GcodeLine| next.push(l);
                processor.process(l, &mut push)?;
            }
            stage = next;
        }
        Ok(stage)
    }

    /// Look up a processor in the chain by id.
    pub fn processor(&self, id: &str) -> Option<&dyn Processor> {
        self.index.get(id).map(|&i| self.processors[i].as_ref())
    }

    /// Number of stages in the chain.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Whether the chain has no stages.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

/// Builds a [`ProcessorChain`] from an ordered list of processors,
/// resolving dependencies and running each processor's `init` against a
/// replay of the source through the stages ahead of it.
pub struct ProcessorChainBuilder {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChainBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    /// Add a processor to the chain, via its own `add_to_chain` —
    /// ordinarily just an append, but a processor may insert dependencies
    /// of its own ahead of (or around) itself.
    pub fn add(mut self, processor: Box<dyn Processor>) -> Self {
        processor.add_to_chain(&mut self.processors);
        self
    }

    /// Wire the chain against `source`, running each processor's `init`
    /// with a preprocess replay of the stages ahead of it, then return
    /// the ready-to-drive chain.
    pub fn build(mut self, source: &dyn GcodeSource) -> Result<ProcessorChain> {
        for k in 0..self.processors.len() {
            let mut ahead: Vec<Box<dyn Processor>> =
                self.processors[0..k].iter().map(|p| p.copy()).collect();
            for p in ahead.iter_mut() {
                p.set_dry_run(true);
            }
            let mut preprocess = move || -> Result<Vec<GcodeLine>> {
                let mut out = Vec::new();
                for line in source.lines()? {
                    let line = line?;
                    let mut stage = vec![line];
                    for p in ahead.iter_mut() {
                        let mut next = Vec::new();
                        for l in stage.drain(..) {
                            let mut push = |l: GcodeLine| next.push(l);
                            p.process(l, &mut push)?;
                        }
                        stage = next;
                    }
                    for l in &stage {
                        l.call_all_line_hooks();
                    }
                    out.extend(stage);
                }
                Ok(out)
            };
            self.processors[k].init(&mut preprocess)?;
        }

        let mut index = HashMap::new();
        for (i, p) in self.processors.iter().enumerate() {
            index.insert(p.id().to_string(), i);
        }
        Ok(ProcessorChain {
            processors: self.processors,
            index,
        })
    }
}

impl Default for ProcessorChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;

    #[derive(Clone)]
    struct Doubler {
        dry_run: bool,
    }

    impl Processor for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }
        fn copy(&self) -> Box<dyn Processor> {
            Box::new(self.clone())
        }
        fn process(&mut self, line: GcodeLine, push: &mut dyn FnMut(GcodeLine)) -> Result<()> {
            push(line.clone());
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

    #[test]
    fn chain_runs_lines_through_every_stage() {
        let source = VecSource::new(vec!["G0 X1".to_string()]);
        let mut chain = ProcessorChainBuilder::new()
            .add(Box::new(Doubler { dry_run: false }))
            .build(&source)
            .unwrap();
        let out = chain.process_line(GcodeLine::parse(1, "G0 X1").unwrap()).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn processor_lookup_by_id() {
        let source = VecSource::new(vec![]);
        let chain = ProcessorChainBuilder::new()
            .add(Box::new(Doubler { dry_run: false }))
            .build(&source)
            .unwrap();
        assert!(chain.processor("doubler").is_some());
        assert!(chain.processor("missing").is_none());
    }
}
