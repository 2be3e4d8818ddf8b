//! Parsed G-code lines and their per-line lifecycle hooks.

use crate::error::{Error, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// A single `<letter><value>` token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Word {
    /// Uppercase letter, e.g. `G`, `X`, `F`.
    pub letter: char,
    /// The numeric value following the letter.
    pub value: f64,
}

/// A lifecycle stage a line passes through as it moves from the chain to
/// the wire and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineHookKind {
    /// Enqueued into the controller session's send queue.
    Queued,
    /// Written to the wire.
    Sent,
    /// A response was received for this line.
    Ack,
    /// The controller reports it is executing this line.
    Executing,
    /// The controller reports this line has finished executing.
    Executed,
}

impl LineHookKind {
    const ALL: [LineHookKind; 5] = [
        LineHookKind::Queued,
        LineHookKind::Sent,
        LineHookKind::Ack,
        LineHookKind::Executing,
        LineHookKind::Executed,
    ];
}

type Hook = Arc<dyn Fn() + Send + Sync>;

/// A parsed G-code line: an ordered word list, an optional trailing
/// comment, per-processor annotations, and one-shot lifecycle hooks.
#[derive(Clone)]
pub struct GcodeLine {
    words: Vec<Word>,
    comment: Option<String>,
    annotations: HashMap<String, Value>,
    hooks: Arc<RefCell<HashMap<LineHookKind, Vec<Hook>>>>,
    fired: Arc<RefCell<std::collections::HashSet<LineHookKind>>>,
}

impl std::fmt::Debug for GcodeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcodeLine")
            .field("words", &self.words)
            .field("comment", &self.comment)
            .field("annotations", &self.annotations)
            .finish()
    }
}

impl GcodeLine {
    /// An empty line with no words or comment.
    pub fn empty() -> Self {
        Self {
            words: Vec::new(),
            comment: None,
            annotations: HashMap::new(),
            hooks: Arc::new(RefCell::new(HashMap::new())),
            fired: Arc::new(RefCell::new(std::collections::HashSet::new())),
        }
    }

    /// Build a line directly from a word list, skipping parsing.
    pub fn from_words(words: Vec<Word>) -> Self {
        Self {
            words,
            ..Self::empty()
        }
    }

    /// Parse a single line of text into words plus an optional comment.
    ///
    /// Comments are `;`-to-end-of-line or parenthesized `(...)` spans;
    /// letters are case-folded to uppercase; numeric values are parsed as
    /// `f64`. Malformed `<letter>` tokens without a following number fail
    /// with [`Error::ParseError`].
    pub fn parse(line_number: u32, s: &str) -> Result<Self> {
        let (code, comment) = split_comment(s);
        let mut words = Vec::new();
        let chars: Vec<char> = code.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c.is_whitespace() {
                i += 1;
                continue;
            }
            if !c.is_ascii_alphabetic() {
                return Err(Error::parse(
                    line_number,
                    format!("unexpected character '{c}'"),
                ));
            }
            let letter = c.to_ascii_uppercase();
            i += 1;
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == '-'
                    || chars[i] == '+')
            {
                i += 1;
            }
            if start == i {
                return Err(Error::parse(
                    line_number,
                    format!("letter '{letter}' with no value"),
                ));
            }
            let value_str: String = chars[start..i].iter().collect();
            let value: f64 = value_str
                .parse()
                .map_err(|_| Error::parse(line_number, format!("invalid number '{value_str}'")))?;
            words.push(Word { letter, value });
        }
        Ok(Self {
            words,
            comment,
            ..Self::empty()
        })
    }

    /// Every word in emission order.
    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// The trailing comment, if any.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Attach or replace the trailing comment.
    pub fn add_comment(&mut self, text: impl Into<String>) {
        self.comment = Some(text.into());
    }

    /// The value of `letter`, if present.
    pub fn get(&self, letter: char) -> Option<f64> {
        let letter = letter.to_ascii_uppercase();
        self.words.iter().find(|w| w.letter == letter).map(|w| w.value)
    }

    /// Whether `letter` appears on this line.
    pub fn has(&self, letter: char) -> bool {
        self.get(letter).is_some()
    }

    /// Set `letter` to `value`, updating in place if already present,
    /// otherwise appending.
    pub fn set(&mut self, letter: char, value: f64) {
        let letter = letter.to_ascii_uppercase();
        if let Some(w) = self.words.iter_mut().find(|w| w.letter == letter) {
            w.value = value;
        } else {
            self.words.push(Word { letter, value });
        }
    }

    /// Remove `letter`, if present.
    pub fn remove(&mut self, letter: char) {
        let letter = letter.to_ascii_uppercase();
        self.words.retain(|w| w.letter != letter);
    }

    /// Per-processor annotation bag, keyed by processor id.
    pub fn annotations(&self) -> &HashMap<String, Value> {
        &self.annotations
    }

    /// Set the annotation a processor attaches to this line.
    pub fn set_annotation(&mut self, processor_id: impl Into<String>, value: Value) {
        self.annotations.insert(processor_id.into(), value);
    }

    /// Register `f` to run the first time `kind` is triggered on this line.
    pub fn hook_sync<F>(&self, kind: LineHookKind, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push(Arc::new(f));
    }

    /// Invoke every hook registered for `kind`, in registration order.
    /// A second call for the same `kind` is a no-op.
    pub fn trigger_sync(&self, kind: LineHookKind) {
        if !self.fired.borrow_mut().insert(kind) {
            return;
        }
        let hooks = self.hooks.borrow().get(&kind).cloned().unwrap_or_default();
        for hook in hooks {
            hook();
        }
    }

    /// Trigger every lifecycle hook in canonical order: `queued`, `sent`,
    /// `ack`, `executing`, `executed`. Used when replaying or
    /// black-holing a line that will never actually cross the wire.
    pub fn call_all_line_hooks(&self) {
        for kind in LineHookKind::ALL {
            self.trigger_sync(kind);
        }
    }
}

impl std::fmt::Display for GcodeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for word in &self.words {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            if word.value.fract() == 0.0 && word.value.abs() < 1e15 {
                write!(f, "{}{}", word.letter, word.value as i64)?;
            } else {
                write!(f, "{}{}", word.letter, word.value)?;
            }
        }
        if let Some(comment) = &self.comment {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "({comment})")?;
        }
        Ok(())
    }
}

fn split_comment(s: &str) -> (String, Option<String>) {
    if let Some(idx) = s.find(';') {
        let comment = s[idx + 1..].trim().to_string();
        return (
            s[..idx].to_string(),
            if comment.is_empty() { None } else { Some(comment) },
        );
    }
    if let Some(start) = s.find('(') {
        if let Some(end) = s[start..].find(')') {
            let comment = s[start + 1..start + end].trim().to_string();
            let code = format!("{}{}", &s[..start], &s[start + end + 1..]);
            return (code, if comment.is_empty() { None } else { Some(comment) });
        }
    }
    (s.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_words_in_order() {
        let line = GcodeLine::parse(1, "G1 X10 Y-5.5 F100").unwrap();
        assert_eq!(line.get('G'), Some(1.0));
        assert_eq!(line.get('X'), Some(10.0));
        assert_eq!(line.get('Y'), Some(-5.5));
        assert_eq!(line.get('F'), Some(100.0));
    }

    #[test]
    fn round_trips_through_display() {
        let text = "G1 X10 Y5 F100";
        let line = GcodeLine::parse(1, text).unwrap();
        assert_eq!(line.to_string(), text);
    }

    #[test]
    fn round_trips_with_comment() {
        let line = GcodeLine::parse(1, "G0 X1 ; move to start").unwrap();
        assert_eq!(line.to_string(), "G0 X1 (move to start)");
    }

    #[test]
    fn set_updates_in_place() {
        let mut line = GcodeLine::parse(1, "G1 X10 Y5").unwrap();
        line.set('X', 20.0);
        assert_eq!(line.to_string(), "G1 X20 Y5");
    }

    #[test]
    fn remove_drops_word() {
        let mut line = GcodeLine::parse(1, "G1 X10 Y5").unwrap();
        line.remove('Y');
        assert_eq!(line.to_string(), "G1 X10");
    }

    #[test]
    fn rejects_letter_with_no_value() {
        assert!(GcodeLine::parse(1, "G1 X").is_err());
    }

    #[test]
    fn hooks_fire_once_in_order() {
        let line = GcodeLine::empty();
        let log = Arc::new(RefCell::new(Vec::new()));
        let log1 = log.clone();
        line.hook_sync(LineHookKind::Queued, move || log1.borrow_mut().push(1));
        let log2 = log.clone();
        line.hook_sync(LineHookKind::Queued, move || log2.borrow_mut().push(2));
        line.trigger_sync(LineHookKind::Queued);
        line.trigger_sync(LineHookKind::Queued);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn call_all_line_hooks_fires_each_kind() {
        let line = GcodeLine::empty();
        let log = Arc::new(RefCell::new(Vec::new()));
        for kind in LineHookKind::ALL {
            let log = log.clone();
            line.hook_sync(kind, move || log.borrow_mut().push(kind));
        }
        line.call_all_line_hooks();
        assert_eq!(log.borrow().len(), 5);
    }
}
