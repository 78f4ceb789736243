//! Input validation and per-player input queueing

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Maximum queued inputs per player. Past this the oldest entry is
/// dropped, never the newest, so a flooding client cannot grow memory
/// and a laggy one still gets its most recent intent applied.
pub const INPUT_QUEUE_CAP: usize = 10;

/// One validated input message, applied during a fixed tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFrame {
    pub seq: u32,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub fire: bool,
}

/// Validate the raw shape of an `input` message and build a frame.
///
/// Returns `None` for non-objects, unknown keys, or wrong value types.
/// Rejection is silent at the protocol level (the caller logs a warn):
/// a malformed input could be a client bug rather than cheating, so it
/// is never grounds for a disconnect.
pub fn validate_input(raw: &Value) -> Option<InputFrame> {
    let obj = raw.as_object()?;

    const VALID_KEYS: [&str; 7] = ["type", "seq", "left", "right", "up", "down", "fire"];
    const BOOL_KEYS: [&str; 5] = ["left", "right", "up", "down", "fire"];

    for key in obj.keys() {
        if !VALID_KEYS.contains(&key.as_str()) {
            return None;
        }
    }

    for key in BOOL_KEYS {
        if let Some(v) = obj.get(key) {
            if !v.is_boolean() {
                return None;
            }
        }
    }

    let seq = match obj.get("seq") {
        Some(v) => v.as_u64()? as u32,
        None => 0,
    };

    let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);

    Some(InputFrame {
        seq,
        left: flag("left"),
        right: flag("right"),
        up: flag("up"),
        down: flag("down"),
        fire: flag("fire"),
    })
}

/// Bounded per-player FIFO of validated inputs, drained once per tick
/// in arrival order.
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    frames: VecDeque<InputFrame>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::with_capacity(INPUT_QUEUE_CAP),
        }
    }

    /// Enqueue a frame, dropping the oldest entry on overflow
    pub fn push(&mut self, frame: InputFrame) {
        if self.frames.len() >= INPUT_QUEUE_CAP {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<InputFrame> {
        self.frames.pop_front()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_input() {
        let frame = validate_input(&json!({
            "type": "input", "seq": 7, "left": true, "fire": true
        }))
        .unwrap();
        assert_eq!(frame.seq, 7);
        assert!(frame.left && frame.fire);
        assert!(!frame.right && !frame.up && !frame.down);
    }

    #[test]
    fn seq_defaults_to_zero() {
        let frame = validate_input(&json!({"type": "input", "up": true})).unwrap();
        assert_eq!(frame.seq, 0);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(validate_input(&json!({"type": "input", "teleport": true})).is_none());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(validate_input(&json!({"type": "input", "left": 1})).is_none());
        assert!(validate_input(&json!({"type": "input", "seq": "high"})).is_none());
        assert!(validate_input(&json!([1, 2, 3])).is_none());
        assert!(validate_input(&json!("input")).is_none());
    }

    #[test]
    fn queue_drops_oldest_on_overflow() {
        let mut queue = InputQueue::new();
        for seq in 0..(INPUT_QUEUE_CAP as u32 + 3) {
            queue.push(InputFrame { seq, ..Default::default() });
        }
        assert_eq!(queue.len(), INPUT_QUEUE_CAP);
        // The first three were dropped; the newest survived
        assert_eq!(queue.pop().unwrap().seq, 3);
        let mut last = 0;
        while let Some(frame) = queue.pop() {
            last = frame.seq;
        }
        assert_eq!(last, INPUT_QUEUE_CAP as u32 + 2);
    }
}
