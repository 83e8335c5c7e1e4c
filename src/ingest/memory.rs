use std::collections::VecDeque;

use anyhow::Result;

use super::FrameSource;
use crate::frame::Frame;

/// Finite source over frames already in memory.
pub struct MemorySource {
    name: String,
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            name: name.into(),
            frames: frames.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}
