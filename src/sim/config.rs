//! Machine configuration

use crate::sys::memlayout::NENV;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Usable env table slots (at most `NENV`)
    pub max_envs:   usize,
    /// Physical frames, page-table frames included
    pub max_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_envs:   NENV,
            max_frames: 16 * 1024, // 64 MB
        }
    }
}

impl Config {
    pub fn with_max_envs(mut self, n: usize) -> Self {
        self.max_envs = n.min(NENV);
        self
    }

    pub fn with_max_frames(mut self, n: usize) -> Self {
        self.max_frames = n;
        self
    }
}
