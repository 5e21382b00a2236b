//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

pub const FRAME_LEN: usize = 417;

/// MPEG-1 Layer III, 128 kbit/s, 44.1 kHz, mono, all-zero payload.
pub fn silent_mp3(frames: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames * FRAME_LEN);
    for _ in 0..frames {
        let start = out.len();
        out.resize(start + FRAME_LEN, 0);
        out[start..start + 4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0xC4]);
    }
    out
}

pub fn wait_for(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}
