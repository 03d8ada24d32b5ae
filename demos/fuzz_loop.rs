//! A toy fuzzing loop. Built with `interpose`, so every `malloc()` in this
//! process (ours, std's, the "target"'s) lands in `libafl_alloc_map`.
//!
//! `RUST_LOG=info cargo run --example fuzz_loop --features interpose`

use std::hint::black_box;

use allocmap::{
    externc::allocmap_map_reset,
    harness::{AnomalyPolicy, MapSnapshot, SizeFeedback},
    ALLOC_SIZE_MAP,
};
use log::{info, warn};

/// Something with a length field it trusts a little too much.
#[inline(never)]
fn target(input: &[u8]) {
    let Some((&len, body)) = input.split_first() else {
        return;
    };
    // scaled header length, the bug we want to see
    let claimed = (len as usize) << 16;
    // SAFETY: plain libc calls on a block we own
    unsafe {
        let buf = libc::malloc(claimed.max(body.len())) as *mut u8;
        if !buf.is_null() {
            buf.copy_from_nonoverlapping(body.as_ptr(), body.len());
            black_box(buf);
            libc::free(buf as _);
        }
    }
}

fn main() {
    env_logger::init();

    let inputs: [&[u8]; 4] = [b"\x00hello", b"\x01hi", b"\x00world", b"\xffboom"];

    allocmap_map_reset();
    target(black_box(inputs[0]));
    let baseline = MapSnapshot::capture(&ALLOC_SIZE_MAP);
    info!("baseline has {} non-empty slots", baseline.len());

    let mut feedback = SizeFeedback::new();
    feedback.commit(&baseline);
    let policy = AnomalyPolicy::default();

    for input in inputs {
        allocmap_map_reset();
        target(black_box(input));
        let run = MapSnapshot::capture(&ALLOC_SIZE_MAP);

        if feedback.is_interesting(&run) {
            info!("{:?} is interesting", String::from_utf8_lossy(input));
            feedback.commit(&run);
        }
        for anomaly in run.anomalies(&baseline, &policy) {
            warn!(
                "{:?}: slot {:#x} asked for {} bytes (baseline {})",
                String::from_utf8_lossy(input),
                anomaly.index,
                anomaly.observed,
                anomaly.baseline
            );
        }
    }
}
