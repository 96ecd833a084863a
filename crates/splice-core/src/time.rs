//! Time arithmetic shared by the demuxer, decode cursor, and encoders.
//!
//! Every timestamp that crosses a codec boundary is an `i64` count of
//! microseconds; container tables use integer ticks of a track timescale.

/// Microseconds per second.
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Convert container ticks to microseconds: `ticks / timescale * 1e6`,
/// rounded to the nearest microsecond.
pub fn ticks_to_micros(ticks: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    let num = (ticks as i128) * (MICROS_PER_SECOND as i128);
    let den = timescale as i128;
    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded as i64
}

/// Convert microseconds to ticks of `timescale`, rounded to nearest.
pub fn micros_to_ticks(micros: i64, timescale: u32) -> i64 {
    let num = (micros as i128) * (timescale as i128);
    let den = MICROS_PER_SECOND as i128;
    let rounded = if num >= 0 {
        (num + den / 2) / den
    } else {
        (num - den / 2) / den
    };
    rounded as i64
}

/// Convert seconds to whole microseconds.
pub fn seconds_to_micros(seconds: f64) -> i64 {
    (seconds * MICROS_PER_SECOND as f64).round() as i64
}

pub fn micros_to_seconds(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SECOND as f64
}

/// Per-frame timestamp step: `round(1e6 / fps)`.
pub fn frame_duration_micros(fps: f64) -> i64 {
    (MICROS_PER_SECOND as f64 / fps).round() as i64
}

/// Number of output frames for a duration: `max(1, ceil(duration * fps))`.
/// Products within rounding error of an integer are not rounded up.
pub fn frame_count(duration_secs: f64, fps: f64) -> u64 {
    let frames = (duration_secs * fps - 1e-9).ceil();
    if frames.is_finite() && frames >= 1.0 {
        frames as u64
    } else {
        1
    }
}
