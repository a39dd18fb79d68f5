//! Shared framing for the frame-windowed feature families.
//! The final incomplete frame is always dropped — no zero-padding.

/// Hann window of the given size.
pub(crate) fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()
        })
        .collect()
}

/// Number of complete frames for the given signal length.
pub(crate) fn frame_count(len: usize, frame_size: usize, hop: usize) -> usize {
    if len < frame_size {
        0
    } else {
        1 + (len - frame_size) / hop
    }
}

/// Iterate complete frames of `samples`.
pub(crate) fn frames(
    samples: &[f32],
    frame_size: usize,
    hop: usize,
) -> impl Iterator<Item = &[f32]> {
    let n = frame_count(samples.len(), frame_size, hop);
    (0..n).map(move |i| &samples[i * hop..i * hop + frame_size])
}

/// Multiply a frame by the window into `out` (reused across frames).
pub(crate) fn apply_window(frame: &[f32], window: &[f32], out: &mut Vec<f32>) {
    out.clear();
    out.extend(frame.iter().zip(window).map(|(x, w)| x * w));
}
