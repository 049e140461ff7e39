//! Sample layout and channel conversion.

/// Decodes little-endian S16 bytes into samples.
///
/// A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encodes samples as little-endian S16 bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Splits interleaved samples into one buffer per channel.
///
/// Incomplete trailing frames are dropped.
pub fn deinterleave(samples: &[i16], channels: u16) -> Vec<Vec<i16>> {
    let channels = channels.max(1) as usize;
    let frames = samples.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(sample);
        }
    }
    planes
}

/// Joins per-channel buffers into interleaved samples.
///
/// The shortest plane determines the frame count.
pub fn interleave(planes: &[Vec<i16>]) -> Vec<i16> {
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            out.push(plane[i]);
        }
    }
    out
}

/// Maps planar audio onto a different channel count.
///
/// - Same count: unchanged
/// - Down to mono: average of all channels
/// - Up from mono: the channel is duplicated
/// - Otherwise: channels are taken in order, the last one repeated to fill
pub fn remap_channels(planes: Vec<Vec<i16>>, channels: u16) -> Vec<Vec<i16>> {
    let target = channels as usize;
    if planes.len() == target || planes.is_empty() {
        return planes;
    }

    if target == 1 {
        let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
        let count = planes.len() as i32;
        let mono = (0..frames)
            .map(|i| {
                // i32 keeps the sum from overflowing
                let sum: i32 = planes.iter().map(|p| i32::from(p[i])).sum();
                (sum / count) as i16
            })
            .collect();
        return vec![mono];
    }

    let mut out = Vec::with_capacity(target);
    for ch in 0..target {
        let source = ch.min(planes.len() - 1);
        out.push(planes[source].clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_samples_little_endian() {
        let bytes = samples_to_bytes(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xfe, 0xff, 0x34, 0x12]);
        assert_eq!(bytes_to_samples(&bytes), vec![1, -2, 0x1234]);
    }

    #[test]
    fn test_bytes_to_samples_ignores_odd_byte() {
        assert_eq!(bytes_to_samples(&[0x10, 0x00, 0x7f]), vec![16]);
    }

    #[test]
    fn test_deinterleave_stereo() {
        let planes = deinterleave(&[1, 10, 2, 20, 3, 30], 2);
        assert_eq!(planes, vec![vec![1, 2, 3], vec![10, 20, 30]]);
    }

    #[test]
    fn test_deinterleave_drops_partial_frame() {
        let planes = deinterleave(&[1, 10, 2], 2);
        assert_eq!(planes, vec![vec![1], vec![10]]);
    }

    #[test]
    fn test_interleave_uses_shortest_plane() {
        let samples = interleave(&[vec![1, 2, 3], vec![10, 20]]);
        assert_eq!(samples, vec![1, 10, 2, 20]);
    }

    #[test]
    fn test_remap_stereo_to_mono_averages() {
        let mono = remap_channels(vec![vec![100, 1000], vec![200, -1000]], 1);
        assert_eq!(mono, vec![vec![150, 0]]);
    }

    #[test]
    fn test_remap_stereo_to_mono_no_overflow() {
        let mono = remap_channels(vec![vec![i16::MAX], vec![i16::MAX]], 1);
        assert_eq!(mono, vec![vec![i16::MAX]]);
    }

    #[test]
    fn test_remap_mono_to_stereo_duplicates() {
        let stereo = remap_channels(vec![vec![5, 6]], 2);
        assert_eq!(stereo, vec![vec![5, 6], vec![5, 6]]);
    }

    #[test]
    fn test_remap_stereo_to_quad_repeats_last() {
        let quad = remap_channels(vec![vec![1], vec![2]], 4);
        assert_eq!(quad, vec![vec![1], vec![2], vec![2], vec![2]]);
    }
}
