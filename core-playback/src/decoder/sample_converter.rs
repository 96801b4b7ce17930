//! # Sample Format Converter
//!
//! Normalizes decoded symphonia buffers to interleaved `f32`.

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::conv::IntoSample;
use symphonia::core::sample::Sample;

/// Converts decoded audio to interleaved f32 samples in [-1.0, 1.0].
///
/// Symphonia outputs planar buffers in the codec's native sample type (i16,
/// i24, f32, ...). Output buffers are always interleaved `f32` (LRLR... for
/// stereo).
pub struct SampleConverter;

impl SampleConverter {
    /// Append the frames of `buffer` to `out`, interleaved.
    ///
    /// Returns the number of frames appended.
    pub fn append_interleaved(buffer: &AudioBufferRef<'_>, out: &mut Vec<f32>) -> usize {
        match buffer {
            AudioBufferRef::F32(buf) => Self::interleave(&**buf, out, |s| s),
            AudioBufferRef::F64(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
            AudioBufferRef::S32(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
            AudioBufferRef::S24(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
            AudioBufferRef::S16(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
            AudioBufferRef::S8(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
            AudioBufferRef::U32(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
            AudioBufferRef::U24(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
            AudioBufferRef::U16(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
            AudioBufferRef::U8(buf) => Self::interleave(&**buf, out, |s| s.into_sample()),
        }
    }

    fn interleave<T>(buf: &AudioBuffer<T>, out: &mut Vec<f32>, convert: fn(T) -> f32) -> usize
    where
        T: Sample + Copy,
    {
        let channels = buf.spec().channels.count();
        let frames = buf.frames();
        out.reserve(frames * channels);

        for frame in 0..frames {
            for channel in 0..channels {
                out.push(convert(buf.chan(channel)[frame]));
            }
        }

        frames
    }
}
