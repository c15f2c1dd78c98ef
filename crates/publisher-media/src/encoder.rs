//! Encoder descriptors attached to media packets.

use bytes::Bytes;

/// A rational number, used for timebases and frame rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    /// One millisecond per tick.
    pub const MILLIS: Rational = Rational::new(1, 1000);

    /// Create a new rational.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// A zeroed rational (as found on a freshly created packet) is not usable.
    pub fn is_valid(self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Convert `value` expressed in `self` ticks into `target` ticks.
    ///
    /// An invalid source or target timebase returns `value` unchanged. Results
    /// outside the `i64` range saturate.
    pub fn rescale(self, value: i64, target: Rational) -> i64 {
        if !self.is_valid() || !target.is_valid() {
            return value;
        }
        let numerator = value as i128 * self.num as i128 * target.den as i128;
        let denominator = self.den as i128 * target.num as i128;
        let scaled = numerator / denominator;
        i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN } else { i64::MAX })
    }

    /// Floating point value, zero when the denominator is zero.
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

/// Video codecs the publisher understands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoCodec {
    #[default]
    H264,
}

/// Audio codecs the publisher understands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AudioCodec {
    #[default]
    Aac,
}

/// Describes the encoder that produced a video packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoEncoderInfo {
    /// Codec of the payload.
    pub codec: VideoCodec,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Frames per second.
    pub framerate: Rational,

    /// Unit of `pts` and `dts`.
    pub timebase: Rational,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Codec configuration (SPS/PPS in Annex B form for H.264), may be empty.
    pub extradata: Bytes,
}

/// Describes the encoder that produced an audio packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioEncoderInfo {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
    pub timebase: Rational,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_90khz_to_millis() {
        let timebase = Rational::new(1, 90_000);
        assert_eq!(timebase.rescale(90_000, Rational::MILLIS), 1000);
        assert_eq!(timebase.rescale(3000, Rational::MILLIS), 33);
    }

    #[test]
    fn test_rescale_invalid_timebase_passes_through() {
        assert_eq!(Rational::default().rescale(42, Rational::MILLIS), 42);
        assert_eq!(Rational::MILLIS.rescale(42, Rational::new(0, 1)), 42);
    }

    #[test]
    fn test_rescale_negative_values() {
        let timebase = Rational::new(1, 90);
        assert_eq!(timebase.rescale(-90, Rational::MILLIS), -1000);
    }

    #[test]
    fn test_rescale_saturates() {
        let timebase = Rational::new(1_000_000, 1);
        assert_eq!(timebase.rescale(i64::MAX, Rational::MILLIS), i64::MAX);
        assert_eq!(timebase.rescale(i64::MIN, Rational::MILLIS), i64::MIN);
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Rational::new(30, 1).as_f64(), 30.0);
        assert_eq!(Rational::new(1, 0).as_f64(), 0.0);
    }
}
