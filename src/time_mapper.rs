//! Frame ordinal ↔ container timestamp conversion.
//!
//! A [`TimeMapper`] holds the three rationals needed to move between a
//! stream's frame ordinals and its timestamps: the frame rate, the stream
//! time base, and the timestamp of frame 0. All arithmetic is carried out in
//! `i128` so long, high-frame-rate sources cannot overflow.

use ffmpeg_next::Rational;

/// Pure conversion between frame ordinals and timestamps for one stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeMapper {
    frame_rate: Rational,
    time_base: Rational,
    start_timestamp: i64,
}

impl TimeMapper {
    /// Build a mapper for a stream.
    ///
    /// A frame rate or time base with a zero component is replaced by `1/1`.
    pub fn new(frame_rate: Rational, time_base: Rational, start_timestamp: i64) -> Self {
        Self {
            frame_rate: sanitize(frame_rate),
            time_base: sanitize(time_base),
            start_timestamp,
        }
    }

    /// The timestamp of frame 0.
    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    /// The frame rate used for conversion.
    pub fn frame_rate(&self) -> Rational {
        self.frame_rate
    }

    /// The stream time base used for conversion.
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Timestamp at which `frame` starts.
    ///
    /// The division rounds up so the result never falls inside the
    /// previous frame's interval; [`pts_to_frame`](Self::pts_to_frame)
    /// therefore maps it back to `frame`.
    pub fn frame_to_pts(&self, frame: i64) -> i64 {
        let numerator = frame as i128
            * self.frame_rate.denominator() as i128
            * self.time_base.denominator() as i128;
        let denominator =
            self.frame_rate.numerator() as i128 * self.time_base.numerator() as i128;
        let offset = div_round_up(numerator, denominator);
        saturate(self.start_timestamp as i128 + offset)
    }

    /// Frame ordinal containing `pts`, truncated toward zero.
    pub fn pts_to_frame(&self, pts: i64) -> i64 {
        let numerator = (pts as i128 - self.start_timestamp as i128)
            * self.time_base.numerator() as i128
            * self.frame_rate.numerator() as i128;
        let denominator =
            self.time_base.denominator() as i128 * self.frame_rate.denominator() as i128;
        saturate(numerator / denominator)
    }
}

fn sanitize(rational: Rational) -> Rational {
    if rational.numerator() == 0 || rational.denominator() == 0 {
        Rational::new(1, 1)
    } else if rational.denominator() < 0 {
        Rational::new(-rational.numerator(), -rational.denominator())
    } else {
        rational
    }
}

fn div_round_up(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator != 0 && (numerator > 0) == (denominator > 0) {
        quotient + 1
    } else {
        quotient
    }
}

fn saturate(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
