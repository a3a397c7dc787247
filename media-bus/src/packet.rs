use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// A rational number used as a time base (seconds per tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i32,
    den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn numerator(&self) -> i32 {
        self.num
    }

    pub fn denominator(&self) -> i32 {
        self.den
    }

    pub fn invert(&self) -> Self {
        Self::new(self.den, self.num)
    }

    /// Converts `value` expressed in `self` ticks into `to` ticks, rounding to
    /// the nearest tick with halves away from zero.
    pub fn rescale(&self, value: i64, to: Rational) -> i64 {
        let b = self.num as i128 * to.den as i128;
        let c = self.den as i128 * to.num as i128;
        if c == 0 {
            return value;
        }
        let (b, c) = if c < 0 { (-b, -c) } else { (b, c) };
        let r = value as i128 * b;
        let half = c / 2;
        let scaled = if r >= 0 {
            (r + half) / c
        } else {
            -((-r + half) / c)
        };
        scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<Rational> for ffmpeg_next::Rational {
    fn from(value: Rational) -> Self {
        ffmpeg_next::Rational::new(value.num, value.den)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Rational> for Rational {
    fn from(value: ffmpeg_next::Rational) -> Self {
        Rational::new(value.numerator(), value.denominator())
    }
}

/// One unit of codec output: compressed bytes plus timestamps in `time_base`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub is_key: bool,
    pub time_base: Rational,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, time_base: Rational) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            duration: 0,
            is_key: false,
            time_base,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rewrites pts, dts and duration into `to` and adopts it as the time base.
    pub fn rescale_ts(&mut self, to: Rational) {
        let from = self.time_base;
        if from == to {
            return;
        }
        self.pts = self.pts.map(|v| from.rescale(v, to));
        self.dts = self.dts.map(|v| from.rescale(v, to));
        self.duration = from.rescale(self.duration, to);
        self.time_base = to;
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet size: {}, pts: {:?}, dts: {:?}, duration: {}, key: {}, time_base: {}",
            self.data.len(),
            self.pts,
            self.dts,
            self.duration,
            self.is_key,
            self.time_base
        )
    }
}
