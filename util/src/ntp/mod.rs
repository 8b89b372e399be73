
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Offset in seconds between the NTP epoch (1900-01-01) and the POSIX epoch
/// (1970-01-01).
pub const NTP_SECONDS_OFFSET: u64 = 2_208_988_800;

/// A 64-bit network timestamp: the upper 32 bits count whole seconds since
/// 1900-01-01 UTC, the lower 32 bits are the binary fraction of a second.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NtpTime(u64);

impl NtpTime {
    pub fn new(value: u64) -> Self {
        NtpTime(value)
    }

    /// Joins the two 32-bit wire halves.
    pub fn from_parts(seconds: u32, fraction: u32) -> Self {
        NtpTime((seconds as u64) << 32 | fraction as u64)
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn seconds(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn fraction(&self) -> u32 {
        self.0 as u32
    }

    /// Splits into the two 32-bit wire halves.
    pub fn split(&self) -> (u32, u32) {
        (self.seconds(), self.fraction())
    }

    /// The "middle 32 bits" form echoed in report blocks: low 16 bits of the
    /// seconds and high 16 bits of the fraction.
    pub fn middle_32(&self) -> u32 {
        (self.0 >> 16) as u32
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds() as f64 + self.fraction() as f64 / (1u64 << 32) as f64
    }

    /// Duration since another timestamp, zero if `earlier` is not earlier.
    pub fn duration_since(&self, earlier: NtpTime) -> Duration {
        if self.0 <= earlier.0 {
            return Duration::from_secs(0);
        }
        let diff = self.0 - earlier.0;
        let secs = diff >> 32;
        let nanos = ((diff & 0xFFFF_FFFF) * 1_000_000_000) >> 32;
        Duration::new(secs, nanos as u32)
    }
}

impl From<SystemTime> for NtpTime {
    fn from(st: SystemTime) -> Self {
        let u = st
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_nanos() as u64;
        let mut s = u / 1_000_000_000;
        s += NTP_SECONDS_OFFSET;
        let mut f = u % 1_000_000_000;
        f <<= 32;
        f /= 1_000_000_000;
        s <<= 32;

        NtpTime(s | f)
    }
}

impl From<NtpTime> for SystemTime {
    fn from(t: NtpTime) -> Self {
        let mut s = t.0 >> 32;
        let mut f = t.0 & 0xFFFF_FFFF;
        f *= 1_000_000_000;
        f >>= 32;
        s = s.saturating_sub(NTP_SECONDS_OFFSET);
        let u = s * 1_000_000_000 + f;

        UNIX_EPOCH
            .checked_add(Duration::new(u / 1_000_000_000, (u % 1_000_000_000) as u32))
            .unwrap_or(UNIX_EPOCH)
    }
}

impl Add<Duration> for NtpTime {
    type Output = NtpTime;

    fn add(self, rhs: Duration) -> NtpTime {
        let secs = (rhs.as_secs() as u64) << 32;
        let frac = ((rhs.subsec_nanos() as u64) << 32) / 1_000_000_000;
        NtpTime(self.0.wrapping_add(secs | frac))
    }
}

impl Sub<NtpTime> for NtpTime {
    type Output = Duration;

    fn sub(self, rhs: NtpTime) -> Duration {
        self.duration_since(rhs)
    }
}

/// Converts media-clock ticks to wall time at the given clock rate.
pub fn ticks_to_duration(ticks: u32, clock_rate: u32) -> Duration {
    if clock_rate == 0 {
        return Duration::from_secs(0);
    }
    let nanos = (ticks as u64) * 1_000_000_000 / clock_rate as u64;
    Duration::new(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
}

/// Converts wall time to media-clock ticks at the given clock rate. The
/// result wraps modulo 2^32 like the on-wire media timestamp.
pub fn duration_to_ticks(d: Duration, clock_rate: u32) -> u32 {
    (d.as_nanos() as u64 * clock_rate as u64 / 1_000_000_000) as u32
}

/// Modular "within window" comparison of two 32-bit media timestamps:
/// true when `a` is newer than `b` under wrap-around, i.e. the signed
/// distance from `b` to `a` is positive.
pub fn timestamp_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < (1 << 31)
}

/// Modular comparison of two 16-bit sequence numbers: true when `a` is
/// ahead of `b` under wrap-around.
pub fn seq_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < (1 << 15)
}
