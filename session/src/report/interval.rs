use rand::Rng;

/// Minimum control interval for the plain audio-video profile, seconds.
pub const RTCP_MIN_INTERVAL_SECONDS: f64 = 5.0;
/// Compensation for the fact that the randomized timer reconsideration
/// converges below the intended average: e - 3/2.
pub const RTCP_INTERVAL_COMPENSATION: f64 = 1.21828;

fn rand_factor() -> f64 {
    rand::thread_rng().gen_range(0.5..1.5)
}

/// The deterministic reporting interval (RFC 3550 6.3.1), before any
/// minimum is applied.
///
/// `avg_rtcp_size` is the smoothed compound size in octets; `rtcp_bw` is
/// the control-traffic budget in octets per second. When senders are fewer
/// than a quarter of the membership they share a quarter of the budget and
/// receivers the rest; otherwise everyone shares it equally.
pub fn deterministic_interval_seconds(
    is_sender: bool,
    senders: u32,
    members: u32,
    avg_rtcp_size: f64,
    rtcp_bw: f64,
) -> f64 {
    if rtcp_bw <= 0.0 || members == 0 {
        return RTCP_MIN_INTERVAL_SECONDS;
    }

    let mut n = members as f64;
    let mut bw = rtcp_bw;
    if senders > 0 && (senders as f64) < members as f64 * 0.25 {
        if is_sender {
            bw *= 0.25;
            n = senders as f64;
        } else {
            bw *= 0.75;
            n -= senders as f64;
        }
    }

    n * avg_rtcp_size / bw
}

/// The randomized transmission interval for the plain audio-video profile
/// (RFC 3550 6.3.1 / A.7). The reduced minimum (RFC 3550 6.2) replaces the
/// 5 second floor with 360 / bandwidth-in-kbps; the first interval halves
/// the floor.
pub fn rtcp_interval_seconds(
    is_sender: bool,
    senders: u32,
    members: u32,
    avg_rtcp_size: f64,
    session_bandwidth_kbps: u32,
    use_reduced_minimum: bool,
    initial: bool,
    randomize: bool,
) -> f64 {
    // the standard 5% control share, converted to octets per second
    let rtcp_bw = session_bandwidth_kbps as f64 * 6.25;
    let t_d = deterministic_interval_seconds(is_sender, senders, members, avg_rtcp_size, rtcp_bw);

    let mut min = if use_reduced_minimum {
        360.0 / session_bandwidth_kbps as f64
    } else {
        RTCP_MIN_INTERVAL_SECONDS
    };
    if initial {
        min /= 2.0;
    }

    let mut t = t_d.max(min);
    if randomize {
        t = t * rand_factor() / RTCP_INTERVAL_COMPENSATION;
    }
    t
}

/// The randomized transmission interval for the feedback profile
/// (RFC 4585). The 5 second floor does not apply; the effective minimum is
/// the reduced one, and a point-to-point session's first interval is
/// clamped up to one second.
pub fn feedback_interval_seconds(
    is_sender: bool,
    senders: u32,
    members: u32,
    avg_rtcp_size: f64,
    session_bandwidth_kbps: u32,
    initial: bool,
    point_to_point: bool,
    randomize: bool,
) -> f64 {
    let rtcp_bw = session_bandwidth_kbps as f64 * 6.25;
    let mut t =
        deterministic_interval_seconds(is_sender, senders, members, avg_rtcp_size, rtcp_bw);

    let reduced_min = 360.0 / session_bandwidth_kbps as f64;
    if t < reduced_min {
        t = reduced_min;
    }

    if initial && point_to_point && t < 1.0 {
        t = 1.0;
    }

    if randomize {
        t = t * rand_factor() / RTCP_INTERVAL_COMPENSATION;
    }
    t
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_deterministic_interval_shares_bandwidth() {
        // no sender bias: n * avg / bw
        let t = deterministic_interval_seconds(false, 0, 10, 128.0, 3200.0);
        assert!((t - 10.0 * 128.0 / 3200.0).abs() < 1e-9);

        // few senders: a sender reports out of a quarter of the budget
        let t_sender = deterministic_interval_seconds(true, 2, 100, 128.0, 3200.0);
        assert!((t_sender - 2.0 * 128.0 / 800.0).abs() < 1e-9);

        // and a receiver out of the remaining three quarters
        let t_receiver = deterministic_interval_seconds(false, 2, 100, 128.0, 3200.0);
        assert!((t_receiver - 98.0 * 128.0 / 2400.0).abs() < 1e-9);
    }

    #[test]
    fn test_av_profile_floor_applies() {
        // tiny session: the deterministic interval collapses, the floor holds
        let t = rtcp_interval_seconds(false, 1, 2, 128.0, 512, false, false, false);
        assert!((t - RTCP_MIN_INTERVAL_SECONDS).abs() < 1e-9);

        // initial packets halve the floor
        let t = rtcp_interval_seconds(false, 1, 2, 128.0, 512, false, true, false);
        assert!((t - RTCP_MIN_INTERVAL_SECONDS / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reduced_minimum() {
        let t = rtcp_interval_seconds(false, 1, 2, 128.0, 500, true, false, false);
        assert!((t - 360.0 / 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_feedback_profile_minimum() {
        // 500 kbit/s: minimum is 360/500 = 0.72 s once past the first report
        let t = feedback_interval_seconds(false, 1, 2, 128.0, 500, false, true, false);
        assert!((t - 0.72).abs() < 1e-9);

        // first interval of a point-to-point session is clamped to 1 s
        let t = feedback_interval_seconds(false, 1, 2, 128.0, 500, true, true, false);
        assert!((t - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_randomized_interval_stays_in_band() {
        for _ in 0..200 {
            let t = rtcp_interval_seconds(false, 1, 2, 128.0, 512, false, false, true);
            let t_d = RTCP_MIN_INTERVAL_SECONDS;
            assert!(t >= 0.5 * t_d / RTCP_INTERVAL_COMPENSATION - 1e-9);
            assert!(t <= 1.5 * t_d / RTCP_INTERVAL_COMPENSATION + 1e-9);
        }
    }

    #[test]
    fn test_feedback_initial_band() {
        // with the 1 s clamp the first randomized interval lands in
        // [0.5, 1.5] / compensation
        for _ in 0..200 {
            let t = feedback_interval_seconds(false, 1, 2, 128.0, 500, true, true, true);
            assert!(t >= 0.5 / RTCP_INTERVAL_COMPENSATION - 1e-9);
            assert!(t <= 1.5 / RTCP_INTERVAL_COMPENSATION + 1e-9);
        }
    }
}
