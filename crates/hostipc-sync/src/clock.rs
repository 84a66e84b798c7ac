use std::time::{Duration, Instant};

/// Back off progressively while polling a shared flag or a try-lock.
///
/// Spins for the first few rounds, then yields, then sleeps 1ms per round.
pub(crate) fn adaptive_yield(round: &mut u32) {
    if *round < 4 {
        // spin
    } else if *round < 16 {
        std::hint::spin_loop();
    } else if *round < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(1));
        return;
    }
    *round += 1;
}

/// Absolute `CLOCK_REALTIME` time corresponding to `deadline`.
///
/// `pthread_mutex_timedlock` and `sem_timedwait` take wall-clock deadlines;
/// callers must re-check `deadline` against `Instant::now()` on `ETIMEDOUT`
/// since the wall clock can be stepped.
#[cfg(target_os = "linux")]
pub(crate) fn realtime_deadline(deadline: Instant) -> libc::timespec {
    const NANOS_PER_SEC: i64 = 1_000_000_000;

    let remaining = deadline.saturating_duration_since(Instant::now());
    // SAFETY: timespec is plain data; all-zero is a valid value.
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `now` is a valid, writable timespec.
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };

    let nanos = now.tv_nsec as i64 + i64::from(remaining.subsec_nanos());
    let secs = i64::try_from(remaining.as_secs())
        .unwrap_or(i64::MAX)
        .saturating_add(nanos / NANOS_PER_SEC);

    let mut abs = now;
    abs.tv_sec = (now.tv_sec as i64).saturating_add(secs) as libc::time_t;
    abs.tv_nsec = (nanos % NANOS_PER_SEC) as _;
    abs
}

/// Poll `attempt` with [`adaptive_yield`] backoff until it succeeds or
/// `deadline` passes. Returns `Ok(false)` on expiry.
pub(crate) fn poll_until<E>(
    deadline: Instant,
    mut attempt: impl FnMut() -> Result<bool, E>,
) -> Result<bool, E> {
    let mut round = 0u32;
    loop {
        if attempt()? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        adaptive_yield(&mut round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_until_gives_up_after_deadline() {
        let start = Instant::now();
        let got = poll_until::<()>(start + Duration::from_millis(30), || Ok(false)).unwrap();
        assert!(!got);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn poll_until_returns_on_success() {
        let mut calls = 0;
        let got = poll_until::<()>(Instant::now() + Duration::from_secs(5), || {
            calls += 1;
            Ok(calls == 3)
        })
        .unwrap();
        assert!(got);
        assert_eq!(calls, 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn realtime_deadline_is_normalised() {
        let ts = realtime_deadline(Instant::now() + Duration::from_millis(1500));
        assert!(ts.tv_nsec >= 0 && ts.tv_nsec < 1_000_000_000);
        assert!(ts.tv_sec > 0);
    }
}
