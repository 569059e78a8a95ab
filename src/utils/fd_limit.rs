//! File descriptor limit detection for capping concurrent read/write sessions (Unix).

use log::debug;

use crate::utils::config::PoolCaps;

/// File descriptors held by one open session (the file itself plus headroom for dirs/pipes).
pub const FDS_PER_SESSION: usize = 2;

/// Fraction of the process FD limit to use (leave headroom for other code).
const FD_LIMIT_FRACTION: f64 = 0.8;

/// Returns the soft limit for max open file descriptors, or `None` if unavailable (e.g. Windows).
#[cfg(unix)]
pub fn max_open_fds() -> Option<u64> {
    use std::mem::MaybeUninit;
    let mut rlim = MaybeUninit::<libc::rlimit>::uninit();
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, rlim.as_mut_ptr()) } != 0 {
        return None;
    }
    let rlim = unsafe { rlim.assume_init() };
    let cur = rlim.rlim_cur;
    // RLIM_INFINITY is typically !0 or u64::MAX; treat as "no practical limit"
    if cur == libc::RLIM_INFINITY || cur > i64::MAX as u64 {
        return None;
    }
    Some(cur as u64)
}

#[cfg(not(unix))]
pub fn max_open_fds() -> Option<u64> {
    None
}

/// Max sessions (reads + writes) that fit under ~80% of the FD limit.
/// Returns `None` if no limit is available.
pub fn max_sessions_by_fd_limit() -> Option<usize> {
    let limit = max_open_fds()?;
    let usable = (limit as f64 * FD_LIMIT_FRACTION) as usize;
    if usable < FDS_PER_SESSION * 2 {
        return Some(2);
    }
    Some(usable / FDS_PER_SESSION)
}

/// Shrink read and write caps proportionally when their sum would exceed `budget` sessions.
pub fn clamp_caps_to_budget(caps: PoolCaps, budget: usize) -> PoolCaps {
    let caps = caps.normalized();
    let wanted = caps.reads + caps.writes;
    if wanted <= budget {
        return caps;
    }
    let reads = ((caps.reads * budget) / wanted).max(1);
    let writes = budget.saturating_sub(reads).max(1);
    debug!(
        "Capping sessions reads {} -> {}, writes {} -> {} (FD limit ~80%)",
        caps.reads, reads, caps.writes, writes
    );
    PoolCaps {
        reads,
        writes,
        ..caps
    }
}

/// Apply the process FD limit (if any) to `caps`.
pub fn clamp_caps_to_fd_limit(caps: PoolCaps) -> PoolCaps {
    match max_sessions_by_fd_limit() {
        Some(budget) => clamp_caps_to_budget(caps, budget),
        None => caps.normalized(),
    }
}
