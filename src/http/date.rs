//! RFC 7231 IMF-fixdate formatting for the automatic `Date` response header.
//!
//! No date/time crate is in the dependency stack, so this computes the
//! civil calendar fields directly from a Unix timestamp using the
//! days-from-epoch algorithm described by Howard Hinnant's `chrono`-adjacent
//! `civil_from_days` routine; leap seconds are not modeled (neither is HTTP).

use std::sync::{OnceLock, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const WEEKDAYS: [&[u8; 3]; 7] = [b"Thu", b"Fri", b"Sat", b"Sun", b"Mon", b"Tue", b"Wed"];
const MONTHS: [&[u8; 3]; 12] = [
    b"Jan", b"Feb", b"Mar", b"Apr", b"May", b"Jun", b"Jul", b"Aug", b"Sep", b"Oct", b"Nov", b"Dec",
];

/// Formats `now` as `"Sun, 06 Nov 1994 08:49:37 GMT"` (always 29 bytes).
#[inline]
pub(crate) fn imf_fixdate(now: SystemTime) -> [u8; 29] {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let days = secs.div_euclid(86_400);
    let day_secs = secs.rem_euclid(86_400);
    let (hour, minute, second) = (day_secs / 3600, (day_secs / 60) % 60, day_secs % 60);
    let (year, month, day) = civil_from_days(days);

    let mut out = [0u8; 29];
    out[0..3].copy_from_slice(WEEKDAYS[(days.rem_euclid(7)) as usize]);
    out[3..5].copy_from_slice(b", ");
    write_2digit(&mut out[5..7], day as u32);
    out[7] = b' ';
    out[8..11].copy_from_slice(MONTHS[(month - 1) as usize]);
    out[11] = b' ';
    write_4digit(&mut out[12..16], year);
    out[16] = b' ';
    write_2digit(&mut out[17..19], hour as u32);
    out[19] = b':';
    write_2digit(&mut out[20..22], minute as u32);
    out[22] = b':';
    write_2digit(&mut out[23..25], second as u32);
    out[25..29].copy_from_slice(b" GMT");

    out
}

#[inline]
fn write_2digit(dst: &mut [u8], value: u32) {
    dst[0] = b'0' + (value / 10) as u8;
    dst[1] = b'0' + (value % 10) as u8;
}

#[inline]
fn write_4digit(dst: &mut [u8], value: i64) {
    let value = value.clamp(0, 9999) as u32;
    dst[0] = b'0' + (value / 1000) as u8;
    dst[1] = b'0' + (value / 100 % 10) as u8;
    dst[2] = b'0' + (value / 10 % 10) as u8;
    dst[3] = b'0' + (value % 10) as u8;
}

static CACHE: OnceLock<RwLock<[u8; 29]>> = OnceLock::new();

/// Returns the cached `Date` header value, refreshed once per second by
/// [`spawn_refresher`]. Formatting on every response would cost a syscall and
/// a civil-calendar computation per request for a value that only changes
/// once a second.
#[inline]
pub(crate) fn cached() -> [u8; 29] {
    *CACHE
        .get_or_init(|| RwLock::new(imf_fixdate(SystemTime::now())))
        .read()
        .unwrap()
}

/// Spawns the background tick that keeps [`cached`] fresh. Call once at
/// server startup; the task runs for the lifetime of the runtime.
pub(crate) fn spawn_refresher() {
    CACHE.get_or_init(|| RwLock::new(imf_fixdate(SystemTime::now())));
    tokio::spawn(async {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            let fresh = imf_fixdate(SystemTime::now());
            if let Some(lock) = CACHE.get() {
                *lock.write().unwrap() = fresh;
            }
        }
    });
}

/// Days-since-epoch to (year, month, day), 1-indexed month/day.
#[inline]
fn civil_from_days(z: i64) -> (i64, i64, i64) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };

    (if m <= 2 { y + 1 } else { y }, m, d)
}
