use chrono::{DateTime, Utc};
use rand::Rng;

/// Alphabet shared by user codes and booking numbers.
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const BASE: u64 = CHARSET.len() as u64;

const USER_CODE_PREFIX: &str = "PG-";
const USER_CODE_SUFFIX_LEN: usize = 4;
pub const USER_CODE_LEN: usize = 13;

pub const BOOKING_NUMBER_LEN: usize = 6;
/// Random values folded into the low digits of a booking number (36^2).
const BOOKING_RANDOM_SPACE: u64 = 1296;
/// Epoch for booking numbers: 2025-01-01T00:00:00Z.
const BOOKING_EPOCH_SECS: i64 = 1_735_689_600;

/// Attempts allowed when a generated identifier collides with a stored one.
pub const MAX_IDENTIFIER_ATTEMPTS: usize = 10;

/// Generates a user code of the form `PG-YYMMDD-XXXX`.
///
/// Collisions are possible; callers insert under a unique constraint and
/// regenerate on violation.
pub fn generate_user_code() -> String {
    user_code_at(Utc::now(), &mut rand::rng())
}

fn user_code_at<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: String = (0..USER_CODE_SUFFIX_LEN)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect();
    format!("{USER_CODE_PREFIX}{}-{suffix}", now.format("%y%m%d"))
}

pub fn is_user_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == USER_CODE_LEN
        && code.starts_with(USER_CODE_PREFIX)
        && bytes[9] == b'-'
        && bytes[3..9].iter().all(u8::is_ascii_digit)
        && bytes[10..].iter().all(|b| CHARSET.contains(b))
}

/// Generates a six character base-36 booking number.
///
/// The high digits come from the seconds elapsed since the booking epoch and
/// the two low digits are random, so numbers issued in the same second only
/// collide one time in 1296.
pub fn generate_booking_number() -> String {
    booking_number_at(Utc::now(), &mut rand::rng())
}

fn booking_number_at<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let seconds = (now.timestamp() - BOOKING_EPOCH_SECS).max(0) as u64;
    let random = rng.random_range(0..BOOKING_RANDOM_SPACE);
    let space = BASE.pow(BOOKING_NUMBER_LEN as u32);
    let combined = seconds.wrapping_mul(BOOKING_RANDOM_SPACE).wrapping_add(random) % space;
    to_base36(combined, BOOKING_NUMBER_LEN)
}

pub fn is_booking_number(number: &str) -> bool {
    number.len() == BOOKING_NUMBER_LEN && number.bytes().all(|b| CHARSET.contains(&b))
}

fn to_base36(mut value: u64, len: usize) -> String {
    let mut out = vec![CHARSET[0]; len];
    for slot in out.iter_mut().rev() {
        *slot = CHARSET[(value % BASE) as usize];
        value /= BASE;
    }
    String::from_utf8_lossy(&out).into_owned()
}
