use std::time::SystemTime;

/// Current unix time in microseconds (the packet timestamp resolution).
#[inline]
pub fn timestamp_micros() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System clock before the unix epoch")
        .as_micros() as i64
}

/// Current unix time in whole seconds.
#[inline]
pub fn timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System clock before the unix epoch")
        .as_secs() as i64
}
