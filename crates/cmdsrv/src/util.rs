use std::any::Any;

use rand::Rng;
use rand::distr::Alphabetic;

/// Random ASCII-letter string of length `n`.
pub(crate) fn random_string(n: usize) -> String {
    rand::rng()
        .sample_iter(&Alphabetic)
        .take(n)
        .map(char::from)
        .collect()
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| (*s).to_owned()))
        .unwrap_or_else(|| "unknown panic".to_owned())
}
