use log::Level;
use std::time::{Duration, Instant};

/// Wall time of one connectivity pass, reported at `level` once the pass goes out of scope
pub(crate) struct Timed {
    pass: &'static str,
    level: Level,
    start: Instant,
}

impl Timed {
    pub(crate) fn new(level: Level, pass: &'static str) -> Self {
        Self {
            pass,
            level,
            start: Instant::now(),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timed {
    fn drop(&mut self) {
        if log::log_enabled!(self.level) {
            log::log!(self.level, "{} took {:.3}s", self.pass, self.elapsed().as_secs_f64());
        }
    }
}

/// Check if a small slice holds the same value twice
pub(crate) fn has_duplicates<T>(values: &[T]) -> bool
where
    T: PartialEq,
{
    for (i, val) in values.iter().enumerate() {
        for val_cmp in values.iter().skip(i + 1) {
            if val == val_cmp {
                return true;
            }
        }
    }
    false
}
