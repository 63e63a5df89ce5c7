use parking_lot::Mutex;

/// Frame and error counters of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistic {
    pub received: u64,
    pub transmitted: u64,
    /// Error frames observed on the bus
    pub errors: u64,
    /// Frames dropped by buffer overrun or a full FIFO
    pub lost: u64,
}

/// Counters shared between the event path and the application.
///
/// Each update holds the lock for a single increment, so a snapshot never
/// sees half of an update and never waits longer than one.
#[derive(Debug, Default)]
pub(crate) struct StatisticCounter {
    inner: Mutex<Statistic>,
}

impl StatisticCounter {
    pub(crate) fn record_received(&self) {
        self.inner.lock().received += 1;
    }

    pub(crate) fn record_transmitted(&self) {
        self.inner.lock().transmitted += 1;
    }

    pub(crate) fn record_error(&self) {
        self.inner.lock().errors += 1;
    }

    pub(crate) fn record_lost(&self, count: u64) {
        if count > 0 {
            self.inner.lock().lost += count;
        }
    }

    pub(crate) fn snapshot(&self) -> Statistic {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_does_not_reset() {
        let counter = StatisticCounter::default();
        counter.record_received();
        counter.record_transmitted();
        counter.record_lost(3);
        counter.record_lost(0);

        let first = counter.snapshot();
        assert_eq!(
            first,
            Statistic {
                received: 1,
                transmitted: 1,
                errors: 0,
                lost: 3
            }
        );
        assert_eq!(counter.snapshot(), first);
    }
}
