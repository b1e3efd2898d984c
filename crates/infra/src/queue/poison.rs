//! What to do with a message once its execution has finished.

/// Suffix appended to a queue name to form its poison queue.
pub const POISON_QUEUE_SUFFIX: &str = "-poison";

/// Poison queue name for `queue`.
pub fn poison_queue_name(queue: &str) -> String {
    format!("{queue}{POISON_QUEUE_SUFFIX}")
}

/// Outcome of processing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; remove it.
    Delete,
    /// Failed too often; copy the body to the poison queue, then remove it.
    Quarantine,
    /// Failed; make it visible again for another attempt.
    Release,
    /// Failed and there is nowhere to quarantine it; let the claim lapse.
    Leave,
}

/// Retry threshold for failed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoisonPolicy {
    max_dequeue_count: u32,
}

impl PoisonPolicy {
    pub fn new(max_dequeue_count: u32) -> Self {
        Self { max_dequeue_count }
    }

    pub fn max_dequeue_count(&self) -> u32 {
        self.max_dequeue_count
    }

    pub fn disposition(
        &self,
        succeeded: bool,
        dequeue_count: u32,
        has_poison_queue: bool,
    ) -> Disposition {
        match (succeeded, has_poison_queue) {
            (true, _) => Disposition::Delete,
            (false, false) => Disposition::Leave,
            (false, true) if dequeue_count >= self.max_dequeue_count => Disposition::Quarantine,
            (false, true) => Disposition::Release,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn poison_queue_is_named_after_the_primary() {
        assert_eq!(poison_queue_name("orders"), "orders-poison");
    }

    #[test]
    fn threshold_is_inclusive() {
        let policy = PoisonPolicy::new(5);
        assert_eq!(policy.disposition(false, 4, true), Disposition::Release);
        assert_eq!(policy.disposition(false, 5, true), Disposition::Quarantine);
        assert_eq!(policy.disposition(false, 6, true), Disposition::Quarantine);
    }

    #[test]
    fn without_a_poison_queue_failures_are_left_alone() {
        let policy = PoisonPolicy::new(1);
        assert_eq!(policy.disposition(false, 1, false), Disposition::Leave);
        assert_eq!(policy.disposition(false, 100, false), Disposition::Leave);
    }

    proptest! {
        #[test]
        fn successes_are_always_deleted(count in 0u32..1000, threshold in 1u32..50, poison: bool) {
            let policy = PoisonPolicy::new(threshold);
            prop_assert_eq!(policy.disposition(true, count, poison), Disposition::Delete);
        }

        #[test]
        fn failures_quarantine_exactly_at_or_above_the_threshold(
            count in 0u32..1000,
            threshold in 1u32..50,
        ) {
            let policy = PoisonPolicy::new(threshold);
            let disposition = policy.disposition(false, count, true);
            prop_assert_eq!(disposition == Disposition::Quarantine, count >= threshold);
            prop_assert_ne!(disposition, Disposition::Leave);
        }
    }
}
