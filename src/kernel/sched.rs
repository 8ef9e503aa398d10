//! Scheduling policy selection.
//!
//! The dispatch discipline is fixed at build time: `sched-test`,
//! `sched-priority` or `sched-mlq` select the alternative schedulers,
//! and round-robin is the default when no feature is given. The policy
//! decides the priority a fresh process is seeded with and which
//! priorities `chpr` will accept; the dispatch loops themselves live in
//! `proc.rs`.

/// Numeric priorities run 0..=100; lower value means higher priority.
pub const PRIORITY_MAX: usize = 100;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Policy {
    /// Scan the table in slot order, run the first RUNNABLE process.
    Main,
    /// Slot-order scan that re-scans the whole table per candidate to
    /// find the best priority. Quadratic; kept for experiments only.
    Test,
    /// Strict best-priority-first with round-robin inside a priority
    /// band.
    Priority,
    /// Three queues: guaranteed-share, FIFO, round-robin. Queue
    /// membership is the `priority` field (1..=3) plus a population
    /// counter per queue.
    Mlq,
}

pub const SCHEDULER: Policy = if cfg!(feature = "sched-mlq") {
    Policy::Mlq
} else if cfg!(feature = "sched-priority") {
    Policy::Priority
} else if cfg!(feature = "sched-test") {
    Policy::Test
} else {
    Policy::Main
};

impl Policy {
    /// Priority a newly allocated process starts with.
    pub const fn default_priority(self) -> usize {
        match self {
            Policy::Main => 0,
            Policy::Test => 10,
            Policy::Priority => 60,
            Policy::Mlq => 1, // top queue
        }
    }

    /// Validate a priority passed to the chpr system call. Round-robin
    /// has no priorities to change and MLQ manages queue membership
    /// itself, so both reject the call outright.
    pub fn validate_chpr(self, priority: usize) -> Result<(), &'static str> {
        match self {
            Policy::Main => Err("cannot change priority under the round-robin scheduler"),
            Policy::Test => {
                if priority > 20 {
                    Err("priority must be between 0 and 20")
                } else {
                    Ok(())
                }
            }
            Policy::Priority => {
                if priority > PRIORITY_MAX {
                    Err("priority must be between 0 and 100")
                } else {
                    Ok(())
                }
            }
            Policy::Mlq => Err("cannot change priority under the mlq scheduler"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Policy::Main => "round-robin",
            Policy::Test => "test",
            Policy::Priority => "priority",
            Policy::Mlq => "mlq",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priorities_follow_policy() {
        assert_eq!(Policy::Main.default_priority(), 0);
        assert_eq!(Policy::Test.default_priority(), 10);
        assert_eq!(Policy::Priority.default_priority(), 60);
        assert_eq!(Policy::Mlq.default_priority(), 1);
    }

    #[test]
    fn chpr_rejected_where_membership_is_fixed() {
        assert!(Policy::Main.validate_chpr(0).is_err());
        assert!(Policy::Mlq.validate_chpr(2).is_err());
    }

    #[test]
    fn chpr_ranges() {
        assert!(Policy::Test.validate_chpr(0).is_ok());
        assert!(Policy::Test.validate_chpr(20).is_ok());
        assert!(Policy::Test.validate_chpr(21).is_err());
        assert!(Policy::Priority.validate_chpr(100).is_ok());
        assert!(Policy::Priority.validate_chpr(101).is_err());
    }
}
