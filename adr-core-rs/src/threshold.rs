//! Trigger decision for reported values

use crate::types::Evaluation;

/// Values strictly below this raise an event
pub const DEFAULT_TRIGGER_THRESHOLD: f64 = 200.0;

/// Evaluate against [`DEFAULT_TRIGGER_THRESHOLD`]
pub fn evaluate(value: f64) -> Evaluation {
    ThresholdEvaluator::default().evaluate(value)
}

/// Stateless threshold check. Callers reject non-finite values first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdEvaluator {
    threshold: f64,
}

impl ThresholdEvaluator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn evaluate(&self, value: f64) -> Evaluation {
        if value < self.threshold {
            Evaluation::Trigger
        } else {
            Evaluation::NoTrigger
        }
    }
}

impl Default for ThresholdEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        assert_eq!(evaluate(199.99), Evaluation::Trigger);
        assert_eq!(evaluate(200.0), Evaluation::NoTrigger);
        assert_eq!(evaluate(200.01), Evaluation::NoTrigger);
        assert_eq!(evaluate(-5.0), Evaluation::Trigger);
        assert_eq!(evaluate(f64::MAX), Evaluation::NoTrigger);
    }

    #[test]
    fn test_custom_threshold() {
        let evaluator = ThresholdEvaluator::new(50.0);
        assert_eq!(evaluator.evaluate(49.0), Evaluation::Trigger);
        assert_eq!(evaluator.evaluate(150.0), Evaluation::NoTrigger);
        assert_eq!(evaluator.threshold(), 50.0);
    }
}
