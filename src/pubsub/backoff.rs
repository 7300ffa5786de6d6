use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Стратегия случайного разброса задержки.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterPolicy {
    /// Задержка без изменений.
    #[default]
    None,
    /// Случайное значение в `[0, delay]`.
    Full,
    /// `delay / 2` плюс случайное значение в `[0, delay / 2]`.
    Equal,
}

impl JitterPolicy {
    pub fn apply(
        &self,
        delay: Duration,
    ) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return delay;
        }
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rand::thread_rng().gen_range(0..=ms)),
            Self::Equal => {
                let half = ms / 2;
                let jitter = if half == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=half)
                };
                Duration::from_millis(half + jitter)
            }
        }
    }
}

/// Экспоненциальная задержка перед обработкой следующего сообщения после
/// сбоя обработчика.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(10),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Задержка для попытки `attempt` (с нуля), не больше `max`.
    pub fn next(
        &self,
        attempt: u32,
    ) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

/// Политика супервизора воркера: пауза после сбоя и предел сбоев подряд.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultPolicy {
    pub backoff: BackoffPolicy,
    /// После стольких сбоев подряд воркер завершается. `None` — без предела.
    pub max_consecutive_faults: Option<u32>,
}

impl FaultPolicy {
    /// Пауза после `consecutive`-го сбоя подряд (с единицы).
    pub fn delay_after(
        &self,
        consecutive: u32,
    ) -> Duration {
        self.backoff.next(consecutive.saturating_sub(1))
    }

    pub fn should_retire(
        &self,
        consecutive: u32,
    ) -> bool {
        self.max_consecutive_faults
            .is_some_and(|limit| consecutive >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let p = policy(JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_clamped_to_max() {
        let p = BackoffPolicy {
            max: Duration::from_secs(1),
            ..policy(JitterPolicy::None)
        };
        assert_eq!(p.next(10), Duration::from_secs(1));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let full = policy(JitterPolicy::Full);
        let equal = policy(JitterPolicy::Equal);
        for attempt in 0..12 {
            let base = policy(JitterPolicy::None).next(attempt);
            assert!(full.next(attempt) <= base);
            let delay = equal.next(attempt);
            assert!(delay >= base / 2);
            assert!(delay <= base);
        }
    }

    /// Тест проверяет предел сбоев подряд и паузы супервизора.
    #[test]
    fn test_fault_policy() {
        let unlimited = FaultPolicy::default();
        assert!(!unlimited.should_retire(1_000));
        assert_eq!(unlimited.delay_after(1), Duration::from_millis(10));
        assert_eq!(unlimited.delay_after(2), Duration::from_millis(20));

        let capped = FaultPolicy {
            max_consecutive_faults: Some(3),
            ..FaultPolicy::default()
        };
        assert!(!capped.should_retire(2));
        assert!(capped.should_retire(3));
    }
}
