//! Repetition value generators

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Deserialize;

use crate::domain::params::ParamValue;
use crate::error::ConfigError;

/// Declarative generator description, as found in a project file
///
/// Which fields are required depends on `generator_type`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratorSpec {
    pub generator_type: String,
    pub key: String,
    pub count: usize,
    pub start: Option<Decimal>,
    pub step: Option<Decimal>,
    pub mean: Option<Decimal>,
    pub std_dev: Option<Decimal>,
    pub lower_bound: Option<Decimal>,
    pub upper_bound: Option<Decimal>,
    pub seed: Option<u64>,
}

/// Produces `count` values for a single parameter key
#[derive(Debug, Clone, PartialEq)]
pub enum RepetitionGenerator {
    /// `start + i * step` for `i` in `0..count`
    LinearStep {
        key: String,
        start: Decimal,
        step: Decimal,
        count: usize,
    },
    /// Samples from a normal distribution
    NormalDistribution {
        key: String,
        mean: Decimal,
        std_dev: Decimal,
        count: usize,
        seed: Option<u64>,
    },
    /// Samples from `[lower, upper)`
    UniformDistribution {
        key: String,
        lower: Decimal,
        upper: Decimal,
        count: usize,
        seed: Option<u64>,
    },
}

impl RepetitionGenerator {
    pub fn linear_step(
        key: impl Into<String>,
        start: Decimal,
        step: Decimal,
        count: usize,
    ) -> Result<Self, ConfigError> {
        let key = key.into();
        let last = Decimal::from_usize(count.saturating_sub(1))
            .and_then(|n| step.checked_mul(n))
            .and_then(|offset| start.checked_add(offset));
        if last.is_none() {
            return Err(invalid(&key, "linear step overflows"));
        }
        Ok(RepetitionGenerator::LinearStep {
            key,
            start,
            step,
            count,
        })
    }

    pub fn normal_distribution(
        key: impl Into<String>,
        mean: Decimal,
        std_dev: Decimal,
        count: usize,
    ) -> Result<Self, ConfigError> {
        let key = key.into();
        if std_dev.is_sign_negative() && !std_dev.is_zero() {
            return Err(invalid(&key, "std_dev must not be negative"));
        }
        Ok(RepetitionGenerator::NormalDistribution {
            key,
            mean,
            std_dev,
            count,
            seed: None,
        })
    }

    pub fn uniform_distribution(
        key: impl Into<String>,
        lower: Decimal,
        upper: Decimal,
        count: usize,
    ) -> Result<Self, ConfigError> {
        let key = key.into();
        if lower >= upper {
            return Err(invalid(&key, "lower_bound must be less than upper_bound"));
        }
        Ok(RepetitionGenerator::UniformDistribution {
            key,
            lower,
            upper,
            count,
            seed: None,
        })
    }

    /// Fixes the random seed of a distribution generator
    ///
    /// Has no effect on `LinearStep`, which is already deterministic.
    pub fn with_seed(mut self, value: u64) -> Self {
        match &mut self {
            RepetitionGenerator::NormalDistribution { seed, .. }
            | RepetitionGenerator::UniformDistribution { seed, .. } => *seed = Some(value),
            RepetitionGenerator::LinearStep { .. } => {}
        }
        self
    }

    pub fn key(&self) -> &str {
        match self {
            RepetitionGenerator::LinearStep { key, .. }
            | RepetitionGenerator::NormalDistribution { key, .. }
            | RepetitionGenerator::UniformDistribution { key, .. } => key,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            RepetitionGenerator::LinearStep { count, .. }
            | RepetitionGenerator::NormalDistribution { count, .. }
            | RepetitionGenerator::UniformDistribution { count, .. } => *count,
        }
    }

    /// Generates exactly `count` values
    pub fn generate(&self) -> Vec<ParamValue> {
        match self {
            RepetitionGenerator::LinearStep {
                start, step, count, ..
            } => (0..*count)
                .map(|i| {
                    let offset = step.saturating_mul(Decimal::from(i as u64));
                    ParamValue::Float(start.saturating_add(offset))
                })
                .collect(),
            RepetitionGenerator::NormalDistribution {
                mean,
                std_dev,
                count,
                seed,
                ..
            } => {
                let mut rng = rng_for(*seed);
                let mean_f = mean.to_f64().unwrap_or_default();
                let std_f = std_dev.to_f64().unwrap_or_default();
                (0..*count)
                    .map(|_| {
                        let z: f64 = rng.sample(StandardNormal);
                        to_value(mean_f + z * std_f, *mean)
                    })
                    .collect()
            }
            RepetitionGenerator::UniformDistribution {
                lower,
                upper,
                count,
                seed,
                ..
            } => {
                let mut rng = rng_for(*seed);
                let lower_f = lower.to_f64().unwrap_or_default();
                let upper_f = upper.to_f64().unwrap_or_default();
                (0..*count)
                    .map(|_| {
                        let u: f64 = rng.random();
                        to_value(lower_f + u * (upper_f - lower_f), *lower)
                    })
                    .collect()
            }
        }
    }
}

impl TryFrom<GeneratorSpec> for RepetitionGenerator {
    type Error = ConfigError;

    fn try_from(spec: GeneratorSpec) -> Result<Self, Self::Error> {
        let key = spec.key;
        if key.is_empty() {
            return Err(invalid(&key, "key cannot be empty"));
        }
        let generator = match spec.generator_type.as_str() {
            "linear_step" => RepetitionGenerator::linear_step(
                key.clone(),
                require(&key, "start", spec.start)?,
                require(&key, "step", spec.step)?,
                spec.count,
            )?,
            "normal_distribution" => RepetitionGenerator::normal_distribution(
                key.clone(),
                require(&key, "mean", spec.mean)?,
                require(&key, "std_dev", spec.std_dev)?,
                spec.count,
            )?,
            "uniform_distribution" => RepetitionGenerator::uniform_distribution(
                key.clone(),
                require(&key, "lower_bound", spec.lower_bound)?,
                require(&key, "upper_bound", spec.upper_bound)?,
                spec.count,
            )?,
            other => return Err(ConfigError::UnknownGenerator(other.to_string())),
        };
        Ok(match spec.seed {
            Some(seed) => generator.with_seed(seed),
            None => generator,
        })
    }
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn to_value(sample: f64, fallback: Decimal) -> ParamValue {
    ParamValue::Float(Decimal::from_f64(sample).unwrap_or(fallback))
}

fn require(key: &str, field: &str, value: Option<Decimal>) -> Result<Decimal, ConfigError> {
    value.ok_or_else(|| invalid(key, &format!("missing field '{}'", field)))
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidGenerator {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_step_values() {
        let generator =
            RepetitionGenerator::linear_step("B", Decimal::ZERO, Decimal::new(1, 1), 10).unwrap();

        let expected: Vec<ParamValue> = (0..10)
            .map(|i| ParamValue::Float(Decimal::new(i, 1)))
            .collect();
        assert_eq!(generator.generate(), expected);
    }

    #[test]
    fn test_normal_distribution_count_and_seed() {
        let generator = RepetitionGenerator::normal_distribution(
            "x",
            Decimal::from(10),
            Decimal::from(2),
            25,
        )
        .unwrap()
        .with_seed(7);

        let first = generator.generate();
        assert_eq!(first.len(), 25);
        assert_eq!(first, generator.generate());
    }

    #[test]
    fn test_uniform_distribution_within_bounds() {
        let generator =
            RepetitionGenerator::uniform_distribution("u", Decimal::from(-1), Decimal::from(3), 100)
                .unwrap()
                .with_seed(42);

        for value in generator.generate() {
            let ParamValue::Float(d) = value else {
                panic!("expected float, got {:?}", value);
            };
            assert!(d >= Decimal::from(-1) && d <= Decimal::from(3), "{} out of range", d);
        }
    }

    #[test]
    fn test_uniform_rejects_empty_range() {
        let err = RepetitionGenerator::uniform_distribution("u", Decimal::ONE, Decimal::ONE, 3)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGenerator { .. }));
    }

    #[test]
    fn test_normal_rejects_negative_std_dev() {
        let err =
            RepetitionGenerator::normal_distribution("n", Decimal::ZERO, Decimal::from(-1), 3)
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGenerator { .. }));
    }

    #[test]
    fn test_try_from_spec() {
        let spec = GeneratorSpec {
            generator_type: "linear_step".to_string(),
            key: "a".to_string(),
            count: 3,
            start: Some(Decimal::ONE),
            step: Some(Decimal::from(2)),
            ..Default::default()
        };

        let generator = RepetitionGenerator::try_from(spec).unwrap();
        assert_eq!(
            generator.generate(),
            vec![
                ParamValue::Float(Decimal::from(1)),
                ParamValue::Float(Decimal::from(3)),
                ParamValue::Float(Decimal::from(5)),
            ]
        );
    }

    #[test]
    fn test_try_from_unknown_type() {
        let spec = GeneratorSpec {
            generator_type: "poisson".to_string(),
            key: "a".to_string(),
            ..Default::default()
        };
        assert_eq!(
            RepetitionGenerator::try_from(spec),
            Err(ConfigError::UnknownGenerator("poisson".to_string()))
        );
    }

    #[test]
    fn test_try_from_missing_field() {
        let spec = GeneratorSpec {
            generator_type: "normal_distribution".to_string(),
            key: "a".to_string(),
            count: 2,
            mean: Some(Decimal::ONE),
            ..Default::default()
        };
        let err = RepetitionGenerator::try_from(spec).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidGenerator {
                key: "a".to_string(),
                message: "missing field 'std_dev'".to_string(),
            }
        );
    }
}
