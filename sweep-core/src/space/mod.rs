//! Parameter space expansion
//!
//! Turns static overrides and value generators into the ordered list of
//! parameter sets a project is run with. Expansion is a pure function of its
//! inputs: seeded generators produce the same list on every call.

mod generator;

pub use generator::{GeneratorSpec, RepetitionGenerator};

use std::collections::HashSet;

use crate::domain::params::Parameters;
use crate::error::ConfigError;

/// Static override sets plus generators
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Repetitions {
    statics: Vec<Parameters>,
    generators: Vec<RepetitionGenerator>,
}

impl Repetitions {
    /// Rejects two generators writing the same key
    pub fn new(
        statics: Vec<Parameters>,
        generators: Vec<RepetitionGenerator>,
    ) -> Result<Self, ConfigError> {
        let mut keys = HashSet::new();
        for generator in &generators {
            if !keys.insert(generator.key()) {
                return Err(ConfigError::DuplicateGeneratorKey(
                    generator.key().to_string(),
                ));
            }
        }
        Ok(Self {
            statics,
            generators,
        })
    }

    /// Only static overrides
    pub fn from_statics(statics: Vec<Parameters>) -> Self {
        Self {
            statics,
            generators: Vec::new(),
        }
    }

    pub fn statics(&self) -> &[Parameters] {
        &self.statics
    }

    pub fn generators(&self) -> &[RepetitionGenerator] {
        &self.generators
    }

    /// Number of parameter sets `params_list` yields
    pub fn len(&self) -> usize {
        self.statics.len().max(1)
            * self
                .generators
                .iter()
                .map(RepetitionGenerator::count)
                .product::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every parameter set of this space
    pub fn params_list(&self) -> Vec<Parameters> {
        expand(&self.statics, &self.generators)
    }
}

/// Expands static overrides and generators into concrete parameter sets
///
/// The generated sets are the Cartesian product of every generator's values,
/// with the first generator varying slowest. When static overrides exist,
/// each one is combined with every generated set, generated values winning
/// on shared keys. Yields `max(1, statics) * product(counts)` sets.
///
/// Two generators with the same key collapse to the later one's value;
/// [`Repetitions::new`] rejects that configuration up front.
pub fn expand(statics: &[Parameters], generators: &[RepetitionGenerator]) -> Vec<Parameters> {
    let mut generated = vec![Parameters::new()];
    for generator in generators {
        let values = generator.generate();
        generated = generated
            .iter()
            .flat_map(|params| {
                values
                    .iter()
                    .map(move |value| params.with(generator.key(), value.clone()))
            })
            .collect();
    }

    if statics.is_empty() {
        return generated;
    }

    statics
        .iter()
        .flat_map(|base| generated.iter().map(move |params| base.merge(params)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::ParamValue;
    use rust_decimal::Decimal;

    fn linear(key: &str, count: usize) -> RepetitionGenerator {
        RepetitionGenerator::linear_step(key, Decimal::ZERO, Decimal::new(1, 1), count).unwrap()
    }

    #[test]
    fn test_empty_space_is_one_empty_set() {
        let params = expand(&[], &[]);
        assert_eq!(params, vec![Parameters::new()]);
    }

    #[test]
    fn test_statics_only() {
        let statics = vec![
            Parameters::from_iter([("A", 1)]),
            Parameters::from_iter([("A", 2)]),
        ];
        assert_eq!(expand(&statics, &[]), statics);
    }

    #[test]
    fn test_generators_only() {
        let params = expand(&[], &[linear("x", 3), linear("y", 2)]);

        assert_eq!(params.len(), 6);
        // first generator varies slowest
        assert_eq!(params[0].get("x"), Some(&ParamValue::Float(Decimal::ZERO)));
        assert_eq!(params[1].get("x"), Some(&ParamValue::Float(Decimal::ZERO)));
        assert_eq!(
            params[1].get("y"),
            Some(&ParamValue::Float(Decimal::new(1, 1)))
        );
    }

    #[test]
    fn test_two_statics_two_generators_yield_200_unique() {
        let statics = vec![
            Parameters::from_iter([("A", 1)]),
            Parameters::from_iter([("A", 2)]),
        ];
        let generators = vec![linear("B", 10), linear("C", 10)];

        let params = expand(&statics, &generators);

        assert_eq!(params.len(), 200);
        let unique: HashSet<_> = params.iter().collect();
        assert_eq!(unique.len(), 200);
    }

    #[test]
    fn test_generated_values_override_statics() {
        let statics = vec![Parameters::from_iter([("B", 99), ("A", 1)])];
        let params = expand(&statics, &[linear("B", 2)]);

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].get("A"), Some(&ParamValue::Int(1)));
        assert_eq!(params[0].get("B"), Some(&ParamValue::Float(Decimal::ZERO)));
    }

    #[test]
    fn test_size_law() {
        let statics = vec![
            Parameters::from_iter([("A", 1)]),
            Parameters::from_iter([("A", 2)]),
            Parameters::from_iter([("A", 3)]),
        ];
        for counts in [vec![], vec![4], vec![2, 5], vec![3, 0]] {
            let generators: Vec<_> = counts
                .iter()
                .enumerate()
                .map(|(i, c)| linear(&format!("g{}", i), *c))
                .collect();
            let repetitions = Repetitions::new(statics.clone(), generators).unwrap();
            let expected = 3 * counts.iter().product::<usize>();
            assert_eq!(repetitions.params_list().len(), expected);
            assert_eq!(repetitions.len(), expected);
        }
    }

    #[test]
    fn test_expand_is_restartable() {
        let generators = vec![
            RepetitionGenerator::normal_distribution("n", Decimal::ZERO, Decimal::ONE, 5)
                .unwrap()
                .with_seed(3),
        ];
        assert_eq!(expand(&[], &generators), expand(&[], &generators));
    }

    #[test]
    fn test_duplicate_generator_key_rejected() {
        let err = Repetitions::new(vec![], vec![linear("B", 2), linear("B", 3)]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateGeneratorKey("B".to_string()));
    }

    #[test]
    fn test_duplicate_key_in_expand_last_wins() {
        let first =
            RepetitionGenerator::linear_step("B", Decimal::from(100), Decimal::ONE, 1).unwrap();
        let params = expand(&[], &[first, linear("B", 1)]);
        assert_eq!(params, vec![Parameters::from_iter([("B", Decimal::ZERO)])]);
    }
}
