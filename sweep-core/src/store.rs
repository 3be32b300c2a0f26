//! Run persistence contract
//!
//! Once inserted, runs change state only through a `RunStore`. Implementations
//! live in the `sweep-store` crate.

use async_trait::async_trait;

use crate::domain::run::{Run, RunId, RunState};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Restricts which scheduled runs a worker may claim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    /// Only claim runs with one of these ids
    pub run_ids: Option<Vec<RunId>>,
    /// Only claim runs whose runset matches this `LIKE` pattern
    pub runset: Option<String>,
}

impl ClaimFilter {
    /// True when `run` passes both restrictions
    pub fn matches(&self, run: &Run) -> bool {
        let id_ok = match (&self.run_ids, run.id) {
            (Some(ids), Some(id)) => ids.contains(&id),
            (Some(_), None) => false,
            (None, _) => true,
        };
        id_ok
            && self
                .runset
                .as_deref()
                .is_none_or(|pattern| like_matches(pattern, &run.runset))
    }
}

/// Selects runs for inspection
///
/// Empty `states` means any state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunQuery {
    pub states: Vec<RunState>,
    pub hostname: Option<String>,
    /// `LIKE` pattern
    pub runset: Option<String>,
    pub run_ids: Option<Vec<RunId>>,
}

impl RunQuery {
    pub fn matches(&self, run: &Run) -> bool {
        (self.states.is_empty() || self.states.contains(&run.state()))
            && self
                .hostname
                .as_deref()
                .is_none_or(|host| run.hostname.as_deref() == Some(host))
            && ClaimFilter {
                run_ids: self.run_ids.clone(),
                runset: self.runset.clone(),
            }
            .matches(run)
    }
}

/// Durable, shared collection of runs
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Assigns a contiguous block of fresh ids to `runs` and stores them as a
    /// single unit of work: either every run and parameter is written or none is.
    async fn insert_runs(&self, runs: &mut [Run]) -> StoreResult<()>;

    /// Atomically moves the oldest matching scheduled run of `cluster_name`
    /// to `in_progress` and returns it. Two concurrent callers never receive
    /// the same run.
    async fn claim_next(&self, cluster_name: &str, filter: &ClaimFilter)
    -> StoreResult<Option<Run>>;

    /// Idempotent upsert of the run's mutable fields
    ///
    /// Fails with `IllegalTransition` when the stored state cannot advance to
    /// the run's current state.
    async fn persist_run(&self, run: &Run) -> StoreResult<()>;

    /// Matching runs ordered by id, with parameters
    async fn find_runs(&self, query: &RunQuery) -> StoreResult<Vec<Run>>;

    async fn get_run(&self, id: RunId) -> StoreResult<Run>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    Any,
    One,
    Literal(char),
}

/// SQL `LIKE` matching: `%` matches any run of characters, `_` exactly one
///
/// `\` escapes the next character, as in Postgres. A pattern ending in a
/// lone `\` is rejected by Postgres and matches nothing here.
pub fn like_matches(pattern: &str, value: &str) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            '\\' => match chars.next() {
                Some(escaped) => LikeToken::Literal(escaped),
                None => return false,
            },
            c => LikeToken::Literal(c),
        });
    }
    let value: Vec<char> = value.chars().collect();

    // dp[j]: tokens[..i] match value[..j]
    let mut dp = vec![false; value.len() + 1];
    dp[0] = true;
    for token in tokens {
        let mut next = vec![false; value.len() + 1];
        match token {
            LikeToken::Any => {
                let mut seen = false;
                for j in 0..=value.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            LikeToken::One => {
                for j in 1..=value.len() {
                    next[j] = dp[j - 1];
                }
            }
            LikeToken::Literal(c) => {
                for j in 1..=value.len() {
                    next[j] = dp[j - 1] && c == value[j - 1];
                }
            }
        }
        dp = next;
    }
    dp[value.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::code_source::CodeSource;
    use crate::domain::params::Parameters;
    use crate::domain::run::NewRun;

    fn run(id: RunId, runset: &str) -> Run {
        let mut run = Run::from(NewRun {
            project_name: "p".to_string(),
            scenario_name: None,
            code_source: CodeSource::local("."),
            runner_class: "null".to_string(),
            runner_flags: String::new(),
            parameters: Parameters::new(),
            runset: runset.to_string(),
            cluster_name: "default".to_string(),
        });
        run.id = Some(id);
        run
    }

    #[test]
    fn test_like_matches() {
        assert!(like_matches("batch%", "batch_2024"));
        assert!(like_matches("%", ""));
        assert!(like_matches("a_c", "abc"));
        assert!(!like_matches("a_c", "abbc"));
        assert!(like_matches("%mid%", "has mid here"));
        assert!(!like_matches("exact", "exactly"));
    }

    #[test]
    fn test_like_backslash_escapes() {
        assert!(like_matches(r"100\%", "100%"));
        assert!(!like_matches(r"100\%", "1000"));
        assert!(like_matches(r"a\_c", "a_c"));
        assert!(!like_matches(r"a\_c", "abc"));
        assert!(like_matches(r"dir\\%", r"dir\sub"));
        assert!(!like_matches(r"trailing\", r"trailing\"));
    }

    #[test]
    fn test_claim_filter() {
        let filter = ClaimFilter {
            run_ids: Some(vec![1, 2]),
            runset: Some("nightly%".to_string()),
        };
        assert!(filter.matches(&run(1, "nightly_1")));
        assert!(!filter.matches(&run(3, "nightly_1")));
        assert!(!filter.matches(&run(2, "weekly")));
        assert!(ClaimFilter::default().matches(&run(9, "anything")));
    }

    #[test]
    fn test_run_query_states() {
        let query = RunQuery {
            states: vec![RunState::Copied, RunState::CopyFailed],
            ..Default::default()
        };
        assert!(!query.matches(&run(1, "r")));
        assert!(query.matches(&run(1, "r").with_state(RunState::CopyFailed)));
    }
}
