//! Steps and step chains
//!
//! A [`Step`] is a named unit of remote work with an optional retry window.
//! A [`StepChain`] is the ordered list of steps for one lifecycle phase of
//! one resource type.

use crate::error::{CloudError, Result, StepError};
use crate::state::Phase;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::time::Duration;

/// Future returned by a step's work function
pub type StepFuture<'a> = BoxFuture<'a, std::result::Result<(), StepError>>;

/// Work function of a step
pub type StepFn<A> = for<'a> fn(&'a mut A) -> StepFuture<'a>;

/// A single idempotent unit of remote work
pub struct Step<A> {
    name: &'static str,
    timeout: Option<Duration>,
    perform: StepFn<A>,
}

impl<A> Step<A> {
    /// A step whose first failure is final
    pub fn one_shot(name: &'static str, perform: StepFn<A>) -> Self {
        Self {
            name,
            timeout: None,
            perform,
        }
    }

    /// A step that is retried on [`StepError::NotReady`] until `timeout` elapses
    pub fn pollable(name: &'static str, timeout: Duration, perform: StepFn<A>) -> Self {
        Self {
            name,
            timeout: Some(timeout),
            perform,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_pollable(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn perform<'a>(&self, action: &'a mut A) -> StepFuture<'a> {
        (self.perform)(action)
    }
}

impl<A> Clone for Step<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            timeout: self.timeout,
            perform: self.perform,
        }
    }
}

impl<A> std::fmt::Debug for Step<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Ordered steps for one phase of one resource type
pub struct StepChain<A> {
    resource_type: String,
    phase: Phase,
    steps: Vec<Step<A>>,
    /// Step name -> position, used to resume at a named step
    index: HashMap<&'static str, usize>,
}

impl<A> StepChain<A> {
    /// Build a chain; step names must be non-empty and unique
    pub fn new(resource_type: impl Into<String>, phase: Phase, steps: Vec<Step<A>>) -> Result<Self> {
        let resource_type = resource_type.into();
        let mut index = HashMap::with_capacity(steps.len());

        for (position, step) in steps.iter().enumerate() {
            if step.name.is_empty() {
                return Err(CloudError::InvalidConfig(format!(
                    "{} {} chain has an unnamed step at position {}",
                    resource_type, phase, position
                )));
            }
            if index.insert(step.name, position).is_some() {
                return Err(CloudError::InvalidConfig(format!(
                    "{} {} chain has duplicate step {}",
                    resource_type, phase, step.name
                )));
            }
        }

        Ok(Self {
            resource_type,
            phase,
            steps,
            index,
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn steps(&self) -> &[Step<A>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Step<A>> {
        self.position(name).map(|i| &self.steps[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }
}

impl<A> std::fmt::Debug for StepChain<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepChain")
            .field("resource_type", &self.resource_type)
            .field("phase", &self.phase)
            .field("steps", &self.steps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        hits: u32,
    }

    fn bump(counter: &mut Counter) -> StepFuture<'_> {
        Box::pin(async move {
            counter.hits += 1;
            Ok(())
        })
    }

    #[test]
    fn test_chain_lookup() {
        let chain = StepChain::new(
            "Test::Counter",
            Phase::Create,
            vec![
                Step::one_shot("FIRST", bump),
                Step::pollable("SECOND", Duration::from_secs(5), bump),
            ],
        )
        .unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.position("SECOND"), Some(1));
        assert!(chain.get("THIRD").is_none());
        assert_eq!(chain.step_names(), vec!["FIRST", "SECOND"]);
        assert!(!chain.steps()[0].is_pollable());
        assert_eq!(chain.steps()[1].timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let result = StepChain::new(
            "Test::Counter",
            Phase::Delete,
            vec![Step::one_shot("SAME", bump), Step::one_shot("SAME", bump)],
        );
        assert!(matches!(result, Err(CloudError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_perform_mutates_action() {
        let step = Step::one_shot("BUMP", bump);
        let mut counter = Counter { hits: 0 };
        step.perform(&mut counter).await.unwrap();
        step.clone().perform(&mut counter).await.unwrap();
        assert_eq!(counter.hits, 2);
    }
}
