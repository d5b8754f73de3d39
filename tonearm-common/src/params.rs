//! Deferred stage parameter updates
//!
//! Runtime reconfiguration of a live pipeline travels as [`Params`]: batches
//! of deferred actions keyed by the [`StageId`] of the stage they target.
//! Building or combining a batch never executes anything; actions run only
//! when the owning stage task hands its stage to [`Params::apply_to`] at a
//! deterministic point in its processing loop. That confinement is what
//! makes mid-stream updates race-free: no code outside the stage's own task
//! can ever hold the `&mut` the actions need.
//!
//! An action is an erased `Fn(&mut dyn Any)`. Typed constructors built with
//! [`Param::for_stage`] downcast to the concrete stage type and log a
//! warning if the consumer turns out to be something else.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Stable opaque identity of one pipeline stage.
///
/// Assigned when the stage is constructed and used to address parameter
/// updates to it. Equality is the only meaningful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(uuid::Uuid);

impl StageId {
    /// Generate a fresh random identity.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for StageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StageId {
    /// First eight hex digits; enough to tell stages apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.simple().to_string();
        write!(f, "{}", &hex[..8])
    }
}

type Action = Box<dyn Fn(&mut dyn Any) + Send + Sync>;

/// One deferred parameter update addressed to one consumer stage.
pub struct Param {
    consumer: StageId,
    action: Action,
}

impl Param {
    /// Build a param from a raw action over the type-erased stage.
    pub fn new<F>(consumer: StageId, action: F) -> Self
    where
        F: Fn(&mut dyn Any) + Send + Sync + 'static,
    {
        Self {
            consumer,
            action: Box::new(action),
        }
    }

    /// Build a param from a typed action.
    ///
    /// The action downcasts the consumer to `S` before applying `f`. If the
    /// stage registered under this id is some other concrete type the update
    /// is dropped with a warning; deferred actions have no error path back
    /// to the caller.
    pub fn for_stage<S, F>(consumer: StageId, f: F) -> Self
    where
        S: 'static,
        F: Fn(&mut S) + Send + Sync + 'static,
    {
        Self::new(consumer, move |target: &mut dyn Any| {
            match target.downcast_mut::<S>() {
                Some(stage) => f(stage),
                None => warn!(
                    consumer = %consumer,
                    expected = std::any::type_name::<S>(),
                    "parameter dropped: consumer is not the expected stage type"
                ),
            }
        })
    }

    /// The stage this param is addressed to.
    pub fn consumer(&self) -> StageId {
        self.consumer
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

/// A batch of deferred parameter updates, grouped per consumer stage.
///
/// Per-consumer order is the order of registration; [`Params::add`] appends
/// and never overwrites, so two updates to the same consumer both apply, in
/// order. All operations are cheap no-ops on an empty batch.
#[derive(Default)]
pub struct Params {
    actions: HashMap<StageId, Vec<Action>>,
}

impl Params {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one param to the batch.
    pub fn add(&mut self, param: Param) -> &mut Self {
        self.actions
            .entry(param.consumer)
            .or_default()
            .push(param.action);
        self
    }

    /// Merge two batches.
    ///
    /// An empty receiver returns `other` unchanged. Otherwise `other`'s
    /// actions are appended after the receiver's existing actions for each
    /// consumer. Joining executes nothing.
    pub fn join(mut self, other: Params) -> Params {
        if self.actions.is_empty() {
            return other;
        }
        for (consumer, actions) in other.actions {
            self.actions.entry(consumer).or_default().extend(actions);
        }
        self
    }

    /// Run every action registered for `consumer` against `target`, in
    /// registration order. Returns the number of actions executed; zero when
    /// none are registered.
    ///
    /// This is the only way actions execute. The caller is expected to be
    /// the task that owns the stage.
    pub fn apply_to(&self, consumer: StageId, target: &mut dyn Any) -> usize {
        match self.actions.get(&consumer) {
            Some(actions) => {
                for action in actions {
                    action(target);
                }
                actions.len()
            }
            None => 0,
        }
    }

    /// True when no actions are registered for any consumer.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Consumers with at least one registered action.
    pub fn consumers(&self) -> impl Iterator<Item = StageId> + '_ {
        self.actions.keys().copied()
    }

    /// Remove and return the sub-batch addressed to `consumer`, or `None`
    /// when nothing is registered for it. Used to route one pushed batch to
    /// per-stage update channels.
    pub fn take(&mut self, consumer: StageId) -> Option<Params> {
        self.actions.remove(&consumer).map(|actions| {
            let mut split = HashMap::new();
            split.insert(consumer, actions);
            Params { actions: split }
        })
    }
}

impl FromIterator<Param> for Params {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        let mut params = Params::new();
        for param in iter {
            params.add(param);
        }
        params
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (consumer, actions) in &self.actions {
            map.entry(&consumer.to_string(), &actions.len());
        }
        map.finish()
    }
}
