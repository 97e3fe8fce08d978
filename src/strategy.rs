use crate::engine::StateView;
use crate::error::{Error, Result as CrateResult};
use crate::models::{Bar, Signal};
use crate::param_utils::ParameterSet;
use anyhow::Result;

/// Produces the signals for the newest bar of `history`.
///
/// `history` ends at the bar being simulated; nothing after it is visible.
pub trait Strategy {
    fn generate_signals(&self, history: &[Bar], state: &StateView<'_>) -> Result<Vec<Signal>>;
}

impl<S: Strategy + ?Sized> Strategy for &S {
    fn generate_signals(&self, history: &[Bar], state: &StateView<'_>) -> Result<Vec<Signal>> {
        (**self).generate_signals(history, state)
    }
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn generate_signals(&self, history: &[Bar], state: &StateView<'_>) -> Result<Vec<Signal>> {
        (**self).generate_signals(history, state)
    }
}

/// A strategy whose behaviour depends on named numeric parameters.
///
/// Search workers share one template across threads, hence `Sync`.
pub trait StrategyTemplate: Sync {
    fn generate_signals(
        &self,
        history: &[Bar],
        state: &StateView<'_>,
        params: &ParameterSet,
    ) -> Result<Vec<Signal>>;
}

impl<T: StrategyTemplate + ?Sized> StrategyTemplate for &T {
    fn generate_signals(
        &self,
        history: &[Bar],
        state: &StateView<'_>,
        params: &ParameterSet,
    ) -> Result<Vec<Signal>> {
        (**self).generate_signals(history, state, params)
    }
}

impl<T: StrategyTemplate + ?Sized> StrategyTemplate for Box<T> {
    fn generate_signals(
        &self,
        history: &[Bar],
        state: &StateView<'_>,
        params: &ParameterSet,
    ) -> Result<Vec<Signal>> {
        (**self).generate_signals(history, state, params)
    }
}

pub struct FnStrategy<F> {
    f: F,
}

/// Wraps a closure as a [`Strategy`].
pub fn from_fn<F>(f: F) -> FnStrategy<F>
where
    F: Fn(&[Bar], &StateView<'_>) -> Result<Vec<Signal>>,
{
    FnStrategy { f }
}

impl<F> Strategy for FnStrategy<F>
where
    F: Fn(&[Bar], &StateView<'_>) -> Result<Vec<Signal>>,
{
    fn generate_signals(&self, history: &[Bar], state: &StateView<'_>) -> Result<Vec<Signal>> {
        (self.f)(history, state)
    }
}

pub struct FnTemplate<F> {
    f: F,
}

/// Wraps a closure as a [`StrategyTemplate`].
pub fn template_fn<F>(f: F) -> FnTemplate<F>
where
    F: Fn(&[Bar], &StateView<'_>, &ParameterSet) -> Result<Vec<Signal>> + Sync,
{
    FnTemplate { f }
}

impl<F> StrategyTemplate for FnTemplate<F>
where
    F: Fn(&[Bar], &StateView<'_>, &ParameterSet) -> Result<Vec<Signal>> + Sync,
{
    fn generate_signals(
        &self,
        history: &[Bar],
        state: &StateView<'_>,
        params: &ParameterSet,
    ) -> Result<Vec<Signal>> {
        (self.f)(history, state, params)
    }
}

/// A template with its parameters fixed.
pub struct BoundStrategy<'a, T: ?Sized> {
    template: &'a T,
    params: ParameterSet,
}

pub fn bind<T: StrategyTemplate + ?Sized>(template: &T, params: ParameterSet) -> BoundStrategy<'_, T> {
    BoundStrategy { template, params }
}

impl<T: StrategyTemplate + ?Sized> Strategy for BoundStrategy<'_, T> {
    fn generate_signals(&self, history: &[Bar], state: &StateView<'_>) -> Result<Vec<Signal>> {
        self.template.generate_signals(history, state, &self.params)
    }
}

#[path = "strategies/sma_crossover.rs"]
pub mod sma_crossover;

pub use sma_crossover::SmaCrossoverTemplate;

pub fn create_template(template_id: &str) -> CrateResult<Box<dyn StrategyTemplate + Send>> {
    match template_id {
        "sma_crossover" => Ok(Box::new(SmaCrossoverTemplate)),
        _ => Err(Error::configuration(format!(
            "Unknown strategy template: {}",
            template_id
        ))),
    }
}
