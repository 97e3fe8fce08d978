pub mod config;
pub mod cross_validation;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod models;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_utils;
pub mod performance;
pub mod strategy;

pub use config::{BacktestConfig, CrossValidationConfig, IndicatorConfig, OptimizationConfig};
pub use cross_validation::{CrossValidator, Fold, FoldParameters, ValidationResult};
pub use engine::{BacktestEngine, SimulationState, StateView};
pub use error::{Error, Result};
pub use models::{
    BacktestResult, Bar, EquityPoint, ExitReason, Metric, PositionType, Signal, SignalKind, Trade,
};
pub use optimizer::{
    GeneticResult, GridSearchResult, OptimizationOutcome, SearchSpace, StrategyOptimizer,
    WalkForwardWindow,
};
pub use optimizer_status::{OptimizerStatus, OptimizerStatusSnapshot};
pub use param_utils::{ParameterBounds, ParameterGrid, ParameterSet};
pub use performance::{MetricsReport, PerformanceMetrics};
pub use strategy::{bind, create_template, from_fn, template_fn, Strategy, StrategyTemplate};
