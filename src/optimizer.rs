use crate::config::{BacktestConfig, IndicatorConfig, OptimizationConfig};
use crate::engine::BacktestEngine;
use crate::error::{Error, Result};
use crate::models::Bar;
use crate::optimizer_status::OptimizerStatus;
use crate::param_utils::{ParameterBounds, ParameterGrid, ParameterRange, ParameterSet};
use crate::strategy::{bind, StrategyTemplate};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

/// Parents are drawn from at most this many top-ranked individuals.
const PARENT_POOL_SIZE: usize = 20;

#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub best_params: ParameterSet,
    pub best_score: f64,
    pub results: BTreeMap<ParameterSet, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneticResult {
    pub best_params: ParameterSet,
    pub best_fitness: f64,
    /// Best score seen so far after each generation.
    pub fitness_history: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardWindow {
    pub train: Range<usize>,
    pub test: Range<usize>,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub parameters: ParameterSet,
    pub train_score: f64,
    pub test_score: f64,
}

/// Search space handed to [`StrategyOptimizer::optimize`].
#[derive(Debug, Clone)]
pub enum SearchSpace {
    Grid(ParameterGrid),
    Bounds(ParameterBounds),
}

#[derive(Debug, Clone)]
pub enum OptimizationOutcome {
    Grid(GridSearchResult),
    Genetic(GeneticResult),
}

impl OptimizationOutcome {
    pub fn best_params(&self) -> &ParameterSet {
        match self {
            OptimizationOutcome::Grid(result) => &result.best_params,
            OptimizationOutcome::Genetic(result) => &result.best_params,
        }
    }

    pub fn best_score(&self) -> f64 {
        match self {
            OptimizationOutcome::Grid(result) => result.best_score,
            OptimizationOutcome::Genetic(result) => result.best_fitness,
        }
    }
}

enum SearchMethod {
    Grid,
    Genetic,
}

impl SearchMethod {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "grid" | "grid_search" => Ok(Self::Grid),
            "genetic" | "genetic_optimize" => Ok(Self::Genetic),
            other => Err(Error::configuration(format!(
                "Unknown optimization method: {}",
                other
            ))),
        }
    }
}

/// Searches a strategy template's parameter space against one scalar backtest metric.
pub struct StrategyOptimizer {
    config: OptimizationConfig,
    backtest_config: BacktestConfig,
    indicator_config: IndicatorConfig,
    status: OptimizerStatus,
}

impl StrategyOptimizer {
    pub fn new(
        config: OptimizationConfig,
        backtest_config: BacktestConfig,
        indicator_config: IndicatorConfig,
    ) -> Self {
        Self {
            config,
            backtest_config,
            indicator_config,
            status: OptimizerStatus::new(),
        }
    }

    pub fn with_status(mut self, status: OptimizerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn status(&self) -> &OptimizerStatus {
        &self.status
    }

    /// Dispatches to grid or genetic search by name.
    pub fn optimize<T: StrategyTemplate + ?Sized>(
        &self,
        method: &str,
        data: &[Bar],
        template: &T,
        space: &SearchSpace,
    ) -> Result<OptimizationOutcome> {
        match (SearchMethod::parse(method)?, space) {
            (SearchMethod::Grid, SearchSpace::Grid(grid)) => {
                Ok(OptimizationOutcome::Grid(self.grid_search(data, template, grid)?))
            }
            (SearchMethod::Genetic, SearchSpace::Bounds(bounds)) => Ok(
                OptimizationOutcome::Genetic(self.genetic_optimize(data, template, bounds)?),
            ),
            (SearchMethod::Grid, SearchSpace::Bounds(_)) => Err(Error::configuration(
                "grid search needs a parameter grid, not bounds",
            )),
            (SearchMethod::Genetic, SearchSpace::Grid(_)) => Err(Error::configuration(
                "genetic search needs parameter bounds, not a grid",
            )),
        }
    }

    pub fn grid_search<T: StrategyTemplate + ?Sized>(
        &self,
        data: &[Bar],
        template: &T,
        grid: &ParameterGrid,
    ) -> Result<GridSearchResult> {
        self.config.validate()?;
        self.backtest_config.validate()?;
        grid.validate()?;
        let prepared = self.prepare(data)?;

        let candidates = grid.combinations();
        let total = candidates.len();
        info!(
            "Grid search over {} combinations optimizing {} ({})",
            total,
            self.config.metric,
            if self.config.maximize { "maximize" } else { "minimize" }
        );
        self.status.set_phase("Grid search");
        self.status.set_progress(total, 0, None);

        let pb = self.progress_bar(total);
        let completed = AtomicUsize::new(0);
        let scored = candidates
            .par_iter()
            .map(|params| -> Result<(ParameterSet, f64)> {
                self.status.ensure_active()?;
                let score = self.evaluate(&prepared, template, params)?;
                debug!("Candidate {} scored {:.4}", params, score);
                let done = completed.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                self.status.set_progress(total, done, None);
                pb.inc(1);
                Ok((params.clone(), score))
            })
            .collect::<Result<Vec<_>>>();
        pb.finish_and_clear();
        let scored = scored?;

        let mut best: Option<(ParameterSet, f64)> = None;
        let mut results = BTreeMap::new();
        for (params, score) in scored {
            let replace = match &best {
                None => true,
                Some((_, best_score)) => self.is_better(score, *best_score),
            };
            if replace {
                best = Some((params.clone(), score));
            }
            results.insert(params, score);
        }

        let (best_params, best_score) =
            best.ok_or_else(|| Error::configuration("parameter grid produced no combinations"))?;
        self.status.set_progress(total, total, Some(best_score));
        self.status.set_phase("Completed");
        info!(
            "Grid search finished: best {} = {:.4} with {}",
            self.config.metric, best_score, best_params
        );

        Ok(GridSearchResult {
            best_params,
            best_score,
            results,
        })
    }

    pub fn genetic_optimize<T: StrategyTemplate + ?Sized>(
        &self,
        data: &[Bar],
        template: &T,
        bounds: &ParameterBounds,
    ) -> Result<GeneticResult> {
        self.config.validate()?;
        self.backtest_config.validate()?;
        bounds.validate()?;
        let prepared = self.prepare(data)?;

        let population_size = self.config.population_size;
        let generations = self.config.generations;
        let elite_size = population_size / 10;
        let pool_size = PARENT_POOL_SIZE.min(population_size);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            "Genetic search: population {}, {} generations, elite {}, parent pool {}",
            population_size, generations, elite_size, pool_size
        );
        self.status.set_phase("Genetic search");
        self.status.set_progress(generations, 0, None);

        let mut population: Vec<ParameterSet> = (0..population_size)
            .map(|_| random_individual(bounds, &mut rng))
            .collect();
        let mut best: Option<(ParameterSet, f64)> = None;
        let mut fitness_history = Vec::with_capacity(generations);
        let pb = self.progress_bar(generations);

        for generation in 0..generations {
            if let Err(e) = self.status.ensure_active() {
                pb.abandon();
                return Err(e);
            }

            let fitness = population
                .par_iter()
                .map(|individual| self.evaluate(&prepared, template, individual))
                .collect::<Result<Vec<f64>>>();
            let fitness = match fitness {
                Ok(fitness) => fitness,
                Err(e) => {
                    pb.abandon();
                    return Err(e);
                }
            };

            let mut ranked: Vec<usize> = (0..population.len()).collect();
            ranked.sort_by(|&a, &b| self.rank_order(fitness[a], fitness[b]));

            let leader = ranked[0];
            let improved = match &best {
                None => true,
                Some((_, best_fitness)) => self.is_better(fitness[leader], *best_fitness),
            };
            if improved {
                best = Some((population[leader].clone(), fitness[leader]));
            }
            let best_fitness = best.as_ref().map(|(_, f)| *f).unwrap_or(f64::NAN);
            fitness_history.push(best_fitness);

            info!(
                "Generation {}/{}: best {} = {:.4}",
                generation + 1,
                generations,
                self.config.metric,
                best_fitness
            );
            self.status
                .set_progress(generations, generation + 1, Some(best_fitness));
            pb.inc(1);

            if generation + 1 == generations {
                break;
            }

            let mut next_generation: Vec<ParameterSet> = ranked[..elite_size]
                .iter()
                .map(|&i| population[i].clone())
                .collect();
            while next_generation.len() < population_size {
                let parent1 = &population[ranked[rng.gen_range(0..pool_size)]];
                let parent2 = &population[ranked[rng.gen_range(0..pool_size)]];
                let mut child = self.crossover(parent1, parent2, bounds, &mut rng);
                self.mutate(&mut child, bounds, &mut rng);
                next_generation.push(child);
            }
            population = next_generation;
        }
        pb.finish_and_clear();

        let (best_params, best_fitness) =
            best.ok_or_else(|| Error::configuration("genetic search ran no generations"))?;
        self.status.set_phase("Completed");
        info!(
            "Genetic search finished: best {} = {:.4} with {}",
            self.config.metric, best_fitness, best_params
        );

        Ok(GeneticResult {
            best_params,
            best_fitness,
            fitness_history,
        })
    }

    /// Fits on each train window with `param_optimizer`, then scores the chosen
    /// parameters on that train window and on the disjoint test window after it.
    pub fn walk_forward_analysis<T, F>(
        &self,
        data: &[Bar],
        template: &T,
        mut param_optimizer: F,
    ) -> Result<Vec<WalkForwardWindow>>
    where
        T: StrategyTemplate + ?Sized,
        F: FnMut(&[Bar]) -> Result<ParameterSet>,
    {
        self.config.validate()?;
        self.backtest_config.validate()?;
        let prepared = self.prepare(data)?;

        let train_size = self.config.train_size;
        let test_size = self.config.test_size;
        let step_size = self.config.step_size;
        if train_size + test_size > prepared.len() {
            return Err(Error::data(format!(
                "walk-forward needs {} bars for one window, series has {}",
                train_size + test_size,
                prepared.len()
            )));
        }
        let window_count = (prepared.len() - train_size - test_size) / step_size + 1;
        info!(
            "Walk-forward analysis: {} windows (train {}, test {}, step {})",
            window_count, train_size, test_size, step_size
        );
        self.status.set_phase("Walk-forward analysis");
        self.status.set_progress(window_count, 0, None);

        let mut windows = Vec::with_capacity(window_count);
        let mut start = 0;
        let mut evaluated = 0;
        while start + train_size + test_size <= prepared.len() {
            self.status.ensure_active()?;
            let train = start..start + train_size;
            let test = train.end..train.end + test_size;

            match self.score_window(&prepared, template, &mut param_optimizer, &train, &test) {
                Ok(window) => {
                    info!(
                        "Window {} - {}: train {:.4}, test {:.4}",
                        window.test_start.format("%Y-%m-%d"),
                        window.test_end.format("%Y-%m-%d"),
                        window.train_score,
                        window.test_score
                    );
                    windows.push(window);
                }
                Err(e) if e.is_data() => {
                    warn!("Skipping walk-forward window at bar {}: {}", start, e);
                }
                Err(e) => return Err(e),
            }

            evaluated += 1;
            self.status.set_progress(window_count, evaluated, None);
            start += step_size;
        }

        if windows.is_empty() {
            return Err(Error::data("every walk-forward window was skipped"));
        }
        self.status.set_phase("Completed");
        Ok(windows)
    }

    fn score_window<T, F>(
        &self,
        prepared: &[Bar],
        template: &T,
        param_optimizer: &mut F,
        train: &Range<usize>,
        test: &Range<usize>,
    ) -> Result<WalkForwardWindow>
    where
        T: StrategyTemplate + ?Sized,
        F: FnMut(&[Bar]) -> Result<ParameterSet>,
    {
        let train_bars = &prepared[train.clone()];
        let test_bars = &prepared[test.clone()];
        let parameters = param_optimizer(train_bars)?;
        let train_score = self.evaluate(train_bars, template, &parameters)?;
        let test_score = self.evaluate(test_bars, template, &parameters)?;

        Ok(WalkForwardWindow {
            train: train.clone(),
            test: test.clone(),
            train_start: train_bars[0].date,
            train_end: train_bars[train_bars.len() - 1].date,
            test_start: test_bars[0].date,
            test_end: test_bars[test_bars.len() - 1].date,
            parameters,
            train_score,
            test_score,
        })
    }

    /// Validates, sorts and attaches indicators once; candidate runs reuse the result.
    fn prepare(&self, data: &[Bar]) -> Result<Vec<Bar>> {
        BacktestEngine::with_indicators(self.backtest_config.clone(), self.indicator_config.clone())
            .prepare_data(data)
    }

    /// One backtest on its own engine.
    fn evaluate<T: StrategyTemplate + ?Sized>(
        &self,
        prepared: &[Bar],
        template: &T,
        params: &ParameterSet,
    ) -> Result<f64> {
        let mut engine =
            BacktestEngine::with_indicators(self.backtest_config.clone(), IndicatorConfig::none());
        let result = engine.run(prepared, &bind(template, params.clone()))?;
        Ok(result.metric(self.config.metric))
    }

    /// NaN never wins; any number beats a NaN incumbent.
    fn is_better(&self, candidate: f64, incumbent: f64) -> bool {
        if candidate.is_nan() {
            return false;
        }
        if incumbent.is_nan() {
            return true;
        }
        if self.config.maximize {
            candidate > incumbent
        } else {
            candidate < incumbent
        }
    }

    /// Best-first ordering with NaN last.
    fn rank_order(&self, a: f64, b: f64) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if self.config.maximize => b.total_cmp(&a),
            (false, false) => a.total_cmp(&b),
        }
    }

    fn crossover(
        &self,
        parent1: &ParameterSet,
        parent2: &ParameterSet,
        bounds: &ParameterBounds,
        rng: &mut StdRng,
    ) -> ParameterSet {
        bounds
            .ranges()
            .iter()
            .map(|(name, range)| {
                let from_first = rng.gen::<f64>() < self.config.crossover_rate;
                let source = if from_first { parent1 } else { parent2 };
                let value = source
                    .get(name)
                    .unwrap_or_else(|| sample_within(range, rng));
                (name.clone(), value)
            })
            .collect()
    }

    fn mutate(&self, individual: &mut ParameterSet, bounds: &ParameterBounds, rng: &mut StdRng) {
        for (name, range) in bounds.ranges() {
            if rng.gen::<f64>() < self.config.mutation_rate {
                individual.insert(name.clone(), sample_within(range, rng));
            }
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}

fn sample_within(range: &ParameterRange, rng: &mut StdRng) -> f64 {
    rng.gen_range(range.min..=range.max)
}

fn random_individual(bounds: &ParameterBounds, rng: &mut StdRng) -> ParameterSet {
    bounds
        .ranges()
        .iter()
        .map(|(name, range)| (name.clone(), sample_within(range, rng)))
        .collect()
}
