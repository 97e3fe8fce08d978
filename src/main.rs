use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use stratlab::{
    bind, create_template, BacktestConfig, BacktestEngine, Bar, CrossValidationConfig,
    CrossValidator, FoldParameters, IndicatorConfig, OptimizationConfig, ParameterBounds,
    ParameterGrid, ParameterSet, StrategyOptimizer,
};

const DEFAULT_TEMPLATE: &str = "sma_crossover";

#[derive(Parser)]
#[command(name = "stratlab")]
#[command(about = "Backtest, optimize and validate trading strategies on daily bars")]
struct Cli {
    /// JSON array of bars
    #[arg(long = "data-file", value_name = "PATH", global = true)]
    data_file: Option<PathBuf>,
    /// JSON object of upper-snake settings (INITIAL_CAPITAL, OPTIMIZATION_METRIC, ...)
    #[arg(long, value_name = "PATH", global = true)]
    settings: Option<PathBuf>,
    /// Strategy template to run
    #[arg(long, default_value = DEFAULT_TEMPLATE, global = true)]
    template: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest with fixed parameters
    Backtest {
        /// Parameter value, e.g. fast_period=10
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },
    /// Exhaustive search over a parameter grid
    GridSearch {
        /// Grid axis, e.g. fast_period=5,10,20
        #[arg(long = "param", value_name = "NAME=V1,V2,...", required = true)]
        axes: Vec<String>,
    },
    /// Genetic search within parameter bounds
    Genetic {
        /// Parameter bounds, e.g. fast_period=5:30
        #[arg(long = "bound", value_name = "NAME=MIN:MAX", required = true)]
        bounds: Vec<String>,
    },
    /// Rolling grid search on train windows, scored on the following test windows
    WalkForward {
        /// Grid axis searched on every train window
        #[arg(long = "param", value_name = "NAME=V1,V2,...", required = true)]
        axes: Vec<String>,
    },
    /// Time-series cross-validation of fixed parameters
    Validate {
        /// expanding, sliding or monte_carlo
        #[arg(long, default_value = "expanding")]
        method: String,
        /// Parameter value, e.g. fast_period=10
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Number of Monte Carlo folds
        #[arg(long, default_value_t = 5)]
        n_splits: usize,
        /// Train window length; defaults to MIN_TRAIN_SIZE
        #[arg(long)]
        train_size: Option<usize>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let data_path = cli
        .data_file
        .ok_or_else(|| anyhow!("--data-file is required"))?;
    let bars = load_bars(&data_path)?;
    let settings = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => HashMap::new(),
    };
    let backtest_config = BacktestConfig::from_settings_map(&settings)?;
    let template = create_template(&cli.template)?;
    info!(
        "Loaded {} bars from {}; template {}",
        bars.len(),
        data_path.display(),
        cli.template
    );

    let output = match cli.command {
        Commands::Backtest { params } => {
            let params = parse_params(&params)?;
            let mut engine = BacktestEngine::new(backtest_config);
            let result = engine.run(&bars, &bind(template.as_ref(), params))?;
            serde_json::to_value(&result)?
        }
        Commands::GridSearch { axes } => {
            let grid = parse_grid(&axes)?;
            let optimizer = StrategyOptimizer::new(
                OptimizationConfig::from_settings_map(&settings)?,
                backtest_config,
                IndicatorConfig::default(),
            );
            let result = optimizer.grid_search(&bars, template.as_ref(), &grid)?;
            let results: Vec<_> = result
                .results
                .iter()
                .map(|(params, score)| json!({ "parameters": params, "score": score }))
                .collect();
            json!({
                "best_params": result.best_params,
                "best_score": result.best_score,
                "results": results,
            })
        }
        Commands::Genetic { bounds } => {
            let bounds = parse_bounds(&bounds)?;
            let optimizer = StrategyOptimizer::new(
                OptimizationConfig::from_settings_map(&settings)?,
                backtest_config,
                IndicatorConfig::default(),
            );
            let result = optimizer.genetic_optimize(&bars, template.as_ref(), &bounds)?;
            serde_json::to_value(&result)?
        }
        Commands::WalkForward { axes } => {
            let grid = parse_grid(&axes)?;
            let optimization_config = OptimizationConfig::from_settings_map(&settings)?;
            let optimizer = StrategyOptimizer::new(
                optimization_config.clone(),
                backtest_config.clone(),
                IndicatorConfig::default(),
            );
            let inner = StrategyOptimizer::new(
                OptimizationConfig {
                    show_progress: false,
                    ..optimization_config
                },
                backtest_config,
                IndicatorConfig::none(),
            );
            let windows = optimizer.walk_forward_analysis(&bars, template.as_ref(), |train| {
                Ok(inner.grid_search(train, template.as_ref(), &grid)?.best_params)
            })?;
            serde_json::to_value(&windows)?
        }
        Commands::Validate {
            method,
            params,
            n_splits,
            train_size,
        } => {
            let params = parse_params(&params)?;
            let validator = CrossValidator::new(
                &bars,
                template.as_ref(),
                backtest_config,
                IndicatorConfig::default(),
                CrossValidationConfig::from_settings_map(&settings)?,
            )?;
            let result = validator.validate(
                &method,
                &FoldParameters::Single(params),
                n_splits,
                train_size,
            )?;
            serde_json::to_value(&result)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bars from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Malformed bar file {}", path.display()))
}

fn load_settings(path: &Path) -> Result<HashMap<String, String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let values: HashMap<String, serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed settings file {}", path.display()))?;
    Ok(values
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

fn split_assignment(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        .ok_or_else(|| anyhow!("Expected NAME=VALUE, got '{}'", raw))
}

fn parse_number(name: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("Parameter {} must be numeric (value: {})", name, raw))
}

fn parse_params(entries: &[String]) -> Result<ParameterSet> {
    let mut params = ParameterSet::new();
    for entry in entries {
        let (name, value) = split_assignment(entry)?;
        params.insert(name, parse_number(name, value)?);
    }
    Ok(params)
}

fn parse_grid(entries: &[String]) -> Result<ParameterGrid> {
    let mut grid = ParameterGrid::new();
    for entry in entries {
        let (name, values) = split_assignment(entry)?;
        let values = values
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .map(|v| parse_number(name, v))
            .collect::<Result<Vec<f64>>>()?;
        grid = grid.with(name, values);
    }
    Ok(grid)
}

fn parse_bounds(entries: &[String]) -> Result<ParameterBounds> {
    let mut bounds = ParameterBounds::new();
    for entry in entries {
        let (name, range) = split_assignment(entry)?;
        let (min, max) = range
            .split_once(':')
            .ok_or_else(|| anyhow!("Expected {}=MIN:MAX, got '{}'", name, entry))?;
        bounds = bounds.with(name, parse_number(name, min)?, parse_number(name, max)?);
    }
    Ok(bounds)
}
