use std::collections::BTreeMap;
use std::fs;
use std::io::{Write, stdout};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use honing_policy::{
    AttemptStep, Booster, BoosterKind, Branch, BranchSchedule, BranchStrategy, BranchTable,
    CostModel, ENERGY_THRESHOLD, EvaluationResult, HoningRules, HoningSolver, MaterialBundle,
    RankedStrategy, StageDescriptor,
};

#[derive(Debug, Parser)]
#[command(name = "honing", version)]
#[command(about = "Expected honing cost and booster strategy ranking")]
struct Cli {
    /// Log every evaluated strategy
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads for strategy evaluation (defaults to one per core)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Optional path to write the JSON output instead of stdout
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enumerate every booster strategy of a stage and rank them by expected cost
    Rank {
        /// JSON request with prices and the stage table
        request: PathBuf,

        /// Keep only the best k entries (0 keeps all)
        #[arg(long, default_value_t = 0)]
        top_k: usize,

        /// Include the per-attempt trace of every entry
        #[arg(long)]
        trace: bool,
    },
    /// Evaluate one enumerated strategy, selected by label
    Evaluate {
        request: PathBuf,

        #[arg(long, default_value = "none")]
        strategy: String,

        #[arg(long)]
        trace: bool,
    },
    /// Print the default honing rules
    Defaults,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoosterInput {
    id: String,
    added_probability: f64,
    unit_cost: Option<f64>,
    max_use: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageInput {
    base_probability: f64,
    #[serde(default)]
    base_cost: MaterialBundle,
    #[serde(default)]
    books: Vec<BoosterInput>,
    #[serde(default)]
    breaths: Vec<BoosterInput>,
}

#[derive(Debug, Deserialize)]
struct BranchInput {
    name: String,
    stage: StageInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoningRequest {
    #[serde(default)]
    prices: BTreeMap<String, f64>,
    #[serde(default)]
    excluded_materials: Vec<String>,
    stage: Option<StageInput>,
    #[serde(default)]
    branches: Vec<BranchInput>,
    schedule: Option<BranchSchedule>,
    #[serde(default)]
    rules: HoningRules,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StrategySummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    rank: Option<usize>,
    label: String,
    strategy: BranchStrategy,
    expected_attempts: f64,
    expected_cost: f64,
    worst_case_attempts: u32,
    worst_case_cost: f64,
    worst_case_guaranteed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    regret: Option<f64>,
    truncated_probability: f64,
    expected_materials: MaterialBundle,
    worst_case_materials: MaterialBundle,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<Vec<AttemptStep>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RankResponse {
    recommended: Option<String>,
    strategy_count: usize,
    compute_seconds: f64,
    base_costs: Vec<f64>,
    entries: Vec<StrategySummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    compute_seconds: f64,
    summary: StrategySummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DefaultsResponse {
    rules: HoningRules,
    energy_threshold: f64,
    strategy_labels: Vec<&'static str>,
}

fn summarize(
    strategy: BranchStrategy,
    result: EvaluationResult,
    rank: Option<usize>,
    regret: Option<f64>,
    trace: bool,
) -> StrategySummary {
    StrategySummary {
        rank,
        label: strategy.label.clone(),
        strategy,
        expected_attempts: result.expected_attempts,
        expected_cost: result.expected_cost,
        worst_case_attempts: result.worst_case.attempts,
        worst_case_cost: result.worst_case.cost,
        worst_case_guaranteed: result.worst_case.guaranteed,
        regret,
        truncated_probability: result.truncated_probability,
        expected_materials: result.expected_materials,
        worst_case_materials: result.worst_case.materials,
        steps: trace.then_some(result.steps),
    }
}

fn summarize_ranked(entry: RankedStrategy, trace: bool) -> StrategySummary {
    summarize(
        entry.strategy,
        entry.result,
        Some(entry.rank),
        Some(entry.regret),
        trace,
    )
}

fn build_cost_model(request: &HoningRequest) -> Result<CostModel> {
    let mut cost_model =
        CostModel::new(request.prices.iter().map(|(material, &price)| (material.clone(), price)))
            .context("invalid price table")?;
    for material in request.excluded_materials.iter() {
        cost_model.exclude(material.clone());
    }
    Ok(cost_model)
}

fn build_booster(
    input: &BoosterInput,
    kind: BoosterKind,
    cost_model: &CostModel,
) -> Result<Booster> {
    let max_use = input.max_use.unwrap_or(1);
    let id = input.id.as_str();
    let p = input.added_probability;
    let booster = match (kind, input.unit_cost) {
        (BoosterKind::Book, Some(unit_cost)) => Booster::book(id, p, unit_cost),
        (BoosterKind::Breath, Some(unit_cost)) => Booster::breath(id, p, unit_cost, max_use),
        (BoosterKind::Book, None) => Booster::priced_book(id, p, cost_model)
            .with_context(|| format!("booster {id} has no unitCost and no price"))?,
        (BoosterKind::Breath, None) => Booster::priced_breath(id, p, max_use, cost_model)
            .with_context(|| format!("booster {id} has no unitCost and no price"))?,
    };
    // A book with an explicit maxUse is kept as given so stage validation rejects it.
    Ok(Booster { max_use, ..booster })
}

fn build_stage(input: &StageInput, cost_model: &CostModel) -> Result<StageDescriptor> {
    let mut stage = StageDescriptor::new(input.base_probability, input.base_cost.clone());
    for book in input.books.iter() {
        stage = stage.with_book(build_booster(book, BoosterKind::Book, cost_model)?);
    }
    for breath in input.breaths.iter() {
        stage = stage.with_breath(build_booster(breath, BoosterKind::Breath, cost_model)?);
    }
    Ok(stage)
}

fn build_table(request: &HoningRequest, cost_model: &CostModel) -> Result<BranchTable> {
    match (&request.stage, request.branches.is_empty()) {
        (Some(_), false) => bail!("request must contain either stage or branches, not both"),
        (None, true) => bail!("request must contain a stage or a branch table"),
        (Some(stage), true) => Ok(BranchTable::single(build_stage(stage, cost_model)?)),
        (None, false) => {
            let branches = request
                .branches
                .iter()
                .map(|branch| -> Result<Branch> {
                    Ok(Branch::new(&branch.name, build_stage(&branch.stage, cost_model)?))
                })
                .collect::<Result<Vec<Branch>>>()?;
            let schedule = match (&request.schedule, branches.len()) {
                (Some(schedule), _) => schedule.clone(),
                (None, 1) => BranchSchedule::Cycle { pattern: vec![0] },
                (None, _) => bail!("a schedule is required when there is more than one branch"),
            };
            Ok(BranchTable::new(branches, schedule)?)
        }
    }
}

fn load_solver(path: &Path) -> Result<HoningSolver> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;
    let request: HoningRequest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse request {}", path.display()))?;
    let cost_model = build_cost_model(&request)?;
    let table = build_table(&request, &cost_model)?;
    let solver = HoningSolver::new(table, &cost_model, request.rules)?;
    Ok(solver)
}

fn rank(path: &Path, top_k: usize, trace: bool) -> Result<serde_json::Value> {
    let solver = load_solver(path)?;
    let start = Instant::now();
    let ranking = solver.enumerate_and_rank()?;
    let compute_seconds = start.elapsed().as_secs_f64();

    let strategy_count = ranking.len();
    let recommended = ranking.recommended().map(|entry| entry.strategy.label.clone());
    let keep = if top_k == 0 { strategy_count } else { top_k };
    let entries = ranking
        .into_entries()
        .into_iter()
        .take(keep)
        .map(|entry| summarize_ranked(entry, trace))
        .collect();

    log::info!("ranked {strategy_count} strategies in {compute_seconds:.3}s");
    Ok(serde_json::to_value(RankResponse {
        recommended,
        strategy_count,
        compute_seconds,
        base_costs: solver.base_costs().to_vec(),
        entries,
    })?)
}

fn evaluate(path: &Path, label: &str, trace: bool) -> Result<serde_json::Value> {
    let solver = load_solver(path)?;
    let strategies = solver.enumerate()?;
    let Some(strategy) = strategies.into_iter().find(|s| s.label == label) else {
        bail!("no strategy labelled '{label}' for this stage");
    };

    let start = Instant::now();
    let result = solver.evaluate(&strategy)?;
    let compute_seconds = start.elapsed().as_secs_f64();

    Ok(serde_json::to_value(EvaluateResponse {
        compute_seconds,
        summary: summarize(strategy, result, None, None, trace),
    })?)
}

fn defaults() -> Result<serde_json::Value> {
    Ok(serde_json::to_value(DefaultsResponse {
        rules: HoningRules::default(),
        energy_threshold: ENERGY_THRESHOLD,
        strategy_labels: vec!["none", "books", "breaths", "books+breaths"],
    })?)
}

fn write_output(value: &serde_json::Value, output: Option<&Path>) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => fs::write(path, rendered + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut out = stdout().lock();
            writeln!(out, "{rendered}")?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure worker threads")?;
    }

    let value = match &cli.command {
        Command::Rank {
            request,
            top_k,
            trace,
        } => rank(request, *top_k, *trace)?,
        Command::Evaluate {
            request,
            strategy,
            trace,
        } => evaluate(request, strategy, *trace)?,
        Command::Defaults => defaults()?,
    };

    write_output(&value, cli.output.as_deref())
}
