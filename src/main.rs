//! fxbt CLI: backtest the breakout variants, or send the day's orders to the broker.
//!
//! Commands:
//! - `backtest` - simulate every configured variant over a bar file
//! - `trade` - build today's instructions and, with `--live-run`, place them

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fxbt::config::Config;
use fxbt::data::load_bars;
use fxbt::engine::Run;
use fxbt::performance::{PerformanceTable, Summary};
use fxbt::report::{Reporter, TracingReporter};
use fxbt::strategy::backtest;

#[derive(Parser)]
#[command(name = "fxbt", about = "fxbt - forex breakout backtester")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overridden by the FXBT_LOG environment variable.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format: text or json.
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the configured variants over historical bars.
    Backtest {
        /// Bar data file, CSV or JSON.
        #[arg(long)]
        data: PathBuf,

        /// Write the daily and cumulative pnl table to this CSV file.
        #[arg(long)]
        csv_out: Option<PathBuf>,

        /// Save the cumulative pnl chart to this SVG or PNG file.
        #[arg(long)]
        plot: Option<PathBuf>,
    },
    /// Build today's breakout orders from the broker's latest bars.
    Trade {
        /// Place the orders. Without it, only the instructions are reported.
        #[arg(long, default_value_t = false)]
        live_run: bool,
    },
}

fn init_tracing(log_level: &str, log_format: &str) -> Result<()> {
    let filter = std::env::var("FXBT_LOG").unwrap_or_else(|_| log_level.to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter).context("invalid log filter")?;

    if log_format.trim().eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, &cli.log_format)?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Backtest { data, csv_out, plot } => run_backtest(&config, data, csv_out, plot),
        Commands::Trade { live_run } => run_trade(config, live_run),
    }
}

fn run_backtest(config: &Config, data: PathBuf, csv_out: Option<PathBuf>, plot: Option<PathBuf>) -> Result<()> {
    let bars = load_bars(&data).with_context(|| format!("failed to load bars from {}", data.display()))?;
    let gap_policy = config.simulation.gap_policy;

    let mut runs = run_breakouts(config, bars.clone())?;
    if let Some(crossover) = config.crossover()? {
        runs.push(("macd".to_string(), backtest(&crossover, &bars, gap_policy)?));
    }

    let reporter = TracingReporter;
    for (label, run) in &runs {
        let summary = Summary::from_orders(run.orders(), config.pip_size);
        reporter.summary(label, &summary);
        println!("[{label}]\n{summary}\n");
    }

    let table = PerformanceTable::from_runs(
        runs.iter().map(|(label, run)| (label.as_str(), run.orders())),
        config.simulation.group_by,
    );
    println!("{table}");

    if let Some(path) = csv_out {
        let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        table.write_csv(BufWriter::new(file))?;
        tracing::info!(path = %path.display(), "pnl table written");
    }

    if let Some(path) = plot {
        plot_table(config, &table, path)?;
    }
    Ok(())
}

#[cfg(feature = "optimizer")]
fn run_breakouts(config: &Config, bars: Vec<fxbt::engine::Bar>) -> Result<Vec<(String, Run)>> {
    use fxbt::optimizer::Optimizer;

    let variants = config.breakout_variants()?;
    let optimizer = Optimizer::new(bars.into(), config.simulation.gap_policy);
    let runs = optimizer.with_parameters(&variants, |(_, breakout)| Ok(breakout.clone()))?;
    Ok(runs.into_iter().map(|((label, _), run)| (label, run)).collect())
}

#[cfg(not(feature = "optimizer"))]
fn run_breakouts(config: &Config, bars: Vec<fxbt::engine::Bar>) -> Result<Vec<(String, Run)>> {
    config
        .breakout_variants()?
        .into_iter()
        .map(|(label, breakout)| Ok((label, backtest(&breakout, &bars, config.simulation.gap_policy)?)))
        .collect()
}

#[cfg(feature = "draws")]
fn plot_table(config: &Config, table: &PerformanceTable, path: PathBuf) -> Result<()> {
    use fxbt::draws::{Draw, DrawOptions, DrawOutput};

    let options = DrawOptions::default()
        .title(format!("{} breakout", config.instrument))
        .draw_output(DrawOutput::from_path(path))
        .in_pips(config.pip_size);
    Draw::from(table).with_options(options).plot()?;
    Ok(())
}

#[cfg(not(feature = "draws"))]
fn plot_table(_: &Config, _: &PerformanceTable, path: PathBuf) -> Result<()> {
    anyhow::bail!("cannot write {}: fxbt was built without the `draws` feature", path.display())
}

#[cfg(feature = "oanda")]
fn run_trade(config: Config, live_run: bool) -> Result<()> {
    use fxbt::live::{LiveTrader, OandaBroker};

    let broker = OandaBroker::from_env(&config.live)?;
    let trader = LiveTrader::new(broker, TracingReporter, config);
    let Some(instructions) = trader.prepare().context("failed to build the trading instructions")? else {
        return Ok(());
    };

    if !live_run {
        tracing::info!("Dry run only, no order sent");
        return Ok(());
    }
    if let Err(err) = trader.submit(&instructions) {
        tracing::error!("failed to place orders: {err}");
    }
    Ok(())
}

#[cfg(not(feature = "oanda"))]
fn run_trade(_: Config, _: bool) -> Result<()> {
    anyhow::bail!("the trade command needs the `oanda` feature")
}
