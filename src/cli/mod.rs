//! Command-line interface for the sensor pipeline.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders::{load_table, load_tables};
use crate::core::series::TimeSeries;
use crate::core::table::Table;
use crate::core::time::Cadence;
use crate::core::writers::{write_table_csv, write_text_report};
use crate::processors::rolling::{rolling_series, RollingWindow, SlidingMean};
use crate::processors::{batch, continuity, denoise, gapfill, ice, profile, resample};
use crate::visualization::{self, ColorScale, LayerStyle, SeriesLayer};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "lake-pipeline")]
#[command(about = "Lake ice and temperature-chain sensor processing", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report missing minutes in a logger file
    CheckContinuity {
        /// Input CSV or workbook (defaults to io.input)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Write the text report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Concatenate logger sheets and average them per minute, hour or day
    Resample {
        /// Input files, concatenated in the given order (defaults to io.input)
        #[arg(short, long, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Output CSV (defaults to io.output)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Bucket size: minute, hour or day
        #[arg(long, default_value = "minute")]
        cadence: Cadence,
        /// Only emit buckets that contain rows
        #[arg(long)]
        observed_only: bool,
    },

    /// Daily ice thickness from the filtered altimeter signal
    DailyIce {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Altimeter column (defaults to ice.altimeter_column)
        #[arg(long)]
        column: Option<String>,
    },

    /// Reject samples outside a tolerance band around a rolling baseline
    RejectOutliers {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Column to clean (defaults to ice.altimeter_column)
        #[arg(long)]
        column: Option<String>,
        /// Relative band half-width (overrides rejection.threshold)
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Also render a comparison chart (PNG)
        #[arg(long)]
        plot: Option<PathBuf>,
    },

    /// Fill missing minutes by time-weighted interpolation
    FillGaps {
        /// Input CSV or workbook, or a directory with --batch
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output CSV, or a directory with --batch
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Process every matching file of the input directory
        #[arg(long)]
        batch: bool,
    },

    /// Daily means of every per-minute file in a directory
    DailyAverage {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge matching files of a directory into one table
    Merge {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Accumulate ice thickness from daily altimeter readings
    IceThickness {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Thickness on the first day in metres
        #[arg(long)]
        initial: Option<f64>,
    },

    /// Render a temperature-chain heat map (PNG)
    Heatmap {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write the interpolated field as CSV
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Plot selected columns in stacked panels (PNG)
    PlotSeries {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Columns to plot, one panel each
        #[arg(long, num_args = 1.., required = true)]
        columns: Vec<String>,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 37 {
            let head: String = value.chars().take(34).collect();
            format!("{}...", head)
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<37} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// CLI value, else the config value, else an error naming the flag.
fn resolve_path(cli: Option<PathBuf>, fallback: &Option<PathBuf>, flag: &str) -> Result<PathBuf> {
    cli.or_else(|| fallback.clone())
        .ok_or_else(|| anyhow!("no {} path given (use --{} or set io.{} in the config)", flag, flag, flag))
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                error!("Failed to load config from {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };

    let io = &config.io;
    let result = match cli.command {
        Commands::CheckContinuity { input, output } => resolve_path(input, &io.input, "input")
            .and_then(|input| cmd_check_continuity(&input, output.as_deref(), &config)),
        Commands::Resample {
            input,
            output,
            cadence,
            observed_only,
        } => resample_inputs(input, &io.input).and_then(|input| {
            let output = resolve_path(output, &io.output, "output")?;
            cmd_resample(&input, &output, cadence, observed_only, &config)
        }),
        Commands::DailyIce { input, output, column } => with_io(input, output, &config)
            .and_then(|(input, output)| cmd_daily_ice(&input, &output, column, &config)),
        Commands::RejectOutliers {
            input,
            output,
            column,
            threshold,
            plot,
        } => with_io(input, output, &config).and_then(|(input, output)| {
            cmd_reject_outliers(&input, &output, column, threshold, plot.as_deref(), &config)
        }),
        Commands::FillGaps { input, output, batch } => {
            with_io(input, output, &config).and_then(|(input, output)| cmd_fill_gaps(&input, &output, batch, &config))
        }
        Commands::DailyAverage { input, output } => {
            with_io(input, output, &config).and_then(|(input, output)| cmd_daily_average(&input, &output, &config))
        }
        Commands::Merge { input, output } => {
            with_io(input, output, &config).and_then(|(input, output)| cmd_merge(&input, &output, &config))
        }
        Commands::IceThickness { input, output, initial } => with_io(input, output, &config)
            .and_then(|(input, output)| cmd_ice_thickness(&input, &output, initial, &config)),
        Commands::Heatmap { input, output, export } => with_io(input, output, &config)
            .and_then(|(input, output)| cmd_heatmap(&input, &output, export.as_deref(), &config)),
        Commands::PlotSeries { input, output, columns } => with_io(input, output, &config)
            .and_then(|(input, output)| cmd_plot_series(&input, &output, &columns, &config)),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Files given with `-i`, else the single configured input.
fn resample_inputs(inputs: Vec<PathBuf>, fallback: &Option<PathBuf>) -> Result<Vec<PathBuf>> {
    if !inputs.is_empty() {
        return Ok(inputs);
    }
    Ok(vec![resolve_path(None, fallback, "input")?])
}

fn with_io(input: Option<PathBuf>, output: Option<PathBuf>, config: &PipelineConfig) -> Result<(PathBuf, PathBuf)> {
    Ok((
        resolve_path(input, &config.io.input, "input")?,
        resolve_path(output, &config.io.output, "output")?,
    ))
}

fn load_input(input: &Path, config: &PipelineConfig) -> Result<Table> {
    let spinner = create_spinner(&format!("Loading {}...", input.display()));
    let table = load_table(input, Some(&config.input));
    spinner.finish_and_clear();
    Ok(table?)
}

/// Series of `column`, clipped to the configured physical range.
fn measurement_series(table: &Table, column: &str, config: &PipelineConfig) -> Result<TimeSeries> {
    let series = table.series(column)?.normalized();
    Ok(match &config.physical_range {
        Some(range) => denoise::clip_to_range(&series, range),
        None => series,
    })
}

fn format_span(timestamps: &[chrono::NaiveDateTime]) -> String {
    match (timestamps.first(), timestamps.last()) {
        (Some(a), Some(b)) => format!("{} to {}", a.format("%Y-%m-%d %H:%M"), b.format("%Y-%m-%d %H:%M")),
        _ => "-".to_string(),
    }
}

fn cmd_check_continuity(input: &Path, output: Option<&Path>, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let table = load_input(input, config)?;

    let report = continuity::check_continuity(&table.timestamps, config.continuity.cadence_minutes)?;
    if let Some(path) = output {
        write_text_report(path, &report.render_text())?;
        info!("Continuity report written to {}", path.display());
    }

    let longest = report
        .longest_gap()
        .map(|g| format!("{} min from {}", g.duration_minutes, g.start.format("%Y-%m-%d %H:%M")))
        .unwrap_or_else(|| "-".to_string());

    print_summary(
        if report.is_complete() {
            "Time Series Complete"
        } else {
            "Gaps Found"
        },
        &[
            ("Input", input.display().to_string()),
            ("Range", format!("{} to {}", report.start, report.end)),
            ("Expected", report.expected.to_string()),
            ("Present", report.present.to_string()),
            ("Completeness", format!("{:.2}%", report.completeness() * 100.0)),
            ("Gaps", report.gaps.len().to_string()),
            ("Longest gap", longest),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_resample(
    inputs: &[PathBuf],
    output: &Path,
    cadence: Cadence,
    observed_only: bool,
    config: &PipelineConfig,
) -> Result<()> {
    let start = Instant::now();
    let spinner = create_spinner("Loading and averaging...");
    let table = load_tables(inputs, Some(&config.input))?;
    let mode = if observed_only {
        resample::BucketMode::ObservedOnly
    } else {
        resample::BucketMode::Contiguous
    };
    let resampled = resample::resample_table(&table, cadence, mode)?;
    spinner.finish_and_clear();

    let format = match cadence {
        Cadence::Day => config.output.daily_csv_format(),
        _ => config.output.csv_format(),
    };
    write_table_csv(output, &resampled, &format)?;

    print_summary(
        "Resampling Complete",
        &[
            ("Files", inputs.len().to_string()),
            ("Input rows", table.num_rows().to_string()),
            ("Output rows", resampled.num_rows().to_string()),
            ("Cadence", format!("{:?}", cadence)),
            ("Output", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_daily_ice(input: &Path, output: &Path, column: Option<String>, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let table = load_input(input, config)?;
    let column = column.unwrap_or_else(|| config.ice.altimeter_column.clone());

    let series = measurement_series(&table, &column, config)?
        .between(config.date_range.start, config.date_range.end);

    let spinner = create_spinner("Filtering daily ice thickness...");
    let report = denoise::daily_denoised_means(&series, Some(&config.denoise))?;
    spinner.finish_and_clear();

    if report.days.is_empty() {
        return Err(anyhow!(
            "no day has at least {} valid samples in column '{}'",
            config.denoise.min_daily_samples,
            column
        ));
    }
    let daily = report.to_table("date", &format!("{}_daily_mean", column));
    write_table_csv(output, &daily, &config.output.daily_csv_format())?;

    print_summary(
        "Daily Ice Thickness",
        &[
            ("Input", input.display().to_string()),
            ("Column", column),
            ("Days", report.days.len().to_string()),
            ("Skipped days", report.skipped.len().to_string()),
            ("Output", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_reject_outliers(
    input: &Path,
    output: &Path,
    column: Option<String>,
    threshold: Option<f64>,
    plot: Option<&Path>,
    config: &PipelineConfig,
) -> Result<()> {
    let start = Instant::now();
    let table = load_input(input, config)?;
    let column = column.unwrap_or_else(|| config.ice.altimeter_column.clone());
    let raw = measurement_series(&table, &column, config)?;

    let mut rejection = config.rejection.clone();
    if let Some(t) = threshold {
        rejection.threshold = t;
    }

    let spinner = create_spinner("Rejecting outliers...");
    let outcome = denoise::reject_outliers(&raw, Some(&rejection))?;
    let filled = gapfill::interpolate_missing(&outcome.series, config.gap_fill.boundary);
    let smoothed = rolling_series::<SlidingMean>(&filled, RollingWindow::trailing(rejection.smooth_window))?;
    let daily = resample::resample_series(&smoothed, Cadence::Day, resample::BucketMode::Contiguous)?;
    spinner.finish_and_clear();

    let mut result = Table::from_series(table.time_column.clone(), format!("{}_raw", column), &raw);
    result.set_column(format!("{}_cleaned", column), outcome.series.values.clone())?;
    result.set_column(format!("{}_smoothed", column), smoothed.values.clone())?;
    write_table_csv(output, &result, &config.output.csv_format())?;

    if let Some(plot_path) = plot {
        let (from, to) = (config.date_range.start, config.date_range.end);
        let raw_view = raw.between(from, to);
        let cleaned_view = outcome.series.between(from, to);
        let smooth_view = smoothed.between(from, to);
        let daily_view = daily.between(from, to);
        let layers = [
            SeriesLayer {
                series: &raw_view,
                color: plotters::style::RGBColor(0xD3, 0xD3, 0xD3),
                style: LayerStyle::Points,
            },
            SeriesLayer {
                series: &cleaned_view,
                color: plotters::style::RGBColor(0xFF, 0x45, 0x00),
                style: LayerStyle::Points,
            },
            SeriesLayer {
                series: &smooth_view,
                color: plotters::style::RGBColor(0x1E, 0x90, 0xFF),
                style: LayerStyle::Line,
            },
            SeriesLayer {
                series: &daily_view,
                color: plotters::style::RGBColor(0x2E, 0x8B, 0x57),
                style: LayerStyle::Line,
            },
        ];
        visualization::plot_series_comparison(plot_path, &layers, (config.plot.width, config.plot.height))
            .with_context(|| format!("rendering {}", plot_path.display()))?;
    }

    print_summary(
        "Outlier Rejection Complete",
        &[
            ("Input", input.display().to_string()),
            ("Column", column),
            ("Samples", raw.valid_count().to_string()),
            ("Rejected", outcome.rejected.to_string()),
            ("Passes", outcome.passes.to_string()),
            ("Threshold", format!("{:.0}%", rejection.threshold * 100.0)),
            ("Output", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_fill_gaps(input: &Path, output: &Path, batch_mode: bool, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();

    if batch_mode {
        println!("Filling gaps in batch mode...");
        println!("Input directory: {}", input.display());
        println!("Output directory: {}", output.display());

        let report = batch::fill_directory(input, output, config)?;
        print_summary(
            "Batch Gap Filling Complete",
            &[
                ("Input directory", input.display().to_string()),
                ("Output directory", output.display().to_string()),
                ("Files", report.outcomes.len().to_string()),
                ("Succeeded", report.succeeded().to_string()),
                ("Failed", report.failed().to_string()),
                ("Log", output.join(batch::PROCESSING_LOG).display().to_string()),
                ("Duration", format!("{:.2?}", start.elapsed())),
            ],
        );
        return Ok(());
    }

    let table = load_input(input, config)?;
    let spinner = create_spinner("Interpolating missing minutes...");
    let outcome = gapfill::fill_table_gaps(&table, config.continuity.cadence_minutes, config.gap_fill.boundary)?;
    spinner.finish_and_clear();
    write_table_csv(output, &outcome.table, &config.output.csv_format())?;

    print_summary(
        "Gap Filling Complete",
        &[
            ("Input", input.display().to_string()),
            ("Range", format_span(&outcome.table.timestamps)),
            ("Original rows", outcome.original_rows.to_string()),
            ("Filled rows", outcome.table.num_rows().to_string()),
            ("Inserted points", outcome.inserted.to_string()),
            ("Output", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_daily_average(input: &Path, output: &Path, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let spinner = create_spinner("Averaging per-minute files by day...");
    let report = batch::daily_average_directory(input, output, config)?;
    spinner.finish_and_clear();

    for outcome in report.outcomes.iter().filter(|o| o.succeeded()) {
        if let Some(path) = &outcome.output {
            println!("  ▸ {}", path.display());
        }
    }

    print_summary(
        "Daily Averages Complete",
        &[
            ("Input directory", input.display().to_string()),
            ("Output directory", output.display().to_string()),
            ("Files", report.outcomes.len().to_string()),
            ("Succeeded", report.succeeded().to_string()),
            ("Failed", report.failed().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_merge(input: &Path, output: &Path, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let spinner = create_spinner("Merging files...");
    let report = batch::merge_directory(input, output, config)?;
    spinner.finish_and_clear();

    print_summary(
        "Merge Complete",
        &[
            ("Input directory", input.display().to_string()),
            ("Files", report.outcomes.len().to_string()),
            ("Merged", report.succeeded().to_string()),
            ("Skipped", report.failed().to_string()),
            ("Output", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_ice_thickness(input: &Path, output: &Path, initial: Option<f64>, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let mut table = load_input(input, config)?;

    let mut ice_config = config.ice.clone();
    if let Some(initial) = initial {
        ice_config.initial_thickness_m = initial;
    }
    ice::add_thickness_columns(&mut table, Some(&ice_config))?;
    write_table_csv(output, &table, &config.output.daily_csv_format())?;

    let last = table
        .column(ice::THICKNESS_M_COLUMN)
        .and_then(|c| c.values.iter().rev().flatten().next().copied())
        .map(|t| format!("{:.3} m", t))
        .unwrap_or_else(|| "-".to_string());

    print_summary(
        "Ice Thickness Complete",
        &[
            ("Input", input.display().to_string()),
            ("Days", table.num_rows().to_string()),
            ("Initial", format!("{:.3} m", ice_config.initial_thickness_m)),
            ("Final", last),
            ("Output", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_heatmap(input: &Path, output: &Path, export: Option<&Path>, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let table = load_input(input, config)?
        .normalized()
        .between(config.date_range.start, config.date_range.end);

    let depth_profile = profile::DepthProfile::from_config(&config.profile)?;
    let spinner = create_spinner("Interpolating depth profiles...");
    let field = profile::interpolate_profile(&table, &depth_profile, config.profile.step, config.profile.order)?;
    spinner.finish_and_clear();

    if field.skipped_rows == field.values.len() {
        return Err(anyhow!("no row has enough valid sensor readings to interpolate"));
    }

    let scale = ColorScale::from_stops(&config.profile.color_stops, config.profile.vmin, config.profile.vmax)?;
    visualization::plot_heatmap(output, &field, &scale, (config.plot.width, config.plot.height))
        .with_context(|| format!("rendering {}", output.display()))?;

    if let Some(path) = export {
        write_table_csv(path, &field.to_table(&table.time_column), &config.output.csv_format())?;
    }

    let value_range = field
        .value_range()
        .map(|(lo, hi)| format!("{:.2} to {:.2}", lo, hi))
        .unwrap_or_else(|| "-".to_string());

    print_summary(
        "Heat Map Complete",
        &[
            ("Input", input.display().to_string()),
            ("Range", format_span(&field.timestamps)),
            ("Sensors", depth_profile.len().to_string()),
            ("Depth points", field.depths.len().to_string()),
            ("Skipped rows", field.skipped_rows.to_string()),
            ("Values", value_range),
            ("Output", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_plot_series(input: &Path, output: &Path, columns: &[String], config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    let table = load_input(input, config)?
        .normalized()
        .between(config.date_range.start, config.date_range.end);

    let panels = columns
        .iter()
        .map(|name| table.series(name))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let colors = config
        .plot
        .line_colors
        .iter()
        .map(|c| visualization::parse_hex_color(c))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    visualization::plot_panels(output, &panels, &colors, (config.plot.width, config.plot.height))
        .with_context(|| format!("rendering {}", output.display()))?;

    print_summary(
        "Plot Complete",
        &[
            ("Input", input.display().to_string()),
            ("Panels", panels.len().to_string()),
            ("Range", format_span(&table.timestamps)),
            ("Output", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}
