//! The `shiki seasons` command: classify a folder and optionally sort it.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Args;
use console::Style;
use dialoguer::{Confirm, Select};
use shiki_core::{
    reclassify, CanvasSize, ClassificationResult, Config, EmbeddingEngine, Metric, ReorganizeMode,
    ScanOptions, ScanReport, Season, SeasonScan, SeasonScanOptions, Shiki, ThresholdMode,
};

use super::theme::{heading, shiki_theme};
use super::{cancel_on_ctrl_c, handle_interrupt, progress_bar};

/// Arguments for the `seasons` command.
#[derive(Args, Debug, Default)]
pub struct SeasonsArgs {
    /// Folder to classify (not recursive)
    #[arg(required = true)]
    pub folder: PathBuf,

    /// Uncertainty threshold in [0, 1] (default from config)
    #[arg(short, long, conflicts_with = "auto")]
    pub threshold: Option<f64>,

    /// Pick the threshold that flags the fewest unknowns
    #[arg(long)]
    pub auto: bool,

    /// Uncertainty metric: probability, entropy, margin_confidence,
    /// least_confidence or ratio_confidence
    #[arg(short, long)]
    pub metric: Option<Metric>,

    /// Number of parallel workers (default: available CPUs)
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Ignore the analysis cache and reclassify every image
    #[arg(long)]
    pub force: bool,

    /// Print per-season statistics and a threshold simulation
    #[arg(long)]
    pub report: bool,

    /// Print the scan as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Prompt for a label for each unknown image
    #[arg(long)]
    pub label_unknown: bool,

    /// Sort the folder into season folders: move or copy. Without a value
    /// the mode comes from config (copy when annotating)
    #[arg(long, value_name = "MODE", num_args = 0..=1)]
    pub apply: Option<Option<ReorganizeMode>>,

    /// Root for the season folders (default: the scanned folder)
    #[arg(short, long, requires = "apply")]
    pub output: Option<PathBuf>,

    /// Route unknown images into an `unknown/` folder instead of leaving them
    #[arg(long)]
    pub include_unknown: bool,

    /// Copy captioned images showing the label and every score
    #[arg(long, requires = "apply")]
    pub annotate: bool,

    /// White canvas the annotated images are centred on, e.g. 1920x1080
    #[arg(long, value_name = "WxH", requires = "annotate")]
    pub annotate_size: Option<CanvasSize>,

    /// Do not ask before moving or copying
    #[arg(short, long)]
    pub yes: bool,
}

impl SeasonsArgs {
    /// Scan options from config defaults overridden by flags.
    fn scan_options(&self, config: &Config) -> SeasonScanOptions {
        let mut options = SeasonScanOptions::from_config(&config.classify);
        if self.auto {
            options.threshold = ThresholdMode::Auto;
        } else if let Some(threshold) = self.threshold {
            options.threshold = ThresholdMode::Fixed(threshold);
        }
        if let Some(metric) = self.metric {
            options.metric = metric;
        }
        options.scan.workers = self.parallel;
        options.scan.force = self.force;
        options
    }

    /// Relocation mode, or `None` without `--apply`.
    fn apply_mode(&self, config: &Config) -> Option<ReorganizeMode> {
        let fallback = if config.reorganize.annotate {
            ReorganizeMode::Copy
        } else {
            config.reorganize.mode
        };
        self.apply.map(|mode| mode.unwrap_or(fallback))
    }
}

/// Execute the seasons command.
pub async fn execute(args: SeasonsArgs, mut config: Config) -> anyhow::Result<()> {
    if args.include_unknown {
        config.reorganize.include_unknown = true;
    }
    if args.annotate {
        config.reorganize.annotate = true;
    }
    if args.annotate_size.is_some() {
        config.reorganize.annotate_size = args.annotate_size;
    }
    if !EmbeddingEngine::model_exists(&config.embedding, &config.model_dir()) {
        // Fine for a fully cached folder; anything else fails at model load.
        tracing::warn!(
            "CLIP model files not found under {:?} (expected visual.onnx, text_model.onnx, tokenizer.json)",
            config.embedding_model_dir()
        );
    }
    let mut options = args.scan_options(&config);
    let apply = args.apply_mode(&config);
    let shiki = Shiki::new(config)?;

    let (pb, progress) = progress_bar();
    options.scan = ScanOptions {
        cancel: Some(cancel_on_ctrl_c()),
        progress: Some(progress),
        ..options.scan
    };
    let scan = shiki.scan_seasons(&args.folder, options).await;
    pb.finish_and_clear();
    let mut scan = scan?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&scan)?);
    } else {
        print_results(&scan);
    }
    if args.report {
        print_report(&scan.report());
    }

    if args.label_unknown && scan.unknown_count() > 0 {
        if !std::io::stdin().is_terminal() {
            anyhow::bail!("--label-unknown needs an interactive terminal");
        }
        label_unknown(&mut scan.results)?;
    }

    let Some(mode) = apply else {
        return Ok(());
    };
    if !args.yes && !confirm_apply(mode, &scan)? {
        eprintln!("Nothing changed.");
        return Ok(());
    }

    let summary = shiki
        .execute_reorganization(&scan.results, mode, &args.folder, args.output.as_deref())
        .await?;
    for error in &summary.errors {
        eprintln!("  {error}");
    }
    eprintln!("{}", summary.message);
    if summary.failed > 0 {
        anyhow::bail!("{} files could not be relocated", summary.failed);
    }
    Ok(())
}

fn print_results(scan: &SeasonScan) {
    let dim = Style::new().dim();
    let yellow = Style::new().yellow();
    for result in &scan.results {
        let label = if result.is_unknown {
            yellow.apply_to(format!("{:<8}", "unknown")).to_string()
        } else {
            format!("{:<8}", result.label)
        };
        println!(
            "{}  {}  {}",
            label,
            dim.apply_to(format!("{} {:.3}", scan.metric, result.score)),
            result.path.display()
        );
    }

    let threshold_note = match &scan.sweep {
        Some(sweep) => format!("auto threshold {:.2} over {} points", scan.threshold, sweep.points.len()),
        None => format!("threshold {:.2}", scan.threshold),
    };
    eprintln!(
        "{} images, {} unknown ({}), {} skipped ({} from cache, {:.1}s)",
        scan.total_processed,
        scan.unknown_count(),
        threshold_note,
        scan.skipped,
        scan.cached,
        scan.elapsed_seconds
    );
}

fn print_report(report: &ScanReport) {
    heading(&format!("Report ({} at {:.2})", report.metric, report.threshold));
    eprintln!("    {:<8} {:>6} {:>10} {:>10} {:>8}", "season", "count", "mean top", "mean score", "unknown");
    for stats in &report.seasons {
        eprintln!(
            "    {:<8} {:>6} {:>10.3} {:>10.3} {:>8}",
            stats.season, stats.count, stats.mean_top_probability, stats.mean_score, stats.unknown_count
        );
    }
    if let Some(scores) = &report.scores {
        eprintln!();
        eprintln!(
            "    {} min {:.3}  max {:.3}  mean {:.3}  median {:.3}",
            report.metric, scores.min, scores.max, scores.mean, scores.median
        );
    }
    eprintln!();
    for point in &report.simulation {
        eprintln!(
            "    threshold {:.1}: {} of {} unknown",
            point.threshold, point.unknown_count, report.total
        );
    }
}

/// Ask for a label for every unknown result; Esc on a prompt stops labeling.
fn label_unknown(results: &mut [ClassificationResult]) -> anyhow::Result<()> {
    let theme = shiki_theme();
    let mut items: Vec<String> = Season::ALL.iter().map(|s| s.to_string()).collect();
    items.push("Leave unknown".to_string());

    let unknown: Vec<usize> = (0..results.len()).filter(|&i| results[i].is_unknown).collect();
    for (n, index) in unknown.iter().copied().enumerate() {
        let result = &results[index];
        heading(&format!("Unknown {} of {}: {}", n + 1, unknown.len(), result.file_name));
        let (top, p) = result.probabilities.top();

        let choice = handle_interrupt(
            Select::with_theme(&theme)
                .with_prompt(format!("Season? (model says {top} at {p:.2})"))
                .items(&items)
                .default(top.index())
                .interact_opt(),
        )?;
        match choice {
            Some(i) if i < Season::ALL.len() => {
                let updated = reclassify(results, index, Season::ALL[i])?;
                tracing::debug!("Labeled {:?} as {}", updated.path, updated.label);
            }
            Some(_) => {}
            None => break,
        }
    }
    Ok(())
}

fn confirm_apply(mode: ReorganizeMode, scan: &SeasonScan) -> anyhow::Result<bool> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("Refusing to {mode} files without a terminal; pass --yes");
    }
    let prompt = format!("{} {} images into season folders?", capitalize(mode.as_str()), scan.results.len());
    let confirmed = handle_interrupt(
        Confirm::with_theme(&shiki_theme())
            .with_prompt(prompt)
            .default(false)
            .interact_opt(),
    )?;
    Ok(confirmed.unwrap_or(false))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
