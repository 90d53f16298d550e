//! The `shiki duplicates` command: find near-identical images and review them.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::Args;
use console::Style;
use dialoguer::Select;
use shiki_core::duplicates::review::DeleteOutcome;
use shiki_core::{Config, DuplicateGroup, ReviewSession, ReviewState, ScanOptions, Shiki};

use super::theme::{heading, shiki_theme};
use super::{cancel_on_ctrl_c, handle_interrupt, progress_bar};

/// Arguments for the `duplicates` command.
#[derive(Args, Debug, Default)]
pub struct DuplicatesArgs {
    /// Folder to scan (not recursive)
    #[arg(required = true)]
    pub folder: PathBuf,

    /// Number of parallel workers (default: available CPUs)
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Ignore the analysis cache and recompute every fingerprint
    #[arg(long)]
    pub force: bool,

    /// Maximum Hamming distance between duplicate fingerprints
    #[arg(long)]
    pub max_distance: Option<u32>,

    /// Step through each group and choose which copies to delete
    #[arg(long)]
    pub review: bool,

    /// Print the scan as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// Execute the duplicates command.
pub async fn execute(args: DuplicatesArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(max_distance) = args.max_distance {
        config.duplicates.max_distance = max_distance;
    }
    let shiki = Shiki::new(config)?;

    let mut session = ReviewSession::new();
    session.begin_scan();

    let (pb, progress) = progress_bar();
    let options = ScanOptions {
        workers: args.parallel,
        force: args.force,
        cancel: Some(cancel_on_ctrl_c()),
        progress: Some(progress),
    };
    let scan = shiki.scan_duplicates(&args.folder, options).await;
    pb.finish_and_clear();
    let scan = scan?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&scan)?);
    } else {
        print_groups(scan.groups.as_slice());
        eprintln!(
            "{} images, {} duplicate groups, {} skipped ({} from cache, {:.1}s)",
            scan.total_processed,
            scan.groups.len(),
            scan.skipped,
            scan.cached,
            scan.elapsed_seconds
        );
    }

    session.finish_scan(scan.groups)?;
    if !args.review || session.state() == ReviewState::Completed {
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("--review needs an interactive terminal");
    }

    session.start_review()?;
    review(&shiki, &mut session)
}

fn print_groups(groups: &[DuplicateGroup]) {
    let dim = Style::new().dim();
    for (i, group) in groups.iter().enumerate() {
        println!("Group {} ({} images)", i + 1, group.len());
        for pair in group.pairs() {
            println!(
                "  {}  {}  {}",
                pair.left.display(),
                pair.right.display(),
                dim.apply_to(format!("similarity {:.3}", pair.similarity))
            );
        }
    }
}

/// Walk the groups, deleting the chosen members from disk.
fn review(shiki: &Shiki, session: &mut ReviewSession) -> anyhow::Result<()> {
    let theme = shiki_theme();
    let total = session.groups().len();
    let mut deleted = 0usize;

    while let ReviewState::Reviewing(index) = session.state() {
        let Some(group) = session.current() else {
            break;
        };
        heading(&format!("Group {} of {}", index + 1, total));

        let paths = group.paths();
        let mut items = vec!["Keep all (skip)".to_string()];
        items.extend(group.members().iter().map(|m| {
            format!("Delete {} ({})", m.path.display(), format_size(m.size))
        }));

        let choice = handle_interrupt(
            Select::with_theme(&theme)
                .with_prompt("Which copy should go?")
                .items(&items)
                .default(0)
                .interact_opt(),
        )?;

        match choice {
            None => {
                eprintln!("Review stopped.");
                break;
            }
            Some(0) => session.skip()?,
            Some(n) => {
                let path = &paths[n - 1];
                delete_member(shiki, session, path)?;
                deleted += 1;
            }
        }
    }

    eprintln!("Deleted {deleted} images.");
    Ok(())
}

fn delete_member(shiki: &Shiki, session: &mut ReviewSession, path: &Path) -> anyhow::Result<()> {
    if !shiki.delete_image(path)? {
        tracing::warn!("{:?} was already gone", path);
    }
    match session.delete(path)? {
        DeleteOutcome::Shrunk { remaining } => {
            eprintln!("Deleted {}, {} copies left in this group", path.display(), remaining)
        }
        DeleteOutcome::Retired => eprintln!("Deleted {}", path.display()),
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
