//! CLI binary for journal2pdf.
//!
//! A thin shim over [`journal2pdf::Session`]: flags map to `ExportConfig`
//! and to selection actions, dialogs are printed to stderr.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use journal2pdf::{
    inspect, Capabilities, CheckState, Dialog, DialogKind, ExportConfig, NodeId, PaperSize,
    ProgressCallback, RenderProgressCallback, SelectionModel, SelectionObserver, Session,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over journals, with one log line per finished journal.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Assembling…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_render_start(&self, journals: usize, blocks: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} journals  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(journals as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Laying out");
        self.bar.println(format!(
            "{} {}",
            bold("◆"),
            bold(&format!("Rendering {journals} journal(s), {blocks} blocks…"))
        ));
    }

    fn on_journal_start(&self, _index: usize, _total: usize, title: &str) {
        self.bar.set_message(title.to_string());
    }

    fn on_journal_complete(&self, index: usize, total: usize, title: &str) {
        self.bar.println(format!(
            "  {} Journal {:>2}/{:<2}  {}",
            green("✓"),
            index + 1,
            total,
            title
        ));
        self.bar.inc(1);
    }

    fn on_layout_complete(&self, pages: usize) {
        self.bar.set_prefix("Writing");
        self.bar.set_message(format!("{pages} pages"));
    }

    fn on_warning(&self, message: &str) {
        self.bar.println(format!("  {} {}", yellow("⚠"), dim(message)));
    }

    fn on_render_complete(&self, _pages: usize, _bytes: usize) {
        self.bar.finish_and_clear();
    }
}

// ── Selection logging ────────────────────────────────────────────────────────

/// Logs every selection change at debug level.
struct LoggingObserver;

impl SelectionObserver for LoggingObserver {
    fn selection_changed(&self, model: &SelectionModel, changed: &[NodeId]) {
        for &id in changed {
            debug!(
                "selection: {} {}",
                if model.is_included(id) { "+" } else { "-" },
                model.path(id).unwrap_or_default()
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Everything in one export
  journal2pdf journals.zip -o campaign.pdf

  # Several exports, A4, no divider pages
  journal2pdf lore.zip maps.zip --paper a4 --no-dividers -o world.pdf

  # Show the selection tree with paths
  journal2pdf journals.zip --list

  # Only two journals, minus one heading
  journal2pdf journals.zip --only "Bestiary" --only "Gazetteer" \
      --exclude "Bestiary/Dragons/Lair Actions" -o book.pdf

  # Inspect an export without rendering
  journal2pdf --inspect-only --json journals.zip

SELECTION PATHS:
  Journal, Journal/Page or Journal/Page/Heading, matched on labels
  (exact first, then case-insensitive). --only clears the selection and
  includes each path; --exclude is applied afterwards.

ENVIRONMENT VARIABLES:
  JOURNAL2PDF_*                Every flag, e.g. JOURNAL2PDF_PAPER=a4
  JOURNAL2PDF_SVG_RASTERISER   Path to rsvg-convert or resvg
  SVG_AUTO_RASTERISER          Same, read when the flag is unset
  RUST_LOG                     Override log filtering
"#;

/// Convert virtual-tabletop journal exports to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "journal2pdf",
    version,
    about = "Convert virtual-tabletop journal exports to PDF with a clickable table of contents",
    long_about = "Convert journal exports (ZIP archives, JSON files or unpacked export \
directories, single-journal or folder exports) into one PDF with a cover, a clickable \
table of contents, back links on every page, embedded images and tables.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Export files or directories. The first is opened, the rest are added.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output PDF path. Defaults to the first input's name with `.pdf`.
    #[arg(short, long, env = "JOURNAL2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Document title on the cover and in the PDF metadata.
    #[arg(long, env = "JOURNAL2PDF_TITLE")]
    title: Option<String>,

    /// Print the selection tree and exit.
    #[arg(long, env = "JOURNAL2PDF_LIST")]
    list: bool,

    /// Include only these paths (repeatable).
    #[arg(long, value_name = "PATH", env = "JOURNAL2PDF_ONLY", value_delimiter = ';')]
    only: Vec<String>,

    /// Exclude these paths (repeatable).
    #[arg(long, value_name = "PATH", env = "JOURNAL2PDF_EXCLUDE", value_delimiter = ';')]
    exclude: Vec<String>,

    /// Paper size.
    #[arg(long, env = "JOURNAL2PDF_PAPER", value_enum, default_value = "letter")]
    paper: PaperArg,

    /// Do not start each journal on a divider page.
    #[arg(long, env = "JOURNAL2PDF_NO_DIVIDERS")]
    no_dividers: bool,

    /// Start every journal page on a new PDF page.
    #[arg(long, env = "JOURNAL2PDF_PAGE_BREAKS")]
    page_breaks: bool,

    /// Leave tables out.
    #[arg(long, env = "JOURNAL2PDF_NO_TABLES")]
    no_tables: bool,

    /// Leave images out.
    #[arg(long, env = "JOURNAL2PDF_NO_IMAGES")]
    no_images: bool,

    /// No "Back to Table of Contents" links.
    #[arg(long, env = "JOURNAL2PDF_NO_BACK_LINKS")]
    no_back_links: bool,

    /// No page-number footers.
    #[arg(long, env = "JOURNAL2PDF_NO_PAGE_NUMBERS")]
    no_page_numbers: bool,

    /// Never rasterise SVG images, even if a rasteriser is installed.
    #[arg(long, env = "JOURNAL2PDF_NO_SVG")]
    no_svg: bool,

    /// Path to rsvg-convert or resvg.
    #[arg(long, value_name = "PATH", env = "JOURNAL2PDF_SVG_RASTERISER")]
    svg_rasteriser: Option<PathBuf>,

    /// Print export summaries only, no rendering.
    #[arg(long)]
    inspect_only: bool,

    /// Machine-readable JSON on stdout.
    #[arg(long, env = "JOURNAL2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "JOURNAL2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "JOURNAL2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "JOURNAL2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PaperArg {
    Letter,
    A4,
}

impl From<PaperArg> for PaperSize {
    fn from(v: PaperArg) -> Self {
        match v {
            PaperArg::Letter => PaperSize::Letter,
            PaperArg::A4 => PaperSize::A4,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let summaries = cli
            .inputs
            .iter()
            .map(|p| inspect(p).with_context(|| format!("Failed to inspect {}", p.display())))
            .collect::<Result<Vec<_>>>()?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summaries).context("Failed to serialise summary")?
            );
            return Ok(());
        }
        for s in &summaries {
            println!("Export:       {}", s.source.display());
            println!("Layout:       {:?}", s.layout);
            if let Some(ref t) = s.title {
                println!("Title:        {t}");
            }
            println!("Assets:       {}", s.asset_count);
            for j in &s.journals {
                println!(
                    "  {}  {} page(s), {} heading(s), {} image(s)",
                    bold(&j.title),
                    j.pages,
                    j.headings,
                    j.images
                );
            }
            for m in &s.missing_assets {
                println!("  {} missing asset: {m}", yellow("⚠"));
            }
            for w in &s.warnings {
                println!("  {} {w}", yellow("⚠"));
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RenderProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Load exports ─────────────────────────────────────────────────────
    let mut session = Session::new(config);
    session.subscribe(Arc::new(LoggingObserver));
    for (i, input) in cli.inputs.iter().enumerate() {
        let loaded = if i == 0 {
            session.open(input)
        } else {
            session.add(input)
        };
        if let Err(dialog) = loaded {
            report(&dialog, cli.quiet);
            bail!("Could not read {}", input.display());
        }
    }

    // ── Selection ────────────────────────────────────────────────────────
    if !cli.only.is_empty() {
        session.select_none();
        for path in &cli.only {
            apply(&mut session, path, true)?;
        }
    }
    for path in &cli.exclude {
        apply(&mut session, path, false)?;
    }

    if cli.list {
        let rows = session.tree_rows();
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("Failed to serialise tree")?
            );
        } else {
            for row in &rows {
                let mark = match row.state {
                    CheckState::Checked => green(row.mark()),
                    CheckState::Partial => yellow(row.mark()),
                    CheckState::Unchecked => dim(row.mark()),
                };
                println!("{}{} {}", "  ".repeat(row.depth), mark, row.label);
            }
        }
        return Ok(());
    }

    // ── Generate ─────────────────────────────────────────────────────────
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output(&cli.inputs[0]));
    let dialog = session.generate(&output_path);
    if dialog.is_error() {
        report(&dialog, cli.quiet);
        bail!("PDF generation failed");
    }

    let Some(rendered) = session.last_render() else {
        bail!("PDF generation produced no output");
    };

    if cli.json {
        let json = serde_json::json!({
            "output": output_path,
            "stats": rendered.stats,
            "toc": rendered.toc,
            "warnings": session.warnings().iter().chain(&rendered.warnings).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        for w in session.warnings() {
            eprintln!("  {} {}", yellow("⚠"), dim(&w.to_string()));
        }
        if !show_progress {
            for w in &rendered.warnings {
                eprintln!("  {} {}", yellow("⚠"), dim(&w.to_string()));
            }
        }
        let s = &rendered.stats;
        eprintln!(
            "{}  {} pages ({} TOC)  {} entries  {}ms  →  {}",
            if rendered.warnings.is_empty() {
                green("✔")
            } else {
                yellow("⚠")
            },
            s.total_pages,
            s.toc_pages,
            s.toc_entries,
            s.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        eprintln!(
            "   {} image(s) embedded  /  {} placeholder(s)",
            dim(&s.images_embedded.to_string()),
            dim(&s.image_placeholders.to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `ExportConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExportConfig> {
    let capabilities = if cli.no_svg {
        Capabilities::none()
    } else if cli.svg_rasteriser.is_some() {
        Capabilities::none().with_svg(svg_auto::probe(cli.svg_rasteriser.clone()))
    } else {
        Capabilities::detect()
    };
    debug!("SVG rasteriser: {:?}", capabilities.svg);

    let mut builder = ExportConfig::builder()
        .paper(cli.paper.into())
        .divider_pages(!cli.no_dividers)
        .page_break_per_page(cli.page_breaks)
        .include_tables(!cli.no_tables)
        .include_images(!cli.no_images)
        .back_to_toc_links(!cli.no_back_links)
        .page_numbers(!cli.no_page_numbers)
        .capabilities(capabilities);

    if let Some(ref title) = cli.title {
        builder = builder.title(title.as_str());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn apply(session: &mut Session, path: &str, included: bool) -> Result<()> {
    session
        .toggle_path(path, included)
        .map_err(|d| anyhow::anyhow!("{}", d.message))
        .with_context(|| format!("Invalid selection path '{path}' (see --list)"))
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "journals".to_string());
    PathBuf::from(format!("{stem}.pdf"))
}

fn report(dialog: &Dialog, quiet: bool) {
    match dialog.kind {
        DialogKind::Error => eprintln!("{} {}: {}", red("✘"), bold(&dialog.title), dialog.message),
        _ if quiet => {}
        DialogKind::Warning => eprintln!("{} {}: {}", yellow("⚠"), bold(&dialog.title), dialog.message),
        DialogKind::Info => eprintln!("{} {}: {}", green("✔"), bold(&dialog.title), dialog.message),
    }
    if !quiet {
        for line in &dialog.details {
            eprintln!("  {}", dim(line));
        }
    }
}
