use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};
use serde::Serialize;
use tripmark::core::{Category, ContentType, LineTag, TimeBlock, TimeSlot};
use tripmark::parser::lines;
use tripmark::projectors::calendar_projector::{self, ExportOptions};
use tripmark::storage::{FsTextSource, TextSource};
use tripmark::{classify_line, detect_content_type, render_as, render_plan};

const TEXT_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

#[derive(Debug, Parser)]
#[command(
    name = "tripmark",
    about = "Render AI travel plans as styled markup and export itineraries to calendars",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Classify every line of a plan file and print the result.
    Parse(ParseArgs),

    /// Report the content type each plan file is detected as.
    Detect(DetectArgs),

    /// Render plan files as self-contained styled markup.
    Render(RenderArgs),

    /// Render all three categories of a planning-API JSON payload.
    Plan(PlanArgs),

    /// Export an itinerary as an iCalendar file.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Plan files or directories containing plan files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a line listing.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct DetectArgs {
    /// Plan files or directories containing plan files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of one line per file.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Plan files or directories containing plan files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Renderer to use; `auto` detects it from the text.
    #[arg(long = "as", value_enum, default_value_t = RenderKind::Auto)]
    kind: RenderKind,
    /// Write the markup to this path (single input only).
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write `<name>.html` next to each input instead of printing.
    #[arg(long)]
    write: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RenderKind {
    Auto,
    Itinerary,
    Packing,
    Budget,
    Generic,
}

impl RenderKind {
    fn resolve(self, text: &str) -> ContentType {
        match self {
            RenderKind::Auto => detect_content_type(text),
            RenderKind::Itinerary => ContentType::Itinerary,
            RenderKind::Packing => ContentType::PackingList,
            RenderKind::Budget => ContentType::Budget,
            RenderKind::Generic => ContentType::Unknown,
        }
    }
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// JSON payload with `itinerary`, `packing_list` and `estimated_budget` fields.
    payload: PathBuf,
    /// Write one `.html` file per category into this directory instead of printing JSON.
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Itinerary file to export.
    input: PathBuf,
    /// Date of day 1 (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    today: Option<NaiveDate>,
    /// Destination named in event descriptions and the file name.
    #[arg(long)]
    destination: Option<String>,
    /// JSON export options (destination, product_id, schedule).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override a time block's window, e.g. `morning=08:00-10:30`. Repeatable.
    #[arg(long = "slot", value_parser = parse_slot_override)]
    slots: Vec<SlotOverride>,
    /// Write the calendar to this path instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write the calendar next to the input under its suggested file name.
    #[arg(long)]
    write: bool,
    /// Emit the projected events as JSON instead of calendar text.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SlotOverride {
    block: TimeBlock,
    slot: TimeSlot,
}

fn parse_slot_override(raw: &str) -> Result<SlotOverride, String> {
    let (block, slot) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected BLOCK=HH:MM-HH:MM, got {:?}", raw))?;
    let block: TimeBlock = block.parse().map_err(|e| format!("{e}"))?;
    let slot: TimeSlot = slot.parse().map_err(|e| format!("{e}"))?;
    Ok(SlotOverride { block, slot })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Detect(args) => handle_detect(args),
        Commands::Render(args) => handle_render(args),
        Commands::Plan(args) => handle_plan(args),
        Commands::Export(args) => handle_export(args),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

#[derive(Debug, Serialize)]
struct ParsedLine {
    line: usize,
    tag: LineTag,
}

#[derive(Debug, Serialize)]
struct ParsedFile {
    path: PathBuf,
    lines: Vec<ParsedLine>,
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no plan files found in the provided inputs");
    }

    let source = FsTextSource;
    let mut parsed = Vec::new();
    for path in expanded {
        debug!("parsing {:?}", path);
        let text = source.read_text(&path)?;
        let tags = lines(&text)
            .enumerate()
            .map(|(idx, line)| ParsedLine {
                line: idx + 1,
                tag: classify_line(line.text),
            })
            .collect();
        parsed.push(ParsedFile { path, lines: tags });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
    } else {
        for file in parsed {
            println!("== {} ==", file.path.display());
            for line in file.lines {
                println!("{:>4}  {:?}", line.line, line.tag);
            }
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct Detection {
    path: PathBuf,
    content_type: ContentType,
}

fn handle_detect(args: DetectArgs) -> Result<()> {
    let DetectArgs { inputs, json } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no plan files found in the provided inputs");
    }

    let source = FsTextSource;
    let mut detections = Vec::new();
    for path in expanded {
        let text = source.read_text(&path)?;
        detections.push(Detection {
            content_type: detect_content_type(&text),
            path,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&detections)?);
    } else {
        for detection in detections {
            println!("{}\t{}", detection.content_type, detection.path.display());
        }
    }
    Ok(())
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let RenderArgs {
        inputs,
        kind,
        output,
        write,
    } = args;
    if write && output.is_some() {
        anyhow::bail!("--write cannot be combined with --output");
    }
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no plan files found in the provided inputs");
    }
    if output.is_some() && expanded.len() > 1 {
        anyhow::bail!("--output needs exactly one input file, got {}", expanded.len());
    }

    let source = FsTextSource;
    let mut first = true;
    for path in &expanded {
        let text = source.read_text(path)?;
        let content_type = kind.resolve(&text);
        debug!("rendering {:?} as {}", path, content_type);
        let markup = render_as(content_type, &text);

        if write {
            let target = path.with_extension("html");
            fs::write(&target, markup.as_bytes())
                .with_context(|| format!("writing {:?}", target))?;
            info!("wrote {:?}", target);
        } else if let Some(target) = &output {
            fs::write(target, markup.as_bytes())
                .with_context(|| format!("writing {:?}", target))?;
            info!("wrote {:?}", target);
        } else {
            if !first {
                println!();
            }
            if expanded.len() > 1 {
                println!("== {} ==", path.display());
            }
            first = false;
            println!("{markup}");
        }
    }
    Ok(())
}

fn handle_plan(args: PlanArgs) -> Result<()> {
    let PlanArgs { payload, out_dir } = args;
    let plan = FsTextSource.read_plan(&payload)?;
    for category in Category::ALL {
        if plan.raw(category).is_none_or(|text| text.trim().is_empty()) {
            warn!("{} missing from {:?}; using placeholder", category.file_stem(), payload);
        }
    }
    let rendered = render_plan(&plan);

    match out_dir {
        Some(dir) => {
            fs::create_dir_all(&dir).with_context(|| format!("creating directory {:?}", dir))?;
            for category in Category::ALL {
                let target = dir.join(format!("{}.html", category.file_stem()));
                fs::write(&target, rendered.get(category).as_bytes())
                    .with_context(|| format!("writing {:?}", target))?;
                println!("Wrote {:?}", target);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&rendered)?),
    }
    Ok(())
}

fn handle_export(args: ExportArgs) -> Result<()> {
    let ExportArgs {
        input,
        today,
        destination,
        config,
        slots,
        output,
        write,
        json,
    } = args;
    if write && output.is_some() {
        anyhow::bail!("--write cannot be combined with --output");
    }

    let source = FsTextSource;
    let text = source.read_text(&input)?;
    let opts = load_export_options(&source, config.as_deref(), destination, &slots)?;
    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let export = calendar_projector::export_calendar(&text, today, &opts);
    if export.events.is_empty() {
        warn!("no dated activities found in {:?}", input);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&export.events)?);
        return Ok(());
    }

    let target = if write {
        Some(resolve_write_directory(&input)?.join(&export.filename))
    } else {
        output
    };
    match target {
        Some(path) => {
            fs::write(&path, export.content.as_bytes())
                .with_context(|| format!("writing {:?}", path))?;
            println!(
                "Wrote {} events ({}) to {:?}",
                export.events.len(),
                export.mime_type,
                path
            );
        }
        None => println!("{}", export.content),
    }
    Ok(())
}

fn load_export_options(
    source: &impl TextSource,
    config: Option<&Path>,
    destination: Option<String>,
    slots: &[SlotOverride],
) -> Result<ExportOptions> {
    let mut opts = match config {
        Some(path) => {
            let raw = source.read_text(path)?;
            ExportOptions::from_json_str(&raw)
                .with_context(|| format!("loading export options from {:?}", path))?
        }
        None => ExportOptions::default(),
    };
    if let Some(destination) = destination {
        opts.destination = Some(destination);
    }
    for SlotOverride { block, slot } in slots {
        opts.schedule.set_slot(*block, *slot);
    }
    opts.schedule.validate()?;
    Ok(opts)
}

fn resolve_write_directory(input: &Path) -> Result<PathBuf> {
    let canonical =
        fs::canonicalize(input).with_context(|| format!("resolving path {:?}", input))?;
    let metadata = fs::metadata(&canonical)
        .with_context(|| format!("reading metadata for {:?}", canonical))?;
    if metadata.is_dir() {
        return Ok(canonical);
    }
    match canonical.parent() {
        Some(parent) => Ok(parent.to_path_buf()),
        None => anyhow::bail!("file {:?} has no parent directory", canonical),
    }
}

fn is_plan_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext))
}

fn collect_plan_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    visit_dir(dir, &mut out, &mut visited)?;
    out.sort();
    out.dedup();
    Ok(out)
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            debug!("scanning directory {:?}", canonical);
            for file in collect_plan_files(&canonical)? {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if !is_plan_file(&canonical) {
                anyhow::bail!(
                    "{:?} is not a plan file (expected .md, .markdown or .txt)",
                    canonical
                );
            }
            debug!("adding file {:?}", canonical);
            if visited.insert(canonical.clone()) {
                out.push(canonical);
            }
        }
    }
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_plan_file(&canonical) {
        debug!("found plan file {:?}", canonical);
        out.push(canonical);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn expand_inputs_collects_plan_files_recursively() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        let nested = root.join("trips").join("2025");
        fs::create_dir_all(&nested).expect("mkdir nested");
        fs::write(root.join("chicago.md"), "## Day 1: Go").expect("write md");
        fs::write(root.join("notes.txt"), "Pack light").expect("write txt");
        fs::write(root.join("plan.json"), "{}").expect("write json");
        fs::write(nested.join("lisbon.markdown"), "# Lisbon Itinerary").expect("write markdown");

        let found = expand_inputs(&[root.to_path_buf()]).expect("expand");
        let names: Vec<_> = found
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"chicago.md"));
        assert!(names.contains(&"notes.txt"));
        assert!(names.contains(&"lisbon.markdown"));
    }

    #[test]
    fn expand_inputs_rejects_unsupported_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let payload = tmp.path().join("plan.json");
        fs::write(&payload, "{}").expect("write json");
        let err = expand_inputs(&[payload]).expect_err("json is not a plan file");
        assert!(err.to_string().contains("not a plan file"));
    }

    #[test]
    fn expand_inputs_deduplicates_repeated_paths() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("chicago.md");
        fs::write(&file, "## Day 1: Go").expect("write md");
        let found = expand_inputs(&[file.clone(), tmp.path().to_path_buf()]).expect("expand");
        assert_eq!(found, vec![fs::canonicalize(&file).expect("canonical")]);
    }

    #[test]
    fn resolve_write_directory_uses_parent_of_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("chicago.md");
        fs::write(&file, "## Day 1: Go").expect("write md");

        let resolved = resolve_write_directory(&file).expect("resolve");
        assert_eq!(resolved, fs::canonicalize(tmp.path()).expect("canonical root"));
    }

    #[test]
    fn slot_overrides_parse_block_and_window() {
        let parsed = parse_slot_override("morning=08:00-10:30").expect("override");
        assert_eq!(parsed.block, TimeBlock::Morning);
        assert_eq!(parsed.slot, "08:00-10:30".parse::<TimeSlot>().expect("slot"));
        assert!(parse_slot_override("night=20:00-23:00").is_err());
        assert!(parse_slot_override("evening=21:00-18:00").is_err());
        assert!(parse_slot_override("evening").is_err());
    }

    #[test]
    fn export_options_layer_config_then_flags() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = tmp.path().join("export.json");
        fs::write(
            &config,
            r#"{"destination": "Paris", "schedule": {"morning": {"start": "08:00", "end": "10:00"}}}"#,
        )
        .expect("write config");

        let from_config = load_export_options(&FsTextSource, Some(config.as_path()), None, &[])
            .expect("options");
        assert_eq!(from_config.destination.as_deref(), Some("Paris"));
        assert_eq!(
            from_config.schedule.morning,
            "08:00-10:00".parse::<TimeSlot>().expect("slot")
        );

        let evening = parse_slot_override("evening=19:00-22:00").expect("override");
        let layered = load_export_options(
            &FsTextSource,
            Some(config.as_path()),
            Some("Lyon".to_string()),
            &[evening],
        )
        .expect("options");
        assert_eq!(layered.destination.as_deref(), Some("Lyon"));
        assert_eq!(layered.schedule.evening, evening.slot);
        assert_eq!(layered.schedule.morning, from_config.schedule.morning);
    }

    #[test]
    fn render_kind_overrides_detection() {
        let text = "# Packing List\n## Clothing\n- Coat";
        assert_eq!(RenderKind::Auto.resolve(text), ContentType::PackingList);
        assert_eq!(RenderKind::Generic.resolve(text), ContentType::Unknown);
        assert_eq!(RenderKind::Budget.resolve(text), ContentType::Budget);
    }
}
