//! chapterflow-sim - drive a reader session from a YAML script

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};
use serde::Deserialize;
use simplelog::{Config, LevelFilter, WriteLogger};

use chapterflow::test_utils::{MemorySource, ScriptedList, drain_events, pump};
use chapterflow::{
    ChapterId, ReadableChapter, ReaderCoordinator, ReaderEvent, ReaderSettings, ReadingMode, Size,
    VirtualizedList,
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "chapterflow-sim")]
#[command(version, about = "Replay a scroll script against the chapter engine", long_about = None)]
#[command(after_help = "EXAMPLES:
    chapterflow-sim --session demo.yaml
    chapterflow-sim --session demo.yaml --settings reader.yaml
    chapterflow-sim --session demo.yaml --log-level trace --log-file sim.log")]
struct Cli {
    /// Session script (YAML)
    #[arg(short, long, value_name = "FILE")]
    session: PathBuf,

    /// Reader settings for sessions without their own `settings` block
    /// [default: the user config file]
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Where to write the log
    #[arg(long, value_name = "FILE", default_value = "chapterflow.log")]
    log_file: PathBuf,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "debug")]
    log_level: LevelFilter,
}

#[derive(Debug, Deserialize)]
struct SessionChapter {
    id: String,
    pages: usize,
    #[serde(default)]
    fail: bool,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Step {
    ScrollBy(f64),
    ScrollToStart,
    ScrollToEnd,
    Jump { chapter: String, page: usize },
    NextChapter,
    PreviousChapter,
    Mode(ReadingMode),
    Scrolling(bool),
    Fail { chapter: String, fail: bool },
    Retry,
    ClearError,
    WaitMs(u64),
}

#[derive(Debug, Deserialize)]
struct Session {
    chapters: Vec<SessionChapter>,
    starting_chapter: String,
    #[serde(default)]
    initial_page: usize,
    #[serde(default = "default_item_extent")]
    item_extent: f64,
    #[serde(default = "default_viewport")]
    viewport: (f64, f64),
    #[serde(default)]
    settings: Option<ReaderSettings>,
    #[serde(default)]
    script: Vec<Step>,
}

fn default_item_extent() -> f64 {
    100.0
}

fn default_viewport() -> (f64, f64) {
    (100.0, 100.0)
}

impl Session {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read session {}", path.display()))?;
        let session: Session = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse session {}", path.display()))?;
        if session.chapters.is_empty() {
            bail!("session has no chapters");
        }
        Ok(session)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Simulation failed: {e:?}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let file = File::create(&cli.log_file)
        .with_context(|| format!("failed to create log file {}", cli.log_file.display()))?;
    WriteLogger::init(cli.log_level, Config::default(), file)?;
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let path = cli.session.as_path();
    let session = Session::load(path)?;
    info!("Starting simulation from {path:?}");

    let source = Arc::new(MemorySource::default());
    let mut chapters = Vec::with_capacity(session.chapters.len());
    for (index, entry) in session.chapters.iter().enumerate() {
        source.set_pages(&entry.id, entry.pages);
        source.set_failing(&entry.id, entry.fail);
        let chapter = ReadableChapter::new(entry.id.as_str(), index);
        chapters.push(match &entry.title {
            Some(title) => chapter.with_title(title.as_str()),
            None => chapter,
        });
    }

    let settings = match session.settings.clone() {
        Some(settings) => settings,
        None => host_settings(cli.settings.as_deref())?,
    };
    let (width, height) = session.viewport;
    let list = ScriptedList::new(
        settings.reading_mode,
        session.item_extent,
        Size::new(width, height),
    );
    let (tx, rx) = flume::unbounded();

    let mut reader = ReaderCoordinator::with_settings(
        chapters,
        source.clone(),
        ChapterId::new(session.starting_chapter.as_str()),
        list,
        tx,
        settings,
    )?
    .with_initial_page(session.initial_page);

    reader.start();
    settle(&mut reader);
    print_events(&drain_events(&rx));

    for (n, step) in session.script.iter().enumerate() {
        println!("-- step {n}: {step:?}");
        apply_step(&mut reader, &source, step);
        settle(&mut reader);
        print_events(&drain_events(&rx));
        println!(
            "   state={} chapter={} page={} items={} offset={}",
            reader.state().name(),
            reader
                .current_chapter()
                .map_or("-", ChapterId::as_str),
            reader
                .current_page()
                .map_or_else(|| "-".to_string(), |p| p.to_string()),
            reader.item_count(),
            reader.list().offset(),
        );
    }

    // Let trailing debounced notifications fire before exit
    if let Some(deadline) = reader.next_deadline() {
        std::thread::sleep(deadline.saturating_duration_since(std::time::Instant::now()));
        reader.poll();
        print_events(&drain_events(&rx));
    }

    reader.shutdown();
    info!("Simulation finished");
    Ok(())
}

/// An explicit settings file must load. The user config file is optional.
fn host_settings(explicit: Option<&Path>) -> Result<ReaderSettings> {
    if let Some(path) = explicit {
        return ReaderSettings::load_from_path(path);
    }
    match ReaderSettings::default_path() {
        Some(path) if path.exists() => {
            info!("Using reader settings from {path:?}");
            Ok(ReaderSettings::load_or_default(&path))
        }
        _ => Ok(ReaderSettings::default()),
    }
}

fn apply_step(reader: &mut ReaderCoordinator<ScriptedList>, source: &MemorySource, step: &Step) {
    match step {
        Step::ScrollBy(delta) => {
            reader.list_mut().scroll_by(*delta);
            reader.handle_scroll();
        }
        Step::ScrollToStart => {
            reader.list_mut().scroll_to_reading_start();
            reader.handle_scroll();
        }
        Step::ScrollToEnd => {
            reader.list_mut().scroll_to_reading_end();
            reader.handle_scroll();
        }
        Step::Jump { chapter, page } => {
            if let Err(e) = reader.jump_to_page(*page, &ChapterId::new(chapter.as_str()), false) {
                println!("   jump rejected: {e}");
            }
        }
        Step::NextChapter => {
            reader.next_chapter();
        }
        Step::PreviousChapter => {
            reader.previous_chapter();
        }
        Step::Mode(mode) => {
            reader.list_mut().queue_layout(*mode);
            reader.set_reading_mode(*mode);
        }
        Step::Scrolling(is_scrolling) => reader.set_scrolling(*is_scrolling),
        Step::Fail { chapter, fail } => source.set_failing(chapter, *fail),
        Step::Retry => {
            reader.retry();
        }
        Step::ClearError => {
            reader.clear_error();
        }
        Step::WaitMs(ms) => {
            std::thread::sleep(Duration::from_millis(*ms));
            reader.poll();
        }
    }
}

fn settle<L: VirtualizedList>(reader: &mut ReaderCoordinator<L>) {
    if !pump(reader, FETCH_TIMEOUT) {
        error!("Fetch did not finish within {FETCH_TIMEOUT:?}");
    }
}

fn print_events(events: &[ReaderEvent]) {
    for event in events {
        match event {
            ReaderEvent::PageChanged(ctx) => println!(
                "   page    {}:{}/{} ({:?})",
                ctx.chapter_id, ctx.page, ctx.total_pages, ctx.reason
            ),
            ReaderEvent::ChapterChanged(ctx) => {
                println!("   chapter {} ({:?})", ctx.chapter_id, ctx.reason);
            }
            ReaderEvent::ScrollStateChanged { is_scrolling } => {
                println!("   scrolling={is_scrolling}");
            }
            ReaderEvent::Error(err) => println!("   error   {err}"),
            ReaderEvent::ChapterLoadComplete {
                chapter,
                page_count,
            } => println!("   loaded  {chapter} ({page_count} pages)"),
        }
    }
}
