use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::cursor;
use crossterm::event::{self, DisableBracketedPaste, EnableBracketedPaste};
use crossterm::terminal;
use directories::ProjectDirs;
use inkveil_core::chapters::chapter_summary;
use inkveil_core::{
    ChapterIndexer, Command, ContentLoader, Document, DocumentId, FileKeyValueStore,
    HistorySort, KeyValueStore, Reader, ReaderConfig, ReaderEvent, RestorationCoordinator,
    RestoreSource, RevealState, SessionStore, SharedReader,
};
use inkveil_loader::PlainTextLoader;
use inkveil_tty::{DrawParams, EventMapper, StatusLine, SurfaceRenderer, TerminalBuffer, UiEvent};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "inkveil",
    version,
    about = "Reveal a text one keystroke at a time",
    args_conflicts_with_subcommands = true
)]
struct Args {
    /// Config file [default: <config dir>/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding sessions, history and logs
    #[arg(long, global = true, env = "INKVEIL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Characters revealed per keystroke (1-100)
    #[arg(short = 'c', long, global = true)]
    chunk_size: Option<usize>,

    /// Text file to read; resumes the last document when omitted
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Read FILE, or resume the last document
    Read { file: Option<PathBuf> },
    /// List the chapters detected in FILE
    Chapters {
        file: PathBuf,
        /// Print the opening of each chapter
        #[arg(long)]
        summary: bool,
    },
    /// Show reading history
    History {
        #[arg(long, value_enum, default_value_t = SortKey::LastAccessed)]
        sort: SortKey,
        /// Only entries whose title contains this text
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Forget a history entry and its saved position
    Forget { id: String },
    /// Forget every history entry
    ClearHistory,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortKey {
    LastAccessed,
    Title,
    Progress,
    CreatedAt,
}

impl From<SortKey> for HistorySort {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::LastAccessed => HistorySort::LastAccessed,
            SortKey::Title => HistorySort::Title,
            SortKey::Progress => HistorySort::Progress,
            SortKey::CreatedAt => HistorySort::CreatedAt,
        }
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), EnableBracketedPaste)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableBracketedPaste, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let project_dirs = ProjectDirs::from("net", "inkveil", "inkveil");
    let data_dir = match (&args.data_dir, &project_dirs) {
        (Some(dir), _) => dir.clone(),
        (None, Some(dirs)) => dirs.data_local_dir().to_path_buf(),
        (None, None) => return Err(anyhow!("unable to resolve platform data directories")),
    };
    let config_path = match (&args.config, &project_dirs) {
        (Some(path), _) => path.clone(),
        (None, Some(dirs)) => dirs.config_dir().join("config.toml"),
        (None, None) => data_dir.join("config.toml"),
    };

    let _log_guard = init_logging(&data_dir.join("logs"))?;
    let mut config = ReaderConfig::load(&config_path)?;
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
        config = config.validated();
    }

    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(data_dir.join("state"))?);
    let sessions = SessionStore::open(kv, config.history.clone())?;

    match args.command {
        Some(Mode::Read { file }) => run_reader(config, sessions, file).await,
        None => run_reader(config, sessions, args.file).await,
        Some(Mode::Chapters { file, summary }) => print_chapters(&config, &file, summary).await,
        Some(Mode::History {
            sort,
            search,
            limit,
        }) => print_history(&sessions, sort, search.as_deref(), limit),
        Some(Mode::Forget { id }) => forget(sessions, &id),
        Some(Mode::ClearHistory) => {
            let mut sessions = sessions;
            sessions.clear_history()?;
            println!("history cleared");
            Ok(())
        }
    }
}

async fn print_chapters(config: &ReaderConfig, path: &Path, summary: bool) -> Result<()> {
    let loaded = PlainTextLoader::new()
        .load(path)
        .await
        .with_context(|| format!("failed to open {:?}", path))?;
    let document = Document::from_loaded(loaded);
    let chapters = ChapterIndexer::new(config.chapters.clone()).index(document.content());
    if chapters.is_empty() {
        println!("no chapters detected");
        return Ok(());
    }
    for chapter in &chapters {
        println!(
            "{:>4}  {:>9}  {}",
            chapter.index + 1,
            chapter.start_position,
            chapter.title
        );
        if summary {
            println!("                 {}", chapter_summary(document.content(), chapter));
        }
    }
    Ok(())
}

fn print_history(
    sessions: &SessionStore,
    sort: SortKey,
    search: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let mut entries = sessions.sorted(sort.into());
    if let Some(keyword) = search {
        let matching: Vec<DocumentId> = sessions
            .search(keyword)
            .iter()
            .map(|entry| entry.document_id)
            .collect();
        entries.retain(|entry| matching.contains(&entry.document_id));
    }
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    if entries.is_empty() {
        println!("no reading history");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:>5.1}%{}  {}  {}  {}",
            entry.document_id,
            entry.progress.percentage,
            if entry.is_completed { "*" } else { " " },
            entry.last_accessed_at.format("%Y-%m-%d %H:%M"),
            entry.title,
            entry.file_path.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn forget(mut sessions: SessionStore, id: &str) -> Result<()> {
    let document_id =
        DocumentId::parse_str(id).with_context(|| format!("{:?} is not a document id", id))?;
    if !sessions.remove_history(document_id)? {
        bail!("no history entry for {}", document_id);
    }
    println!("forgot {}", document_id);
    Ok(())
}

async fn run_reader(config: ReaderConfig, sessions: SessionStore, file: Option<PathBuf>) -> Result<()> {
    let loader = Arc::new(PlainTextLoader::new());
    let reader = Reader::new(config, sessions, TerminalBuffer::new()).into_shared();
    let coordinator =
        RestorationCoordinator::new(reader.clone(), Some(loader.clone() as Arc<dyn ContentLoader>));

    match file {
        Some(path) => open_file(&reader, &coordinator, loader.as_ref(), &path).await?,
        None => {
            let current = reader.lock().sessions().load_current_document()?;
            let Some(current) = current else {
                bail!("nothing to resume, pass a FILE to start reading");
            };
            let session = reader.lock().sessions_mut().session(current.id)?;
            let outcome = coordinator
                .restore(RestoreSource::from_current(current, session))
                .await?;
            info!(document_id = %outcome.document_id, position = outcome.position, "resumed last document");
        }
    }

    let started = Instant::now();
    event_loop(&reader)?;

    let mut guard = reader.lock();
    if let Err(err) = guard.save_progress() {
        warn!(?err, "failed to save progress on exit");
        eprintln!("failed to save progress: {err:#}");
    }
    let statistics = guard.statistics();
    if statistics.revealed_chars > 0 {
        let elapsed = statistics.duration(Instant::now());
        println!(
            "revealed {} characters in {}s ({} chars/min), session open {}s",
            statistics.revealed_chars,
            elapsed.as_secs(),
            statistics.chars_per_minute(Instant::now()),
            started.elapsed().as_secs()
        );
    }
    Ok(())
}

/// Known files resume through restoration; unknown ones are a fresh load.
async fn open_file(
    reader: &SharedReader<TerminalBuffer>,
    coordinator: &RestorationCoordinator<TerminalBuffer>,
    loader: &PlainTextLoader,
    path: &Path,
) -> Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("failed to resolve path for {:?}", path))?;
    let known = reader.lock().sessions().find_by_path(&path).cloned();
    if let Some(entry) = known {
        let session = reader.lock().sessions_mut().session(entry.document_id)?;
        let source = RestoreSource::from(&entry).with_session(session);
        match coordinator.restore(source).await {
            Ok(outcome) => {
                info!(document_id = %outcome.document_id, position = outcome.position, "resumed from history");
                return Ok(());
            }
            Err(err) => warn!(?err, path = ?path, "restore failed, loading from scratch"),
        }
    }

    let loaded = loader
        .load(&path)
        .await
        .with_context(|| format!("failed to open {:?}", path))?;
    reader
        .lock()
        .load_document(Document::from_loaded(loaded), Some(path))
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

fn event_loop(reader: &SharedReader<TerminalBuffer>) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut renderer = SurfaceRenderer::new(io::stdout());
    renderer.clear_all()?;
    let mut mapper = EventMapper::new();
    let mut size = terminal::size()?;
    let mut message: Option<String> = None;
    let mut dirty = true;

    loop {
        {
            let mut guard = reader.lock();
            if guard.has_deferred() {
                guard.run_deferred();
            }
            if let Err(err) = guard.tick(Instant::now()) {
                warn!(?err, "autosave failed");
                message = Some("autosave failed".to_string());
                dirty = true;
            }
            for event in guard.drain_events() {
                update_message(&mut message, &event);
                dirty = true;
            }
            if guard.buffer_mut().take_dirty() {
                dirty = true;
            }
            if dirty {
                redraw(&mut renderer, &guard, mapper.pending_input(), message.as_deref(), size)?;
                dirty = false;
            }
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);
        match handle_event(ui_event, reader, &mut size, &mut message) {
            LoopAction::Continue => {}
            LoopAction::ContinueRedraw => dirty = true,
            LoopAction::Quit => break,
        }
    }

    renderer.clear_all()?;
    Ok(())
}

/// A failed command is reported on the status line; reading goes on.
fn handle_event(
    event: UiEvent,
    reader: &SharedReader<TerminalBuffer>,
    size: &mut (u16, u16),
    message: &mut Option<String>,
) -> LoopAction {
    let mut reader = reader.lock();
    match event {
        UiEvent::Keystroke(key) => {
            reader.on_keystroke(key);
            LoopAction::Continue
        }
        UiEvent::Paste(text) => {
            // The surface is read-only, so an accepted paste has nowhere to go.
            reader.on_paste(&text);
            LoopAction::Continue
        }
        UiEvent::Command(Command::StartReading) if reader.state() == RevealState::Paused => {
            reader.resume_reading();
            LoopAction::ContinueRedraw
        }
        UiEvent::Command(command) => {
            if let Err(err) = reader.apply(command.clone()) {
                warn!(?err, ?command, "command failed");
                *message = Some(format!("{command:?} failed: {err:#}"));
            }
            LoopAction::ContinueRedraw
        }
        UiEvent::Resize { columns, rows } => {
            *size = (columns, rows);
            LoopAction::ContinueRedraw
        }
        UiEvent::PromptChanged => LoopAction::ContinueRedraw,
        UiEvent::Quit => LoopAction::Quit,
        UiEvent::None => LoopAction::Continue,
    }
}

fn update_message(message: &mut Option<String>, event: &ReaderEvent) {
    let text = match event {
        ReaderEvent::PositionChanged { .. } => {
            *message = None;
            return;
        }
        ReaderEvent::Completed(_) => "finished".to_string(),
        ReaderEvent::PositionClamped { requested, clamped } => {
            format!("{requested} is past the end, moved to {clamped}")
        }
        ReaderEvent::CompositionMismatch { position } => {
            format!("input did not match the text at {position}")
        }
        ReaderEvent::ChunkSizeRejected(size) => format!("chunk size {size} is out of range"),
        ReaderEvent::PercentageRejected(percent) => format!("{percent}% is out of range"),
        ReaderEvent::PasteRejected => "paste is disabled while reading".to_string(),
        ReaderEvent::DocumentRestored { position, .. } => format!("resumed at {position}"),
        _ => return,
    };
    *message = Some(text);
}

fn redraw(
    renderer: &mut SurfaceRenderer<io::Stdout>,
    reader: &Reader<TerminalBuffer>,
    prompt: Option<String>,
    message: Option<&str>,
    (columns, rows): (u16, u16),
) -> Result<()> {
    let engine = reader.engine();
    let status = StatusLine {
        title: reader.document().map(Document::title),
        state: reader.state(),
        position: reader.position(),
        total: engine.total_length(),
        chapter: reader.current_chapter().map(|chapter| chapter.title.as_str()),
        chunk_size: engine.chunk_size(),
        output_mode: engine.output_mode(),
        prompt,
        message,
    };
    renderer.begin_sync_update()?;
    renderer.draw(reader.buffer(), &status.to_string(), DrawParams::clamped(columns, rows))?;
    renderer.end_sync_update()
}

fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "inkveil.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
