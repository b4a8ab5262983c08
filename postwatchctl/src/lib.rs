use std::fmt::Write as _;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use postwatch_core::browser::BrowserError;
use postwatch_core::state::{JsonFileStore, StateError, WatermarkStore};
use postwatch_core::{
    load_monitor_config, ChannelSink, CrawlReport, MonitorConfig, MonitorMetrics, MonitorService,
    Target,
};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

const DEFAULT_LOG_FILTER: &str = "postwatch_core=info,postwatchctl=info";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] postwatch_core::ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch profiles for new posts", long_about = None)]
pub struct Cli {
    /// Path to postwatch.toml
    #[arg(long, default_value = "configs/postwatch.toml")]
    pub config: PathBuf,
    /// Overrides state.base_dir (browser profile and watermark file)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in, crawl every target once and report new items
    Run(RunArgs),
    /// Print the stored watermarks
    State,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Targets to crawl; defaults to crawl.targets from the config
    pub targets: Vec<String>,
    /// Items to inspect per target
    #[arg(long)]
    pub limit: Option<usize>,
    /// Keep the browser open and re-check targets on demand
    #[arg(long, default_value_t = false)]
    pub interactive: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    init_logging();
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::State => {
            let state = context.state_report()?;
            render(&state, cli.format)?;
        }
        Commands::Run(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(context.run_monitor(args, cli.format))?;
        }
    }

    Ok(())
}

/// Logs go to stderr so `--format json` output stays parseable.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: MonitorConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let mut config = load_monitor_config(&config_path)?;
        if let Some(dir) = &cli.state_dir {
            config.state.base_dir = dir.display().to_string();
        }
        Ok(Self {
            config,
            config_path,
        })
    }

    fn state_report(&self) -> Result<StateReport> {
        let path = self.config.state_path();
        let watermarks = JsonFileStore::new(&path).try_load()?;
        let entries = watermarks
            .iter()
            .map(|(target, id)| WatermarkEntry {
                target: target.to_string(),
                id: id.to_string(),
            })
            .collect();
        Ok(StateReport {
            path: path.display().to_string(),
            entries,
        })
    }

    fn targets(&self, args: &RunArgs) -> Result<Vec<Target>> {
        let raw = if args.targets.is_empty() {
            &self.config.crawl.targets
        } else {
            &args.targets
        };
        if raw.is_empty() {
            return Err(AppError::MissingResource(format!(
                "no targets given and crawl.targets is empty in {}",
                self.config_path.display()
            )));
        }
        Ok(raw.iter().map(|target| Target::from(target.as_str())).collect())
    }

    async fn run_monitor(&self, args: &RunArgs, format: OutputFormat) -> Result<()> {
        let targets = self.targets(args)?;
        let (sink, mut reports) = ChannelSink::new();
        let service = MonitorService::builder(self.config.clone())
            .sink(Arc::new(sink))
            .build()?;

        enqueue_all(&service, &targets, args.limit);
        service.start().await?;

        let outcome = self.drive(&service, &targets, args, format, &mut reports).await;
        if let Err(err) = service.stop().await {
            warn!(error = %err, "monitor shutdown reported an error");
        }
        outcome
    }

    async fn drive(
        &self,
        service: &MonitorService,
        targets: &[Target],
        args: &RunArgs,
        format: OutputFormat,
        reports: &mut UnboundedReceiver<CrawlReport>,
    ) -> Result<()> {
        if !drain(service).await {
            return Ok(());
        }
        render(&collect(service, reports), format)?;

        if !args.interactive {
            return Ok(());
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprintln!("{}", menu(targets));
            let Some(line) = read_answer(&mut lines, interrupted()).await? else {
                break;
            };
            let picked = match parse_selection(&line, targets.len()) {
                Selection::Quit => break,
                Selection::All => targets.to_vec(),
                Selection::Targets(indexes) => {
                    indexes.into_iter().map(|i| targets[i].clone()).collect()
                }
                Selection::Invalid(reason) => {
                    eprintln!("{reason}");
                    continue;
                }
            };
            enqueue_all(service, &picked, args.limit);
            if !drain(service).await {
                break;
            }
            render(&collect(service, reports), format)?;
        }
        Ok(())
    }
}

fn enqueue_all(service: &MonitorService, targets: &[Target], limit: Option<usize>) {
    for target in targets {
        match limit {
            Some(limit) => service.enqueue_with_limit(target.clone(), limit),
            None => service.enqueue(target.clone()),
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Next menu answer. None at end of input or once `interrupt` fires.
async fn read_answer<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => {
            info!("interrupted at the prompt, shutting down");
            Ok(None)
        }
    }
}

/// Waits for the queue to empty. False when interrupted.
async fn drain(service: &MonitorService) -> bool {
    tokio::select! {
        _ = service.wait_idle() => true,
        _ = interrupted() => {
            info!(pending = service.pending(), "interrupted, shutting down");
            false
        }
    }
}

fn collect(service: &MonitorService, reports: &mut UnboundedReceiver<CrawlReport>) -> RunSummary {
    let mut collected = Vec::new();
    while let Ok(report) = reports.try_recv() {
        collected.push(report);
    }
    RunSummary {
        reports: collected,
        metrics: service.metrics(),
    }
}

fn menu(targets: &[Target]) -> String {
    let mut out = String::from("re-check which target? (number, comma list, 'a' for all, 'q' to quit)\n");
    for (index, target) in targets.iter().enumerate() {
        let _ = writeln!(out, "  {index}: {target}");
    }
    out
}

#[derive(Debug, PartialEq, Eq)]
enum Selection {
    All,
    Quit,
    Targets(Vec<usize>),
    Invalid(String),
}

fn parse_selection(input: &str, count: usize) -> Selection {
    let input = input.trim();
    match input.to_ascii_lowercase().as_str() {
        "" => return Selection::Invalid("enter a target number".to_string()),
        "a" | "all" => return Selection::All,
        "q" | "quit" | "exit" => return Selection::Quit,
        _ => {}
    }

    let mut indexes = Vec::new();
    for part in input.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        match part.parse::<usize>() {
            Ok(index) if index < count => {
                if !indexes.contains(&index) {
                    indexes.push(index);
                }
            }
            Ok(index) => {
                return Selection::Invalid(format!(
                    "{index} is out of range (0..{})",
                    count.saturating_sub(1)
                ))
            }
            Err(_) => return Selection::Invalid(format!("'{part}' is not a target number")),
        }
    }
    if indexes.is_empty() {
        Selection::Invalid("enter a target number".to_string())
    } else {
        Selection::Targets(indexes)
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    reports: Vec<CrawlReport>,
    metrics: MonitorMetrics,
}

impl DisplayFallback for RunSummary {
    fn display(&self) -> String {
        let mut out = String::new();
        for report in &self.reports {
            let _ = writeln!(
                out,
                "{}: {} new (watermark {})",
                report.target,
                report.items.len(),
                report.watermark.as_deref().unwrap_or("-")
            );
            for item in &report.items {
                let text = item
                    .payload
                    .get("text")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .replace('\n', " ");
                let url = item
                    .payload
                    .get("url")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default();
                let _ = writeln!(out, "  [{}] {} {}", item.id, text, url);
            }
        }
        let _ = write!(
            out,
            "crawls: {} ok, {} failed ({:.0}% ok); items reported: {}",
            self.metrics.crawls_succeeded,
            self.metrics.crawls_failed,
            self.metrics.crawl_success_rate(),
            self.metrics.items_reported
        );
        out
    }
}

#[derive(Debug, Serialize)]
struct StateReport {
    path: String,
    entries: Vec<WatermarkEntry>,
}

#[derive(Debug, Serialize)]
struct WatermarkEntry {
    target: String,
    id: String,
}

impl DisplayFallback for StateReport {
    fn display(&self) -> String {
        if self.entries.is_empty() {
            return format!("no watermarks in {}", self.path);
        }
        let mut out = format!("watermarks in {}:", self.path);
        for entry in &self.entries {
            let _ = write!(out, "\n  {} -> {}", entry.target, entry.id);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postwatch_core::state::Watermarks;
    use postwatch_core::Item;
    use std::fs;
    use tempfile::TempDir;

    fn report_with_items(target: &str, ids: &[&str]) -> CrawlReport {
        CrawlReport {
            target: Target::from(target),
            items: ids
                .iter()
                .map(|id| Item {
                    id: id.to_string(),
                    payload: serde_json::json!({
                        "text": format!("post\n{id}"),
                        "url": format!("https://x.com/s/{id}"),
                    }),
                })
                .collect(),
            previous_watermark: None,
            watermark: ids.first().map(|id| id.to_string()),
            checked_at: Default::default(),
        }
    }

    fn prepare_context(targets: &[&str]) -> Result<(TempDir, AppContext)> {
        let temp = TempDir::new()?;
        let config_path = temp.path().join("postwatch.toml");
        let listed = targets
            .iter()
            .map(|target| format!("\"{target}\""))
            .collect::<Vec<_>>()
            .join(", ");
        fs::write(
            &config_path,
            format!("[crawl]\ntargets = [{listed}]\n\n[state]\npath = \"watermarks.json\"\n"),
        )?;

        let cli = Cli {
            config: config_path,
            state_dir: Some(temp.path().to_path_buf()),
            format: OutputFormat::Json,
            command: Commands::State,
        };
        let context = AppContext::new(&cli)?;
        Ok((temp, context))
    }

    #[test]
    fn state_report_lists_stored_watermarks() {
        let (temp, context) = prepare_context(&[]).unwrap();
        let mut watermarks = Watermarks::new();
        watermarks.set(&Target::from("https://x.com/a"), "103");
        JsonFileStore::new(temp.path().join("watermarks.json"))
            .save(&watermarks)
            .unwrap();

        let state = context.state_report().unwrap();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].target, "https://x.com/a");
        assert_eq!(state.entries[0].id, "103");
        assert!(state.display().contains("https://x.com/a -> 103"));
    }

    #[test]
    fn state_report_without_file_is_empty() {
        let (_temp, context) = prepare_context(&[]).unwrap();
        let state = context.state_report().unwrap();
        assert!(state.entries.is_empty());
        assert!(state.display().starts_with("no watermarks"));
    }

    #[test]
    fn run_targets_fall_back_to_config() {
        let (_temp, context) = prepare_context(&["https://x.com/a", "https://x.com/b"]).unwrap();
        let args = RunArgs {
            targets: vec![],
            limit: None,
            interactive: false,
        };
        let targets = context.targets(&args).unwrap();
        assert_eq!(targets.len(), 2);

        let explicit = RunArgs {
            targets: vec!["https://x.com/c".into()],
            ..args
        };
        assert_eq!(
            context.targets(&explicit).unwrap(),
            vec![Target::from("https://x.com/c")]
        );
    }

    #[test]
    fn run_without_targets_is_an_error() {
        let (_temp, context) = prepare_context(&[]).unwrap();
        let args = RunArgs {
            targets: vec![],
            limit: None,
            interactive: false,
        };
        assert!(matches!(
            context.targets(&args),
            Err(AppError::MissingResource(_))
        ));
    }

    #[test]
    fn selection_parsing() {
        assert_eq!(parse_selection("a", 3), Selection::All);
        assert_eq!(parse_selection(" Q ", 3), Selection::Quit);
        assert_eq!(parse_selection("2", 3), Selection::Targets(vec![2]));
        assert_eq!(
            parse_selection("0, 2,0", 3),
            Selection::Targets(vec![0, 2])
        );
        assert!(matches!(parse_selection("3", 3), Selection::Invalid(_)));
        assert!(matches!(parse_selection("x", 3), Selection::Invalid(_)));
        assert!(matches!(parse_selection("", 3), Selection::Invalid(_)));
    }

    #[test]
    fn run_summary_renders_items_on_one_line_each() {
        let summary = RunSummary {
            reports: vec![report_with_items("https://x.com/a", &["103", "102"])],
            metrics: MonitorMetrics::default(),
        };
        let text = summary.display();
        assert!(text.contains("https://x.com/a: 2 new (watermark 103)"));
        assert!(text.contains("[103] post 103 https://x.com/s/103"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["reports"][0]["items"][1]["id"], "102");
    }

    #[tokio::test]
    async fn interrupt_ends_a_pending_prompt() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();

        let answer = read_answer(&mut lines, async {}).await.unwrap();

        assert_eq!(answer, None);
    }

    #[tokio::test]
    async fn prompt_returns_typed_answers_until_end_of_input() {
        let mut lines = BufReader::new(&b"1,2\nq\n"[..]).lines();

        let first = read_answer(&mut lines, std::future::pending()).await.unwrap();
        let second = read_answer(&mut lines, std::future::pending()).await.unwrap();
        let end = read_answer(&mut lines, std::future::pending()).await.unwrap();

        assert_eq!(first.as_deref(), Some("1,2"));
        assert_eq!(second.as_deref(), Some("q"));
        assert_eq!(end, None);
    }
}
