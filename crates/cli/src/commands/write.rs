//! `scribeloop write` — Research a topic and print the article.

use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use scribeloop_agent::{ExecutionEngine, TaskService, TaskStatus};
use scribeloop_config::AppConfig;
use scribeloop_core::attempt::AttemptStatus;
use scribeloop_core::event::{EngineEvent, EventBus};
use scribeloop_core::task::{Task, TaskId, WritingBrief};

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// What the article is about
    pub topic: String,

    /// Search keyword (repeatable)
    #[arg(short, long = "keyword")]
    pub keywords: Vec<String>,

    /// Aspect to focus on (repeatable)
    #[arg(long = "focus")]
    pub focus_areas: Vec<String>,

    /// Article style, e.g. "review"
    #[arg(long)]
    pub style: Option<String>,

    /// Article language code
    #[arg(long)]
    pub language: Option<String>,

    /// Extra instructions for the writer
    #[arg(long)]
    pub instructions: Option<String>,

    /// Translate the article into this language (repeatable)
    #[arg(long = "translate-to")]
    pub translate_to: Vec<String>,

    /// Ask the image plugin for illustrations
    #[arg(long)]
    pub images: bool,

    /// Maximum number of sources to retrieve
    #[arg(long)]
    pub max_sources: Option<u32>,

    /// Override engine.max_iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Print the result as JSON instead of Markdown
    #[arg(long)]
    pub json: bool,

    /// Write the result to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl WriteArgs {
    fn brief(&self) -> WritingBrief {
        WritingBrief {
            keywords: self.keywords.clone(),
            focus_areas: self.focus_areas.clone(),
            style: self.style.clone(),
            language: self.language.clone(),
            instructions: self.instructions.clone(),
            max_sources: self.max_sources,
            translate_to: self.translate_to.clone(),
            generate_images: self.images,
            ..WritingBrief::default()
        }
    }
}

pub async fn run(config: &AppConfig, args: WriteArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut brief = args.brief();
    brief.normalize(&config.brief_limits())?;

    let mut task_config = config.task_config(&brief);
    if let Some(max) = args.max_iterations {
        task_config.max_iterations = max;
    }
    let task = Task::new(args.topic.clone(), task_config)?.with_brief(brief);
    let task_id = task.id;

    let registry = scribeloop_tools::default_registry(config)?;
    let engine = ExecutionEngine::new(Arc::new(registry), Arc::new(EventBus::default()));
    let service = TaskService::new(Arc::new(engine));

    let progress = spawn_progress(&service, task_id);
    let id = service.submit(task).await?;

    tokio::select! {
        _ = service.wait(id) => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("  Cancelling...");
            service.cancel(id).await;
            service.wait(id).await;
        }
    }
    progress.abort();

    let status = service
        .take_result(id)
        .await
        .ok_or("Task vanished from the service")?;
    let rendered = render_status(&status, args.json)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered)?;
            eprintln!("  Wrote {}", path.display());
        }
        None => println!("{rendered}"),
    }

    match status {
        TaskStatus::Failed(report) => Err(report.to_string().into()),
        _ => Ok(()),
    }
}

fn spawn_progress(service: &TaskService, task_id: TaskId) -> tokio::task::JoinHandle<()> {
    let mut rx = service.events();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.task_id() == task_id => {
                    if let Some(line) = progress_line(&event) {
                        eprintln!("  {line}");
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "Progress display lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// One human-readable line per interesting event.
fn progress_line(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::StateChanged {
            phase, iteration, ..
        } => Some(format!("[{iteration}] {phase}")),
        EngineEvent::ToolAttempted {
            tool,
            attempt,
            status,
            latency_ms,
            ..
        } => {
            let mark = match status {
                AttemptStatus::Success => "ok",
                AttemptStatus::RetriableFailure => "retrying",
                AttemptStatus::FatalFailure => "failed",
            };
            Some(format!("    {tool} #{attempt}: {mark} ({latency_ms}ms)"))
        }
        EngineEvent::ContextEvicted { evicted, .. } => {
            Some(format!("    evicted {} context entries", evicted.len()))
        }
    }
}

fn render_status(status: &TaskStatus, json: bool) -> scribeloop_core::Result<String> {
    match (status, json) {
        (TaskStatus::Completed(article), false) => Ok(article.to_markdown()),
        (TaskStatus::Failed(report), false) => Ok(format!("Task failed: {report}")),
        (TaskStatus::Completed(article), true) => article.to_json(),
        (TaskStatus::Failed(report), true) => report.to_json(),
        (TaskStatus::Pending, _) => Ok("Task is still running".to_string()),
    }
}
