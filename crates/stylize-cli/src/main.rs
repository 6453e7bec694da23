//! Stylize CLI
//!
//! Headless front end: imports local files, runs tasks through the engine and
//! prints the final task record as JSON on stdout. Progress goes to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use stylize_lib::core::compose::{VideoComposer, VideoConfig};
use stylize_lib::core::ffmpeg::{detect_ffmpeg, TransitionKind};
use stylize_lib::core::generation::{ApiKey, OpenRouterProvider};
use stylize_lib::core::media::{LocalMediaStore, MediaStore};
use stylize_lib::core::service::{
    GenerateRequest, GenerateVideoRequest, RegenerateRequest, StylizeService,
};
use stylize_lib::core::settings::{AppSettings, SettingsManager};
use stylize_lib::core::styles::StyleCatalog;
use stylize_lib::core::tasks::{InMemoryTaskStore, TaskRecord, TaskStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "stylize", version, about = "Stylized slideshow generator")]
struct Cli {
    /// Directory holding settings.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Also write daily log files here
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Overrides the configured storage root
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Provider API key
    #[arg(long, global = true, env = "STYLIZE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in styles.
    Styles,
    /// Locate ffmpeg and print its version.
    Check,
    /// Generate stylized images only.
    Generate(GenerateArgs),
    /// Generate stylized images and compose them into a video.
    Run(RunArgs),
    /// Compose existing images into a video.
    Compose(ComposeArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Source photo.
    #[arg(long)]
    image: PathBuf,

    /// Number of styles to generate.
    #[arg(long)]
    count: Option<usize>,

    /// Style to request; repeatable. Random catalog picks when omitted.
    #[arg(long = "style")]
    styles: Vec<String>,

    /// Maximum parallel provider requests.
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    generate: GenerateArgs,

    /// Soundtrack muxed into the video.
    #[arg(long)]
    audio: Option<PathBuf>,

    #[command(flatten)]
    video: VideoArgs,
}

#[derive(Args, Debug)]
struct ComposeArgs {
    /// Original photo.
    #[arg(long)]
    original: PathBuf,

    /// Stylized images, in slide order.
    #[arg(long, num_args = 1.., required = true)]
    images: Vec<PathBuf>,

    #[arg(long)]
    audio: Option<PathBuf>,

    #[command(flatten)]
    video: VideoArgs,
}

#[derive(Args, Debug)]
struct VideoArgs {
    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Seconds each slide is shown.
    #[arg(long, default_value_t = 3.0)]
    per_slide: f64,

    /// Crossfade length in seconds.
    #[arg(long, default_value_t = 0.6)]
    transition: f64,

    /// Transition to rotate through; repeatable (e.g. fade, slideleft).
    #[arg(long = "transition-type")]
    transition_types: Vec<TransitionKind>,

    /// Repeat the slide sequence this many times.
    #[arg(long, default_value_t = 1)]
    multiplier: u32,

    /// Leave the original photo out of the slides.
    #[arg(long, default_value_t = false)]
    no_original: bool,

    /// Hard cuts instead of crossfades.
    #[arg(long, default_value_t = false)]
    cuts: bool,
}

impl VideoArgs {
    fn to_config(&self) -> VideoConfig {
        VideoConfig {
            fps: self.fps,
            per_slide_seconds: self.per_slide,
            transition_seconds: self.transition,
            width: self.width,
            height: self.height,
            include_original: !self.no_original,
            image_multiplier: self.multiplier,
            use_transitions: !self.cuts,
            transition_kinds: self.transition_types.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("task {id} ended {status}: {message}")]
    TaskUnsuccessful {
        id: String,
        status: TaskStatus,
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    stylize_lib::init_logging(cli.log_dir.as_deref());

    let settings = load_settings(&cli);
    match &cli.cmd {
        Command::Styles => cmd_styles(),
        Command::Check => cmd_check(&settings).await,
        Command::Generate(args) => cmd_generate(settings, args).await,
        Command::Run(args) => cmd_run(settings, args).await,
        Command::Compose(args) => cmd_compose(settings, args).await,
    }
}

fn load_settings(cli: &Cli) -> AppSettings {
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(SettingsManager::default_config_dir);
    let mut settings = SettingsManager::new(config_dir).load_with_env();
    if let Some(dir) = &cli.storage_dir {
        settings.storage.root_dir = dir.clone();
    }
    if let Some(key) = &cli.api_key {
        settings.provider.api_key = Some(key.trim().to_string());
    }
    settings
}

fn cmd_styles() -> anyhow::Result<()> {
    for name in StyleCatalog::builtin().names() {
        println!("{name}");
    }
    Ok(())
}

async fn cmd_check(settings: &AppSettings) -> anyhow::Result<()> {
    let info = detect_ffmpeg(settings.encoder.ffmpeg_path.as_deref())
        .await
        .context("ffmpeg not found")?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn cmd_generate(settings: AppSettings, args: &GenerateArgs) -> anyhow::Result<()> {
    let (service, media) = build_service(settings, false).await?;
    let request = generate_request(&media, args).await?;
    let task_id = service.start_generate_images(request).await?;
    finish(&service, &task_id).await
}

async fn cmd_run(settings: AppSettings, args: &RunArgs) -> anyhow::Result<()> {
    let (service, media) = build_service(settings, true).await?;
    let request = GenerateVideoRequest {
        generate: generate_request(&media, &args.generate).await?,
        audio_file_id: import_optional(&media, args.audio.as_deref()).await?,
        video: args.video.to_config(),
    };
    let task_id = service.start_generate_video(request).await?;
    finish(&service, &task_id).await
}

async fn cmd_compose(settings: AppSettings, args: &ComposeArgs) -> anyhow::Result<()> {
    let (service, media) = build_service(settings, true).await?;
    let original = import(&media, &args.original).await?;
    let mut image_ids = Vec::with_capacity(args.images.len());
    for path in &args.images {
        image_ids.push(import(&media, path).await?);
    }
    let request = RegenerateRequest {
        original_file_id: original,
        image_ids,
        audio_file_id: import_optional(&media, args.audio.as_deref()).await?,
        video: args.video.to_config(),
    };
    let task_id = service.start_regenerate(request).await?;
    finish(&service, &task_id).await
}

async fn build_service(
    settings: AppSettings,
    needs_encoder: bool,
) -> anyhow::Result<(StylizeService, Arc<LocalMediaStore>)> {
    let provider = OpenRouterProvider::with_timeout(settings.provider.request_timeout())?
        .with_endpoint(settings.provider.endpoint.clone())
        .with_model_id(settings.provider.model_id.clone());
    let composer = if needs_encoder {
        Some(
            VideoComposer::detect(&settings)
                .await
                .context("ffmpeg is required to compose videos")?,
        )
    } else {
        None
    };
    let media = Arc::new(LocalMediaStore::new(settings.storage.root_dir.clone()));
    let service = StylizeService::new(
        settings,
        Arc::new(provider),
        StyleCatalog::builtin(),
        Arc::new(InMemoryTaskStore::new()),
        media.clone(),
        composer,
    );
    Ok((service, media))
}

async fn generate_request(
    media: &LocalMediaStore,
    args: &GenerateArgs,
) -> anyhow::Result<GenerateRequest> {
    Ok(GenerateRequest {
        source_file_id: import(media, &args.image).await?,
        styles: args.styles.clone(),
        count: args.count,
        concurrency: args.concurrency,
        credential: None::<ApiKey>,
    })
}

async fn import(media: &LocalMediaStore, path: &Path) -> anyhow::Result<String> {
    let stored = media
        .import(path)
        .await
        .with_context(|| format!("import '{}'", path.display()))?;
    Ok(stored.file_id)
}

async fn import_optional(
    media: &LocalMediaStore,
    path: Option<&Path>,
) -> anyhow::Result<Option<String>> {
    match path {
        Some(path) => Ok(Some(import(media, path).await?)),
        None => Ok(None),
    }
}

/// Polls until the task settles, then prints its record
async fn finish(service: &StylizeService, task_id: &str) -> anyhow::Result<()> {
    let record = wait_for(service, task_id).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    match record.status {
        TaskStatus::Completed | TaskStatus::ImagesReady => Ok(()),
        status => Err(CliError::TaskUnsuccessful {
            id: record.id.clone(),
            status,
            message: record.error.unwrap_or(record.message),
        }
        .into()),
    }
}

async fn wait_for(service: &StylizeService, task_id: &str) -> anyhow::Result<TaskRecord> {
    let mut last_progress = -1.0;
    loop {
        let record = service.status(task_id).await?;
        if record.progress > last_progress {
            eprintln!("[{:>5.1}%] {}", record.progress, record.message);
            last_progress = record.progress;
        }
        if record.is_done() {
            return Ok(record);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_args_map_to_config() {
        let cli = Cli::try_parse_from([
            "stylize",
            "compose",
            "--original",
            "a.png",
            "--images",
            "b.png",
            "c.png",
            "--fps",
            "24",
            "--cuts",
            "--no-original",
            "--transition-type",
            "fade",
            "--transition-type",
            "circleopen",
        ])
        .unwrap();
        let Command::Compose(args) = cli.cmd else {
            panic!("expected compose");
        };
        assert_eq!(args.images.len(), 2);
        let config = args.video.to_config();
        assert_eq!(config.fps, 24);
        assert!(!config.use_transitions);
        assert!(!config.include_original);
        assert_eq!(
            config.transition_kinds,
            vec![TransitionKind::Fade, TransitionKind::CircleOpen]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generate_args_collect_styles() {
        let cli = Cli::try_parse_from([
            "stylize",
            "--storage-dir",
            "/tmp/stylize",
            "generate",
            "--image",
            "p.jpg",
            "--style",
            "Watercolor",
            "--style",
            "Pop Art",
            "--count",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.storage_dir, Some(PathBuf::from("/tmp/stylize")));
        let Command::Generate(args) = cli.cmd else {
            panic!("expected generate");
        };
        assert_eq!(args.styles, vec!["Watercolor", "Pop Art"]);
        assert_eq!(args.count, Some(2));
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let cli = Cli::try_parse_from(["stylize", "run", "--image", "p.jpg"]).unwrap();
        let Command::Run(args) = cli.cmd else {
            panic!("expected run");
        };
        assert_eq!(args.video.to_config(), VideoConfig::default());
    }
}
