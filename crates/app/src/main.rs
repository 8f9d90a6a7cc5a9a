use std::path::{Path, PathBuf};

use bass_reactive_core::{
    canvas::RasterCanvas, create_module, ui::ControlValue, AddOutcome, AppConfig, FrameLoop,
    ModuleKind, RecordingFormat, Recorder, Session, SettingsFile, VisualModule, VisualizerError,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> bass_reactive_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => run_render(args),
        Commands::Analyze {
            audio,
            config,
            fps,
            sensitivity,
        } => run_analyze(&audio, config.as_deref(), fps, sensitivity),
        Commands::Controls { kind } => {
            println!("{}", create_module(kind).settings_ui().to_json()?);
            Ok(())
        }
        Commands::Defaults { kind } => {
            let settings = create_module(kind).settings_json()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn run_render(args: RenderArgs) -> bass_reactive_core::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(width) = args.width {
        config.render.width = width;
    }
    if let Some(height) = args.height {
        config.render.height = height;
    }
    if let Some(fps) = args.fps {
        config.render.fps = fps;
    }
    config.recording.output = args.out.clone();
    config.recording.format = format_for(&args.out);

    let mut session = Session::new(config)?;
    session.load_audio_file(&args.audio)?;
    if let Some(image) = &args.image {
        session.load_background(image)?;
    }
    if let Some(dir) = &args.video_frames {
        session.load_background_frames(dir, args.video_fps)?;
    }

    let settings = args.settings.as_deref().map(SettingsFile::load).transpose()?;
    if args.modules.is_empty() {
        // Without explicit modules, recreate the saved layout so every entry
        // has a slot to land in.
        let kinds = settings
            .iter()
            .flat_map(|file| file.modules.iter().flatten().map(|entry| entry.kind));
        for kind in kinds {
            add(&mut session, create_module(kind));
        }
    } else {
        for module in &args.modules {
            add(&mut session, module.build()?);
        }
    }
    if let Some(file) = &settings {
        let report = file.import(&mut session);
        tracing::info!(applied = report.applied, skipped = report.skipped, "settings applied");
    }
    session.resolve_assets()?;

    let render = &session.config().render;
    let (width, height, fps) = (render.width, render.height, render.fps);
    let length = args
        .duration
        .unwrap_or_else(|| session.clock().duration())
        .min(session.clock().duration());
    let frames = (length * fps as f32).ceil() as u64;

    let mut recorder = Recorder::new(session.config().recording.clone(), width, height, fps)
        .with_audio(args.audio.clone());
    recorder.start()?;

    let mut canvas = RasterCanvas::new(width, height);
    let mut frame_loop = FrameLoop::new();
    session.play();
    let rendered = frame_loop.run(&mut session, &mut canvas, frames, |canvas, stats| {
        if stats.frame % u64::from(fps) == 0 {
            tracing::info!(frame = stats.frame, time = stats.time, bass = stats.bass, "rendering");
        }
        recorder.push_frame(canvas)
    });
    let rendered = match rendered {
        Ok(rendered) => rendered,
        Err(err) => {
            recorder.cancel();
            return Err(err);
        }
    };
    let written = recorder.stop()?;
    session.stop();
    tracing::info!(rendered, written, out = %args.out.display(), "export finished");
    Ok(())
}

fn run_analyze(
    audio: &Path,
    config: Option<&Path>,
    fps: Option<u32>,
    sensitivity: Option<f32>,
) -> bass_reactive_core::Result<()> {
    let mut config = load_config(config)?;
    if let Some(fps) = fps {
        config.render.fps = fps;
    }
    let mut session = Session::new(config)?;
    if let Some(sensitivity) = sensitivity {
        session.set_sensitivity(sensitivity);
    }
    session.load_audio_file(audio)?;
    session.play();

    while session.clock().is_playing() {
        let time = session.clock().position();
        session.analyze();
        let snapshot = session.snapshot();
        let line = serde_json::json!({
            "time": time,
            "bass": snapshot.bass_level,
            "left": snapshot.bass_level_left,
            "right": snapshot.bass_level_right,
            "beat": snapshot.beat_detected,
        });
        println!("{line}");
        session.advance_frame();
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> bass_reactive_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn add(session: &mut Session, module: Box<dyn VisualModule>) {
    if let AddOutcome::LimitReached(kind) = session.add_boxed(module) {
        tracing::warn!(%kind, "module skipped, limit reached");
    }
}

fn format_for(out: &Path) -> RecordingFormat {
    match out.extension().and_then(|ext| ext.to_str()) {
        Some("mp4" | "mov" | "mkv" | "webm") => RecordingFormat::Video,
        _ => RecordingFormat::PngSequence,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// `speaker[:<shape>]`, `spectrum[:<style>]` or `neon[:<text>]`.
#[derive(Debug, Clone)]
struct ModuleSpec {
    kind: ModuleKind,
    argument: Option<String>,
}

impl ModuleSpec {
    fn build(&self) -> bass_reactive_core::Result<Box<dyn VisualModule>> {
        let mut module = create_module(self.kind);
        if let Some(argument) = &self.argument {
            let key = match self.kind {
                ModuleKind::Spectrum => "type",
                ModuleKind::Neon => "text",
                ModuleKind::Speaker => "shape",
            };
            module.apply_control(key, ControlValue::from(argument.as_str()))?;
        }
        Ok(module)
    }
}

fn parse_module(value: &str) -> Result<ModuleSpec, VisualizerError> {
    let (kind, argument) = match value.split_once(':') {
        Some((kind, argument)) => (kind, Some(argument.to_string())),
        None => (value, None),
    };
    Ok(ModuleSpec {
        kind: kind.parse()?,
        argument,
    })
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Bass-reactive music video renderer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a track to a PNG sequence or a video file.
    Render(RenderArgs),
    /// Print per-frame bass levels and beats as JSON lines.
    Analyze {
        /// WAV file to analyse.
        #[arg(short, long)]
        audio: PathBuf,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        fps: Option<u32>,
        #[arg(short, long)]
        sensitivity: Option<f32>,
    },
    /// Print the settings controls of a module kind.
    Controls {
        #[arg(short, long)]
        kind: ModuleKind,
    },
    /// Print the default settings of a module kind.
    Defaults {
        #[arg(short, long)]
        kind: ModuleKind,
    },
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// WAV file driving the visuals; also muxed into video output.
    #[arg(short, long)]
    audio: PathBuf,
    /// Background image, stretched to the frame.
    #[arg(short, long, conflicts_with = "video_frames")]
    image: Option<PathBuf>,
    /// Directory of PNG frames looped as a video background.
    #[arg(long)]
    video_frames: Option<PathBuf>,
    /// Playback rate of the background frames.
    #[arg(long, default_value_t = 30.0)]
    video_fps: f32,
    /// Settings file to apply to the modules.
    #[arg(short, long)]
    settings: Option<PathBuf>,
    /// Optional JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Module to add, in draw order: speaker[:<shape>], spectrum[:<style>], neon[:<text>].
    #[arg(short, long = "module", value_parser = parse_module)]
    modules: Vec<ModuleSpec>,
    /// Output directory for PNG frames, or a .mp4/.mov/.mkv/.webm file.
    #[arg(short, long)]
    out: PathBuf,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    fps: Option<u32>,
    /// Seconds to render; defaults to the whole track.
    #[arg(short, long)]
    duration: Option<f32>,
}
