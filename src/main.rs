//! Lumen: live camera preview through a chain of GPU effects.

use anyhow::Result;
use clap::Parser;
use lumen::capture::{CaptureBackend, CaptureLoop, NokhwaCapture};
use lumen::config::{Config, ConfigWatcher};
use lumen::frame::GpuFrame;
use lumen::handoff::HandoffSlot;
use lumen::output::{PresentationDriver, SurfacePresenter, TickOutcome, TickPacer};
use lumen::settings::{ComputeEffect, EffectSelection, FragmentEffect, SettingsStore, VertexEffect};
use lumen::shader::{GpuContext, GpuFrameProcessor, PipelineRegistry, ShaderLibrary};
use lumen::utils::RateCounter;
use lumen::worker::ProcessingWorker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// Live camera preview with switchable GPU effects.
///
/// Keys: C/V/F cycle compute/vertex/fragment effects, 0 clears, Esc quits.
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(about = "Apply GPU effects to a live camera feed")]
struct Args {
    /// Camera device index
    #[arg(short, long)]
    input: Option<u32>,

    /// Requested capture width
    #[arg(long)]
    width: Option<u32>,

    /// Requested capture height
    #[arg(long)]
    height: Option<u32>,

    /// Requested capture frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Initial compute effect
    #[arg(long, value_enum)]
    compute: Option<ComputeEffect>,

    /// Initial vertex effect
    #[arg(long, value_enum)]
    vertex: Option<VertexEffect>,

    /// Initial fragment effect
    #[arg(long, value_enum)]
    fragment: Option<FragmentEffect>,

    /// Cap presentation to this many frames per second instead of the monitor rate
    #[arg(long)]
    display_fps: Option<u32>,

    /// YAML config file, reloaded when it changes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    /// File values first, then anything given on the command line.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        let camera = &mut config.camera;
        camera.device_index = self.input.unwrap_or(camera.device_index);
        camera.width = self.width.unwrap_or(camera.width);
        camera.height = self.height.unwrap_or(camera.height);
        camera.fps = self.fps.unwrap_or(camera.fps);

        let effects = &mut config.effects;
        effects.compute = self.compute.unwrap_or(effects.compute);
        effects.vertex = self.vertex.unwrap_or(effects.vertex);
        effects.fragment = self.fragment.unwrap_or(effects.fragment);

        if self.display_fps.is_some() {
            config.display.fps_cap = self.display_fps;
        }
        Ok(config)
    }
}

/// Everything that exists once the window and GPU are up.
struct Pipeline {
    window: Arc<Window>,
    driver: PresentationDriver<SurfacePresenter>,
    worker: Arc<ProcessingWorker<GpuFrame>>,
    capture: Option<CaptureLoop>,
    pacer: TickPacer,
}

struct LumenApp {
    config: Config,
    watcher: Option<ConfigWatcher>,
    settings: Arc<SettingsStore>,
    slot: Arc<HandoffSlot<GpuFrame>>,
    pipeline: Option<Pipeline>,
    last_tick: Instant,
    present_rate: RateCounter,
    last_completed: u64,
}

impl LumenApp {
    fn new(config: Config, watcher: Option<ConfigWatcher>) -> Self {
        let settings = Arc::new(SettingsStore::new(config.selection()));
        info!("Initial effects: {}", settings.read());
        Self {
            config,
            watcher,
            settings,
            slot: Arc::new(HandoffSlot::new()),
            pipeline: None,
            last_tick: Instant::now(),
            present_rate: RateCounter::default(),
            last_completed: 0,
        }
    }

    fn start(&self, window: Arc<Window>) -> Result<Pipeline> {
        let (ctx, surface) = GpuContext::new(window.clone())?;

        let registry = Arc::new(PipelineRegistry::new(&ctx, &ShaderLibrary::builtin()));
        if !registry.failures().is_empty() {
            warn!("{} effect programs unavailable, they will pass frames through", registry.failures().len());
        }

        let processor = GpuFrameProcessor::new(ctx.clone(), registry);
        let worker = Arc::new(ProcessingWorker::spawn(processor, self.settings.clone(), self.slot.clone())?);

        let presenter = SurfacePresenter::new(ctx.clone(), surface, window.clone())?;
        let driver = PresentationDriver::new(self.slot.clone(), presenter);

        let capture_config = self.config.capture();
        let sink_worker = worker.clone();
        let capture = CaptureLoop::spawn(
            move || NokhwaCapture::open(capture_config),
            move |frame| {
                // Upload only once the worker has accepted the frame.
                sink_worker.submit_with(|| match GpuFrame::upload(&ctx, &frame) {
                    Ok(gpu_frame) => Some(gpu_frame),
                    Err(e) => {
                        warn!("Dropping frame: {}", e);
                        None
                    }
                });
            },
        )?;

        let native_hz = window
            .current_monitor()
            .and_then(|monitor| monitor.refresh_rate_millihertz())
            .map(|mhz| mhz / 1000);
        let pacer = TickPacer::new(self.config.display.fps_cap, native_hz, Instant::now());
        info!("Presenting every {:.2} ms", pacer.interval().as_secs_f64() * 1000.0);

        Ok(Pipeline {
            window,
            driver,
            worker,
            capture: Some(capture),
            pacer,
        })
    }

    fn handle_key(&self, event: &KeyEvent, event_loop: &ActiveEventLoop) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        let key = match &event.logical_key {
            Key::Named(NamedKey::Escape) => {
                event_loop.exit();
                return;
            }
            Key::Character(c) => c.to_lowercase(),
            _ => return,
        };
        let selection = match key.as_str() {
            "c" => self.settings.update(|s| s.with_compute(s.compute.next())),
            "v" => self.settings.update(|s| s.with_vertex(s.vertex.next())),
            "f" => self.settings.update(|s| s.with_fragment(s.fragment.next())),
            "0" => self.settings.update(|s| EffectSelection {
                time: s.time,
                ..EffectSelection::default()
            }),
            _ => return,
        };
        info!("Effects: {}", selection);
        if let Some(pipeline) = &self.pipeline {
            pipeline.window.set_title(&format!("Lumen - {}", selection));
        }
    }

    fn tick(&mut self, now: Instant) {
        let Some(pipeline) = &mut self.pipeline else {
            return;
        };
        if !pipeline.pacer.poll(now) {
            return;
        }

        self.settings
            .advance_time(now.saturating_duration_since(self.last_tick).as_secs_f32());
        self.last_tick = now;

        let presented = u64::from(pipeline.driver.tick() == TickOutcome::Presented);
        if let Some(fps) = self.present_rate.update_at(presented, now) {
            let stats = pipeline.worker.stats();
            info!(
                "Presenting {:.1} fps | processed {} (+{}) dropped {} failed {} superseded {}",
                fps,
                stats.completed,
                stats.completed - self.last_completed,
                stats.dropped,
                stats.failed,
                self.slot.superseded()
            );
            self.last_completed = stats.completed;
        }
    }
}

impl ApplicationHandler for LumenApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.pipeline.is_some() {
            return;
        }

        let attrs = WindowAttributes::default()
            .with_title(format!("Lumen - {}", self.settings.read()))
            .with_inner_size(PhysicalSize::new(self.config.camera.width, self.config.camera.height));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match self.start(window) {
            Ok(pipeline) => {
                self.last_tick = Instant::now();
                self.pipeline = Some(pipeline);
            }
            Err(e) => {
                error!("Initialization error: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(pipeline) = &self.pipeline {
                    pipeline.driver.with_target(|presenter| presenter.resize(size));
                }
            }
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(&event, event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(watcher) = &mut self.watcher {
            if let Some(config) = watcher.poll() {
                let selection = config.apply_effects(&self.settings);
                info!("Effects from config: {}", selection);
            }
        }

        self.tick(Instant::now());
        if let Some(pipeline) = &self.pipeline {
            event_loop.set_control_flow(ControlFlow::WaitUntil(pipeline.pacer.deadline()));
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut pipeline) = self.pipeline.take() {
            // The capture thread holds a worker handle; stop it first.
            if let Some(mut capture) = pipeline.capture.take() {
                capture.stop();
            }
            info!("Final stats: {:?}", pipeline.worker.stats());
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.list_devices {
        println!("Available cameras:");
        match NokhwaCapture::list_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => eprintln!("Failed to list devices: {}", e),
        }
        return Ok(());
    }

    let config = args.resolve_config()?;
    let watcher = match &args.config {
        Some(path) => match ConfigWatcher::new(path.clone(), config.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config hot reload disabled: {}", e);
                None
            }
        },
        None => None,
    };

    info!("Starting Lumen...");
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = LumenApp::new(config, watcher);
    event_loop.run_app(&mut app)?;
    Ok(())
}
