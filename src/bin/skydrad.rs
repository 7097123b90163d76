//! skydrad - camera relay daemon
//!
//! This daemon:
//! 1. Connects to the configured camera (HTTP MJPEG, snapshot, or `stub://`)
//! 2. Runs the selected detector on a throttled subset of frames
//! 3. Publishes annotated frames and stats to the shared frame buffer
//! 4. Serves the annotated MJPEG stream and JSON stats over HTTP

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use skydra_cam::{
    open_source, ApiConfig, ApiServer, BackendRegistry, FrameBuffer, Pipeline, Renderer,
    RendererConfig, SkydraConfig, StubBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Annotated MJPEG relay with throttled object detection")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "SKYDRA_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address for the HTTP server, overriding the configuration.
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = SkydraConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }

    let registry = build_registry(&config)?;
    let backend = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend available"))?;
    log::info!(
        "detector backend={} classes={:?} confidence={} (available: {})",
        registry.default_name().unwrap_or("none"),
        config.detector.classes,
        config.detector.confidence,
        registry.list().join(", ")
    );

    let frame_buffer = Arc::new(FrameBuffer::new()?);
    let source = open_source(&config.camera)?;
    let renderer = Renderer::new(RendererConfig::for_detector(
        &config.detector.device_label,
        &config.detector.classes,
    ));
    let pipeline = Pipeline::new(&config, source, backend, renderer, frame_buffer.clone());
    let pipeline_handle = pipeline.spawn()?;
    log::info!("camera source {}", config.camera.url);

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        stream_interval: config.stream_interval,
    };
    let api_handle = ApiServer::new(api_config, frame_buffer).spawn()?;
    log::info!("stream server listening on http://{}/video_feed", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("skydrad waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    pipeline_handle.stop()?;

    Ok(())
}

fn build_registry(config: &SkydraConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());
    register_model_backends(&mut registry, config)?;
    registry.set_default(&config.detector.backend)?;
    Ok(registry)
}

#[cfg(feature = "backend-tract")]
fn register_model_backends(registry: &mut BackendRegistry, config: &SkydraConfig) -> Result<()> {
    use skydra_cam::{DetectorBackend, TractBackend};

    let Some(model_path) = &config.detector.model_path else {
        return Ok(());
    };
    let mut backend = TractBackend::new(model_path, config.detector.input_size)?;
    backend.warm_up()?;
    log::info!("loaded detector model {}", model_path);
    registry.register(backend);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_model_backends(_registry: &mut BackendRegistry, config: &SkydraConfig) -> Result<()> {
    if config.detector.model_path.is_some() {
        log::warn!("detector.model_path set but built without the backend-tract feature");
    }
    Ok(())
}
