//! motioncam: motion detection over a live camera, streamed as MJPEG

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

use motioncam::capture::V4l2Capture;
use motioncam::pipeline::{self, Pipeline};
use motioncam::utils::DeviceIdentifier;
use motioncam::{actuator, ancillary, server, Broadcaster, CaptureConfig, Config, Error, FrameSource};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Camera index, device path, or `auto`
    device: String,

    /// Address to serve the stream on, e.g. 0.0.0.0:8080
    bind: String,

    /// Auxiliary model file, loaded best-effort
    model: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Capture through GStreamer instead of V4L2 directly
    #[cfg(feature = "gstreamer-pipeline")]
    #[arg(long)]
    gstreamer: bool,
}

impl Args {
    #[cfg(feature = "gstreamer-pipeline")]
    fn use_gstreamer(&self) -> bool {
        self.gstreamer
    }

    #[cfg(not(feature = "gstreamer-pipeline"))]
    fn use_gstreamer(&self) -> bool {
        false
    }
}

fn open_source(use_gstreamer: bool, config: &CaptureConfig) -> Result<Box<dyn FrameSource>, Error> {
    if use_gstreamer {
        #[cfg(feature = "gstreamer-pipeline")]
        return Ok(Box::new(motioncam::capture::GstCapture::open(config)?));
    }
    Ok(Box::new(V4l2Capture::open(config)?))
}

fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("motioncam=info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    init_tracing();

    info!("motioncam starting");

    let use_gstreamer = args.use_gstreamer();
    let mut config = Config::load(args.config.as_deref())?;
    config.server.bind_addr = args.bind;
    if args.model.is_some() {
        config.model_path = args.model;
    }

    let device = DeviceIdentifier::parse(&args.device).resolve(config.capture.format)?;
    config.capture.set_device(device);
    info!("Using capture device: {:?}", config.capture.device);

    if let Some(path) = &config.model_path {
        ancillary::load_best_effort(path);
    }

    let source = open_source(use_gstreamer, &config.capture)?;
    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .map_err(Error::Server)?;

    let broadcaster = Arc::new(Broadcaster::new());
    let stop = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(Notify::new());

    let context = Pipeline::new(&config, broadcaster.clone())
        .with_indicator(actuator::from_config(&config.indicator));
    let producer = pipeline::spawn_producer(context, source, stop.clone(), config.pipeline.pin_core)?;
    let mut producer = tokio::task::spawn_blocking(move || producer.join());

    let mut server = tokio::spawn(server::serve(listener, broadcaster.clone(), config.server.boundary.clone(), {
        let shutdown = shutdown.clone();
        async move { shutdown.notified().await }
    }));

    let finished = tokio::select! {
        joined = &mut producer => Some(joined),
        served = &mut server => {
            served??;
            return Err(eyre!("stream server exited unexpectedly"));
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            None
        }
    };

    stop.store(true, Ordering::Release);
    broadcaster.close();
    shutdown.notify_one();

    let joined = match finished {
        Some(joined) => joined,
        None => producer.await,
    };
    server.await??;

    match joined? {
        Ok(Ok(stats)) => {
            info!("Producer finished: {:?}", stats);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Producer stopped: {}", e);
            Err(e.into())
        }
        Err(_) => Err(eyre!("producer thread panicked")),
    }
}
