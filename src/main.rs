// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline simulator
//!
//! Drives a synthetic capture source through the full bridge against the
//! in-process script runtime: install a frame processor, deliver frames at a
//! fixed cadence, call a plugin from the processor, then uninstall.

use clap::{Parser, Subcommand};
use framelink::frame::MemoryFrameBuffer;
use framelink::plugins::FrameProcessorPlugin;
use framelink::script::local::LocalScriptRuntime;
use framelink::script::{FunctionRef, HostRuntime, ScriptValue};
use framelink::{BridgeConfig, Frame, FrameProcessorController};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "framelink")]
#[command(about = "Frame processor bridge simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic capture pipeline through the bridge
    Simulate {
        /// Number of frames to deliver (0 = until Ctrl-C)
        #[arg(short = 'n', long, default_value = "120")]
        frames: u64,

        /// Capture cadence in frames per second
        #[arg(short, long, default_value = "30.0")]
        fps: f64,

        /// Cap on processed frames per second (capture keeps its own cadence)
        #[arg(long)]
        max_fps: Option<f64>,

        /// Frame dimensions as WIDTHxHEIGHT
        #[arg(long, default_value = "1280x720")]
        size: String,
    },
}

/// Demo plugin: reports frame geometry plus its own call count
struct InspectPlugin {
    calls: AtomicU64,
}

impl FrameProcessorPlugin for InspectPlugin {
    fn call(&self, frame: &Arc<Frame>, args: &[Value]) -> Result<Value, String> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({
            "width": frame.width().map_err(|e| e.to_string())?,
            "height": frame.height().map_err(|e| e.to_string())?,
            "bytesPerRow": frame.bytes_per_row().map_err(|e| e.to_string())?,
            "calls": calls,
            "args": args,
        }))
    }
}

/// Largest accepted frame dimension, matching 8K capture
const MAX_DIMENSION: u32 = 8192;

fn parse_size(size: &str) -> Result<(u32, u32), String> {
    let (w, h) = size
        .split_once('x')
        .ok_or_else(|| format!("invalid size `{}`, expected WIDTHxHEIGHT", size))?;
    let width: u32 = w.parse().map_err(|_| format!("invalid width `{}`", w))?;
    let height: u32 = h.parse().map_err(|_| format!("invalid height `{}`", h))?;
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(format!(
            "size `{}` out of range, dimensions must be 1..={}",
            size, MAX_DIMENSION
        ));
    }
    Ok((width, height))
}

fn simulate(frames: u64, fps: f64, max_fps: Option<f64>, size: &str) -> Result<(), String> {
    let (width, height) = parse_size(size)?;
    if fps <= 0.0 {
        return Err("fps must be positive".to_string());
    }

    let config = BridgeConfig {
        max_fps,
        ..BridgeConfig::default()
    };
    let controller = FrameProcessorController::with_config(&config);
    let runtime = LocalScriptRuntime::new();
    let host: Arc<dyn HostRuntime> = runtime.clone();
    controller.install_bindings(&host);

    const VIEW_TAG: i64 = 1;
    let view = controller.views().register(VIEW_TAG);
    let context_handle = runtime.create_worklet_context("worklet");

    // The frame processor "script": probe the frame, call the plugin, close.
    let worklet = runtime.worklet_context("worklet").expect("context exists");
    let processed = Arc::new(AtomicU64::new(0));
    let processed_clone = Arc::clone(&processed);
    let processor = ScriptValue::Function(FunctionRef::new(move |args| {
        let frame = args.first().cloned().unwrap_or(ScriptValue::Undefined);
        let result = worklet.call_binding(
            "__inspect",
            &[frame.clone(), ScriptValue::String("simulate".to_string())],
        );
        match result {
            Ok(value) => info!(result = ?value, "Plugin call succeeded"),
            Err(e) => warn!(error = %e, "Plugin call failed"),
        }
        if let ScriptValue::Frame(frame) = frame {
            frame.close();
        }
        processed_clone.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptValue::Undefined)
    }));

    runtime
        .call_global(
            "setFrameProcessor",
            &[
                ScriptValue::Number(VIEW_TAG as f64),
                processor,
                context_handle,
            ],
        )
        .map_err(|e| e.to_string())?;

    controller
        .plugins()
        .register("inspect", Arc::new(InspectPlugin { calls: AtomicU64::new(0) }))
        .map_err(|e| e.to_string())?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| format!("failed to install Ctrl-C handler: {}", e))?;

    info!(frames, fps, width, height, "Starting synthetic capture");
    let interval = Duration::from_secs_f64(1.0 / fps);
    let mut delivered: u64 = 0;
    while !stop.load(Ordering::SeqCst) && (frames == 0 || delivered < frames) {
        view.deliver_frame(Box::new(MemoryFrameBuffer::new(width, height)));
        delivered += 1;
        thread::sleep(interval);
    }

    runtime
        .call_global("unsetFrameProcessor", &[ScriptValue::Number(VIEW_TAG as f64)])
        .map_err(|e| e.to_string())?;

    // Let queued frames drain before reading the counter
    thread::sleep(Duration::from_millis(100));
    info!(
        delivered,
        processed = processed.load(Ordering::SeqCst),
        tracked = controller.frame_registry().len(),
        "Capture finished"
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Simulate {
            frames,
            fps,
            max_fps,
            size,
        } => simulate(frames, fps, max_fps, &size),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
