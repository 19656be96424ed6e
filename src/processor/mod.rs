// SPDX-License-Identifier: GPL-3.0-only

//! Frame processor install/execute/uninstall state machine
//!
//! The controller wires capture-thread callbacks through the scheduler into
//! the worklet execution context. Per view it moves between three states:
//! no processor installed, installation queued, and active. Per-frame
//! failures are contained on the processing thread — a script throw is
//! logged and the processor stays active; an unrecoverable native failure
//! additionally disarms the processor so a hot capture path cannot fail
//! repeatedly.

pub mod perf;

use crate::config::BridgeConfig;
use crate::errors::{BridgeError, BridgeResult, CallbackError, NativeErrorKind};
use crate::frame::registry::FrameRegistry;
use crate::frame::{Frame, FrameBuffer};
use crate::plugins::PluginRegistry;
use crate::scheduler::Scheduler;
use crate::script::{
    FRAME_PROCESSOR_FLAG, HostRuntime, ScriptValue, ShareableCallback, WorkletContext,
};
use crate::views::{CameraView, CaptureCallback, ViewRegistry};
use perf::PerformanceCollector;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// When to disarm a frame processor after a native per-frame failure
///
/// Script-level errors never disarm regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisarmPolicy {
    /// Disarm only on the residual unknown category (default)
    #[default]
    UnknownOnly,
    /// Disarm on every native failure, recognized or not
    AllNative,
    /// Log and keep the processor armed no matter what
    Never,
}

impl DisarmPolicy {
    /// Whether a failure of the given category disarms the processor
    pub fn should_disarm(&self, kind: NativeErrorKind) -> bool {
        match self {
            DisarmPolicy::UnknownOnly => kind == NativeErrorKind::Unknown,
            DisarmPolicy::AllNative => true,
            DisarmPolicy::Never => false,
        }
    }
}

/// Owns frame-processor state and the pipeline around it
pub struct FrameProcessorController {
    scheduler: Arc<Scheduler>,
    views: Arc<ViewRegistry>,
    frames: Arc<FrameRegistry>,
    plugins: Arc<PluginRegistry>,
    policy: DisarmPolicy,
    min_dispatch_interval: Option<Duration>,
    perf: Arc<PerformanceCollector>,
}

impl FrameProcessorController {
    /// Create a controller with default configuration
    pub fn new() -> Arc<Self> {
        Self::with_config(&BridgeConfig::default())
    }

    /// Create a controller from explicit configuration
    pub fn with_config(config: &BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            scheduler: Arc::new(Scheduler::start(&config.processing_thread_name)),
            views: Arc::new(ViewRegistry::new()),
            frames: Arc::new(FrameRegistry::with_policy(config.registry)),
            plugins: Arc::new(PluginRegistry::new()),
            policy: config.disarm_policy,
            min_dispatch_interval: config
                .max_fps
                .filter(|fps| *fps > 0.0)
                .map(|fps| Duration::from_secs_f64(1.0 / fps)),
            perf: Arc::new(PerformanceCollector::new()),
        })
    }

    /// View registry; the camera layer registers views here
    pub fn views(&self) -> &Arc<ViewRegistry> {
        &self.views
    }

    /// Plugin registry
    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// Frame leak-containment registry
    pub fn frame_registry(&self) -> &Arc<FrameRegistry> {
        &self.frames
    }

    /// The processing-thread scheduler
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Install a frame processor on the view with the given tag
    ///
    /// Resolves and binds the worklet context, marks it frame-processing
    /// enabled, installs known plugins into it, captures the user callback in
    /// transferable form, and schedules the capture-callback installation
    /// onto the view. Replaces any previously installed processor.
    pub fn set_frame_processor(
        &self,
        runtime: &dyn HostRuntime,
        view_tag: i64,
        processor: &ScriptValue,
        context_handle: &ScriptValue,
    ) -> BridgeResult<()> {
        info!(tag = view_tag, "Setting new frame processor");

        let context = runtime.resolve_worklet_context(context_handle)?;
        context.set_global_flag(FRAME_PROCESSOR_FLAG, true);
        self.plugins.bind_context(Arc::clone(&context));

        let view = self
            .views
            .resolve(view_tag)
            .ok_or(BridgeError::ViewNotFound(view_tag))?;

        let callback = runtime.make_shareable(processor)?;
        debug!(tag = view_tag, "Captured frame processor as shareable callback");

        let capture = self.make_capture_callback(&view, context, callback);
        let install_view = Arc::clone(&view);
        self.scheduler.schedule(move || {
            install_view.set_frame_processor(capture);
        });

        Ok(())
    }

    /// Remove the frame processor from the view with the given tag
    ///
    /// Subsequent frames are dropped without processing. Calling this when no
    /// processor was ever installed is a no-op, not an error; a small number
    /// of already-queued frames may still reach the processing thread and are
    /// dropped there.
    pub fn unset_frame_processor(&self, view_tag: i64) -> BridgeResult<()> {
        info!(tag = view_tag, "Removing frame processor");
        let view = self
            .views
            .resolve(view_tag)
            .ok_or(BridgeError::ViewNotFound(view_tag))?;
        view.unset_frame_processor();
        Ok(())
    }

    /// Install the `setFrameProcessor` / `unsetFrameProcessor` globals
    ///
    /// Argument-type mismatches fail synchronously with a descriptive
    /// argument error before any state change.
    pub fn install_bindings(self: &Arc<Self>, runtime: &Arc<dyn HostRuntime>) {
        info!("Installing frame processor bindings");

        let controller = Arc::clone(self);
        let runtime_ref = Arc::clone(runtime);
        runtime.install_global(
            "setFrameProcessor",
            3,
            Arc::new(move |args: &[ScriptValue]| {
                let tag = args
                    .first()
                    .and_then(ScriptValue::as_view_tag)
                    .ok_or_else(|| {
                        BridgeError::Argument(
                            "Camera::setFrameProcessor: First argument ('viewTag') must be a number!"
                                .to_string(),
                        )
                    })?;
                let processor = args.get(1).filter(|v| matches!(v, ScriptValue::Function(_)))
                    .ok_or_else(|| {
                        BridgeError::Argument(
                            "Camera::setFrameProcessor: Second argument ('frameProcessor') must be a function!"
                                .to_string(),
                        )
                    })?;
                let context = args.get(2).ok_or_else(|| {
                    BridgeError::Argument(
                        "Camera::setFrameProcessor: Third argument ('workletContext') must be a worklet context!"
                            .to_string(),
                    )
                })?;

                controller.set_frame_processor(runtime_ref.as_ref(), tag, processor, context)?;
                Ok(ScriptValue::Undefined)
            }),
        );

        let controller = Arc::clone(self);
        runtime.install_global(
            "unsetFrameProcessor",
            1,
            Arc::new(move |args: &[ScriptValue]| {
                let tag = args
                    .first()
                    .and_then(ScriptValue::as_view_tag)
                    .ok_or_else(|| {
                        BridgeError::Argument(
                            "Camera::unsetFrameProcessor: First argument ('viewTag') must be a number!"
                                .to_string(),
                        )
                    })?;
                controller.unset_frame_processor(tag)?;
                Ok(ScriptValue::Undefined)
            }),
        );
    }

    /// Build the capture-thread callback for one installed processor
    fn make_capture_callback(
        &self,
        view: &Arc<CameraView>,
        context: Arc<dyn WorkletContext>,
        callback: ShareableCallback,
    ) -> CaptureCallback {
        let scheduler = Arc::clone(&self.scheduler);
        let frames = Arc::clone(&self.frames);
        let perf = Arc::clone(&self.perf);
        let policy = self.policy;
        let min_interval = self.min_dispatch_interval;
        // Weak back-reference: the view owns this callback, so a strong
        // reference here would leak the view.
        let weak_view = Arc::downgrade(view);
        let last_dispatch: Mutex<Option<Instant>> = Mutex::new(None);

        Arc::new(move |buffer: Box<dyn FrameBuffer>| {
            if let Some(interval) = min_interval {
                let mut last = last_dispatch.lock().unwrap();
                let now = Instant::now();
                if let Some(previous) = *last {
                    if now.duration_since(previous) < interval {
                        // Throttled; the buffer is reclaimed by its drop.
                        debug!("Frame dropped by fps throttle");
                        return;
                    }
                }
                *last = Some(now);
            }

            let frame = Frame::new(buffer);
            frames.track(&frame);

            let context = Arc::clone(&context);
            let callback = callback.clone();
            let weak_view = weak_view.clone();
            let perf = Arc::clone(&perf);
            scheduler.schedule(move || {
                dispatch_frame(&weak_view, &context, &callback, frame, policy, &perf);
            });
        })
    }
}

/// Run one frame through the installed processor on the processing thread
///
/// Each invocation is independent: any failure here is logged and contained,
/// never propagated back toward the capture thread, and never prevents the
/// next frame's dispatch.
fn dispatch_frame(
    view: &Weak<CameraView>,
    context: &Arc<dyn WorkletContext>,
    callback: &ShareableCallback,
    frame: Arc<Frame>,
    policy: DisarmPolicy,
    perf: &PerformanceCollector,
) {
    // Uninstall/teardown race: frames queued before the processor was
    // removed may still arrive here. Steady-state condition, not an error.
    let Some(view) = view.upgrade() else {
        debug!("View destroyed before queued frame ran, dropping frame");
        return;
    };
    if !view.has_frame_processor() {
        debug!(tag = view.tag(), "Frame processor no longer installed, dropping queued frame");
        return;
    }

    let started = Instant::now();
    let result = context.run_guarded(callback, ScriptValue::Frame(Arc::clone(&frame)));
    perf.record(started.elapsed());

    match result {
        Ok(_) => {}
        Err(CallbackError::Script(e)) => match e.normalized_stack() {
            Some(stack) => {
                error!(
                    tag = view.tag(),
                    error = %e.message,
                    "Frame processor threw an error!\nIn: {}",
                    stack
                );
            }
            None => {
                error!(tag = view.tag(), error = %e.message, "Frame processor threw an error!");
            }
        },
        Err(CallbackError::Native(e)) => {
            error!(
                tag = view.tag(),
                kind = %e.kind,
                error = %e.message,
                "Frame processor threw a native error!"
            );
            if policy.should_disarm(e.kind) {
                warn!(
                    tag = view.tag(),
                    "Disarming frame processor after unrecoverable native error"
                );
                view.unset_frame_processor();
            }
        }
    }

    if perf.has_enough_data() {
        let average = perf.average_execution_time();
        debug!(
            tag = view.tag(),
            average_ms = average.as_millis() as u64,
            suggested_fps = format!("{:.1}", perf.suggested_frame_rate(30.0)),
            "Frame processor performance sample"
        );
        perf.clear();
    }

    // Dropping the last strong reference closes the frame if script code
    // neither closed nor retained it.
}

impl std::fmt::Debug for FrameProcessorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProcessorController")
            .field("policy", &self.policy)
            .field("min_dispatch_interval", &self.min_dispatch_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NativeError;
    use crate::frame::MemoryFrameBuffer;
    use crate::script::FunctionRef;
    use crate::script::local::LocalScriptRuntime;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn wait_for_scheduler(controller: &Arc<FrameProcessorController>) {
        let (tx, rx) = mpsc::channel();
        controller.scheduler().schedule(move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    fn install_counting_processor(
        controller: &Arc<FrameProcessorController>,
        runtime: &Arc<LocalScriptRuntime>,
        tag: i64,
    ) -> Arc<AtomicU32> {
        let context = runtime.create_worklet_context("worklet");
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        let processor = ScriptValue::Function(FunctionRef::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptValue::Undefined)
        }));
        controller
            .set_frame_processor(runtime.as_ref(), tag, &processor, &context)
            .unwrap();
        wait_for_scheduler(controller);
        count
    }

    #[test]
    fn test_set_frame_processor_unknown_view_fails() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        let context = runtime.create_worklet_context("worklet");
        let processor = ScriptValue::Function(FunctionRef::new(|_| Ok(ScriptValue::Undefined)));

        let err = controller
            .set_frame_processor(runtime.as_ref(), 99, &processor, &context)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ViewNotFound(99)));
    }

    #[test]
    fn test_set_frame_processor_bad_context_fails_before_state_change() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        controller.views().register(1);
        let processor = ScriptValue::Function(FunctionRef::new(|_| Ok(ScriptValue::Undefined)));

        let err = controller
            .set_frame_processor(
                runtime.as_ref(),
                1,
                &processor,
                &ScriptValue::String("missing".into()),
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::ContextResolution(_)));
        assert!(!controller.views().resolve(1).unwrap().has_frame_processor());
    }

    #[test]
    fn test_frames_reach_the_processor() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        let view = controller.views().register(1);
        let count = install_counting_processor(&controller, &runtime, 1);

        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        wait_for_scheduler(&controller);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sentinel_flag_set_on_context() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        controller.views().register(1);
        install_counting_processor(&controller, &runtime, 1);

        let ctx = runtime.worklet_context("worklet").unwrap();
        assert_eq!(ctx.flag(FRAME_PROCESSOR_FLAG), Some(true));
    }

    #[test]
    fn test_script_error_keeps_processor_armed() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        let view = controller.views().register(1);
        let context = runtime.create_worklet_context("worklet");

        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        let processor = ScriptValue::Function(FunctionRef::new(move |_| {
            let n = count_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                panic!("ReferenceError: detectFaces is not defined");
            }
            Ok(ScriptValue::Undefined)
        }));
        controller
            .set_frame_processor(runtime.as_ref(), 1, &processor, &context)
            .unwrap();
        wait_for_scheduler(&controller);

        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        wait_for_scheduler(&controller);

        // First frame threw, second still dispatched
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(view.has_frame_processor());
    }

    #[test]
    fn test_unknown_native_error_disarms_processor() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        let view = controller.views().register(1);
        let context = runtime.create_worklet_context("worklet");

        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        let processor = ScriptValue::Function(FunctionRef::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Err(CallbackError::Native(NativeError::new(
                NativeErrorKind::Unknown,
                "sigsegv in vendor blob",
            )))
        }));
        controller
            .set_frame_processor(runtime.as_ref(), 1, &processor, &context)
            .unwrap();
        wait_for_scheduler(&controller);

        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        wait_for_scheduler(&controller);
        assert!(!view.has_frame_processor());

        // Subsequent frames are dropped without reaching the callback
        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        wait_for_scheduler(&controller);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recognized_native_error_does_not_disarm() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        let view = controller.views().register(1);
        let context = runtime.create_worklet_context("worklet");

        let processor = ScriptValue::Function(FunctionRef::new(|_| {
            Err(CallbackError::Native(NativeError::new(
                NativeErrorKind::BufferAccess,
                "buffer gone",
            )))
        }));
        controller
            .set_frame_processor(runtime.as_ref(), 1, &processor, &context)
            .unwrap();
        wait_for_scheduler(&controller);

        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        wait_for_scheduler(&controller);
        assert!(view.has_frame_processor());
    }

    #[test]
    fn test_disarm_policy_never() {
        let config = BridgeConfig {
            disarm_policy: DisarmPolicy::Never,
            ..BridgeConfig::default()
        };
        let controller = FrameProcessorController::with_config(&config);
        let runtime = LocalScriptRuntime::new();
        let view = controller.views().register(1);
        let context = runtime.create_worklet_context("worklet");

        let processor = ScriptValue::Function(FunctionRef::new(|_| {
            Err(CallbackError::Native(NativeError::new(
                NativeErrorKind::Unknown,
                "mystery",
            )))
        }));
        controller
            .set_frame_processor(runtime.as_ref(), 1, &processor, &context)
            .unwrap();
        wait_for_scheduler(&controller);

        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        wait_for_scheduler(&controller);
        assert!(view.has_frame_processor());
    }

    #[test]
    fn test_replace_processor_leaves_exactly_one() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        let view = controller.views().register(1);
        let context = runtime.create_worklet_context("worklet");

        let first = Arc::new(AtomicU32::new(0));
        let first_clone = Arc::clone(&first);
        let processor_a = ScriptValue::Function(FunctionRef::new(move |_| {
            first_clone.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptValue::Undefined)
        }));
        let second = Arc::new(AtomicU32::new(0));
        let second_clone = Arc::clone(&second);
        let processor_b = ScriptValue::Function(FunctionRef::new(move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptValue::Undefined)
        }));

        controller
            .set_frame_processor(runtime.as_ref(), 1, &processor_a, &context)
            .unwrap();
        controller
            .set_frame_processor(runtime.as_ref(), 1, &processor_b, &context)
            .unwrap();
        wait_for_scheduler(&controller);

        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        wait_for_scheduler(&controller);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unset_is_idempotent() {
        let controller = FrameProcessorController::new();
        controller.views().register(1);
        // Never installed; both calls succeed as no-ops
        controller.unset_frame_processor(1).unwrap();
        controller.unset_frame_processor(1).unwrap();
    }

    #[test]
    fn test_unset_unknown_view_fails() {
        let controller = FrameProcessorController::new();
        let err = controller.unset_frame_processor(42).unwrap_err();
        assert!(matches!(err, BridgeError::ViewNotFound(42)));
    }

    #[test]
    fn test_fps_throttle_drops_early_frames() {
        let config = BridgeConfig {
            max_fps: Some(5.0),
            ..BridgeConfig::default()
        };
        let controller = FrameProcessorController::with_config(&config);
        let runtime = LocalScriptRuntime::new();
        let view = controller.views().register(1);
        let count = install_counting_processor(&controller, &runtime, 1);

        // Burst of frames well inside one 200ms throttle window
        for _ in 0..10 {
            view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        }
        wait_for_scheduler(&controller);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bindings_validate_arguments() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        let host: Arc<dyn HostRuntime> = runtime.clone();
        controller.install_bindings(&host);

        // Wrong viewTag type fails before any state change
        let err = runtime
            .call_global(
                "setFrameProcessor",
                &[ScriptValue::String("not a tag".into())],
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));

        // Wrong processor type
        controller.views().register(1);
        let context = runtime.create_worklet_context("worklet");
        let err = runtime
            .call_global(
                "setFrameProcessor",
                &[
                    ScriptValue::Number(1.0),
                    ScriptValue::String("not a function".into()),
                    context.clone(),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));

        // Correct call succeeds
        let processor = ScriptValue::Function(FunctionRef::new(|_| Ok(ScriptValue::Undefined)));
        runtime
            .call_global(
                "setFrameProcessor",
                &[ScriptValue::Number(1.0), processor, context],
            )
            .unwrap();

        // unsetFrameProcessor validates its tag too
        let err = runtime
            .call_global("unsetFrameProcessor", &[ScriptValue::Bool(true)])
            .unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));
        runtime
            .call_global("unsetFrameProcessor", &[ScriptValue::Number(1.0)])
            .unwrap();
    }

    #[test]
    fn test_queued_frame_after_unset_is_dropped() {
        let controller = FrameProcessorController::new();
        let runtime = LocalScriptRuntime::new();
        let view = controller.views().register(1);
        let context = runtime.create_worklet_context("worklet");

        // Block the processing thread so a frame sits in the queue while the
        // processor is removed from the script side.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        controller.scheduler().schedule(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(2));
        });

        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        let processor = ScriptValue::Function(FunctionRef::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptValue::Undefined)
        }));
        controller
            .set_frame_processor(runtime.as_ref(), 1, &processor, &context)
            .unwrap();

        // Installation job is queued behind the gate; force it through first
        gate_tx.send(()).unwrap();
        wait_for_scheduler(&controller);

        // Queue a frame behind a new gate, then uninstall before it runs
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        controller.scheduler().schedule(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(2));
        });
        view.deliver_frame(Box::new(MemoryFrameBuffer::new(64, 64)));
        controller.unset_frame_processor(1).unwrap();
        gate_tx.send(()).unwrap();
        wait_for_scheduler(&controller);

        // The queued frame must be dropped quietly, not crash or invoke
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
