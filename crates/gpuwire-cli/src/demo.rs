use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::DuplexStream;
use tracing::{info, warn};

use gpuwire_client::{ClientMetrics, Device, Texture, TextureView};
use gpuwire_core::config::{BackendKind, ChannelConfig, TransportMode};
use gpuwire_protocol::{TextureDimension, TextureFormat, TextureUsage};
use gpuwire_server::{Backend, BackendError, MetricsSnapshot, NullBackend, RecordingBackend, WireServer};
use gpuwire_transport::{memory_channel, stream, ChannelReader, ChannelWriter, TransportError};

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Stand-in for a native window; the null backend only checks it is nonzero.
const SURFACE_IMPLEMENTATION: u64 = 0x6770_7577;

pub struct DemoOptions {
    pub backend: BackendKind,
    pub transport: TransportMode,
    pub channel: ChannelConfig,
    pub frames: u32,
    pub inject_error: bool,
    /// Skip the wire and drive the backend directly.
    pub direct: bool,
    pub trace: bool,
    pub json: bool,
}

/// What one run of the sample scenario produced.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub backend: String,
    pub transport: String,
    pub frames: u32,
    pub backbuffers: Vec<Option<u32>>,
    pub poisoned_framebuffers: u32,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<MetricsSnapshot>,
    pub live_after_teardown: usize,
    /// Whether the replayed call log equals a direct run of the scenario.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_matches: Option<bool>,
    /// Backend calls made by replay.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
    /// Backend calls made by the direct run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub direct_calls: Vec<String>,
}

/// One direction of a stream-linked session: a memory channel drained into
/// a duplex pipe on one end and refilled from it on the other.
struct Bridge {
    from: ChannelReader,
    near: DuplexStream,
    far: DuplexStream,
    to: ChannelWriter,
}

impl Bridge {
    async fn pump(&mut self) -> Result<usize, TransportError> {
        let bytes = stream::forward(&mut self.from, &mut self.near).await?;
        if bytes > 0 {
            stream::receive(&mut self.far, &mut self.to, bytes).await?;
        }
        Ok(bytes)
    }
}

/// Returns the endpoint writer and reader, plus the bridge between them
/// when the two ends talk over a byte stream.
fn link(mode: TransportMode, capacity: usize) -> (ChannelWriter, ChannelReader, Option<Bridge>) {
    match mode {
        TransportMode::Memory => {
            let (writer, reader) = memory_channel(capacity);
            (writer, reader, None)
        }
        TransportMode::Stream => {
            let (writer, from) = memory_channel(capacity);
            let (to, reader) = memory_channel(capacity);
            // A flushed batch never exceeds the capacity, so the pipe can
            // take a whole batch before anyone reads it.
            let (near, far) = tokio::io::duplex(capacity);
            (
                writer,
                reader,
                Some(Bridge {
                    from,
                    near,
                    far,
                    to,
                }),
            )
        }
    }
}

/// A client device and a server session wired together in-process.
pub struct Harness {
    pub device: Device,
    pub server: WireServer<RecordingBackend<NullBackend>>,
    pub errors: Arc<Mutex<Vec<String>>>,
    upstream: Option<Bridge>,
    downstream: Option<Bridge>,
}

impl Harness {
    pub fn new(backend: BackendKind, transport: TransportMode, channel: &ChannelConfig) -> anyhow::Result<Self> {
        ensure_available(backend)?;

        let (client_out, server_in, upstream) = link(transport, channel.capacity);
        let (server_out, client_in, downstream) = link(transport, channel.capacity);
        let server = WireServer::new(
            RecordingBackend::new(NullBackend::new()),
            server_in,
            server_out,
            channel,
        );
        let device = Device::connect(client_out, client_in, channel);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        device.set_error_callback(move |message| {
            warn!("device error: {}", message);
            sink.lock().push(message.to_string());
        });

        Ok(Self {
            device,
            server,
            errors,
            upstream,
            downstream,
        })
    }

    /// Flush the client, replay on the server, flush the server and
    /// handle the answers. Returns the number of events handled.
    pub async fn round_trip(&mut self) -> anyhow::Result<usize> {
        self.device.flush()?;
        if let Some(bridge) = self.upstream.as_mut() {
            bridge.pump().await?;
        }
        self.server.handle_commands()?;
        self.server.flush()?;
        if let Some(bridge) = self.downstream.as_mut() {
            bridge.pump().await?;
        }
        Ok(self.device.handle_events()?)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

/// Observations from the scenario, gathered while its proxies were alive.
pub struct ScenarioOutcome {
    pub backbuffers: Vec<Option<u32>>,
    pub poisoned_framebuffers: u32,
    pub depth_poisoned: bool,
}

fn view_of(texture: &Texture) -> anyhow::Result<TextureView> {
    let mut builder = texture.create_texture_view_builder()?;
    Ok(builder.get_result()?)
}

/// The sample scenario: a swap chain, a render pass with one color and one
/// depth-stencil attachment, a depth texture, then per frame a framebuffer
/// over the acquired image and a present. With `inject_error` the depth
/// texture is built with zero mip levels.
pub async fn run_scenario(h: &mut Harness, frames: u32, inject_error: bool) -> anyhow::Result<ScenarioOutcome> {
    let mut outcome = ScenarioOutcome {
        backbuffers: Vec::new(),
        poisoned_framebuffers: 0,
        depth_poisoned: false,
    };

    let device = h.device.clone();

    let mut builder = device.create_swap_chain_builder()?;
    builder.set_implementation(SURFACE_IMPLEMENTATION)?;
    let swap_chain = builder.get_result()?;
    swap_chain.configure(
        TextureFormat::R8G8B8A8Unorm,
        TextureUsage::OUTPUT_ATTACHMENT,
        FRAME_WIDTH,
        FRAME_HEIGHT,
    )?;

    let mut builder = device.create_render_pass_builder()?;
    builder.set_attachment_count(2)?;
    builder.attachment_set_format(0, TextureFormat::R8G8B8A8Unorm)?;
    builder.attachment_set_format(1, TextureFormat::D32FloatS8Uint)?;
    builder.set_subpass_count(1)?;
    builder.subpass_set_color_attachment(0, 0, 0)?;
    builder.subpass_set_depth_stencil_attachment(0, 1)?;
    let render_pass = builder.get_result()?;

    let mut builder = device.create_texture_builder()?;
    builder.set_dimension(TextureDimension::E2D)?;
    builder.set_extent(FRAME_WIDTH, FRAME_HEIGHT, 1)?;
    builder.set_format(TextureFormat::D32FloatS8Uint)?;
    builder.set_mip_levels(if inject_error { 0 } else { 1 })?;
    builder.set_allowed_usage(TextureUsage::OUTPUT_ATTACHMENT)?;
    let depth = builder.get_result()?;
    depth.freeze_usage(TextureUsage::OUTPUT_ATTACHMENT)?;
    let depth_view = view_of(&depth)?;

    h.round_trip().await?;
    outcome.depth_poisoned = depth.is_poisoned();

    for frame in 0..frames {
        let backbuffer = swap_chain.get_next_texture()?;
        let backbuffer_view = view_of(&backbuffer)?;

        let mut builder = device.create_framebuffer_builder()?;
        builder.set_render_pass(&render_pass)?;
        builder.set_dimensions(FRAME_WIDTH, FRAME_HEIGHT)?;
        builder.set_attachment(0, &backbuffer_view)?;
        builder.set_attachment(1, &depth_view)?;
        let framebuffer = builder.get_result()?;

        swap_chain.present(&backbuffer)?;
        h.round_trip().await?;

        let index = backbuffer.backbuffer_index();
        if framebuffer.is_poisoned() {
            outcome.poisoned_framebuffers += 1;
        }
        info!(frame, backbuffer = ?index, poisoned = framebuffer.is_poisoned(), "frame presented");
        outcome.backbuffers.push(index);
    }

    drop((depth_view, depth, render_pass, swap_chain));
    h.round_trip().await?;
    Ok(outcome)
}

// ── Direct use ──────────────────────────────────────────────

/// The sample scenario run with nothing between the caller and the backend.
pub struct DirectRun {
    pub outcome: ScenarioOutcome,
    pub calls: Vec<String>,
    pub errors: Vec<String>,
    pub live_after_teardown: usize,
}

fn keep<T>(result: Result<T, BackendError>, what: &str, errors: &Mutex<Vec<String>>) -> Option<T> {
    result
        .map_err(|e| errors.lock().push(format!("{}: {}", what, e)))
        .ok()
}

fn direct_view<B: Backend>(
    backend: &mut B,
    texture: &B::Object,
    what: &str,
    errors: &Mutex<Vec<String>>,
) -> Option<B::Object> {
    let builder = backend.texture_create_texture_view_builder(texture);
    keep(backend.texture_view_builder_get_result(builder), what, errors)
}

/// A framebuffer builder that meets an invalid input is released on the
/// spot and every later call on it is skipped, as replay does.
fn direct_framebuffer<B: Backend>(
    backend: &mut B,
    device: &B::Object,
    render_pass: Option<&B::Object>,
    views: [Option<&B::Object>; 2],
    errors: &Mutex<Vec<String>>,
) -> Option<B::Object> {
    let builder = backend.device_create_framebuffer_builder(device);
    let Some(render_pass) = render_pass else {
        backend.release(builder);
        errors.lock().push("framebuffer builder references an invalid render pass".to_string());
        return None;
    };
    backend.framebuffer_builder_set_render_pass(&builder, render_pass);
    backend.framebuffer_builder_set_dimensions(&builder, FRAME_WIDTH, FRAME_HEIGHT);
    for (slot, view) in (0u32..).zip(views) {
        let Some(view) = view else {
            backend.release(builder);
            errors
                .lock()
                .push(format!("framebuffer builder references an invalid view in slot {}", slot));
            return None;
        };
        backend.framebuffer_builder_set_attachment(&builder, slot, view);
    }
    keep(backend.framebuffer_builder_get_result(builder), "framebuffer", errors)
}

/// Drive the sample scenario straight against `backend`, making exactly
/// the calls replay makes for [`run_scenario`], in the same order. An
/// object that failed is `None`; what replay would report as an error is
/// pushed to `errors`.
pub fn drive_direct<B: Backend>(
    backend: &mut B,
    frames: u32,
    inject_error: bool,
    errors: &Mutex<Vec<String>>,
) -> ScenarioOutcome {
    let mut outcome = ScenarioOutcome {
        backbuffers: Vec::new(),
        poisoned_framebuffers: 0,
        depth_poisoned: false,
    };
    let device = backend.device();

    let builder = backend.device_create_swap_chain_builder(&device);
    backend.swap_chain_builder_set_implementation(&builder, SURFACE_IMPLEMENTATION);
    let swap_chain = keep(backend.swap_chain_builder_get_result(builder), "swap chain", errors);
    match &swap_chain {
        Some(chain) => backend.swap_chain_configure(
            chain,
            TextureFormat::R8G8B8A8Unorm,
            TextureUsage::OUTPUT_ATTACHMENT,
            FRAME_WIDTH,
            FRAME_HEIGHT,
        ),
        None => errors.lock().push("Configure on invalid swap chain".to_string()),
    }

    let builder = backend.device_create_render_pass_builder(&device);
    backend.render_pass_builder_set_attachment_count(&builder, 2);
    backend.render_pass_builder_attachment_set_format(&builder, 0, TextureFormat::R8G8B8A8Unorm);
    backend.render_pass_builder_attachment_set_format(&builder, 1, TextureFormat::D32FloatS8Uint);
    backend.render_pass_builder_set_subpass_count(&builder, 1);
    backend.render_pass_builder_subpass_set_color_attachment(&builder, 0, 0, 0);
    backend.render_pass_builder_subpass_set_depth_stencil_attachment(&builder, 0, 1);
    let render_pass = keep(backend.render_pass_builder_get_result(builder), "render pass", errors);

    let builder = backend.device_create_texture_builder(&device);
    backend.texture_builder_set_dimension(&builder, TextureDimension::E2D);
    backend.texture_builder_set_extent(&builder, FRAME_WIDTH, FRAME_HEIGHT, 1);
    backend.texture_builder_set_format(&builder, TextureFormat::D32FloatS8Uint);
    backend.texture_builder_set_mip_levels(&builder, if inject_error { 0 } else { 1 });
    backend.texture_builder_set_allowed_usage(&builder, TextureUsage::OUTPUT_ATTACHMENT);
    let depth = keep(backend.texture_builder_get_result(builder), "depth texture", errors);
    let depth_view = match &depth {
        Some(texture) => {
            backend.texture_freeze_usage(texture, TextureUsage::OUTPUT_ATTACHMENT);
            direct_view(backend, texture, "depth view", errors)
        }
        None => {
            errors.lock().push("FreezeUsage on invalid depth texture".to_string());
            None
        }
    };
    outcome.depth_poisoned = depth.is_none();

    for frame in 0..frames {
        let acquired = match &swap_chain {
            Some(chain) => backend.swap_chain_get_next_texture(chain),
            None => Err(BackendError::new("swap chain is invalid")),
        };
        let (backbuffer, index) = match keep(acquired, "backbuffer", errors) {
            Some((texture, index)) => (Some(texture), Some(index)),
            None => (None, None),
        };
        let backbuffer_view = match &backbuffer {
            Some(texture) => direct_view(backend, texture, "backbuffer view", errors),
            None => None,
        };

        let framebuffer = direct_framebuffer(
            backend,
            &device,
            render_pass.as_ref(),
            [backbuffer_view.as_ref(), depth_view.as_ref()],
            errors,
        );

        match (&swap_chain, &backbuffer) {
            (Some(chain), Some(texture)) => backend.swap_chain_present(chain, texture),
            _ => errors
                .lock()
                .push("Present references an invalid object".to_string()),
        }

        if framebuffer.is_none() {
            outcome.poisoned_framebuffers += 1;
        }
        info!(frame, backbuffer = ?index, poisoned = framebuffer.is_none(), "frame presented directly");
        outcome.backbuffers.push(index);

        for object in [framebuffer, backbuffer_view, backbuffer].into_iter().flatten() {
            backend.release(object);
        }
    }

    for object in [depth_view, depth, render_pass, swap_chain].into_iter().flatten() {
        backend.release(object);
    }
    outcome
}

/// Run [`drive_direct`] on a fresh recording null backend.
pub fn run_direct(frames: u32, inject_error: bool) -> DirectRun {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let mut backend = RecordingBackend::new(NullBackend::new());
    backend.set_error_callback(Box::new(move |message: &str| {
        warn!("backend error: {}", message);
        sink.lock().push(message.to_string());
    }));

    let outcome = drive_direct(&mut backend, frames, inject_error, &errors);
    let errors = errors.lock().clone();
    DirectRun {
        outcome,
        calls: backend.calls().to_vec(),
        errors,
        live_after_teardown: backend.inner().live_objects(),
    }
}

// ── Reporting ───────────────────────────────────────────────

fn ensure_available(backend: BackendKind) -> anyhow::Result<()> {
    if backend != BackendKind::Null {
        anyhow::bail!("backend '{}' is not available in this build", backend);
    }
    Ok(())
}

async fn wire_report(options: &DemoOptions) -> anyhow::Result<DemoReport> {
    let mut h = Harness::new(options.backend, options.transport, &options.channel)?;
    info!(
        backend = %options.backend,
        transport = ?options.transport,
        frames = options.frames,
        "running demo scenario"
    );

    let outcome = run_scenario(&mut h, options.frames, options.inject_error).await?;
    h.server.teardown();

    let replayed = h.server.backend().calls();
    let direct = run_direct(options.frames, options.inject_error);
    let replay_matches = replayed == direct.calls.as_slice();
    if !replay_matches {
        warn!(
            replayed = replayed.len(),
            direct = direct.calls.len(),
            "replayed backend calls differ from direct use"
        );
    }

    let (calls, direct_calls) = if options.trace {
        (replayed.to_vec(), direct.calls)
    } else {
        (Vec::new(), Vec::new())
    };
    Ok(DemoReport {
        backend: options.backend.to_string(),
        transport: format!("{:?}", options.transport).to_lowercase(),
        frames: options.frames,
        backbuffers: outcome.backbuffers,
        poisoned_framebuffers: outcome.poisoned_framebuffers,
        errors: h.error_messages(),
        client: Some(h.device.metrics()),
        server: Some(h.server.metrics()),
        live_after_teardown: h.server.backend().inner().live_objects(),
        replay_matches: Some(replay_matches),
        calls,
        direct_calls,
    })
}

fn direct_report(options: &DemoOptions) -> DemoReport {
    info!(
        backend = %options.backend,
        frames = options.frames,
        "running demo scenario against the backend directly"
    );
    let direct = run_direct(options.frames, options.inject_error);
    DemoReport {
        backend: options.backend.to_string(),
        transport: "direct".to_string(),
        frames: options.frames,
        backbuffers: direct.outcome.backbuffers,
        poisoned_framebuffers: direct.outcome.poisoned_framebuffers,
        errors: direct.errors,
        client: None,
        server: None,
        live_after_teardown: direct.live_after_teardown,
        replay_matches: None,
        calls: Vec::new(),
        direct_calls: if options.trace { direct.calls } else { Vec::new() },
    }
}

pub async fn run_demo(options: DemoOptions) -> anyhow::Result<()> {
    ensure_available(options.backend)?;
    let report = if options.direct {
        direct_report(&options)
    } else {
        wire_report(&options).await?
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_calls(title: &str, calls: &[String]) {
    if calls.is_empty() {
        return;
    }
    println!();
    println!("  {}:", title);
    for call in calls {
        println!("    {}", call);
    }
}

fn print_report(report: &DemoReport) {
    println!();
    println!("gpuwire demo ({} backend, {} transport)", report.backend, report.transport);
    println!("-------------------------------");

    for (frame, index) in report.backbuffers.iter().enumerate() {
        match index {
            Some(index) => println!("  frame {:>3}: backbuffer {}", frame, index),
            None => println!("  frame {:>3}: backbuffer unknown", frame),
        }
    }
    if report.poisoned_framebuffers > 0 {
        println!("  {} framebuffer(s) poisoned", report.poisoned_framebuffers);
    }

    println!();
    if let Some(client) = &report.client {
        println!("  client: {} records, {} bytes, {} events handled",
            client.records_encoded, client.bytes_encoded, client.events_handled);
    }
    if let Some(server) = &report.server {
        println!("  server: {} records replayed, {} backend errors, {} events sent",
            server.records_replayed, server.backend_errors, server.events_sent);
    }
    println!("  live backend objects after teardown: {}", report.live_after_teardown);
    if let Some(matches) = report.replay_matches {
        println!("  replayed calls match direct use: {}", if matches { "yes" } else { "no" });
    }

    if !report.errors.is_empty() {
        println!();
        println!("  errors reported:");
        for error in &report.errors {
            println!("    {}", error);
        }
    }

    print_calls("backend calls (replayed)", &report.calls);
    print_calls("backend calls (direct)", &report.direct_calls);
    println!();
}
