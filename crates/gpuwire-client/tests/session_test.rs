//! Integration test: client proxies against a live server session
//!
//! Wires a Device to a WireServer (null backend behind a call recorder)
//! with in-process memory channels and pumps both sides by hand:
//! client flush -> server replay -> server flush -> client events.
//!
//! Run with: cargo test -p gpuwire-client --test session_test -- --nocapture

use std::sync::Arc;

use parking_lot::Mutex;

use gpuwire_client::{ClientError, Device, RenderPass, SessionStatus, TextureView};
use gpuwire_core::config::ChannelConfig;
use gpuwire_protocol::{ObjectType, ProtocolViolation, TextureFormat, TextureUsage};
use gpuwire_server::{Backend, NullBackend, RecordingBackend, WireServer};
use gpuwire_transport::memory_channel;

struct Pair {
    device: Device,
    server: WireServer<RecordingBackend<NullBackend>>,
    errors: Arc<Mutex<Vec<String>>>,
}

fn pair() -> Pair {
    pair_with_capacity(1 << 20)
}

fn pair_with_capacity(capacity: usize) -> Pair {
    let config = ChannelConfig {
        capacity,
        ..ChannelConfig::default()
    };
    let (client_out, server_in) = memory_channel(capacity);
    let (server_out, client_in) = memory_channel(capacity);
    let server = WireServer::new(
        RecordingBackend::new(NullBackend::new()),
        server_in,
        server_out,
        &config,
    );
    let device = Device::connect(client_out, client_in, &config);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    device.set_error_callback(move |message| {
        println!("device error: {}", message);
        sink.lock().push(message.to_string());
    });

    Pair {
        device,
        server,
        errors,
    }
}

impl Pair {
    /// Deliver everything the client encoded and everything the server
    /// answered. Returns the number of events the client handled.
    fn round_trip(&mut self) -> usize {
        self.device.flush().unwrap();
        self.server.handle_commands().unwrap();
        self.server.flush().unwrap();
        self.device.handle_events().unwrap()
    }

    fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

fn color_and_depth_render_pass(device: &Device) -> RenderPass {
    let mut builder = device.create_render_pass_builder().unwrap();
    builder.set_attachment_count(2).unwrap();
    builder.attachment_set_format(0, TextureFormat::R8G8B8A8Unorm).unwrap();
    builder.attachment_set_format(1, TextureFormat::D32FloatS8Uint).unwrap();
    builder.set_subpass_count(1).unwrap();
    builder.subpass_set_color_attachment(0, 0, 0).unwrap();
    builder.subpass_set_depth_stencil_attachment(0, 1).unwrap();
    builder.get_result().unwrap()
}

fn texture_view(device: &Device, format: TextureFormat, levels: u32) -> TextureView {
    let mut builder = device.create_texture_builder().unwrap();
    builder.set_extent(640, 480, 1).unwrap();
    builder.set_format(format).unwrap();
    builder.set_mip_levels(levels).unwrap();
    builder.set_allowed_usage(TextureUsage::OUTPUT_ATTACHMENT).unwrap();
    let texture = builder.get_result().unwrap();
    texture.create_texture_view_builder().unwrap().get_result().unwrap()
}

#[test]
fn test_render_pass_and_framebuffer_scenario() {
    let mut pair = pair();
    let render_pass = color_and_depth_render_pass(&pair.device);
    assert_eq!(render_pass.attachment_count(), 2);
    pair.round_trip();

    assert_eq!(pair.server.object_count(ObjectType::RenderPass), 1);
    assert_eq!(pair.server.backend().inner().count("RenderPass"), 1);

    let color = texture_view(&pair.device, TextureFormat::R8G8B8A8Unorm, 1);
    let depth = texture_view(&pair.device, TextureFormat::D32FloatS8Uint, 1);
    let mut builder = pair.device.create_framebuffer_builder().unwrap();
    builder.set_render_pass(&render_pass).unwrap();
    builder.set_dimensions(640, 480).unwrap();
    builder.set_attachment(0, &color).unwrap();
    builder.set_attachment(1, &depth).unwrap();
    let framebuffer = builder.get_result().unwrap();
    pair.round_trip();

    println!("framebuffer {:?}", framebuffer);
    assert!(pair.errors().is_empty(), "{:?}", pair.errors());
    assert!(!framebuffer.is_poisoned());
    assert_eq!(pair.server.backend().inner().count("Framebuffer"), 1);
    assert!(!pair.server.is_poisoned(framebuffer.handle()));
}

#[test]
fn test_proxied_calls_match_direct_backend_calls() {
    let mut pair = pair();
    let mut builder = pair.device.create_texture_builder().unwrap();
    builder.set_extent(256, 256, 1).unwrap();
    builder.set_format(TextureFormat::R8G8B8A8Unorm).unwrap();
    builder.set_mip_levels(9).unwrap();
    builder.set_allowed_usage(TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST).unwrap();
    let texture = builder.get_result().unwrap();
    texture.freeze_usage(TextureUsage::SAMPLED).unwrap();
    drop(texture);
    pair.round_trip();

    let mut direct = RecordingBackend::new(NullBackend::new());
    let device = direct.device();
    let builder = direct.device_create_texture_builder(&device);
    direct.texture_builder_set_extent(&builder, 256, 256, 1);
    direct.texture_builder_set_format(&builder, TextureFormat::R8G8B8A8Unorm);
    direct.texture_builder_set_mip_levels(&builder, 9);
    direct.texture_builder_set_allowed_usage(&builder, TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST);
    let texture = direct.texture_builder_get_result(builder).unwrap();
    direct.texture_freeze_usage(&texture, TextureUsage::SAMPLED);
    direct.release(texture);

    for call in pair.server.backend().calls() {
        println!("  {}", call);
    }
    assert_eq!(pair.server.backend().calls(), direct.calls());
}

#[test]
fn test_zero_mip_levels_reports_through_callback() {
    let mut pair = pair();
    let mut builder = pair.device.create_texture_builder().unwrap();
    builder.set_extent(640, 480, 1).unwrap();
    builder.set_format(TextureFormat::D32FloatS8Uint).unwrap();
    builder.set_mip_levels(0).unwrap();
    // The call appears to succeed; the failure arrives asynchronously.
    let texture = builder.get_result().unwrap();
    assert!(!texture.is_poisoned());
    pair.round_trip();

    let errors = pair.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("mip levels"), "{}", errors[0]);
    assert!(texture.is_poisoned());
    assert!(pair.server.contains(texture.handle()));

    // Dependents surface the poisoned state without new errors.
    let view = texture.create_texture_view_builder().unwrap().get_result().unwrap();
    assert!(view.is_poisoned());
    pair.round_trip();
    assert!(pair.server.is_poisoned(view.handle()));
    assert_eq!(pair.errors().len(), 1);
}

#[test]
fn test_events_arrive_in_replay_order() {
    let mut pair = pair();
    let mut builder = pair.device.create_texture_builder().unwrap();
    builder.set_extent(64, 64, 1).unwrap();
    builder.set_format(TextureFormat::R8G8B8A8Unorm).unwrap();
    builder.set_mip_levels(1).unwrap();
    builder.set_allowed_usage(TextureUsage::OUTPUT_ATTACHMENT).unwrap();
    let texture = builder.get_result().unwrap();

    texture.freeze_usage(TextureUsage::SAMPLED).unwrap();
    let _broken = texture_view(&pair.device, TextureFormat::R8G8B8A8Unorm, 0);
    texture.freeze_usage(TextureUsage::OUTPUT_ATTACHMENT).unwrap();
    texture.freeze_usage(TextureUsage::OUTPUT_ATTACHMENT).unwrap();
    pair.round_trip();

    let errors = pair.errors();
    assert_eq!(errors.len(), 3, "{:?}", errors);
    assert!(errors[0].contains("not within allowed usage"));
    assert!(errors[1].contains("mip levels"));
    assert!(errors[2].contains("already frozen"));
}

#[test]
fn test_dropping_unfinished_builder_destroys_it() {
    let mut pair = pair();
    let builder = pair.device.create_texture_builder().unwrap();
    pair.round_trip();
    assert_eq!(pair.server.object_count(ObjectType::TextureBuilder), 1);

    drop(builder);
    pair.round_trip();
    assert_eq!(pair.server.object_count(ObjectType::TextureBuilder), 0);
    assert_eq!(pair.server.backend().inner().live_objects(), 0);
    assert_eq!(pair.server.backend().inner().stale_releases(), 0);
}

#[test]
fn test_last_proxy_clone_destroys_object() {
    let mut pair = pair();
    let render_pass = color_and_depth_render_pass(&pair.device);
    let clone = render_pass.clone();
    pair.round_trip();

    drop(render_pass);
    pair.round_trip();
    assert!(pair.server.contains(clone.handle()));

    let handle = clone.handle();
    drop(clone);
    pair.round_trip();
    assert!(!pair.server.contains(handle));
    assert_eq!(pair.server.backend().inner().count("RenderPass"), 0);
}

#[test]
fn test_swap_chain_backbuffer_index_arrives_with_events() {
    let mut pair = pair();
    let mut builder = pair.device.create_swap_chain_builder().unwrap();
    builder.set_implementation(0xC0FFEE).unwrap();
    let swap_chain = builder.get_result().unwrap();
    swap_chain
        .configure(TextureFormat::R8G8B8A8Unorm, TextureUsage::OUTPUT_ATTACHMENT, 640, 480)
        .unwrap();

    for frame in 0..3u32 {
        let texture = swap_chain.get_next_texture().unwrap();
        assert_eq!(texture.backbuffer_index(), None);
        pair.round_trip();
        println!("frame {}: backbuffer {:?}", frame, texture.backbuffer_index());
        assert_eq!(texture.backbuffer_index(), Some(frame));

        swap_chain.present(&texture).unwrap();
    }
    pair.round_trip();
    assert!(pair.errors().is_empty(), "{:?}", pair.errors());
    assert_eq!(pair.server.backend().inner().count("Texture"), 0);
}

#[test]
fn test_poisoned_render_pass_poisons_framebuffer() {
    let mut pair = pair();
    let mut builder = pair.device.create_render_pass_builder().unwrap();
    builder.set_attachment_count(1).unwrap();
    builder.attachment_set_format(0, TextureFormat::D32FloatS8Uint).unwrap();
    builder.set_subpass_count(1).unwrap();
    // Depth format used as a color output: rejected by the backend.
    builder.subpass_set_color_attachment(0, 0, 0).unwrap();
    let render_pass = builder.get_result().unwrap();

    let mut fb = pair.device.create_framebuffer_builder().unwrap();
    fb.set_render_pass(&render_pass).unwrap();
    fb.set_dimensions(64, 64).unwrap();
    let framebuffer = fb.get_result().unwrap();
    pair.round_trip();

    let errors = pair.errors();
    assert_eq!(errors.len(), 2, "{:?}", errors);
    assert!(render_pass.is_poisoned());
    assert!(framebuffer.is_poisoned());
    assert!(pair.server.is_poisoned(framebuffer.handle()));
}

#[test]
fn test_error_for_destroyed_object_is_ignored() {
    let mut pair = pair();
    let mut builder = pair.device.create_texture_builder().unwrap();
    builder.set_extent(16, 16, 1).unwrap();
    builder.set_format(TextureFormat::R8G8B8A8Unorm).unwrap();
    builder.set_mip_levels(0).unwrap();
    let texture = builder.get_result().unwrap();
    drop(texture);

    let handled = pair.round_trip();
    assert_eq!(handled, 1);
    assert!(pair.errors().is_empty());
    assert!(!pair.device.is_terminated());
}

#[test]
fn test_capacity_boundary_is_fatal_and_leaves_buffer_unchanged() {
    let mut pair = pair_with_capacity(4096);
    let mut builder = pair.device.create_shader_module_builder().unwrap();
    let buffered = pair.device.buffered();
    assert!(buffered > 0);

    // Pseudo-random words so compression cannot shrink the record.
    let mut x = 0x1234_5678u32;
    let code: Vec<u32> = (0..4096)
        .map(|_| {
            x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            x
        })
        .collect();

    match builder.set_source(&code) {
        Err(ClientError::Protocol(ProtocolViolation::CapacityExceeded { size, capacity, .. })) => {
            println!("{} byte record rejected by {} byte channel", size, capacity);
            assert_eq!(capacity, 4096);
        }
        other => panic!("expected CapacityExceeded, got {:?}", other),
    }
    assert_eq!(pair.device.buffered(), buffered);
    assert!(pair.device.is_terminated());
    assert!(matches!(
        pair.device.create_texture_builder(),
        Err(ClientError::SessionClosed(_))
    ));
    drop(builder);

    // The server never saw anything.
    assert_eq!(pair.server.handle_commands().unwrap(), 0);
}

#[test]
fn test_disconnect_makes_proxies_inert() {
    let mut pair = pair();
    let render_pass = color_and_depth_render_pass(&pair.device);
    pair.round_trip();
    let encoded = pair.device.metrics().records_encoded;

    pair.device.disconnect();
    pair.device.disconnect();
    assert!(matches!(pair.device.status(), SessionStatus::Terminated { .. }));
    assert!(matches!(
        pair.device.create_render_pass_builder(),
        Err(ClientError::SessionClosed(_))
    ));
    assert!(matches!(pair.device.flush(), Err(ClientError::SessionClosed(_))));

    drop(render_pass);
    assert_eq!(pair.device.metrics().records_encoded, encoded);
}

#[test]
fn test_metrics_track_both_directions() {
    let mut pair = pair();
    let _render_pass = color_and_depth_render_pass(&pair.device);
    let _broken = texture_view(&pair.device, TextureFormat::R8G8B8A8Unorm, 0);
    pair.round_trip();

    let client = pair.device.metrics();
    let server = pair.server.metrics();
    println!("client {:?}", client);
    println!("server {:?}", server);
    assert_eq!(client.records_encoded, server.records_replayed);
    assert_eq!(client.flushes, 1);
    assert_eq!(client.events_handled, server.events_sent);
    assert_eq!(client.errors_reported, 1);
}

#[test]
fn test_view_keeps_its_texture_alive() {
    let mut pair = pair();
    let view = texture_view(&pair.device, TextureFormat::R8G8B8A8Unorm, 1);
    pair.round_trip();

    // The helper dropped its texture proxy; the view still holds one.
    assert_eq!(pair.server.backend().inner().count("Texture"), 1);
    assert!(pair.server.contains(view.texture().handle()));

    drop(view);
    pair.round_trip();
    assert_eq!(pair.server.backend().inner().count("Texture"), 0);
    assert_eq!(pair.server.backend().inner().count("TextureView"), 0);
    assert!(pair.errors().is_empty());
}
