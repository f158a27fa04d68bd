//! Integration test: WireServer replay
//!
//! Drives the server directly with encoded records (no client proxy) over
//! memory channels, against the null backend wrapped in a call recorder.
//! Verifies object creation, poisoning, value results, protocol
//! violations and teardown.
//!
//! Run with: cargo test -p gpuwire-server --test replay_test -- --nocapture

use gpuwire_core::config::ChannelConfig;
use gpuwire_protocol::wire::{self, RecordReader};
use gpuwire_protocol::{
    Command, ObjectHandle, ObjectType, ProtocolViolation, ServerEvent, TextureFormat, TextureUsage,
    MAX_SUBPASSES,
};
use gpuwire_server::{Backend, NullBackend, RecordingBackend, ServerError, WireServer};
use gpuwire_transport::{memory_channel, ChannelReader, ChannelSink, ChannelSource, ChannelWriter};

type TestServer = WireServer<RecordingBackend<NullBackend>>;

struct Harness {
    server: TestServer,
    commands: ChannelWriter,
    events: ChannelReader,
}

fn harness() -> Harness {
    let (commands, server_in) = memory_channel(1 << 20);
    let (server_out, events) = memory_channel(1 << 20);
    let server = WireServer::new(
        RecordingBackend::new(NullBackend::new()),
        server_in,
        server_out,
        &ChannelConfig::default(),
    );
    Harness {
        server,
        commands,
        events,
    }
}

impl Harness {
    fn send(&mut self, commands: &[Command]) -> Result<usize, ServerError> {
        for cmd in commands {
            let record = wire::encode_command(cmd, 512).unwrap();
            self.commands.write(&record).unwrap();
        }
        self.commands.flush().unwrap();
        self.server.handle_commands()
    }

    fn events(&mut self) -> Vec<ServerEvent> {
        self.server.flush().unwrap();
        let mut events = Vec::new();
        while let Some(batch) = self.events.poll_incoming().unwrap() {
            for record in RecordReader::new(&batch) {
                events.push(wire::decode_event(&record.unwrap()).unwrap());
            }
        }
        events
    }
}

fn h(ty: ObjectType, id: u32) -> ObjectHandle {
    ObjectHandle::new(ty, id)
}

fn render_pass_commands(builder: u32, result: u32) -> Vec<Command> {
    let builder = h(ObjectType::RenderPassBuilder, builder);
    vec![
        Command::DeviceCreateRenderPassBuilder {
            device: ObjectHandle::device(),
            result: builder,
        },
        Command::RenderPassBuilderSetAttachmentCount { builder, count: 2 },
        Command::RenderPassBuilderAttachmentSetFormat {
            builder,
            attachment: 0,
            format: TextureFormat::R8G8B8A8Unorm,
        },
        Command::RenderPassBuilderAttachmentSetFormat {
            builder,
            attachment: 1,
            format: TextureFormat::D32FloatS8Uint,
        },
        Command::RenderPassBuilderSetSubpassCount { builder, count: 1 },
        Command::RenderPassBuilderSubpassSetColorAttachment {
            builder,
            subpass: 0,
            output_index: 0,
            attachment: 0,
        },
        Command::RenderPassBuilderSubpassSetDepthStencilAttachment {
            builder,
            subpass: 0,
            attachment: 1,
        },
        Command::RenderPassBuilderGetResult {
            builder,
            result: h(ObjectType::RenderPass, result),
        },
    ]
}

fn texture_commands(builder: u32, result: u32, levels: u32) -> Vec<Command> {
    let builder = h(ObjectType::TextureBuilder, builder);
    vec![
        Command::DeviceCreateTextureBuilder {
            device: ObjectHandle::device(),
            result: builder,
        },
        Command::TextureBuilderSetExtent {
            builder,
            width: 640,
            height: 480,
            depth: 1,
        },
        Command::TextureBuilderSetFormat {
            builder,
            format: TextureFormat::D32FloatS8Uint,
        },
        Command::TextureBuilderSetMipLevels { builder, levels },
        Command::TextureBuilderSetAllowedUsage {
            builder,
            usage: TextureUsage::OUTPUT_ATTACHMENT.bits(),
        },
        Command::TextureBuilderGetResult {
            builder,
            result: h(ObjectType::Texture, result),
        },
    ]
}

#[test]
fn test_render_pass_replay_creates_one_render_pass() {
    let mut harness = harness();
    let replayed = harness.send(&render_pass_commands(1, 1)).unwrap();
    println!("replayed {} records", replayed);
    assert_eq!(replayed, 8);

    assert_eq!(harness.server.object_count(ObjectType::RenderPass), 1);
    assert_eq!(harness.server.object_count(ObjectType::RenderPassBuilder), 0);
    assert_eq!(harness.server.backend().inner().count("RenderPass"), 1);
    assert!(harness.events().is_empty());

    let metrics = harness.server.metrics();
    assert_eq!(metrics.records_replayed, 8);
    assert_eq!(metrics.backend_errors, 0);
}

#[test]
fn test_replay_matches_direct_backend_calls() {
    let mut harness = harness();
    harness.send(&render_pass_commands(1, 1)).unwrap();

    let mut direct = RecordingBackend::new(NullBackend::new());
    let device = direct.device();
    let builder = direct.device_create_render_pass_builder(&device);
    direct.render_pass_builder_set_attachment_count(&builder, 2);
    direct.render_pass_builder_attachment_set_format(&builder, 0, TextureFormat::R8G8B8A8Unorm);
    direct.render_pass_builder_attachment_set_format(&builder, 1, TextureFormat::D32FloatS8Uint);
    direct.render_pass_builder_set_subpass_count(&builder, 1);
    direct.render_pass_builder_subpass_set_color_attachment(&builder, 0, 0, 0);
    direct.render_pass_builder_subpass_set_depth_stencil_attachment(&builder, 0, 1);
    direct.render_pass_builder_get_result(builder).unwrap();

    for call in harness.server.backend().calls() {
        println!("  {}", call);
    }
    assert_eq!(harness.server.backend().calls(), direct.calls());
}

#[test]
fn test_fabricated_identity_terminates_session() {
    let mut harness = harness();
    let result = harness.send(&[Command::RenderPassBuilderSetAttachmentCount {
        builder: h(ObjectType::RenderPassBuilder, 9999),
        count: 2,
    }]);

    match result {
        Err(ServerError::Protocol(ProtocolViolation::InvalidHandle(handle))) => {
            println!("rejected {}", handle);
            assert_eq!(handle.id, 9999);
        }
        other => panic!("expected InvalidHandle, got {:?}", other),
    }
    assert!(harness.server.is_terminated());
    assert!(harness.server.backend().calls().is_empty());

    let events = harness.events();
    assert!(matches!(events.as_slice(), [ServerEvent::SessionTerminated { .. }]));

    // Later work is refused without touching the backend.
    let again = harness.send(&render_pass_commands(1, 1));
    assert!(matches!(again, Err(ServerError::SessionClosed(_))));
    assert!(harness.server.backend().calls().is_empty());
}

#[test]
fn test_violation_stops_decoding_mid_batch() {
    let mut harness = harness();
    let mut commands = render_pass_commands(1, 1);
    commands.insert(
        1,
        Command::Destroy {
            object: ObjectHandle::device(),
        },
    );

    let result = harness.send(&commands);
    assert!(matches!(
        result,
        Err(ServerError::Protocol(ProtocolViolation::Indestructible(_)))
    ));
    // Only the builder creation before the bad record was replayed.
    assert_eq!(harness.server.backend().calls().len(), 1);
    assert_eq!(harness.server.metrics().records_replayed, 1);
}

#[test]
fn test_duplicate_identity_is_a_violation() {
    let mut harness = harness();
    let builder = h(ObjectType::TextureBuilder, 1);
    let create = Command::DeviceCreateTextureBuilder {
        device: ObjectHandle::device(),
        result: builder,
    };
    let result = harness.send(&[create.clone(), create]);
    assert!(matches!(
        result,
        Err(ServerError::Protocol(ProtocolViolation::DuplicateIdentity(dup))) if dup == builder
    ));
    assert_eq!(harness.server.backend().inner().count("TextureBuilder"), 1);
}

#[test]
fn test_type_confused_handle_is_rejected() {
    let mut harness = harness();
    harness
        .send(&[Command::DeviceCreateTextureBuilder {
            device: ObjectHandle::device(),
            result: h(ObjectType::TextureBuilder, 1),
        }])
        .unwrap();

    let result = harness.send(&[Command::RenderPassBuilderSetAttachmentCount {
        builder: h(ObjectType::TextureBuilder, 1),
        count: 1,
    }]);
    assert!(matches!(
        result,
        Err(ServerError::Protocol(ProtocolViolation::TypeMismatch {
            expected: ObjectType::RenderPassBuilder,
            ..
        }))
    ));
}

#[test]
fn test_garbage_bytes_terminate_session() {
    let mut harness = harness();
    harness.commands.write(b"definitely not a record").unwrap();
    harness.commands.flush().unwrap();

    let result = harness.server.handle_commands();
    assert!(matches!(result, Err(ServerError::Protocol(ProtocolViolation::Malformed(_)))));
    assert!(harness.server.is_terminated());
}

#[test]
fn test_zero_mip_levels_poisons_texture() {
    let mut harness = harness();
    harness.send(&texture_commands(1, 1, 0)).unwrap();

    let texture = h(ObjectType::Texture, 1);
    assert!(harness.server.contains(texture));
    assert!(harness.server.is_poisoned(texture));

    let events = harness.events();
    match events.as_slice() {
        [ServerEvent::ObjectError { object, message, .. }] => {
            println!("{}: {}", object, message);
            assert_eq!(*object, texture);
            assert!(message.contains("mip levels"));
        }
        other => panic!("expected one ObjectError, got {:?}", other),
    }

    // Dependents are poisoned silently; the backend never sees them.
    let calls_before = harness.server.backend().calls().len();
    harness
        .send(&[
            Command::TextureCreateTextureViewBuilder {
                texture,
                result: h(ObjectType::TextureViewBuilder, 1),
            },
            Command::TextureViewBuilderGetResult {
                builder: h(ObjectType::TextureViewBuilder, 1),
                result: h(ObjectType::TextureView, 1),
            },
        ])
        .unwrap();
    assert!(harness.server.is_poisoned(h(ObjectType::TextureView, 1)));
    assert_eq!(harness.server.backend().calls().len(), calls_before);
    assert!(harness.events().is_empty());

    // Non-creating calls on a poisoned object report a device error.
    harness
        .send(&[Command::TextureFreezeUsage {
            texture,
            usage: TextureUsage::OUTPUT_ATTACHMENT.bits(),
        }])
        .unwrap();
    assert!(matches!(harness.events().as_slice(), [ServerEvent::DeviceError { .. }]));
    assert_eq!(harness.server.backend().calls().len(), calls_before);
}

#[test]
fn test_oversized_render_pass_counts_poison_result() {
    let mut harness = harness();
    let builder = h(ObjectType::RenderPassBuilder, 1);
    let render_pass = h(ObjectType::RenderPass, 1);
    harness
        .send(&[
            Command::DeviceCreateRenderPassBuilder {
                device: ObjectHandle::device(),
                result: builder,
            },
            Command::RenderPassBuilderSetAttachmentCount {
                builder,
                count: u32::MAX,
            },
            Command::RenderPassBuilderSetSubpassCount {
                builder,
                count: u32::MAX,
            },
            Command::RenderPassBuilderGetResult {
                builder,
                result: render_pass,
            },
        ])
        .unwrap();

    assert!(!harness.server.is_terminated());
    assert!(harness.server.is_poisoned(render_pass));
    match harness.events().as_slice() {
        [ServerEvent::ObjectError { object, message, .. }] => {
            println!("{}: {}", object, message);
            assert_eq!(*object, render_pass);
            assert!(message.contains("exceeds the limit"), "{}", message);
        }
        other => panic!("expected one ObjectError, got {:?}", other),
    }

    // A limit-sized render pass still works on the same session.
    let mut commands = render_pass_commands(2, 2);
    commands[4] = Command::RenderPassBuilderSetSubpassCount {
        builder: h(ObjectType::RenderPassBuilder, 2),
        count: MAX_SUBPASSES,
    };
    harness.send(&commands).unwrap();
    assert!(!harness.server.is_poisoned(h(ObjectType::RenderPass, 2)));
    assert!(harness.events().is_empty());
}

#[test]
fn test_backend_callback_errors_arrive_in_order() {
    let mut harness = harness();
    harness.send(&texture_commands(1, 1, 1)).unwrap();
    let texture = h(ObjectType::Texture, 1);

    harness
        .send(&[
            Command::TextureFreezeUsage {
                texture,
                usage: TextureUsage::SAMPLED.bits(),
            },
            Command::TextureFreezeUsage {
                texture,
                usage: TextureUsage::OUTPUT_ATTACHMENT.bits(),
            },
            Command::TextureFreezeUsage {
                texture,
                usage: TextureUsage::OUTPUT_ATTACHMENT.bits(),
            },
        ])
        .unwrap();

    let messages: Vec<String> = harness
        .events()
        .into_iter()
        .map(|event| match event {
            ServerEvent::DeviceError { message, .. } => message,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    println!("{:#?}", messages);
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("not within allowed usage"));
    assert!(messages[1].contains("already frozen"));
}

#[test]
fn test_poisoned_argument_poisons_builder() {
    let mut harness = harness();
    // A render pass with no subpass count fails at GetResult.
    let rp_builder = h(ObjectType::RenderPassBuilder, 1);
    let render_pass = h(ObjectType::RenderPass, 1);
    let fb_builder = h(ObjectType::FramebufferBuilder, 1);
    harness
        .send(&[
            Command::DeviceCreateRenderPassBuilder {
                device: ObjectHandle::device(),
                result: rp_builder,
            },
            Command::RenderPassBuilderSetAttachmentCount {
                builder: rp_builder,
                count: 1,
            },
            Command::RenderPassBuilderGetResult {
                builder: rp_builder,
                result: render_pass,
            },
            Command::DeviceCreateFramebufferBuilder {
                device: ObjectHandle::device(),
                result: fb_builder,
            },
            Command::FramebufferBuilderSetRenderPass {
                builder: fb_builder,
                render_pass,
            },
            Command::FramebufferBuilderSetDimensions {
                builder: fb_builder,
                width: 640,
                height: 480,
            },
            Command::FramebufferBuilderGetResult {
                builder: fb_builder,
                result: h(ObjectType::Framebuffer, 1),
            },
        ])
        .unwrap();

    let objects: Vec<ObjectHandle> = harness
        .events()
        .into_iter()
        .map(|event| match event {
            ServerEvent::ObjectError { object, .. } => object,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(objects, vec![render_pass, fb_builder]);
    assert!(harness.server.is_poisoned(h(ObjectType::Framebuffer, 1)));

    let backend = harness.server.backend().inner();
    assert_eq!(backend.count("FramebufferBuilder"), 0);
    assert_eq!(backend.live_objects(), 0);
}

#[test]
fn test_next_texture_is_a_value_result() {
    let mut harness = harness();
    let sc_builder = h(ObjectType::SwapChainBuilder, 1);
    let swap_chain = h(ObjectType::SwapChain, 1);
    harness
        .send(&[
            Command::DeviceCreateSwapChainBuilder {
                device: ObjectHandle::device(),
                result: sc_builder,
            },
            Command::SwapChainBuilderSetImplementation {
                builder: sc_builder,
                implementation: 0xC0FFEE,
            },
            Command::SwapChainBuilderGetResult {
                builder: sc_builder,
                result: swap_chain,
            },
            Command::SwapChainConfigure {
                swap_chain,
                format: TextureFormat::R8G8B8A8Unorm,
                usage: TextureUsage::OUTPUT_ATTACHMENT.bits(),
                width: 640,
                height: 480,
            },
        ])
        .unwrap();

    for frame in 0..2u32 {
        let texture = h(ObjectType::Texture, frame + 1);
        harness
            .send(&[
                Command::SwapChainGetNextTexture {
                    swap_chain,
                    result: texture,
                },
                Command::SwapChainPresent { swap_chain, texture },
                Command::Destroy { object: texture },
            ])
            .unwrap();

        match harness.events().as_slice() {
            [ServerEvent::NextTexture {
                texture: got,
                backbuffer_index,
                ..
            }] => {
                println!("frame {}: {} is backbuffer {}", frame, got, backbuffer_index);
                assert_eq!(*got, texture);
                assert_eq!(*backbuffer_index, frame);
            }
            other => panic!("expected NextTexture, got {:?}", other),
        }
    }
    assert_eq!(harness.server.backend().inner().count("Texture"), 0);
}

#[test]
fn test_next_texture_before_configure_poisons_result() {
    let mut harness = harness();
    let sc_builder = h(ObjectType::SwapChainBuilder, 1);
    let swap_chain = h(ObjectType::SwapChain, 1);
    let texture = h(ObjectType::Texture, 1);
    harness
        .send(&[
            Command::DeviceCreateSwapChainBuilder {
                device: ObjectHandle::device(),
                result: sc_builder,
            },
            Command::SwapChainBuilderSetImplementation {
                builder: sc_builder,
                implementation: 1,
            },
            Command::SwapChainBuilderGetResult {
                builder: sc_builder,
                result: swap_chain,
            },
            Command::SwapChainGetNextTexture {
                swap_chain,
                result: texture,
            },
        ])
        .unwrap();

    assert!(harness.server.is_poisoned(texture));
    assert!(matches!(
        harness.events().as_slice(),
        [ServerEvent::ObjectError { object, .. }] if *object == texture
    ));
}

#[test]
fn test_destroy_is_idempotent() {
    let mut harness = harness();
    harness.send(&render_pass_commands(1, 1)).unwrap();
    let render_pass = h(ObjectType::RenderPass, 1);

    harness
        .send(&[
            Command::Destroy { object: render_pass },
            Command::Destroy { object: render_pass },
        ])
        .unwrap();
    assert!(!harness.server.contains(render_pass));
    assert_eq!(harness.server.backend().inner().stale_releases(), 0);
    assert_eq!(harness.server.backend().inner().live_objects(), 0);
    assert!(harness.events().is_empty());
}

#[test]
fn test_teardown_releases_each_object_once() {
    let mut harness = harness();
    harness.send(&render_pass_commands(1, 1)).unwrap();
    harness.send(&texture_commands(1, 1, 1)).unwrap();
    harness
        .send(&[Command::DeviceCreateShaderModuleBuilder {
            device: ObjectHandle::device(),
            result: h(ObjectType::ShaderModuleBuilder, 1),
        }])
        .unwrap();
    assert_eq!(harness.server.backend().inner().live_objects(), 3);

    harness.server.teardown();
    harness.server.teardown();

    let backend = harness.server.backend().inner();
    assert_eq!(backend.live_objects(), 0);
    assert_eq!(backend.stale_releases(), 0);
    assert_eq!(harness.server.metrics().objects_released, 3);
    assert!(harness.server.is_terminated());
    assert!(matches!(
        harness.server.handle_commands(),
        Err(ServerError::SessionClosed(_))
    ));
}
