//! Integration test: ObjectTable and IdAllocator.
//!
//! Run with: cargo test -p gpuwire-core --test object_table_test -- --nocapture

use gpuwire_core::{CoreError, IdAllocator, ObjectTable};
use gpuwire_protocol::{ObjectHandle, ObjectType};

#[test]
fn test_insert_rejects_live_duplicate() {
    let table = ObjectTable::new();
    let handle = ObjectHandle::new(ObjectType::RenderPass, 7);

    table.insert(handle, "first").unwrap();
    match table.insert(handle, "second") {
        Err(CoreError::DuplicateHandle(h)) => assert_eq!(h, handle),
        other => panic!("expected DuplicateHandle, got {:?}", other),
    }
    assert_eq!(table.resolve(handle, ObjectType::RenderPass).unwrap(), "first");

    // Re-insertion is only legal after a remove.
    table.remove(handle);
    table.insert(handle, "third").unwrap();
}

#[test]
fn test_identities_are_scoped_per_type() {
    let table = ObjectTable::new();
    table.insert(ObjectHandle::new(ObjectType::Texture, 1), 10).unwrap();
    table.insert(ObjectHandle::new(ObjectType::TextureView, 1), 20).unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(table.count(ObjectType::Texture), 1);
    assert_eq!(
        table.resolve(ObjectHandle::new(ObjectType::TextureView, 1), ObjectType::TextureView).unwrap(),
        20
    );
}

#[test]
fn test_resolve_checks_presence_and_type() {
    let table = ObjectTable::new();
    let texture = ObjectHandle::new(ObjectType::Texture, 3);
    table.insert(texture, ()).unwrap();

    assert!(matches!(
        table.resolve(texture, ObjectType::TextureView),
        Err(CoreError::TypeMismatch { expected: ObjectType::TextureView, .. })
    ));
    assert!(matches!(
        table.resolve(ObjectHandle::new(ObjectType::Texture, 9999), ObjectType::Texture),
        Err(CoreError::HandleNotFound(_))
    ));
}

#[test]
fn test_remove_absent_is_noop() {
    let table: ObjectTable<u32> = ObjectTable::new();
    let handle = ObjectHandle::new(ObjectType::Framebuffer, 1);
    assert!(table.remove(handle).is_none());
    table.insert(handle, 5).unwrap();
    assert_eq!(table.remove(handle), Some(5));
    assert!(table.remove(handle).is_none());
    assert!(table.is_empty());
}

#[test]
fn test_with_mutates_in_place() {
    let table = ObjectTable::new();
    let handle = ObjectHandle::new(ObjectType::SwapChain, 1);
    table.insert(handle, 0u32).unwrap();
    table.with(handle, ObjectType::SwapChain, |v| *v += 2).unwrap();
    assert_eq!(table.resolve(handle, ObjectType::SwapChain).unwrap(), 2);
}

#[test]
fn test_for_each_mut_visits_every_entry() {
    let table = ObjectTable::new();
    for id in 1..=4 {
        table.insert(ObjectHandle::new(ObjectType::TextureView, id), 0u32).unwrap();
    }
    table.for_each_mut(|handle, v| *v = handle.id * 10);

    for id in 1..=4 {
        let handle = ObjectHandle::new(ObjectType::TextureView, id);
        assert_eq!(table.resolve(handle, ObjectType::TextureView).unwrap(), id * 10);
    }
}

#[test]
fn test_drain_releases_newest_first() {
    let table = ObjectTable::new();
    for id in 1..=3 {
        table.insert(ObjectHandle::new(ObjectType::Texture, id), id).unwrap();
    }
    table.insert(ObjectHandle::new(ObjectType::Framebuffer, 1), 100).unwrap();

    let order: Vec<u32> = table.drain().into_iter().map(|(_, v)| v).collect();
    assert_eq!(order, vec![100, 3, 2, 1]);
    assert!(table.is_empty());
}

#[test]
fn test_allocator_is_monotonic_per_type() {
    let ids = IdAllocator::new();
    assert_eq!(ids.alloc(ObjectType::Texture).unwrap().id, 1);
    assert_eq!(ids.alloc(ObjectType::Texture).unwrap().id, 2);
    assert_eq!(ids.alloc(ObjectType::RenderPass).unwrap().id, 1);
    assert_eq!(ids.peek(ObjectType::Texture), 3);

    // Identity 1 belongs to the bootstrap device.
    assert_eq!(ids.alloc(ObjectType::Device).unwrap().id, 2);
}

#[test]
fn test_allocator_refuses_to_wrap() {
    let ids = IdAllocator::starting_at(u32::MAX - 2);
    assert_eq!(ids.alloc(ObjectType::Texture).unwrap().id, u32::MAX - 2);
    assert_eq!(ids.alloc(ObjectType::Texture).unwrap().id, u32::MAX - 1);

    for _ in 0..3 {
        match ids.alloc(ObjectType::Texture) {
            Err(CoreError::IdentitiesExhausted(ty)) => assert_eq!(ty, ObjectType::Texture),
            other => panic!("expected IdentitiesExhausted, got {:?}", other),
        }
    }
    assert_eq!(ids.peek(ObjectType::Texture), u32::MAX);

    // Other types keep their own space.
    assert_eq!(ids.alloc(ObjectType::TextureView).unwrap().id, u32::MAX - 2);
}
