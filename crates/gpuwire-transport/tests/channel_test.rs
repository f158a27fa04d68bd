//! Integration test: memory channels and the stream bridge.
//!
//! Run with: cargo test -p gpuwire-transport --test channel_test -- --nocapture

use gpuwire_protocol::wire::{self, RecordReader, DEFAULT_COMPRESSION_THRESHOLD};
use gpuwire_protocol::{Command, ObjectHandle, ObjectType};
use gpuwire_transport::{memory_channel, ChannelSink, ChannelSource, TransportError};

fn destroy_record(id: u32) -> Vec<u8> {
    let cmd = Command::Destroy {
        object: ObjectHandle::new(ObjectType::RenderPass, id),
    };
    wire::encode_command(&cmd, DEFAULT_COMPRESSION_THRESHOLD).unwrap()
}

#[test]
fn test_nothing_visible_before_flush() {
    let (mut tx, mut rx) = memory_channel(4096);
    tx.write(&destroy_record(1)).unwrap();
    tx.write(&destroy_record(2)).unwrap();

    assert!(rx.poll_incoming().unwrap().is_none());
    assert!(tx.buffered() > 0);

    tx.flush().unwrap();
    let batch = rx.poll_incoming().unwrap().expect("flushed batch");
    assert_eq!(RecordReader::new(&batch).count(), 2);
    assert_eq!(tx.buffered(), 0);
    assert!(rx.poll_incoming().unwrap().is_none());
}

#[test]
fn test_batches_arrive_in_flush_order() {
    let (mut tx, mut rx) = memory_channel(4096);
    let first = destroy_record(1);
    let second = destroy_record(2);

    tx.write(&first).unwrap();
    tx.flush().unwrap();
    tx.write(&second).unwrap();
    tx.flush().unwrap();

    assert_eq!(rx.poll_incoming().unwrap().unwrap(), first);
    assert_eq!(rx.poll_incoming().unwrap().unwrap(), second);
}

#[test]
fn test_oversize_record_leaves_buffer_unchanged() {
    let record = destroy_record(1);
    let (mut tx, mut rx) = memory_channel(record.len() + 4);
    tx.write(&record).unwrap();

    let mut oversize = record.clone();
    oversize.extend_from_slice(&record);
    match tx.write(&oversize) {
        Err(TransportError::CapacityExceeded { size, available, capacity }) => {
            println!("rejected {} bytes ({} of {} available)", size, available, capacity);
            assert_eq!(size, oversize.len());
            assert_eq!(available, 4);
        }
        other => panic!("expected CapacityExceeded, got {:?}", other),
    }

    assert_eq!(tx.buffered(), record.len());
    tx.flush().unwrap();
    assert_eq!(rx.poll_incoming().unwrap().unwrap(), record);
}

#[test]
fn test_undrained_peer_exhausts_capacity() {
    let record = destroy_record(1);
    let (mut tx, mut rx) = memory_channel(record.len() * 2);

    tx.write(&record).unwrap();
    tx.flush().unwrap();
    tx.write(&record).unwrap();
    tx.flush().unwrap();
    assert_eq!(tx.undelivered(), record.len() * 2);

    // Flushing does not free anything until the reader polls.
    assert!(matches!(
        tx.write(&record),
        Err(TransportError::CapacityExceeded { available: 0, .. })
    ));

    rx.poll_incoming().unwrap();
    tx.write(&record).unwrap();
}

#[test]
fn test_closed_reader_rejects_writes() {
    let (mut tx, rx) = memory_channel(1024);
    drop(rx);
    assert!(matches!(tx.write(&destroy_record(1)), Err(TransportError::Closed)));
}

#[test]
fn test_reader_sees_close_after_draining() {
    let (mut tx, mut rx) = memory_channel(1024);
    tx.write(&destroy_record(1)).unwrap();
    tx.flush().unwrap();
    drop(tx);

    assert!(!rx.is_closed());
    rx.poll_incoming().unwrap();
    assert!(rx.is_closed());
}

#[tokio::test]
async fn test_stream_bridge_preserves_records() {
    let (mut client_tx, mut client_rx) = memory_channel(4096);
    let (mut server_tx, mut server_rx) = memory_channel(4096);
    let (mut near, mut far) = tokio::io::duplex(4096);

    for id in 1..=3 {
        client_tx.write(&destroy_record(id)).unwrap();
    }
    client_tx.flush().unwrap();

    let sent = gpuwire_transport::stream::forward(&mut client_rx, &mut near).await.unwrap();
    let received = gpuwire_transport::stream::receive(&mut far, &mut server_tx, sent)
        .await
        .unwrap();
    assert_eq!(sent, received);

    let batch = server_rx.poll_incoming().unwrap().unwrap();
    let ids: Vec<u32> = RecordReader::new(&batch)
        .map(|r| match wire::decode_command(&r.unwrap()).unwrap() {
            Command::Destroy { object } => object.id,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_stream_bridge_rejects_garbage() {
    let (mut server_tx, _server_rx) = memory_channel(4096);
    let (mut near, mut far) = tokio::io::duplex(64);

    tokio::io::AsyncWriteExt::write_all(&mut near, b"not a record at all").await.unwrap();
    let result = gpuwire_transport::stream::read_record(&mut far, &mut server_tx).await;
    assert!(matches!(result, Err(TransportError::Wire(_))));
    assert_eq!(server_tx.buffered(), 0);
}
