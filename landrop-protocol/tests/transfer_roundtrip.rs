//! End-to-end transfer tests over real loopback TCP connections.

use landrop_protocol::transfer::wire::{
    read_record, write_chunk, write_end, write_record, TransferRequest, TransferResponse,
};
use landrop_protocol::{
    AcceptPolicy, AutoAccept, Decision, Device, FileEntry, Platform, ProtocolError,
    TransferClient, TransferConfig, TransferEvent, TransferServer,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

fn loopback_device(port: u16) -> Device {
    Device {
        device_id: "itest-peer".to_string(),
        name: "Test Peer".to_string(),
        platform: Platform::Desktop,
        address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        transfer_port: port,
        online: true,
        last_seen: 0,
    }
}

async fn started_server(root: &Path, policy: Arc<dyn AcceptPolicy>) -> TransferServer {
    let mut config = TransferConfig::new(root);
    config.port = 0;
    config.port_range = 1;
    let mut server = TransferServer::bind(config, policy).await.unwrap();
    server.start().unwrap();
    server
}

async fn next_event(events: &mut UnboundedReceiver<TransferEvent>) -> TransferEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for transfer event")
        .expect("event channel closed")
}

async fn next_terminal(events: &mut UnboundedReceiver<TransferEvent>) -> TransferEvent {
    loop {
        let event = next_event(events).await;
        if event.is_terminal() {
            return event;
        }
    }
}

#[tokio::test]
async fn multi_file_tree_arrives_byte_identical() {
    let source = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let album = source.path().join("album");
    std::fs::create_dir_all(album.join("raw")).unwrap();
    std::fs::create_dir(album.join("empty")).unwrap();
    let cover: Vec<u8> = (0..150_000u32).map(|i| (i % 253) as u8).collect();
    let raw: Vec<u8> = (0..70_001u32).map(|i| (i % 31) as u8).collect();
    std::fs::write(album.join("cover.jpg"), &cover).unwrap();
    std::fs::write(album.join("raw/img1.raw"), &raw).unwrap();
    let extra = source.path().join("notes.txt");
    std::fs::write(&extra, b"remember the milk").unwrap();

    let sender = started_server(source.path(), Arc::new(AutoAccept)).await;
    let mut receiver = started_server(dest.path(), Arc::new(AutoAccept)).await;
    let mut receiver_events = receiver.subscribe().unwrap();

    let client = TransferClient::new(&sender, "Workstation");
    let (task, _cancel) = client
        .send_paths(&loopback_device(receiver.port()), &[album, extra])
        .await
        .unwrap();
    assert_eq!(task.total_size, (cover.len() + raw.len() + 17) as u64);

    let request = next_event(&mut receiver_events).await;
    match &request {
        TransferEvent::RequestReceived { task: inbound } => {
            assert_eq!(inbound.id, task.id);
            assert_eq!(inbound.peer_name, "Workstation");
        }
        other => panic!("expected RequestReceived, got {:?}", other),
    }
    assert!(matches!(
        next_terminal(&mut receiver_events).await,
        TransferEvent::Completed { .. }
    ));

    assert_eq!(std::fs::read(dest.path().join("album/cover.jpg")).unwrap(), cover);
    assert_eq!(std::fs::read(dest.path().join("album/raw/img1.raw")).unwrap(), raw);
    assert!(dest.path().join("album/empty").is_dir());
    assert_eq!(
        std::fs::read(dest.path().join("notes.txt")).unwrap(),
        b"remember the milk"
    );
}

#[tokio::test]
async fn frame_boundaries_are_independent_of_file_boundaries() {
    // Hand-rolled sender packing two files into a single frame and
    // splitting the second across another: the receiver must cut at
    // the manifest's declared sizes, not at frame edges.
    let dest = TempDir::new().unwrap();
    let mut receiver = started_server(dest.path(), Arc::new(AutoAccept)).await;
    let mut receiver_events = receiver.subscribe().unwrap();

    let first = vec![0xAAu8; 300];
    let second = vec![0xBBu8; 900];
    let request = TransferRequest::new(
        "task-frames",
        "Handroller",
        vec![
            FileEntry::file("first.bin", 300, None),
            FileEntry::file("second.bin", 900, None),
        ],
    );

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), receiver.port());
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_record(&mut writer, &request).await.unwrap();
    let verdict: TransferResponse = read_record(&mut reader).await.unwrap();
    assert!(verdict.accepted);

    // Frame 1: all of first.bin plus the head of second.bin.
    let mut frame = first.clone();
    frame.extend_from_slice(&second[..500]);
    write_chunk(&mut writer, &frame).await.unwrap();
    // Frame 2: the tail of second.bin.
    write_chunk(&mut writer, &second[500..]).await.unwrap();
    write_end(&mut writer).await.unwrap();
    writer.flush().await.unwrap();

    loop {
        match next_terminal(&mut receiver_events).await {
            TransferEvent::Completed { task } => {
                assert_eq!(task.transferred, 1200);
                break;
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }
    assert_eq!(std::fs::read(dest.path().join("first.bin")).unwrap(), first);
    assert_eq!(std::fs::read(dest.path().join("second.bin")).unwrap(), second);
}

#[tokio::test]
async fn three_fixed_chunks_then_sentinel_complete_the_file() {
    let dest = TempDir::new().unwrap();
    let mut receiver = started_server(dest.path(), Arc::new(AutoAccept)).await;
    let mut receiver_events = receiver.subscribe().unwrap();

    let request = TransferRequest::new(
        "task-1536",
        "Chunker",
        vec![FileEntry::file("a.bin", 1536, None)],
    );
    assert_eq!(request.total_size, 1536);

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), receiver.port());
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_record(&mut writer, &request).await.unwrap();
    let verdict: TransferResponse = read_record(&mut reader).await.unwrap();
    assert!(verdict.accepted);

    for chunk in 0u8..3 {
        write_chunk(&mut writer, &[chunk; 512]).await.unwrap();
    }
    write_end(&mut writer).await.unwrap();

    match next_terminal(&mut receiver_events).await {
        TransferEvent::Completed { task } => {
            assert_eq!(task.transferred, 1536);
            assert_eq!(task.progress(), 1.0);
        }
        other => panic!("expected completion, got {:?}", other),
    }
    let written = std::fs::read(dest.path().join("a.bin")).unwrap();
    assert_eq!(written.len(), 1536);
    assert_eq!(&written[..512], &[0u8; 512]);
    assert_eq!(&written[1024..], &[2u8; 512]);
}

struct DeclineAll;

#[async_trait::async_trait]
impl AcceptPolicy for DeclineAll {
    async fn decide(&self, _request: &TransferRequest, _peer: SocketAddr) -> Decision {
        Decision::Reject("not today".to_string())
    }
}

#[tokio::test]
async fn rejection_reaches_the_sender_and_writes_nothing() {
    let source = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let path = source.path().join("pitch.pdf");
    std::fs::write(&path, vec![1u8; 10_000]).unwrap();

    let mut sender_side = started_server(source.path(), Arc::new(AutoAccept)).await;
    let mut sender_events = sender_side.subscribe().unwrap();
    let receiver = started_server(dest.path(), Arc::new(DeclineAll)).await;

    let client = TransferClient::new(&sender_side, "Workstation");
    client
        .send_paths(&loopback_device(receiver.port()), &[path])
        .await
        .unwrap();

    match next_terminal(&mut sender_events).await {
        TransferEvent::Rejected { reason, .. } => assert_eq!(reason, "not today"),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(std::fs::read_dir(dest.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn second_request_is_declined_while_streaming() {
    let dest = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let mut receiver = started_server(dest.path(), Arc::new(AutoAccept)).await;
    let mut receiver_events = receiver.subscribe().unwrap();

    // First connection: hand-rolled sender that stalls mid-stream,
    // holding the transfer slot.
    let request = TransferRequest::new(
        "task-slow",
        "Stalled",
        vec![FileEntry::file("slow.bin", 4096, None)],
    );
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), receiver.port());
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_record(&mut writer, &request).await.unwrap();
    let verdict: TransferResponse = read_record(&mut reader).await.unwrap();
    assert!(verdict.accepted);
    write_chunk(&mut writer, &[7u8; 512]).await.unwrap();
    writer.flush().await.unwrap();

    // Second sender arrives while the first still streams.
    let path = source.path().join("late.bin");
    std::fs::write(&path, vec![2u8; 64]).unwrap();
    let mut sender_side = started_server(source.path(), Arc::new(AutoAccept)).await;
    let mut sender_events = sender_side.subscribe().unwrap();
    let client = TransferClient::new(&sender_side, "Latecomer");
    client
        .send_paths(&loopback_device(receiver.port()), &[path])
        .await
        .unwrap();

    match next_terminal(&mut sender_events).await {
        TransferEvent::Rejected { reason, .. } => {
            assert_eq!(reason, ProtocolError::Busy.to_string());
        }
        other => panic!("expected busy rejection, got {:?}", other),
    }

    // The first transfer finishes untouched. The receiver's stream also
    // carries the declined request's terminal; skip past it.
    write_chunk(&mut writer, &[7u8; 3584]).await.unwrap();
    write_end(&mut writer).await.unwrap();
    loop {
        match next_terminal(&mut receiver_events).await {
            TransferEvent::Completed { task } => {
                assert_eq!(task.id, "task-slow");
                break;
            }
            TransferEvent::Rejected { .. } => continue,
            other => panic!("unexpected terminal: {:?}", other),
        }
    }
    assert_eq!(
        std::fs::metadata(dest.path().join("slow.bin")).unwrap().len(),
        4096
    );
}

#[tokio::test]
async fn cancelled_download_keeps_the_written_prefix() {
    let dest = TempDir::new().unwrap();
    let mut receiver = started_server(dest.path(), Arc::new(AutoAccept)).await;
    let mut receiver_events = receiver.subscribe().unwrap();

    let request = TransferRequest::new(
        "task-cancel",
        "Walkaway",
        vec![FileEntry::file("video.mkv", 4096, None)],
    );
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), receiver.port());
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_record(&mut writer, &request).await.unwrap();
    let verdict: TransferResponse = read_record(&mut reader).await.unwrap();
    assert!(verdict.accepted);

    write_chunk(&mut writer, &[5u8; 512]).await.unwrap();
    writer.flush().await.unwrap();

    let task_id = match next_event(&mut receiver_events).await {
        TransferEvent::RequestReceived { task } => task.id,
        other => panic!("expected RequestReceived, got {:?}", other),
    };
    // Let the first frame land, then cancel while the receiver waits
    // for the next one; the cancel interrupts that wait.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(receiver.cancel(&task_id));
    write_chunk(&mut writer, &[5u8; 512]).await.unwrap();
    writer.flush().await.unwrap();

    assert!(matches!(
        next_terminal(&mut receiver_events).await,
        TransferEvent::Cancelled { .. }
    ));
    let kept = std::fs::read(dest.path().join("video.mkv")).unwrap();
    assert!(!kept.is_empty());
    assert!(kept.len() <= 1024);
    assert!(kept.iter().all(|b| *b == 5));
    assert!(!receiver.cancel(&task_id));
}
