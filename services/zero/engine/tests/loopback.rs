//! End-to-end tests over real loopback sockets.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener as StdTcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zero_engine::{EngineConfig, EngineError, WriterEngine, ZeroEngine};
use zero_session::{
    AssociationProcessor, AssociationState, Collaborator, OverflowPolicy, Packet, Session,
    TransportType,
};
use zero_wire::{
    decode_message, encode, FrameDecoder, FrameEncoder, Lz4Compressor, PacketHeader, ZeroArray,
    ZeroElement, ZeroMap,
};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Acknowledges logins and echoes every message back
struct Lobby {
    writer: Arc<WriterEngine>,
}

impl Lobby {
    fn reply(&self, session: &Arc<Session>, message: &ZeroElement) {
        let payload = encode(message).unwrap();
        let packet = if session.is_tcp() {
            Packet::new(payload)
        } else {
            Packet::new(payload).udp()
        };
        self.writer.enqueue_packet(packet.with_recipient(session.clone()));
    }
}

impl Collaborator for Lobby {
    fn resolve_identity(&self, _session: &Arc<Session>, message: &ZeroElement) -> Option<String> {
        message.as_map()?.get_str("u").map(str::to_string)
    }

    fn on_identity_bound(&self, identity: &str, session: &Arc<Session>, reconnected: bool) {
        let ack = ZeroMap::new()
            .with("ok", identity)
            .with("id", session.id() as i64)
            .with("r", reconnected);
        self.reply(session, &ack.into());
    }

    fn on_message(&self, _identity: &str, session: &Arc<Session>, message: &ZeroElement) {
        self.reply(session, message);
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        tcp_ports: vec![0],
        udp_ports: vec![0],
        reader_workers: 2,
        writer_workers: 2,
        poll_timeout_ms: 20,
        close_orphans: false,
        housekeeping_interval_ms: 50,
        shutdown_timeout_ms: 2000,
        ..EngineConfig::default()
    }
}

fn start_engine(config: EngineConfig) -> (ZeroEngine, Arc<AssociationProcessor<Lobby>>) {
    let mut engine = ZeroEngine::builder(config).build().unwrap();
    let lobby = Arc::new(Lobby {
        writer: engine.writer(),
    });
    let processor = Arc::new(AssociationProcessor::new(engine.manager().clone(), lobby));
    engine.events().subscribe(processor.clone());
    engine.start().unwrap();
    (engine, processor)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

struct Client {
    stream: TcpStream,
    decoder: FrameDecoder,
    pending: VecDeque<Bytes>,
}

impl Client {
    fn connect(engine: &ZeroEngine) -> Self {
        let stream = TcpStream::connect(engine.tcp_addresses()[0]).unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(64 * 1024 * 1024),
            pending: VecDeque::new(),
        }
    }

    fn send(&mut self, message: &ZeroElement) {
        let frame = FrameEncoder::new()
            .encode(&encode(message).unwrap(), false)
            .unwrap();
        self.stream.write_all(&frame).unwrap();
    }

    fn recv(&mut self) -> Option<ZeroElement> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(decode_message(&frame).unwrap());
            }
            let n = match self.stream.read(&mut buf) {
                Ok(0) | Err(_) => return None,
                Ok(n) => n,
            };
            let mut frames = Vec::new();
            self.decoder.decode(&buf[..n], &mut frames).unwrap();
            self.pending.extend(frames);
        }
    }

    fn login(&mut self, name: &str) -> ZeroMap {
        self.send(&ZeroMap::new().with("u", name).into());
        match self.recv() {
            Some(ZeroElement::Map(ack)) => ack,
            other => panic!("expected login ack, got {other:?}"),
        }
    }

    /// Whether the server closed the connection
    fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return true,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => return true,
                Err(_) => return false,
            }
        }
    }
}

#[test]
fn test_login_and_echo() {
    let (mut engine, processor) = start_engine(test_config());
    let mut client = Client::connect(&engine);

    let ack = client.login("player1");
    assert_eq!(ack.get_str("ok"), Some("player1"));
    assert_eq!(ack.get("r"), Some(&ZeroElement::Bool(false)));

    let message: ZeroElement = ZeroMap::new()
        .with("cmd", "move")
        .with("xy", ZeroElement::IntArray(vec![3, -4]))
        .into();
    client.send(&message);
    assert_eq!(client.recv(), Some(message));

    let session = processor.session_of("player1").unwrap();
    assert_eq!(session.association(), AssociationState::Done);
    assert!(engine.stats().snapshot().read_packets >= 2);

    engine.shutdown();
    assert!(!engine.is_running());
}

#[test]
fn test_large_payload_survives_partial_writes() {
    let (mut engine, processor) = start_engine(test_config());
    let mut client = Client::connect(&engine);
    client.login("big");
    let session = processor.session_of("big").unwrap();

    let blob: Vec<u8> = (0..8 * 1024 * 1024).map(|i| (i * 31 % 251) as u8).collect();
    let message: ZeroElement = ZeroMap::new()
        .with("blob", ZeroElement::ByteArray(blob.clone()))
        .into();
    let after: ZeroElement = ZeroArray::new().with("after").into();
    engine.send(&message, vec![session.clone()]).unwrap();
    engine.send(&after, vec![session]).unwrap();

    // let the kernel buffers fill before draining
    thread::sleep(Duration::from_millis(200));

    match client.recv() {
        Some(ZeroElement::Map(map)) => {
            assert_eq!(map.get("blob"), Some(&ZeroElement::ByteArray(blob)));
        }
        other => panic!("unexpected {:?}", other.map(|m| m.zero_type())),
    }
    assert_eq!(client.recv(), Some(after));

    engine.shutdown();
}

#[test]
fn test_per_producer_order() {
    const PRODUCERS: i32 = 4;
    const PER_PRODUCER: i32 = 200;

    let config = EngineConfig {
        queue_capacity: 10_000,
        priority_shedding: false,
        ..test_config()
    };
    let (mut engine, processor) = start_engine(config);
    let mut client = Client::connect(&engine);
    client.login("orderly");
    let session = processor.session_of("orderly").unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let writer = engine.writer();
            let session = session.clone();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let message: ZeroElement = ZeroArray::new().with(producer).with(seq).into();
                    let payload = encode(&message).unwrap();
                    writer.enqueue_packet(Packet::new(payload).with_recipient(session.clone()));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut last: HashMap<i64, i64> = HashMap::new();
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let message = client.recv().expect("missing packet");
        let array = message.as_array().unwrap();
        let producer = array.get(0).and_then(ZeroElement::as_i64).unwrap();
        let seq = array.get(1).and_then(ZeroElement::as_i64).unwrap();
        let previous = last.insert(producer, seq).unwrap_or(-1);
        assert_eq!(seq, previous + 1, "producer {producer} reordered");
    }
    assert_eq!(last.len(), PRODUCERS as usize);
    assert_eq!(session.dropped_packets(), 0);

    engine.shutdown();
}

#[test]
fn test_reconnection_closes_previous_session() {
    let (mut engine, processor) = start_engine(test_config());

    let mut first = Client::connect(&engine);
    first.login("dup");

    let mut second = Client::connect(&engine);
    let ack = second.login("dup");
    assert_eq!(ack.get("r"), Some(&ZeroElement::Bool(true)));

    assert!(first.is_closed());

    let owner = processor.session_of("dup").unwrap();
    assert_eq!(owner.remote_address(), Some(second.stream.local_addr().unwrap()));
    assert!(owner.is_active());

    let ping: ZeroElement = ZeroArray::new().with("ping").into();
    second.send(&ping);
    assert_eq!(second.recv(), Some(ping));

    engine.shutdown();
}

#[test]
fn test_filter_refuses_excess_connections() {
    let config = EngineConfig {
        max_connections_per_ip: 1,
        ..test_config()
    };
    let (mut engine, _) = start_engine(config);

    let mut allowed = Client::connect(&engine);
    allowed.login("first");

    let mut refused = Client::connect(&engine);
    assert!(refused.is_closed());
    assert!(wait_until(|| engine.stats().snapshot().refused_connections == 1));

    // releasing the first connection frees the slot
    drop(allowed);
    assert!(wait_until(|| engine.manager().count() == 0));
    let mut again = Client::connect(&engine);
    again.login("second");

    engine.shutdown();
}

#[test]
fn test_bad_frame_closes_session() {
    let (mut engine, _) = start_engine(test_config());
    let mut client = Client::connect(&engine);
    assert!(wait_until(|| engine.manager().count() == 1));

    // header without the counting bit
    client.stream.write_all(&[0x00, 0x00, 0x03, 18, 0, 0]).unwrap();
    assert!(client.is_closed());
    assert!(wait_until(|| engine.manager().count() == 0));

    engine.shutdown();
}

#[test]
fn test_marked_last_packet_closes_after_delivery() {
    let (mut engine, processor) = start_engine(test_config());
    let mut client = Client::connect(&engine);
    client.login("leaving");
    let session = processor.session_of("leaving").unwrap();

    let bye: ZeroElement = ZeroMap::new().with("bye", true).into();
    engine.enqueue_packet(
        Packet::new(encode(&bye).unwrap())
            .mark_as_last()
            .with_recipient(session.clone()),
    );

    assert_eq!(client.recv(), Some(bye));
    assert!(client.is_closed());
    assert!(!session.is_active());

    engine.shutdown();
}

#[test]
fn test_udp_login_and_reply() {
    let (mut engine, processor) = start_engine(test_config());
    let udp_addr = engine.udp_addresses()[0];

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(TIMEOUT)).unwrap();
    let login: ZeroElement = ZeroMap::new().with("u", "udp-player").into();
    client.send_to(&encode(&login).unwrap(), udp_addr).unwrap();

    let mut buf = [0u8; 2048];
    let (n, from) = client.recv_from(&mut buf).unwrap();
    assert_eq!(from, udp_addr);
    let ack = decode_message(&buf[..n]).unwrap();
    assert_eq!(ack.as_map().unwrap().get_str("ok"), Some("udp-player"));

    let session = processor.session_of("udp-player").unwrap();
    assert_eq!(session.transport(), TransportType::Udp);

    // known address goes straight to the message pipeline
    let ping: ZeroElement = ZeroArray::new().with("ping").with(1i32).into();
    client.send_to(&encode(&ping).unwrap(), udp_addr).unwrap();
    let (n, _) = client.recv_from(&mut buf).unwrap();
    assert_eq!(decode_message(&buf[..n]).unwrap(), ping);

    engine.shutdown();
}

#[test]
fn test_udp_convey_binds_tcp_session() {
    let (mut engine, processor) = start_engine(test_config());
    let mut tcp = Client::connect(&engine);
    let ack = tcp.login("hybrid");
    let id = ack.get("id").and_then(ZeroElement::as_i64).unwrap();

    let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    udp.set_read_timeout(Some(TIMEOUT)).unwrap();
    let convey: ZeroElement = ZeroMap::new()
        .with("c", id)
        .with("d", ZeroMap::new())
        .into();
    udp.send_to(&encode(&convey).unwrap(), engine.udp_addresses()[0]).unwrap();

    let session = processor.session_of("hybrid").unwrap();
    assert!(wait_until(|| session.datagram_address().is_some()));
    assert_eq!(session.datagram_address(), Some(udp.local_addr().unwrap()));

    let state: ZeroElement = ZeroArray::new().with("state").with(9i32).into();
    engine.enqueue_packet(
        Packet::new(encode(&state).unwrap())
            .udp()
            .with_recipient(session),
    );
    let mut buf = [0u8; 2048];
    let (n, _) = udp.recv_from(&mut buf).unwrap();
    assert_eq!(decode_message(&buf[..n]).unwrap(), state);

    engine.shutdown();
}

#[test]
fn test_orphan_sessions_are_closed() {
    let config = EngineConfig {
        close_orphans: true,
        ..test_config()
    };
    let (mut engine, _) = start_engine(config);
    let mut silent = Client::connect(&engine);
    assert!(wait_until(|| engine.manager().count() == 1));

    assert!(silent.is_closed());
    assert_eq!(engine.manager().count(), 0);

    engine.shutdown();
}

#[test]
fn test_bind_failure_aborts_start() {
    let taken = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let config = EngineConfig {
        tcp_ports: vec![port],
        udp_ports: Vec::new(),
        ..test_config()
    };
    let mut engine = ZeroEngine::builder(config).build().unwrap();
    match engine.start() {
        Err(EngineError::Bind { addr, .. }) => {
            assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
        }
        other => panic!("expected bind failure, got {other:?}"),
    }
    assert!(!engine.is_running());
}

#[test]
fn test_shutdown_closes_sessions() {
    let (mut engine, processor) = start_engine(test_config());
    let mut client = Client::connect(&engine);
    client.login("stay");
    let session = processor.session_of("stay").unwrap();

    engine.shutdown();
    assert!(!session.is_active());
    assert!(client.is_closed());
    assert_eq!(engine.manager().count(), 0);
}

#[test]
fn test_compressed_frames_both_ways() {
    let lz4 = Arc::new(Lz4Compressor::default());
    let config = EngineConfig {
        compression_threshold: 128,
        ..test_config()
    };
    let mut engine = ZeroEngine::builder(config)
        .compressor(lz4.clone())
        .build()
        .unwrap();
    let lobby = Arc::new(Lobby {
        writer: engine.writer(),
    });
    engine
        .events()
        .subscribe(Arc::new(AssociationProcessor::new(engine.manager().clone(), lobby)));
    engine.start().unwrap();

    let mut client = Client::connect(&engine);
    client.decoder = FrameDecoder::new(64 * 1024 * 1024).with_hooks(Some(lz4.clone()), None);
    client.login("squeezed");

    let message: ZeroElement = ZeroMap::new()
        .with("chat", "gg ".repeat(500))
        .into();
    let frame = FrameEncoder::new()
        .with_compressor(lz4)
        .with_compression_threshold(128)
        .encode(&encode(&message).unwrap(), false)
        .unwrap();
    assert!(PacketHeader::from_bits_retain(frame[0]).contains(PacketHeader::COMPRESSED));
    client.stream.write_all(&frame).unwrap();

    assert_eq!(client.recv(), Some(message));
    assert!(engine.stats().snapshot().written_bytes < 1500);

    engine.shutdown();
}

#[test]
fn test_drop_oldest_evicts_with_default_shedding() {
    const SENT: i64 = 40;

    let config = EngineConfig {
        queue_capacity: 8,
        overflow_policy: OverflowPolicy::DropOldest,
        ..test_config()
    };
    assert!(config.priority_shedding);
    let (mut engine, processor) = start_engine(config);
    let mut client = Client::connect(&engine);
    client.login("slow-reader");
    let session = processor.session_of("slow-reader").unwrap();

    // far more than the socket buffers hold while the client is not reading
    let blob = ZeroElement::ByteArray(vec![7u8; 1024 * 1024]);
    for seq in 0..SENT {
        let message: ZeroElement = ZeroMap::new().with("seq", seq).with("blob", blob.clone()).into();
        engine.enqueue_packet(Packet::new(encode(&message).unwrap()).with_recipient(session.clone()));
    }

    let snapshot = engine.stats().snapshot();
    assert_eq!(snapshot.dropped_by_policy, 0);
    assert!(snapshot.dropped_by_full > 0);
    assert!(session.dropped_packets() > 0);
    assert!(session.packet_queue().size() <= 8);

    let mut received = Vec::new();
    while received.last() != Some(&(SENT - 1)) {
        let message = client.recv().expect("newest packet never arrived");
        let seq = message.as_map().and_then(|m| m.get("seq")).and_then(ZeroElement::as_i64).unwrap();
        received.push(seq);
    }
    assert!(received.windows(2).all(|pair| pair[0] < pair[1]));
    assert!((received.len() as i64) < SENT);

    engine.shutdown();
}

/// Map payload with `count` distinct keys, each holding null
fn wide_map_payload(count: usize) -> Vec<u8> {
    let mut payload = vec![18];
    payload.extend_from_slice(&(count as i16).to_be_bytes());
    for i in 0..count {
        let key = format!("key{i}");
        payload.extend_from_slice(&(key.len() as i16).to_be_bytes());
        payload.extend_from_slice(key.as_bytes());
        payload.push(0);
    }
    payload
}

#[test]
fn test_widest_map_keeps_reader_responsive() {
    let count = i16::MAX as usize;
    let (mut engine, _) = start_engine(test_config());
    let mut client = Client::connect(&engine);
    client.login("wide");

    let started = Instant::now();
    let frame = FrameEncoder::new()
        .encode(&wide_map_payload(count), false)
        .unwrap();
    client.stream.write_all(&frame).unwrap();

    match client.recv() {
        Some(ZeroElement::Map(map)) => {
            assert_eq!(map.len(), count);
            assert_eq!(map.get("key0"), Some(&ZeroElement::Null));
            assert_eq!(map.get("key32766"), Some(&ZeroElement::Null));
        }
        other => panic!("unexpected {:?}", other.map(|m| m.zero_type())),
    }
    assert!(started.elapsed() < Duration::from_secs(5), "echo took {:?}", started.elapsed());

    let ping: ZeroElement = ZeroArray::new().with("ping").into();
    client.send(&ping);
    assert_eq!(client.recv(), Some(ping));

    engine.shutdown();
}
