//! Integration tests for scriptport.
//!
//! A host is simulated over an in-memory duplex pipe; the bridge drives a
//! recording engine so the tests can observe what reached the engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use scriptport::codec::{ResponseEncoder, ResponseEncoding};
use scriptport::protocol::{build_packet, Command, EvalRequest, FrameBuffer, Response};
use scriptport::{
    Bridge, BridgeError, EngineInstance, EngineLimits, EvalOutcome, Result, ScriptEngine,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

// ============================================================================
// Recording engine
// ============================================================================

#[derive(Default)]
struct Recorder {
    limits: Mutex<Vec<EngineLimits>>,
    evals: Mutex<Vec<(String, String, bool)>>,
    stopped: AtomicUsize,
    global_shutdowns: AtomicUsize,
    overlaps: AtomicUsize,
}

struct RecordingEngine(Arc<Recorder>);

struct RecordingInstance {
    recorder: Arc<Recorder>,
    in_use: Arc<AtomicBool>,
}

impl ScriptEngine for RecordingEngine {
    fn initialize(&self, limits: EngineLimits) -> Result<Box<dyn EngineInstance>> {
        self.0.limits.lock().unwrap().push(limits);
        Ok(Box::new(RecordingInstance {
            recorder: self.0.clone(),
            in_use: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn global_shutdown(&self) {
        self.0.global_shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

impl EngineInstance for RecordingInstance {
    /// Scripted behavior:
    /// - `throw` reports an error payload in-band
    /// - `1+1` evaluates to `2`
    /// - `nil` produces no value
    /// - `sleep` holds the instance briefly
    /// - `slow` holds the instance for two seconds
    /// - `panic` panics inside the engine
    /// - anything else echoes the code back as the value
    fn evaluate(&mut self, source_name: &str, code: &str, want_result: bool) -> EvalOutcome {
        if self.in_use.swap(true, Ordering::SeqCst) {
            self.recorder.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.recorder.evals.lock().unwrap().push((
            source_name.to_string(),
            code.to_string(),
            want_result,
        ));

        let outcome = match code {
            "throw" => {
                EvalOutcome::from_payload(Some(r#"{"error":"x"}"#.to_string()), want_result)
            }
            "1+1" => EvalOutcome::Value("2".to_string()),
            "nil" => EvalOutcome::Done,
            "sleep" => {
                std::thread::sleep(Duration::from_millis(2));
                EvalOutcome::Value("slept".to_string())
            }
            "slow" => {
                std::thread::sleep(Duration::from_secs(2));
                EvalOutcome::Value("slow".to_string())
            }
            "panic" => panic!("engine crashed"),
            other => EvalOutcome::Value(other.to_string()),
        };

        self.in_use.store(false, Ordering::SeqCst);
        outcome
    }

    fn stop(self: Box<Self>) {
        self.recorder.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Host side helpers
// ============================================================================

fn bridge(workers: usize, encoding: ResponseEncoding) -> (Bridge, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let bridge = Bridge::builder(RecordingEngine(recorder.clone()))
        .workers(workers)
        .encoding(encoding)
        .build()
        .unwrap();
    (bridge, recorder)
}

/// Serve one connection and return the host end of it.
fn connect(bridge: &Bridge) -> (DuplexStream, JoinHandle<Result<()>>) {
    let (host, port) = duplex(256 * 1024);
    let (reader, writer) = tokio::io::split(port);
    let bridge = bridge.clone();
    let task = tokio::spawn(async move { bridge.serve_connection(reader, writer).await });
    (host, task)
}

fn id(raw: &str) -> Bytes {
    Bytes::copy_from_slice(raw.as_bytes())
}

fn init(call_id: &str, stack_mb: i32, heap_mb: i32) -> Command {
    Command::Init {
        call_id: id(call_id),
        stack_mb,
        heap_mb,
    }
}

fn eval(call_id: &str, source_name: &str, code: &str) -> Command {
    Command::EvalWithResult(EvalRequest {
        call_id: id(call_id),
        source_name: source_name.to_string(),
        code: code.to_string(),
    })
}

fn eval_discard(call_id: &str, code: &str) -> Command {
    Command::EvalDiscard(EvalRequest {
        call_id: id(call_id),
        source_name: "discard.js".to_string(),
        code: code.to_string(),
    })
}

fn shutdown(call_id: &str) -> Command {
    Command::Shutdown {
        call_id: id(call_id),
    }
}

async fn send_raw(host: &mut DuplexStream, payload: &[u8]) {
    host.write_all(&build_packet(payload)).await.unwrap();
}

async fn send(host: &mut DuplexStream, command: &Command) {
    send_raw(host, &command.encode()).await;
}

/// Read the next response without closing the connection.
async fn next_response(host: &mut DuplexStream, encoding: ResponseEncoding) -> Response {
    let mut header = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(10), host.read_exact(&mut header))
        .await
        .unwrap()
        .unwrap();
    let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
    host.read_exact(&mut payload).await.unwrap();
    ResponseEncoder::new(encoding).decode(&payload).unwrap()
}

/// Close the host's write side and collect every response until EOF.
async fn finish(
    mut host: DuplexStream,
    task: JoinHandle<Result<()>>,
    encoding: ResponseEncoding,
) -> Vec<Response> {
    host.shutdown().await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), host.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    task.await.unwrap().unwrap();

    let encoder = ResponseEncoder::new(encoding);
    FrameBuffer::new()
        .push(&raw)
        .unwrap()
        .iter()
        .map(|payload| encoder.decode(payload).unwrap())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_channel_lifecycle() {
    let (bridge, recorder) = bridge(2, ResponseEncoding::Etf);
    let (mut host, task) = connect(&bridge);

    send(&mut host, &init("1", 4, 8)).await;
    send(&mut host, &eval("2", "t.js", "1+1")).await;
    send(&mut host, &eval("3", "t.js", "throw")).await;
    send(&mut host, &shutdown("5")).await;

    let responses = finish(host, task, ResponseEncoding::Etf).await;

    assert_eq!(responses.len(), 4);
    assert_eq!(responses[0], Response::Ok(id("1")));
    assert_eq!(responses[1], Response::OkValue(id("2"), "2".to_string()));
    assert_eq!(
        responses[2],
        Response::Error(id("3"), r#"{"error":"x"}"#.to_string())
    );
    assert_eq!(responses[3], Response::Ok(id("5")));

    // The stack request of 4 MB is raised to the 8 MB minimum.
    let limits = recorder.limits.lock().unwrap().clone();
    assert_eq!(limits, vec![EngineLimits::from_megabytes(8, 8)]);
    assert_eq!(limits[0].stack_bytes, 8 * 1024 * 1024);

    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.global_shutdowns.load(Ordering::SeqCst), 1);
    assert!(bridge.runtime().is_torn_down());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_msgpack_encoding() {
    let (bridge, _recorder) = bridge(1, ResponseEncoding::MsgPack);
    let (mut host, task) = connect(&bridge);

    send(&mut host, &init("1", 8, 8)).await;
    send(&mut host, &eval("2", "a.js", "[1,2]")).await;

    let responses = finish(host, task, ResponseEncoding::MsgPack).await;
    assert_eq!(
        responses,
        vec![
            Response::Ok(id("1")),
            Response::OkValue(id("2"), "[1,2]".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_responses_follow_command_order() {
    let (bridge, recorder) = bridge(4, ResponseEncoding::Etf);
    let (mut host, task) = connect(&bridge);

    send(&mut host, &init("init", 8, 8)).await;
    for i in 0..200 {
        let code = if i % 10 == 0 { "sleep".to_string() } else { i.to_string() };
        send(&mut host, &eval(&i.to_string(), "order.js", &code)).await;
    }

    let responses = finish(host, task, ResponseEncoding::Etf).await;
    assert_eq!(responses.len(), 201);
    assert_eq!(responses[0], Response::Ok(id("init")));
    for (i, response) in responses[1..].iter().enumerate() {
        assert_eq!(response.call_id(), &id(&i.to_string()));
    }

    let evals = recorder.evals.lock().unwrap();
    assert_eq!(evals.len(), 200);
    assert_eq!(evals[1].1, "1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_instances_never_used_concurrently() {
    let (bridge, recorder) = bridge(3, ResponseEncoding::Etf);

    let mut clients = Vec::new();
    for c in 0..16 {
        let (mut host, task) = connect(&bridge);
        clients.push(tokio::spawn(async move {
            send(&mut host, &init(&format!("{}-init", c), 8, 8)).await;
            for i in 0..25 {
                let code = if i % 5 == 0 { "sleep" } else { "x" };
                send(&mut host, &eval(&format!("{}-{}", c, i), "stress.js", code)).await;
            }
            finish(host, task, ResponseEncoding::Etf).await
        }));
    }

    for (c, client) in clients.into_iter().enumerate() {
        let responses = client.await.unwrap();
        assert_eq!(responses.len(), 26);
        assert_eq!(responses[0], Response::Ok(id(&format!("{}-init", c))));
        for (i, response) in responses[1..].iter().enumerate() {
            assert_eq!(response.call_id(), &id(&format!("{}-{}", c, i)));
            assert!(!response.is_error());
        }
    }

    assert_eq!(recorder.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.evals.lock().unwrap().len(), 16 * 25);
    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 16);
    assert_eq!(bridge.runtime().live_instances(), 0);
    assert!(!bridge.runtime().is_torn_down());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_command() {
    let (bridge, _recorder) = bridge(1, ResponseEncoding::Etf);
    let (mut host, task) = connect(&bridge);

    let unknown = Command::Unknown {
        tag: *b"xx",
        call_id: id("4"),
    };
    send(&mut host, &unknown).await;
    send(&mut host, &init("5", 8, 8)).await;

    let responses = finish(host, task, ResponseEncoding::Etf).await;
    assert_eq!(
        responses,
        vec![Response::UnknownCommand(id("4")), Response::Ok(id("5"))]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_eval_discard() {
    let (bridge, recorder) = bridge(1, ResponseEncoding::Etf);
    let (mut host, task) = connect(&bridge);

    send(&mut host, &init("1", 8, 8)).await;
    send(&mut host, &eval_discard("2", "nil")).await;
    send(&mut host, &eval_discard("3", "42")).await;
    send(&mut host, &eval_discard("4", "throw")).await;
    send(&mut host, &eval("5", "a.js", "nil")).await;

    let responses = finish(host, task, ResponseEncoding::Etf).await;
    assert_eq!(responses[1], Response::Ok(id("2")));
    assert_eq!(responses[2], Response::Ok(id("3")));
    assert!(matches!(&responses[3], Response::Error(call_id, _) if call_id == &id("4")));
    assert_eq!(responses[4], Response::OkValue(id("5"), "null".to_string()));

    let evals = recorder.evals.lock().unwrap();
    assert!(!evals[0].2);
    assert!(evals[3].2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_eval_before_init_is_rejected() {
    let (bridge, recorder) = bridge(1, ResponseEncoding::Etf);
    let (mut host, task) = connect(&bridge);

    send(&mut host, &eval("1", "a.js", "1")).await;
    send(&mut host, &init("2", 8, 8)).await;
    send(&mut host, &init("3", 8, 8)).await;

    let responses = finish(host, task, ResponseEncoding::Etf).await;
    assert_eq!(
        responses,
        vec![
            Response::Error(id("1"), "not_initialized".to_string()),
            Response::Ok(id("2")),
            Response::Error(id("3"), "already_initialized".to_string()),
        ]
    );
    assert!(recorder.evals.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_commands() {
    let (bridge, _recorder) = bridge(1, ResponseEncoding::Etf);
    let (mut host, task) = connect(&bridge);

    // Code length claims more bytes than the packet holds.
    let mut truncated = eval("7", "a.js", "1+1").encode().to_vec();
    truncated.truncate(truncated.len() - 1);
    send_raw(&mut host, &truncated).await;

    // Too short to carry a tag.
    send_raw(&mut host, b"i").await;

    // Invalid UTF-8 in the code field.
    let mut bad_utf8 = eval("8", "a.js", "ab").encode().to_vec();
    let last = bad_utf8.len() - 1;
    bad_utf8[last] = 0xff;
    send_raw(&mut host, &bad_utf8).await;

    send(&mut host, &init("9", 8, 8)).await;

    let responses = finish(host, task, ResponseEncoding::Etf).await;
    assert_eq!(responses.len(), 4);

    assert_eq!(responses[0].call_id(), &id("7"));
    assert!(responses[0].is_error());
    assert!(responses[1].call_id().is_empty());
    assert!(responses[1].is_error());
    assert_eq!(responses[2].call_id(), &id("8"));
    assert!(responses[2].is_error());
    assert_eq!(responses[3], Response::Ok(id("9")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_every_channel() {
    let (bridge, recorder) = bridge(2, ResponseEncoding::Etf);

    let (mut first, first_task) = connect(&bridge);
    let (mut second, second_task) = connect(&bridge);

    send(&mut first, &init("a", 8, 8)).await;
    send(&mut second, &init("b", 8, 8)).await;
    send(&mut first, &shutdown("a-sd")).await;

    let responses = finish(first, first_task, ResponseEncoding::Etf).await;
    assert_eq!(responses[1], Response::Ok(id("a-sd")));

    // The other channel still holds an instance.
    assert!(bridge.runtime().is_shutdown_requested());
    assert!(!bridge.runtime().is_torn_down());
    assert_eq!(recorder.global_shutdowns.load(Ordering::SeqCst), 0);

    // New channels cannot create instances any more.
    let (mut third, third_task) = connect(&bridge);
    send(&mut third, &init("c", 8, 8)).await;
    let rejected = finish(third, third_task, ResponseEncoding::Etf).await;
    assert!(rejected[0].is_error());

    send(&mut second, &eval("b-1", "b.js", "still-alive")).await;
    let responses = finish(second, second_task, ResponseEncoding::Etf).await;
    assert_eq!(
        responses[1],
        Response::OkValue(id("b-1"), "still-alive".to_string())
    );

    assert!(bridge.runtime().is_torn_down());
    assert_eq!(recorder.global_shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_init_ack_not_held_by_other_channels_work() {
    let (bridge, _recorder) = bridge(1, ResponseEncoding::Etf);
    let (mut busy, busy_task) = connect(&bridge);
    let (mut fresh, fresh_task) = connect(&bridge);

    send(&mut busy, &init("a", 8, 8)).await;
    assert_eq!(
        next_response(&mut busy, ResponseEncoding::Etf).await,
        Response::Ok(id("a"))
    );

    // Occupies the only worker for two seconds.
    send(&mut busy, &eval("a-1", "busy.js", "slow")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    send(&mut fresh, &init("b", 8, 8)).await;
    let ack = tokio::time::timeout(
        Duration::from_millis(500),
        next_response(&mut fresh, ResponseEncoding::Etf),
    )
    .await
    .unwrap();
    assert_eq!(ack, Response::Ok(id("b")));
    assert!(started.elapsed() < Duration::from_millis(500));

    // Queued behind the slow eval, but still answered in order.
    send(&mut fresh, &eval("b-1", "fresh.js", "1+1")).await;
    let responses = finish(fresh, fresh_task, ResponseEncoding::Etf).await;
    assert_eq!(responses, vec![Response::OkValue(id("b-1"), "2".to_string())]);

    let responses = finish(busy, busy_task, ResponseEncoding::Etf).await;
    assert_eq!(responses, vec![Response::OkValue(id("a-1"), "slow".to_string())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_panic_is_contained_to_its_channel() {
    let (bridge, recorder) = bridge(1, ResponseEncoding::Etf);
    let (mut crashing, crashing_task) = connect(&bridge);
    let (mut healthy, healthy_task) = connect(&bridge);

    send(&mut crashing, &init("a", 8, 8)).await;
    send(&mut crashing, &eval("a-1", "crash.js", "panic")).await;
    assert_eq!(
        next_response(&mut crashing, ResponseEncoding::Etf).await,
        Response::Ok(id("a"))
    );
    match next_response(&mut crashing, ResponseEncoding::Etf).await {
        Response::Error(call_id, message) => {
            assert_eq!(call_id, id("a-1"));
            assert!(message.contains("engine crashed"));
        }
        other => panic!("unexpected response {:?}", other),
    }

    // The same worker keeps serving the other channel.
    send(&mut healthy, &init("b", 8, 8)).await;
    send(&mut healthy, &eval("b-1", "ok.js", "1+1")).await;
    let responses = finish(healthy, healthy_task, ResponseEncoding::Etf).await;
    assert_eq!(
        responses,
        vec![
            Response::Ok(id("b")),
            Response::OkValue(id("b-1"), "2".to_string()),
        ]
    );

    // The crashed channel lost its instance and may initialize again.
    send(&mut crashing, &eval("a-2", "crash.js", "1+1")).await;
    send(&mut crashing, &init("a-3", 8, 8)).await;
    send(&mut crashing, &eval("a-4", "crash.js", "1+1")).await;
    let responses = finish(crashing, crashing_task, ResponseEncoding::Etf).await;
    assert_eq!(
        responses,
        vec![
            Response::Error(id("a-2"), "not_initialized".to_string()),
            Response::Ok(id("a-3")),
            Response::OkValue(id("a-4"), "2".to_string()),
        ]
    );

    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 3);
    assert_eq!(bridge.runtime().live_instances(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_packet_closes_connection() {
    let recorder = Arc::new(Recorder::default());
    let bridge = Bridge::builder(RecordingEngine(recorder))
        .workers(1)
        .max_frame_size(32)
        .build()
        .unwrap();
    let (mut host, task) = connect(&bridge);

    send(&mut host, &eval("1", "big.js", &"x".repeat(64))).await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(BridgeError::Protocol(_))));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_socket_mode_stops_after_teardown() {
    let (bridge, recorder) = bridge(2, ResponseEncoding::Etf);
    let path = std::env::temp_dir().join(format!("scriptport-it-{}.sock", std::process::id()));

    let server = tokio::spawn({
        let bridge = bridge.clone();
        let path = path.clone();
        async move { bridge.serve_socket(&path).await }
    });

    let mut stream = loop {
        match tokio::net::UnixStream::connect(&path).await {
            Ok(stream) => break stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    };

    for command in [init("1", 8, 8), eval("2", "s.js", "3"), shutdown("3")] {
        stream
            .write_all(&build_packet(&command.encode()))
            .await
            .unwrap();
    }
    stream.shutdown().await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let responses: Vec<_> = FrameBuffer::new()
        .push(&raw)
        .unwrap()
        .iter()
        .map(|p| ResponseEncoder::new(ResponseEncoding::Etf).decode(p).unwrap())
        .collect();
    assert_eq!(responses[1], Response::OkValue(id("2"), "3".to_string()));

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(recorder.global_shutdowns.load(Ordering::SeqCst), 1);
    assert!(!path.exists());
}
