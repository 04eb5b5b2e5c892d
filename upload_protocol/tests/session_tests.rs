//! Upload sessions against a real TCP peer and against the in-memory transport

use std::io::{BufRead, BufReader, Cursor, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use upload_protocol::mock::MemoryConnector;
use upload_protocol::protocol::decode_chunked;
use upload_protocol::{
    Connector, ConnectorConfig, Endpoint, SessionError, TcpConnector, UploadSession,
};

/// What the mock server saw for one request
struct Received {
    request_line: String,
    headers: Vec<String>,
    body: Vec<u8>,
}

/// Accept one connection, decode the chunked upload, answer with `response`
fn spawn_server(response: Vec<u8>) -> (Endpoint, mpsc::Receiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" {
                break;
            }
            headers.push(line.trim_end().to_string());
        }

        let body = decode_chunked(&mut reader).expect("valid chunked body");

        let mut writer = stream;
        writer.write_all(&response).unwrap();
        writer.flush().unwrap();

        tx.send(Received {
            request_line: request_line.trim_end().to_string(),
            headers,
            body,
        })
        .unwrap();
    });

    (Endpoint::new("127.0.0.1", port, "/upload"), rx)
}

fn json_ok(body: &str) -> Vec<u8> {
    upload_protocol::mock::json_response(body)
}

#[test]
fn test_upload_over_tcp_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();

    let reply = r#"{"text":"Hello","audio_url":"http://x/y.mp3"}"#;
    let (endpoint, received) = spawn_server(json_ok(reply));

    let mut connector = TcpConnector::default();
    let mut session = UploadSession::open(&mut connector, &endpoint).expect("open session");
    assert!(session.headers_sent());

    let frames: Vec<Vec<u8>> = vec![vec![1u8; 1024], vec![2u8; 1024], vec![3u8; 17]];
    for frame in &frames {
        session.write_chunk(frame).expect("write chunk");
    }
    assert_eq!(session.chunks_sent(), 3);

    let response = session.finish().expect("read response");
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), reply);

    let seen = received
        .recv_timeout(Duration::from_secs(5))
        .expect("server saw the request");
    assert_eq!(seen.request_line, "POST /upload HTTP/1.1");
    assert!(seen
        .headers
        .iter()
        .any(|h| h == "Transfer-Encoding: chunked"));
    assert!(seen
        .headers
        .iter()
        .any(|h| h == "Content-Type: application/octet-stream"));
    assert_eq!(seen.body, frames.concat());
}

#[test]
fn test_upload_with_no_frames_sends_bare_terminator() {
    let (endpoint, received) = spawn_server(json_ok("{}"));

    let mut connector = TcpConnector::default();
    let session = UploadSession::open(&mut connector, &endpoint).unwrap();
    let response = session.finish().unwrap();

    assert_eq!(response.body, b"{}");
    let seen = received.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(seen.body.is_empty());
}

#[test]
fn test_unframed_response_is_bounded_by_drain_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    // Server answers without a length and keeps the connection open
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        loop {
            line.clear();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" {
                break;
            }
        }
        decode_chunked(&mut reader).unwrap();

        let mut writer = stream;
        writer
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"text\":\"late\"}")
            .unwrap();
        writer.flush().unwrap();
        thread::sleep(Duration::from_secs(2));
    });

    let endpoint = Endpoint::new("127.0.0.1", port, "/upload");
    let mut connector = TcpConnector::default();
    let session = UploadSession::open(&mut connector, &endpoint)
        .unwrap()
        .with_drain_timeout(Duration::from_millis(200));

    let start = Instant::now();
    let response = session.finish().unwrap();

    assert!(start.elapsed() < Duration::from_millis(1500));
    assert_eq!(response.body_text(), r#"{"text":"late"}"#);
    server.join().unwrap();
}

/// Accept one upload, then send `parts` with `gap` between them
fn spawn_slow_server(
    parts: Vec<&'static [u8]>,
    gap: Duration,
) -> (Endpoint, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        loop {
            line.clear();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" {
                break;
            }
        }
        decode_chunked(&mut reader).unwrap();

        let mut writer = stream;
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                thread::sleep(gap);
            }
            writer.write_all(part).unwrap();
            writer.flush().unwrap();
        }
    });

    (Endpoint::new("127.0.0.1", port, "/upload"), server)
}

#[test]
fn test_length_framed_body_may_arrive_after_drain_timeout() {
    let (endpoint, server) = spawn_slow_server(
        vec![
            b"HTTP/1.1 200 OK\r\nContent-Length: 16\r\n\r\n".as_slice(),
            br#"{"text":"Hello"}"#.as_slice(),
        ],
        Duration::from_millis(300),
    );

    let mut connector = TcpConnector::default();
    let session = UploadSession::open(&mut connector, &endpoint)
        .unwrap()
        .with_drain_timeout(Duration::from_millis(100));

    let response = session.finish().unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), r#"{"text":"Hello"}"#);
    server.join().unwrap();
}

#[test]
fn test_chunked_body_with_gaps_is_read_in_full() {
    let (endpoint, server) = spawn_slow_server(
        vec![
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".as_slice(),
            b"9\r\n{\"text\":\"\r\n".as_slice(),
            b"7\r\nslow\"}\n\r\n0\r\n\r\n".as_slice(),
        ],
        Duration::from_millis(250),
    );

    let mut connector = TcpConnector::default();
    let session = UploadSession::open(&mut connector, &endpoint)
        .unwrap()
        .with_drain_timeout(Duration::from_millis(100));

    let response = session.finish().unwrap();

    assert_eq!(response.body_text(), "{\"text\":\"slow\"}\n");
    server.join().unwrap();
}

#[test]
fn test_refused_connection_is_a_connect_error() {
    // Grab a free port, then close it so nothing is listening
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut connector = TcpConnector::new(ConnectorConfig {
        connect_timeout: Duration::from_millis(500),
        ..ConnectorConfig::default()
    });
    let endpoint = Endpoint::new("127.0.0.1", port, "/upload");

    let result = UploadSession::open(&mut connector, &endpoint);
    assert!(matches!(result, Err(SessionError::Connect(_))));
}

#[test]
fn test_server_closing_early_is_a_read_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        let (stream, _): (TcpStream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        // Drop without answering
    });

    let endpoint = Endpoint::new("127.0.0.1", port, "/upload");
    let mut connector = TcpConnector::default();
    let mut session = UploadSession::open(&mut connector, &endpoint).unwrap();

    // Writes may or may not notice the close; the response read must
    let outcome = session
        .write_chunk(&[0u8; 64])
        .and_then(|_| session.finish().map(|_| ()));
    assert!(outcome.is_err());
}

#[test]
fn test_memory_transport_captures_exact_wire_body() {
    let mut connector = MemoryConnector::with_json("{}");
    let wire = connector.wire();
    let endpoint = Endpoint::new("10.0.0.2", 5000, "/upload");

    let mut session = UploadSession::open(&mut connector, &endpoint).unwrap();
    session.write_chunk(&[0x11; 1024]).unwrap();
    session.write_chunk(&[]).unwrap();
    session.write_chunk(&[0x22; 1024]).unwrap();
    session.finish().unwrap();

    let mut expected = b"400\r\n".to_vec();
    expected.extend_from_slice(&[0x11; 1024]);
    expected.extend_from_slice(b"\r\n400\r\n");
    expected.extend_from_slice(&[0x22; 1024]);
    expected.extend_from_slice(b"\r\n0\r\n\r\n");
    assert_eq!(wire.body(), expected);
    assert!(wire.head().starts_with("POST /upload HTTP/1.1"));

    let decoded = decode_chunked(&mut Cursor::new(wire.body())).unwrap();
    assert_eq!(decoded.len(), 2048);
}

#[test]
fn test_write_failure_mid_stream_is_a_write_error() {
    let mut connector = MemoryConnector::with_json("{}").failing_after(200);
    let endpoint = Endpoint::new("10.0.0.2", 5000, "/upload");

    let mut session = UploadSession::open(&mut connector, &endpoint).unwrap();
    let result = session.write_chunk(&[0u8; 1024]);

    assert!(matches!(result, Err(SessionError::Write(_))));
}

#[test]
fn test_refusing_memory_connector() {
    let mut connector = MemoryConnector::refusing();
    let endpoint = Endpoint::new("10.0.0.2", 5000, "/upload");

    assert!(matches!(
        connector.connect(&endpoint),
        Err(SessionError::Connect(_))
    ));
    assert_eq!(connector.connects(), 1);
}
