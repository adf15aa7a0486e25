//! Application data over an established session

mod common;

use common::{connect, credentials, spawn_tls_server, CertSpec, TestPki};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use vtls::net::Timeout;
use vtls::tls::{self, ReadOutcome, TlsError, TlsSession};

const WAIT: Timeout = Timeout::After(std::time::Duration::from_secs(5));

fn server_pki() -> (TestPki, openssl::x509::X509, openssl::pkey::PKey<openssl::pkey::Private>) {
    let pki = TestPki::new();
    let (cert, key) = pki.issue(CertSpec::leaf("example.test").sans(&["example.test"]));
    (pki, cert, key)
}

fn open(pki: &TestPki, addr: std::net::SocketAddr) -> TlsSession<TcpStream> {
    TlsSession::open(connect(addr), "example.test", &credentials(pki, true)).unwrap()
}

#[test]
fn test_read_small_message() {
    common::init_tracing();
    let (pki, cert, key) = server_pki();
    let (addr, server) = spawn_tls_server(cert, key, |mut tls| {
        tls.write_all(b"hello").unwrap();
        // hold the connection until the client goes away
        let mut buf = [0u8; 1];
        let _ = tls.read(&mut buf);
    });

    let mut session = open(&pki, addr);

    let mut buf = [0u8; 4096];
    assert_eq!(session.read(&mut buf, WAIT).unwrap(), ReadOutcome::Data(5));
    assert_eq!(&buf[..5], b"hello");

    session.close();
    server.join().unwrap().unwrap();
}

#[test]
fn test_read_with_oversized_request() {
    common::init_tracing();
    let (pki, cert, key) = server_pki();
    let (addr, server) = spawn_tls_server(cert, key, |mut tls| {
        tls.write_all(b"hello").unwrap();
        let mut buf = [0u8; 1];
        let _ = tls.read(&mut buf);
    });

    let mut session = open(&pki, addr);

    let mut buf = vec![0u8; 5000];
    assert_eq!(session.read(&mut buf, WAIT).unwrap(), ReadOutcome::Data(5));
    assert_eq!(&buf[..5], b"hello");

    session.close();
    server.join().unwrap();
}

#[test]
fn test_buffered_data_drained_without_waiting() {
    common::init_tracing();
    let (pki, cert, key) = server_pki();
    let (addr, server) = spawn_tls_server(cert, key, |mut tls| {
        tls.write_all(b"0123456789").unwrap();
        let mut buf = [0u8; 1];
        let _ = tls.read(&mut buf);
    });

    let mut session = open(&pki, addr);

    let mut buf = [0u8; 4];
    assert_eq!(session.read(&mut buf, WAIT).unwrap(), ReadOutcome::Data(4));
    assert_eq!(&buf, b"0123");
    assert_eq!(session.pending(), 6);

    // the rest of the record is already decrypted
    assert_eq!(session.read(&mut buf, Timeout::Immediate).unwrap(), ReadOutcome::Data(4));
    assert_eq!(&buf, b"4567");
    assert_eq!(session.read(&mut buf, Timeout::Immediate).unwrap(), ReadOutcome::Data(2));
    assert_eq!(&buf[..2], b"89");
    assert_eq!(session.pending(), 0);

    assert_eq!(session.read(&mut buf, Timeout::Immediate).unwrap(), ReadOutcome::NoData);

    session.close();
    server.join().unwrap();
}

#[test]
fn test_read_timeout_reports_no_data() {
    common::init_tracing();
    let (pki, cert, key) = server_pki();
    let (addr, server) = spawn_tls_server(cert, key, |mut tls| {
        let mut buf = [0u8; 1];
        let _ = tls.read(&mut buf);
    });

    let mut session = open(&pki, addr);

    let mut buf = [0u8; 64];
    let outcome = session.read(&mut buf, Timeout::from_millis(100)).unwrap();
    assert_eq!(outcome, ReadOutcome::NoData);

    session.close();
    server.join().unwrap();
}

#[test]
fn test_close_notify_is_eof() {
    common::init_tracing();
    let (pki, cert, key) = server_pki();
    let (addr, server) = spawn_tls_server(cert, key, |mut tls| {
        tls.write_all(b"bye").unwrap();
        let _ = tls.shutdown();
        // keep the socket open so the client sees close_notify, not a reset
        let mut buf = [0u8; 1];
        let _ = tls.get_mut().read(&mut buf);
    });

    let mut session = open(&pki, addr);

    let mut buf = [0u8; 64];
    assert_eq!(session.read(&mut buf, WAIT).unwrap(), ReadOutcome::Data(3));
    assert_eq!(session.read(&mut buf, WAIT).unwrap(), ReadOutcome::Eof);

    session.close();
    server.join().unwrap();
}

#[test]
fn test_write_all_large_payload() {
    common::init_tracing();
    let (pki, cert, key) = server_pki();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let (addr, server) = spawn_tls_server(cert, key, move |mut tls| {
        let mut received = vec![0u8; expected.len()];
        tls.read_exact(&mut received).unwrap();
        assert_eq!(received, expected);
        tls.write_all(b"ok").unwrap();
        let mut buf = [0u8; 1];
        let _ = tls.read(&mut buf);
    });

    let mut session = open(&pki, addr);
    session.write_all(&payload, WAIT).unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(session.read(&mut buf, WAIT).unwrap(), ReadOutcome::Data(2));
    assert_eq!(&buf[..2], b"ok");

    session.close();
    server.join().unwrap().unwrap();
}

#[test]
fn test_write_timeout_when_peer_stops_reading() {
    common::init_tracing();
    let (pki, cert, key) = server_pki();
    let (release, released) = mpsc::channel::<()>();
    let (addr, server) = spawn_tls_server(cert, key, move |_tls| {
        let _ = released.recv();
    });

    let mut session = open(&pki, addr);

    let chunk = vec![0x55u8; 16 * 1024];
    let mut written = 0usize;
    let err = loop {
        match session.write(&chunk, Timeout::from_millis(100)) {
            Ok(n) => written += n,
            Err(e) => break e,
        }
        assert!(written < 512 * 1024 * 1024, "peer buffers never filled");
    };
    assert!(matches!(err, TlsError::WriteTimeout), "unexpected error: {}", err);
    assert!(err.is_timeout());

    // poll wants a chunk of free send buffer before it reports writable, so
    // single attempts may still get some bytes out before the socket is full
    let mut attempts = 0;
    loop {
        match session.write_once(&chunk) {
            Ok(n) => written += n,
            Err(TlsError::WouldBlock) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
        attempts += 1;
        assert!(attempts < 100_000, "write_once never reported WouldBlock");
    }

    release.send(()).unwrap();
    drop(session);
    server.join().unwrap();
}

#[test]
fn test_close_through_handle() {
    common::init_tracing();
    let (pki, cert, key) = server_pki();
    let (addr, server) = spawn_tls_server(cert, key, |mut tls| {
        let mut buf = [0u8; 1];
        tls.read(&mut buf).map(|n| n == 0)
    });

    let mut handle = Some(open(&pki, addr));
    tls::close(&mut handle);
    assert!(handle.is_none());

    // closing again is a no-op
    tls::close(&mut handle);
    assert!(handle.is_none());

    // the peer saw an orderly close
    assert!(server.join().unwrap().unwrap().unwrap());
}
