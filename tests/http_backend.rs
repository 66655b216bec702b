//! The HTTP backend against a local mock server.

mod common;

use common::{corrupted, fast_http, random_tile, Server};
use slicestore::backend::{Backend, HttpBackend};
use slicestore::digest::Digest;
use slicestore::Error;
use std::io::Read;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn backend(server: &Server, max_attempts: u32) -> HttpBackend {
    HttpBackend::with_config(server.url("/tiles"), &fast_http(max_attempts)).expect("backend")
}

fn serve(server: &Server, status: u16, body: Vec<u8>) {
    server.mount(
        Mock::given(method("GET"))
            .and(path("/tiles/t.npy"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body)),
    );
}

#[test]
fn checksum_good() -> slicestore::Result<()> {
    let server = Server::start();
    let tile = random_tile();
    serve(&server, 200, tile.clone());

    let http = backend(&server, 3);
    let stream = http.open_for_read("t.npy", Some(&Digest::from(&tile)))?;
    assert!(stream.is_buffered());
    assert_eq!(stream.into_bytes()?, tile);
    Ok(())
}

#[test]
fn checksum_bad() {
    let server = Server::start();
    let tile = random_tile();
    let bad = corrupted(&tile);
    serve(&server, 200, bad.clone());

    match backend(&server, 3).open_for_read("t.npy", Some(&Digest::from(&tile))) {
        Err(Error::ChecksumMismatch { computed, expected }) => {
            assert_eq!(computed, Digest::from(&bad));
            assert_eq!(expected, Digest::from(&tile));
        }
        other => panic!("expected mismatch, got {:?}", other),
    }
}

#[test]
fn not_found_is_not_retried() {
    let server = Server::start();
    server.mount(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1),
    );

    assert!(matches!(
        backend(&server, 5).open_for_read("missing.npy", None),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn terminal_status_is_not_retried() {
    let server = Server::start();
    server.mount(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1),
    );

    match backend(&server, 5).open_for_read("t.npy", Some(&Digest::from("x"))) {
        Err(e @ Error::Transport { status: Some(403), .. }) => assert!(!e.is_retryable()),
        other => panic!("expected 403 transport error, got {:?}", other),
    }
}

#[test]
fn retry_budget_is_bounded() {
    let server = Server::start();
    server.mount(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4),
    );

    let started = Instant::now();
    let result = backend(&server, 4).open_for_read("t.npy", None);
    assert!(matches!(result, Err(Error::Transport { status: Some(503), .. })));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn recovers_from_transient_errors() -> slicestore::Result<()> {
    let server = Server::start();
    let tile = random_tile();
    server.mount(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2),
    );
    serve(&server, 200, tile.clone());

    let got = backend(&server, 5).read_bytes("t.npy", Some(&Digest::from(&tile)))?;
    assert_eq!(got, tile);
    assert_eq!(server.request_count(), 3);
    Ok(())
}

#[test]
fn streams_without_checksum() -> slicestore::Result<()> {
    let server = Server::start();
    let tile = random_tile();
    serve(&server, 200, tile.clone());

    let stream = backend(&server, 1).open_for_read("t.npy", None)?;
    assert!(!stream.is_buffered());
    assert_eq!(stream.into_bytes()?, tile);
    Ok(())
}

#[test]
fn reentrant() -> slicestore::Result<()> {
    let server = Server::start();
    let tile = random_tile();
    serve(&server, 200, tile.clone());
    let http = backend(&server, 1);

    for checksum in [None, Some(Digest::from(&tile))] {
        let mut a = http.open_for_read("t.npy", checksum.as_ref())?;
        let mut head = [0u8; 1];
        a.read_exact(&mut head)?;
        let b = http.open_for_read("t.npy", checksum.as_ref())?.into_bytes()?;
        let mut rest = vec![];
        a.read_to_end(&mut rest)?;

        assert_eq!(b, tile);
        assert_eq!([&head[..], &rest[..]].concat(), tile);
    }
    Ok(())
}

#[test]
fn base_with_query_is_kept() -> slicestore::Result<()> {
    let server = Server::start();
    server.mount(
        Mock::given(method("GET"))
            .and(path("/tiles/t.npy"))
            .and(wiremock::matchers::query_param("token", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"signed".to_vec())),
    );

    let mut base = server.url("/tiles");
    base.set_query(Some("token=abc"));
    let http = HttpBackend::with_config(base, &fast_http(1))?;
    assert_eq!(http.read_bytes("t.npy", None)?, b"signed");
    Ok(())
}
