//! Functional tests for source image rehosting

use gen_dispatch::config::RehostConfig;
use gen_dispatch::worker::{PublicUrlResolver, Rehoster};
use serde_json::json;
use std::io::Write;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

fn rehoster(server: &MockServer, storage_backend: &str) -> Rehoster {
    Rehoster::new(&RehostConfig {
        storage_backend: storage_backend.to_string(),
        internal_base_url: server.uri(),
        tmpfiles_url: format!("{}/tmpfiles/upload", server.uri()),
        fileio_url: format!("{}/fileio", server.uri()),
        timeout_secs: 5,
    })
    .unwrap()
}

async fn serve_source_image(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/media/u1/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_rehosts_to_tmpfiles_direct_link() {
    let server = MockServer::start().await;
    serve_source_image(&server).await;
    Mock::given(method("POST"))
        .and(path("/tmpfiles/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"url": "https://tmpfiles.org/12345/image.png"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = rehoster(&server, "s3")
        .resolve_public_url("/media/u1/a.png", None)
        .await;

    assert_eq!(url, "https://tmpfiles.org/dl/12345/image.png");
}

#[tokio::test]
async fn test_falls_back_to_fileio() {
    let server = MockServer::start().await;
    serve_source_image(&server).await;
    Mock::given(method("POST"))
        .and(path("/tmpfiles/upload"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/fileio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "link": "https://file.io/abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = rehoster(&server, "s3")
        .resolve_public_url("/media/u1/a.png", None)
        .await;

    assert_eq!(url, "https://file.io/abc");
}

#[tokio::test]
async fn test_every_target_failing_keeps_original_url() {
    let server = MockServer::start().await;
    serve_source_image(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let url = rehoster(&server, "s3")
        .resolve_public_url("/media/u1/a.png", None)
        .await;

    assert_eq!(url, "/media/u1/a.png");
}

#[tokio::test]
async fn test_unreachable_source_keeps_original_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let url = rehoster(&server, "s3")
        .resolve_public_url("/media/u1/missing.png", None)
        .await;

    assert_eq!(url, "/media/u1/missing.png");
}

#[tokio::test]
async fn test_local_file_is_read_instead_of_downloaded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tmpfiles/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"url": "https://tmpfiles.org/777/image.png"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(PNG).unwrap();
    let disk_path = file.path().to_str().unwrap().to_string();

    let url = rehoster(&server, "local")
        .resolve_public_url("http://localhost:8000/media/u1/a.png", Some(&disk_path))
        .await;

    assert_eq!(url, "https://tmpfiles.org/dl/777/image.png");
}

#[tokio::test]
async fn test_public_url_needs_no_rehost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let url = rehoster(&server, "s3")
        .resolve_public_url("https://cdn.example.com/a.png", None)
        .await;

    assert_eq!(url, "https://cdn.example.com/a.png");
}
