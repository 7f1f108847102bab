//! End-to-end run against a mocked GitHub API

use std::io::Write;

use mockito::{Matcher, Server};
use serde_json::json;
use tempfile::NamedTempFile;

use release_drift::batch::BatchRunner;
use release_drift::config::{RawConfig, load_catalog};
use release_drift::report::{Summary, write_commands, write_report};

fn write_catalog(entries: serde_json::Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", entries).unwrap();
    file
}

#[tokio::test]
async fn run_writes_report_rows_for_every_package() {
    let mut server = Server::new_async().await;

    let release_mock = server
        .mock("GET", "/repos/acme/tool/releases/latest")
        .match_header("authorization", "Bearer e2e-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-remaining", "4999")
        .with_header("x-ratelimit-reset", "4102444800")
        .with_body(
            json!({
                "tag_name": "v2.0.0",
                "assets": [
                    {"browser_download_url": "https://github.com/acme/tool/releases/download/v2.0.0/tool-setup-x64.exe"},
                    {"browser_download_url": "https://github.com/acme/tool/releases/download/v2.0.0/checksums.txt"}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let missing_mock = server
        .mock("GET", "/repos/acme/gone/releases/latest")
        .with_status(404)
        .with_body(r#"{"message": "Not Found"}"#)
        .create_async()
        .await;

    let search_mock = server
        .mock("POST", "/graphql")
        .match_body(Matcher::Regex("Acme.Tool".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "data": {"search": {"nodes": [{
                    "number": 1,
                    "title": "New version: Acme.Tool version 1.0.0",
                    "state": "MERGED",
                    "createdAt": "2024-01-01T00:00:00Z",
                    "body": ""
                }]}}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let catalog = write_catalog(json!([
        {
            "packageId": "Acme.Tool",
            "currentVersion": "1.0.0",
            "currentUrls": ["https://github.com/acme/tool/releases/download/v1.0.0/tool-1.0.0-x64.exe"],
            "history": {
                "1.0.0": ["https://github.com/acme/tool/releases/download/v1.0.0/tool-1.0.0-x64.exe"]
            }
        },
        {
            "packageId": "Acme.Gone",
            "repository": "acme/gone",
            "currentVersion": "3.1",
            "currentUrls": ["https://downloads.acme.example/gone-3.1.msi"]
        }
    ]));

    let mut raw = RawConfig {
        credentials: vec!["e2e-token".to_string()],
        ..RawConfig::default()
    };
    raw.github.api_url = server.url();
    raw.github.graphql_url = format!("{}/graphql", server.url());
    let config = raw.validate(|_| None).unwrap();

    let entries = load_catalog(catalog.path()).unwrap();
    let runner = BatchRunner::from_config(&config, &entries).unwrap();
    let verdicts = runner.run(&entries).await;

    release_mock.assert_async().await;
    missing_mock.assert_async().await;
    search_mock.assert_async().await;

    let mut buffer = Vec::new();
    write_report(&mut buffer, &verdicts).unwrap();
    let rows: Vec<serde_json::Value> = String::from_utf8(buffer)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["packageId"], "Acme.Tool");
    assert_eq!(rows[0]["outcome"], "proceed");
    assert_eq!(rows[0]["upstreamVersion"], "v2.0.0");
    assert_eq!(rows[0]["versionPattern"], "1NumDot1NumDot1Num");
    assert_eq!(rows[0]["archExtPairs"], "x64-exe");
    assert_eq!(rows[0]["prState"], "merged");
    assert_eq!(rows[0]["upstreamUrls"].as_array().map(Vec::len), Some(2));

    assert_eq!(rows[1]["packageId"], "Acme.Gone");
    assert_eq!(rows[1]["outcome"], "rejected");
    assert_eq!(rows[1]["reason"], "rule1 (upstream release not found)");
    assert_eq!(rows[1]["prState"], "not_searched");

    let mut commands = Vec::new();
    assert_eq!(write_commands(&mut commands, &verdicts).unwrap(), 1);
    assert_eq!(
        String::from_utf8(commands).unwrap(),
        "komac update Acme.Tool --version 2.0.0 --urls \
         https://github.com/acme/tool/releases/download/v2.0.0/tool-setup-x64.exe \
         https://github.com/acme/tool/releases/download/v2.0.0/checksums.txt\n"
    );

    let summary = Summary::from_verdicts(&verdicts);
    assert_eq!(summary.total, 2);
    assert_eq!(summary.proceed, 1);
}
