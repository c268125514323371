use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use voice_latency_harness::{
    reporter::ReporterConfig, suite::quick_validation_suite, HttpReportSink, MetricsCollector,
    ResultReporter, TestResult,
};

struct Captured {
    path: String,
    body: serde_json::Value,
}

/// Minimal HTTP endpoint that records each request and answers 200
async fn capture_server() -> Result<(String, mpsc::UnboundedReceiver<Captured>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut data = Vec::new();
            let mut chunk = [0u8; 4096];
            let header_end = loop {
                let n = match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break None,
                    Ok(n) => n,
                };
                data.extend_from_slice(&chunk[..n]);
                if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                    break Some(pos + 4);
                }
            };
            let Some(header_end) = header_end else {
                continue;
            };

            let head = String::from_utf8_lossy(&data[..header_end]).to_string();
            let path = head
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or_default()
                .to_string();
            let content_length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            while data.len() < header_end + content_length {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => data.extend_from_slice(&chunk[..n]),
                }
            }

            let body = serde_json::from_slice(&data[header_end..]).unwrap_or_default();
            let _ = tx.send(Captured { path, body });
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
    });

    Ok((format!("http://{}/api", addr), rx))
}

fn results(count: usize) -> Vec<TestResult> {
    let config = quick_validation_suite().generate_configurations().remove(0);
    (0..count)
        .map(|i| {
            let mut collector = MetricsCollector::new(Duration::from_millis(10));
            collector.start_test(config.clone());
            collector.record_llm_ttfb(100.0 + i as f64);
            collector.record_tts_ttfb(50.0);
            collector.record_e2e(150.0 + i as f64);
            collector.finalize_test()
        })
        .collect()
}

/// Batches arrive at the run's results URL and decode back to the same results.
#[tokio::test]
async fn reporter_posts_batches_per_run() -> Result<()> {
    let (endpoint, mut requests) = capture_server().await?;
    let sink = HttpReportSink::new(&endpoint, Duration::from_secs(2))?;
    let reporter = ResultReporter::start(
        Arc::new(sink),
        ReporterConfig {
            batch_size: 2,
            flush_interval: Duration::from_secs(60),
        },
    );

    let sent = results(3);
    for result in &sent[..2] {
        reporter.enqueue("run-42", result.clone());
    }
    // A full batch goes out without waiting for the interval
    tokio::time::timeout(Duration::from_secs(5), async {
        while reporter.delivered() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    reporter.enqueue("run-42", sent[2].clone());
    reporter.stop().await;

    assert_eq!(reporter.delivered(), 3);
    assert_eq!(reporter.dropped(), 0);
    assert_eq!(reporter.pending(), 0);

    let mut received: Vec<TestResult> = Vec::new();
    let mut batch_sizes = Vec::new();
    while let Ok(request) = requests.try_recv() {
        assert_eq!(request.path, "/api/runs/run-42/results");
        let batch = request.body["results"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert!(batch.iter().all(|item| item.get("llmTTFBMs").is_some()));
        batch_sizes.push(batch.len());
        for item in batch {
            received.push(serde_json::from_value(item)?);
        }
    }

    assert_eq!(batch_sizes, vec![2, 1]);
    assert_eq!(received, sent);
    Ok(())
}

/// An unreachable endpoint drops results without blocking the caller.
#[tokio::test]
async fn reporter_drops_when_endpoint_unreachable() -> Result<()> {
    let sink = HttpReportSink::new("http://127.0.0.1:1", Duration::from_millis(500))?;
    let reporter = ResultReporter::start(Arc::new(sink), ReporterConfig::default());

    for result in results(25) {
        reporter.enqueue("run-unreachable", result);
    }
    // Nothing is attempted until the worker gets to run
    assert_eq!(reporter.pending(), 25);

    reporter.stop().await;
    assert_eq!(reporter.pending(), 0);
    assert_eq!(reporter.delivered(), 0);
    assert_eq!(reporter.dropped(), 25);

    // Enqueue after stop is counted as dropped
    reporter.enqueue("run-unreachable", results(1).remove(0));
    assert_eq!(reporter.dropped(), 26);
    Ok(())
}
