use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LoopSnapshot {
    running: bool,
    cycles: u64,
    failed_cycles: u64,
    points_written: u64,
    points_rejected: u64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    device: LoopSnapshot,
    enrichment: LoopSnapshot,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

#[tokio::test]
#[ignore = "requires a running simulator; set BASE_URL"]
async fn health_reports_both_loops() -> Result<()> {
    // ---
    let url = format!("{}/health", base_url());
    let health: HealthResponse = Client::new().get(&url).send().await?.json().await?;

    assert_eq!(health.status, "ok", "unexpected status from {}", url);

    for (name, snapshot) in [("device", &health.device), ("enrichment", &health.enrichment)] {
        // ---
        assert!(
            snapshot.failed_cycles <= snapshot.cycles,
            "{name}: {} failed cycles out of {}",
            snapshot.failed_cycles,
            snapshot.cycles
        );

        // A loop that has stopped must have run at least once.
        if !snapshot.running {
            assert!(snapshot.cycles > 0, "{name} loop stopped without cycling");
        }

        println!(
            "{name}: {} points written, {} rejected",
            snapshot.points_written, snapshot.points_rejected
        );
    }

    Ok(())
}

#[tokio::test]
#[ignore = "requires a running simulator; set BASE_URL"]
async fn health_counters_advance() -> Result<()> {
    // ---
    let url = format!("{}/health", base_url());
    let client = Client::new();

    let first: HealthResponse = client.get(&url).send().await?.json().await?;
    let interval = std::env::var("RUN_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60);
    tokio::time::sleep(std::time::Duration::from_secs(interval + 2)).await;
    let second: HealthResponse = client.get(&url).send().await?.json().await?;

    if first.device.running {
        assert!(
            second.device.cycles > first.device.cycles,
            "device loop did not advance"
        );
    }
    if first.enrichment.running {
        assert!(
            second.enrichment.cycles > first.enrichment.cycles,
            "enrichment loop did not advance"
        );
    }

    Ok(())
}
