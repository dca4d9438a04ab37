use std::{net::TcpListener, time::Duration};

use action_relay::{api::run_api_server, clients::health::StatusBoard};
use anyhow::{Result, anyhow};
use serde_json::Value;
use tokio::sync::watch;

fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Polls until the server accepts connections.
async fn get_health(port: u16) -> Result<(u16, Value)> {
    let url = format!("http://127.0.0.1:{}/health", port);
    let client = reqwest::Client::new();

    for _ in 0..50 {
        if let Ok(response) = client.get(&url).send().await {
            let status = response.status().as_u16();
            return Ok((status, response.json().await?));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    Err(anyhow!("health endpoint never came up on port {}", port))
}

/// Test: Health reflects whether every listener is consuming
#[tokio::test]
async fn test_health_endpoint_reports_listeners() -> Result<()> {
    let port = free_port()?;
    let board = StatusBoard::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    board.register("actions.201.filelookup");
    board.register("actions.201.taskadd");

    let server = tokio::spawn(run_api_server(port, board.clone(), shutdown_rx));

    let (status, body) = get_health(port).await?;
    assert_eq!(status, 503);
    assert_eq!(body["status"], "unhealthy");

    board.record_connect_success("actions.201.filelookup");
    let (status, body) = get_health(port).await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "degraded");
    assert_eq!(
        body["listeners"]["actions.201.filelookup"]["phase"],
        "consuming"
    );

    board.record_connect_success("actions.201.taskadd");
    board.record_completion("actions.201.taskadd", false);
    let (status, body) = get_health(port).await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["listeners"]["actions.201.taskadd"]["failures_reported"], 1);

    shutdown_tx.send(true)?;
    tokio::time::timeout(Duration::from_secs(5), server).await???;

    Ok(())
}
