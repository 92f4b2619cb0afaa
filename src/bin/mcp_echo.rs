//! `mcp_echo`: a tiny JSON-RPC 2.0 server used as a fixture.
//!
//! Without arguments it speaks newline-delimited JSON over stdio; with
//! `--http` it serves the same methods over HTTP on `$PORT`, plus
//! `GET /health`.
//!
//! Methods:
//!
//! - `echo`: returns `params` unchanged
//! - `sleep`: waits `params.ms` milliseconds, then answers
//! - `exit`: terminates the process with `params.code` without answering
//! - `stray`: emits a response with an unknown id before the real one
//! - `pid`: returns the process id

use anyhow::Context;
use axum::{Json, Router, body::Bytes, routing::get};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match std::env::args().nth(1).as_deref() {
        Some("--http") => serve_http().await,
        _ => serve_stdio().await,
    }
}

async fn serve_stdio() -> anyhow::Result<()> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = receiver.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut stderr = tokio::io::stderr();
    stderr.write_all(b"mcp_echo ready\n").await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            stderr.write_all(b"skipping malformed line\n").await?;
            continue;
        };
        let replies = sender.clone();
        tokio::spawn(async move {
            for reply in respond(&request).await {
                if replies.send(reply.to_string()).is_err() {
                    break;
                }
            }
        });
    }

    drop(sender);
    writer.await.context("stdout writer panicked")??;
    Ok(())
}

async fn serve_http() -> anyhow::Result<()> {
    let port: u16 = std::env::var("PORT")
        .context("PORT must be set in --http mode")?
        .parse()
        .context("PORT must be a port number")?;
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding port {port}"))?;

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .fallback(handle_http);
    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}

async fn handle_http(body: Bytes) -> Json<Value> {
    let request = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
    let reply = respond(&request).await.pop().unwrap_or(Value::Null);
    Json(reply)
}

async fn respond(request: &Value) -> Vec<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    match method {
        "echo" => vec![success(&id, params)],
        "sleep" => {
            let millis = params.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            vec![success(&id, json!({"slept_ms": millis}))]
        }
        "exit" => {
            let code = params
                .get("code")
                .and_then(Value::as_i64)
                .and_then(|value| i32::try_from(value).ok())
                .unwrap_or(1);
            std::process::exit(code)
        }
        "stray" => vec![
            success(&json!("stray-unmatched"), json!({})),
            success(&id, params),
        ],
        "pid" => vec![success(&id, json!({"pid": std::process::id()}))],
        other => vec![json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("method not found: {other}")},
        })],
    }
}

fn success(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}
