//! Client connection task
//!
//! Accepts TCP connections and runs one reader and one writer per client.
//! Requests from one client are handled in the order they were sent.

use std::net::SocketAddr;
use std::sync::Arc;

use nabbit_protocol::{decode_line, LineParser, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::controller::ConnectionId;
use crate::daemon::Nabbitd;

const READ_BUFFER: usize = 4096;

/// Service task - accept loop
pub async fn service_task(listener: TcpListener, daemon: Arc<Nabbitd>) {
    info!("Service task started");
    let token = daemon.shutdown_token().clone();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(connection(stream, peer, daemon.clone()));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
        }
    }
    info!("Service task stopped");
}

async fn connection(stream: TcpStream, peer: SocketAddr, daemon: Arc<Nabbitd>) {
    let (mut reader, writer) = stream.into_split();
    let (outbox, lines) = mpsc::unbounded_channel();
    let id = daemon.connect(outbox);
    debug!("{} connected from {}", id, peer);
    let writer = tokio::spawn(write_lines(writer, lines, id));

    let token = daemon.shutdown_token().clone();
    let mut parser = LineParser::new();
    let mut buf = [0u8; READ_BUFFER];
    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => parser.feed_bytes(&buf[..n]),
            Err(e) => {
                debug!("{} read failed: {}", id, e);
                break;
            }
        }
        while let Some(line) = parser.next_line() {
            process_line(&daemon, id, line).await;
        }
    }

    daemon.disconnect(id).await;
    // The outbox went away with the connection, so the writer drains and ends
    let _ = writer.await;
}

async fn process_line(
    daemon: &Arc<Nabbitd>,
    id: ConnectionId,
    line: Result<Vec<u8>, nabbit_protocol::DecodeError>,
) {
    let value = match line.and_then(|line| decode_line(&line)) {
        Ok(Some(value)) => value,
        Ok(None) => return,
        Err(e) => {
            debug!("{} sent an undecodable line: {}", id, e);
            daemon.reject(id, Response::error(e.class(), e.to_string()));
            return;
        }
    };
    match Request::from_value(value) {
        Ok(request) => daemon.handle(id, request).await,
        Err(rejected) => {
            debug!("{} sent a rejected packet: {}", id, rejected.error);
            daemon.reject(id, rejected.response());
        }
    }
}

async fn write_lines(mut writer: OwnedWriteHalf, mut lines: mpsc::UnboundedReceiver<String>, id: ConnectionId) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("{} write failed: {}", id, e);
            break;
        }
    }
}
