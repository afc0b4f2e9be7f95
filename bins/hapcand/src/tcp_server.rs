//! Programmer socket server.
//!
//! Serves one PC-tool client at a time on the configured bind address.
//! Received chunks go into the read queue for the programmer state machine;
//! the write queue (canned responses plus mirrored bus traffic) is drained
//! towards the client. While no client is connected the write queue simply
//! overwrites its oldest entries.

use buffers::{now_ms, Link, LinkState};
use engine::Engine;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::supervisor::Restart;

pub async fn run(engine: Arc<Engine>, link: Arc<Link>, restart: Arc<Restart>) {
    loop {
        let config = engine.config.snapshot();
        if !config.enable_socket_server {
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }
        let addr = format!(
            "{}:{}",
            config.socket_server_bind, config.socket_server_port
        );
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(addr, "programmer socket listening");
                listener
            }
            Err(error) => {
                error!(%error, addr, "bind failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        loop {
            if restart.tcp.swap(false, Ordering::Relaxed) {
                info!("socket server parameters changed, rebinding");
                break;
            }
            // Bounded accept so the restart flag is observed while idle.
            match tokio::time::timeout(Duration::from_secs(1), listener.accept()).await {
                Err(_) => continue,
                Ok(Err(error)) => {
                    error!(%error, "accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok(Ok((stream, peer))) => {
                    info!(%peer, "programmer client connected");
                    link.set(LinkState::Connected);
                    serve_client(&engine, stream, &restart).await;
                    link.set(LinkState::Disconnected);
                    info!(%peer, "programmer client disconnected");
                }
            }
        }
        link.set(LinkState::Disconnected);
    }
}

async fn serve_client(engine: &Engine, stream: TcpStream, restart: &Restart) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = [0u8; 64];

    loop {
        if restart.tcp.load(Ordering::Relaxed) {
            return;
        }
        // Drain pending responses and mirrored bus traffic.
        while let Some(stamped) = engine.queues.tcp_write.pop() {
            if let Err(error) = writer.write_all(&stamped.msg).await {
                warn!(%error, "socket write failed");
                return;
            }
        }
        match tokio::time::timeout(Duration::from_millis(5), reader.read(&mut buf)).await {
            Err(_) => {}
            Ok(Ok(0)) => return,
            Ok(Ok(n)) => engine.queues.tcp_read.push(buf[..n].to_vec(), now_ms()),
            Ok(Err(error)) => {
                warn!(%error, "socket read failed");
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
