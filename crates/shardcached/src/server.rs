//! TCP accept loop and per-connection framing

use std::sync::Arc;

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use shardcache::ShardedCache;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::handler::CommandHandler;
use crate::resp::Frame;

/// Accept connections forever, one task per client
pub async fn serve(listener: TcpListener, cache: Arc<ShardedCache<Bytes>>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let handler = CommandHandler::new(Arc::clone(&cache));

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, handler).await {
                        error!("Error handling client {}: {}", addr, e);
                    }
                    info!("Connection closed: {}", addr);
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn handle_client(mut stream: TcpStream, handler: CommandHandler) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut replies = BytesMut::with_capacity(4096);

    loop {
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }

        // Answer every complete command in the buffer with one write
        loop {
            match Frame::parse(&mut buffer) {
                Ok(Some(cmd)) => handler.handle(cmd).write_to(&mut replies),
                Ok(None) => break,
                Err(e) => {
                    warn!("Protocol error: {}", e);
                    Frame::error(format!("ERR Protocol error: {}", e)).write_to(&mut replies);
                    buffer.clear();
                    break;
                }
            }
        }

        if !replies.is_empty() {
            stream.write_all(&replies).await?;
            replies.clear();
        }
    }
}
