//! Console channel: one local conversation over stdin/stdout

use crate::base::{BaseChannel, ChannelError, ChannelHandler, Result};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use skiff_core::bus::{MessageBus, OutboundMessage};
use skiff_core::config::ConsoleConfig;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CONSOLE_CHANNEL: &str = "console";
pub const CONSOLE_CHAT_ID: &str = "local";
pub const CONSOLE_SENDER_ID: &str = "user";

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Console channel handler
pub struct ConsoleHandler {
    base: BaseChannel,
    /// Taken once by `start`; the lock keeps the handler `Sync`
    reader: SyncMutex<Option<Reader>>,
    writer: Writer,
    shutdown: Option<CancellationToken>,
    task_handle: Option<JoinHandle<()>>,
}

impl ConsoleHandler {
    /// Console bound to the process stdin/stdout
    pub fn new(config: &ConsoleConfig, bus: MessageBus) -> Self {
        Self::with_io(
            config,
            bus,
            Box::new(BufReader::new(tokio::io::stdin())),
            Box::new(tokio::io::stdout()),
        )
    }

    /// Console bound to arbitrary streams
    pub fn with_io(
        config: &ConsoleConfig,
        bus: MessageBus,
        reader: Reader,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Self {
            base: BaseChannel::new(CONSOLE_CHANNEL, config.allow_from.clone(), bus),
            reader: SyncMutex::new(Some(reader)),
            writer: Arc::new(Mutex::new(writer)),
            shutdown: None,
            task_handle: None,
        }
    }

    async fn read_loop(base: BaseChannel, reader: Reader, shutdown: CancellationToken) {
        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    let content = line.trim();
                    if content.is_empty() {
                        continue;
                    }
                    if let Err(e) = base
                        .handle_message(CONSOLE_SENDER_ID, CONSOLE_CHAT_ID, content, vec![], None)
                        .await
                    {
                        if matches!(e, ChannelError::Bus(_)) {
                            debug!("Console input stopped: {}", e);
                            break;
                        }
                        warn!("Failed to publish console input: {}", e);
                    }
                }
                Ok(None) => {
                    debug!("Console input reached end of stream");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ChannelHandler for ConsoleHandler {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn is_running(&self) -> bool {
        self.base.running
    }

    async fn start(&mut self) -> Result<()> {
        if self.base.running {
            return Ok(());
        }
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| ChannelError::Error("console input already consumed".to_string()))?;

        let shutdown = CancellationToken::new();
        self.shutdown = Some(shutdown.clone());
        let base = self.base.clone();
        self.task_handle = Some(tokio::spawn(Self::read_loop(base, reader, shutdown)));
        self.base.running = true;

        info!("Console channel started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.base.running {
            return Ok(());
        }
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                warn!("Console reader task ended abnormally: {}", e);
            }
        }
        self.base.running = false;
        info!("Console channel stopped");
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if !self.base.running {
            return Err(ChannelError::NotRunning(CONSOLE_CHANNEL.to_string()));
        }
        let mut writer = self.writer.lock().await;
        let line = format!("{}\n", message.content);
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.base.is_allowed(sender_id)
    }
}
