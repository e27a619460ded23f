//! Text console stand-in for the speech subsystem
//!
//! Speaks by writing lines and listens by reading lines, honouring the
//! configured no-input and complete timeouts. Runs as its own task and
//! talks to the dialogue machine only through channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AdapterConfig;
use crate::dialogue::DialogueInput;

use super::protocol::{AdapterEvent, Directive};

/// Errors raised by the console adapter
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("speech adapter is already running")]
    AlreadyRunning,

    #[error("console I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("dialogue input channel closed")]
    ChannelClosed,
}

/// Console turn-taking adapter
pub struct ConsoleAdapter {
    config: AdapterConfig,
    event_tx: mpsc::Sender<DialogueInput>,
    running: Arc<AtomicBool>,
}

impl ConsoleAdapter {
    /// Create a new console adapter that reports to `event_tx`
    pub fn new(config: AdapterConfig, event_tx: mpsc::Sender<DialogueInput>) -> Self {
        Self {
            config,
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start serving directives on stdin/stdout
    pub fn start(&self, directive_rx: mpsc::Receiver<Directive>) -> Result<JoinHandle<()>, AdapterError> {
        self.spawn(directive_rx, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }

    fn spawn<R, W>(
        &self,
        directive_rx: mpsc::Receiver<Directive>,
        reader: R,
        writer: W,
    ) -> Result<JoinHandle<()>, AdapterError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning);
        }

        let turns = TurnTaker {
            config: self.config.clone(),
            lines: reader.lines(),
            writer,
            event_tx: self.event_tx.clone(),
        };
        let running = Arc::clone(&self.running);

        Ok(tokio::spawn(async move {
            info!("speech adapter started");

            if let Err(e) = turns.run(directive_rx, Arc::clone(&running)).await {
                error!(?e, "speech adapter error");
            }

            running.store(false, Ordering::SeqCst);
            info!("speech adapter stopped");
        }))
    }

    /// Stop after the directive currently being served
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the adapter is currently running
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Serves directives one at a time
struct TurnTaker<R, W> {
    config: AdapterConfig,
    lines: Lines<R>,
    writer: W,
    event_tx: mpsc::Sender<DialogueInput>,
}

impl<R, W> TurnTaker<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn run(
        mut self,
        mut directive_rx: mpsc::Receiver<Directive>,
        running: Arc<AtomicBool>,
    ) -> Result<(), AdapterError> {
        while let Some(directive) = directive_rx.recv().await {
            if !running.load(Ordering::SeqCst) {
                break;
            }

            debug!(?directive, "serving directive");
            let open = match directive {
                Directive::Prepare => self.prepare().await?,
                Directive::Speak { utterance } => self.speak(&utterance).await?,
                Directive::Listen => self.listen().await?,
            };

            if !open {
                info!("console input closed");
                break;
            }
        }
        Ok(())
    }

    async fn prepare(&mut self) -> Result<bool, AdapterError> {
        info!(
            endpoint = ?self.config.endpoint,
            region = %self.config.region,
            has_credentials = self.config.credentials.is_some(),
            locale = %self.config.locale,
            voice = %self.config.voice,
            no_input_ms = self.config.no_input_timeout.as_millis() as u64,
            "console speech ready"
        );
        self.emit(AdapterEvent::Ready).await?;
        Ok(true)
    }

    async fn speak(&mut self, utterance: &str) -> Result<bool, AdapterError> {
        self.writer
            .write_all(format!("system: {}\n", utterance).as_bytes())
            .await?;
        self.writer.flush().await?;
        self.emit(AdapterEvent::SpeakComplete).await?;
        Ok(true)
    }

    /// Returns `false` once the input has reached end of file
    async fn listen(&mut self) -> Result<bool, AdapterError> {
        let line = match tokio::time::timeout(self.config.no_input_timeout, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => Some(line),
            Ok(Ok(None)) => return Ok(false),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                debug!("no input before timeout");
                None
            }
        };

        match line.as_deref().map(str::trim).filter(|line| !line.is_empty()) {
            Some(utterance) => self.emit(AdapterEvent::recognised(utterance, 1.0)).await?,
            None => self.emit(AdapterEvent::NoInput).await?,
        }

        if !self.config.complete_timeout.is_zero() {
            tokio::time::sleep(self.config.complete_timeout).await;
        }
        self.emit(AdapterEvent::ListenComplete).await?;
        Ok(true)
    }

    async fn emit(&mut self, event: AdapterEvent) -> Result<(), AdapterError> {
        debug!(%event, "adapter event");
        self.event_tx
            .send(DialogueInput::Adapter(event))
            .await
            .map_err(|_| {
                warn!("dialogue machine is gone");
                AdapterError::ChannelClosed
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;

    fn quick_config() -> AdapterConfig {
        AdapterConfig {
            no_input_timeout: Duration::from_millis(20),
            ..AdapterConfig::default()
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<DialogueInput>) -> Vec<AdapterEvent> {
        let mut events = Vec::new();
        while let Some(input) = rx.recv().await {
            match input {
                DialogueInput::Adapter(event) => events.push(event),
                other => panic!("unexpected input {other:?}"),
            }
        }
        events
    }

    #[test]
    fn test_adapter_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let adapter = ConsoleAdapter::new(AdapterConfig::default(), tx);
        assert!(!adapter.is_running());
    }

    #[tokio::test]
    async fn test_serves_prepare_speak_and_listen() {
        let (event_tx, mut event_rx) = mpsc::channel(32);
        let (directive_tx, directive_rx) = mpsc::channel(32);
        let adapter = ConsoleAdapter::new(quick_config(), event_tx);

        let reader = BufReader::new(Builder::new().read(b"  Vlad \n").build());
        let writer = Builder::new().write(b"system: Who are you meeting with?\n").build();
        let handle = adapter.spawn(directive_rx, reader, writer).unwrap();
        assert!(adapter.is_running());

        directive_tx.send(Directive::Prepare).await.unwrap();
        directive_tx.send(Directive::speak("Who are you meeting with?")).await.unwrap();
        directive_tx.send(Directive::Listen).await.unwrap();
        drop(directive_tx);
        handle.await.unwrap();
        drop(adapter);

        assert_eq!(
            drain(&mut event_rx).await,
            vec![
                AdapterEvent::Ready,
                AdapterEvent::SpeakComplete,
                AdapterEvent::recognised("Vlad", 1.0),
                AdapterEvent::ListenComplete,
            ]
        );
    }

    #[tokio::test]
    async fn test_spawns_with_send_only_io() {
        let (event_tx, mut event_rx) = mpsc::channel(32);
        let (directive_tx, directive_rx) = mpsc::channel(32);
        let adapter = ConsoleAdapter::new(quick_config(), event_tx);

        // Trait objects that are Send but not Sync
        let reader: Box<dyn AsyncBufRead + Send + Unpin> =
            Box::new(BufReader::new(Builder::new().read(b"monday\n").build()));
        let writer: Box<dyn AsyncWrite + Send + Unpin> =
            Box::new(Builder::new().write(b"system: On which day is your meeting?\n").build());
        let handle = adapter.spawn(directive_rx, reader, writer).unwrap();

        directive_tx.send(Directive::speak("On which day is your meeting?")).await.unwrap();
        directive_tx.send(Directive::Listen).await.unwrap();
        drop(directive_tx);
        handle.await.unwrap();
        drop(adapter);

        assert_eq!(
            drain(&mut event_rx).await,
            vec![
                AdapterEvent::SpeakComplete,
                AdapterEvent::recognised("monday", 1.0),
                AdapterEvent::ListenComplete,
            ]
        );
    }

    #[tokio::test]
    async fn test_silence_is_no_input() {
        let (event_tx, mut event_rx) = mpsc::channel(32);
        let (directive_tx, directive_rx) = mpsc::channel(32);
        let adapter = ConsoleAdapter::new(quick_config(), event_tx);

        // Keep the other end open so reads stay pending
        let (_keyboard, console) = tokio::io::duplex(64);
        let handle = adapter
            .spawn(directive_rx, BufReader::new(console), tokio::io::sink())
            .unwrap();

        directive_tx.send(Directive::Listen).await.unwrap();
        drop(directive_tx);
        handle.await.unwrap();
        drop(adapter);

        assert_eq!(
            drain(&mut event_rx).await,
            vec![AdapterEvent::NoInput, AdapterEvent::ListenComplete]
        );
    }

    #[tokio::test]
    async fn test_blank_line_is_no_input() {
        let (event_tx, mut event_rx) = mpsc::channel(32);
        let (directive_tx, directive_rx) = mpsc::channel(32);
        let adapter = ConsoleAdapter::new(quick_config(), event_tx);

        let reader = BufReader::new(Builder::new().read(b"   \n").build());
        let handle = adapter.spawn(directive_rx, reader, tokio::io::sink()).unwrap();

        directive_tx.send(Directive::Listen).await.unwrap();
        drop(directive_tx);
        handle.await.unwrap();
        drop(adapter);

        assert_eq!(
            drain(&mut event_rx).await,
            vec![AdapterEvent::NoInput, AdapterEvent::ListenComplete]
        );
    }

    #[tokio::test]
    async fn test_end_of_input_stops_adapter() {
        let (event_tx, mut event_rx) = mpsc::channel(32);
        let (directive_tx, directive_rx) = mpsc::channel(32);
        let adapter = ConsoleAdapter::new(quick_config(), event_tx);

        let reader = BufReader::new(Builder::new().build());
        let handle = adapter.spawn(directive_rx, reader, tokio::io::sink()).unwrap();

        directive_tx.send(Directive::Listen).await.unwrap();
        // The channel stays open; the adapter must stop on its own
        handle.await.unwrap();
        assert!(!adapter.is_running());
        drop(adapter);
        drop(directive_tx);

        assert!(drain(&mut event_rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (event_tx, _event_rx) = mpsc::channel(32);
        let (_directive_tx, directive_rx) = mpsc::channel(32);
        let (_other_tx, other_rx) = mpsc::channel(32);
        let adapter = ConsoleAdapter::new(quick_config(), event_tx);

        let (_keyboard, console) = tokio::io::duplex(64);
        let handle = adapter
            .spawn(directive_rx, BufReader::new(console), tokio::io::sink())
            .unwrap();

        let err = adapter
            .spawn(other_rx, BufReader::new(tokio::io::empty()), tokio::io::sink())
            .unwrap_err();
        assert!(matches!(err, AdapterError::AlreadyRunning));
        handle.abort();
    }

    #[tokio::test]
    async fn test_closed_machine_channel_is_an_error() {
        let (event_tx, event_rx) = mpsc::channel(32);
        drop(event_rx);

        let mut turns = TurnTaker {
            config: quick_config(),
            lines: BufReader::new(tokio::io::empty()).lines(),
            writer: tokio::io::sink(),
            event_tx,
        };
        let err = turns.prepare().await.unwrap_err();
        assert!(matches!(err, AdapterError::ChannelClosed));
    }
}
