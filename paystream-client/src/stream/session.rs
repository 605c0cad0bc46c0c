//! One persistent event connection and its authorization lifecycle.
//!
//! The read loop is the only owner of the socket, the current token and the
//! connection state. Renewals run as a spawned task so inbound events keep
//! flowing; at most one renewal is outstanding at a time, and its result is
//! reported back to the loop over a channel and applied there.

use futures_util::{SinkExt, StreamExt};
use paystream_types::{ClientMessage, LifecycleEvent, OutputOptions, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::dispatcher::{EventDispatcher, EventSink};
use super::events::{classify, Classified};
use super::negotiator::SessionDescriptor;
use super::renewal::{AuthToken, RenewalError, RenewalOutcome, RenewalStrategy};
use crate::config::{mask, Config, RenewalMethod, WatchlistConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    Connecting,
    Configuring,
    Streaming,
    RenewingHttp,
    RenewingInband,
    Closed,
}

#[derive(Debug)]
pub enum TransportError {
    Connect(String),
    Socket(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "Failed to connect event stream: {}", e),
            TransportError::Socket(e) => write!(f, "Event stream error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub messages: u64,
    pub events: BTreeMap<&'static str, u64>,
    pub unrecognized: u64,
    pub renewals_started: u64,
    pub renewals_succeeded: u64,
    pub renewals_failed: u64,
    /// Renewal triggers dropped because one was already in progress
    pub renewals_skipped: u64,
    pub empty_watchlist: bool,
}

struct RenewalReport {
    generation: u64,
    result: Result<RenewalOutcome, RenewalError>,
}

struct InFlightRenewal {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct SessionConnection {
    descriptor: SessionDescriptor,
    options: OutputOptions,
    watchlist: WatchlistConfig,
    renew_backoff: Duration,
    strategy: Arc<dyn RenewalStrategy>,
    dispatcher: EventDispatcher,
    cancel: CancellationToken,
    state: SessionState,
    token: AuthToken,
    /// Bumped each time a new token takes effect
    generation: u64,
    renewal: Option<InFlightRenewal>,
    /// `renew_inband` sent, `renewed` not yet seen
    awaiting_confirmation: bool,
    /// `expiresAt` of the reminder that started the latest renewal
    trigger_expiry: Option<Timestamp>,
    stats: SessionStats,
}

impl SessionConnection {
    pub fn new(
        config: &Config,
        descriptor: SessionDescriptor,
        strategy: Arc<dyn RenewalStrategy>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let token = AuthToken::unannounced(&descriptor.token);
        Self {
            descriptor,
            options: config.output_options.clone(),
            watchlist: config.watchlist.clone(),
            renew_backoff: config.renew_backoff,
            strategy,
            dispatcher: EventDispatcher::new(config.output_mode, sink),
            cancel: CancellationToken::new(),
            state: SessionState::Connecting,
            token,
            generation: 0,
            renewal: None,
            awaiting_confirmation: false,
            trigger_expiry: None,
            stats: SessionStats::default(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Connect, configure, and stream until the server closes, the socket
    /// fails, or the cancellation token fires. The session is closed afterwards.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        self.state = SessionState::Connecting;
        log::info!(
            "[SESSION] Connecting to stream '{}' (token {})",
            self.descriptor.stream_id,
            mask(&self.descriptor.token)
        );

        let mut ws = match connect_async(self.descriptor.endpoint_url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(TransportError::Connect(e.to_string()));
            }
        };

        let result = self.stream(&mut ws).await;
        self.close();

        log::info!(
            "[SESSION] Closed after {} messages ({} unrecognized), renewals ok={} failed={} skipped={}",
            self.stats.messages,
            self.stats.unrecognized,
            self.stats.renewals_succeeded,
            self.stats.renewals_failed,
            self.stats.renewals_skipped
        );
        result
    }

    async fn stream(&mut self, ws: &mut WsStream) -> Result<(), TransportError> {
        self.state = SessionState::Configuring;
        let (messages, empty_watchlist) = configuration_messages(&self.options, &self.watchlist);
        if empty_watchlist {
            self.stats.empty_watchlist = true;
            log::warn!(
                "[SESSION] No accounts or programs configured; some streams require a watchlist"
            );
        }
        self.state = SessionState::Streaming;
        for message in &messages {
            send_message(ws, message).await?;
        }

        let (report_tx, mut report_rx) = mpsc::channel::<RenewalReport>(1);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[SESSION] Cancelled, closing connection");
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                Some(report) = report_rx.recv() => {
                    self.finish_renewal(report, ws).await?;
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(text.as_bytes(), &report_tx);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.handle_frame(&bytes, &report_tx);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        ws.send(Message::Pong(payload))
                            .await
                            .map_err(|e| TransportError::Socket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("[SESSION] Server closed the connection: {:?}", frame);
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(TransportError::Socket(e.to_string())),
                    None => {
                        log::info!("[SESSION] Event stream ended");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn handle_frame(&mut self, raw: &[u8], report_tx: &mpsc::Sender<RenewalReport>) {
        self.stats.messages += 1;
        let event = match classify(raw) {
            Classified::Event(event) => event,
            Classified::Unrecognized(reason) => {
                self.stats.unrecognized += 1;
                log::debug!("[EVENT] Dropping unrecognized message: {}", reason);
                return;
            }
        };
        *self.stats.events.entry(event.kind()).or_insert(0) += 1;

        if let Some(lifecycle) = self.dispatcher.dispatch(event) {
            self.handle_lifecycle(lifecycle, report_tx);
        }
    }

    fn handle_lifecycle(&mut self, event: LifecycleEvent, report_tx: &mpsc::Sender<RenewalReport>) {
        match &event {
            LifecycleEvent::Hello {
                client_id,
                expires_at,
                slice_seconds,
            } => {
                log::info!(
                    "[SESSION] Connected as {} (token expires {}, slice {}s)",
                    client_id,
                    expires_at,
                    slice_seconds
                );
                self.token.expires_at = Some(expires_at.clone());
                self.token.slice_seconds = Some(*slice_seconds);
            }
            LifecycleEvent::RenewalReminder {
                ms_until_expiry, ..
            } => {
                log::info!("[SESSION] Token expires in {}ms, renewing", ms_until_expiry);
            }
            LifecycleEvent::PaymentRequired { reason, .. } => {
                log::warn!("[SESSION] Server requires payment ({}), renewing", reason);
            }
            LifecycleEvent::Renewed { expires_at, method } => {
                log::info!("[SESSION] Renewed via {} until {}", method, expires_at);
                self.token.expires_at = Some(expires_at.clone());
                if self.awaiting_confirmation {
                    self.awaiting_confirmation = false;
                    self.generation += 1;
                    self.stats.renewals_succeeded += 1;
                    self.state = SessionState::Streaming;
                }
            }
            LifecycleEvent::Error { message } => {
                log::warn!("[SESSION] Server error: {}", message);
                if self.awaiting_confirmation {
                    self.abandon_confirmation();
                }
            }
        }

        if event.requests_renewal() {
            self.start_renewal(&event, report_tx);
        }
    }

    /// Give up on the outstanding `renew_inband`; it counts as a failed renewal.
    fn abandon_confirmation(&mut self) {
        self.awaiting_confirmation = false;
        self.stats.renewals_failed += 1;
        if self.renewal.is_none() {
            self.state = SessionState::Streaming;
        }
    }

    /// Start a renewal unless one is already outstanding.
    ///
    /// While an in-band payment awaits confirmation, only a repeat reminder
    /// for the same expiry is ignored. A reminder for a later slice, or an
    /// expiry notice, means the confirmation was lost and renewal starts over.
    fn start_renewal(&mut self, trigger: &LifecycleEvent, report_tx: &mpsc::Sender<RenewalReport>) {
        let trigger_expiry = match trigger {
            LifecycleEvent::RenewalReminder { expires_at, .. } => Some(expires_at.clone()),
            _ => None,
        };

        if self.renewal.is_some() {
            self.stats.renewals_skipped += 1;
            log::debug!(
                "[RENEW] Renewal already in progress, ignoring {}",
                trigger.op()
            );
            return;
        }
        if self.awaiting_confirmation {
            if trigger_expiry.is_some() && trigger_expiry == self.trigger_expiry {
                self.stats.renewals_skipped += 1;
                log::debug!("[RENEW] In-band payment for this slice already sent, ignoring reminder");
                return;
            }
            log::warn!("[RENEW] No confirmation for the last in-band payment, paying again");
            self.abandon_confirmation();
        }
        self.trigger_expiry = trigger_expiry;

        let strategy = self.strategy.clone();
        let old_token = self.token.token.clone();
        let backoff = self.renew_backoff;
        let generation = self.generation;
        let report_tx = report_tx.clone();

        let handle = tokio::spawn(async move {
            let result = strategy.renew(&old_token).await;
            if let Err(e) = &result {
                log::warn!("[RENEW] {}; retrying on next reminder after {:?}", e, backoff);
                tokio::time::sleep(backoff).await;
            }
            // receiver gone means the session closed; the result is dropped
            let _ = report_tx.send(RenewalReport { generation, result }).await;
        });

        self.stats.renewals_started += 1;
        self.renewal = Some(InFlightRenewal { generation, handle });
        self.state = match self.strategy.method() {
            RenewalMethod::Http => SessionState::RenewingHttp,
            RenewalMethod::Inband => SessionState::RenewingInband,
        };
    }

    async fn finish_renewal(
        &mut self,
        report: RenewalReport,
        ws: &mut WsStream,
    ) -> Result<(), TransportError> {
        self.renewal = None;
        if self.state == SessionState::Closed || report.generation != self.generation {
            log::debug!("[RENEW] Discarding stale renewal result");
            return Ok(());
        }

        match report.result {
            Ok(RenewalOutcome::Token(token)) => {
                send_message(
                    ws,
                    &ClientMessage::RenewToken {
                        token: token.token.clone(),
                    },
                )
                .await?;
                log::info!(
                    "[RENEW] Pushed new token {} (slice {}s)",
                    mask(&token.token),
                    token
                        .slice_seconds
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "?".to_string())
                );
                self.token = token;
                self.generation += 1;
                self.stats.renewals_succeeded += 1;
                self.state = SessionState::Streaming;
            }
            Ok(RenewalOutcome::Inband {
                requirement,
                payload,
            }) => {
                send_message(
                    ws,
                    &ClientMessage::RenewInband {
                        payment_requirements: requirement,
                        payment_payload: payload,
                    },
                )
                .await?;
                log::info!("[RENEW] Sent in-band payment, awaiting confirmation");
                self.awaiting_confirmation = true;
                self.state = SessionState::RenewingInband;
            }
            Err(_) => {
                // already logged by the renewal task
                self.stats.renewals_failed += 1;
                self.state = SessionState::Streaming;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            log::debug!(
                "[RENEW] Aborting renewal for generation {}",
                renewal.generation
            );
            renewal.handle.abort();
        }
        self.awaiting_confirmation = false;
        self.state = SessionState::Closed;
    }
}

/// Messages sent on entering `Streaming`, in order, and whether the watchlist is empty.
pub fn configuration_messages(
    options: &OutputOptions,
    watchlist: &WatchlistConfig,
) -> (Vec<ClientMessage>, bool) {
    let mut messages = vec![ClientMessage::SetOptions(options.clone())];
    if !watchlist.accounts.is_empty() {
        messages.push(ClientMessage::SetAccounts {
            accounts: watchlist.accounts.clone(),
        });
    }
    if !watchlist.programs.is_empty() {
        messages.push(ClientMessage::SetPrograms {
            programs: watchlist.programs.clone(),
        });
    }
    messages.push(ClientMessage::GetState);
    (messages, watchlist.is_empty())
}

async fn send_message(ws: &mut WsStream, message: &ClientMessage) -> Result<(), TransportError> {
    let json = serde_json::to_string(message)
        .map_err(|e| TransportError::Socket(format!("Failed to encode {}: {}", message.op(), e)))?;
    log::debug!("[SESSION] -> {}", message.op());
    ws.send(Message::Text(json))
        .await
        .map_err(|e| TransportError::Socket(e.to_string()))
}
