//! Shared fixtures for unit tests: local HTTP/socket servers and a real signer.

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::stream::{Output, EventSink};
use crate::wallet::EnvWalletProvider;
use crate::x402::{PaymentSigner, X402Client, X402Signer};

pub const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn test_signer() -> Arc<dyn PaymentSigner> {
    Arc::new(X402Signer::new(Arc::new(
        EnvWalletProvider::from_private_key(HARDHAT_KEY).unwrap(),
    )))
}

pub fn test_client() -> Arc<X402Client> {
    Arc::new(X402Client::new(test_signer(), None).unwrap())
}

pub fn payment_requirement() -> Value {
    json!({
        "scheme": "exact",
        "network": "base-sepolia",
        "maxAmountRequired": "10000",
        "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
        "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        "maxTimeoutSeconds": 60,
        "resource": "stream",
        "extra": {"name": "USDC", "version": "2", "decimals": 6}
    })
}

pub fn payment_required_body() -> Value {
    json!({
        "x402Version": 2,
        "error": "payment required",
        "accepts": [payment_requirement()]
    })
}

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn spawn_http(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Accept exactly one socket connection and hand it to `script`.
/// Returns the `ws://` URL (with token) and the script's join handle.
pub async fn spawn_ws<F, Fut, T>(script: F) -> (String, tokio::task::JoinHandle<T>)
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = T> + Send,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = accept_async(stream).await.unwrap();
        script(socket).await
    });
    (format!("ws://{}/ws?t=tok-0", addr), handle)
}

/// Next text frame as JSON, skipping control frames.
pub async fn recv_json(socket: &mut ServerSocket) -> Value {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended while waiting for a message: {:?}", other),
        }
    }
}

/// Like `recv_json`, but `None` if nothing arrives within `wait`.
pub async fn try_recv_json(socket: &mut ServerSocket, wait: Duration) -> Option<Value> {
    match tokio::time::timeout(wait, recv_json(socket)).await {
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

/// Read the connect-time configuration burst (ends with getState).
pub async fn recv_configuration(socket: &mut ServerSocket) -> Vec<Value> {
    let mut messages = Vec::new();
    loop {
        let message = recv_json(socket).await;
        let done = message["op"] == "getState";
        messages.push(message);
        if done {
            return messages;
        }
    }
}

pub async fn send_json(socket: &mut ServerSocket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

/// Sink that records everything it is handed.
#[derive(Clone, Default)]
pub struct CollectingSink {
    pub outputs: Arc<Mutex<Vec<Output>>>,
}

impl CollectingSink {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.outputs.lock().unwrap().iter().map(|o| o.kind()).collect()
    }
}

impl EventSink for CollectingSink {
    fn handle(&mut self, output: &Output) {
        self.outputs.lock().unwrap().push(output.clone());
    }
}
