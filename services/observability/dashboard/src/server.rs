//! Dashboard HTTP/WebSocket server
//!
//! Routes:
//! - `GET /ws` (alias `/stream`): WebSocket push stream. Clients may send
//!   `{"command": "panic" | "resume" | "reset"}` and get a `CONTROL` reply.
//! - `GET /health`, `GET /status`
//! - `POST /panic`, `POST /resume`, `POST /reset`: `200` when the command
//!   changed state, `409` when it was a no-op or could not be delivered.

use crate::client::{Client, ClientManager};
use crate::config::DashboardConfig;
use crate::control::{ClientCommand, ControlReply, ControlSurface};
use crate::error::Result;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::ws::{Message, WebSocket};
use warp::Filter;

pub struct DashboardServer {
    config: DashboardConfig,
    client_manager: Arc<ClientManager>,
    control: Arc<dyn ControlSurface>,
}

impl DashboardServer {
    pub fn new(config: DashboardConfig, control: Arc<dyn ControlSurface>) -> Self {
        let client_manager = Arc::new(ClientManager::new(config.max_connections));

        Self {
            config,
            client_manager,
            control,
        }
    }

    /// Shared handle used to publish messages to every connected client
    pub fn client_manager(&self) -> Arc<ClientManager> {
        self.client_manager.clone()
    }

    /// Bind the listener. The returned future serves until dropped.
    pub fn bind(&self) -> Result<(SocketAddr, BoxFuture<'static, ()>)> {
        let addr = self.config.socket_addr()?;

        if self.config.enable_cors {
            let cors = warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST"]);
            let (bound, server) =
                warp::serve(self.routes().with(cors)).try_bind_ephemeral(addr)?;
            Ok((bound, Box::pin(server)))
        } else {
            let (bound, server) = warp::serve(self.routes()).try_bind_ephemeral(addr)?;
            Ok((bound, Box::pin(server)))
        }
    }

    /// Serve until the listener stops
    pub async fn run(&self) -> Result<()> {
        let (addr, server) = self.bind()?;
        info!("Dashboard server listening on {}", addr);

        let heartbeat = self.start_heartbeat_task();
        server.await;

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        Ok(())
    }

    pub(crate) fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone + Send + Sync + 'static
    {
        let client_manager = self.client_manager.clone();
        let control = self.control.clone();
        let with_clients = warp::any().map(move || client_manager.clone());
        let with_control = warp::any().map(move || control.clone());

        let ws_handler = |ws: warp::ws::Ws,
                          client_manager: Arc<ClientManager>,
                          control: Arc<dyn ControlSurface>| {
            ws.on_upgrade(move |socket| handle_websocket(client_manager, control, socket))
        };
        let ws_route = warp::path("ws")
            .and(warp::path::end())
            .and(warp::ws())
            .and(with_clients.clone())
            .and(with_control.clone())
            .map(ws_handler);
        let stream_route = warp::path("stream")
            .and(warp::path::end())
            .and(warp::ws())
            .and(with_clients.clone())
            .and(with_control.clone())
            .map(ws_handler);

        let health_route = warp::path("health")
            .and(warp::get())
            .map(|| warp::reply::with_status("OK", StatusCode::OK));

        let status_route = warp::path("status")
            .and(warp::get())
            .and(with_clients)
            .and(with_control.clone())
            .then(
                |client_manager: Arc<ClientManager>, control: Arc<dyn ControlSurface>| async move {
                    warp::reply::json(&serde_json::json!({
                        "status": "running",
                        "service": "signal-dashboard",
                        "version": env!("CARGO_PKG_VERSION"),
                        "clients": client_manager.client_count().await,
                        "engine": control.status().await,
                    }))
                },
            );

        let control_route = warp::post()
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(with_control)
            .and_then(|command: String, control: Arc<dyn ControlSurface>| async move {
                let command = match command.as_str() {
                    "panic" => ClientCommand::Panic,
                    "resume" => ClientCommand::Resume,
                    "reset" => ClientCommand::Reset,
                    _ => return Err(warp::reject::not_found()),
                };
                info!("Control command over HTTP: {:?}", command);
                Ok(control_response(command.apply(control.as_ref()).await))
            });

        ws_route
            .or(stream_route)
            .or(health_route)
            .or(status_route)
            .or(control_route)
    }

    fn start_heartbeat_task(&self) -> Option<JoinHandle<()>> {
        let period = self.config.heartbeat_interval()?;
        let client_manager = self.client_manager.clone();

        Some(tokio::spawn(async move {
            let mut interval = interval(period);

            loop {
                interval.tick().await;

                let client_count = client_manager.client_count().await;
                let heartbeat = serde_json::json!({
                    "type": "HEARTBEAT",
                    "data": { "clients": client_count },
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                });
                client_manager.broadcast(heartbeat).await;
                tracing::debug!("Sent heartbeat to {} clients", client_count);
            }
        }))
    }
}

fn control_response(reply: ControlReply) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = if reply.ok {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    warp::reply::with_status(warp::reply::json(&reply), status)
}

async fn handle_websocket(
    client_manager: Arc<ClientManager>,
    control: Arc<dyn ControlSurface>,
    ws: WebSocket,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let client = Client::new(tx);
    let client_id = client.id;

    if let Err(e) = client_manager.add_client(client).await {
        warn!("Rejected WebSocket connection: {}", e);
        return;
    }

    let (mut ws_sender, mut ws_receiver) = ws.split();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(message) = msg else {
                    info!("Message channel closed for client {}", client_id);
                    break;
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::text(text)).await {
                    warn!("Failed to send message to client {}: {}", client_id, e);
                    break;
                }
            }

            ws_msg = ws_receiver.next() => match ws_msg {
                Some(Ok(msg)) if msg.is_text() => {
                    let text = msg.to_str().unwrap_or("");
                    match serde_json::from_str::<ClientCommand>(text) {
                        Ok(command) => {
                            info!("Control command from client {}: {:?}", client_id, command);
                            let reply = command.apply(control.as_ref()).await;
                            let message = serde_json::json!({
                                "type": "CONTROL",
                                "data": reply,
                                "timestamp": chrono::Utc::now().to_rfc3339(),
                            });
                            if let Err(e) = client_manager.send_to(client_id, message).await {
                                warn!("Failed to reply to client {}: {}", client_id, e);
                            }
                        }
                        Err(e) => warn!("Ignoring message from client {}: {}", client_id, e),
                    }
                }
                Some(Ok(msg)) if msg.is_close() => {
                    info!("Client {} disconnected", client_id);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error for client {}: {}", client_id, e);
                    break;
                }
                None => {
                    info!("WebSocket stream closed for client {}", client_id);
                    break;
                }
            }
        }
    }

    client_manager.remove_client(client_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct PauseFlag {
        paused: AtomicBool,
    }

    impl PauseFlag {
        fn reply(&self, ok: bool, message: &str) -> ControlReply {
            ControlReply {
                ok,
                message: message.to_string(),
                state: serde_json::json!({ "is_paused": self.paused.load(Ordering::SeqCst) }),
            }
        }
    }

    #[async_trait]
    impl ControlSurface for PauseFlag {
        async fn panic(&self) -> ControlReply {
            let was_paused = self.paused.swap(true, Ordering::SeqCst);
            self.reply(!was_paused, "panic")
        }

        async fn resume(&self) -> ControlReply {
            let was_paused = self.paused.swap(false, Ordering::SeqCst);
            self.reply(was_paused, "resume")
        }

        async fn reset(&self) -> ControlReply {
            self.paused.store(false, Ordering::SeqCst);
            self.reply(true, "reset")
        }

        async fn status(&self) -> serde_json::Value {
            serde_json::json!({ "is_paused": self.paused.load(Ordering::SeqCst) })
        }
    }

    fn server() -> DashboardServer {
        DashboardServer::new(DashboardConfig::default(), Arc::new(PauseFlag::default()))
    }

    #[tokio::test]
    async fn test_panic_then_conflict() {
        let routes = server().routes();

        let res = warp::test::request()
            .method("POST")
            .path("/panic")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: ControlReply = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.state["is_paused"], true);

        let res = warp::test::request()
            .method("POST")
            .path("/panic")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = warp::test::request()
            .method("POST")
            .path("/resume")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_command_is_not_found() {
        let routes = server().routes();
        let res = warp::test::request()
            .method("POST")
            .path("/liquidate")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_includes_engine_state() {
        let routes = server().routes();
        let res = warp::test::request().path("/status").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "running");
        assert_eq!(body["engine"]["is_paused"], false);
    }

    #[tokio::test]
    async fn test_websocket_push_and_command() {
        let server = server();
        let clients = server.client_manager();
        let routes = server.routes();

        let mut ws = warp::test::ws()
            .path("/ws")
            .handshake(routes)
            .await
            .unwrap();

        ws.send_text(r#"{"command":"panic"}"#).await;
        let reply: serde_json::Value =
            serde_json::from_str(ws.recv().await.unwrap().to_str().unwrap()).unwrap();
        assert_eq!(reply["type"], "CONTROL");
        assert_eq!(reply["data"]["ok"], true);

        clients
            .broadcast(serde_json::json!({"type": "LOG", "data": {"message": "hi"}}))
            .await;
        let pushed: serde_json::Value =
            serde_json::from_str(ws.recv().await.unwrap().to_str().unwrap()).unwrap();
        assert_eq!(pushed["data"]["message"], "hi");
    }
}
