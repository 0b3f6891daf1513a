//! HTTP long-poll client transport.
//!
//! `connecting → open → closed`: CONNECT yields the identifier and opens the
//! connection, each send is one SEND round trip, and a background loop keeps
//! exactly one POLLING request in flight until the connection closes.

use url::Url;

use super::ClientEvent;
use crate::{
    context::{ReadyState, SharedReadyState},
    envelope::Ack,
    error::ClientError,
    handler::CloseEvent,
    http_client::{HttpClient, HttpMethod, HttpResponse},
    message::Message,
    multipart,
    server::RequestType,
    CONN_ID_HEADER, TYPE_HEADER,
};

/// Close reason reported when the server no longer knows the connection.
pub const SERVER_CLOSED_REASON: &str = "closed by server";

/// Outbound half of a polling connection.
#[derive(Debug)]
pub struct LongPollTransport<H> {
    http: H,
    url: String,
    conn_id: String,
    state: SharedReadyState,
    events: async_channel::Sender<ClientEvent>,
}

/// Run CONNECT and start the receive loop.
pub(crate) async fn connect<H: HttpClient>(
    http: H,
    url: &Url,
    state: SharedReadyState,
    events: async_channel::Sender<ClientEvent>,
) -> Result<LongPollTransport<H>, ClientError> {
    let url = url.to_string();
    let resp = http
        .request(
            HttpMethod::Get,
            &url,
            &[(TYPE_HEADER, RequestType::Connect.as_str())],
            Vec::new(),
        )
        .await
        .map_err(|e| ClientError::Request(e.to_string()))?;

    if resp.status != 200 {
        return Err(unexpected(&resp));
    }

    let ack: Ack = serde_json::from_slice(&resp.body)
        .map_err(|e| ClientError::ConnectDecode(e.to_string()))?;
    let conn_id = ack
        .conn_id
        .filter(|_| ack.success)
        .ok_or_else(|| ClientError::ConnectDecode("response has no connId".into()))?;

    tracing::info!(%conn_id, "long-poll connected to {url}");
    state.set(ReadyState::Open);

    tokio::spawn(receive_loop(
        http.clone(),
        url.clone(),
        conn_id.clone(),
        state.clone(),
        events.clone(),
    ));

    Ok(LongPollTransport {
        http,
        url,
        conn_id,
        state,
        events,
    })
}

impl<H: HttpClient> LongPollTransport<H> {
    pub(crate) async fn send(&self, message: Message) -> Result<(), ClientError> {
        let (content_type, body) = match message {
            Message::Text(text) => ("text/plain", text.into_bytes()),
            Message::Binary(bytes) => ("application/octet-stream", bytes.to_vec()),
        };

        let resp = self
            .http
            .request(
                HttpMethod::Post,
                &self.url,
                &[
                    (TYPE_HEADER, RequestType::Send.as_str()),
                    (CONN_ID_HEADER, &self.conn_id),
                    ("content-type", content_type),
                ],
                body,
            )
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        match resp.status {
            200 => Ok(()),
            400 if is_closed_ack(&resp) => {
                finish(
                    &self.state,
                    &self.events,
                    None,
                    CloseEvent::new(None, SERVER_CLOSED_REASON),
                )
                .await;
                Err(ClientError::Closed)
            }
            _ => Err(unexpected(&resp)),
        }
    }

    pub(crate) async fn close(&self) {
        finish(&self.state, &self.events, None, CloseEvent::new(Some(1000), "")).await;
    }
}

async fn receive_loop<H: HttpClient>(
    http: H,
    url: String,
    conn_id: String,
    state: SharedReadyState,
    events: async_channel::Sender<ClientEvent>,
) {
    tracing::debug!(%conn_id, "starting poll loop");

    while state.get() == ReadyState::Open && !events.is_closed() {
        match poll_once(&http, &url, &conn_id).await {
            Ok(batch) => {
                if state.get() != ReadyState::Open {
                    break;
                }
                if !batch.is_empty() {
                    tracing::debug!(%conn_id, count = batch.len(), "poll received messages");
                }
                for message in batch {
                    if events.send(ClientEvent::Message(message)).await.is_err() {
                        break;
                    }
                }
            }
            Err(ClientError::Closed) => {
                tracing::info!(%conn_id, "server reports connection closed");
                finish(&state, &events, None, CloseEvent::new(None, SERVER_CLOSED_REASON)).await;
            }
            Err(e) => {
                tracing::error!(%conn_id, "poll failed: {e}");
                finish(&state, &events, Some(e), CloseEvent::new(Some(1006), "")).await;
            }
        }
    }

    tracing::debug!(%conn_id, "poll loop exited");
}

async fn poll_once<H: HttpClient>(
    http: &H,
    url: &str,
    conn_id: &str,
) -> Result<Vec<Message>, ClientError> {
    let resp = http
        .request(
            HttpMethod::Get,
            url,
            &[
                (TYPE_HEADER, RequestType::Polling.as_str()),
                (CONN_ID_HEADER, conn_id),
            ],
            Vec::new(),
        )
        .await
        .map_err(|e| ClientError::Request(e.to_string()))?;

    match resp.status {
        200 => {
            let content_type = resp.header("content-type").unwrap_or_default().to_owned();
            Ok(multipart::decode(&content_type, resp.body.into()).await?)
        }
        400 if is_closed_ack(&resp) => Err(ClientError::Closed),
        _ => Err(unexpected(&resp)),
    }
}

/// Mark the connection closed and report it, once.
async fn finish(
    state: &SharedReadyState,
    events: &async_channel::Sender<ClientEvent>,
    error: Option<ClientError>,
    event: CloseEvent,
) {
    if !state.finish_close() {
        return;
    }

    if let Some(e) = error {
        let _ = events.send(ClientEvent::Error(e)).await;
    }
    let _ = events.send(ClientEvent::Close(event)).await;
    events.close();
}

fn is_closed_ack(resp: &HttpResponse) -> bool {
    serde_json::from_slice::<Ack>(&resp.body).is_ok_and(|ack| ack.is_closed())
}

fn unexpected(resp: &HttpResponse) -> ClientError {
    ClientError::UnexpectedStatus {
        status: resp.status,
        body: String::from_utf8_lossy(&resp.body).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_lock::Mutex;
    use futures::{future::BoxFuture, FutureExt};
    use std::{
        collections::{HashMap, VecDeque},
        sync::Arc,
    };
    use testresult::TestResult;

    #[derive(Debug, thiserror::Error)]
    #[error("scripted failure")]
    struct ScriptedError;

    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        method: HttpMethod,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    type Script = HashMap<&'static str, VecDeque<Result<HttpResponse, ScriptedError>>>;

    /// Replays canned responses per request type; once a type runs out,
    /// further requests of that type stall.
    #[derive(Clone, Default)]
    struct Scripted {
        responses: Arc<Mutex<Script>>,
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl Scripted {
        async fn push(&self, kind: RequestType, status: u16, content_type: &str, body: &[u8]) {
            self.responses
                .lock()
                .await
                .entry(kind.as_str())
                .or_default()
                .push_back(Ok(HttpResponse {
                    status,
                    body: body.to_vec(),
                    headers: vec![("content-type".into(), content_type.into())],
                }));
        }

        async fn push_error(&self, kind: RequestType) {
            self.responses
                .lock()
                .await
                .entry(kind.as_str())
                .or_default()
                .push_back(Err(ScriptedError));
        }
    }

    impl HttpClient for Scripted {
        type Error = ScriptedError;

        fn request(
            &self,
            method: HttpMethod,
            _url: &str,
            headers: &[(&str, &str)],
            body: Vec<u8>,
        ) -> BoxFuture<'_, Result<HttpResponse, Self::Error>> {
            let headers: Vec<(String, String)> = headers
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            let kind = headers
                .iter()
                .find(|(k, _)| k == TYPE_HEADER)
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            async move {
                self.seen.lock().await.push(Seen {
                    method,
                    headers,
                    body,
                });
                let next = self
                    .responses
                    .lock()
                    .await
                    .get_mut(kind.as_str())
                    .and_then(VecDeque::pop_front);
                match next {
                    Some(resp) => resp,
                    None => futures::future::pending().await,
                }
            }
            .boxed()
        }
    }

    fn header<'a>(seen: &'a Seen, name: &str) -> Option<&'a str> {
        seen.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    struct Connected {
        transport: LongPollTransport<Scripted>,
        state: SharedReadyState,
        events: async_channel::Receiver<ClientEvent>,
    }

    async fn connected(http: &Scripted) -> Result<Connected, ClientError> {
        http.push(
            RequestType::Connect,
            200,
            "application/json",
            br#"{"success":true,"connId":"abc"}"#,
        )
        .await;
        let state = SharedReadyState::new(ReadyState::Connecting);
        let (tx, events) = async_channel::unbounded();
        let url = Url::parse("http://localhost/su")
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let transport = connect(http.clone(), &url, state.clone(), tx).await?;
        Ok(Connected {
            transport,
            state,
            events,
        })
    }

    #[tokio::test]
    async fn connect_opens_and_polls_with_id() -> TestResult {
        let http = Scripted::default();
        let batch = multipart::encode(&[
            Message::Text("a".into()),
            Message::Binary(vec![1u8, 2].into()),
        ]);
        http.push(RequestType::Polling, 200, &batch.content_type, &batch.body)
            .await;

        let conn = connected(&http).await?;
        assert_eq!(conn.state.get(), ReadyState::Open);

        let Ok(ClientEvent::Message(first)) = conn.events.recv().await else {
            return Err("expected a message".into());
        };
        let Ok(ClientEvent::Message(second)) = conn.events.recv().await else {
            return Err("expected a message".into());
        };
        assert_eq!(first, Message::Text("a".into()));
        assert_eq!(second, Message::Binary(vec![1u8, 2].into()));

        let seen = http.seen.lock().await.clone();
        assert_eq!(header(&seen[0], TYPE_HEADER), Some("CONNECT"));
        assert_eq!(seen[0].method, HttpMethod::Get);
        assert_eq!(header(&seen[1], TYPE_HEADER), Some("POLLING"));
        assert_eq!(header(&seen[1], CONN_ID_HEADER), Some("abc"));
        Ok(())
    }

    #[tokio::test]
    async fn send_marks_text_and_binary() -> TestResult {
        let http = Scripted::default();
        let conn = connected(&http).await?;

        http.push(RequestType::Send, 200, "application/json", br#"{"success":true}"#)
            .await;
        http.push(RequestType::Send, 200, "application/json", br#"{"success":true}"#)
            .await;
        conn.transport.send(Message::Text("hi".into())).await?;
        conn.transport.send(Message::Binary(vec![9u8].into())).await?;

        let seen = http.seen.lock().await.clone();
        let sends: Vec<&Seen> = seen
            .iter()
            .filter(|s| header(s, TYPE_HEADER) == Some("SEND"))
            .collect();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].method, HttpMethod::Post);
        assert_eq!(header(sends[0], CONN_ID_HEADER), Some("abc"));
        assert_eq!(header(sends[0], "content-type"), Some("text/plain"));
        assert_eq!(sends[0].body, b"hi".to_vec());
        assert_eq!(header(sends[1], "content-type"), Some("application/octet-stream"));
        assert_eq!(sends[1].body, vec![9u8]);
        Ok(())
    }

    #[tokio::test]
    async fn send_to_closed_connection_reports_close() -> TestResult {
        let http = Scripted::default();
        let conn = connected(&http).await?;

        http.push(
            RequestType::Send,
            400,
            "application/json",
            br#"{"success":false,"closed":true}"#,
        )
        .await;
        let result = conn.transport.send(Message::Text("late".into())).await;

        assert!(matches!(result, Err(ClientError::Closed)));
        assert_eq!(conn.state.get(), ReadyState::Closed);
        assert!(matches!(
            conn.events.recv().await,
            Ok(ClientEvent::Close(CloseEvent { code: None, .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn closed_poll_ends_with_close_event() -> TestResult {
        let http = Scripted::default();
        http.push(
            RequestType::Polling,
            400,
            "application/json",
            br#"{"success":false,"closed":true}"#,
        )
        .await;
        let conn = connected(&http).await?;

        let Ok(ClientEvent::Close(event)) = conn.events.recv().await else {
            return Err("expected a close event".into());
        };
        assert_eq!(event.reason, SERVER_CLOSED_REASON);
        assert!(conn.events.recv().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn failed_poll_stops_the_loop() -> TestResult {
        let http = Scripted::default();
        http.push_error(RequestType::Polling).await;
        let conn = connected(&http).await?;

        assert!(matches!(
            conn.events.recv().await,
            Ok(ClientEvent::Error(ClientError::Request(_)))
        ));
        assert!(matches!(conn.events.recv().await, Ok(ClientEvent::Close(_))));
        assert!(conn.events.recv().await.is_err());
        assert_eq!(conn.state.get(), ReadyState::Closed);

        // CONNECT plus the one failed poll; nothing was retried.
        assert_eq!(http.seen.lock().await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn connect_rejects_missing_id() -> TestResult {
        let http = Scripted::default();
        http.push(RequestType::Connect, 200, "application/json", br#"{"success":true}"#)
            .await;
        let (tx, _rx) = async_channel::unbounded();
        let url = Url::parse("http://localhost/su")?;

        let result = connect(http, &url, SharedReadyState::new(ReadyState::Connecting), tx).await;
        assert!(matches!(result, Err(ClientError::ConnectDecode(_))));
        Ok(())
    }

    #[tokio::test]
    async fn close_reports_once() -> TestResult {
        let http = Scripted::default();
        let conn = connected(&http).await?;

        conn.transport.close().await;
        conn.transport.close().await;

        assert_eq!(conn.state.get(), ReadyState::Closed);
        assert!(matches!(
            conn.events.recv().await,
            Ok(ClientEvent::Close(CloseEvent { code: Some(1000), .. }))
        ));
        assert!(conn.events.recv().await.is_err());
        Ok(())
    }
}
