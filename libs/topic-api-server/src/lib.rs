mod error;
mod http;
mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use topic_engine::Broker;

pub use error::ApiError;

#[derive(Debug, Clone, Default)]
pub struct ApiSettings {
    /// Interval of SSE keep-alive comments. `None` disables them.
    pub keep_alive: Option<Duration>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) broker: Arc<Broker>,
    pub(crate) settings: ApiSettings,
    pub(crate) shutdown: CancellationToken,
}

/// Routes: `POST /publish`, `GET /subscribe?topic=`, `GET /topics`.
/// Other methods on these paths get 405 from the method router.
pub fn router(broker: Arc<Broker>, settings: ApiSettings, shutdown: CancellationToken) -> Router {
    let state = AppState {
        broker,
        settings,
        shutdown,
    };

    Router::new()
        .route("/publish", post(http::handle_publish))
        .route("/subscribe", get(sse::handle_subscribe))
        .route("/topics", get(http::handle_list_topics))
        .with_state(state)
}

pub async fn bind(addr: &str) -> Result<TcpListener, ApiError> {
    TcpListener::bind(addr).await.map_err(|source| ApiError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker>,
    settings: ApiSettings,
    shutdown: CancellationToken,
) -> Result<(), ApiError> {
    let app = router(broker, settings, shutdown.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ApiError::Serve)
}

/// Pub/sub HTTP + SSE API server.
pub async fn run(
    addr: &str,
    broker: Arc<Broker>,
    settings: ApiSettings,
    shutdown: CancellationToken,
) -> Result<(), ApiError> {
    let listener = bind(addr).await?;
    serve(listener, broker, settings, shutdown).await
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    use pubsub_api::{Message, NewMessage};
    use storage_memory::MemoryLog;
    use topic_engine::SubscriberOptions;

    use super::*;

    struct TestServer {
        addr: SocketAddr,
        broker: Arc<Broker>,
        shutdown: CancellationToken,
        handle: JoinHandle<Result<(), ApiError>>,
    }

    async fn start() -> TestServer {
        start_with(ApiSettings::default()).await
    }

    async fn start_with(settings: ApiSettings) -> TestServer {
        let broker = Arc::new(Broker::new(
            Arc::new(MemoryLog::default()),
            SubscriberOptions::default(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(
            listener,
            broker.clone(),
            settings,
            shutdown.clone(),
        ));
        TestServer { addr, broker, shutdown, handle }
    }

    /// One-shot HTTP/1.1 request. Returns (status, body).
    async fn request(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let req = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(req.as_bytes()).await.unwrap();

        let mut buf = Vec::new();
        timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .expect("response timed out")
            .unwrap();
        let text = String::from_utf8_lossy(&buf).into_owned();
        let status = text[9..12].parse().unwrap();
        let body = text
            .split_once("\r\n\r\n")
            .map(|(_, b)| b.to_string())
            .unwrap_or_default();
        (status, body)
    }

    struct SseClient {
        stream: TcpStream,
        buf: String,
    }

    impl SseClient {
        async fn connect(addr: SocketAddr, query: &str) -> Self {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let req = format!(
                "GET /subscribe{query} HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n"
            );
            stream.write_all(req.as_bytes()).await.unwrap();
            Self { stream, buf: String::new() }
        }

        /// Read until `needle` shows up; returns its offset in the buffer.
        async fn read_until(&mut self, needle: &str) -> usize {
            let deadline = Duration::from_secs(5);
            timeout(deadline, async {
                loop {
                    if let Some(pos) = self.buf.find(needle) {
                        return pos;
                    }
                    let mut chunk = [0u8; 4096];
                    let n = self.stream.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "stream closed before {needle:?}; got {:?}", self.buf);
                    self.buf.push_str(&String::from_utf8_lossy(&chunk[..n]));
                }
            })
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}; got {:?}", self.buf))
        }

        async fn read_to_eof(&mut self) {
            let mut rest = Vec::new();
            timeout(Duration::from_secs(5), self.stream.read_to_end(&mut rest))
                .await
                .expect("stream did not end")
                .unwrap();
            self.buf.push_str(&String::from_utf8_lossy(&rest));
        }
    }

    async fn wait_for_subscribers(broker: &Broker, topic: &str, expected: usize) {
        timeout(Duration::from_secs(5), async {
            while broker.subscriber_count(topic) != expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("subscriber count of {topic} never reached {expected}"));
    }

    #[tokio::test]
    async fn publish_returns_stored_message() {
        let server = start().await;
        let (status, body) =
            request(server.addr, "POST", "/publish", r#"{"topic":"news","content":"a"}"#).await;
        assert_eq!(status, 200);
        assert_eq!(body, r#"{"id":1,"topic":"news","content":"a"}"#);
    }

    #[tokio::test]
    async fn publish_rejects_other_methods() {
        let server = start().await;
        let (status, _) = request(server.addr, "GET", "/publish", "").await;
        assert_eq!(status, 405);
        let (status, _) = request(server.addr, "PUT", "/publish", r#"{"topic":"news","content":"a"}"#).await;
        assert_eq!(status, 405);
    }

    #[tokio::test]
    async fn malformed_publish_is_rejected_without_side_effects() {
        let server = start().await;
        for body in [
            "not json",
            r#"{"topic":"news"}"#,
            r#"{"content":"a"}"#,
            r#"{"topic":"","content":"a"}"#,
            r#"{"topic":1,"content":"a"}"#,
        ] {
            let (status, _) = request(server.addr, "POST", "/publish", body).await;
            assert_eq!(status, 400, "body {body}");
        }

        let (status, body) =
            request(server.addr, "POST", "/publish", r#"{"topic":"news","content":"a"}"#).await;
        assert_eq!(status, 200);
        assert!(body.starts_with(r#"{"id":1,"#), "nothing may be appended by rejected publishes: {body}");
    }

    #[tokio::test]
    async fn subscribe_without_topic_is_rejected() {
        let server = start().await;
        let (status, _) = request(server.addr, "GET", "/subscribe", "").await;
        assert_eq!(status, 400);
        let (status, _) = request(server.addr, "GET", "/subscribe?topic=", "").await;
        assert_eq!(status, 400);
        assert!(server.broker.topics().is_empty());
    }

    #[tokio::test]
    async fn subscribe_streams_replay_then_live() {
        let server = start().await;
        server.broker.publish(NewMessage::new("news", "a")).await.unwrap();
        server.broker.publish(NewMessage::new("news", "b")).await.unwrap();
        server.broker.publish(NewMessage::new("sports", "goal")).await.unwrap();

        let mut client = SseClient::connect(server.addr, "?topic=news").await;
        client.read_until("\r\n\r\n").await;
        let head = client.buf.to_ascii_lowercase();
        assert!(head.starts_with("http/1.1 200"), "{head}");
        assert!(head.contains("content-type: text/event-stream"), "{head}");
        assert!(head.contains("cache-control: no-cache"), "{head}");

        let first = client.read_until("data: {\"id\":1,\"topic\":\"news\",\"content\":\"a\"}\n\n").await;
        let second = client.read_until("data: {\"id\":2,\"topic\":\"news\",\"content\":\"b\"}\n\n").await;
        assert!(first < second);

        let (status, _) =
            request(server.addr, "POST", "/publish", r#"{"topic":"news","content":"c"}"#).await;
        assert_eq!(status, 200);
        client.read_until("data: {\"id\":4,\"topic\":\"news\",\"content\":\"c\"}\n\n").await;
        assert!(!client.buf.contains("goal"));
    }

    #[tokio::test]
    async fn keep_alive_comments_interleave_with_frames() {
        let server = start_with(ApiSettings {
            keep_alive: Some(Duration::from_millis(50)),
        })
        .await;
        server.broker.publish(NewMessage::new("news", "a")).await.unwrap();

        let mut client = SseClient::connect(server.addr, "?topic=news").await;
        let first = client.read_until("data: {\"id\":1,\"topic\":\"news\",\"content\":\"a\"}\n\n").await;
        let comment = client.read_until(":\n\n").await;
        assert!(comment > first, "keep-alive before the first frame: {:?}", client.buf);

        server.broker.publish(NewMessage::new("news", "b")).await.unwrap();
        let second = client.read_until("data: {\"id\":2,\"topic\":\"news\",\"content\":\"b\"}\n\n").await;
        assert!(second > comment);

        let frames: Vec<Message> = client
            .buf
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|json| serde_json::from_str(json).unwrap())
            .collect();
        assert_eq!(
            frames,
            vec![
                Message { id: 1, topic: "news".into(), content: "a".into() },
                Message { id: 2, topic: "news".into(), content: "b".into() },
            ]
        );
    }

    #[tokio::test]
    async fn topics_lists_subscriber_counts() {
        let server = start().await;
        let mut client = SseClient::connect(server.addr, "?topic=news").await;
        client.read_until("\r\n\r\n").await;
        wait_for_subscribers(&server.broker, "news", 1).await;

        let (status, body) = request(server.addr, "GET", "/topics", "").await;
        assert_eq!(status, 200);
        assert_eq!(body, r#"[{"topic":"news","subscribers":1}]"#);
    }

    #[tokio::test]
    async fn shutdown_ends_streams_and_unregisters() {
        let server = start().await;
        let mut client = SseClient::connect(server.addr, "?topic=news").await;
        client.read_until("\r\n\r\n").await;
        wait_for_subscribers(&server.broker, "news", 1).await;

        server.shutdown.cancel();
        client.read_to_eof().await;
        wait_for_subscribers(&server.broker, "news", 0).await;

        let served = timeout(Duration::from_secs(5), server.handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn client_disconnect_unregisters() {
        let server = start().await;
        let mut client = SseClient::connect(server.addr, "?topic=news").await;
        client.read_until("\r\n\r\n").await;
        wait_for_subscribers(&server.broker, "news", 1).await;
        drop(client);

        // The broken connection is noticed on the next failed write.
        let released = timeout(Duration::from_secs(5), async {
            while server.broker.subscriber_count("news") != 0 {
                server.broker.publish(NewMessage::new("news", "ping")).await.unwrap();
                sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        assert!(released.is_ok(), "subscriber leaked after disconnect");
    }
}
