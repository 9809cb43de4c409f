use super::*;
use crate::frame::{Data, Frame, Status};
use crate::services::broadcast::MESSAGE_CREATED;
use crate::state::test_helpers;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// =============================================================================
// ERROR MAPPING
// =============================================================================

#[test]
fn chat_errors_map_to_statuses() {
    let io = std::io::Error::other("disk full");
    let cases = [
        (ChatError::NotFound(1), StatusCode::NOT_FOUND),
        (ChatError::validation("bad"), StatusCode::UNPROCESSABLE_ENTITY),
        (ChatError::CapacityExceeded { chatroom_id: 1, max_members: 2 }, StatusCode::BAD_REQUEST),
        (ChatError::Storage(AttachmentError::Rejected("pdf".into())), StatusCode::UNPROCESSABLE_ENTITY),
        (ChatError::Storage(AttachmentError::Io(io)), StatusCode::INTERNAL_SERVER_ERROR),
        (
            ChatError::Store(crate::store::StoreError::Database(sqlx::Error::PoolTimedOut)),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];
    for (err, status) in cases {
        assert_eq!(chat_error_to_status(&err), status, "{err}");
    }
}

#[test]
fn account_errors_map_to_statuses() {
    assert_eq!(
        account_error_to_status(&AccountError::Validation("x".into())),
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(account_error_to_status(&AccountError::InvalidCredentials), StatusCode::UNAUTHORIZED);
    assert_eq!(
        account_error_to_status(&AccountError::Hash("x".into())),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn api_error_renders_failure_envelope() {
    let response = ApiError::from(ChatError::CapacityExceeded { chatroom_id: 4, max_members: 2 }).into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["message"], "Chatroom is full");
    assert_eq!(body["code"], "E_CHATROOM_FULL");
    assert!(body["error"].as_str().is_some_and(|e| e.contains("max 2")));
    assert!(body.get("data").is_none());
}

#[test]
fn parse_body_defaults_on_empty_and_rejects_garbage() {
    #[derive(serde::Deserialize, Default, Debug, PartialEq)]
    #[serde(default)]
    struct Body {
        user_id: Option<i64>,
    }

    assert_eq!(parse_body::<Body>(&Bytes::new()).unwrap(), Body::default());
    assert_eq!(parse_body::<Body>(&Bytes::from_static(b"{\"user_id\":5}")).unwrap().user_id, Some(5));
    let err = parse_body::<Body>(&Bytes::from_static(b"{nope")).unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// END TO END
// =============================================================================

async fn spawn_app(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port should bind");
    let addr = listener.local_addr().expect("listener has an address");
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.expect("server should run");
    });
    addr
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(addr: SocketAddr) -> Self {
        Self { http: reqwest::Client::new(), base: format!("http://{addr}") }
    }

    async fn register(&self, username: &str) -> (i64, String) {
        let res = self
            .http
            .post(format!("{}/api/register", self.base))
            .json(&json!({
                "name": format!("{username} tester"),
                "email": format!("{username}@example.com"),
                "username": username,
                "password": "password123",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["data"]["token_type"], "Bearer");
        assert!(body["data"]["user"].get("password_hash").is_none());
        (
            body["data"]["user"]["id"].as_i64().unwrap(),
            body["data"]["access_token"].as_str().unwrap().to_owned(),
        )
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (reqwest::StatusCode, Value) {
        let res = self
            .http
            .post(format!("{}{path}", self.base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        (res.status(), res.json().await.unwrap())
    }

    async fn get(&self, token: &str, path: &str) -> (reqwest::StatusCode, Value) {
        let res = self
            .http
            .get(format!("{}{path}", self.base))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        (res.status(), res.json().await.unwrap())
    }

    async fn create_chatroom(&self, token: &str, name: &str, max_members: i64) -> i64 {
        let (status, body) = self
            .post(token, "/api/chatrooms", json!({ "name": name, "max_members": max_members }))
            .await;
        assert_eq!(status, reqwest::StatusCode::CREATED);
        assert_eq!(body["message"], "Chatroom created successfully");
        body["data"]["id"].as_i64().unwrap()
    }
}

async fn connect_ws(addr: SocketAddr, client: &Client, token: &str) -> WsStream {
    let (status, body) = client.post(token, "/api/ws-ticket", Value::Null).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let ticket = body["data"]["ticket"].as_str().unwrap().to_owned();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/ws?ticket={ticket}"))
        .await
        .expect("ws should connect");
    let hello = next_frame(&mut ws).await;
    assert_eq!(hello.syscall, "session:connected");
    ws
}

async fn next_frame(ws: &mut WsStream) -> Frame {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("ws receive timed out")
            .expect("ws closed")
            .expect("ws error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("server frames are valid json");
        }
    }
}

async fn subscribe(ws: &mut WsStream, channel: &str) -> Frame {
    let req = Frame::request("channel:subscribe", Data::new()).with_channel(channel);
    ws.send(WsMessage::Text(serde_json::to_string(&req).unwrap().into()))
        .await
        .unwrap();
    next_frame(ws).await
}

#[tokio::test]
async fn chat_flow_over_http_and_websocket() {
    let addr = spawn_app(test_helpers::test_app_state()).await;
    let client = Client::new(addr);

    let (alice, alice_token) = client.register("alice").await;
    let (bob, bob_token) = client.register("bob").await;
    let (_, carol_token) = client.register("carol").await;

    let room = client.create_chatroom(&alice_token, "General", 2).await;

    let (status, body) = client.post(&alice_token, &format!("/api/chatrooms/{room}/enter"), Value::Null).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["message"], "User entered the chatroom successfully");

    let (status, body) = client
        .post(&alice_token, &format!("/api/chatrooms/{room}/enter"), json!({ "user_id": bob }))
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let ids: Vec<i64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![alice, bob]);

    let (status, body) = client.post(&alice_token, &format!("/api/chatrooms/{room}/enter"), Value::Null).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["message"], "User is already in the chatroom");

    let (status, body) = client.post(&carol_token, &format!("/api/chatrooms/{room}/enter"), Value::Null).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "E_CHATROOM_FULL");

    let mut ws = connect_ws(addr, &client, &bob_token).await;
    let reply = subscribe(&mut ws, &format!("chatroom.{room}")).await;
    assert_eq!(reply.status, Status::Done);

    let (status, body) = client
        .post(&alice_token, &format!("/api/chatrooms/{room}/messages"), json!({ "message": "hi bob" }))
        .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);
    assert_eq!(body["message"], "Message sent successfully");
    let message_id = body["data"]["id"].as_i64().unwrap();

    let event = next_frame(&mut ws).await;
    assert_eq!(event.syscall, MESSAGE_CREATED);
    assert_eq!(event.channel.as_deref(), Some(format!("chatroom.{room}").as_str()));
    assert_eq!(event.data["id"], json!(message_id));
    assert_eq!(event.data["user_id"], json!(alice));
    assert_eq!(event.data["content"], json!("hi bob"));

    let (status, body) = client.get(&bob_token, &format!("/api/chatrooms/{room}/messages")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let history = body["data"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["user"]["username"], "alice");

    let (status, _) = client
        .post(&bob_token, &format!("/api/chatrooms/{room}/leave"), Value::Null)
        .await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let (_, body) = client.get(&alice_token, &format!("/api/chatrooms/{room}/members")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn routes_report_not_found_and_validation() {
    let addr = spawn_app(test_helpers::test_app_state()).await;
    let client = Client::new(addr);
    let (_, token) = client.register("alice").await;

    let (status, body) = client.post(&token, "/api/chatrooms/999/enter", Value::Null).await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Chatroom not found");

    let room = client.create_chatroom(&token, "General", 3).await;
    let (status, body) = client
        .post(&token, &format!("/api/chatrooms/{room}/enter"), json!({ "user_id": 4242 }))
        .await;
    assert_eq!(status, reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "E_VALIDATION");

    let (status, _) = client
        .post(&token, "/api/chatrooms", json!({ "name": "Solo", "max_members": 1 }))
        .await;
    assert_eq!(status, reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = client.post(&token, "/api/chatrooms/999/messages", json!({ "message": "x" })).await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auth_is_required_and_logout_revokes() {
    let addr = spawn_app(test_helpers::test_app_state()).await;
    let client = Client::new(addr);

    let res = client.http.get(format!("{}/api/chatrooms", client.base)).send().await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Unauthenticated");

    let (status, _) = client.get("not-a-token", "/api/user").await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);

    let (_, token) = client.register("alice").await;
    let (status, body) = client.get(&token, "/api/user").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["data"]["username"], "alice");

    let (status, body) = client
        .post(&token, "/api/login", json!({ "username_or_email": "alice", "password": "wrong-password" }))
        .await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "E_INVALID_CREDENTIALS");

    let (status, _) = client.post(&token, "/api/logout", Value::Null).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let (status, _) = client.get(&token, "/api/user").await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ws_rejects_missing_or_reused_ticket() {
    let addr = spawn_app(test_helpers::test_app_state()).await;
    let client = Client::new(addr);
    let (_, token) = client.register("alice").await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/api/ws?ticket=bogus"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(ref res) if res.status() == 401
    ));

    let (_, body) = client.post(&token, "/api/ws-ticket", Value::Null).await;
    let ticket = body["data"]["ticket"].as_str().unwrap().to_owned();
    let url = format!("ws://{addr}/api/ws?ticket={ticket}");
    let (_ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.expect("first use connects");
    assert!(tokio_tungstenite::connect_async(url.as_str()).await.is_err());
}

#[tokio::test]
async fn multipart_attachment_is_stored_and_served() {
    let addr = spawn_app(test_helpers::test_app_state()).await;
    let client = Client::new(addr);
    let (_, token) = client.register("alice").await;
    let room = client.create_chatroom(&token, "Photos", 5).await;

    let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4];
    let form = reqwest::multipart::Form::new()
        .text("message", "look")
        .part(
            "attachment",
            reqwest::multipart::Part::bytes(png.clone())
                .file_name("cat.png")
                .mime_str("image/png")
                .unwrap(),
        );
    let res = client
        .http
        .post(format!("{}/api/chatrooms/{room}/messages", client.base))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["content"], "look");
    let reference = body["data"]["attachment"].as_str().unwrap().to_owned();
    assert!(reference.ends_with(".png"));

    let served = client
        .http
        .get(format!("{}/storage/{reference}", client.base))
        .send()
        .await
        .unwrap();
    assert_eq!(served.status(), reqwest::StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().to_vec(), png);

    let form = reqwest::multipart::Form::new().part(
        "attachment",
        reqwest::multipart::Part::bytes(vec![1, 2, 3])
            .file_name("notes.pdf")
            .mime_str("application/pdf")
            .unwrap(),
    );
    let res = client
        .http
        .post(format!("{}/api/chatrooms/{room}/messages", client.base))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "E_ATTACHMENT_REJECTED");
}

#[tokio::test]
async fn blank_message_is_stored_without_content() {
    let addr = spawn_app(test_helpers::test_app_state()).await;
    let client = Client::new(addr);
    let (_, token) = client.register("alice").await;
    let room = client.create_chatroom(&token, "Quiet", 5).await;

    for blank in ["", "   "] {
        let (status, body) = client
            .post(&token, &format!("/api/chatrooms/{room}/messages"), json!({ "message": blank }))
            .await;
        assert_eq!(status, reqwest::StatusCode::CREATED);
        assert_eq!(body["data"]["content"], Value::Null);
    }

    let form = reqwest::multipart::Form::new().text("message", "");
    let res = client
        .http
        .post(format!("{}/api/chatrooms/{room}/messages", client.base))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["content"], Value::Null);

    let (_, body) = client.get(&token, &format!("/api/chatrooms/{room}/messages")).await;
    let history = body["data"].as_array().unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|m| m["content"].is_null()));
}

#[tokio::test]
async fn healthz_is_ok() {
    let addr = spawn_app(test_helpers::test_app_state()).await;
    let res = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
}
