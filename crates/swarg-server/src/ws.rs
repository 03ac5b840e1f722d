//! WebSocket endpoint: one actor per connection.
//!
//! The socket is split into a writer task that drains the connection's
//! outbox and a reader loop that dispatches client events in arrival order.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use swarg_shared::TokenError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::extract::ApiQuery;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::{Frame, Session};
use crate::state::{with_db, AppState};

/// Close codes sent when the handshake is refused.
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;
const CLOSE_ACCOUNT_DELETED: u16 = 4003;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: String,
}

/// GET /ws?token=...
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state, query.token))
}

async fn run_connection(socket: WebSocket, state: AppState, token: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, rx) = state.registry.outbox();

    let session = match state.registry.bind(&token, tx).await {
        Ok(session) => session,
        Err(err) => {
            let (code, reason) = match err {
                TokenError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            warn!(close_code = code, reason, "WebSocket auth failed");
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };

    match join_member_rooms(&state, &session).await {
        Ok(()) => {}
        Err(ServerError::Authorization(reason)) => {
            warn!(user = %session.claims.sub, %reason, "refusing socket for deleted account");
            state.registry.unbind(session.connection).await;
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_ACCOUNT_DELETED,
                    reason: "Account deleted".into(),
                })))
                .await;
            return;
        }
        Err(e) => {
            warn!(error = %e, user = %session.claims.sub, "could not load group rooms");
        }
    }

    let writer = tokio::spawn(writer_task(sink, rx));

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_client_frame(&state, &session, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                send_error(&state, &session, "binary frames are not supported").await;
            }
            // Ping/pong are answered by axum.
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, connection = %session.connection, "socket read failed");
                break;
            }
        }
    }

    state.registry.unbind(session.connection).await;
    writer.abort();
}

/// Refresh the profile row and put the connection in every room of the
/// user's groups.
async fn join_member_rooms(state: &AppState, session: &Session) -> Result<(), ServerError> {
    let (user, name) = (session.claims.sub, session.claims.name.clone());
    let groups = with_db(&state.db, move |db| {
        db.ensure_user(user, &name)?;
        db.group_ids_for(user)
    })
    .await?;

    for group in groups {
        state.registry.join_group_room(session.connection, group).await;
    }
    Ok(())
}

async fn writer_task(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
) {
    while let Some(frame) = rx.recv().await {
        if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Decode and run one client event. Failures go back to this connection as
/// an `error` event; nothing else sees them.
pub(crate) async fn handle_client_frame(state: &AppState, session: &Session, raw: &str) {
    let event = match serde_json::from_str::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, connection = %session.connection, "unrecognized client event");
            send_error(state, session, "unrecognized event").await;
            return;
        }
    };

    if let Err(err) = dispatch(state, session, event).await {
        debug!(error = %err, connection = %session.connection, "client event failed");
        send_error(state, session, &err.public_message()).await;
    }
}

async fn dispatch(
    state: &AppState,
    session: &Session,
    event: ClientEvent,
) -> Result<(), ServerError> {
    let user = session.claims.sub;
    match event {
        ClientEvent::PrivateMessage(msg) => {
            state
                .router
                .send_private_message(user, msg.to, msg.content, msg.media)
                .await?;
        }
        ClientEvent::GroupMessage(msg) => {
            state
                .router
                .send_group_message(
                    user,
                    msg.group_id,
                    msg.content,
                    msg.media,
                    Some(session.connection),
                )
                .await?;
        }
        ClientEvent::JoinGroup { group_id } => {
            let member = with_db(&state.db, move |db| {
                if !db.group_exists(group_id)? {
                    return Err(swarg_store::StoreError::NotFound("Group"));
                }
                db.is_group_member(group_id, user)
            })
            .await?;
            if !member {
                return Err(ServerError::Authorization("not a member of this group".into()));
            }
            state.registry.join_group_room(session.connection, group_id).await;
        }
        ClientEvent::LeaveGroup { group_id } => {
            state.registry.leave_group_room(session.connection, group_id).await;
        }
    }
    Ok(())
}

async fn send_error(state: &AppState, session: &Session, message: &str) {
    state
        .registry
        .send_to(
            session.connection,
            &ServerEvent::Error {
                message: message.to_string(),
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::next_event;
    use crate::state::tests::TestApp;
    use serde_json::json;
    use swarg_shared::{Room, UserId};

    async fn bind(app: &TestApp, user: UserId, name: &str) -> (Session, mpsc::Receiver<Frame>) {
        let (tx, rx) = app.state.registry.outbox();
        let session = app.state.registry.bind(&app.token(user, name), tx).await.unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn private_message_over_socket() {
        let app = TestApp::new();
        let a = app.user("A");
        let b = app.user("B");
        let (session_a, mut rx_a) = bind(&app, a, "A").await;
        let (_session_b, mut rx_b) = bind(&app, b, "B").await;

        let raw = json!({ "event": "private-message", "data": { "to": b, "content": "hi" } });
        handle_client_frame(&app.state, &session_a, &raw.to_string()).await;

        let event = next_event(&mut rx_b).unwrap();
        assert_eq!(event["event"], "private-message");
        assert_eq!(event["data"]["content"], "hi");
        assert!(next_event(&mut rx_a).is_none());
    }

    #[tokio::test]
    async fn failures_reply_only_to_origin() {
        let app = TestApp::new();
        let a = app.user("A");
        let b = app.user("B");
        let (session_a, mut rx_a) = bind(&app, a, "A").await;
        let (_session_b, mut rx_b) = bind(&app, b, "B").await;

        let raw = json!({ "event": "private-message", "data": { "to": b, "content": "" } });
        handle_client_frame(&app.state, &session_a, &raw.to_string()).await;
        let reply = next_event(&mut rx_a).unwrap();
        assert_eq!(reply["event"], "error");
        assert!(next_event(&mut rx_b).is_none());

        handle_client_frame(&app.state, &session_a, "not json").await;
        assert_eq!(next_event(&mut rx_a).unwrap()["data"]["message"], "unrecognized event");
    }

    #[tokio::test]
    async fn join_group_requires_membership() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let outsider = app.user("Outsider");
        let group = app.db().create_group(owner, "Crew", None).unwrap();
        let (session, mut rx) = bind(&app, outsider, "Outsider").await;

        let raw = json!({ "event": "join-group", "data": { "groupId": group.id } });
        handle_client_frame(&app.state, &session, &raw.to_string()).await;
        assert_eq!(next_event(&mut rx).unwrap()["event"], "error");
        assert_eq!(app.state.registry.room_size(Room::Group(group.id)).await, 0);

        app.db().add_group_member(group.id, owner, outsider).unwrap();
        handle_client_frame(&app.state, &session, &raw.to_string()).await;
        assert!(next_event(&mut rx).is_none());
        assert_eq!(app.state.registry.room_size(Room::Group(group.id)).await, 1);

        let leave = json!({ "event": "leave-group", "data": { "groupId": group.id } });
        handle_client_frame(&app.state, &session, &leave.to_string()).await;
        assert_eq!(app.state.registry.room_size(Room::Group(group.id)).await, 0);
    }

    #[tokio::test]
    async fn bind_auto_joins_group_rooms() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        let group = app.db().create_group(owner, "Crew", None).unwrap();
        let (session, _rx) = bind(&app, owner, "Owner").await;

        join_member_rooms(&app.state, &session).await.unwrap();
        assert!(app
            .state
            .registry
            .rooms_of(session.connection)
            .await
            .contains(&Room::Group(group.id)));
    }

    #[tokio::test]
    async fn deleted_account_cannot_rejoin_rooms() {
        let app = TestApp::new();
        let owner = app.user("Owner");
        app.db().create_group(owner, "Crew", None).unwrap();
        app.db().delete_user(owner).unwrap();
        let (session, _rx) = bind(&app, owner, "Owner").await;

        let err = join_member_rooms(&app.state, &session).await.unwrap_err();
        assert!(matches!(err, ServerError::Authorization(_)));
        assert!(app.db().is_deleted_user(owner).unwrap());
        assert_eq!(app.state.registry.rooms_of(session.connection).await.len(), 1);
    }
}
