use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use swarg_shared::{
    CommentId, ConversationId, GroupId, MediaRef, MessageId, MessageTarget, NotificationId,
    PostId, StoryId, UserId,
};
use swarg_store::{
    Comment, ConversationSummary, FollowOutcome, Group, Invite, LikeToggle, Message,
    Notification, Post, Story, User,
};

use crate::auth::AuthUser;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::protocol::{EnrichedMessage, ServerEvent};
use crate::state::{with_db, AppState};
use crate::ws::ws_upgrade;

type ApiResult<T> = Result<Json<T>, ServerError>;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let api = Router::new()
        // users
        .route("/users/me", get(get_me).put(update_me).delete(delete_me))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/follow", post(follow).delete(unfollow))
        .route("/users/{id}/followers", get(followers))
        .route("/users/{id}/following", get(following))
        .route("/users/{id}/posts", get(user_posts))
        // posts
        .route("/posts", post(create_post))
        .route("/posts/feed", get(post_feed))
        .route("/posts/{id}", delete(delete_post))
        .route("/posts/{id}/like", put(like_post))
        .route("/posts/{id}/comments", post(add_comment))
        .route("/posts/{id}/comments/{comment_id}", delete(delete_comment))
        // stories
        .route("/stories", post(create_story))
        .route("/stories/feed", get(story_feed))
        .route("/stories/{id}", delete(delete_story))
        .route("/stories/{id}/like", put(like_story))
        // messaging
        .route("/conversations", get(list_conversations))
        .route(
            "/conversations/{user_id}/messages",
            get(conversation_messages_with).post(send_private),
        )
        .route(
            "/conversations/id/{conversation_id}/messages",
            get(conversation_messages),
        )
        .route("/messages/{id}", delete(delete_message))
        // groups
        .route("/groups", post(create_group).get(list_groups))
        .route(
            "/groups/{id}",
            get(get_group).put(update_group).delete(delete_group),
        )
        .route("/groups/{id}/members", post(add_member))
        .route("/groups/{id}/members/{user_id}", delete(remove_member))
        .route("/groups/{id}/leave", post(leave_group))
        .route(
            "/groups/{id}/admins/{user_id}",
            post(promote_admin).delete(demote_admin),
        )
        .route("/groups/{id}/invites", post(create_invite))
        .route("/groups/{id}/messages", get(group_messages).post(send_group))
        .route("/invites/{code}", delete(revoke_invite))
        .route("/invites/{code}/redeem", post(redeem_invite))
        // notifications
        .route("/notifications", get(list_notifications))
        .route("/notifications/read-all", put(mark_all_read))
        .route("/notifications/{id}/read", put(mark_read))
        .route("/notifications/{id}", delete(delete_notification));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .route("/admin/broadcast", post(admin_broadcast))
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

#[derive(Deserialize)]
struct BroadcastRequest {
    message: String,
}

/// `Some(None)` when the field is present and null, `None` when absent.
fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

#[derive(Deserialize)]
struct ProfileUpdate {
    name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    avatar: Option<Option<String>>,
}

#[derive(Deserialize)]
struct ContentBody {
    content: Option<String>,
    #[serde(default)]
    media: Vec<MediaRef>,
}

#[derive(Deserialize)]
struct FeedQuery {
    page: Option<u32>,
}

#[derive(Deserialize)]
struct CommentBody {
    text: String,
}

#[derive(Deserialize)]
struct StoryBody {
    media: MediaRef,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewGroupBody {
    name: String,
    avatar: Option<String>,
    #[serde(default)]
    members: Vec<UserId>,
}

#[derive(Deserialize)]
struct GroupUpdate {
    name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    avatar: Option<Option<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberBody {
    user_id: UserId,
}

#[derive(Deserialize, Default)]
struct RemoveMemberBody {
    reason: Option<String>,
}

#[derive(Deserialize)]
struct NotificationQuery {
    limit: Option<u32>,
}

#[derive(Serialize)]
struct NotificationList {
    notifications: Vec<Notification>,
    unread: u64,
}

const DEFAULT_NOTIFICATION_PAGE: u32 = 50;

// ─── Health / admin ───

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.connection_count().await,
    })
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Authorization(
            "admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Authorization("invalid admin token".into()));
    }
    Ok(())
}

async fn admin_broadcast(
    headers: HeaderMap,
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BroadcastRequest>,
) -> ApiResult<Value> {
    verify_admin_token(&headers, &state.config)?;

    let message = req.message.trim();
    if message.is_empty() {
        return Err(ServerError::Validation("message must not be empty".into()));
    }

    let delivered = state
        .registry
        .broadcast_all(&ServerEvent::SystemNotification {
            message: message.to_string(),
            from: state.config.instance_name.clone(),
        })
        .await;

    info!(delivered, "admin broadcast sent");
    Ok(Json(json!({ "delivered": delivered })))
}

// ─── Users ───

async fn get_me(State(state): State<AppState>, auth: AuthUser) -> ApiResult<User> {
    let user = with_db(&state.db, move |db| db.get_user(auth.id)).await?;
    Ok(Json(user))
}

async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<ProfileUpdate>,
) -> ApiResult<User> {
    let user = with_db(&state.db, move |db| {
        let avatar = req.avatar.as_ref().map(|a| a.as_deref());
        db.update_profile(auth.id, req.name.as_deref(), avatar)
    })
    .await?;
    Ok(Json(user))
}

async fn delete_me(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Value> {
    let deleted = with_db(&state.db, move |db| db.delete_user(auth.id)).await?;
    let closed = state.registry.disconnect_user(auth.id).await;
    info!(user = %auth.id, closed, "profile deleted");
    Ok(Json(json!({ "deleted": deleted })))
}

async fn get_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<User> {
    let user = with_db(&state.db, move |db| db.get_user(id)).await?;
    Ok(Json(user))
}

async fn follow(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<FollowOutcome> {
    Ok(Json(state.social.follow(auth.id, id).await?))
}

async fn unfollow(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<Value> {
    let removed = state.social.unfollow(auth.id, id).await?;
    Ok(Json(json!({ "unfollowed": removed })))
}

async fn followers(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<Vec<User>> {
    let users = with_db(&state.db, move |db| {
        db.get_user(id)?;
        db.followers(id)
    })
    .await?;
    Ok(Json(users))
}

async fn following(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<Vec<User>> {
    let users = with_db(&state.db, move |db| {
        db.get_user(id)?;
        db.following(id)
    })
    .await?;
    Ok(Json(users))
}

async fn user_posts(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<Vec<Post>> {
    let posts = with_db(&state.db, move |db| db.user_posts(id)).await?;
    Ok(Json(posts))
}

// ─── Posts ───

async fn create_post(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<ContentBody>,
) -> Result<(StatusCode, Json<Post>), ServerError> {
    let post = state.social.create_post(auth.id, req.content, req.media).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn post_feed(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(q): ApiQuery<FeedQuery>,
) -> ApiResult<Vec<Post>> {
    let page = q.page.unwrap_or(1);
    let posts = with_db(&state.db, move |db| db.feed(page)).await?;
    Ok(Json(posts))
}

async fn delete_post(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<PostId>,
) -> ApiResult<Value> {
    with_db(&state.db, move |db| db.delete_post_as(id, auth.id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

async fn like_post(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<PostId>,
) -> ApiResult<LikeToggle> {
    Ok(Json(state.social.toggle_post_like(id, auth.id).await?))
}

async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<PostId>,
    ApiJson(req): ApiJson<CommentBody>,
) -> Result<(StatusCode, Json<Comment>), ServerError> {
    let comment = state.social.add_comment(id, auth.id, req.text).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn delete_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath((post, comment)): ApiPath<(PostId, CommentId)>,
) -> ApiResult<Value> {
    state.social.delete_comment(post, comment, auth.id).await?;
    Ok(Json(json!({ "deleted": true })))
}

// ─── Stories ───

async fn create_story(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<StoryBody>,
) -> Result<(StatusCode, Json<Story>), ServerError> {
    let story = state.social.create_story(auth.id, req.media).await?;
    Ok((StatusCode::CREATED, Json(story)))
}

async fn story_feed(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Vec<Story>> {
    let stories = with_db(&state.db, move |db| db.story_feed(auth.id)).await?;
    Ok(Json(stories))
}

async fn like_story(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<StoryId>,
) -> ApiResult<LikeToggle> {
    Ok(Json(state.social.toggle_story_like(id, auth.id).await?))
}

async fn delete_story(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<StoryId>,
) -> ApiResult<Value> {
    with_db(&state.db, move |db| db.delete_story_as(id, auth.id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

// ─── Messaging ───

async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Vec<ConversationSummary>> {
    let list = with_db(&state.db, move |db| db.list_conversations_for(auth.id)).await?;
    Ok(Json(list))
}

async fn send_private(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(recipient): ApiPath<UserId>,
    ApiJson(req): ApiJson<ContentBody>,
) -> Result<(StatusCode, Json<EnrichedMessage>), ServerError> {
    let message = state
        .router
        .send_private_message(auth.id, recipient, req.content, req.media)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn conversation_messages_with(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(other): ApiPath<UserId>,
) -> ApiResult<Vec<Message>> {
    Ok(Json(state.router.list_messages_with(auth.id, other).await?))
}

async fn conversation_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<ConversationId>,
) -> ApiResult<Vec<Message>> {
    let messages = state
        .router
        .list_messages(MessageTarget::Conversation(id), auth.id)
        .await?;
    Ok(Json(messages))
}

async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<MessageId>,
) -> ApiResult<Value> {
    state.router.delete_message(id, auth.id).await?;
    Ok(Json(json!({ "deleted": true })))
}

// ─── Groups ───

async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<NewGroupBody>,
) -> Result<(StatusCode, Json<Group>), ServerError> {
    let group = state
        .social
        .create_group(auth.id, req.name, req.avatar, req.members)
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn list_groups(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Vec<Group>> {
    let groups = with_db(&state.db, move |db| db.list_groups_for(auth.id)).await?;
    Ok(Json(groups))
}

async fn get_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<GroupId>,
) -> ApiResult<Group> {
    Ok(Json(state.social.get_group(id, auth.id).await?))
}

async fn update_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<GroupId>,
    ApiJson(req): ApiJson<GroupUpdate>,
) -> ApiResult<Group> {
    let group = with_db(&state.db, move |db| {
        let avatar = req.avatar.as_ref().map(|a| a.as_deref());
        db.update_group(id, auth.id, req.name.as_deref(), avatar)
    })
    .await?;
    Ok(Json(group))
}

async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<GroupId>,
) -> ApiResult<Value> {
    state.social.delete_group(id, auth.id).await?;
    Ok(Json(json!({ "deleted": true })))
}

async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<GroupId>,
    ApiJson(req): ApiJson<AddMemberBody>,
) -> ApiResult<Group> {
    Ok(Json(state.social.add_member(id, auth.id, req.user_id).await?))
}

/// The `{reason}` body is optional, so the raw bytes are parsed here.
async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath((id, user)): ApiPath<(GroupId, UserId)>,
    body: Bytes,
) -> ApiResult<Group> {
    let req: RemoveMemberBody = if body.is_empty() {
        RemoveMemberBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::Validation(format!("invalid body: {e}")))?
    };
    let group = state
        .social
        .remove_member(id, auth.id, user, req.reason)
        .await?;
    Ok(Json(group))
}

async fn leave_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<GroupId>,
) -> ApiResult<Value> {
    state.social.leave_group(id, auth.id).await?;
    Ok(Json(json!({ "left": true })))
}

async fn promote_admin(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath((id, user)): ApiPath<(GroupId, UserId)>,
) -> ApiResult<Group> {
    Ok(Json(state.social.set_admin(id, auth.id, user, true).await?))
}

async fn demote_admin(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath((id, user)): ApiPath<(GroupId, UserId)>,
) -> ApiResult<Group> {
    Ok(Json(state.social.set_admin(id, auth.id, user, false).await?))
}

async fn create_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<GroupId>,
) -> Result<(StatusCode, Json<Invite>), ServerError> {
    let invite = state.social.create_invite(id, auth.id).await?;
    Ok((StatusCode::CREATED, Json(invite)))
}

async fn redeem_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(code): ApiPath<String>,
) -> ApiResult<Group> {
    Ok(Json(state.social.redeem_invite(code, auth.id).await?))
}

async fn revoke_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(code): ApiPath<String>,
) -> ApiResult<Value> {
    with_db(&state.db, move |db| db.revoke_invite(&code, auth.id)).await?;
    Ok(Json(json!({ "revoked": true })))
}

async fn group_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<GroupId>,
) -> ApiResult<Vec<Message>> {
    let messages = state
        .router
        .list_messages(MessageTarget::Group(id), auth.id)
        .await?;
    Ok(Json(messages))
}

async fn send_group(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<GroupId>,
    ApiJson(req): ApiJson<ContentBody>,
) -> Result<(StatusCode, Json<EnrichedMessage>), ServerError> {
    let message = state
        .router
        .send_group_message(auth.id, id, req.content, req.media, None)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

// ─── Notifications ───

async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(q): ApiQuery<NotificationQuery>,
) -> ApiResult<NotificationList> {
    let limit = q.limit.unwrap_or(DEFAULT_NOTIFICATION_PAGE);
    let list = with_db(&state.db, move |db| {
        Ok(NotificationList {
            notifications: db.list_notifications(auth.id, limit)?,
            unread: db.unread_notification_count(auth.id)?,
        })
    })
    .await?;
    Ok(Json(list))
}

async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<NotificationId>,
) -> ApiResult<Notification> {
    let n = with_db(&state.db, move |db| db.mark_notification_read(id, auth.id)).await?;
    Ok(Json(n))
}

async fn mark_all_read(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Value> {
    let updated = with_db(&state.db, move |db| db.mark_all_notifications_read(auth.id)).await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn delete_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<NotificationId>,
) -> ApiResult<Value> {
    with_db(&state.db, move |db| db.delete_notification(id, auth.id)).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
