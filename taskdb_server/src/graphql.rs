//! GraphQL front-end over the same task and user services as the REST routes.
//!
//! Task resolvers need a session (or anonymous mode). `register`, `login`,
//! `logout` and introspection work without one. Errors carry the matching
//! HTTP status in `extensions.code`.

use std::sync::Arc;

use async_graphql::http::GraphiQLSource;
use async_graphql::{
    Context, EmptySubscription, ErrorExtensions, ID, InputObject, MaybeUndefined, Object, Schema,
    SimpleObject,
};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use taskdb::{
    Attachment, NewTask, StatusFilter, StoreError, Task, TaskPatch, TaskService, UserDirectory,
};

use crate::auth::{Claims, TokenAuthority};
use crate::error::ApiError;
use crate::state::AppState;

pub type TaskSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(
    tasks: TaskService,
    users: UserDirectory,
    tokens: TokenAuthority,
    allow_anonymous: bool,
) -> TaskSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(tasks)
        .data(users)
        .data(tokens)
        .data(AnonymousAccess(allow_anonymous))
        .finish()
}

/// Session resolved from the request's cookie, attached per request.
#[derive(Debug, Default)]
pub struct Session {
    claims: Option<Claims>,
    rejection: Option<&'static str>,
}

impl Session {
    pub fn from_headers(tokens: &TokenAuthority, headers: &HeaderMap) -> Self {
        match tokens.claims_from_headers(headers) {
            Ok(claims) => Session {
                claims,
                rejection: None,
            },
            Err(ApiError::Unauthorized(reason)) => Session {
                claims: None,
                rejection: Some(reason),
            },
            Err(_) => Session {
                claims: None,
                rejection: Some("Invalid token"),
            },
        }
    }
}

struct AnonymousAccess(bool);

#[derive(SimpleObject)]
#[graphql(name = "Attachment")]
pub struct AttachmentObject {
    filename: String,
    original_name: Option<String>,
    path: String,
}

impl From<Attachment> for AttachmentObject {
    fn from(a: Attachment) -> Self {
        Self {
            filename: a.filename,
            original_name: Some(a.original_name).filter(|n| !n.is_empty()),
            path: a.path,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "Task")]
pub struct TaskObject {
    id: ID,
    owner_id: Option<ID>,
    title: String,
    description: Option<String>,
    due_date: Option<String>,
    completed: bool,
    created_at: String,
    updated_at: Option<String>,
    attachments: Vec<AttachmentObject>,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<Task> for TaskObject {
    fn from(task: Task) -> Self {
        Self {
            id: ID(task.id),
            owner_id: task.owner_id.map(ID),
            title: task.title,
            description: Some(task.description),
            due_date: task.due_date,
            completed: task.completed,
            created_at: timestamp(&task.created_at),
            updated_at: task.updated_at.as_ref().map(timestamp),
            attachments: task.attachments.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(SimpleObject)]
pub struct AuthPayload {
    message: String,
}

impl AuthPayload {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(InputObject)]
pub struct TaskInput {
    title: String,
    description: Option<String>,
    due_date: Option<String>,
}

#[derive(InputObject)]
pub struct TaskUpdateInput {
    title: Option<String>,
    description: Option<String>,
    due_date: MaybeUndefined<String>,
    completed: Option<bool>,
}

impl From<TaskUpdateInput> for TaskPatch {
    fn from(input: TaskUpdateInput) -> Self {
        TaskPatch {
            title: input.title,
            description: input.description,
            due_date: match input.due_date {
                MaybeUndefined::Undefined => None,
                MaybeUndefined::Null => Some(None),
                MaybeUndefined::Value(v) => Some(Some(v)),
            },
            completed: input.completed,
        }
    }
}

fn gql(e: impl Into<ApiError>) -> async_graphql::Error {
    e.into().extend()
}

/// Owner for task resolvers, or the reason the request is refused.
fn owner(ctx: &Context<'_>) -> async_graphql::Result<Option<String>> {
    let session = ctx.data::<Session>()?;
    if let Some(reason) = session.rejection {
        return Err(gql(ApiError::Unauthorized(reason)));
    }
    match &session.claims {
        Some(claims) => Ok(Some(claims.id.clone())),
        None if ctx.data::<AnonymousAccess>()?.0 => Ok(None),
        None => Err(gql(ApiError::Unauthorized("Unauthorized"))),
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn tasks(
        &self,
        ctx: &Context<'_>,
        filter: Option<String>,
    ) -> async_graphql::Result<Vec<TaskObject>> {
        let owner = owner(ctx)?;
        let filter = filter
            .as_deref()
            .unwrap_or_default()
            .parse::<StatusFilter>()
            .unwrap_or_default();
        let tasks = ctx
            .data::<TaskService>()?
            .list(owner.as_deref(), filter)
            .await
            .map_err(gql)?;
        Ok(tasks.into_iter().map(Into::into).collect())
    }

    /// `null` when the task does not exist or belongs to someone else.
    async fn task(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Option<TaskObject>> {
        let owner = owner(ctx)?;
        match ctx.data::<TaskService>()?.get(&id, owner.as_deref()).await {
            Ok(task) => Ok(Some(task.into())),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(gql(e)),
        }
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn create_task(
        &self,
        ctx: &Context<'_>,
        input: TaskInput,
    ) -> async_graphql::Result<TaskObject> {
        let owner = owner(ctx)?;
        let new = NewTask {
            title: input.title,
            description: input.description,
            due_date: input.due_date,
            attachments: Vec::new(),
        };
        let task = ctx
            .data::<TaskService>()?
            .create(owner.as_deref(), new)
            .await
            .map_err(gql)?;
        Ok(task.into())
    }

    async fn update_task(
        &self,
        ctx: &Context<'_>,
        id: ID,
        input: TaskUpdateInput,
    ) -> async_graphql::Result<TaskObject> {
        let owner = owner(ctx)?;
        let task = ctx
            .data::<TaskService>()?
            .update(&id, owner.as_deref(), input.into())
            .await
            .map_err(gql)?;
        Ok(task.into())
    }

    async fn delete_task(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        let owner = owner(ctx)?;
        ctx.data::<TaskService>()?
            .delete(&id, owner.as_deref())
            .await
            .map_err(gql)?;
        Ok(true)
    }

    async fn toggle_task(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<TaskObject> {
        let owner = owner(ctx)?;
        let task = ctx
            .data::<TaskService>()?
            .toggle(&id, owner.as_deref())
            .await
            .map_err(gql)?;
        Ok(task.into())
    }

    async fn register(
        &self,
        ctx: &Context<'_>,
        username: String,
        password: String,
    ) -> async_graphql::Result<AuthPayload> {
        ctx.data::<UserDirectory>()?
            .register(&username, &password)
            .await
            .map_err(gql)?;
        Ok(AuthPayload::new("Registered"))
    }

    async fn login(
        &self,
        ctx: &Context<'_>,
        username: String,
        password: String,
    ) -> async_graphql::Result<AuthPayload> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(gql(ApiError::BadRequest(
                "Username and password required".into(),
            )));
        }
        let user = ctx
            .data::<UserDirectory>()?
            .authenticate(&username, &password)
            .await
            .map_err(gql)?
            .ok_or_else(|| gql(ApiError::Unauthorized("Invalid credentials")))?;

        let tokens = ctx.data::<TokenAuthority>()?;
        let token = tokens.issue(&user).map_err(gql)?;
        ctx.append_http_header("set-cookie", tokens.session_cookie(token).to_string());
        Ok(AuthPayload::new("OK"))
    }

    async fn logout(&self, ctx: &Context<'_>) -> async_graphql::Result<AuthPayload> {
        let tokens = ctx.data::<TokenAuthority>()?;
        ctx.append_http_header("set-cookie", tokens.removal_cookie().to_string());
        Ok(AuthPayload::new("Logged out"))
    }

    async fn remove_attachment(
        &self,
        ctx: &Context<'_>,
        task_id: ID,
        filename: String,
    ) -> async_graphql::Result<TaskObject> {
        let owner = owner(ctx)?;
        let task = ctx
            .data::<TaskService>()?
            .detach(&task_id, owner.as_deref(), &filename)
            .await
            .map_err(gql)?;
        Ok(task.into())
    }
}

pub async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

pub async fn graphql_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<async_graphql::Request>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let session = Session::from_headers(&state.tokens, &headers);
    let response = state.schema.execute(request.data(session)).await;

    let extra_headers = response.http_headers.clone();
    let mut http = Json(response).into_response();
    for (name, value) in extra_headers.iter() {
        http.headers_mut().append(name.clone(), value.clone());
    }
    Ok(http)
}
