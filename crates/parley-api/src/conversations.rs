use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::{
    Claims, CreateConversationRequest, CreateGroupRequest, MemberRequest, RenameRequest,
};
use parley_types::models::Conversation;

use crate::AppState;
use crate::error::ApiError;

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let conversations = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Conversation>> {
        let rows = db.list_conversations_for_user(&user_id)?;
        rows.into_iter().map(|row| assemble(&db, row)).collect()
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(conversations))
}

/// Idempotent lookup-or-create of the direct conversation for the unordered
/// pair {caller, receiver}. The single database connection serializes
/// concurrent creators, so at most one direct conversation per pair exists.
pub async fn create_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    if req.receiver_id == claims.sub {
        return Err(ApiError::Validation(
            "Cannot start a conversation with yourself".into(),
        ));
    }

    let db = state.db.clone();
    let caller = claims.sub.to_string();
    let receiver = req.receiver_id.to_string();

    let conversation = tokio::task::spawn_blocking(move || -> Result<Conversation, ApiError> {
        if db.get_user_by_id(&receiver)?.is_none() {
            return Err(ApiError::NotFound("User not found.".into()));
        }

        let id = match db.find_direct_conversation(&caller, &receiver)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                db.create_direct_conversation(&id, &caller, &receiver, &parley_db::now_rfc3339())?;
                id
            }
        };

        load(&db, &id)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(conversation))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("Group name is required".into()));
    }

    // Creator is implicitly included; at least one other member is required.
    let mut member_ids: Vec<Uuid> = vec![claims.sub];
    for id in req.member_ids {
        if id != claims.sub && !member_ids.contains(&id) {
            member_ids.push(id);
        }
    }
    if member_ids.len() < 2 {
        return Err(ApiError::Validation(
            "A group needs at least one other member".into(),
        ));
    }

    let db = state.db.clone();
    let members: Vec<String> = member_ids.iter().map(|id| id.to_string()).collect();

    let conversation = tokio::task::spawn_blocking(move || -> Result<Conversation, ApiError> {
        for member in &members {
            if db.get_user_by_id(member)?.is_none() {
                return Err(ApiError::NotFound("User not found.".into()));
            }
        }

        let id = Uuid::new_v4().to_string();
        db.create_group_conversation(&id, &name, &members, &parley_db::now_rfc3339())?;

        load(&db, &id)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MemberRequest>,
) -> Result<Json<Conversation>, ApiError> {
    mutate_members(state, conversation_id, claims.sub, req.user_id, MemberOp::Add).await
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MemberRequest>,
) -> Result<Json<Conversation>, ApiError> {
    mutate_members(state, conversation_id, claims.sub, req.user_id, MemberOp::Remove).await
}

enum MemberOp {
    Add,
    Remove,
}

/// Shared guard path for membership mutation: the conversation must exist,
/// be a group, and the caller must be a member.
async fn mutate_members(
    state: AppState,
    conversation_id: Uuid,
    caller: Uuid,
    target: Uuid,
    op: MemberOp,
) -> Result<Json<Conversation>, ApiError> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let caller = caller.to_string();
    let target = target.to_string();

    let conversation = tokio::task::spawn_blocking(move || -> Result<Conversation, ApiError> {
        guard_group_member(&db, &cid, &caller)?;

        match op {
            MemberOp::Add => {
                if db.get_user_by_id(&target)?.is_none() {
                    return Err(ApiError::NotFound("User not found.".into()));
                }
                // Adding an existing member is a no-op, not an error.
                db.add_member(&cid, &target)?;
            }
            MemberOp::Remove => {
                db.remove_member(&cid, &target)?;
            }
        }

        load(&db, &cid)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(conversation))
}

pub async fn rename(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("Group name is required".into()));
    }

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let caller = claims.sub.to_string();

    let conversation = tokio::task::spawn_blocking(move || -> Result<Conversation, ApiError> {
        guard_group_member(&db, &cid, &caller)?;
        db.rename_conversation(&cid, &name)?;
        load(&db, &cid)
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(conversation))
}

fn guard_group_member(db: &Database, cid: &str, caller: &str) -> Result<(), ApiError> {
    let Some(row) = db.get_conversation(cid)? else {
        return Err(ApiError::NotFound("Conversation not found".into()));
    };
    if !row.is_group {
        return Err(ApiError::Validation(
            "Only group conversations can be modified".into(),
        ));
    }
    if !db.is_member(cid, caller)? {
        return Err(ApiError::Forbidden(
            "You are not a member of this conversation".into(),
        ));
    }
    Ok(())
}

fn load(db: &Database, id: &str) -> Result<Conversation, ApiError> {
    let row = db
        .get_conversation(id)?
        .ok_or_else(|| anyhow!("conversation vanished: {}", id))?;
    Ok(assemble(db, row)?)
}

/// Resolve a conversation row plus its member profiles into the API model.
fn assemble(db: &Database, row: parley_db::models::ConversationRow) -> anyhow::Result<Conversation> {
    let members = db
        .conversation_members(&row.id)?
        .into_iter()
        .map(|member| member.into_profile())
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Conversation {
        id: row.id.parse()?,
        name: row.name,
        is_group: row.is_group,
        members,
        last_message: row.last_message,
        unread_count: row.unread_count,
        created_at: parley_db::parse_rfc3339(&row.created_at)?,
        updated_at: parley_db::parse_rfc3339(&row.updated_at)?,
    })
}
