use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;

use super::{ApiError, ApiJson, ApiPath, ApiQuery, SharedState};
use crate::auth::CurrentUser;
use crate::errors::StudyError;

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct MemberQuery {
    pub group_id: i64,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub group_id: i64,
    pub user_id: i64,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct RemoveMemberQuery {
    pub group_id: i64,
    pub user_id: i64,
}

pub async fn list_groups(
    State(state): State<SharedState>,
    _user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let groups = state.db.call(|db| db.list_groups()).await?;
    Ok(Json(groups))
}

pub async fn create_group(
    State(state): State<SharedState>,
    _user: CurrentUser,
    ApiJson(req): ApiJson<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let description = req.description.unwrap_or_default();
    let group = state
        .db
        .call(move |db| db.create_group(&req.name, &description))
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn get_group(
    State(state): State<SharedState>,
    _user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.db.call(move |db| db.get_group_detail(id)).await?;
    Ok(Json(detail))
}

pub async fn delete_group(
    State(state): State<SharedState>,
    _user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.db.call(move |db| db.delete_group(id)).await?;
    match deleted {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(ApiError::NotFound(format!("Group {} not found", id))),
    }
}

pub async fn list_members(
    State(state): State<SharedState>,
    _user: CurrentUser,
    ApiQuery(query): ApiQuery<MemberQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let members = state
        .db
        .call(move |db| Ok(db.get_group_detail(query.group_id)?.members))
        .await?;
    Ok(Json(members))
}

pub async fn add_member(
    State(state): State<SharedState>,
    _user: CurrentUser,
    ApiJson(req): ApiJson<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = state
        .db
        .call(move |db| db.add_group_member(req.group_id, req.user_id, req.role.as_deref()))
        .await?;
    Ok(Json(member))
}

pub async fn remove_member(
    State(state): State<SharedState>,
    _user: CurrentUser,
    ApiQuery(query): ApiQuery<RemoveMemberQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            if db.remove_group_member(query.group_id, query.user_id)? {
                Ok(())
            } else {
                Err(StudyError::not_found("Group member", query.user_id).into())
            }
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use crate::api::test_support::{body_json, test_app};

    #[tokio::test]
    async fn test_group_lifecycle() {
        let app = test_app();
        let (ada_id, token) = app.sign_in("ada@uni.test").await;

        let response = app
            .request("POST", "/group", Some(&token), Some(json!({"name": "Compilers"})))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let group: Value = body_json(response.into_body()).await;
        let gid = group["id"].as_i64().unwrap();

        for _ in 0..2 {
            let response = app
                .request(
                    "POST",
                    "/group-members",
                    Some(&token),
                    Some(json!({"group_id": gid, "user_id": ada_id, "role": "owner"})),
                )
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .request("GET", &format!("/group/{}", gid), Some(&token), None)
            .await;
        let detail: Value = body_json(response.into_body()).await;
        assert_eq!(detail["name"], "Compilers");
        assert_eq!(detail["members"].as_array().unwrap().len(), 1);
        assert_eq!(detail["members"][0]["role"], "owner");

        let response = app
            .request(
                "DELETE",
                &format!("/group-members?group_id={}&user_id={}", gid, ada_id),
                Some(&token),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .request("DELETE", &format!("/group/{}", gid), Some(&token), None)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app
            .request("GET", &format!("/group-members?group_id={}", gid), Some(&token), None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_group_requires_name_and_session() {
        let app = test_app();
        let response = app
            .request("POST", "/group", None, Some(json!({"name": "Anon"})))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let (_, token) = app.sign_in("ada@uni.test").await;
        let response = app
            .request("POST", "/group", Some(&token), Some(json!({"description": "nameless"})))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
