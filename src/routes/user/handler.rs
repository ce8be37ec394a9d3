use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{
    AppState,
    utils::{api_message, generate_token},
};

use super::model::{LoginRequest, LoginResponse, SignupRequest, User};

// 登录相关失败一律同一响应，不泄露账号是否存在
fn invalid_credentials(status: StatusCode) -> Response {
    (status, api_message("Invalid authentication credentials!")).into_response()
}

#[axum::debug_handler]
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> impl IntoResponse {
    // 基本字段校验，进库前拒绝
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') || req.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            api_message("A valid email and password are required!"),
        )
            .into_response();
    }

    match User::create(&state.pool, email, &req.password).await {
        Ok(_) => (StatusCode::CREATED, api_message("User created!")).into_response(),
        Err(e) => {
            let duplicate = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
            if duplicate {
                tracing::debug!("Signup rejected, email already registered");
            } else {
                tracing::error!("Failed to create user: {}", e);
            }
            invalid_credentials(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let user = match User::find_by_email(&state.pool, req.email.trim()).await {
        Ok(Some(user)) => user,
        Ok(None) => return invalid_credentials(StatusCode::UNAUTHORIZED),
        Err(e) => {
            tracing::error!("Failed to fetch user for login: {}", e);
            return invalid_credentials(StatusCode::UNAUTHORIZED);
        }
    };

    // 验证密码
    match user.verify_login(&req.password).await {
        Ok(true) => (),
        Ok(false) => return invalid_credentials(StatusCode::UNAUTHORIZED),
        Err(e) => {
            tracing::error!("Failed to verify password: {}", e);
            return invalid_credentials(StatusCode::UNAUTHORIZED);
        }
    }

    // 生成 token
    match generate_token(&user.id.to_string(), &user.email, &state.config) {
        Ok(token) => (
            StatusCode::OK,
            Json(LoginResponse {
                token,
                expires_in: state.config.jwt_expiration_secs,
                user_id: user.id,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to generate token: {}", e);
            invalid_credentials(StatusCode::UNAUTHORIZED)
        }
    }
}
