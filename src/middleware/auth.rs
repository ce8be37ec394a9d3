use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};

use crate::{
    AppState,
    utils::{api_message, verify_token},
};

// 统一的未认证响应，不区分缺失、伪造或过期
fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        api_message("You are not authenticated!"),
    )
        .into_response()
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut request: Request,
    next: Next,
) -> Response {
    // 头缺失或格式不对与验签失败同样处理
    let Ok(TypedHeader(Authorization(bearer))) = bearer else {
        return unauthenticated();
    };

    match verify_token(bearer.token(), &state.config) {
        Ok(claims) => {
            // 解码出的身份放入请求扩展，供下游 handler 使用
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!("Token verification failed: {}", e);
            unauthenticated()
        }
    }
}
