use axum::{
    Json,
    extract::{Extension, FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::{
    AppState, images,
    utils::{Claims, api_message},
};

use super::model::{
    CreatePostResponse, ImageSource, ImageUpload, PageWindow, Post, PostForm, PostListQuery,
    PostListResponse, UpdatePostBody,
};

fn validation_error(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, api_message(message)).into_response()
}

fn upload_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        api_message("Error uploading image on cloud storage!"),
    )
        .into_response()
}

// 中间件注入的 sub 就是签发时的用户ID
fn caller_id(claims: &Claims) -> Option<Uuid> {
    Uuid::parse_str(&claims.sub).ok()
}

fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        api_message("You are not authenticated!"),
    )
        .into_response()
}

#[axum::debug_handler]
pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let Some(creator) = caller_id(&claims) else {
        return unauthenticated();
    };

    let form = match PostForm::read(&mut multipart).await {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!("Malformed multipart body: {}", e);
            return validation_error("Invalid form data!");
        }
    };

    let Some(title) = form.title.filter(|t| !t.trim().is_empty()) else {
        return validation_error("A title is required!");
    };
    let Some(content) = form.content.filter(|c| !c.trim().is_empty()) else {
        return validation_error("Post content is required!");
    };
    // 请求中没有图片文件按校验错误拒绝
    let Some(image) = form.image else {
        return validation_error("An image file is required!");
    };
    if images::extension_for(&image.content_type).is_none() {
        return validation_error("Invalid mime type");
    }

    // 先上传图片，失败则不落库
    let uploaded = match state
        .images
        .upload(&image.filename, &image.content_type, image.data)
        .await
    {
        Ok(uploaded) => uploaded,
        Err(e) => {
            tracing::error!("Image upload failed for new post: {}", e);
            return upload_failed();
        }
    };

    match Post::create(&state.pool, &title, &content, &uploaded.secure_url, creator).await {
        Ok(post) => (
            StatusCode::CREATED,
            Json(CreatePostResponse {
                message: "Post added successfully".into(),
                post,
            }),
        )
            .into_response(),
        Err(e) => {
            // 保存失败时已上传的图片成为孤儿，只记录，不补偿
            tracing::error!("Failed to save post: {}", e);
            tracing::warn!(
                "Orphaned image left on cloud storage: {}",
                uploaded.secure_url
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                api_message("Server error creating post"),
            )
                .into_response()
        }
    }
}

#[axum::debug_handler]
pub async fn update_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    request: Request,
) -> impl IntoResponse {
    let Some(creator) = caller_id(&claims) else {
        return unauthenticated();
    };

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    // 请求边界上确定图片来源：带文件的 multipart 或携带已有 URL 的 JSON
    let (title, content, image) = if content_type.starts_with("multipart/form-data") {
        let mut multipart = match Multipart::from_request(request, &state).await {
            Ok(multipart) => multipart,
            Err(e) => {
                tracing::debug!("Malformed multipart body: {}", e);
                return validation_error("Invalid form data!");
            }
        };
        let form = match PostForm::read(&mut multipart).await {
            Ok(form) => form,
            Err(e) => {
                tracing::debug!("Malformed multipart body: {}", e);
                return validation_error("Invalid form data!");
            }
        };
        let image = match (form.image, form.image_path) {
            (Some(upload), _) => ImageSource::NewUpload(upload),
            (None, Some(url)) => ImageSource::ExistingUrl(url),
            (None, None) => return validation_error("An image is required!"),
        };
        (form.title, form.content, image)
    } else {
        match Json::<UpdatePostBody>::from_request(request, &state).await {
            Ok(Json(body)) => (
                Some(body.title),
                Some(body.content),
                ImageSource::ExistingUrl(body.image_path),
            ),
            Err(e) => {
                tracing::debug!("Malformed update body: {}", e);
                return validation_error("Invalid form data!");
            }
        }
    };

    let Some(title) = title.filter(|t| !t.trim().is_empty()) else {
        return validation_error("A title is required!");
    };
    let Some(content) = content.filter(|c| !c.trim().is_empty()) else {
        return validation_error("Post content is required!");
    };

    let image_path = match image {
        ImageSource::NewUpload(ImageUpload {
            filename,
            content_type,
            data,
        }) => {
            if images::extension_for(&content_type).is_none() {
                return validation_error("Invalid mime type");
            }
            match state.images.upload(&filename, &content_type, data).await {
                Ok(uploaded) => uploaded.secure_url,
                Err(e) => {
                    tracing::error!("Image upload failed for post {}: {}", id, e);
                    return upload_failed();
                }
            }
        }
        ImageSource::ExistingUrl(url) => {
            if url.trim().is_empty() {
                return validation_error("An image is required!");
            }
            url
        }
    };

    match Post::update_owned(&state.pool, id, creator, &title, &content, &image_path).await {
        Ok(0) => (StatusCode::UNAUTHORIZED, api_message("Not authorized!")).into_response(),
        Ok(_) => (StatusCode::OK, api_message("Update successful!")).into_response(),
        Err(e) => {
            tracing::error!("Failed to update post {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                api_message("Couldn't update post!"),
            )
                .into_response()
        }
    }
}

#[axum::debug_handler]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PostListQuery>,
) -> impl IntoResponse {
    let window = PageWindow::from_query(&query);

    let posts = match Post::list(&state.pool, window).await {
        Ok(posts) => posts,
        Err(e) => {
            tracing::error!("Failed to list posts: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                api_message("Fetching posts failed!"),
            )
                .into_response();
        }
    };

    // 总数不受分页窗口影响，客户端据此计算总页数
    match Post::count(&state.pool).await {
        Ok(max_posts) => (
            StatusCode::OK,
            Json(PostListResponse {
                message: "Posts fetched successfully!".into(),
                posts,
                max_posts,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to count posts: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                api_message("Fetching posts failed!"),
            )
                .into_response()
        }
    }
}

#[axum::debug_handler]
pub async fn get_post(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match Post::find_by_id(&state.pool, id).await {
        Ok(Some(post)) => (StatusCode::OK, Json(post)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, api_message("Post not found!")).into_response(),
        Err(e) => {
            tracing::error!("Failed to fetch post {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                api_message("Fetching post failed!"),
            )
                .into_response()
        }
    }
}

#[axum::debug_handler]
pub async fn delete_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let Some(creator) = caller_id(&claims) else {
        return unauthenticated();
    };

    // 先取图片地址，删除命中与否都要尝试清理远端图片
    let image_path = match Post::find_by_id(&state.pool, id).await {
        Ok(post) => post.map(|post| post.image_path),
        Err(e) => {
            tracing::debug!("Failed to fetch post {} before delete: {}", id, e);
            None
        }
    };

    let deleted = Post::delete_owned(&state.pool, id, creator).await;

    if let Some(path) = image_path {
        if let Some(public_id) = state.images.public_id_from_url(&path) {
            // 远端图片删除失败只记录，不影响响应
            if let Err(e) = state.images.destroy(&public_id).await {
                tracing::error!("Failed to destroy remote image {}: {}", public_id, e);
            }
        }
    }

    match deleted {
        Ok(0) => (StatusCode::UNAUTHORIZED, api_message("Not authorized!")).into_response(),
        Ok(_) => (StatusCode::OK, api_message("Post deleted!")).into_response(),
        Err(e) => {
            tracing::error!("Failed to delete post {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                api_message("Error deleting post!"),
            )
                .into_response()
        }
    }
}
