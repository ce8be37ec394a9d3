use axum::extract::{Multipart, multipart::MultipartError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(rename = "imagePath")]
    pub image_path: String,
    pub creator: Uuid,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CreatePostResponse {
    pub message: String,
    pub post: Post,
}

#[derive(Debug, Serialize)]
pub struct PostListResponse {
    pub message: String,
    pub posts: Vec<Post>,
    #[serde(rename = "maxPosts")]
    pub max_posts: i64,
}

#[derive(Debug, Deserialize)]
pub struct PostListQuery {
    pub pagesize: Option<i64>,
    pub page: Option<i64>,
}

// JSON 形式的更新请求，图片以已有 URL 给出；多余字段忽略
#[derive(Debug, Deserialize)]
pub struct UpdatePostBody {
    pub title: String,
    pub content: String,
    #[serde(rename = "imagePath")]
    pub image_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: i64,
    pub offset: i64,
}

impl PageWindow {
    // 两个参数都存在且为正数时才启用分页
    pub fn from_query(query: &PostListQuery) -> Option<Self> {
        match (query.pagesize, query.page) {
            (Some(size), Some(page)) if size > 0 && page > 0 => Some(PageWindow {
                limit: size,
                offset: size * (page - 1),
            }),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// 更新请求中图片的两种来源，在请求边界上显式区分
#[derive(Debug)]
pub enum ImageSource {
    NewUpload(ImageUpload),
    ExistingUrl(String),
}

#[derive(Debug, Default)]
pub struct PostForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image: Option<ImageUpload>,
    pub image_path: Option<String>,
}

impl PostForm {
    pub async fn read(multipart: &mut Multipart) -> Result<Self, MultipartError> {
        let mut form = PostForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "title" => form.title = Some(field.text().await?),
                "content" => form.content = Some(field.text().await?),
                "imagePath" => form.image_path = Some(field.text().await?),
                "image" => {
                    let filename = field.file_name().unwrap_or("upload").to_string();
                    let content_type = field.content_type().unwrap_or_default().to_string();
                    form.image = Some(ImageUpload {
                        filename,
                        content_type,
                        data: field.bytes().await?.to_vec(),
                    });
                }
                _ => {}
            }
        }
        Ok(form)
    }
}

impl Post {
    pub async fn create(
        pool: &PgPool,
        title: &str,
        content: &str,
        image_path: &str,
        creator: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (id, title, content, image_path, creator)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, title, content, image_path, creator, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(content)
        .bind(image_path)
        .bind(creator)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Post>(
            r#"
            SELECT id, title, content, image_path, creator, created_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(pool: &PgPool, window: Option<PageWindow>) -> Result<Vec<Self>, sqlx::Error> {
        match window {
            Some(window) => {
                sqlx::query_as::<_, Post>(
                    r#"
                    SELECT id, title, content, image_path, creator, created_at
                    FROM posts
                    ORDER BY created_at, id
                    LIMIT $1 OFFSET $2
                    "#,
                )
                .bind(window.limit)
                .bind(window.offset)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Post>(
                    r#"
                    SELECT id, title, content, image_path, creator, created_at
                    FROM posts
                    ORDER BY created_at, id
                    "#,
                )
                .fetch_all(pool)
                .await
            }
        }
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts")
            .fetch_one(pool)
            .await
    }

    /// 以 (id, creator) 为条件的单条原子更新，命中行数为授权判定的唯一依据
    pub async fn update_owned(
        pool: &PgPool,
        id: Uuid,
        creator: Uuid,
        title: &str,
        content: &str,
        image_path: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET title = $1, content = $2, image_path = $3
            WHERE id = $4 AND creator = $5
            "#,
        )
        .bind(title)
        .bind(content)
        .bind(image_path)
        .bind(id)
        .bind(creator)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// 同上，删除版本
    pub async fn delete_owned(pool: &PgPool, id: Uuid, creator: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND creator = $2")
            .bind(id)
            .bind(creator)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}
