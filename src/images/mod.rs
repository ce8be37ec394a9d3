use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("image service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("image service rejected the request with status {status}")]
    Rejected { status: u16 },
}

/// 上传成功后由图片服务返回的定位信息
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub secure_url: String,
    pub public_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
}

// 允许的图片类型及其落盘扩展名
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

// 客户端文件名转存储名：小写、空格换连字符、毫秒时间戳后缀
fn stored_name(original: &str) -> String {
    let stem = original
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(original);
    let name = stem
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    format!("{}-{}", name, Utc::now().timestamp_millis())
}

/// 图片附件服务客户端，上传/删除走 Cloudinary 风格的签名接口
#[derive(Clone)]
pub struct ImageStore {
    http: reqwest::Client,
    api_base: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
    folder: String,
}

impl ImageStore {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.cloudinary_api_base.trim_end_matches('/').to_string(),
            cloud_name: config.cloudinary_cloud_name.clone(),
            api_key: config.cloudinary_api_key.clone(),
            api_secret: config.cloudinary_api_secret.clone(),
            folder: config.cloudinary_folder.clone(),
        }
    }

    // 请求签名：参数按键名排序拼接后连同密钥做 SHA-256
    fn sign(&self, params: &[(&str, &str)]) -> String {
        let mut sorted = params.to_vec();
        sorted.sort();
        let joined = sorted
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        hasher.update(self.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn upload(
        &self,
        original_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<UploadedImage, ImageError> {
        let extension = extension_for(content_type)
            .ok_or_else(|| ImageError::UnsupportedType(content_type.to_string()))?;

        let public_id = stored_name(original_name);
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[
            ("folder", &self.folder),
            ("public_id", &public_id),
            ("timestamp", &timestamp),
        ]);

        let file = Part::bytes(data)
            .file_name(format!("{}.{}", public_id, extension))
            .mime_str(content_type)?;
        let form = Form::new()
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", self.folder.clone())
            .text("public_id", public_id)
            .text("signature", signature)
            .part("file", file);

        let response = self
            .http
            .post(format!("{}/{}/image/upload", self.api_base, self.cloud_name))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ImageError::Rejected {
                status: response.status().as_u16(),
            });
        }

        let body: UploadResponse = response.json().await?;
        Ok(UploadedImage {
            secure_url: body.secure_url,
            public_id: body.public_id,
        })
    }

    pub async fn destroy(&self, public_id: &str) -> Result<(), ImageError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", public_id), ("timestamp", &timestamp)]);

        let form = Form::new()
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("public_id", public_id.to_string())
            .text("signature", signature);

        let response = self
            .http
            .post(format!(
                "{}/{}/image/destroy",
                self.api_base, self.cloud_name
            ))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ImageError::Rejected {
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    /// 从已存储的图片 URL 反推公共ID，用于删除
    pub fn public_id_from_url(&self, url: &str) -> Option<String> {
        let tail = url.rsplit('/').next().filter(|tail| !tail.is_empty())?;
        let stem = tail.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(tail);
        if stem.is_empty() {
            return None;
        }
        Some(format!("{}/{}", self.folder, stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> ImageStore {
        ImageStore {
            http: reqwest::Client::new(),
            api_base: "https://api.cloudinary.com/v1_1".into(),
            cloud_name: "demo".into(),
            api_key: "key".into(),
            api_secret: "secret".into(),
            folder: "postboard".into(),
        }
    }

    #[test]
    fn extension_map_matches_allowed_types() {
        assert_eq!(extension_for("image/png"), Some("png"));
        assert_eq!(extension_for("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for("image/jpg"), Some("jpg"));
        assert_eq!(extension_for("image/gif"), Some("gif"));
        assert_eq!(extension_for("application/pdf"), None);
    }

    #[test]
    fn stored_name_is_lowercased_and_hyphenated() {
        let name = stored_name("My Summer Photo.PNG");
        assert!(name.starts_with("my-summer-photo-"));
        let suffix = name.rsplit('-').next().unwrap();
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn public_id_is_derived_from_the_url_tail() {
        let store = test_store();
        assert_eq!(
            store
                .public_id_from_url(
                    "https://res.cloudinary.com/demo/image/upload/v1/postboard/my-photo-17.png"
                )
                .as_deref(),
            Some("postboard/my-photo-17")
        );
        assert_eq!(store.public_id_from_url(""), None);
        assert_eq!(store.public_id_from_url("https://host/path/"), None);
    }

    #[test]
    fn signature_sorts_parameters_before_hashing() {
        let store = test_store();
        let forward = store.sign(&[("folder", "postboard"), ("timestamp", "100")]);
        let reversed = store.sign(&[("timestamp", "100"), ("folder", "postboard")]);
        assert_eq!(forward, reversed);
        assert_eq!(forward.len(), 64);
    }
}
