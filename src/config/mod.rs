use std::env;
use std::time::Duration;

const CLOUDINARY_API_BASE: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub cloudinary_api_base: String,
    pub cloudinary_cloud_name: String,
    pub cloudinary_api_key: String,
    pub cloudinary_api_secret: String,
    pub cloudinary_folder: String,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        // 令牌有效期以小时配置，默认1小时
        let jwt_expiration = env::var("JWT_EXPIRATION")
            .unwrap_or_else(|_| "1h".into())
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(1);
        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".into()),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")?.parse().unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")?.parse().unwrap_or(100),
            cloudinary_api_base: env::var("CLOUDINARY_API_BASE")
                .unwrap_or_else(|_| CLOUDINARY_API_BASE.into()),
            cloudinary_cloud_name: env::var("CLOUDINARY_CLOUD_NAME")?,
            cloudinary_api_key: env::var("CLOUDINARY_API_KEY")?,
            cloudinary_api_secret: env::var("CLOUDINARY_API_SECRET")?,
            cloudinary_folder: env::var("CLOUDINARY_FOLDER")
                .unwrap_or_else(|_| "postboard".into()),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}
