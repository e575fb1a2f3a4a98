//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_IMAGE_MAX_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_AUDIO_MAX_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 10;
pub const UPLOADS_URL_PREFIX: &str = "/uploads/";
pub const IMAGES_DIR: &str = "images";
pub const AUDIO_DIR: &str = "audio";
pub const MAX_CATEGORY_LEN: usize = 64;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "product-catalog",
    version = VERSION_INFO,
    about = "Per-category product catalog server"
)]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "CATALOG_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "CATALOG_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 'd',
        long,
        env = "CATALOG_DATA_DIR",
        default_value = "data",
        help = "Directory holding products_<category>.json files"
    )]
    pub data_dir: String,
    #[arg(
        short = 'u',
        long,
        env = "CATALOG_UPLOADS_DIR",
        default_value = "uploads",
        help = "Directory for uploaded images and audio"
    )]
    pub uploads_dir: String,
    #[arg(
        long,
        env = "CATALOG_IMAGE_MAX_SIZE",
        default_value_t = DEFAULT_IMAGE_MAX_SIZE,
        help = "Max image upload size in bytes"
    )]
    pub image_max_size: u64,
    #[arg(
        long,
        env = "CATALOG_AUDIO_MAX_SIZE",
        default_value_t = DEFAULT_AUDIO_MAX_SIZE,
        help = "Max audio upload size in bytes"
    )]
    pub audio_max_size: u64,
    #[arg(long, env = "CATALOG_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "CATALOG_UNLOCKED",
        help = "Skip per-category locking around catalog writes"
    )]
    pub unlocked_catalog: bool,
}
