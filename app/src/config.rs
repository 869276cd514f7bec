use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub supabase_url: String,
    pub photo_bucket: String,
    pub video_bucket: String,
    pub folder: String,
    pub page_size: usize,
    pub prefetch_ahead: usize,
    pub device_class: String,
    pub native_share: bool,
    pub save_dir: PathBuf,
    pub cache_path: PathBuf,
    pub date_map_path: Option<PathBuf>,
}

pub struct AppConfigOverrides {
    pub log_level: Option<String>,
    pub supabase_url: Option<String>,
    pub folder: Option<String>,
    pub prefetch_ahead: Option<usize>,
    pub device_class: Option<String>,
    pub date_map_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load_from(path: Option<PathBuf>) -> Self {
        let mut builder = config::Config::builder();
        let path = match path {
            Some(p) => p,
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".camroll")
                .join("config"),
        };
        builder = builder.add_source(config::File::from(path).required(false));
        let cfg = builder.build().unwrap_or_default();

        let log_level = cfg
            .get_string("log_level")
            .unwrap_or_else(|_| "info".to_string());
        let supabase_url = cfg
            .get_string("supabase_url")
            .unwrap_or_else(|_| String::new());
        let photo_bucket = cfg
            .get_string("photo_bucket")
            .unwrap_or_else(|_| "photos".to_string());
        let video_bucket = cfg
            .get_string("video_bucket")
            .unwrap_or_else(|_| "videos".to_string());
        let folder = cfg
            .get_string("folder")
            .unwrap_or_else(|_| "2025".to_string());
        let page_size = cfg.get_int("page_size").unwrap_or(100) as usize;
        let prefetch_ahead = cfg.get_int("prefetch_ahead").unwrap_or(5) as usize;
        let device_class = cfg
            .get_string("device_class")
            .unwrap_or_else(|_| "desktop".to_string());
        let native_share = cfg.get_bool("native_share").unwrap_or(false);
        let save_dir = cfg
            .get_string("save_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::download_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
            });
        let cache_path = cfg
            .get_string("cache_path")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".camroll")
            });
        let date_map_path = cfg.get_string("date_map_path").map(PathBuf::from).ok();

        Self {
            log_level,
            supabase_url,
            photo_bucket,
            video_bucket,
            folder,
            page_size,
            prefetch_ahead,
            device_class,
            native_share,
            save_dir,
            cache_path,
            date_map_path,
        }
    }

    pub fn apply_overrides(mut self, ov: &AppConfigOverrides) -> Self {
        if let Some(l) = &ov.log_level {
            self.log_level = l.clone();
        }
        if let Some(u) = &ov.supabase_url {
            self.supabase_url = u.clone();
        }
        if let Some(f) = &ov.folder {
            self.folder = f.clone();
        }
        if let Some(k) = ov.prefetch_ahead {
            self.prefetch_ahead = k;
        }
        if let Some(d) = &ov.device_class {
            self.device_class = d.clone();
        }
        if let Some(p) = &ov.date_map_path {
            self.date_map_path = Some(p.clone());
        }
        self
    }

    pub fn save_to(&self, path: Option<PathBuf>) -> std::io::Result<()> {
        let path = match path {
            Some(p) => p,
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".camroll")
                .join("config"),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, data)
    }
}
