//! Model Persistence
//!
//! 密度異常モデルを gzip 圧縮した JSON として保存・読み込みする。
//! ファイル名は `<name>-v<version>.sgm.gz`。

use super::mixture::DensityEstimator;
use super::model::DensityAnomalyModel;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// 保存ファイルの中身
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "E: DensityEstimator")]
struct StoredModel<E: DensityEstimator> {
    name: String,
    version: u32,
    saved_at: DateTime<Utc>,
    model: DensityAnomalyModel<E>,
}

/// ディレクトリ単位のモデル保存先
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    /// 保存先ディレクトリを指定して作成
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 保存先ディレクトリ
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 名前とバージョンに対応するファイルパス
    pub fn path_for(&self, name: &str, version: u32) -> PathBuf {
        self.root.join(format!("{}-v{}.sgm.gz", name, version))
    }

    /// モデルを保存してパスを返す
    pub fn save<E: DensityEstimator>(
        &self,
        name: &str,
        version: u32,
        model: &DensityAnomalyModel<E>,
    ) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::InvalidParams(format!("invalid model name '{}'", name)));
        }

        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(name, version);

        let stored = StoredModel {
            name: name.to_string(),
            version,
            saved_at: Utc::now(),
            model: model.clone(),
        };
        let json = serde_json::to_vec(&stored)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let compressed = encoder.finish()?;
        std::fs::write(&path, compressed)?;

        info!(path = %path.display(), "Density model saved");
        Ok(path)
    }

    /// モデルを読み込む
    pub fn load<E: DensityEstimator>(&self, name: &str, version: u32) -> Result<DensityAnomalyModel<E>> {
        let path = self.path_for(name, version);
        let compressed = std::fs::read(&path)?;

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;

        let stored: StoredModel<E> = serde_json::from_slice(&json)?;
        if stored.name != name || stored.version != version {
            return Err(Error::InvalidParams(format!(
                "file {} holds {} v{}",
                path.display(),
                stored.name,
                stored.version
            )));
        }

        info!(path = %path.display(), saved_at = %stored.saved_at, "Density model loaded");
        Ok(stored.model)
    }

    /// 保存済みバージョン一覧（昇順）
    pub fn versions(&self, name: &str) -> Result<Vec<u32>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}-v", name);
        let mut versions: Vec<u32> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name().into_string().ok()?;
                file_name
                    .strip_prefix(&prefix)?
                    .strip_suffix(".sgm.gz")?
                    .parse()
                    .ok()
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }
}
