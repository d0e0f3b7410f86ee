//! Configuration
//!
//! デフォルト値 → TOMLファイル → 環境変数（`NIDS_TUNER__SEARCH__POPULATION_SIZE` など）の順に重ねて読み込む。

use crate::density::DensityConfig;
use crate::error::Result;
use crate::logging::LogConfig;
use crate::optimization::{ObjectiveSet, ParameterSpace, SearchConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// 環境変数のプレフィックス
pub const ENV_PREFIX: &str = "NIDS_TUNER";
/// 環境変数のキー区切り
pub const ENV_SEPARATOR: &str = "__";

/// ツール全体の設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// 探索設定
    pub search: SearchConfig,
    /// 密度モデル設定
    pub density: DensityConfig,
    /// ログ設定
    pub logging: LogConfig,
}

impl TunerConfig {
    /// 設定を読み込む
    ///
    /// `path` が指定されていればそのファイルを必須として読む。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings =
            config::Config::builder().add_source(config::Config::try_from(&TunerConfig::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            settings = settings.add_source(config::File::from(path).required(true));
        }

        settings = settings.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: TunerConfig = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// TOML文字列から読み込む（環境変数は見ない）
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: TunerConfig = config::Config::builder()
            .add_source(config::Config::try_from(&TunerConfig::default())?)
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 設定を検証
    pub fn validate(&self) -> Result<()> {
        self.search.validate()?;
        ParameterSpace::new(self.search.bounds.clone())?;
        ObjectiveSet::new(self.search.objectives.clone())?;
        self.density.validate()
    }
}
