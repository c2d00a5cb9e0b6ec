//! 容器配置
//!
//! `ContainerConfig` 控制容器的行为开关和各种上限；`ApplicationSettings` 把容器配置和
//! 日志配置组合在一起，可以从 TOML 加载：
//!
//! ```toml
//! [container]
//! allow_definition_overriding = true
//! max_creation_depth = 128
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::constants::{DEFAULT_MAX_ALIAS_CHAIN, DEFAULT_MAX_CREATION_DEPTH, DEFAULT_MAX_PARENT_DEPTH};
use crate::logging::LoggingConfig;
use crate::{ContainerError, ContainerResult};

/// 容器行为配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// 是否允许同名定义覆盖（默认：false）
    pub allow_definition_overriding: bool,

    /// 是否允许别名重新指向其他目标（默认：false）
    pub allow_alias_overriding: bool,

    /// 是否允许通过早期引用解决循环引用（默认：true）
    pub allow_circular_references: bool,

    /// 早期引用被包装替换后，是否仍允许依赖方持有原始实例（默认：false）
    pub allow_raw_injection_despite_wrapping: bool,

    /// 别名链最大长度
    pub max_alias_chain: usize,

    /// 父定义链最大深度
    pub max_parent_depth: usize,

    /// 单线程创建路径最大深度
    pub max_creation_depth: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            allow_definition_overriding: false,
            allow_alias_overriding: false,
            allow_circular_references: true,
            allow_raw_injection_despite_wrapping: false,
            max_alias_chain: DEFAULT_MAX_ALIAS_CHAIN,
            max_parent_depth: DEFAULT_MAX_PARENT_DEPTH,
            max_creation_depth: DEFAULT_MAX_CREATION_DEPTH,
        }
    }
}

impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allow_definition_overriding(mut self, allow: bool) -> Self {
        self.allow_definition_overriding = allow;
        self
    }

    pub fn with_allow_alias_overriding(mut self, allow: bool) -> Self {
        self.allow_alias_overriding = allow;
        self
    }

    pub fn with_allow_circular_references(mut self, allow: bool) -> Self {
        self.allow_circular_references = allow;
        self
    }

    pub fn with_allow_raw_injection_despite_wrapping(mut self, allow: bool) -> Self {
        self.allow_raw_injection_despite_wrapping = allow;
        self
    }

    pub fn with_max_alias_chain(mut self, max: usize) -> Self {
        self.max_alias_chain = max;
        self
    }

    pub fn with_max_parent_depth(mut self, max: usize) -> Self {
        self.max_parent_depth = max;
        self
    }

    pub fn with_max_creation_depth(mut self, max: usize) -> Self {
        self.max_creation_depth = max;
        self
    }

    /// 检查上限是否合法
    pub fn validate(&self) -> ContainerResult<()> {
        for (key, value) in [
            ("max_alias_chain", self.max_alias_chain),
            ("max_parent_depth", self.max_parent_depth),
            ("max_creation_depth", self.max_creation_depth),
        ] {
            if value == 0 {
                return Err(ContainerError::Config(format!("'{}' must be greater than 0", key)));
            }
        }
        Ok(())
    }
}

/// 应用配置（容器 + 日志）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub container: ContainerConfig,
    pub logging: LoggingConfig,
}

impl ApplicationSettings {
    /// 从 TOML 字符串加载
    pub fn from_toml_str(content: &str) -> ContainerResult<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| ContainerError::Config(format!("Failed to parse TOML: {}", e)))?;
        settings.container.validate()?;
        Ok(settings)
    }

    /// 从 TOML 文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> ContainerResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ContainerError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loading settings from {}", path.display());
        Self::from_toml_str(&content)
    }
}
