//! Typed configuration map. CLI and ini-file parsing are the caller's
//! business; the core only ever sees registered, typed items.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
    StrList(Vec<String>),
}

/// Descriptor for one recognised option.
#[derive(Debug, Clone)]
pub struct ConfigItem {
    pub name: &'static str,
    pub default: Option<ConfigValue>,
    /// Values are file names and get normalised to absolute paths on `set`.
    pub is_path: bool,
}

impl ConfigItem {
    pub fn new(name: &'static str) -> Self {
        ConfigItem {
            name,
            default: None,
            is_path: false,
        }
    }

    pub fn with_default(name: &'static str, default: ConfigValue) -> Self {
        ConfigItem {
            name,
            default: Some(default),
            is_path: false,
        }
    }

    pub fn path(name: &'static str) -> Self {
        ConfigItem {
            name,
            default: None,
            is_path: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct Config {
    items: HashMap<&'static str, ConfigItem>,
    values: HashMap<&'static str, ConfigValue>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn register(&mut self, item: ConfigItem) {
        if let Some(default) = &item.default {
            self.values.entry(item.name).or_insert_with(|| default.clone());
        }
        self.items.insert(item.name, item);
    }

    pub fn set(&mut self, name: &str, value: ConfigValue) -> Result<(), Error> {
        let item = self
            .items
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown option \"{}\"", name)))?;
        let value = if item.is_path {
            match value {
                ConfigValue::Str(path) => ConfigValue::Str(absolute_path(&path)),
                ConfigValue::StrList(paths) => {
                    ConfigValue::StrList(paths.iter().map(|p| absolute_path(p)).collect())
                }
                other => other,
            }
        } else {
            value
        };
        self.values.insert(item.name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ConfigValue::Str(val)) => Some(val.as_str()),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ConfigValue::Bool(true)))
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ConfigValue::Int(val)) => Some(*val),
            _ => None,
        }
    }

    pub fn get_str_list(&self, name: &str) -> Option<&[String]> {
        match self.values.get(name) {
            Some(ConfigValue::StrList(vals)) => Some(vals.as_slice()),
            _ => None,
        }
    }
}

fn absolute_path(path: &str) -> String {
    let p = Path::new(path);
    let abs: PathBuf = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(p))
            .unwrap_or_else(|_| p.to_path_buf())
    };
    abs.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::new();
        config.register(ConfigItem::with_default(
            "logging",
            ConfigValue::Str("error".to_string()),
        ));
        config.register(ConfigItem::new("endpoint"));
        config.register(ConfigItem::path("ca_certs"));
        config
    }

    #[test]
    fn defaults_apply() {
        let config = config();
        assert_eq!(config.get_str("logging"), Some("error"));
        assert_eq!(config.get_str("endpoint"), None);
    }

    #[test]
    fn unknown_option_rejected() {
        let mut config = config();
        let err = config
            .set("no_such_option", ConfigValue::Bool(true))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn paths_are_normalised() {
        let mut config = config();
        config
            .set("ca_certs", ConfigValue::Str("certs/ca.pem".to_string()))
            .unwrap();
        let val = config.get_str("ca_certs").unwrap();
        assert!(Path::new(val).is_absolute());
        assert!(val.ends_with("ca.pem"));
    }
}
