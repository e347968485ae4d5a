use anyhow::{bail, Result};
use common::HeapError;
use smol_str::format_smolstr;
use std::path::PathBuf;
use storage::page::DEFAULT_PAGE_SIZE;

pub const PAGE_SIZE_ENV: &str = "PG_HEAP_PAGE_SIZE";
pub const PARALLEL_ENV: &str = "PG_HEAP_PARALLEL";
pub const DATA_DIR_ENV: &str = "PG_HEAP_DATA_DIR";

pub const MIN_PAGE_SIZE: usize = 1024;
/// Line pointer offsets and lengths are 15 bits wide.
pub const MAX_PAGE_SIZE: usize = 32768;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// `BLCKSZ` of the cluster that wrote the files.
    pub page_size: usize,
    /// Decode pages on the rayon pool.
    pub parallel: bool,
    /// Base for relative relation paths (`pg_relation_filepath`).
    pub data_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            parallel: false,
            data_directory: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults overlaid with whatever `lookup` returns
    /// for the `PG_HEAP_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(PAGE_SIZE_ENV) {
            config.page_size = match value.trim().parse() {
                Ok(size) => size,
                Err(_) => bail!(HeapError::InvalidConfig(format_smolstr!(
                    "{}={:?} is not a number",
                    PAGE_SIZE_ENV,
                    value
                ))),
            };
        }
        if let Some(value) = lookup(PARALLEL_ENV) {
            config.parallel = parse_bool(PARALLEL_ENV, &value)?;
        }
        if let Some(value) = lookup(DATA_DIR_ENV) {
            if !value.is_empty() {
                config.data_directory = Some(PathBuf::from(value));
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            bail!(HeapError::InvalidConfig(format_smolstr!(
                "page size {} is not a power of two between {} and {}",
                self.page_size,
                MIN_PAGE_SIZE,
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" | "" => Ok(false),
        _ => bail!(HeapError::InvalidConfig(format_smolstr!(
            "{}={:?} is not a boolean",
            key,
            value
        ))),
    }
}
