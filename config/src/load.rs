use std::{
    io,
    path::{Path, PathBuf},
};

use rust_cli_config::{File, builder::DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Stem of the file every environment starts from.
const BASE_FILE_STEM: &str = "base";

/// Extensions tried, in order, for each configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variable overrides, as in `APP_PUSH__IO_THREADS`.
const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";
const LIST_SEPARATOR: &str = ",";

/// Implemented by configuration roots that can be loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment override is split on commas into a list.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    /// None of the supported extensions exist for a required file.
    #[error("no `{stem}` configuration file in `{directory}`, tried: {tried}")]
    MissingFile {
        stem: &'static str,
        directory: PathBuf,
        tried: String,
    },

    /// A file exists but cannot be parsed.
    #[error("failed to load `{path}`: {source}")]
    InvalidFile {
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to merge configuration sources: {0}")]
    Merge(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads configuration from `./configuration` and `APP_` environment variables.
///
/// `base.*` is read first, then the file named after `APP_ENVIRONMENT` (default `dev`). Each file
/// may be YAML or JSON. Environment variables such as
/// `APP_PUSH__MAX_IN_FLIGHT_BATCHES_PER_ENDPOINT=4` are applied last.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&current_dir.join(CONFIGURATION_DIR), environment)
}

/// Loads configuration from an explicit directory and environment.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let mut builder = rust_cli_config::Config::builder();
    for stem in [BASE_FILE_STEM, environment.as_str()] {
        let path = locate_file(directory, stem)?;
        builder = add_file(builder, path)?;
    }

    builder
        .add_source(env_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Merge)?
        .try_deserialize()
        .map_err(LoadConfigError::Deserialization)
}

/// Adds `path` to `builder`, failing with the file's name if it does not parse on its own.
fn add_file(
    builder: rust_cli_config::ConfigBuilder<DefaultState>,
    path: PathBuf,
) -> Result<rust_cli_config::ConfigBuilder<DefaultState>, LoadConfigError> {
    let builder = builder.add_source(File::from(path.as_path()));

    match builder.build_cloned() {
        Ok(_) => Ok(builder),
        Err(source) => Err(LoadConfigError::InvalidFile { path, source }),
    }
}

fn locate_file(directory: &Path, stem: &'static str) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .collect();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    let tried = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::MissingFile {
        stem,
        directory: directory.to_path_buf(),
        tried,
    })
}

fn env_overrides<T: Config>() -> rust_cli_config::Environment {
    let mut source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if !T::LIST_PARSE_KEYS.is_empty() {
        source = source.list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            source = source.with_list_parse_key(key);
        }
    }

    source
}
