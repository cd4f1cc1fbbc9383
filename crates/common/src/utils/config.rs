use ::config::{Config, Environment, File};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads configuration from zero or more files, later files overriding
/// earlier ones, and finally the process environment on top. The format of
/// each file follows its extension (TOML, YAML, JSON, ...).
///
/// Environment variable names are lowercased, so `FAUCET_PORT=8080` in the
/// environment and `"faucet_port": 8080` in a JSON file set the same field.
pub fn load_layered<T: DeserializeOwned, P: AsRef<Path>>(paths: &[P]) -> Result<T> {
    let mut builder = Config::builder();

    for path in paths {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        builder = builder.add_source(File::from(path));
    }

    builder = builder.add_source(Environment::default());

    let settings = builder
        .build()
        .context("Failed to build configuration")?;

    settings
        .try_deserialize::<T>()
        .context("Failed to deserialize configuration")
}
