//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::stores::RedisStoreConfig;

/// 📦 The AppConfig: one struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📂 Which folder we stare at, unblinking.
    pub watch: WatchConfig,
    /// 🗄️ Where the means end up.
    pub store: StoreConfig,
    /// 🧵 How many workers, how deep the queue.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// 📂 Created on startup if it doesn't exist. Only its direct children are watched.
    #[serde(alias = "watch_directory")]
    pub directory: PathBuf,
}

/// 🎭 Which store to write to. Redis in real life, RAM for dry runs.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StoreConfig {
    Redis(RedisStoreConfig),
    InMemory,
}

/// 🧵 Runtime knobs for the worker pool.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// 📬 How many detected files may wait for a worker before the dispatcher has to wait too.
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub queue_capacity: usize,
    /// 👷 How many files are processed at the same time.
    #[serde(default = "default_worker_parallelism", alias = "num_workers")]
    pub worker_parallelism: usize,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_worker_parallelism() -> usize {
    4
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_parallelism: default_worker_parallelism(),
        }
    }
}

impl AppConfig {
    /// ✅ Catches the configs that parse fine and still make no sense.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.watch.directory.as_os_str().is_empty() {
            bail!("💀 watch.directory is empty. We can't watch nowhere. We tried. It was dark.");
        }
        if let StoreConfig::Redis(redis) = &self.store {
            if redis.host.trim().is_empty() {
                bail!("💀 store.redis.host is empty. Redis has to live somewhere.");
            }
            if redis.port == 0 {
                bail!("💀 store.redis.port is 0. That's not a port, that's a cry for help.");
            }
            if redis.rank_index_key.is_empty() {
                bail!("💀 store.redis.rank_index_key is empty.");
            }
            if redis.connect_timeout_ms == 0 || redis.response_timeout_ms == 0 {
                bail!("💀 store.redis timeouts must be at least 1ms. Zero means giving up before asking.");
            }
        }
        if self.runtime.queue_capacity == 0 {
            bail!("💀 runtime.queue_capacity must be at least 1.");
        }
        if self.runtime.worker_parallelism == 0 {
            bail!("💀 runtime.worker_parallelism must be at least 1. Zero workers process zero files.");
        }
        Ok(())
    }
}

/// 🚀 Load the config from env vars (`METRIX_*`, nested keys split on `__`), plus an optional
/// TOML file layered on top. TOML wins on conflicts.
///
/// 📐 No file → env vars only. Some file → env + file, merged.
///
/// 💀 Returns an error if the config is unparseable or fails [`AppConfig::validate`].
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("METRIX_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (METRIX_*).",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (METRIX_*). \
                 No file was provided, this one's all on the environment."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .validate()
        .context("💀 Configuration parsed, but it doesn't add up")?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 🧪 Runs `check` against a TOML config inside a figment jail: a scratch cwd and an
    /// environment that is restored afterwards, so tests can't leak `METRIX_*` into each other.
    fn with_config_file(
        contents: &str,
        check: impl FnOnce(anyhow::Result<AppConfig>) -> figment::Result<()>,
    ) {
        figment::Jail::expect_with(|jail| {
            jail.create_file("metrix.toml", contents)?;
            check(load_config(Some(Path::new("metrix.toml"))))
        });
    }

    #[test]
    fn the_one_where_everything_is_spelled_out() {
        with_config_file(
            r#"
            [watch]
            directory = "/data/incoming"

            [store.redis]
            host = "redis.local"
            port = 6380
            db = 1
            rank_index_key = "ranked"
            connect_timeout_ms = 750

            [runtime]
            queue_capacity = 8
            worker_parallelism = 3
            "#,
            |loaded| {
                let app_config = loaded.map_err(|err| format!("{err:#}"))?;
                assert_eq!(app_config.watch.directory, PathBuf::from("/data/incoming"));
                assert_eq!(
                    app_config.store,
                    StoreConfig::Redis(RedisStoreConfig {
                        db: 1,
                        rank_index_key: "ranked".into(),
                        connect_timeout_ms: 750,
                        ..RedisStoreConfig::new("redis.local", 6380)
                    })
                );
                assert_eq!(app_config.runtime.queue_capacity, 8);
                assert_eq!(app_config.runtime.worker_parallelism, 3);
                Ok(())
            },
        );
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        with_config_file(
            r#"
            [watch]
            directory = "incoming"

            [store.redis]
            host = "127.0.0.1"
            port = 6379
            "#,
            |loaded| {
                let app_config = loaded.map_err(|err| format!("{err:#}"))?;
                assert_eq!(app_config.runtime, RuntimeConfig::default());
                match app_config.store {
                    StoreConfig::Redis(redis) => {
                        assert_eq!(redis.db, 0);
                        assert_eq!(redis.rank_index_key, "products_by_mean_score");
                        assert_eq!(redis.connect_timeout_ms, 2_000);
                        assert_eq!(redis.response_timeout_ms, 5_000);
                        assert_eq!(redis.connect_retries, 1);
                    }
                    honestly_who_knows => {
                        panic!("💀 Expected Redis, serde took us to {honestly_who_knows:?}")
                    }
                }
                Ok(())
            },
        );
    }

    #[test]
    fn the_one_where_the_old_knob_names_still_answer() {
        with_config_file(
            r#"
            store = "in_memory"

            [watch]
            watch_directory = "incoming"

            [runtime]
            channel_size = 12
            num_workers = 2
            "#,
            |loaded| {
                let app_config = loaded.map_err(|err| format!("{err:#}"))?;
                assert_eq!(app_config.store, StoreConfig::InMemory);
                assert_eq!(app_config.watch.directory, PathBuf::from("incoming"));
                assert_eq!(app_config.runtime.queue_capacity, 12);
                assert_eq!(app_config.runtime.worker_parallelism, 2);
                Ok(())
            },
        );
    }

    #[test]
    fn the_one_where_the_store_is_missing_and_startup_refuses() {
        with_config_file(
            r#"
            [watch]
            directory = "incoming"
            "#,
            |loaded| {
                assert!(loaded.is_err(), "💀 no store, no startup");
                Ok(())
            },
        );
    }

    #[test]
    fn the_one_where_port_zero_is_rejected() {
        with_config_file(
            r#"
            [watch]
            directory = "incoming"

            [store.redis]
            host = "127.0.0.1"
            port = 0
            "#,
            |loaded| {
                let err = loaded.expect_err("💀 port 0 must not pass");
                assert!(format!("{err:#}").contains("port"), "{err:#}");
                Ok(())
            },
        );
    }

    #[test]
    fn the_one_where_zero_workers_is_rejected() {
        let config = AppConfig {
            watch: WatchConfig {
                directory: "incoming".into(),
            },
            store: StoreConfig::InMemory,
            runtime: RuntimeConfig {
                queue_capacity: 1,
                worker_parallelism: 0,
            },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn the_one_where_the_environment_does_all_the_talking() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("METRIX_WATCH__DIRECTORY", "/env/incoming");
            jail.set_env("METRIX_STORE__REDIS__HOST", "env-redis");
            jail.set_env("METRIX_STORE__REDIS__PORT", "6390");
            jail.set_env("METRIX_RUNTIME__WORKER_PARALLELISM", "7");

            let app_config = load_config(None).map_err(|err| format!("{err:#}"))?;

            assert_eq!(app_config.watch.directory, PathBuf::from("/env/incoming"));
            assert_eq!(app_config.runtime.worker_parallelism, 7);
            match app_config.store {
                StoreConfig::Redis(redis) => {
                    assert_eq!(redis.host, "env-redis");
                    assert_eq!(redis.port, 6390);
                }
                other => panic!("💀 Expected Redis from env, got {other:?}"),
            }
            Ok(())
        });
    }
}
