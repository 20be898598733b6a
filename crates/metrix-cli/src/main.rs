//! 🚀 metrix-cli: the front door, the bouncer, the maitre d' of metrix.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, and lets the library do the heavy lifting.
//! Like a manager. 🦆

use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args (one optional config path, we're not picky)
/// 3. Load config (the moment of truth)
/// 4. Run until ctrl-c
/// 5. Handle errors (cry, then exit 1)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 RUST_LOG wins when set, otherwise info. println! debugging is a lifestyle we moved past.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path_arg = std::env::args().nth(1).unwrap_or_else(|| "metrix.toml".to_string());

    // 🔒 No file is fine (env vars can carry the whole config). An unreadable path is not.
    let config_file = std::path::Path::new(&path_arg);
    let config_file_if_it_exists = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. Relative paths are relative \
             to the current directory, an absolute path removes the guesswork. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let result = match metrix::app_config::load_config(config_file_if_it_exists) {
        Ok(app_config) => metrix::run(app_config).await.map(|_| ()),
        Err(err) => Err(err.context("💀 Couldn't load the configuration, nothing was started")),
    };

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("Connection refused")
                || cause_str.contains("connection refused")
                || cause_str.contains("Could not connect")
                || cause_str.contains("unreachable")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: Redis doesn't seem to be reachable. Check store.redis.host and \
                 store.redis.port, and that the server is actually up. With Docker: \
                 `docker run -p 6379:6379 redis`. Even servers need a nudge sometimes. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}
