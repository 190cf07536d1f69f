use std::path::{Path, PathBuf};

const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    pub item_catalog: PathBuf,
    pub tick_interval_ms: u64,
    pub world_name: String,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 2 {
            return Err("usage: mudcore <data-root> [item-catalog]".to_string());
        }

        let root = Path::new(&args[1]).to_path_buf();
        let item_catalog = if args.len() > 2 {
            Path::new(&args[2]).to_path_buf()
        } else {
            root.join("dat").join("items.yaml")
        };
        let tick_interval_ms = match std::env::var("MUDCORE_TICK_MS") {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(parsed) if parsed > 0 => parsed,
                _ => {
                    eprintln!(
                        "mudcore: invalid MUDCORE_TICK_MS '{}', using {}",
                        value, DEFAULT_TICK_INTERVAL_MS
                    );
                    DEFAULT_TICK_INTERVAL_MS
                }
            },
            Err(_) => DEFAULT_TICK_INTERVAL_MS,
        };
        let world_name = std::env::var("MUDCORE_WORLD_NAME")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "World".to_string());
        Ok(Self {
            root,
            item_catalog,
            tick_interval_ms,
            world_name,
        })
    }
}
