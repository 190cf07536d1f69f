mod config;
pub mod entities;
pub mod telemetry;
pub mod world;

pub use world::holder::{Holder, HolderRef, Thing};
pub use world::outcome::Outcome;
pub use world::state::{World, WorldEvent};
pub use world::transfer::MoveResult;

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::logging::init(&config.root)?;
    let item_types = world::item_types::load_item_catalog(&config.item_catalog)?;
    telemetry::logging::log_game(&format!(
        "world '{}' starting with {} item types",
        config.world_name,
        item_types.len()
    ));
    println!("mudcore: {}", config.world_name);
    println!("- root: {}", config.root.display());
    println!("- item catalog: {}", config.item_catalog.display());
    println!("- item types: {}", item_types.len());
    println!("- tick interval: {}ms", config.tick_interval_ms);

    let mut world = world::state::World::new(item_types);
    let started = std::time::Instant::now();
    loop {
        let now_ms = started.elapsed().as_millis() as u64;
        world.tick(now_ms);
        // Headless loop: no presentation layer is attached, so queued
        // events are drained and discarded.
        world.take_events();
        std::thread::sleep(std::time::Duration::from_millis(config.tick_interval_ms));
    }
}
