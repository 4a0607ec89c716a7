use clap::{Parser, Subcommand};
use retrace_cli::{open_device, parse_memory_flags, selftest};
use retrace_core::config::{default_config_path, RetraceConfig};
use retrace_replay::driver::DeviceDriver;
use retrace_replay::MemoryTypeReconciler;

#[derive(Parser)]
#[command(name = "retrace")]
#[command(about = "Retrace - Vulkan trace replay core")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the memory types of a replay device
    Probe {
        /// Physical device index
        #[arg(short, long, default_value_t = 0)]
        device: usize,
    },

    /// Show which replay memory type a captured allocation would use
    Remap {
        /// Physical device index
        #[arg(short, long, default_value_t = 0)]
        device: usize,

        /// Captured memory type index
        #[arg(short, long)]
        index: u32,

        /// Captured property flags, comma separated (e.g. DEVICE_LOCAL,HOST_VISIBLE)
        #[arg(short, long, default_value = "")]
        flags: String,
    },

    /// Run a short replay against a headless device and report each step
    Selftest {
        /// Physical device index
        #[arg(short, long, default_value_t = 0)]
        device: usize,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = RetraceConfig::load_or_default(&config_path);

    let filter = config.logging.filter.as_deref().unwrap_or("info");
    retrace_common::init_logging_with_default(filter);

    match cli.command {
        Commands::Probe { device } => {
            let (driver, _) = open_device(device)?;
            let properties = driver.memory_properties();

            println!("Replay device {} ({})", device, retrace_common::platform::platform_name());
            println!();
            println!("  Memory heaps:");
            for i in 0..properties.memory_heap_count as usize {
                let heap = properties.memory_heaps[i];
                println!(
                    "    {}: {} MB {:?}",
                    i,
                    heap.size / (1024 * 1024),
                    heap.flags
                );
            }
            println!();
            println!("  Memory types:");
            for i in 0..properties.memory_type_count as usize {
                let ty = properties.memory_types[i];
                println!("    {}: heap {} {:?}", i, ty.heap_index, ty.property_flags);
            }
        }

        Commands::Remap {
            device,
            index,
            flags,
        } => {
            let flags = parse_memory_flags(&flags)?;
            let (driver, _) = open_device(device)?;
            let reconciler = if config.replay.remap_memory_types {
                MemoryTypeReconciler::new(driver.memory_properties())
            } else {
                MemoryTypeReconciler::disabled(driver.memory_properties())
            };

            let result = reconciler.reconcile(index, flags);
            println!("Captured type {} ({:?})", index, flags);
            println!("  -> replay type {} via {:?}", result.index, result.path);
            match reconciler.type_flags(result.index) {
                Some(replay_flags) => println!("     replay flags: {:?}", replay_flags),
                None => println!("     replay device has no type {}", result.index),
            }
        }

        Commands::Selftest { device, json } => {
            let results = selftest::run(&config_path, device);
            if json {
                selftest::print_results_json(&results);
            } else {
                selftest::print_results_pretty(&results);
            }
            if selftest::any_failed(&results) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
