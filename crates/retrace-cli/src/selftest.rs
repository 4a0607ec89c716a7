use ash::vk;
use retrace_core::config::RetraceConfig;
use retrace_core::{CapturedId, ObjectKind};
use retrace_replay::driver::DeviceDriver;
use retrace_replay::wrappers::DeviceInfo;
use retrace_replay::{ReconcilePath, ReplayCommand, ReplayResponse, ReplaySession};

const DEVICE: CapturedId = CapturedId(1);

// ── Check result types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skip,
}

#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub details: Vec<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.to_string(),
            details: Vec::new(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    fn skip(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Skip, message)
    }

    fn detail(mut self, detail: &str) -> Self {
        self.details.push(detail.to_string());
        self
    }
}

pub fn any_failed(results: &[CheckResult]) -> bool {
    results
        .iter()
        .any(|r| matches!(r.status, CheckStatus::Fail))
}

// ── Main entry point ────────────────────────────────────────────────────────

pub fn run(config_path: &str, device_index: usize) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let config = check_config(config_path, &mut results);

    let (driver, queue) = match crate::open_device(device_index) {
        Ok((driver, queue)) => {
            results.push(CheckResult::pass(
                "Headless device",
                &format!("Opened physical device {}", device_index),
            ));
            (driver, queue)
        }
        Err(e) => {
            results.push(CheckResult::fail("Headless device", &e.to_string()));
            for name in ["Memory types", "Device queue", "Buffer round trip", "Offscreen swapchain"] {
                results.push(CheckResult::skip(name, "No device"));
            }
            return results;
        }
    };

    check_memory_types(driver.as_ref(), &mut results);

    let session = ReplaySession::new(config);
    let info = DeviceInfo::new(
        vk::PhysicalDeviceFeatures::default(),
        vec![vk::DeviceQueueCreateFlags::empty(); queue.family as usize + 1],
    );
    if let Err(e) = session.register_device(DEVICE, driver.clone(), queue.family, queue.index, info) {
        results.push(CheckResult::fail("Replay session", &e.to_string()));
        return results;
    }
    check_device_queue(&session, queue.family, queue.index, &mut results);

    check_buffer_round_trip(&session, &mut results);
    check_offscreen_swapchain(&session, &mut results);

    // Queues and surfaces have no destroy command in the replay stream.
    let summary: Vec<_> = session
        .summary()
        .into_iter()
        .filter(|(kind, _)| {
            !matches!(kind, ObjectKind::Device | ObjectKind::Queue | ObjectKind::Surface)
        })
        .collect();
    if !summary.is_empty() {
        results.push(
            CheckResult::warn("Teardown", "Objects still tracked after the replay")
                .detail(&format!("{:?}", summary)),
        );
    }
    session.unregister_device(DEVICE);
    drop(session);
    drop(driver);
    results
}

// ── Check 1: Configuration ──────────────────────────────────────────────────

fn check_config(config_path: &str, results: &mut Vec<CheckResult>) -> RetraceConfig {
    if !std::path::Path::new(config_path).exists() {
        results.push(
            CheckResult::warn(
                "Configuration",
                &format!("Config file not found: {}", config_path),
            )
            .detail("Using default configuration"),
        );
        return RetraceConfig::default();
    }

    match RetraceConfig::load(config_path) {
        Ok(config) => {
            results.push(
                CheckResult::pass("Configuration", &format!("Loaded from {}", config_path))
                    .detail(&format!("Offscreen swapchain: {}", config.replay.offscreen_swapchain))
                    .detail(&format!("Mapped fast path: {}", config.replay.allow_mapped_fast_path))
                    .detail(&format!("Memory type remapping: {}", config.replay.remap_memory_types)),
            );
            config
        }
        Err(e) => {
            results.push(CheckResult::fail(
                "Configuration",
                &format!("Failed to parse {}: {}", config_path, e),
            ));
            RetraceConfig::default()
        }
    }
}

// ── Check 2: Memory types ───────────────────────────────────────────────────

fn check_memory_types(driver: &dyn DeviceDriver, results: &mut Vec<CheckResult>) {
    let properties = driver.memory_properties();
    let reconciler = retrace_replay::MemoryTypeReconciler::new(properties);

    let mut result = CheckResult::pass(
        "Memory types",
        &format!("{} memory types", properties.memory_type_count),
    );
    for i in 0..properties.memory_type_count {
        let flags = properties.memory_types[i as usize].property_flags;
        let reconciled = reconciler.reconcile(i, flags);
        if reconciled.path != ReconcilePath::SameIndex {
            results.push(CheckResult::fail(
                "Memory types",
                &format!("Type {} does not reconcile to itself: {:?}", i, reconciled),
            ));
            return;
        }
        result = result.detail(&format!("{}: {:?}", i, flags));
    }

    let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    if retrace_replay::reconcile::find_memory_type(&properties, u32::MAX, host).is_none() {
        results.push(CheckResult::fail(
            "Memory types",
            "No host-visible coherent memory type for staging",
        ));
        return;
    }
    results.push(result);
}

// ── Check 3: Device queue ───────────────────────────────────────────────────

fn check_device_queue(session: &ReplaySession, family: u32, index: u32, results: &mut Vec<CheckResult>) {
    let cmd = ReplayCommand::GetDeviceQueue {
        device: DEVICE,
        queue: CapturedId(2),
        family,
        index,
    };
    if let Err(e) = session.execute(cmd) {
        results.push(CheckResult::fail("Device queue", &e.to_string()));
        return;
    }
    match session.device_info(DEVICE) {
        Some(info) if info.family_used(family) => results.push(
            CheckResult::pass("Device queue", &format!("Family {} index {}", family, index))
                .detail(&format!("Families used: {:#b}", info.queue_family_used)),
        ),
        other => results.push(CheckResult::fail(
            "Device queue",
            &format!("Family {} not recorded as used: {:?}", family, other),
        )),
    }
}

// ── Check 4: Buffer round trip ──────────────────────────────────────────────

fn check_buffer_round_trip(session: &ReplaySession, results: &mut Vec<CheckResult>) {
    const SIZE: u64 = 64 * 1024;
    let (memory, buffer) = (CapturedId(10), CapturedId(11));
    let data: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();

    // Captured as device-local memory at type 0.
    let captured_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

    let commands = vec![
        ReplayCommand::AllocateMemory {
            device: DEVICE,
            memory,
            size: SIZE,
            captured_type_index: 0,
            captured_flags,
        },
        ReplayCommand::CreateBuffer {
            device: DEVICE,
            buffer,
            size: SIZE,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
        },
        ReplayCommand::BindBufferMemory {
            device: DEVICE,
            buffer,
            memory,
            offset: 0,
        },
        ReplayCommand::WriteBufferData {
            device: DEVICE,
            buffer,
            offset: 0,
            data: data.clone(),
        },
        ReplayCommand::ReadBufferData {
            device: DEVICE,
            buffer,
            offset: 0,
            size: SIZE,
        },
    ];

    let mut result = CheckResult::pass(
        "Buffer round trip",
        &format!("{} KB written and read back", SIZE / 1024),
    );
    for cmd in commands {
        let name = command_name(&cmd);
        match session.execute(cmd) {
            Ok(ReplayResponse::MemoryAllocated { type_index, path }) => {
                result = result.detail(&format!("Memory type 0 -> {} ({:?})", type_index, path));
            }
            Ok(ReplayResponse::Data(read)) if read != data => {
                result = CheckResult::fail("Buffer round trip", "Read data differs from written data");
            }
            Ok(_) => {}
            Err(e) => {
                result = CheckResult::fail("Buffer round trip", &format!("{} failed: {}", name, e));
                break;
            }
        }
    }

    results.push(result);

    results.extend(teardown(
        session,
        vec![
            ReplayCommand::DestroyBuffer { device: DEVICE, buffer },
            ReplayCommand::FreeMemory { device: DEVICE, memory },
        ],
    ));
}

/// Run cleanup commands, collecting every failure into one warning.
pub fn teardown(session: &ReplaySession, commands: Vec<ReplayCommand>) -> Option<CheckResult> {
    let mut warning: Option<CheckResult> = None;
    for cmd in commands {
        let name = command_name(&cmd);
        if let Err(e) = session.execute(cmd) {
            let result = warning
                .take()
                .unwrap_or_else(|| CheckResult::warn("Teardown", "Cleanup did not complete"));
            warning = Some(result.detail(&format!("{} failed: {}", name, e)));
        }
    }
    warning
}

// ── Check 5: Offscreen swapchain ────────────────────────────────────────────

fn check_offscreen_swapchain(session: &ReplaySession, results: &mut Vec<CheckResult>) {
    if !session.config().replay.offscreen_swapchain {
        results.push(CheckResult::skip(
            "Offscreen swapchain",
            "Disabled in configuration",
        ));
        return;
    }

    let (surface, swapchain, semaphore) = (CapturedId(20), CapturedId(21), CapturedId(22));
    let images = vec![CapturedId(23), CapturedId(24), CapturedId(25)];

    let commands = vec![
        ReplayCommand::CreateSurface {
            instance: CapturedId(0),
            surface,
        },
        ReplayCommand::CreateSwapchain {
            device: DEVICE,
            swapchain,
            surface,
            format: vk::Format::B8G8R8A8_UNORM,
            extent: vk::Extent2D {
                width: 256,
                height: 256,
            },
            array_layers: 1,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        },
        ReplayCommand::GetSwapchainImages {
            device: DEVICE,
            swapchain,
            captured_count: 3,
            images: Some(images.clone()),
        },
        ReplayCommand::CreateSemaphore {
            device: DEVICE,
            semaphore,
        },
        ReplayCommand::AcquireNextImage {
            device: DEVICE,
            swapchain,
            image_index: 2,
            semaphore: Some(semaphore),
            fence: None,
        },
        ReplayCommand::QueuePresent {
            device: DEVICE,
            queue: None,
            swapchains: vec![swapchain],
            image_indices: vec![2],
            wait_semaphores: vec![semaphore],
        },
        ReplayCommand::DestroySwapchain {
            device: DEVICE,
            swapchain,
        },
        ReplayCommand::DestroySemaphore {
            device: DEVICE,
            semaphore,
        },
    ];

    let mut result = CheckResult::pass("Offscreen swapchain", "Acquire/present cycle completed");
    for cmd in commands {
        let name = command_name(&cmd);
        match session.execute(cmd) {
            Ok(ReplayResponse::ImageCount(n)) if n != images.len() as u32 => {
                result = CheckResult::fail(
                    "Offscreen swapchain",
                    &format!("Expected {} images, got {}", images.len(), n),
                );
                break;
            }
            Ok(ReplayResponse::ImageIndex(i)) if i != 2 => {
                result = CheckResult::fail(
                    "Offscreen swapchain",
                    &format!("Acquire returned index {} instead of 2", i),
                );
                break;
            }
            Ok(_) => {}
            Err(e) => {
                result = CheckResult::fail("Offscreen swapchain", &format!("{} failed: {}", name, e));
                break;
            }
        }
    }
    results.push(result);
}

fn command_name(cmd: &ReplayCommand) -> String {
    let debug = format!("{:?}", cmd);
    debug
        .split([' ', '{', '('])
        .next()
        .unwrap_or_default()
        .to_string()
}

// ── Output ──────────────────────────────────────────────────────────────────

pub fn print_results_pretty(results: &[CheckResult]) {
    println!();
    println!("Retrace Self-Test");
    println!("=================");
    println!();

    let mut pass_count = 0u32;
    let mut fail_count = 0u32;
    let mut warn_count = 0u32;

    for result in results {
        let (icon, color_start, color_end) = match result.status {
            CheckStatus::Pass => {
                pass_count += 1;
                ("[PASS]", "\x1b[32m", "\x1b[0m")
            }
            CheckStatus::Fail => {
                fail_count += 1;
                ("[FAIL]", "\x1b[31m", "\x1b[0m")
            }
            CheckStatus::Warn => {
                warn_count += 1;
                ("[WARN]", "\x1b[33m", "\x1b[0m")
            }
            CheckStatus::Skip => ("[SKIP]", "\x1b[90m", "\x1b[0m"),
        };

        println!(
            "  {}{}{} {} - {}",
            color_start, icon, color_end, result.name, result.message
        );
        for detail in &result.details {
            println!("         {}", detail);
        }
        println!();
    }

    println!("-------------------------------");
    println!(
        "  {} passed, {} failed, {} warnings",
        pass_count, fail_count, warn_count
    );
    println!();
}

pub fn print_results_json(results: &[CheckResult]) {
    let escape = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");

    let entries: Vec<String> = results
        .iter()
        .map(|result| {
            let status = match result.status {
                CheckStatus::Pass => "pass",
                CheckStatus::Fail => "fail",
                CheckStatus::Warn => "warn",
                CheckStatus::Skip => "skip",
            };
            let mut entry = format!(
                "{{\"name\":\"{}\",\"status\":\"{}\",\"message\":\"{}\"",
                escape(&result.name),
                status,
                escape(&result.message)
            );
            if !result.details.is_empty() {
                let details: Vec<String> = result
                    .details
                    .iter()
                    .map(|d| format!("\"{}\"", escape(d)))
                    .collect();
                entry.push_str(&format!(",\"details\":[{}]", details.join(",")));
            }
            entry.push('}');
            entry
        })
        .collect();
    println!("[{}]", entries.join(","));
}
