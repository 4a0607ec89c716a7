use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use retrace_core::config::RetraceConfig;
use retrace_core::{CapturedId, CoreError, HandleTable, ObjectKind};
use tracing::{debug, info, warn};

use crate::driver::{DeviceDriver, LiveResource, ResourceDesc};
use crate::error::{ReplayError, VkResultExt};
use crate::offscreen::{OffscreenSwapchain, SwapchainParams};
use crate::reconcile::{MemoryTypeReconciler, ReconcilePath};
use crate::state::{ResourceState, StateInfo, SubresourceState};
use crate::transcoder::{ReadRegion, ResourceTranscoder, StateTransition};
use crate::wrappers::{
    BufferInfo, DeviceInfo, ImageInfo, MemoryInfo, ObjectInfo, ObjectWrapper, QueueInfo,
    SwapchainInfo,
};

/// A recorded call, with every object named by its captured identity.
#[derive(Debug, Clone)]
pub enum ReplayCommand {
    GetDeviceQueue {
        device: CapturedId,
        queue: CapturedId,
        family: u32,
        index: u32,
    },

    // ── Memory ──────────────────────────────────────────────
    AllocateMemory {
        device: CapturedId,
        memory: CapturedId,
        size: u64,
        captured_type_index: u32,
        captured_flags: vk::MemoryPropertyFlags,
    },
    FreeMemory {
        device: CapturedId,
        memory: CapturedId,
    },

    // ── Buffers ─────────────────────────────────────────────
    CreateBuffer {
        device: CapturedId,
        buffer: CapturedId,
        size: u64,
        usage: vk::BufferUsageFlags,
    },
    BindBufferMemory {
        device: CapturedId,
        buffer: CapturedId,
        memory: CapturedId,
        offset: u64,
    },
    WriteBufferData {
        device: CapturedId,
        buffer: CapturedId,
        offset: u64,
        data: Vec<u8>,
    },
    ReadBufferData {
        device: CapturedId,
        buffer: CapturedId,
        offset: u64,
        size: u64,
    },
    DestroyBuffer {
        device: CapturedId,
        buffer: CapturedId,
    },

    // ── Synchronization ─────────────────────────────────────
    CreateSemaphore {
        device: CapturedId,
        semaphore: CapturedId,
    },
    DestroySemaphore {
        device: CapturedId,
        semaphore: CapturedId,
    },
    CreateFence {
        device: CapturedId,
        fence: CapturedId,
        signaled: bool,
    },
    DestroyFence {
        device: CapturedId,
        fence: CapturedId,
    },

    // ── Presentation ────────────────────────────────────────
    CreateSurface {
        instance: CapturedId,
        surface: CapturedId,
    },
    CreateSwapchain {
        device: CapturedId,
        swapchain: CapturedId,
        surface: CapturedId,
        format: vk::Format,
        extent: vk::Extent2D,
        array_layers: u32,
        usage: vk::ImageUsageFlags,
    },
    /// `images == None` queries the count; otherwise one captured identity
    /// per image to fill.
    GetSwapchainImages {
        device: CapturedId,
        swapchain: CapturedId,
        captured_count: u32,
        images: Option<Vec<CapturedId>>,
    },
    AcquireNextImage {
        device: CapturedId,
        swapchain: CapturedId,
        image_index: u32,
        semaphore: Option<CapturedId>,
        fence: Option<CapturedId>,
    },
    QueuePresent {
        device: CapturedId,
        queue: Option<CapturedId>,
        swapchains: Vec<CapturedId>,
        image_indices: Vec<u32>,
        wait_semaphores: Vec<CapturedId>,
    },
    DestroySwapchain {
        device: CapturedId,
        swapchain: CapturedId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayResponse {
    Success,
    MemoryAllocated { type_index: u32, path: ReconcilePath },
    Data(Vec<u8>),
    ImageCount(u32),
    ImageIndex(u32),
}

/// Everything bound to one replay device.
pub struct DeviceContext {
    pub driver: Arc<dyn DeviceDriver>,
    pub reconciler: MemoryTypeReconciler,
    pub transcoder: ResourceTranscoder,
    pub offscreen: OffscreenSwapchain,
    pub queue_family: u32,
    pub queue_index: u32,
}

/// Replay state of one trace: the handle table plus per-device helpers.
/// Lock order: `devices` before `objects`.
pub struct ReplaySession {
    config: RetraceConfig,
    objects: RwLock<HandleTable<ObjectWrapper>>,
    devices: Mutex<HashMap<CapturedId, DeviceContext>>,
}

impl ReplaySession {
    pub fn new(config: RetraceConfig) -> Self {
        Self {
            config,
            objects: RwLock::new(HandleTable::new()),
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RetraceConfig {
        &self.config
    }

    /// Read access to the handle table.
    pub fn objects(&self) -> RwLockReadGuard<'_, HandleTable<ObjectWrapper>> {
        self.objects.read()
    }

    /// Captured identity behind a live handle.
    pub fn resolve_live(&self, kind: ObjectKind, live: u64) -> Option<CapturedId> {
        self.objects.read().captured_for_live(kind, live)
    }

    /// Attach a live device to captured device `id`.
    pub fn register_device(
        &self,
        id: CapturedId,
        driver: Arc<dyn DeviceDriver>,
        queue_family: u32,
        queue_index: u32,
        info: DeviceInfo,
    ) -> Result<(), ReplayError> {
        let mut devices = self.devices.lock();
        if devices.contains_key(&id) {
            return Err(CoreError::DuplicateHandle {
                kind: ObjectKind::Device,
                id,
            }
            .into());
        }

        let properties = driver.memory_properties();
        let reconciler = if self.config.replay.remap_memory_types {
            MemoryTypeReconciler::new(properties)
        } else {
            MemoryTypeReconciler::disabled(properties)
        };
        let queue = driver.get_queue(queue_family, queue_index);
        let transcoder = ResourceTranscoder::new(driver.clone(), queue_family, queue, &self.config)?;
        let offscreen = OffscreenSwapchain::new(driver.clone());

        let mut info = info;
        info.mark_family_used(queue_family);
        let wrapper = ObjectWrapper::new(ObjectKind::Device, id, driver.device_handle().as_raw())
            .with_info(ObjectInfo::Device(info));
        if !self.objects.write().insert(wrapper) {
            return Err(CoreError::DuplicateHandle {
                kind: ObjectKind::Device,
                id,
            }
            .into());
        }

        devices.insert(
            id,
            DeviceContext {
                driver,
                reconciler,
                transcoder,
                offscreen,
                queue_family,
                queue_index,
            },
        );
        info!("device {} registered (queue family {})", id, queue_family);
        Ok(())
    }

    /// Drop a device's helpers and its wrapper. Child wrappers are left to
    /// the trace's own destroy calls.
    pub fn unregister_device(&self, id: CapturedId) -> bool {
        let removed = self.devices.lock().remove(&id);
        self.objects.write().remove(ObjectKind::Device, id);
        removed.is_some()
    }

    /// Run `f` against a registered device.
    pub fn with_device<R, F>(&self, device: CapturedId, f: F) -> Result<R, ReplayError>
    where
        F: FnOnce(&mut DeviceContext) -> Result<R, ReplayError>,
    {
        let mut devices = self.devices.lock();
        match devices.get_mut(&device) {
            Some(ctx) => f(ctx),
            None => Err(ReplayError::unknown(ObjectKind::Device, device)),
        }
    }

    /// Creation metadata of a registered device.
    pub fn device_info(&self, id: CapturedId) -> Option<DeviceInfo> {
        self.objects
            .read()
            .get(ObjectKind::Device, id)
            .and_then(ObjectWrapper::device_info)
            .cloned()
    }

    /// Tracked objects per category, for end-of-replay diagnostics.
    pub fn summary(&self) -> Vec<(ObjectKind, usize)> {
        let objects = self.objects.read();
        ObjectKind::ALL
            .iter()
            .filter_map(|kind| {
                let mut count = 0;
                objects.visit_all(*kind, |_| count += 1);
                (count > 0).then_some((*kind, count))
            })
            .collect()
    }

    fn live<T: Handle>(&self, kind: ObjectKind, id: CapturedId) -> Result<T, ReplayError> {
        match self.objects.read().get(kind, id) {
            Some(w) => Ok(w.live_as()),
            None => Err(ReplayError::unknown(kind, id)),
        }
    }

    fn live_or_null<T: Handle>(&self, kind: ObjectKind, id: Option<CapturedId>) -> Result<T, ReplayError> {
        match id {
            Some(id) => self.live(kind, id),
            None => Ok(T::from_raw(0)),
        }
    }

    fn track(&self, wrapper: ObjectWrapper) -> Result<(), ReplayError> {
        let (kind, id) = (wrapper.kind, wrapper.id);
        if self.objects.write().insert(wrapper) {
            Ok(())
        } else {
            Err(CoreError::DuplicateHandle { kind, id }.into())
        }
    }

    fn untrack(&self, kind: ObjectKind, id: CapturedId) -> Result<ObjectWrapper, ReplayError> {
        self.objects
            .write()
            .take(kind, id)
            .ok_or_else(|| ReplayError::unknown(kind, id))
    }

    fn require_offscreen(&self) -> Result<(), ReplayError> {
        if self.config.replay.offscreen_swapchain {
            Ok(())
        } else {
            Err(ReplayError::Unsupported(
                "swapchain replay needs the offscreen substitute".to_string(),
            ))
        }
    }

    /// Execute one recorded call.
    pub fn execute(&self, cmd: ReplayCommand) -> Result<ReplayResponse, ReplayError> {
        match cmd {
            ReplayCommand::GetDeviceQueue {
                device,
                queue,
                family,
                index,
            } => self.with_device(device, |ctx| {
                let live = ctx.driver.get_queue(family, index);
                let wrapper = ObjectWrapper::new(ObjectKind::Queue, queue, live.as_raw())
                    .with_parent(device, ctx.driver.device_handle().as_raw())
                    .with_info(ObjectInfo::Queue(QueueInfo { family, index }));
                let mut objects = self.objects.write();
                // Repeated queries return the same queue.
                if !objects.insert(wrapper) {
                    debug!("queue {} (family {} index {}) already tracked", queue, family, index);
                }
                if let Some(info) = objects
                    .get_mut(ObjectKind::Device, device)
                    .and_then(ObjectWrapper::device_info_mut)
                {
                    if !info.family_declared(family) {
                        warn!("device {} was not created with queue family {}", device, family);
                    }
                    info.mark_family_used(family);
                }
                Ok(ReplayResponse::Success)
            }),

            // ── Memory ──────────────────────────────────────
            ReplayCommand::AllocateMemory {
                device,
                memory,
                size,
                captured_type_index,
                captured_flags,
            } => self.with_device(device, |ctx| {
                let reconciled = ctx.reconciler.reconcile(captured_type_index, captured_flags);
                let live = ctx
                    .driver
                    .allocate_memory(size, reconciled.index)
                    .vk_op("vkAllocateMemory")?;
                let info = MemoryInfo {
                    size,
                    captured_type_index,
                    type_index: reconciled.index,
                    flags: ctx.reconciler.type_flags(reconciled.index).unwrap_or_default(),
                };
                let wrapper = ObjectWrapper::new(ObjectKind::DeviceMemory, memory, live.as_raw())
                    .with_parent(device, ctx.driver.device_handle().as_raw())
                    .with_info(ObjectInfo::Memory(info));
                if let Err(e) = self.track(wrapper) {
                    ctx.driver.free_memory(live);
                    return Err(e);
                }
                debug!(
                    "memory {}: {} bytes, type {} -> {} ({:?})",
                    memory, size, captured_type_index, reconciled.index, reconciled.path
                );
                Ok(ReplayResponse::MemoryAllocated {
                    type_index: reconciled.index,
                    path: reconciled.path,
                })
            }),

            ReplayCommand::FreeMemory { device, memory } => self.with_device(device, |ctx| {
                let wrapper = self.untrack(ObjectKind::DeviceMemory, memory)?;
                ctx.driver.free_memory(wrapper.live_as());
                Ok(ReplayResponse::Success)
            }),

            // ── Buffers ─────────────────────────────────────
            ReplayCommand::CreateBuffer {
                device,
                buffer,
                size,
                usage,
            } => self.with_device(device, |ctx| {
                let usage = usage | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
                let live = ctx.driver.create_buffer(size, usage).vk_op("vkCreateBuffer")?;
                let info = BufferInfo {
                    size,
                    usage,
                    memory: None,
                    state: ResourceState::UNDEFINED,
                };
                let wrapper = ObjectWrapper::new(ObjectKind::Buffer, buffer, live.as_raw())
                    .with_parent(device, ctx.driver.device_handle().as_raw())
                    .with_info(ObjectInfo::Buffer(info));
                if let Err(e) = self.track(wrapper) {
                    ctx.driver.destroy_resource(LiveResource::Buffer(live));
                    return Err(e);
                }
                Ok(ReplayResponse::Success)
            }),

            ReplayCommand::BindBufferMemory {
                device,
                buffer,
                memory,
                offset,
            } => self.with_device(device, |ctx| {
                let live_buffer: vk::Buffer = self.live(ObjectKind::Buffer, buffer)?;
                let live_memory: vk::DeviceMemory = self.live(ObjectKind::DeviceMemory, memory)?;
                ctx.driver
                    .bind_memory(LiveResource::Buffer(live_buffer), live_memory, offset)
                    .vk_op("vkBindBufferMemory")?;
                if let Some(info) = self
                    .objects
                    .write()
                    .get_mut(ObjectKind::Buffer, buffer)
                    .and_then(ObjectWrapper::buffer_info_mut)
                {
                    info.memory = Some(memory);
                }
                Ok(ReplayResponse::Success)
            }),

            ReplayCommand::WriteBufferData {
                device,
                buffer,
                offset,
                data,
            } => self.with_device(device, |ctx| {
                let (live, state) = self.buffer_state(buffer)?;
                let after = settled(state);
                ctx.transcoder.write_buffer_at(
                    live,
                    offset,
                    &data,
                    StateTransition::new(&[SubresourceState::from(state)], &[StateInfo::new(after)]),
                    true,
                    None,
                )?;
                self.set_buffer_state(buffer, after);
                Ok(ReplayResponse::Success)
            }),

            ReplayCommand::ReadBufferData {
                device,
                buffer,
                offset,
                size,
            } => self.with_device(device, |ctx| {
                let (live, state) = self.buffer_state(buffer)?;
                let after = settled(state);
                let result = ctx.transcoder.read_range(
                    LiveResource::Buffer(live),
                    ReadRegion::Bytes { offset, size },
                    StateTransition::new(&[SubresourceState::from(state)], &[StateInfo::new(after)]),
                    true,
                )?;
                self.set_buffer_state(buffer, after);
                Ok(ReplayResponse::Data(result.data))
            }),

            ReplayCommand::DestroyBuffer { device, buffer } => self.with_device(device, |ctx| {
                let wrapper = self.untrack(ObjectKind::Buffer, buffer)?;
                ctx.driver
                    .destroy_resource(LiveResource::Buffer(wrapper.live_as()));
                Ok(ReplayResponse::Success)
            }),

            // ── Synchronization ─────────────────────────────
            ReplayCommand::CreateSemaphore { device, semaphore } => self.with_device(device, |ctx| {
                let live = ctx.driver.create_semaphore().vk_op("vkCreateSemaphore")?;
                let wrapper = ObjectWrapper::new(ObjectKind::Semaphore, semaphore, live.as_raw())
                    .with_parent(device, ctx.driver.device_handle().as_raw());
                if let Err(e) = self.track(wrapper) {
                    ctx.driver.destroy_semaphore(live);
                    return Err(e);
                }
                Ok(ReplayResponse::Success)
            }),

            ReplayCommand::DestroySemaphore { device, semaphore } => {
                self.with_device(device, |ctx| {
                    let wrapper = self.untrack(ObjectKind::Semaphore, semaphore)?;
                    ctx.driver.destroy_semaphore(wrapper.live_as());
                    Ok(ReplayResponse::Success)
                })
            }

            ReplayCommand::CreateFence {
                device,
                fence,
                signaled,
            } => self.with_device(device, |ctx| {
                let live = ctx.driver.create_fence(signaled).vk_op("vkCreateFence")?;
                let wrapper = ObjectWrapper::new(ObjectKind::Fence, fence, live.as_raw())
                    .with_parent(device, ctx.driver.device_handle().as_raw());
                if let Err(e) = self.track(wrapper) {
                    ctx.driver.destroy_fence(live);
                    return Err(e);
                }
                Ok(ReplayResponse::Success)
            }),

            ReplayCommand::DestroyFence { device, fence } => self.with_device(device, |ctx| {
                let wrapper = self.untrack(ObjectKind::Fence, fence)?;
                ctx.driver.destroy_fence(wrapper.live_as());
                Ok(ReplayResponse::Success)
            }),

            // ── Presentation ────────────────────────────────
            ReplayCommand::CreateSurface { instance, surface } => {
                self.require_offscreen()?;
                let live = OffscreenSwapchain::create_surface(surface);
                let wrapper = ObjectWrapper::new(ObjectKind::Surface, surface, live.as_raw())
                    .with_parent(instance, 0)
                    .with_info(ObjectInfo::Surface);
                self.track(wrapper)?;
                Ok(ReplayResponse::Success)
            }

            ReplayCommand::CreateSwapchain {
                device,
                swapchain,
                surface,
                format,
                extent,
                array_layers,
                usage,
            } => {
                self.require_offscreen()?;
                self.with_device(device, |ctx| {
                    let live_surface: vk::SurfaceKHR = self.live(ObjectKind::Surface, surface)?;
                    let params = SwapchainParams {
                        id: swapchain,
                        surface: live_surface,
                        format,
                        extent,
                        array_layers,
                        usage,
                        queue_family: ctx.queue_family,
                        queue_index: ctx.queue_index,
                    };
                    let live = ctx.offscreen.create_swapchain(&params)?;
                    let info = SwapchainInfo {
                        device,
                        surface,
                        replay_image_count: 0,
                        queue_family: ctx.queue_family,
                        image_ids: Vec::new(),
                    };
                    let wrapper = ObjectWrapper::new(ObjectKind::Swapchain, swapchain, live.as_raw())
                        .with_parent(device, ctx.driver.device_handle().as_raw())
                        .with_info(ObjectInfo::Swapchain(info));
                    if let Err(e) = self.track(wrapper) {
                        ctx.offscreen.destroy_swapchain(live);
                        return Err(e);
                    }
                    Ok(ReplayResponse::Success)
                })
            }

            ReplayCommand::GetSwapchainImages {
                device,
                swapchain,
                captured_count,
                images,
            } => {
                self.require_offscreen()?;
                self.with_device(device, |ctx| {
                    let live: vk::SwapchainKHR = self.live(ObjectKind::Swapchain, swapchain)?;
                    let Some(ids) = images else {
                        let count = ctx.offscreen.get_images(live, captured_count, None)?;
                        return Ok(ReplayResponse::ImageCount(count));
                    };

                    let mut out = vec![vk::Image::null(); ids.len()];
                    let written = ctx
                        .offscreen
                        .get_images(live, captured_count, Some(&mut out))?;
                    let device_live = ctx.driver.device_handle().as_raw();

                    let mut objects = self.objects.write();
                    for (id, image) in ids.iter().zip(&out).take(written as usize) {
                        if objects.contains(ObjectKind::Image, *id) {
                            continue;
                        }
                        let info = match ctx.driver.resource_desc(LiveResource::Image(*image)) {
                            Ok(ResourceDesc::Image(desc)) => ObjectInfo::Image(ImageInfo {
                                desc,
                                swapchain: Some(swapchain),
                            }),
                            _ => ObjectInfo::None,
                        };
                        let wrapper = ObjectWrapper::new(ObjectKind::Image, *id, image.as_raw())
                            .with_parent(device, device_live)
                            .with_info(info);
                        if !objects.insert(wrapper) {
                            warn!("swapchain image {} collides with a tracked image", id);
                        }
                    }
                    if let Some(info) = objects
                        .get_mut(ObjectKind::Swapchain, swapchain)
                        .and_then(ObjectWrapper::swapchain_info_mut)
                    {
                        info.replay_image_count = written;
                        info.image_ids = ids.iter().take(written as usize).copied().collect();
                    }
                    Ok(ReplayResponse::ImageCount(written))
                })
            }

            ReplayCommand::AcquireNextImage {
                device,
                swapchain,
                image_index,
                semaphore,
                fence,
            } => {
                self.require_offscreen()?;
                self.with_device(device, |ctx| {
                    let live: vk::SwapchainKHR = self.live(ObjectKind::Swapchain, swapchain)?;
                    let semaphore = self.live_or_null(ObjectKind::Semaphore, semaphore)?;
                    let fence = self.live_or_null(ObjectKind::Fence, fence)?;
                    let index = ctx
                        .offscreen
                        .acquire_next_image(live, image_index, semaphore, fence)?;
                    Ok(ReplayResponse::ImageIndex(index))
                })
            }

            ReplayCommand::QueuePresent {
                device,
                queue,
                swapchains,
                image_indices,
                wait_semaphores,
            } => {
                self.require_offscreen()?;
                self.with_device(device, |ctx| {
                    let queue = self.live_or_null(ObjectKind::Queue, queue)?;
                    let swapchains = swapchains
                        .iter()
                        .map(|id| self.live(ObjectKind::Swapchain, *id))
                        .collect::<Result<Vec<vk::SwapchainKHR>, _>>()?;
                    let waits = wait_semaphores
                        .iter()
                        .map(|id| self.live(ObjectKind::Semaphore, *id))
                        .collect::<Result<Vec<vk::Semaphore>, _>>()?;
                    ctx.offscreen
                        .present(queue, &swapchains, &image_indices, &waits)?;
                    Ok(ReplayResponse::Success)
                })
            }

            ReplayCommand::DestroySwapchain { device, swapchain } => {
                self.require_offscreen()?;
                self.with_device(device, |ctx| {
                    let wrapper = self.untrack(ObjectKind::Swapchain, swapchain)?;
                    if !ctx.offscreen.destroy_swapchain(wrapper.live_as()) {
                        warn!("swapchain {} had no offscreen bookkeeping", swapchain);
                    }
                    if let Some(info) = wrapper.swapchain_info() {
                        let mut objects = self.objects.write();
                        for id in &info.image_ids {
                            objects.remove(ObjectKind::Image, *id);
                        }
                    }
                    Ok(ReplayResponse::Success)
                })
            }
        }
    }

    fn buffer_state(&self, buffer: CapturedId) -> Result<(vk::Buffer, ResourceState), ReplayError> {
        let objects = self.objects.read();
        let Some(wrapper) = objects.get(ObjectKind::Buffer, buffer) else {
            return Err(ReplayError::unknown(ObjectKind::Buffer, buffer));
        };
        let state = wrapper
            .buffer_info()
            .map(|info| info.state)
            .unwrap_or(ResourceState::COMMON);
        Ok((wrapper.live_as(), state))
    }

    fn set_buffer_state(&self, buffer: CapturedId, state: ResourceState) {
        if let Some(info) = self
            .objects
            .write()
            .get_mut(ObjectKind::Buffer, buffer)
            .and_then(ObjectWrapper::buffer_info_mut)
        {
            info.state = state;
        }
    }
}

/// State a buffer rests in after a transfer.
fn settled(state: ResourceState) -> ResourceState {
    if state == ResourceState::UNDEFINED {
        ResourceState::COMMON
    } else {
        state
    }
}
