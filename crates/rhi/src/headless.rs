//! Simulated GPU for running the frame loop without a device.
//!
//! [`HeadlessGpu`] implements [`Backend`] on top of an in-memory queue. Work
//! retires in submission order, either when the host waits for a fence value
//! or automatically once more than `latency` signals are outstanding. The
//! simulation rejects the misuse a real driver would punish:
//!
//! - resetting an allocator whose commands are still queued
//! - submitting an open command list
//! - recording against an image from before the last rebuild
//! - transitions that do not match the image's current state
//! - rebuilding the swap chain while work is outstanding
//! - presenting an image that is not in the present state
//! - submitting work while the rebuilt chain has no image acquired
//!
//! Everything the host asks of the GPU is appended to an event log that
//! tests inspect through [`HeadlessGpu::events`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

use crate::backend::{
    Backend, ClearColor, CommandAllocator, CommandRecorder, CompletionFence, Extent, FenceValue,
    PresentChain, PresentRequest, PresentStatus, ResourceState, WaitStatus,
};
use crate::error::{RhiError, RhiResult};

/// Initial configuration of the simulated GPU and its swap chain.
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub image_count: usize,
    pub extent: Extent,
    pub tearing_supported: bool,
    /// Signals allowed to stay outstanding before the oldest retires on its own
    pub latency: usize,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            image_count: 2,
            extent: Extent::new(1280, 720),
            tearing_supported: false,
            latency: 1,
        }
    }
}

/// A back buffer of the simulated swap chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadlessImage {
    pub index: usize,
    /// Swap chain generation the image belongs to
    pub generation: u64,
}

/// A command as recorded by [`HeadlessCommandList`].
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    Transition {
        image: usize,
        before: ResourceState,
        after: ResourceState,
    },
    Clear {
        image: usize,
        color: ClearColor,
    },
}

/// Host-visible operations, in the order the GPU received them.
#[derive(Clone, Debug, PartialEq)]
pub enum GpuEvent {
    AllocatorReset {
        allocator: usize,
        /// Fence value completed at the time of the reset
        completed: FenceValue,
    },
    Execute {
        allocator: usize,
        commands: Vec<RecordedCommand>,
    },
    Signal {
        value: FenceValue,
    },
    /// A host wait that could not return immediately
    Wait {
        value: FenceValue,
        reached: bool,
    },
    Present {
        image: usize,
        request: PresentRequest,
    },
    Recreate {
        extent: Extent,
        image_count: usize,
    },
    Idle,
}

#[derive(Debug)]
enum QueueItem {
    Execute { allocator: usize },
    Signal { value: FenceValue },
}

#[derive(Debug)]
struct SimState {
    queue: VecDeque<QueueItem>,
    completed: FenceValue,
    last_signaled: FenceValue,
    latency: usize,
    stalled: bool,
    next_allocator: usize,
    events: Vec<GpuEvent>,

    generation: u64,
    extent: Extent,
    image_count: usize,
    image_states: Vec<ResourceState>,
    current: usize,
    tearing_supported: bool,
    present_order: Vec<usize>,
    present_cursor: usize,
    out_of_date: bool,
    image_count_on_rebuild: Option<usize>,
    /// Rebuilds still to come that fail to acquire an image
    stale_rebuilds: usize,
    unacquired: bool,
}

impl SimState {
    fn pending_signals(&self) -> usize {
        self.queue
            .iter()
            .filter(|item| matches!(item, QueueItem::Signal { .. }))
            .count()
    }

    /// Retires queue items up to and including the first signal of at least
    /// `value`.
    fn retire_through(&mut self, value: FenceValue) {
        while let Some(item) = self.queue.pop_front() {
            if let QueueItem::Signal { value: signaled } = item {
                self.completed = self.completed.max(signaled);
                if signaled >= value {
                    break;
                }
            }
        }
    }

    fn retire_all(&mut self) {
        self.retire_through(FenceValue::MAX);
    }

    fn allocator_busy(&self, allocator: usize) -> bool {
        self.queue.iter().any(
            |item| matches!(item, QueueItem::Execute { allocator: id } if *id == allocator),
        )
    }

    fn next_present_index(&mut self) -> usize {
        if self.present_order.is_empty() {
            return (self.current + 1) % self.image_count;
        }

        let index = self.present_order[self.present_cursor % self.present_order.len()];
        self.present_cursor += 1;
        index % self.image_count
    }
}

/// Simulated GPU device with one queue.
///
/// Cloning yields another handle to the same device.
#[derive(Clone, Debug)]
pub struct HeadlessGpu {
    state: Rc<RefCell<SimState>>,
}

impl HeadlessGpu {
    pub fn new(config: HeadlessConfig) -> Self {
        let image_count = config.image_count.max(1);
        let state = SimState {
            queue: VecDeque::new(),
            completed: 0,
            last_signaled: 0,
            latency: config.latency,
            stalled: false,
            next_allocator: 0,
            events: Vec::new(),
            generation: 0,
            extent: config.extent,
            image_count,
            image_states: vec![ResourceState::Present; image_count],
            current: 0,
            tearing_supported: config.tearing_supported,
            present_order: Vec::new(),
            present_cursor: 0,
            out_of_date: false,
            image_count_on_rebuild: None,
            stale_rebuilds: 0,
            unacquired: false,
        };

        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Returns the swap chain of this device.
    pub fn swapchain(&self) -> HeadlessSwapchain {
        HeadlessSwapchain {
            state: self.state.clone(),
        }
    }

    /// Returns a copy of the event log.
    pub fn events(&self) -> Vec<GpuEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Number of queued items (command batches and signals) not yet retired.
    pub fn pending_work(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Retires all queued work.
    pub fn retire_all(&self) {
        self.state.borrow_mut().retire_all();
    }

    /// While stalled, no work retires; bounded waits time out.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    /// Makes presents hand out indices from `order`, cycling.
    pub fn set_present_order(&self, order: Vec<usize>) {
        let mut state = self.state.borrow_mut();
        state.present_order = order;
        state.present_cursor = 0;
    }

    /// Makes the next present report the chain as stale.
    pub fn mark_out_of_date(&self) {
        self.state.borrow_mut().out_of_date = true;
    }

    /// Makes the next rebuild produce `count` images.
    pub fn set_image_count_on_rebuild(&self, count: usize) {
        self.state.borrow_mut().image_count_on_rebuild = Some(count.max(1));
    }

    /// Makes the next `count` rebuilds come back without an acquired image,
    /// as when the surface changes again during recreation.
    pub fn set_stale_rebuilds(&self, count: usize) {
        self.state.borrow_mut().stale_rebuilds = count;
    }

    pub fn set_tearing_supported(&self, supported: bool) {
        self.state.borrow_mut().tearing_supported = supported;
    }

    /// Current swap chain generation; bumped by every rebuild.
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }
}

impl Backend for HeadlessGpu {
    type Image = HeadlessImage;
    type Allocator = HeadlessAllocator;
    type CommandList = HeadlessCommandList;
    type Fence = HeadlessFence;
    type SwapChain = HeadlessSwapchain;

    fn create_allocator(&self) -> RhiResult<HeadlessAllocator> {
        let mut state = self.state.borrow_mut();
        let id = state.next_allocator;
        state.next_allocator += 1;

        Ok(HeadlessAllocator {
            id,
            state: self.state.clone(),
        })
    }

    fn create_command_list(&self, allocator: &HeadlessAllocator) -> RhiResult<HeadlessCommandList> {
        Ok(HeadlessCommandList {
            allocator: allocator.id,
            commands: Vec::new(),
            closed: true,
        })
    }

    /// All fences of one device share its single counter.
    fn create_fence(&self) -> RhiResult<HeadlessFence> {
        Ok(HeadlessFence {
            state: self.state.clone(),
        })
    }

    fn execute(&self, list: &HeadlessCommandList, _chain: &HeadlessSwapchain) -> RhiResult<()> {
        if !list.closed {
            return Err(RhiError::InvalidState(
                "command list must be closed before submission".to_string(),
            ));
        }

        let mut state = self.state.borrow_mut();
        if state.unacquired {
            return Err(RhiError::InvalidState(
                "no swapchain image is acquired".to_string(),
            ));
        }
        let mut image_states = state.image_states.clone();

        for (generation, command) in &list.commands {
            let image = match command {
                RecordedCommand::Transition { image, .. } | RecordedCommand::Clear { image, .. } => {
                    *image
                }
            };
            if *generation != state.generation || image >= image_states.len() {
                return Err(RhiError::InvalidHandle(format!(
                    "back buffer {image} belongs to a released swap chain"
                )));
            }

            match command {
                RecordedCommand::Transition { before, after, .. } => {
                    if image_states[image] != *before {
                        return Err(RhiError::InvalidState(format!(
                            "back buffer {image} is in {:?}, not {before:?}",
                            image_states[image]
                        )));
                    }
                    image_states[image] = *after;
                }
                RecordedCommand::Clear { .. } => {
                    if image_states[image] != ResourceState::RenderTarget {
                        return Err(RhiError::InvalidState(format!(
                            "back buffer {image} cleared outside the render target state"
                        )));
                    }
                }
            }
        }

        state.image_states = image_states;
        state.queue.push_back(QueueItem::Execute {
            allocator: list.allocator,
        });
        state.events.push(GpuEvent::Execute {
            allocator: list.allocator,
            commands: list.commands.iter().map(|(_, c)| c.clone()).collect(),
        });
        trace!("headless: executed {} command(s)", list.commands.len());
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        state.retire_all();
        state.events.push(GpuEvent::Idle);
        Ok(())
    }
}

/// Command memory of one frame slot.
#[derive(Debug)]
pub struct HeadlessAllocator {
    id: usize,
    state: Rc<RefCell<SimState>>,
}

impl HeadlessAllocator {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl CommandAllocator for HeadlessAllocator {
    fn reset(&mut self) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        if state.allocator_busy(self.id) {
            return Err(RhiError::ResourceInUse(format!(
                "allocator {} reset while its commands are still queued",
                self.id
            )));
        }

        let completed = state.completed;
        state.events.push(GpuEvent::AllocatorReset {
            allocator: self.id,
            completed,
        });
        Ok(())
    }
}

/// The reusable command list of the simulated GPU.
#[derive(Debug)]
pub struct HeadlessCommandList {
    allocator: usize,
    /// Commands with the generation of the image they reference
    commands: Vec<(u64, RecordedCommand)>,
    closed: bool,
}

impl HeadlessCommandList {
    fn ensure_recording(&self) -> RhiResult<()> {
        if self.closed {
            return Err(RhiError::InvalidState(
                "command list is not recording".to_string(),
            ));
        }
        Ok(())
    }
}

impl CommandRecorder for HeadlessCommandList {
    type Allocator = HeadlessAllocator;
    type Image = HeadlessImage;

    fn reset(&mut self, allocator: &HeadlessAllocator) -> RhiResult<()> {
        if !self.closed {
            return Err(RhiError::InvalidState(
                "command list must be closed before it is reset".to_string(),
            ));
        }

        self.allocator = allocator.id;
        self.commands.clear();
        self.closed = false;
        Ok(())
    }

    fn transition(
        &mut self,
        image: &HeadlessImage,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()> {
        self.ensure_recording()?;
        self.commands.push((
            image.generation,
            RecordedCommand::Transition {
                image: image.index,
                before,
                after,
            },
        ));
        Ok(())
    }

    fn clear(&mut self, image: &HeadlessImage, color: ClearColor) -> RhiResult<()> {
        self.ensure_recording()?;
        self.commands.push((
            image.generation,
            RecordedCommand::Clear {
                image: image.index,
                color,
            },
        ));
        Ok(())
    }

    fn close(&mut self) -> RhiResult<()> {
        if self.closed {
            return Err(RhiError::InvalidState(
                "command list is already closed".to_string(),
            ));
        }
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Completion counter of the simulated queue.
#[derive(Debug)]
pub struct HeadlessFence {
    state: Rc<RefCell<SimState>>,
}

impl CompletionFence for HeadlessFence {
    fn completed_value(&self) -> RhiResult<FenceValue> {
        Ok(self.state.borrow().completed)
    }

    fn enqueue_signal(&self, value: FenceValue) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        state.queue.push_back(QueueItem::Signal { value });
        state.last_signaled = state.last_signaled.max(value);
        state.events.push(GpuEvent::Signal { value });

        if !state.stalled {
            while state.pending_signals() > state.latency {
                let Some(oldest) = state.queue.iter().find_map(|item| match item {
                    QueueItem::Signal { value } => Some(*value),
                    QueueItem::Execute { .. } => None,
                }) else {
                    break;
                };
                state.retire_through(oldest);
            }
        }
        Ok(())
    }

    fn block_until(
        &self,
        value: FenceValue,
        timeout: Option<Duration>,
    ) -> RhiResult<WaitStatus> {
        let mut state = self.state.borrow_mut();
        if state.completed >= value {
            return Ok(WaitStatus::Reached);
        }

        let reachable = !state.stalled && value <= state.last_signaled;
        if reachable {
            state.retire_through(value);
            state.events.push(GpuEvent::Wait {
                value,
                reached: true,
            });
            return Ok(WaitStatus::Reached);
        }

        state.events.push(GpuEvent::Wait {
            value,
            reached: false,
        });
        match timeout {
            Some(_) => Ok(WaitStatus::TimedOut),
            None => Err(RhiError::InvalidState(format!(
                "unbounded wait for fence value {value} would never return"
            ))),
        }
    }
}

/// Swap chain of the simulated GPU.
#[derive(Debug)]
pub struct HeadlessSwapchain {
    state: Rc<RefCell<SimState>>,
}

impl PresentChain for HeadlessSwapchain {
    type Image = HeadlessImage;

    fn current_index(&self) -> usize {
        self.state.borrow().current
    }

    fn image_count(&self) -> usize {
        self.state.borrow().image_count
    }

    fn extent(&self) -> Extent {
        self.state.borrow().extent
    }

    fn tearing_supported(&self) -> bool {
        self.state.borrow().tearing_supported
    }

    fn is_ready(&self) -> bool {
        !self.state.borrow().unacquired
    }

    fn back_buffer(&self, index: usize) -> RhiResult<HeadlessImage> {
        let state = self.state.borrow();
        if index >= state.image_count {
            return Err(RhiError::InvalidHandle(format!(
                "back buffer {} out of range ({} images)",
                index, state.image_count
            )));
        }

        Ok(HeadlessImage {
            index,
            generation: state.generation,
        })
    }

    fn present(&mut self, request: PresentRequest) -> RhiResult<PresentStatus> {
        let mut state = self.state.borrow_mut();
        if state.unacquired {
            return Ok(PresentStatus::Stale);
        }

        let image = state.current;
        if state.image_states[image] != ResourceState::Present {
            return Err(RhiError::InvalidState(format!(
                "back buffer {image} presented outside the present state"
            )));
        }

        state.events.push(GpuEvent::Present { image, request });
        let next = state.next_present_index();
        state.current = next;

        if std::mem::take(&mut state.out_of_date) {
            Ok(PresentStatus::Stale)
        } else {
            Ok(PresentStatus::Presented)
        }
    }

    fn rebuild(&mut self, extent: Extent, _request: PresentRequest) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.queue.is_empty() {
            return Err(RhiError::ResourceInUse(format!(
                "swap chain rebuilt with {} queued item(s)",
                state.queue.len()
            )));
        }

        let current_count = state.image_count;
        let image_count = state.image_count_on_rebuild.take().unwrap_or(current_count);

        state.generation += 1;
        state.extent = extent;
        state.image_count = image_count;
        state.image_states = vec![ResourceState::Present; image_count];
        state.current = 0;
        state.present_cursor = 0;
        state.unacquired = state.stale_rebuilds > 0;
        state.stale_rebuilds = state.stale_rebuilds.saturating_sub(1);
        state.events.push(GpuEvent::Recreate {
            extent,
            image_count,
        });
        Ok(())
    }
}
