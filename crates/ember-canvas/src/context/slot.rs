use std::cell::RefCell;
use std::rc::Rc;

use crate::config::CanvasConfig;
use crate::device::{DeviceError, GpuDevice};
use crate::error::{CanvasError, CanvasResult};

use super::{GpuContext, SharedContext};

/// Per-worker home of the shared GPU context.
///
/// The context is created lazily by the first target that asks for it and
/// replaced when its device is lost. An initialization failure is sticky:
/// later requests fail fast without touching the device again.
#[derive(Default)]
pub struct ContextSlot {
    context: Option<SharedContext>,
    init_failed: bool,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live context, creating it with `create` if needed.
    pub fn get_or_create<F>(&mut self, config: &CanvasConfig, create: F) -> CanvasResult<SharedContext>
    where
        F: FnOnce() -> Result<Box<dyn GpuDevice>, DeviceError>,
    {
        if self.init_failed {
            return Err(CanvasError::InitPreviouslyFailed);
        }
        if let Some(ctx) = &self.context {
            if !ctx.borrow().is_lost() {
                return Ok(Rc::clone(ctx));
            }
            log::warn!("ember-canvas: GPU device lost, recreating context");
            self.context = None;
        }

        match create().and_then(|device| GpuContext::new(device, config.clone())) {
            Ok(ctx) => {
                let ctx = Rc::new(RefCell::new(ctx));
                self.context = Some(Rc::clone(&ctx));
                Ok(ctx)
            }
            Err(err) => {
                log::error!("ember-canvas: GPU context initialization failed: {err}");
                self.init_failed = true;
                Err(CanvasError::Init(err))
            }
        }
    }

    /// Releases the slot's reference after freeing every cached resource.
    /// Targets still holding the context keep a drained but usable one.
    pub fn shutdown(&mut self) {
        if let Some(ctx) = self.context.take() {
            if let Ok(mut ctx) = ctx.try_borrow_mut() {
                if !ctx.is_lost() {
                    ctx.teardown();
                }
            }
        }
    }

    #[inline]
    pub fn init_failed(&self) -> bool {
        self.init_failed
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.context.is_some()
    }
}
