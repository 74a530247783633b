//! Compiled workload handle
//!
//! A dispatch starts zero, one or two compile tasks. Each task feeds its own
//! [`CompileSlot`] through a watch channel, so slots resolve independently and
//! in any order. A slot that was never started is `None` on the handle, which
//! keeps "no such slot" apart from "slot failed to compile".

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use cortex_core::DeviceId;

use crate::catalog::ExecutableModel;
use crate::error::{DeviceError, DispatchError, Result, SlotFailure, SlotKind};

const TASK_LOST: &str = "compile task ended without a result";

#[derive(Debug, Clone)]
enum SlotState {
    Pending,
    Ready(Arc<dyn ExecutableModel>),
    Failed(String),
}

impl SlotState {
    fn is_pending(&self) -> bool {
        matches!(self, SlotState::Pending)
    }
}

/// One pending or resolved compile result
#[derive(Debug, Clone)]
pub struct CompileSlot {
    kind: SlotKind,
    device: DeviceId,
    state: watch::Receiver<SlotState>,
}

impl CompileSlot {
    /// Run `compile` on the tokio runtime and return the slot it resolves
    pub(crate) fn spawn<F>(kind: SlotKind, device: DeviceId, compile: F) -> Self
    where
        F: Future<Output = std::result::Result<Arc<dyn ExecutableModel>, DeviceError>>
            + Send
            + 'static,
    {
        let (tx, rx) = watch::channel(SlotState::Pending);
        let task_device = device.clone();

        tokio::spawn(async move {
            let state = match compile.await {
                Ok(model) => {
                    debug!(slot = %kind, device = %task_device, "Compile finished");
                    SlotState::Ready(model)
                }
                Err(e) => {
                    warn!(slot = %kind, device = %task_device, error = %e, "Compile failed");
                    SlotState::Failed(e.to_string())
                }
            };
            // Every receiver may already be gone; nobody is waiting then
            let _ = tx.send(state);
        });

        Self {
            kind,
            device,
            state: rx,
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Resolved, successfully or not. Never blocks.
    pub fn is_ready(&self) -> bool {
        !self.current().is_pending()
    }

    /// `None` while the compile is still running. Never blocks.
    pub fn try_result(&self) -> Option<Result<Arc<dyn ExecutableModel>>> {
        self.finish(self.current())
    }

    /// Wait until the compile task resolves
    pub async fn wait(&self) -> Result<Arc<dyn ExecutableModel>> {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(|s| !s.is_pending()).await {
            Ok(state) => state.clone(),
            Err(_) => self.current(),
        };
        self.finish(state)
            .unwrap_or_else(|| Err(self.failure(TASK_LOST)))
    }

    /// Blocking variant of [`wait`](Self::wait) for threads outside the runtime
    pub fn wait_blocking(&self) -> Result<Arc<dyn ExecutableModel>> {
        futures::executor::block_on(self.wait())
    }

    /// Latest state. A task that went away without reporting, e.g. by
    /// panicking, counts as failed.
    fn current(&self) -> SlotState {
        let state = self.state.borrow().clone();
        if !state.is_pending() || self.state.has_changed().is_ok() {
            return state;
        }
        // The sender may have reported right before closing
        match self.state.borrow().clone() {
            SlotState::Pending => SlotState::Failed(TASK_LOST.to_string()),
            reported => reported,
        }
    }

    fn finish(&self, state: SlotState) -> Option<Result<Arc<dyn ExecutableModel>>> {
        match state {
            SlotState::Pending => None,
            SlotState::Ready(model) => Some(Ok(model)),
            SlotState::Failed(reason) => Some(Err(self.failure(reason))),
        }
    }

    fn failure(&self, reason: impl Into<String>) -> DispatchError {
        DispatchError::CompileFailed {
            slot: self.kind,
            device: self.device.clone(),
            reason: reason.into(),
        }
    }
}

/// What a load request hands back: up to two independently resolving slots
#[derive(Debug, Clone)]
pub struct CompiledWorkload {
    id: Uuid,
    processor: Option<CompileSlot>,
    accelerator: Option<CompileSlot>,
    perf_count: bool,
}

impl CompiledWorkload {
    pub(crate) fn new(
        processor: Option<CompileSlot>,
        accelerator: Option<CompileSlot>,
        perf_count: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            processor,
            accelerator,
            perf_count,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn processor(&self) -> Option<&CompileSlot> {
        self.processor.as_ref()
    }

    pub fn accelerator(&self) -> Option<&CompileSlot> {
        self.accelerator.as_ref()
    }

    pub fn slot(&self, kind: SlotKind) -> Result<&CompileSlot> {
        match kind {
            SlotKind::Processor => self.processor(),
            SlotKind::Accelerator => self.accelerator(),
        }
        .ok_or(DispatchError::SlotAbsent(kind))
    }

    /// Whether performance counters were requested for this load
    pub fn perf_count(&self) -> bool {
        self.perf_count
    }

    pub fn slots(&self) -> impl Iterator<Item = &CompileSlot> {
        self.accelerator.iter().chain(self.processor.iter())
    }

    /// Best result available right now without waiting: a ready accelerator
    /// first, then a ready processor
    pub fn ready_now(&self) -> Option<Arc<dyn ExecutableModel>> {
        self.slots()
            .filter_map(|slot| slot.try_result())
            .find_map(|result| result.ok())
    }

    /// Wait for every slot, then prefer the accelerator result. A failure in
    /// one slot never hides a success in the other.
    pub async fn settle(&self) -> Result<Arc<dyn ExecutableModel>> {
        let mut failures = Vec::new();
        let mut best = None;

        for slot in self.slots() {
            match slot.wait().await {
                Ok(model) => {
                    if best.is_none() {
                        best = Some(model);
                    }
                }
                Err(DispatchError::CompileFailed {
                    slot,
                    device,
                    reason,
                }) => failures.push(SlotFailure {
                    slot,
                    device,
                    reason,
                }),
                Err(other) => return Err(other),
            }
        }

        match best {
            Some(model) => Ok(model),
            None if failures.is_empty() => Err(DispatchError::NoCompileTarget),
            None if failures.len() == 1 => {
                Err(DispatchError::from_failure(failures.remove(0)))
            }
            None => Err(DispatchError::AllSlotsFailed { failures }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticDevice;
    use crate::catalog::DeviceService;
    use cortex_core::{ConfigMap, ModelSource};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn compile_on(
        device: Arc<StaticDevice>,
        id: &str,
    ) -> impl Future<Output = std::result::Result<Arc<dyn ExecutableModel>, DeviceError>> {
        let id = DeviceId::new(id);
        async move {
            let model = ModelSource::Path("/models/net.xml".into());
            device.compile(&id, &model, &ConfigMap::new()).await
        }
    }

    #[tokio::test]
    async fn test_slot_resolves() {
        let device = Arc::new(StaticDevice::new("cpu"));
        let slot = CompileSlot::spawn(SlotKind::Processor, "CPU".into(), compile_on(device, "CPU"));
        let model = slot.wait().await.unwrap();
        assert_eq!(model.device().as_str(), "CPU");
        assert!(slot.is_ready());
        assert!(slot.try_result().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_pending_slot_does_not_block() {
        let (release, gate) = oneshot::channel::<()>();
        let slot = CompileSlot::spawn(SlotKind::Accelerator, "GPU".into(), async move {
            let _ = gate.await;
            Err::<Arc<dyn ExecutableModel>, _>(DeviceError::CompileFailed {
                device: "GPU".into(),
                reason: "late failure".to_string(),
            })
        });

        assert!(!slot.is_ready());
        assert!(slot.try_result().is_none());

        release.send(()).unwrap();
        let err = slot.wait().await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::CompileFailed { slot: SlotKind::Accelerator, .. }
        ));
    }

    #[tokio::test]
    async fn test_settle_prefers_accelerator() {
        let cpu = Arc::new(StaticDevice::new("cpu").with_compile_latency(Duration::from_millis(5)));
        let gpu = Arc::new(StaticDevice::new("gpu"));
        let workload = CompiledWorkload::new(
            Some(CompileSlot::spawn(SlotKind::Processor, "CPU".into(), compile_on(cpu, "CPU"))),
            Some(CompileSlot::spawn(SlotKind::Accelerator, "GPU".into(), compile_on(gpu, "GPU"))),
            false,
        );
        let model = workload.settle().await.unwrap();
        assert_eq!(model.device().as_str(), "GPU");
    }

    #[tokio::test]
    async fn test_accelerator_failure_does_not_mask_processor() {
        let cpu = Arc::new(StaticDevice::new("cpu"));
        let gpu = Arc::new(StaticDevice::new("gpu").failing_compile("kernel build error"));
        let workload = CompiledWorkload::new(
            Some(CompileSlot::spawn(SlotKind::Processor, "CPU".into(), compile_on(cpu, "CPU"))),
            Some(CompileSlot::spawn(SlotKind::Accelerator, "GPU".into(), compile_on(gpu, "GPU"))),
            true,
        );
        let model = workload.settle().await.unwrap();
        assert_eq!(model.device().as_str(), "CPU");
        assert!(workload.perf_count());

        let accel_err = workload.accelerator().unwrap().wait().await.unwrap_err();
        assert!(accel_err.to_string().contains("kernel build error"));
    }

    #[tokio::test]
    async fn test_all_slots_failed() {
        let cpu = Arc::new(StaticDevice::new("cpu").failing_compile("a"));
        let gpu = Arc::new(StaticDevice::new("gpu").failing_compile("b"));
        let workload = CompiledWorkload::new(
            Some(CompileSlot::spawn(SlotKind::Processor, "CPU".into(), compile_on(cpu, "CPU"))),
            Some(CompileSlot::spawn(SlotKind::Accelerator, "GPU".into(), compile_on(gpu, "GPU"))),
            false,
        );
        match workload.settle().await {
            Err(DispatchError::AllSlotsFailed { failures }) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].slot, SlotKind::Accelerator);
                assert_eq!(failures[1].slot, SlotKind::Processor);
            }
            other => panic!("expected AllSlotsFailed, got {:?}", other.map(|m| m.device().clone())),
        }
    }

    #[tokio::test]
    async fn test_absent_slot_is_distinct() {
        let cpu = Arc::new(StaticDevice::new("cpu"));
        let workload = CompiledWorkload::new(
            Some(CompileSlot::spawn(SlotKind::Processor, "CPU".into(), compile_on(cpu, "CPU"))),
            None,
            false,
        );
        assert!(workload.accelerator().is_none());
        assert!(matches!(
            workload.slot(SlotKind::Accelerator),
            Err(DispatchError::SlotAbsent(SlotKind::Accelerator))
        ));
        workload.settle().await.unwrap();
        assert_eq!(workload.ready_now().unwrap().device().as_str(), "CPU");
    }

    fn crash() -> std::result::Result<Arc<dyn ExecutableModel>, DeviceError> {
        panic!("driver crashed")
    }

    #[tokio::test]
    async fn test_panicked_compile_reads_as_failed_everywhere() {
        let slot = CompileSlot::spawn(SlotKind::Accelerator, "GPU".into(), async { crash() });

        let err = slot.wait().await.unwrap_err();
        assert!(err.to_string().contains(TASK_LOST));

        assert!(slot.is_ready());
        assert!(matches!(
            slot.try_result(),
            Some(Err(DispatchError::CompileFailed { slot: SlotKind::Accelerator, .. }))
        ));

        let workload = CompiledWorkload::new(None, Some(slot), false);
        assert!(workload.ready_now().is_none());
        assert!(matches!(
            workload.settle().await,
            Err(DispatchError::CompileFailed { .. })
        ));
    }

    #[test]
    fn test_wait_blocking_outside_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let slot = runtime.block_on(async {
            let cpu = Arc::new(StaticDevice::new("cpu"));
            CompileSlot::spawn(SlotKind::Processor, "CPU".into(), compile_on(cpu, "CPU"))
        });
        let model = slot.wait_blocking().unwrap();
        assert_eq!(model.model_name(), "net");
    }
}
