//! Worklet dispatch: device selection, host-side validation, staging and
//! launch.

use std::time::Instant;

use sluice_backends::{visit_adapter, AdapterVisitor, DeviceAdapter, DeviceId, DeviceSelection, RuntimeDeviceTracker};
use sluice_tracing::performance::record_dispatch;

use crate::error::{Error, Result};
use crate::worklet::{
    check_aliasing, Domain, ErrorBuffer, GridDims, Signature, ThreadContext, WorkletMapField,
    WorkletPointNeighborhood,
};

/// Uniform view of the worklet kinds for the launch path.
trait Kernel: Sync {
    type Args: Signature;

    fn call<'a>(&self, ctx: &ThreadContext<'a>, args: <Self::Args as Signature>::Exec<'a>);
}

struct MapField<'w, W>(&'w W);

impl<W: WorkletMapField> Kernel for MapField<'_, W> {
    type Args = W::Args;

    #[inline]
    fn call<'a>(&self, ctx: &ThreadContext<'a>, args: <Self::Args as Signature>::Exec<'a>) {
        self.0.execute(ctx, args)
    }
}

struct PointNeighborhood<'w, W>(&'w W);

impl<W: WorkletPointNeighborhood> Kernel for PointNeighborhood<'_, W> {
    type Args = W::Args;

    #[inline]
    fn call<'a>(&self, ctx: &ThreadContext<'a>, args: <Self::Args as Signature>::Exec<'a>) {
        self.0.execute(ctx, args)
    }
}

/// Stages the arguments on the adapter's memory space and schedules the
/// kernel over the domain.
struct Launch<'k, 'r, 'h, K: Kernel> {
    kernel: &'k K,
    args: &'r <K::Args as Signature>::Args<'h>,
    dims: GridDims,
    len: usize,
}

impl<K: Kernel> AdapterVisitor for Launch<'_, '_, '_, K> {
    type Output = Result<()>;

    fn visit<A: DeviceAdapter>(self) -> Result<()> {
        let staged = <K::Args as Signature>::stage(self.args, A::MEMORY_SPACE)?;
        let errors = ErrorBuffer::default();
        let kernel = self.kernel;
        let dims = self.dims;

        A::schedule(self.len, |index| {
            let ctx = ThreadContext::new(index, dims, A::ID, &errors);
            // SAFETY: `schedule` visits each index of the validated domain once.
            let args = unsafe { <K::Args as Signature>::fetch(&staged, &ctx) };
            kernel.call(&ctx, args);
        })?;
        drop(staged);

        match errors.take() {
            Some(message) => Err(Error::Execution {
                device: A::ID,
                message,
            }),
            None => Ok(()),
        }
    }
}

/// Runs worklets on a device chosen by a [`RuntimeDeviceTracker`].
///
/// Every invocation validates its arguments on the host before anything is
/// allocated or transferred, then blocks until the kernel has run over the
/// whole domain. Outputs are left authoritative on the device's memory
/// space and move back to the host on first host access.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher<'t> {
    tracker: &'t RuntimeDeviceTracker,
    selection: DeviceSelection,
}

impl Default for Dispatcher<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher<'static> {
    /// A dispatcher over the process-wide tracker, using its priority order.
    pub fn new() -> Self {
        Self::with_tracker(RuntimeDeviceTracker::global())
    }
}

impl<'t> Dispatcher<'t> {
    pub fn with_tracker(tracker: &'t RuntimeDeviceTracker) -> Self {
        Self {
            tracker,
            selection: DeviceSelection::Any,
        }
    }

    /// Restrict execution to `selection`.
    pub fn on(mut self, selection: impl Into<DeviceSelection>) -> Self {
        self.selection = selection.into();
        self
    }

    pub fn selection(&self) -> DeviceSelection {
        self.selection
    }

    pub fn tracker(&self) -> &'t RuntimeDeviceTracker {
        self.tracker
    }

    /// Run `worklet` once per element of its first input field. Returns the
    /// device it ran on.
    pub fn invoke<W: WorkletMapField>(
        &self,
        worklet: &W,
        args: <W::Args as Signature>::Args<'_>,
    ) -> Result<DeviceId> {
        let len = <W::Args as Signature>::domain_len(&args).ok_or_else(|| {
            Error::dispatch("cannot infer the dispatch range: no FieldIn or FieldInOut argument; use invoke_range")
        })?;
        self.dispatch(&MapField(worklet), Domain { len, grid: None }, &args)
    }

    /// Run `worklet` once for every index in `0..len`.
    pub fn invoke_range<W: WorkletMapField>(
        &self,
        worklet: &W,
        len: usize,
        args: <W::Args as Signature>::Args<'_>,
    ) -> Result<DeviceId> {
        self.dispatch(&MapField(worklet), Domain { len, grid: None }, &args)
    }

    /// Run `worklet` once per point of a structured grid.
    pub fn invoke_neighborhood<W: WorkletPointNeighborhood>(
        &self,
        worklet: &W,
        dims: impl Into<GridDims>,
        args: <W::Args as Signature>::Args<'_>,
    ) -> Result<DeviceId> {
        let dims = dims.into();
        let len = dims
            .checked_count()
            .ok_or_else(|| Error::dispatch(format!("grid {dims} has too many points")))?;
        self.dispatch(&PointNeighborhood(worklet), Domain { len, grid: Some(dims) }, &args)
    }

    #[tracing::instrument(skip_all, fields(len = domain.len, device = tracing::field::Empty))]
    fn dispatch<K: Kernel>(
        &self,
        kernel: &K,
        domain: Domain,
        args: &<K::Args as Signature>::Args<'_>,
    ) -> Result<DeviceId> {
        let device = self.tracker.resolve(self.selection)?;
        tracing::Span::current().record("device", tracing::field::display(device));

        <K::Args as Signature>::validate(args, &domain)?;
        check_aliasing(&<K::Args as Signature>::bindings(args))?;
        <K::Args as Signature>::prepare(args, &domain)?;

        if domain.len == 0 {
            tracing::debug!("empty domain; nothing to launch");
            return Ok(device);
        }

        let start = Instant::now();
        visit_adapter(
            device,
            Launch {
                kernel,
                args,
                dims: domain.grid.unwrap_or(GridDims::d1(domain.len)),
                len: domain.len,
            },
        )??;
        record_dispatch(device, domain.len, start.elapsed().as_micros() as u64);
        Ok(device)
    }
}
