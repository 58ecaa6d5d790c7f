//! Worklets: kernels invoked once per element or per grid point.
//!
//! A worklet declares its parameters as a tuple of roles and receives, per
//! invocation, the matching tuple of values:
//!
//! ```
//! use sluice_core::worklet::{FieldIn, FieldOut, ThreadContext, WorkletMapField};
//! use sluice_core::{ArrayHandle, Dispatcher};
//!
//! struct Scale(f32);
//!
//! impl WorkletMapField for Scale {
//!     type Args = (FieldIn<f32>, FieldOut<f32>);
//!
//!     fn execute<'a>(&self, _ctx: &ThreadContext<'a>, (x, y): (f32, &'a mut f32)) {
//!         *y = x * self.0;
//!     }
//! }
//!
//! let input = ArrayHandle::from_slice(&[1.0f32, 2.0, 3.0]).unwrap();
//! let output = ArrayHandle::new();
//! Dispatcher::new().invoke(&Scale(2.0), (&input, &output)).unwrap();
//! assert_eq!(output.to_vec().unwrap(), vec![2.0, 4.0, 6.0]);
//! ```

mod context;
mod roles;

use sluice_backends::MemorySpace;

use crate::error::{Error, Result};

pub use context::{GridDims, ThreadContext};
pub(crate) use context::ErrorBuffer;
pub use roles::{
    ArgRole, AtomicArrayInOut, AtomicPortal, Binding, Domain, FieldIn, FieldInNeighborhood, FieldInOut, FieldOut,
    Neighborhood, WholeArrayIn,
};

/// A tuple of [`ArgRole`]s.
pub trait Signature: 'static {
    type Args<'h>;
    type Staged: Send + Sync + 'static;
    type Exec<'a>;

    const ARITY: usize;

    /// Length of the first argument that defines the dispatch range.
    fn domain_len(args: &Self::Args<'_>) -> Option<usize>;

    fn bindings(args: &Self::Args<'_>) -> Vec<Binding>;

    fn validate(args: &Self::Args<'_>, domain: &Domain) -> Result<()>;

    fn prepare(args: &Self::Args<'_>, domain: &Domain) -> Result<()>;

    fn stage(args: &Self::Args<'_>, space: MemorySpace) -> Result<Self::Staged>;

    /// # Safety
    /// As for [`ArgRole::fetch`].
    unsafe fn fetch<'a>(staged: &'a Self::Staged, ctx: &ThreadContext<'_>) -> Self::Exec<'a>;
}

macro_rules! impl_signature {
    ($arity:literal; $($role:ident $idx:tt),+) => {
        impl<$($role: ArgRole),+> Signature for ($($role,)+) {
            type Args<'h> = ($($role::Arg<'h>,)+);
            type Staged = ($($role::Staged,)+);
            type Exec<'a> = ($($role::Exec<'a>,)+);

            const ARITY: usize = $arity;

            fn domain_len(args: &Self::Args<'_>) -> Option<usize> {
                None $(.or_else(|| $role::DEFINES_DOMAIN.then(|| $role::len(&args.$idx))))+
            }

            fn bindings(args: &Self::Args<'_>) -> Vec<Binding> {
                let mut bindings = Vec::new();
                $(
                    bindings.extend($role::buffers(&args.$idx).into_iter().map(|buffer| Binding {
                        position: $idx,
                        role: $role::NAME,
                        writes: $role::WRITES,
                        buffer,
                    }));
                )+
                bindings
            }

            fn validate(args: &Self::Args<'_>, domain: &Domain) -> Result<()> {
                $($role::validate(&args.$idx, domain, $idx)?;)+
                Ok(())
            }

            fn prepare(args: &Self::Args<'_>, domain: &Domain) -> Result<()> {
                $($role::prepare(&args.$idx, domain)?;)+
                Ok(())
            }

            fn stage(args: &Self::Args<'_>, space: MemorySpace) -> Result<Self::Staged> {
                Ok(($($role::stage(&args.$idx, space)?,)+))
            }

            #[inline]
            unsafe fn fetch<'a>(staged: &'a Self::Staged, ctx: &ThreadContext<'_>) -> Self::Exec<'a> {
                ($($role::fetch(&staged.$idx, ctx),)+)
            }
        }
    };
}

impl_signature!(1; A 0);
impl_signature!(2; A 0, B 1);
impl_signature!(3; A 0, B 1, C 2);
impl_signature!(4; A 0, B 1, C 2, D 3);
impl_signature!(5; A 0, B 1, C 2, D 3, E 4);

/// Reject bindings where a written buffer is also bound elsewhere.
pub(crate) fn check_aliasing(bindings: &[Binding]) -> Result<()> {
    for (n, first) in bindings.iter().enumerate() {
        for second in &bindings[n + 1..] {
            let conflicting = first.writes || second.writes;
            if conflicting && first.position != second.position && first.buffer.ptr_eq(&second.buffer) {
                return Err(Error::dispatch(format!(
                    "buffer {} is bound to argument {} ({}) and argument {} ({}); a written buffer cannot be shared",
                    first.buffer.id(),
                    first.position,
                    first.role,
                    second.position,
                    second.role
                )));
            }
        }
    }
    Ok(())
}

/// A kernel run once per element of its input fields.
pub trait WorkletMapField: Sync {
    type Args: Signature;

    fn execute<'a>(&self, ctx: &ThreadContext<'a>, args: <Self::Args as Signature>::Exec<'a>);
}

/// A kernel run once per point of a structured grid, with access to the
/// neighboring points through [`FieldInNeighborhood`].
pub trait WorkletPointNeighborhood: Sync {
    type Args: Signature;

    fn execute<'a>(&self, ctx: &ThreadContext<'a>, args: <Self::Args as Signature>::Exec<'a>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_handle::ArrayHandle;

    type InOut = (FieldIn<f32>, FieldOut<f32>);

    #[test]
    fn domain_comes_from_the_first_input_field() {
        let out = ArrayHandle::<f32>::allocate(9);
        let input = ArrayHandle::<f32>::allocate(4);
        assert_eq!(<InOut as Signature>::domain_len(&(&input, &out)), Some(4));

        let whole = ArrayHandle::<i32>::allocate(2);
        let outputs_only = (&whole, &out);
        assert_eq!(
            <(WholeArrayIn<i32>, FieldOut<f32>) as Signature>::domain_len(&outputs_only),
            None
        );
    }

    #[test]
    fn written_buffers_cannot_alias() {
        let shared = ArrayHandle::<f32>::allocate(4);
        let bindings = <InOut as Signature>::bindings(&(&shared, &shared));
        assert!(matches!(check_aliasing(&bindings), Err(Error::Dispatch(_))));

        let other = ArrayHandle::<f32>::allocate(4);
        let bindings = <InOut as Signature>::bindings(&(&shared, &other));
        assert!(check_aliasing(&bindings).is_ok());

        let bindings = <(FieldIn<f32>, FieldIn<f32>) as Signature>::bindings(&(&shared, &shared));
        assert!(check_aliasing(&bindings).is_ok());
    }
}
