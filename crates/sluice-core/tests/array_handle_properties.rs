//! Storage and transfer properties of array handles and buffers.

use proptest::prelude::*;
use sluice_core::{ArrayHandle, Error, MemorySpace, Result, StorageKind};

// ============================================================================
// Deep copy
// ============================================================================

proptest! {
    #[test]
    fn deep_copy_has_equal_values_and_distinct_identity(values in prop::collection::vec(any::<i32>(), 0..256)) {
        let original = ArrayHandle::from_slice(&values).unwrap();
        let copy = original.deep_copy().unwrap();

        prop_assert_eq!(copy.len(), original.len());
        prop_assert_eq!(copy.to_vec().unwrap(), values.clone());
        prop_assert!(!copy.same_storage(&original));

        if !values.is_empty() {
            copy.write_portal().unwrap().set(0, values[0].wrapping_add(1));
            prop_assert_eq!(original.to_vec().unwrap(), values);
        }
    }

    #[test]
    fn reads_are_stable_across_spaces(values in prop::collection::vec(any::<u64>(), 1..128)) {
        let array = ArrayHandle::from_slice(&values).unwrap();
        let first = array.read_portal_on(MemorySpace::Host).unwrap().to_vec();
        array.ensure_on(MemorySpace::Discrete).unwrap();
        let discrete = array.read_portal_on(MemorySpace::Discrete).unwrap().to_vec();
        let again = array.read_portal_on(MemorySpace::Host).unwrap().to_vec();

        prop_assert_eq!(&first, &values);
        prop_assert_eq!(&discrete, &values);
        prop_assert_eq!(&again, &values);
    }
}

#[test]
fn deep_copy_materialises_computed_storage() -> Result<()> {
    let counting = ArrayHandle::counting(5u16, 5, 3);
    let copy = counting.deep_copy()?;
    assert_eq!(copy.storage_kind(), StorageKind::Basic);
    assert_eq!(copy.to_vec()?, vec![5, 10, 15]);
    Ok(())
}

#[test]
fn deep_copy_stays_on_the_authoritative_space() -> Result<()> {
    let array = ArrayHandle::from_slice(&[1.5f32, 2.5])?;
    array.write_portal_on(MemorySpace::Discrete)?.set(1, 9.0);

    let copy = array.deep_copy()?;
    let buffer = copy.buffer().expect("basic storage");
    assert_eq!(buffer.authoritative_space(), Some(MemorySpace::Discrete));
    assert_eq!(buffer.allocation_count(MemorySpace::Host), 0);
    assert_eq!(copy.to_vec()?, vec![1.5, 9.0]);
    Ok(())
}

// ============================================================================
// Cross-space round trips
// ============================================================================

#[test]
fn write_on_one_space_is_read_on_another() -> Result<()> {
    let array = ArrayHandle::from_slice(&[0i64; 4])?;
    array.ensure_on(MemorySpace::Discrete)?;

    {
        let mut portal = array.write_portal_on(MemorySpace::Discrete)?;
        portal.set(2, 42);
    }
    let buffer = array.buffer().expect("basic storage");
    assert!(!buffer.is_valid_on(MemorySpace::Host));

    array.ensure_on(MemorySpace::Host)?;
    assert_eq!(array.read_portal_on(MemorySpace::Host)?.to_vec(), vec![0, 0, 42, 0]);
    assert_eq!(buffer.transfer_count(MemorySpace::Host), 1);
    Ok(())
}

#[test]
fn repeated_ensure_transfers_once() -> Result<()> {
    let array = ArrayHandle::from_slice(&[7u8; 64])?;
    for _ in 0..4 {
        array.ensure_on(MemorySpace::Discrete)?;
    }
    let buffer = array.buffer().expect("basic storage");
    assert_eq!(buffer.transfer_count(MemorySpace::Discrete), 1);
    assert_eq!(buffer.allocation_count(MemorySpace::Discrete), 1);
    Ok(())
}

#[test]
fn mirrors_can_be_released() -> Result<()> {
    let array = ArrayHandle::from_slice(&[1u32, 2, 3])?;
    array.ensure_on(MemorySpace::Discrete)?;
    array.release_resources_on(MemorySpace::Discrete)?;

    let buffer = array.buffer().expect("basic storage");
    assert!(!buffer.has_allocation_on(MemorySpace::Discrete));
    assert_eq!(array.read_portal_on(MemorySpace::Discrete)?.to_vec(), vec![1, 2, 3]);
    Ok(())
}

// ============================================================================
// Computed storage
// ============================================================================

#[test]
fn constant_storage_reads_value_and_rejects_writes() -> Result<()> {
    let sevens = ArrayHandle::constant(7i32, 5);
    let portal = sevens.read_portal()?;
    for index in 0..5 {
        assert_eq!(portal.get(index), 7);
    }
    assert!(matches!(sevens.write_portal(), Err(Error::UnsupportedOperation(_))));
    assert!(matches!(
        sevens.write_portal_on(MemorySpace::Discrete),
        Err(Error::UnsupportedOperation(_))
    ));
    Ok(())
}

#[test]
fn counting_storage_reads_affine_sequence() -> Result<()> {
    let counting = ArrayHandle::counting(10i32, 2, 4);
    assert_eq!(counting.to_vec()?, vec![10, 12, 14, 16]);
    assert_eq!(counting.read_portal_on(MemorySpace::Discrete)?.to_vec(), vec![10, 12, 14, 16]);
    Ok(())
}

#[test]
fn composite_of_vectors_reads_through_every_component() -> Result<()> {
    let xs = ArrayHandle::from_slice(&[1.0f64, 2.0])?;
    let ys = ArrayHandle::counting(10.0f64, 10.0, 2);
    let zs = ArrayHandle::constant(-1.0f64, 2);
    let points = ArrayHandle::<[f64; 3]>::composite(vec![xs.clone(), ys, zs])?;

    assert_eq!(points.to_vec()?, vec![[1.0, 10.0, -1.0], [2.0, 20.0, -1.0]]);
    xs.fill(0.0)?;
    assert_eq!(points.get(1)?, [0.0, 20.0, -1.0]);
    assert!(matches!(points.resize(4, true), Err(Error::UnsupportedOperation(_))));
    Ok(())
}

#[test]
fn composite_reads_fail_after_a_component_shrinks() -> Result<()> {
    let xs = ArrayHandle::from_slice(&[1.0f64, 2.0, 3.0, 4.0])?;
    let ys = ArrayHandle::from_slice(&[5.0f64, 6.0, 7.0, 8.0])?;
    let points = ArrayHandle::<[f64; 2]>::composite(vec![xs, ys.clone()])?;

    ys.resize(1, true)?;
    assert_eq!(points.len(), 1);
    assert!(matches!(
        points.to_vec(),
        Err(Error::BufferSizeMismatch { expected: 4, actual: 1 })
    ));
    assert!(matches!(
        points.read_portal_on(MemorySpace::Discrete),
        Err(Error::BufferSizeMismatch { .. })
    ));

    ys.resize(4, true)?;
    assert_eq!(points.to_vec()?[0], [1.0, 5.0]);
    Ok(())
}

#[test]
fn cast_storage_converts_on_read() -> Result<()> {
    let bytes = ArrayHandle::from_slice(&[0u8, 128, 255])?;
    let widened = ArrayHandle::<f32>::cast(&bytes);
    assert_eq!(widened.to_vec()?, vec![0.0, 128.0, 255.0]);
    assert_eq!(widened.storage_kind(), StorageKind::Cast);
    assert!(widened.same_storage(&bytes));
    Ok(())
}
