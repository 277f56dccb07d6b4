use std::fmt::Debug;
use std::sync::Arc;

use jitlink::tensor::codec::{decode_from, encode_into, Decoder, Encoder};
use jitlink::{DType, Element, Error, HostValue, NativeEngine, Shape, Tensor, TensorData, Value};
use jitlink_engine_ref::RefEngine;

fn ref_engine() -> (Arc<RefEngine>, Arc<dyn NativeEngine>) {
    let concrete = Arc::new(RefEngine::new());
    let engine: Arc<dyn NativeEngine> = concrete.clone();
    (concrete, engine)
}

fn round_trip<S>(engine: &Arc<dyn NativeEngine>, data: Vec<Vec<S>>)
where
    S: Element + TensorData<Scalar = S> + Debug,
{
    let tensor = Tensor::new(engine, &data).expect("tensor creation failed");
    assert_eq!(tensor.dtype(), S::DTYPE);
    assert_eq!(tensor.shape().dims(), &[data.len(), data[0].len()]);
    assert!(tensor.owns_buffer());
    let decoded: Vec<Vec<S>> = tensor.value().expect("decode failed");
    assert_eq!(decoded, data);
}

#[test]
fn every_dtype_round_trips_through_the_engine() {
    let (live, engine) = ref_engine();
    round_trip(&engine, vec![vec![0u8, 255], vec![7, 9]]);
    round_trip(&engine, vec![vec![-128i8, 127], vec![0, -1]]);
    round_trip(&engine, vec![vec![i32::MIN, i32::MAX], vec![3, 4]]);
    round_trip(&engine, vec![vec![i64::MIN, 42], vec![-42, i64::MAX]]);
    round_trip(&engine, vec![vec![1.5f32, -0.25], vec![f32::MAX, 0.0]]);
    round_trip(&engine, vec![vec![std::f64::consts::PI, -1e300], vec![0.0, 2.0]]);
    assert_eq!(live.live_tensors(), 0);
}

#[test]
fn float_pair_is_stored_as_native_bytes() {
    let (_, engine) = ref_engine();
    let tensor = Tensor::new(&engine, &vec![1.0f32, 2.0]).unwrap();
    let mut expected = 1.0f32.to_ne_bytes().to_vec();
    expected.extend_from_slice(&2.0f32.to_ne_bytes());
    assert_eq!(tensor.bytes().unwrap(), expected.as_slice());
}

#[test]
fn scalars_have_rank_zero() {
    let (_, engine) = ref_engine();
    let tensor = Tensor::new(&engine, &7i64).unwrap();
    assert_eq!(tensor.shape(), &Shape::scalar());
    assert_eq!(tensor.num_elements(), 1);
    assert_eq!(tensor.value::<i64>().unwrap(), 7);
}

#[test]
fn zero_sized_dimensions_decode_to_empty_nests() {
    let (live, engine) = ref_engine();

    let empty: Vec<Vec<f32>> = Vec::new();
    let blank = Tensor::new(&engine, &empty).unwrap();
    assert_eq!(blank.shape().dims(), &[0, 0]);
    assert!(blank.bytes().unwrap().is_empty());
    assert!(blank.value::<Vec<Vec<f32>>>().unwrap().is_empty());
    drop(blank);

    let rows: Vec<Vec<i32>> = vec![Vec::new(), Vec::new()];
    let tensor = Tensor::new(&engine, &rows).unwrap();
    assert_eq!(tensor.shape().dims(), &[2, 0]);
    assert_eq!(tensor.value::<Vec<Vec<i32>>>().unwrap(), rows);
    assert_eq!(
        tensor.host_value().unwrap(),
        HostValue::List(vec![HostValue::List(Vec::new()), HostValue::List(Vec::new())])
    );

    drop(tensor);
    assert_eq!(live.live_tensors(), 0);
}

#[test]
fn ragged_input_is_rejected_before_reaching_the_engine() {
    let (live, engine) = ref_engine();
    let err = Tensor::new(&engine, &vec![vec![1.0f32, 2.0], vec![3.0]]).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { expected: 2, actual: 1 }), "{err}");
    assert!(err.is_marshal());
    assert_eq!(live.live_tensors(), 0);
}

#[test]
fn explicit_shape_must_match_the_value() {
    let (_, engine) = ref_engine();
    let err = Tensor::with_shape(&engine, &vec![1i32, 2, 3], &Shape::from([2]), DType::Int)
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));

    let err = Tensor::with_shape(&engine, &vec![1i32, 2], &Shape::from([2]), DType::Long)
        .unwrap_err();
    assert!(matches!(err, Error::DTypeMismatch { expected: DType::Long, .. }));

    let err = Tensor::with_shape(&engine, &vec![1i32, 2], &Shape::from([1, 2]), DType::Int)
        .unwrap_err();
    assert!(matches!(err, Error::RankMismatch { .. }));
}

#[test]
fn bools_are_stored_in_byte_tensors() {
    let (_, engine) = ref_engine();
    let tensor =
        Tensor::with_shape(&engine, &vec![true, false, true], &Shape::from([3]), DType::Byte)
            .unwrap();
    assert_eq!(tensor.dtype(), DType::Byte);
    assert_eq!(tensor.value::<Vec<u8>>().unwrap(), vec![1, 0, 1]);
    assert_eq!(tensor.value::<Vec<bool>>().unwrap(), vec![true, false, true]);
}

#[test]
fn dynamic_host_values_infer_and_decode() {
    let (_, engine) = ref_engine();
    let value = HostValue::from(vec![vec![1i64, 2, 3], vec![4, 5, 6]]);
    let tensor = Tensor::from_host_value(&engine, &value).unwrap();
    assert_eq!(tensor.shape().dims(), &[2, 3]);
    assert_eq!(tensor.dtype(), DType::Long);
    assert_eq!(tensor.host_value().unwrap(), value);
    assert_eq!(tensor.to_vec::<i64>().unwrap(), vec![1, 2, 3, 4, 5, 6]);

    let err = Tensor::from_host_value(&engine, &HostValue::List(Vec::new())).unwrap_err();
    assert!(matches!(err, Error::UnsupportedType { .. }));

    let mixed = HostValue::List(vec![HostValue::Long(1), HostValue::Double(2.0)]);
    let err = Tensor::from_host_value(&engine, &mixed).unwrap_err();
    assert!(matches!(err, Error::DTypeMismatch { .. }));
}

#[test]
fn flat_runs_are_reshaped() {
    let (_, engine) = ref_engine();
    let tensor = Tensor::from_flat(&engine, &[1.0f64, 2.0, 3.0, 4.0], &Shape::from([2, 2])).unwrap();
    assert_eq!(
        tensor.value::<Vec<Vec<f64>>>().unwrap(),
        vec![vec![1.0, 2.0], vec![3.0, 4.0]]
    );

    let err = Tensor::from_flat(&engine, &[1u8, 2, 3], &Shape::from([2, 2])).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { expected: 4, actual: 3 }));
}

#[test]
fn clones_are_independent_engine_tensors() {
    let (live, engine) = ref_engine();
    let original = Tensor::new(&engine, &vec![5i32, 6]).unwrap();
    let copy = original.try_clone().unwrap();
    assert!(!copy.owns_buffer());
    assert_eq!(live.live_tensors(), 2);

    original.release();
    assert_eq!(copy.value::<Vec<i32>>().unwrap(), vec![5, 6]);
    drop(copy);
    assert_eq!(live.live_tensors(), 0);
}

#[test]
fn value_trees_index_and_clone() {
    let (live, engine) = ref_engine();
    let a = Tensor::new(&engine, &vec![1i64]).unwrap();
    let b = Tensor::new(&engine, &vec![2i64]).unwrap();
    let c = Tensor::new(&engine, &vec![3i64]).unwrap();
    let tree = Value::tuple([a.into(), Value::tuple([b.into(), c.into()])]);
    assert_eq!(tree.leaf_count(), 3);

    let nested = tree.get(1).and_then(|inner| inner.get(0)).unwrap();
    assert_eq!(nested.as_tensor().unwrap().value::<Vec<i64>>().unwrap(), vec![2]);
    assert!(tree.get(2).is_none());

    let copy = tree.try_clone().unwrap();
    assert_eq!(live.live_tensors(), 6);
    drop(tree);
    let first = copy.into_tuple().unwrap().remove(0).into_tensor().unwrap();
    assert_eq!(first.value::<Vec<i64>>().unwrap(), vec![1]);
    drop(first);
    assert_eq!(live.live_tensors(), 0);
}

/// Deterministic element generator for the shape sweep.
trait Sample: Element + TensorData<Scalar = Self> + Into<HostValue> {
    fn sample(index: usize) -> Self;
}

impl Sample for u8 {
    fn sample(index: usize) -> Self {
        (index * 37 % 256) as u8
    }
}

impl Sample for i8 {
    fn sample(index: usize) -> Self {
        (index * 29 % 256) as u8 as i8
    }
}

impl Sample for i32 {
    fn sample(index: usize) -> Self {
        (index as i32 - 20) * 7919
    }
}

impl Sample for i64 {
    fn sample(index: usize) -> Self {
        (index as i64 - 20) * (1 << 40) + 3
    }
}

impl Sample for f32 {
    fn sample(index: usize) -> Self {
        index as f32 * 0.75 - 9.5
    }
}

impl Sample for f64 {
    fn sample(index: usize) -> Self {
        index as f64 * -1.0e-3 + 1.0e10
    }
}

fn build1<S: Sample>(dims: &[usize], next: &mut usize) -> Vec<S> {
    (0..dims[0])
        .map(|_| {
            *next += 1;
            S::sample(*next)
        })
        .collect()
}

fn build2<S: Sample>(dims: &[usize], next: &mut usize) -> Vec<Vec<S>> {
    (0..dims[0]).map(|_| build1(&dims[1..], next)).collect()
}

fn build3<S: Sample>(dims: &[usize], next: &mut usize) -> Vec<Vec<Vec<S>>> {
    (0..dims[0]).map(|_| build2(&dims[1..], next)).collect()
}

fn check_round_trip<T>(engine: &Arc<dyn NativeEngine>, value: &T, dims: &[usize])
where
    T: TensorData + Clone + PartialEq + Debug + Into<HostValue>,
    T::Scalar: Element,
{
    let dtype = <T::Scalar as Element>::DTYPE;
    let shape = Shape::new(dims.to_vec());
    let tensor = Tensor::with_shape(engine, value, &shape, dtype).unwrap();
    assert_eq!(tensor.shape(), &shape);
    assert_eq!(tensor.dtype(), dtype);
    assert_eq!(&tensor.value::<T>().unwrap(), value, "{dtype:?} {dims:?}");

    let host: HostValue = value.clone().into();
    assert_eq!(tensor.host_value().unwrap(), host, "{dtype:?} {dims:?}");

    let len = shape.byte_len(dtype).unwrap();
    let mut fast = vec![0u8; len];
    let mut slow = vec![0u8; len];
    encode_into(value, &shape, dtype, Encoder::new(&mut fast).with_fast_path(true)).unwrap();
    encode_into(value, &shape, dtype, Encoder::new(&mut slow).with_fast_path(false)).unwrap();
    assert_eq!(fast, slow, "{dtype:?} {dims:?}");
    assert_eq!(tensor.bytes().unwrap(), fast.as_slice());
    let slow_back: T = decode_from(&shape, dtype, Decoder::new(&slow).with_fast_path(false)).unwrap();
    assert_eq!(&slow_back, value);

    let dynamic = Tensor::from_host_value_with_shape(engine, &host, &shape, dtype).unwrap();
    assert_eq!(dynamic.bytes().unwrap(), fast.as_slice());

    if !dims.contains(&0) {
        let inferred = Tensor::new(engine, value).unwrap();
        assert_eq!(inferred.shape(), &shape);
        assert_eq!(inferred.bytes().unwrap(), fast.as_slice());
    }
}

const RANK1: [[usize; 1]; 4] = [[0], [1], [5], [33]];
const RANK2: [[usize; 2]; 6] = [[0, 0], [0, 3], [3, 0], [1, 1], [2, 3], [4, 17]];
const RANK3: [[usize; 3]; 6] = [[0, 0, 0], [2, 0, 3], [3, 2, 0], [1, 1, 1], [2, 3, 4], [3, 1, 5]];

fn sweep<S: Sample + Debug>(engine: &Arc<dyn NativeEngine>) {
    check_round_trip(engine, &S::sample(0), &[]);
    for dims in RANK1 {
        check_round_trip(engine, &build1::<S>(&dims, &mut 0), &dims);
    }
    for dims in RANK2 {
        check_round_trip(engine, &build2::<S>(&dims, &mut 0), &dims);
    }
    for dims in RANK3 {
        check_round_trip(engine, &build3::<S>(&dims, &mut 0), &dims);
    }
}

#[test]
fn every_dtype_round_trips_across_ranks_and_zero_dims() {
    let (live, engine) = ref_engine();
    sweep::<u8>(&engine);
    sweep::<i8>(&engine);
    sweep::<i32>(&engine);
    sweep::<i64>(&engine);
    sweep::<f32>(&engine);
    sweep::<f64>(&engine);
    assert_eq!(live.live_tensors(), 0);
}
