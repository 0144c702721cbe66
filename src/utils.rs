use ndarray::{Array, Array1, Array2, Dimension, IxDyn};

pub type Float = f64;
pub type ArrayF<D> = Array<Float, D>;
pub type Array1F = Array1<Float>;
pub type Array2F = Array2<Float>;
pub type ArrayDynF = Array<Float, IxDyn>;

pub type GenericResult<T> = anyhow::Result<T>;

/// Elementwise comparison with an absolute tolerance of 0.001. Arrays of different shapes are
/// never almost equal.
pub fn arrays_almost_equal<D: Dimension>(arr1: &ArrayF<D>, arr2: &ArrayF<D>) -> bool {
    arr1.shape() == arr2.shape()
        && arr1.iter().zip(arr2.iter()).all(|(a, b)| (a - b).abs() < 0.001)
}

/// Number of elements described by a shape. An empty shape is a scalar.
pub fn shape_length(shape: &[usize]) -> usize {
    shape.iter().product()
}
