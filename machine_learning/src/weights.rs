use std::{collections::HashMap, fs, path::Path};

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{MlErr, Result};

/// Named tensors, as stored in a safetensors file.
pub type Tensors = HashMap<String, ArrayD<f32>>;

/// Reads every tensor of a safetensors file.
///
/// # Arguments
/// * `path` - The file to read.
///
/// # Returns
/// The tensors by name, or an error if the file can't be read, isn't valid safetensors or holds a
/// tensor that isn't `F32`.
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<Tensors> {
    let bytes = fs::read(path)?;
    let st = SafeTensors::deserialize(&bytes)?;

    st.tensors()
        .into_iter()
        .map(|(name, view)| {
            let tensor = to_array(&name, &view)?;
            Ok((name, tensor))
        })
        .collect()
}

/// Writes named tensors to a safetensors file as `F32`.
pub fn save_safetensors<P: AsRef<Path>>(tensors: &Tensors, path: P) -> Result<()> {
    let bytes: Vec<(&str, Vec<u8>, Vec<usize>)> = tensors
        .iter()
        .map(|(name, t)| {
            let data: Vec<f32> = t.iter().copied().collect();
            (
                name.as_str(),
                bytemuck::cast_slice(&data).to_vec(),
                t.shape().to_vec(),
            )
        })
        .collect();

    let views = bytes
        .iter()
        .map(|(name, data, shape)| Ok((*name, TensorView::new(Dtype::F32, shape.clone(), data)?)))
        .collect::<Result<Vec<_>>>()?;

    safetensors::serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

/// Looks up a tensor by name.
pub fn get<'a>(tensors: &'a Tensors, name: &str) -> Result<ArrayViewD<'a, f32>> {
    tensors
        .get(name)
        .map(|tensor| tensor.view())
        .ok_or_else(|| MlErr::MissingWeights(name.to_string()))
}

fn to_array(name: &str, view: &TensorView<'_>) -> Result<ArrayD<f32>> {
    if view.dtype() != Dtype::F32 {
        return Err(MlErr::UnsupportedDtype {
            tensor: name.to_string(),
            dtype: format!("{:?}", view.dtype()),
        });
    }

    let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
    let len = data.len();

    ArrayD::from_shape_vec(IxDyn(view.shape()), data).map_err(|_| MlErr::SizeMismatch {
        what: "safetensors tensor",
        got: len,
        expected: view.shape().iter().product(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn written_tensors_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");

        let mut tensors = Tensors::new();
        tensors.insert(
            "features.0.weight".into(),
            Array::from_shape_fn(IxDyn(&[2, 1, 3, 3]), |i| i[0] as f32 - i[3] as f32),
        );
        tensors.insert("features.0.bias".into(), ArrayD::from_elem(IxDyn(&[2]), 0.5));

        save_safetensors(&tensors, &path).unwrap();
        let loaded = load_safetensors(&path).unwrap();

        assert_eq!(loaded, tensors);
        assert_eq!(
            get(&loaded, "features.0.bias").unwrap(),
            tensors["features.0.bias"].view()
        );
        assert!(get(&loaded, "features.1.weight").is_err());
    }

    #[test]
    fn garbage_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        fs::write(&path, b"not a tensor file").unwrap();

        assert!(load_safetensors(&path).is_err());
        assert!(load_safetensors(dir.path().join("missing")).is_err());
    }
}
