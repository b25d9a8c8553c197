//! Loads the exported PyTorch `state_dict` into a [`DigitNet`].
//!
//! `.pth`/`.pt` files written by `torch.save(model.state_dict(), path)` are
//! read with burn-store's pickle reader. A `.safetensors` export with the same
//! tensor names is accepted as well.

use crate::core::network::{state_dict_shapes, DigitNet};
use crate::domain::ports::Storage;
use crate::utils::error::{Result, ServeError};
use crate::utils::validation::file_extension;
use burn::tensor::backend::Backend;
use burn_store::{ApplyResult, ModuleSnapshot, PyTorchToBurnAdapter, PytorchStore, SafetensorsStore};
use std::collections::HashSet;
use std::fmt::Display;
use std::path::PathBuf;

// nn.MultiheadAttention 把 q/k/v 投影存成單一參數
const IN_PROJ_WEIGHT: (&str, &str) = (r"\.in_proj_weight$", ".in_proj.weight");
const IN_PROJ_BIAS: (&str, &str) = (r"\.in_proj_bias$", ".in_proj.bias");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Pytorch,
    Safetensors,
}

impl WeightFormat {
    pub fn from_path(path: &str) -> Result<Self> {
        match file_extension(path).as_deref() {
            Some("pth") | Some("pt") => Ok(Self::Pytorch),
            Some("safetensors") => Ok(Self::Safetensors),
            _ => Err(ServeError::ModelLoad {
                message: format!(
                    "unsupported weight file {} (expected .pth, .pt or .safetensors)",
                    path
                ),
            }),
        }
    }
}

/// What [`WeightSource::apply_to`] did with the file's tensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub applied: usize,
    /// Tensors in the file the network has no parameter for.
    pub unused: Vec<String>,
}

/// A weight file that has been located and is ready to apply.
#[derive(Debug, Clone)]
pub enum WeightSource {
    Pytorch(PathBuf),
    Safetensors(Vec<u8>),
}

impl WeightSource {
    /// 透過 Storage 找到權重檔
    pub async fn open<S: Storage>(storage: &S, path: &str) -> Result<Self> {
        let unreadable = |e: ServeError| ServeError::ModelLoad {
            message: format!("cannot read {}: {}", path, e),
        };

        match WeightFormat::from_path(path)? {
            WeightFormat::Pytorch => {
                let local = storage.local_path(path);
                tokio::fs::metadata(&local)
                    .await
                    .map_err(|e| unreadable(e.into()))?;
                Ok(Self::Pytorch(local))
            }
            WeightFormat::Safetensors => storage
                .read_file(path)
                .await
                .map(Self::Safetensors)
                .map_err(unreadable),
        }
    }

    /// Copy every tensor into `net`. Blocking; run it off the async runtime.
    ///
    /// Missing or mis-shaped parameters fail with the PyTorch tensor name.
    /// Extra tensors in the file are reported in [`LoadSummary::unused`].
    pub fn apply_to<B: Backend>(self, net: &mut DigitNet<B>) -> Result<LoadSummary> {
        let result = match self {
            WeightSource::Pytorch(path) => {
                let mut store = PytorchStore::from_file(&path)
                    .with_key_remapping(IN_PROJ_WEIGHT.0, IN_PROJ_WEIGHT.1)
                    .with_key_remapping(IN_PROJ_BIAS.0, IN_PROJ_BIAS.1)
                    .allow_partial(true)
                    .validate(false);
                net.load_from(&mut store)
                    .map_err(|e| unparsable(&path.display().to_string(), e))?
            }
            WeightSource::Safetensors(bytes) => {
                let mut store = SafetensorsStore::from_bytes(Some(bytes))
                    .with_from_adapter(PyTorchToBurnAdapter)
                    .with_key_remapping(IN_PROJ_WEIGHT.0, IN_PROJ_WEIGHT.1)
                    .with_key_remapping(IN_PROJ_BIAS.0, IN_PROJ_BIAS.1)
                    .allow_partial(true)
                    .validate(false);
                net.load_from(&mut store)
                    .map_err(|e| unparsable("safetensors blob", e))?
            }
        };

        summarize(result)
    }
}

fn unparsable(source: &str, e: impl Display) -> ServeError {
    ServeError::ModelLoad {
        message: format!("cannot parse weights from {}: {}", source, e),
    }
}

fn summarize(result: ApplyResult) -> Result<LoadSummary> {
    if let Some(error) = result.errors.first() {
        return Err(ServeError::ModelLoad {
            message: format!("tensor does not fit the network: {:?}", error),
        });
    }

    let applied: HashSet<String> = result.applied.iter().map(|path| state_dict_name(path)).collect();
    if let Some((missing, _)) = state_dict_shapes()
        .into_iter()
        .find(|(name, _)| !applied.contains(name))
    {
        return Err(ServeError::ModelLoad {
            message: format!("missing tensor {}", missing),
        });
    }

    for name in &result.unused {
        tracing::debug!("Ignoring tensor {} (not a network parameter)", name);
    }

    Ok(LoadSummary {
        applied: result.applied.len(),
        unused: result.unused,
    })
}

/// The PyTorch name of a burn parameter path.
pub fn state_dict_name(path: &str) -> String {
    let renames = [
        (".in_proj.weight", ".in_proj_weight"),
        (".in_proj.bias", ".in_proj_bias"),
        (".gamma", ".weight"),
        (".beta", ".bias"),
    ];
    renames
        .iter()
        .find_map(|(burn, torch)| path.strip_suffix(burn).map(|prefix| format!("{prefix}{torch}")))
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalStorage;
    use crate::core::network::InferenceBackend;
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;
    use std::collections::HashMap;

    fn state_dict_blob(edit: impl Fn(&mut Vec<(String, Vec<usize>)>)) -> Vec<u8> {
        let mut shapes = state_dict_shapes();
        edit(&mut shapes);

        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = shapes
            .into_iter()
            .map(|(name, shape)| {
                let len: usize = shape.iter().product();
                let bytes = (0..len).flat_map(|i| ((i % 7) as f32 * 0.01).to_le_bytes()).collect();
                (name, shape, bytes)
            })
            .collect();
        let views: HashMap<String, TensorView<'_>> = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                (
                    name.clone(),
                    TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap(),
                )
            })
            .collect();
        safetensors::serialize(&views, &None).unwrap()
    }

    fn apply(blob: Vec<u8>) -> Result<LoadSummary> {
        let device = Default::default();
        let mut net = DigitNet::<InferenceBackend>::new(&device);
        WeightSource::Safetensors(blob).apply_to(&mut net)
    }

    #[test]
    fn test_format_follows_extension() {
        assert_eq!(WeightFormat::from_path("model_weights.pth").unwrap(), WeightFormat::Pytorch);
        assert_eq!(WeightFormat::from_path("/m/w.PT").unwrap(), WeightFormat::Pytorch);
        assert_eq!(
            WeightFormat::from_path("w.safetensors").unwrap(),
            WeightFormat::Safetensors
        );

        let err = WeightFormat::from_path("weights.bin").unwrap_err();
        assert!(err.to_string().contains("weights.bin"));
    }

    #[test]
    fn test_state_dict_names() {
        assert_eq!(
            state_dict_name("transformer.layers.1.self_attn.in_proj.weight"),
            "transformer.layers.1.self_attn.in_proj_weight"
        );
        assert_eq!(
            state_dict_name("transformer.layers.0.norm2.gamma"),
            "transformer.layers.0.norm2.weight"
        );
        assert_eq!(state_dict_name("conv2.bias"), "conv2.bias");
    }

    #[test]
    fn test_complete_state_dict_applies_every_tensor() {
        let summary = apply(state_dict_blob(|_| {})).unwrap();

        assert_eq!(summary.applied, state_dict_shapes().len());
        assert!(summary.unused.is_empty());
    }

    #[test]
    fn test_extra_tensors_are_reported_unused() {
        let blob = state_dict_blob(|shapes| {
            shapes.push(("transformer.layers.0.extra".to_string(), vec![4]))
        });

        let summary = apply(blob).unwrap();

        assert_eq!(summary.unused, vec!["transformer.layers.0.extra".to_string()]);
    }

    #[test]
    fn test_missing_tensor_uses_state_dict_name() {
        let blob = state_dict_blob(|shapes| {
            shapes.retain(|(name, _)| name != "transformer.layers.1.norm1.weight")
        });

        let err = apply(blob).unwrap_err();

        assert!(matches!(err, ServeError::ModelLoad { .. }));
        assert!(err
            .to_string()
            .contains("missing tensor transformer.layers.1.norm1.weight"));
    }

    #[test]
    fn test_wrong_shape_names_tensor() {
        let blob = state_dict_blob(|shapes| {
            for (name, shape) in shapes.iter_mut() {
                if name == "conv1.bias" {
                    *shape = vec![16];
                }
            }
        });

        let err = apply(blob).unwrap_err();
        assert!(err.to_string().contains("conv1.bias"));
    }

    #[test]
    fn test_garbage_blob_is_an_error() {
        let err = apply(b"not a weight file".to_vec()).unwrap_err();
        assert!(matches!(err, ServeError::ModelLoad { .. }));
    }

    #[tokio::test]
    async fn test_open_missing_pth_names_path() {
        let storage = LocalStorage::new(".");
        let err = WeightSource::open(&storage, "/nonexistent/model_weights.pth")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/model_weights.pth"));
    }
}
