// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of ShuffleGraph — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::Module;
use crate::{PureResult, Tensor, TensorError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl StoredTensor {
    fn from_tensor(tensor: &Tensor) -> StoredTensor {
        StoredTensor {
            rows: tensor.shape().0,
            cols: tensor.shape().1,
            data: tensor.data().to_vec(),
        }
    }

    fn into_tensor(self) -> PureResult<Tensor> {
        Tensor::from_vec(self.rows, self.cols, self.data)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ModuleSnapshot {
    parameters: BTreeMap<String, StoredTensor>,
}

/// On-disk encoding of a parameter snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Bincode,
}

impl SnapshotFormat {
    /// `.json` files are JSON, everything else is bincode.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Bincode,
        }
    }
}

fn snapshot_from_entries<'a>(
    entries: impl IntoIterator<Item = (&'a String, &'a Tensor)>,
) -> ModuleSnapshot {
    let parameters = entries
        .into_iter()
        .map(|(name, tensor)| (name.clone(), StoredTensor::from_tensor(tensor)))
        .collect();
    ModuleSnapshot { parameters }
}

fn from_snapshot(snapshot: ModuleSnapshot) -> PureResult<BTreeMap<String, Tensor>> {
    let mut state = BTreeMap::new();
    for (name, tensor) in snapshot.parameters.into_iter() {
        state.insert(name, tensor.into_tensor()?);
    }
    Ok(state)
}

fn io_error(err: std::io::Error) -> TensorError {
    TensorError::IoError {
        message: err.to_string(),
    }
}

fn serde_error(err: impl ToString) -> TensorError {
    TensorError::SerializationError {
        message: err.to_string(),
    }
}

/// Encodes a name to tensor mapping into `writer`.
pub fn write_state_dict<'a, W: Write>(
    entries: impl IntoIterator<Item = (&'a String, &'a Tensor)>,
    writer: W,
    format: SnapshotFormat,
) -> PureResult<()> {
    let snapshot = snapshot_from_entries(entries);
    match format {
        SnapshotFormat::Json => serde_json::to_writer_pretty(writer, &snapshot).map_err(serde_error),
        SnapshotFormat::Bincode => bincode::serialize_into(writer, &snapshot).map_err(serde_error),
    }
}

/// Decodes a name to tensor mapping from `reader`.
pub fn read_state_dict<R: Read>(
    reader: R,
    format: SnapshotFormat,
) -> PureResult<BTreeMap<String, Tensor>> {
    let snapshot: ModuleSnapshot = match format {
        SnapshotFormat::Json => serde_json::from_reader(reader).map_err(serde_error)?,
        SnapshotFormat::Bincode => bincode::deserialize_from(reader).map_err(serde_error)?,
    };
    from_snapshot(snapshot)
}

fn save_module<M: Module + ?Sized>(module: &M, path: &Path, format: SnapshotFormat) -> PureResult<()> {
    let state: BTreeMap<String, Tensor> = module.state_dict()?.into_iter().collect();
    let file = File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    write_state_dict(&state, &mut writer, format)?;
    writer.flush().map_err(io_error)
}

fn load_module<M: Module + ?Sized>(
    module: &mut M,
    path: &Path,
    format: SnapshotFormat,
) -> PureResult<()> {
    let file = File::open(path).map_err(io_error)?;
    let state: HashMap<String, Tensor> = read_state_dict(BufReader::new(file), format)?
        .into_iter()
        .collect();
    module.load_state_dict(&state)
}

pub fn save_json<M: Module + ?Sized, P: AsRef<Path>>(module: &M, path: P) -> PureResult<()> {
    save_module(module, path.as_ref(), SnapshotFormat::Json)
}

pub fn load_json<M: Module + ?Sized, P: AsRef<Path>>(module: &mut M, path: P) -> PureResult<()> {
    load_module(module, path.as_ref(), SnapshotFormat::Json)
}

pub fn save_bincode<M: Module + ?Sized, P: AsRef<Path>>(module: &M, path: P) -> PureResult<()> {
    save_module(module, path.as_ref(), SnapshotFormat::Bincode)
}

pub fn load_bincode<M: Module + ?Sized, P: AsRef<Path>>(
    module: &mut M,
    path: P,
) -> PureResult<()> {
    load_module(module, path.as_ref(), SnapshotFormat::Bincode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ConvBlock, ConvOptions, Normalization, Activation};
    use crate::FeatureShape;
    use std::fs;
    use tempfile::tempdir;

    fn block(seed: u64) -> ConvBlock {
        ConvBlock::new(
            "io",
            FeatureShape::new(2, 4, 4).unwrap(),
            3,
            (3, 3),
            ConvOptions {
                seed: Some(seed),
                ..ConvOptions::default()
            },
            Normalization::from_flags(true, false),
            Activation::Relu,
        )
        .unwrap()
    }

    #[test]
    fn save_and_load_roundtrip_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("block.json");
        let source = block(1);
        save_json(&source, &path).unwrap();
        let mut target = block(2);
        assert_ne!(source.state_dict().unwrap(), target.state_dict().unwrap());
        load_json(&mut target, &path).unwrap();
        assert_eq!(source.state_dict().unwrap(), target.state_dict().unwrap());
    }

    #[test]
    fn save_and_load_roundtrip_bincode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("block.bin");
        let source = block(3);
        save_bincode(&source, &path).unwrap();
        let mut target = block(4);
        load_bincode(&mut target, &path).unwrap();
        assert!(fs::metadata(&path).unwrap().len() > 0);
        assert_eq!(source.state_dict().unwrap(), target.state_dict().unwrap());
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            SnapshotFormat::from_path(Path::new("weights.JSON")),
            SnapshotFormat::Json
        );
        assert_eq!(
            SnapshotFormat::from_path(Path::new("weights.pkl")),
            SnapshotFormat::Bincode
        );
    }

    #[test]
    fn truncated_payload_is_a_serialization_error() {
        let mut buffer = Vec::new();
        let state: BTreeMap<String, Tensor> =
            [("w".to_string(), Tensor::full(2, 2, 1.5).unwrap())].into();
        write_state_dict(&state, &mut buffer, SnapshotFormat::Bincode).unwrap();
        buffer.truncate(buffer.len() / 2);
        let err = read_state_dict(buffer.as_slice(), SnapshotFormat::Bincode).unwrap_err();
        assert!(matches!(err, TensorError::SerializationError { .. }));
    }
}
