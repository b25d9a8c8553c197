#![allow(dead_code)]

use digit_serve::adapters::http::{router, serve};
use digit_serve::core::network::state_dict_shapes;
use digit_serve::{DigitServer, ServerConfig};
use image::{GrayImage, ImageFormat, Luma, RgbImage};
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use zip::write::{FileOptions, ZipWriter};

/// `torch.save` export of a seeded model, written by `fixtures/export_reference.py`.
pub const REFERENCE_PTH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/reference.pth");

/// Safetensors blob with every tensor of the PyTorch `state_dict`, filled
/// with small deterministic values.
pub fn synthetic_weight_blob() -> Vec<u8> {
    synthetic_weight_blob_without(None)
}

pub fn synthetic_weight_blob_without(skip: Option<&str>) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = state_dict_shapes()
        .into_iter()
        .filter(|(name, _)| Some(name.as_str()) != skip)
        .map(|(name, shape)| {
            let len: usize = shape.iter().product();
            let is_norm_scale = name.contains(".norm") && name.ends_with(".weight");
            let bytes = (0..len)
                .flat_map(|_| {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    let value: f32 = if is_norm_scale {
                        1.0
                    } else {
                        ((state as f32 / u32::MAX as f32) * 2.0 - 1.0) * 0.05
                    };
                    value.to_le_bytes()
                })
                .collect();
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

pub fn write_temp_file(bytes: &[u8], suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

/// A bright vertical stroke on black, roughly like a handwritten "1".
pub fn stroke_png(thickness: u32) -> Vec<u8> {
    let image = GrayImage::from_fn(28, 28, |x, y| {
        if (6..22).contains(&y) && x >= 13 && x < 13 + thickness {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

pub fn rgb_jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 4) as u8, (y * 4) as u8, 128])
    });
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
    buffer.into_inner()
}

pub fn build_zip(entries: &[(&str, Vec<u8>)], directories: &[&str]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for dir in directories {
        zip.add_directory::<_, ()>(*dir, FileOptions::default()).unwrap();
    }
    for (name, data) in entries {
        zip.start_file::<_, ()>(*name, FileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub struct TestServer {
    pub base_url: String,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Load the reference `.pth` and serve it on an ephemeral port.
pub async fn spawn_server() -> TestServer {
    let config = ServerConfig {
        weights_path: REFERENCE_PTH.to_string(),
        ..ServerConfig::default()
    };
    let service = DigitServer::new(config).load_service().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(serve(
        listener,
        router(service, 32 * 1024 * 1024),
        std::future::pending(),
    ));

    TestServer {
        base_url: format!("http://{}", address),
    }
}
