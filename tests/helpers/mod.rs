//! Test helper utilities for worker and API tests

#![allow(dead_code)]

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use image_pipeline::models::job::{Job, Operation, OperationKind};
use image_pipeline::services::memory::{MemoryObjectStore, MemoryQueue, MemoryStatusStore};
use image_pipeline::services::sink::ResultSink;
use image_pipeline::services::source::SourceAcquirer;
use image_pipeline::services::transform::TransformPipeline;
use image_pipeline::services::worker::{Worker, WorkerSettings};

/// A worker wired to in-memory stores, with handles to inspect them.
pub struct TestPipeline {
    pub worker: Worker,
    pub queue: Arc<MemoryQueue>,
    pub status: Arc<MemoryStatusStore>,
    pub objects: Arc<MemoryObjectStore>,
}

pub fn test_pipeline() -> TestPipeline {
    test_pipeline_with(WorkerSettings {
        poll_interval: Duration::from_millis(10),
        job_timeout: None,
        recover_in_flight: true,
    })
}

pub fn test_pipeline_with(settings: WorkerSettings) -> TestPipeline {
    let queue = Arc::new(MemoryQueue::new());
    let status = Arc::new(MemoryStatusStore::new());
    let objects = Arc::new(MemoryObjectStore::new());

    let acquirer = SourceAcquirer::new(objects.clone(), Duration::from_secs(5), 10 * 1024 * 1024)
        .expect("Failed to build source acquirer");
    let pipeline = TransformPipeline::new(ResultSink::new(objects.clone(), None), 4096);

    let worker = Worker::new(queue.clone(), status.clone(), acquirer, pipeline, settings);

    TestPipeline {
        worker,
        queue,
        status,
        objects,
    }
}

/// Encode a solid-ish test image.
pub fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .expect("Failed to encode test image");
    buf.into_inner()
}

pub fn operation(kind: OperationKind) -> Operation {
    Operation {
        kind,
        width: 0,
        height: 0,
        format: String::new(),
        quality: 0,
        watermark: String::new(),
        output_key: String::new(),
    }
}

pub fn resize(width: i32, height: i32, format: &str) -> Operation {
    Operation {
        width,
        height,
        format: format.to_string(),
        ..operation(OperationKind::Resize)
    }
}

pub fn convert(format: &str, quality: i32) -> Operation {
    Operation {
        format: format.to_string(),
        quality,
        ..operation(OperationKind::Format)
    }
}

/// Store a source image in the object store and build a pending job for it.
pub async fn job_with_stored_source(
    pipeline: &TestPipeline,
    width: u32,
    height: u32,
    operations: Vec<Operation>,
) -> Job {
    let key = format!("uploads/{}x{}.png", width, height);
    pipeline
        .objects
        .insert(&key, image_bytes(width, height, ImageFormat::Png), "image/png")
        .await;
    Job::new(key, operations)
}

/// Serve fixed bodies under `/images/{name}`; unknown names get 404.
pub async fn serve_images(images: HashMap<String, Vec<u8>>) -> SocketAddr {
    let images = Arc::new(images);
    let app = Router::new().route(
        "/images/{name}",
        get(move |Path(name): Path<String>| {
            let images = images.clone();
            async move {
                match images.get(&name) {
                    Some(bytes) => Ok(bytes.clone()),
                    None => Err(StatusCode::NOT_FOUND),
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}
