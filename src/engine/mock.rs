//! Deterministic engine for tests
//!
//! Sessions invert their input (`1 - x`) into a tensor of the declared output
//! shape. Creation and execution can be delayed or made to fail, and every
//! call is counted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Backend, EngineError, EngineSession, InferenceEngine};
use crate::catalog::ModelDescriptor;
use crate::codec::{InputTensor, OutputTensor, TensorShape};

#[derive(Default)]
pub(crate) struct MockStats {
    creations: AtomicUsize,
    executions: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockStats {
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    /// Includes warm-up runs
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_runs(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockEngine {
    stats: Arc<MockStats>,
    create_delay: Duration,
    run_delay: Duration,
    failing_creations: AtomicUsize,
    failing_runs: Arc<AtomicBool>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(MockStats::default()),
            create_delay: Duration::ZERO,
            run_delay: Duration::ZERO,
            failing_creations: AtomicUsize::new(0),
            failing_runs: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Fail the next `count` session creations
    pub fn failing_creations(self, count: usize) -> Self {
        self.failing_creations.store(count, Ordering::SeqCst);
        self
    }

    /// Switch execution failures on or off for every session, warm-up included
    pub fn run_failures(&self) -> Arc<AtomicBool> {
        self.failing_runs.clone()
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

impl InferenceEngine for MockEngine {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn create_session(
        &self,
        descriptor: &ModelDescriptor,
        _weights: &[u8],
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        self.stats.creations.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            std::thread::sleep(self.create_delay);
        }

        let fail = self
            .failing_creations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(EngineError::Load(format!("{}: injected failure", descriptor.id)));
        }

        Ok(Box::new(MockSession {
            stats: self.stats.clone(),
            output_shape: descriptor.output_shape(),
            run_delay: self.run_delay,
            failing: self.failing_runs.clone(),
        }))
    }
}

struct MockSession {
    stats: Arc<MockStats>,
    output_shape: TensorShape,
    run_delay: Duration,
    failing: Arc<AtomicBool>,
}

impl EngineSession for MockSession {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn run(&mut self, input: InputTensor) -> Result<OutputTensor, EngineError> {
        self.stats.executions.fetch_add(1, Ordering::SeqCst);
        let running = self.stats.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_running.fetch_max(running, Ordering::SeqCst);

        if !self.run_delay.is_zero() {
            std::thread::sleep(self.run_delay);
        }
        self.stats.running.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Execution("injected failure".into()));
        }

        let count = self.output_shape.element_count();
        let data = if input.len() == count {
            input.as_slice().iter().map(|v| 1.0 - v).collect()
        } else {
            vec![0.5; count]
        };
        OutputTensor::new(self.output_shape, data).map_err(|e| EngineError::Execution(e.to_string()))
    }
}

/// Manifest with one 224x224 model (`candy`) and one 64x64 model (`mosaic`)
pub(crate) const TEST_MANIFEST: &str = r#"{ "models": [
    { "id": "candy", "name": "Candy", "file": "/models/candy.onnx",
      "input": { "shape": [1, 3, 224, 224] }, "output": { "shape": [1, 3, 224, 224] } },
    { "id": "mosaic", "name": "Mosaic", "file": "/models/mosaic.onnx",
      "input": { "shape": [1, 3, 64, 64] }, "output": { "shape": [1, 3, 64, 64] } }
] }"#;

/// Assets matching [`TEST_MANIFEST`]
pub(crate) fn test_assets() -> crate::assets::InMemoryAssets {
    crate::assets::InMemoryAssets::new()
        .with("/models/manifest.json", TEST_MANIFEST)
        .with("/models/candy.onnx", b"candy-weights".to_vec())
        .with("/models/mosaic.onnx", b"mosaic-weights".to_vec())
}
