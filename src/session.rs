//! Session cache
//!
//! Owns one engine session per model id. The first `acquire` for an id loads
//! the weights, compiles the session and warms it up; concurrent callers for
//! the same id share that single creation. Ready sessions live until the
//! cache is cleared.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::assets::AssetLoader;
use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::codec::{InputTensor, OutputTensor};
use crate::engine::{Backend, EngineError, EngineSession, InferenceEngine};

/// Session acquisition errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("unknown model `{0}`")]
    UnknownModel(String),
    #[error("session creation failed: {0}")]
    CreationFailed(String),
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a compiled model. Clones share the same engine session.
#[derive(Clone)]
pub struct Session {
    id: u64,
    descriptor: Arc<ModelDescriptor>,
    backend: Backend,
    /// Execution lock; engine sessions are not reentrant
    engine: Arc<Mutex<Box<dyn EngineSession>>>,
}

impl Session {
    fn new(descriptor: Arc<ModelDescriptor>, engine: Box<dyn EngineSession>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            backend: engine.backend(),
            descriptor,
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Process-unique id; equal ids mean the same underlying session
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &Arc<ModelDescriptor> {
        &self.descriptor
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.engine, &other.engine)
    }

    /// Run the model on the blocking pool.
    ///
    /// Executions against one session are serialized.
    pub async fn execute(&self, input: InputTensor) -> Result<OutputTensor, EngineError> {
        let expected = self.descriptor.input_shape();
        if input.shape() != expected {
            return Err(EngineError::InputShape {
                expected: expected.to_string(),
                actual: input.shape().to_string(),
            });
        }

        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.lock().run(input))
            .await
            .map_err(|e| EngineError::Execution(format!("execution task failed: {}", e)))?
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("model", &self.descriptor.id)
            .field("backend", &self.backend)
            .finish()
    }
}

type PendingSession = Shared<BoxFuture<'static, Result<Session, SessionError>>>;

enum Slot {
    /// `generation` identifies the creation task that owns the slot
    Creating {
        generation: u64,
        pending: PendingSession,
    },
    Ready(Session),
}

struct CacheInner {
    catalog: Arc<ModelCatalog>,
    engine: Arc<dyn InferenceEngine>,
    assets: Arc<dyn AssetLoader>,
    slots: Mutex<HashMap<String, Slot>>,
    next_generation: AtomicU64,
}

/// Model id -> session map with single-flight creation
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<CacheInner>,
}

impl SessionCache {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        engine: Arc<dyn InferenceEngine>,
        assets: Arc<dyn AssetLoader>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                catalog,
                engine,
                assets,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.inner.catalog
    }

    /// Get the session for `model_id`, creating it on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn acquire(&self, model_id: &str) -> Result<Session, SessionError> {
        let pending = {
            let mut slots = self.inner.slots.lock();
            match slots.get(model_id) {
                Some(Slot::Ready(session)) => return Ok(session.clone()),
                Some(Slot::Creating { pending, .. }) => pending.clone(),
                None => {
                    let descriptor = self
                        .inner
                        .catalog
                        .describe(model_id)
                        .ok_or_else(|| SessionError::UnknownModel(model_id.to_string()))?;
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let pending = self.launch(descriptor, generation);
                    slots.insert(
                        model_id.to_string(),
                        Slot::Creating {
                            generation,
                            pending: pending.clone(),
                        },
                    );
                    pending
                }
            }
        };
        pending.await
    }

    /// Whether a ready session exists for `model_id`
    pub fn is_ready(&self, model_id: &str) -> bool {
        matches!(self.inner.slots.lock().get(model_id), Some(Slot::Ready(_)))
    }

    pub fn is_creating(&self, model_id: &str) -> bool {
        matches!(
            self.inner.slots.lock().get(model_id),
            Some(Slot::Creating { .. })
        )
    }

    /// Ids with a ready session
    pub fn ready_models(&self) -> Vec<String> {
        self.inner
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop every cached session (teardown). In-flight creations still
    /// resolve their waiters but are not re-cached, and never touch a slot
    /// created after the clear.
    pub fn clear(&self) {
        self.inner.slots.lock().clear();
    }

    /// Spawn the creation task. The task records its own outcome in the slot
    /// map before any waiter observes it.
    fn launch(&self, descriptor: Arc<ModelDescriptor>, generation: u64) -> PendingSession {
        let inner = self.inner.clone();
        let model_id = descriptor.id.clone();
        tracing::info!(model = %model_id, generation, "Creating session");

        let task_inner = inner.clone();
        let task_model_id = model_id.clone();
        let task = tokio::spawn(async move {
            let result = task_inner.create(descriptor).await;
            task_inner.finish(&task_model_id, generation, &result);
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task never reached finish(); release the slot here
                    let result = Err(SessionError::CreationFailed(format!(
                        "creation task aborted: {}",
                        e
                    )));
                    inner.finish(&model_id, generation, &result);
                    result
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl CacheInner {
    async fn create(&self, descriptor: Arc<ModelDescriptor>) -> Result<Session, SessionError> {
        let failed = |what: String| SessionError::CreationFailed(format!("{}: {}", descriptor.id, what));

        let weights = self
            .assets
            .fetch(&descriptor.weights_locator)
            .await
            .map_err(|e| failed(format!("failed to load weights from {}: {}", descriptor.weights_locator, e)))?;

        if let Some(expected) = &descriptor.integrity_hash {
            verify_integrity(expected, &weights).map_err(failed)?;
        }

        let engine = self.engine.clone();
        let compile_descriptor = descriptor.clone();
        let compiled = tokio::task::spawn_blocking(move || {
            engine.create_session(&compile_descriptor, &weights)
        })
        .await
        .map_err(|e| failed(format!("compile task failed: {}", e)))?
        .map_err(|e| failed(e.to_string()))?;

        let session = Session::new(descriptor.clone(), compiled);

        // Prime lazy allocations so the first real frame is not slow.
        let warm_up = session
            .execute(InputTensor::zeros(descriptor.input_shape()))
            .await
            .map_err(|e| failed(format!("warm-up failed: {}", e)))?;
        if warm_up.shape() != descriptor.output_shape() {
            return Err(failed(format!(
                "warm-up output {} does not match declared output {}",
                warm_up.shape(),
                descriptor.output_shape()
            )));
        }

        tracing::info!(
            model = %descriptor.id,
            backend = %session.backend(),
            session = session.id(),
            "Session ready"
        );
        Ok(session)
    }

    fn finish(&self, model_id: &str, generation: u64, result: &Result<Session, SessionError>) {
        let mut slots = self.slots.lock();
        // After a clear() the slot is gone or owned by a newer creation
        let owned = matches!(
            slots.get(model_id),
            Some(Slot::Creating { generation: owner, .. }) if *owner == generation
        );
        if !owned {
            return;
        }
        match result {
            Ok(session) => {
                slots.insert(model_id.to_string(), Slot::Ready(session.clone()));
            }
            Err(e) => {
                tracing::warn!(model = %model_id, "{}", e);
                slots.remove(model_id);
            }
        }
    }
}

/// Compare SHA-256 of `weights` with a hex digest, optionally `sha256-` prefixed
fn verify_integrity(expected: &str, weights: &[u8]) -> Result<(), String> {
    let expected = expected.trim();
    let expected = expected.strip_prefix("sha256-").unwrap_or(expected);
    let actual = hex::encode(Sha256::digest(weights));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(format!("integrity check failed: expected {}, got {}", expected, actual))
    }
}
