//! Pipeline status reporting
//!
//! A single human-readable status follows the pipeline through its phases.
//! Hosts subscribe to a `watch` channel and render the latest value.

use tokio::sync::watch;

/// Current pipeline phase
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineStatus {
    #[default]
    NotLoaded,
    /// Creating the session for the named model
    Loading(String),
    Loaded(String),
    Preprocessing,
    Running,
    Postprocessing,
    Done,
    Error(String),
}

impl PipelineStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, PipelineStatus::Error(_))
    }

    /// Whether the pipeline is between phases (nothing pending)
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PipelineStatus::NotLoaded
                | PipelineStatus::Loaded(_)
                | PipelineStatus::Done
                | PipelineStatus::Error(_)
        )
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::NotLoaded => write!(f, "Not loaded"),
            PipelineStatus::Loading(name) => write!(f, "Loading {} model...", name),
            PipelineStatus::Loaded(name) => write!(f, "Model {} loaded", name),
            PipelineStatus::Preprocessing => write!(f, "Preprocessing..."),
            PipelineStatus::Running => write!(f, "Running inference..."),
            PipelineStatus::Postprocessing => write!(f, "Postprocessing..."),
            PipelineStatus::Done => write!(f, "Done!"),
            PipelineStatus::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Cloneable status publisher
#[derive(Clone)]
pub struct StatusReporter {
    sender: watch::Sender<PipelineStatus>,
}

impl StatusReporter {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(PipelineStatus::NotLoaded);
        Self { sender }
    }

    pub fn set(&self, status: PipelineStatus) {
        tracing::debug!(status = %status, "Pipeline status");
        self.sender.send_replace(status);
    }

    pub fn fail(&self, message: impl std::fmt::Display) {
        self.set(PipelineStatus::Error(message.to_string()));
    }

    pub fn current(&self) -> PipelineStatus {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.sender.subscribe()
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}
