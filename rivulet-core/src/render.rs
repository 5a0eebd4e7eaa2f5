//! Outputs and the artifacts they produce.
//!
//! An output is a memo that turns reactive state into an [`Artifact`]. The
//! rendering collaborator is told which outputs went stale after a stimulus
//! and reads them again; reading recomputes only what actually changed.

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, ReactiveError, ReactiveResult};
use crate::graph::{DirtyState, NodeId};
use crate::reactive::{Memo, Runtime};
use crate::table::Table;

/// What an output hands to the render layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    Text(String),
    /// An HTML fragment.
    Markup(String),
    Table(Table),
    Image {
        mime: String,
        bytes: Vec<u8>,
    },
    /// The computation behind the output failed.
    Error {
        message: String,
    },
}

impl Artifact {
    pub fn text(text: impl Into<String>) -> Self {
        Artifact::Text(text.into())
    }

    pub fn markup(html: impl Into<String>) -> Self {
        Artifact::Markup(html.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Artifact::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Artifact::Error { .. })
    }
}

/// A named output of a session.
#[derive(Clone)]
pub struct Output {
    name: String,
    memo: Memo<Artifact>,
}

impl Output {
    pub fn new<F>(runtime: &Runtime, name: impl Into<String>, render: F) -> Self
    where
        F: Fn() -> Result<Artifact, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            memo: Memo::new(runtime, render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> NodeId {
        self.memo.id()
    }

    /// Read the artifact, surfacing any failure.
    pub fn try_render(&self) -> ReactiveResult<Artifact> {
        self.memo.get()
    }

    /// Read the artifact, turning a failed computation into
    /// [`Artifact::Error`]. Only a torn-down session is an error here.
    pub fn render(&self) -> ReactiveResult<Artifact> {
        match self.memo.get() {
            Ok(artifact) => Ok(artifact),
            Err(error @ ReactiveError::Lifecycle { .. }) => Err(error),
            Err(error) => {
                tracing::warn!(output = %self.name, %error, "rendering fallback");
                Ok(Artifact::error(error.to_string()))
            }
        }
    }

    pub(crate) fn dispose(&self) {
        self.memo.dispose();
    }

    /// Whether the next read will have to look at dependencies again.
    pub fn is_stale(&self) -> bool {
        self.memo.state() != DirtyState::Clean
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("name", &self.name)
            .field("id", &self.id())
            .field("stale", &self.is_stale())
            .finish()
    }
}
